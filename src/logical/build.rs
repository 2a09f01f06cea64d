//! Lowers an analyzed query into the logical operator tree.
//!
//! Commands map 1:1 onto operators with a few normalizations: `table` and
//! `fields` collapse into Project, `chart` becomes a plain Aggregate and
//! `timechart` becomes Bin-then-Aggregate with the time bucket as the
//! leading group key.

use super::plan::{LogicalPlan, WindowMode};
use crate::analyzer::AnalyzedQuery;
use crate::ast::{Command, Query};
use crate::catalog::DatasetCatalog;
use crate::error::{QueryError, Result};
use crate::row::{Row, Value};
use std::sync::Arc;
use tracing::debug;

pub struct LogicalPlanner<'a> {
    catalog: &'a dyn DatasetCatalog,
}

impl<'a> LogicalPlanner<'a> {
    pub fn new(catalog: &'a dyn DatasetCatalog) -> Self {
        Self { catalog }
    }

    pub fn plan(&self, analyzed: &AnalyzedQuery) -> Result<LogicalPlan> {
        let mut plan = self.plan_commands(analyzed)?;
        if analyzed.explain {
            let schema = plan.schema();
            plan = LogicalPlan::Explain {
                input: Box::new(plan),
                schema,
            };
        }
        debug!(plan = %plan, "logical plan built");
        Ok(plan)
    }

    fn plan_commands(&self, analyzed: &AnalyzedQuery) -> Result<LogicalPlan> {
        let mut current: Option<LogicalPlan> = None;
        for (i, command) in analyzed.query.commands.iter().enumerate() {
            let schema = analyzed.schemas[i].clone();
            current = Some(self.plan_command(command, current, schema, i, analyzed)?);
        }
        current.ok_or_else(|| QueryError::internal("cannot plan an empty query"))
    }

    fn plan_command(
        &self,
        command: &Command,
        input: Option<LogicalPlan>,
        schema: Arc<crate::catalog::Schema>,
        index: usize,
        analyzed: &AnalyzedQuery,
    ) -> Result<LogicalPlan> {
        let boxed = |plan: Option<LogicalPlan>| -> Result<Box<LogicalPlan>> {
            plan.map(Box::new)
                .ok_or_else(|| QueryError::internal("command requires an input plan"))
        };
        Ok(match command {
            Command::Search(c) => LogicalPlan::Scan {
                dataset: c.dataset.clone(),
                filter: c.filter.clone(),
                schema,
            },
            Command::Where(c) => LogicalPlan::Filter {
                input: boxed(input)?,
                condition: c.condition.clone(),
                schema,
            },
            Command::Fields(c) => LogicalPlan::Project {
                input: boxed(input)?,
                fields: c.fields.iter().map(|f| f.name.clone()).collect(),
                exclude: c.exclude,
                schema,
            },
            Command::Table(c) => LogicalPlan::Project {
                input: boxed(input)?,
                fields: c.fields.iter().map(|f| f.name.clone()).collect(),
                exclude: false,
                schema,
            },
            Command::Stats(c) => LogicalPlan::Aggregate {
                input: boxed(input)?,
                keys: c.by.clone(),
                aggregations: c.aggregations.clone(),
                schema,
            },
            Command::Chart(c) => LogicalPlan::Aggregate {
                input: boxed(input)?,
                keys: c.by.clone(),
                aggregations: c.aggregations.clone(),
                schema,
            },
            Command::Timechart(c) => {
                // Implicit time bucketing, then aggregation keyed on the
                // bucketed time field.
                let input = boxed(input)?;
                let bin_schema = input.schema();
                let bin = LogicalPlan::Bin {
                    input,
                    field: c.time_field.clone(),
                    span: c.span,
                    bins: None,
                    schema: bin_schema,
                };
                let mut keys = vec![c.time_field.clone()];
                keys.extend(c.by.iter().cloned());
                LogicalPlan::Aggregate {
                    input: Box::new(bin),
                    keys,
                    aggregations: c.aggregations.clone(),
                    schema,
                }
            }
            Command::Sort(c) => LogicalPlan::Sort {
                input: boxed(input)?,
                keys: c.keys.clone(),
                schema,
            },
            Command::Head(c) => LogicalPlan::Limit {
                input: boxed(input)?,
                // Negative head counts clamp to an empty result.
                count: c.count.max(0) as u64,
                schema,
            },
            Command::Top(c) => LogicalPlan::TopN {
                input: boxed(input)?,
                count: c.count,
                fields: c.fields.clone(),
                by: c.by.clone(),
                rare: false,
                schema,
            },
            Command::Rare(c) => LogicalPlan::TopN {
                input: boxed(input)?,
                count: c.count,
                fields: c.fields.clone(),
                by: c.by.clone(),
                rare: true,
                schema,
            },
            Command::Eval(c) => LogicalPlan::Eval {
                input: boxed(input)?,
                assignments: c.assignments.clone(),
                schema,
            },
            Command::Rename(c) => LogicalPlan::Rename {
                input: boxed(input)?,
                pairs: c
                    .pairs
                    .iter()
                    .map(|p| (p.source.name.clone(), p.target.clone()))
                    .collect(),
                schema,
            },
            Command::Replace(c) => LogicalPlan::Replace {
                input: boxed(input)?,
                from: c.from.clone(),
                to: c.to.clone(),
                fields: c.fields.iter().map(|f| f.name.clone()).collect(),
                schema,
            },
            Command::Fillnull(c) => LogicalPlan::Fillnull {
                input: boxed(input)?,
                value: c.value.value.clone(),
                fields: c.fields.iter().map(|f| f.name.clone()).collect(),
                schema,
            },
            Command::Parse(c) => self.regex_extract(boxed(input)?, &c.field, &c.pattern, schema)?,
            Command::Rex(c) => self.regex_extract(boxed(input)?, &c.field, &c.pattern, schema)?,
            Command::Lookup(c) => LogicalPlan::Lookup {
                input: boxed(input)?,
                table: c.table.clone(),
                key_field: c.key_field.clone(),
                outputs: c.outputs.clone(),
                schema,
            },
            Command::Append(_) => {
                let sub = analyzed.subqueries.get(&index).ok_or_else(|| {
                    QueryError::internal("append subsearch was not analyzed")
                })?;
                LogicalPlan::Append {
                    input: boxed(input)?,
                    subsearch: Box::new(self.plan_commands(sub)?),
                    schema,
                }
            }
            Command::Join(c) => {
                let sub = analyzed.subqueries.get(&index).ok_or_else(|| {
                    QueryError::internal("join subsearch was not analyzed")
                })?;
                LogicalPlan::Join {
                    input: boxed(input)?,
                    subsearch: Box::new(self.plan_commands(sub)?),
                    join_type: c.join_type,
                    key_field: c.key_field.clone(),
                    schema,
                }
            }
            Command::Dedup(c) => LogicalPlan::Dedup {
                input: boxed(input)?,
                count: c.count.max(1),
                fields: c.fields.clone(),
                consecutive: c.consecutive,
                sort_by: c.sort_by.clone(),
                schema,
            },
            Command::Bin(c) => LogicalPlan::Bin {
                input: boxed(input)?,
                field: c.field.clone(),
                span: c.span,
                bins: c.bins,
                schema,
            },
            Command::Describe(c) => {
                let dataset_schema = self.catalog.dataset_schema(&c.dataset)?;
                let rows = dataset_schema
                    .iter()
                    .map(|(name, kind)| {
                        Row::from_fields([
                            ("field", Value::Str(name.to_string())),
                            ("type", Value::Str(kind.name().to_string())),
                        ])
                    })
                    .collect();
                LogicalPlan::Values { rows, schema }
            }
            Command::ShowDatasources(_) => {
                let rows = self
                    .catalog
                    .list_datasets()
                    .into_iter()
                    .map(|name| Row::from_fields([("name", Value::Str(name))]))
                    .collect();
                LogicalPlan::Values { rows, schema }
            }
            Command::Reverse(_) => LogicalPlan::Reverse {
                input: boxed(input)?,
                schema,
            },
            Command::Flatten(c) => LogicalPlan::Flatten {
                input: boxed(input)?,
                field: c.field.clone(),
                schema,
            },
            Command::Eventstats(c) => LogicalPlan::Window {
                input: boxed(input)?,
                mode: WindowMode::Eventstats,
                aggregations: c.aggregations.clone(),
                by: c.by.clone(),
                schema,
            },
            Command::Streamstats(c) => LogicalPlan::Window {
                input: boxed(input)?,
                mode: WindowMode::Streamstats {
                    window: c.window.unwrap_or(0),
                },
                aggregations: c.aggregations.clone(),
                by: c.by.clone(),
                schema,
            },
            Command::Explain(_) | Command::Tail(_) | Command::Addtotals(_)
            | Command::Addcoltotals(_) => {
                return Err(QueryError::internal(format!(
                    "{} should have been rejected or stripped during analysis",
                    command.name()
                )));
            }
        })
    }

    fn regex_extract(
        &self,
        input: Box<LogicalPlan>,
        field: &crate::ast::FieldRef,
        pattern: &str,
        schema: Arc<crate::catalog::Schema>,
    ) -> Result<LogicalPlan> {
        let compiled = regex::Regex::new(pattern)
            .map_err(|e| QueryError::internal(format!("pattern re-validation failed: {}", e)))?;
        let captures = compiled
            .capture_names()
            .flatten()
            .map(|n| n.to_string())
            .collect();
        Ok(LogicalPlan::RegexExtract {
            input,
            field: field.clone(),
            pattern: pattern.to_string(),
            captures,
            schema,
        })
    }
}

/// Convenience: analyze and plan in one step.
pub fn plan_query(catalog: &dyn DatasetCatalog, query: &Query) -> Result<LogicalPlan> {
    let analyzed = crate::analyzer::Analyzer::new(catalog).analyze(query)?;
    LogicalPlanner::new(catalog).plan(&analyzed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::catalog::{FieldKind, MemoryCatalog, Schema};

    fn pos() -> Position {
        Position::none()
    }

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.register(
            "logs",
            Schema::from_fields([
                ("ts", FieldKind::Date),
                ("host", FieldKind::String),
                ("status", FieldKind::Int),
            ]),
        );
        catalog
    }

    fn search() -> Command {
        Command::Search(SearchCommand {
            dataset: "logs".into(),
            filter: None,
            position: pos(),
        })
    }

    #[test]
    fn test_fields_lowers_to_project() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Fields(FieldsCommand {
                    exclude: false,
                    fields: vec![FieldRef::new("host", pos())],
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        assert!(matches!(plan, LogicalPlan::Project { exclude: false, .. }));
    }

    #[test]
    fn test_table_lowers_to_project() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Table(TableCommand {
                    fields: vec![FieldRef::new("host", pos())],
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        assert!(matches!(plan, LogicalPlan::Project { .. }));
    }

    #[test]
    fn test_timechart_normalizes_to_bin_aggregate() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Timechart(TimechartCommand {
                    span: Some(TimeSpan {
                        value: 5,
                        unit: TimeUnit::Minutes,
                        position: pos(),
                    }),
                    time_field: FieldRef::new("ts", pos()),
                    aggregations: vec![Aggregation {
                        func: "count".into(),
                        args: vec![],
                        distinct: false,
                        alias: None,
                        position: pos(),
                    }],
                    by: vec![],
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        match &plan {
            LogicalPlan::Aggregate { input, keys, .. } => {
                assert_eq!(keys[0].name, "ts");
                assert!(matches!(input.as_ref(), LogicalPlan::Bin { .. }));
            }
            other => panic!("expected Aggregate, got {}", other.name()),
        }
    }

    #[test]
    fn test_negative_head_clamped() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Head(HeadCommand {
                    count: -3,
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        assert!(matches!(plan, LogicalPlan::Limit { count: 0, .. }));
    }

    #[test]
    fn test_explain_wraps_plan() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                Command::Explain(ExplainCommand { position: pos() }),
                search(),
            ]),
        )
        .unwrap();
        assert!(matches!(plan, LogicalPlan::Explain { .. }));
    }

    #[test]
    fn test_describe_lowers_to_values() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![Command::Describe(DescribeCommand {
                dataset: "logs".into(),
                position: pos(),
            })]),
        )
        .unwrap();
        match &plan {
            LogicalPlan::Values { rows, .. } => {
                assert_eq!(rows.len(), 3);
                assert_eq!(rows[0].get("field"), Value::Str("ts".into()));
            }
            other => panic!("expected Values, got {}", other.name()),
        }
    }

    #[test]
    fn test_join_has_two_children() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Join(JoinCommand {
                    join_type: JoinType::Inner,
                    key_field: FieldRef::new("host", pos()),
                    subsearch: Query::new(vec![search()]),
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        assert_eq!(plan.children().len(), 2);
    }

    #[test]
    fn test_rebuild_with_children_preserves_attrs() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Head(HeadCommand {
                    count: 7,
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        let children: Vec<LogicalPlan> = plan.children().into_iter().cloned().collect();
        let rebuilt = plan.with_children(children);
        assert_eq!(plan, rebuilt);
    }
}
