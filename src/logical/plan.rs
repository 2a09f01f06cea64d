use crate::ast::{
    Aggregation, EvalAssignment, Expr, FieldRef, JoinType, LiteralValue, LookupOutput, SortKey,
    TimeSpan,
};
use crate::catalog::Schema;
use crate::row::Row;
use std::fmt;
use std::sync::Arc;

/// Non-collapsing aggregation mode.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowMode {
    /// Full pass, then re-emit every row with the group aggregate.
    Eventstats,
    /// Online; `window` of 0 means global-so-far.
    Streamstats { window: u64 },
}

/// Relational operator tree. Every node owns its children exclusively and
/// carries the output schema computed during planning, so `schema()`
/// never recomputes.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    Scan {
        dataset: String,
        filter: Option<Expr>,
        schema: Arc<Schema>,
    },
    Filter {
        input: Box<LogicalPlan>,
        condition: Expr,
        schema: Arc<Schema>,
    },
    Project {
        input: Box<LogicalPlan>,
        fields: Vec<String>,
        exclude: bool,
        schema: Arc<Schema>,
    },
    Sort {
        input: Box<LogicalPlan>,
        keys: Vec<SortKey>,
        schema: Arc<Schema>,
    },
    Limit {
        input: Box<LogicalPlan>,
        count: u64,
        schema: Arc<Schema>,
    },
    Aggregate {
        input: Box<LogicalPlan>,
        keys: Vec<FieldRef>,
        aggregations: Vec<Aggregation>,
        schema: Arc<Schema>,
    },
    Dedup {
        input: Box<LogicalPlan>,
        count: u64,
        fields: Vec<FieldRef>,
        consecutive: bool,
        sort_by: Vec<SortKey>,
        schema: Arc<Schema>,
    },
    TopN {
        input: Box<LogicalPlan>,
        count: u64,
        fields: Vec<FieldRef>,
        by: Vec<FieldRef>,
        rare: bool,
        schema: Arc<Schema>,
    },
    Bin {
        input: Box<LogicalPlan>,
        field: FieldRef,
        span: Option<TimeSpan>,
        bins: Option<u32>,
        schema: Arc<Schema>,
    },
    Eval {
        input: Box<LogicalPlan>,
        assignments: Vec<EvalAssignment>,
        schema: Arc<Schema>,
    },
    Rename {
        input: Box<LogicalPlan>,
        pairs: Vec<(String, String)>,
        schema: Arc<Schema>,
    },
    Replace {
        input: Box<LogicalPlan>,
        from: String,
        to: String,
        fields: Vec<String>,
        schema: Arc<Schema>,
    },
    Fillnull {
        input: Box<LogicalPlan>,
        value: LiteralValue,
        fields: Vec<String>,
        schema: Arc<Schema>,
    },
    RegexExtract {
        input: Box<LogicalPlan>,
        field: FieldRef,
        pattern: String,
        captures: Vec<String>,
        schema: Arc<Schema>,
    },
    Lookup {
        input: Box<LogicalPlan>,
        table: String,
        key_field: FieldRef,
        outputs: Vec<LookupOutput>,
        schema: Arc<Schema>,
    },
    Append {
        input: Box<LogicalPlan>,
        subsearch: Box<LogicalPlan>,
        schema: Arc<Schema>,
    },
    Join {
        input: Box<LogicalPlan>,
        subsearch: Box<LogicalPlan>,
        join_type: JoinType,
        key_field: FieldRef,
        schema: Arc<Schema>,
    },
    Reverse {
        input: Box<LogicalPlan>,
        schema: Arc<Schema>,
    },
    Flatten {
        input: Box<LogicalPlan>,
        field: FieldRef,
        schema: Arc<Schema>,
    },
    Window {
        input: Box<LogicalPlan>,
        mode: WindowMode,
        aggregations: Vec<Aggregation>,
        by: Vec<FieldRef>,
        schema: Arc<Schema>,
    },
    /// Literal row source for metadata queries (describe, show
    /// datasources).
    Values {
        rows: Vec<Row>,
        schema: Arc<Schema>,
    },
    /// Meta-request wrapper; carries the inner plan unchanged.
    Explain {
        input: Box<LogicalPlan>,
        schema: Arc<Schema>,
    },
}

impl LogicalPlan {
    pub fn schema(&self) -> Arc<Schema> {
        match self {
            LogicalPlan::Scan { schema, .. }
            | LogicalPlan::Filter { schema, .. }
            | LogicalPlan::Project { schema, .. }
            | LogicalPlan::Sort { schema, .. }
            | LogicalPlan::Limit { schema, .. }
            | LogicalPlan::Aggregate { schema, .. }
            | LogicalPlan::Dedup { schema, .. }
            | LogicalPlan::TopN { schema, .. }
            | LogicalPlan::Bin { schema, .. }
            | LogicalPlan::Eval { schema, .. }
            | LogicalPlan::Rename { schema, .. }
            | LogicalPlan::Replace { schema, .. }
            | LogicalPlan::Fillnull { schema, .. }
            | LogicalPlan::RegexExtract { schema, .. }
            | LogicalPlan::Lookup { schema, .. }
            | LogicalPlan::Append { schema, .. }
            | LogicalPlan::Join { schema, .. }
            | LogicalPlan::Reverse { schema, .. }
            | LogicalPlan::Flatten { schema, .. }
            | LogicalPlan::Window { schema, .. }
            | LogicalPlan::Values { schema, .. }
            | LogicalPlan::Explain { schema, .. } => schema.clone(),
        }
    }

    /// Children in evaluation order (main input first).
    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } | LogicalPlan::Values { .. } => vec![],
            LogicalPlan::Append {
                input, subsearch, ..
            }
            | LogicalPlan::Join {
                input, subsearch, ..
            } => vec![input, subsearch],
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Dedup { input, .. }
            | LogicalPlan::TopN { input, .. }
            | LogicalPlan::Bin { input, .. }
            | LogicalPlan::Eval { input, .. }
            | LogicalPlan::Rename { input, .. }
            | LogicalPlan::Replace { input, .. }
            | LogicalPlan::Fillnull { input, .. }
            | LogicalPlan::RegexExtract { input, .. }
            | LogicalPlan::Lookup { input, .. }
            | LogicalPlan::Reverse { input, .. }
            | LogicalPlan::Flatten { input, .. }
            | LogicalPlan::Window { input, .. }
            | LogicalPlan::Explain { input, .. } => vec![input],
        }
    }

    /// Rebuilds this node over new children; attribute fields are cloned,
    /// the original is left intact. The child count must match.
    pub fn with_children(&self, mut children: Vec<LogicalPlan>) -> LogicalPlan {
        let mut next = || Box::new(children.remove(0));
        match self {
            LogicalPlan::Scan { .. } | LogicalPlan::Values { .. } => self.clone(),
            LogicalPlan::Filter {
                condition, schema, ..
            } => LogicalPlan::Filter {
                input: next(),
                condition: condition.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Project {
                fields,
                exclude,
                schema,
                ..
            } => LogicalPlan::Project {
                input: next(),
                fields: fields.clone(),
                exclude: *exclude,
                schema: schema.clone(),
            },
            LogicalPlan::Sort { keys, schema, .. } => LogicalPlan::Sort {
                input: next(),
                keys: keys.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Limit { count, schema, .. } => LogicalPlan::Limit {
                input: next(),
                count: *count,
                schema: schema.clone(),
            },
            LogicalPlan::Aggregate {
                keys,
                aggregations,
                schema,
                ..
            } => LogicalPlan::Aggregate {
                input: next(),
                keys: keys.clone(),
                aggregations: aggregations.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Dedup {
                count,
                fields,
                consecutive,
                sort_by,
                schema,
                ..
            } => LogicalPlan::Dedup {
                input: next(),
                count: *count,
                fields: fields.clone(),
                consecutive: *consecutive,
                sort_by: sort_by.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::TopN {
                count,
                fields,
                by,
                rare,
                schema,
                ..
            } => LogicalPlan::TopN {
                input: next(),
                count: *count,
                fields: fields.clone(),
                by: by.clone(),
                rare: *rare,
                schema: schema.clone(),
            },
            LogicalPlan::Bin {
                field,
                span,
                bins,
                schema,
                ..
            } => LogicalPlan::Bin {
                input: next(),
                field: field.clone(),
                span: *span,
                bins: *bins,
                schema: schema.clone(),
            },
            LogicalPlan::Eval {
                assignments, schema, ..
            } => LogicalPlan::Eval {
                input: next(),
                assignments: assignments.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Rename { pairs, schema, .. } => LogicalPlan::Rename {
                input: next(),
                pairs: pairs.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Replace {
                from,
                to,
                fields,
                schema,
                ..
            } => LogicalPlan::Replace {
                input: next(),
                from: from.clone(),
                to: to.clone(),
                fields: fields.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Fillnull {
                value,
                fields,
                schema,
                ..
            } => LogicalPlan::Fillnull {
                input: next(),
                value: value.clone(),
                fields: fields.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::RegexExtract {
                field,
                pattern,
                captures,
                schema,
                ..
            } => LogicalPlan::RegexExtract {
                input: next(),
                field: field.clone(),
                pattern: pattern.clone(),
                captures: captures.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Lookup {
                table,
                key_field,
                outputs,
                schema,
                ..
            } => LogicalPlan::Lookup {
                input: next(),
                table: table.clone(),
                key_field: key_field.clone(),
                outputs: outputs.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Append { schema, .. } => LogicalPlan::Append {
                input: next(),
                subsearch: next(),
                schema: schema.clone(),
            },
            LogicalPlan::Join {
                join_type,
                key_field,
                schema,
                ..
            } => LogicalPlan::Join {
                input: next(),
                subsearch: next(),
                join_type: *join_type,
                key_field: key_field.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Reverse { schema, .. } => LogicalPlan::Reverse {
                input: next(),
                schema: schema.clone(),
            },
            LogicalPlan::Flatten { field, schema, .. } => LogicalPlan::Flatten {
                input: next(),
                field: field.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Window {
                mode,
                aggregations,
                by,
                schema,
                ..
            } => LogicalPlan::Window {
                input: next(),
                mode: mode.clone(),
                aggregations: aggregations.clone(),
                by: by.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Explain { schema, .. } => LogicalPlan::Explain {
                input: next(),
                schema: schema.clone(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LogicalPlan::Scan { .. } => "Scan",
            LogicalPlan::Filter { .. } => "Filter",
            LogicalPlan::Project { .. } => "Project",
            LogicalPlan::Sort { .. } => "Sort",
            LogicalPlan::Limit { .. } => "Limit",
            LogicalPlan::Aggregate { .. } => "Aggregate",
            LogicalPlan::Dedup { .. } => "Dedup",
            LogicalPlan::TopN { rare: false, .. } => "Top",
            LogicalPlan::TopN { rare: true, .. } => "Rare",
            LogicalPlan::Bin { .. } => "Bin",
            LogicalPlan::Eval { .. } => "Eval",
            LogicalPlan::Rename { .. } => "Rename",
            LogicalPlan::Replace { .. } => "Replace",
            LogicalPlan::Fillnull { .. } => "Fillnull",
            LogicalPlan::RegexExtract { .. } => "RegexExtract",
            LogicalPlan::Lookup { .. } => "Lookup",
            LogicalPlan::Append { .. } => "Append",
            LogicalPlan::Join { .. } => "Join",
            LogicalPlan::Reverse { .. } => "Reverse",
            LogicalPlan::Flatten { .. } => "Flatten",
            LogicalPlan::Window {
                mode: WindowMode::Eventstats,
                ..
            } => "Eventstats",
            LogicalPlan::Window {
                mode: WindowMode::Streamstats { .. },
                ..
            } => "Streamstats",
            LogicalPlan::Values { .. } => "Values",
            LogicalPlan::Explain { .. } => "Explain",
        }
    }

    /// One-line description: name plus bracketed attributes.
    pub fn describe(&self) -> String {
        match self {
            LogicalPlan::Scan {
                dataset, filter, ..
            } => match filter {
                Some(f) => format!("Scan [dataset={}, filter={}]", dataset, f),
                None => format!("Scan [dataset={}]", dataset),
            },
            LogicalPlan::Filter { condition, .. } => format!("Filter [{}]", condition),
            LogicalPlan::Project {
                fields, exclude, ..
            } => {
                if *exclude {
                    format!("Project [exclude: {}]", fields.join(", "))
                } else {
                    format!("Project [{}]", fields.join(", "))
                }
            }
            LogicalPlan::Sort { keys, .. } => format!(
                "Sort [{}]",
                keys.iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            LogicalPlan::Limit { count, .. } => format!("Limit [{}]", count),
            LogicalPlan::Aggregate {
                keys, aggregations, ..
            } => format!(
                "Aggregate [keys: {}; aggs: {}]",
                join(keys),
                join(aggregations)
            ),
            LogicalPlan::Dedup {
                count,
                fields,
                consecutive,
                ..
            } => format!(
                "Dedup [count={}, fields: {}, consecutive={}]",
                count,
                join(fields),
                consecutive
            ),
            LogicalPlan::TopN {
                count,
                fields,
                by,
                rare,
                ..
            } => {
                let name = if *rare { "Rare" } else { "Top" };
                if by.is_empty() {
                    format!("{} [count={}, fields: {}]", name, count, join(fields))
                } else {
                    format!(
                        "{} [count={}, fields: {}, by: {}]",
                        name,
                        count,
                        join(fields),
                        join(by)
                    )
                }
            }
            LogicalPlan::Bin {
                field, span, bins, ..
            } => match (span, bins) {
                (Some(s), _) => format!("Bin [{} span={}]", field, s),
                (None, Some(b)) => format!("Bin [{} bins={}]", field, b),
                (None, None) => format!("Bin [{} auto]", field),
            },
            LogicalPlan::Eval { assignments, .. } => format!(
                "Eval [{}]",
                assignments
                    .iter()
                    .map(|a| format!("{} = {}", a.field, a.expr))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            LogicalPlan::Rename { pairs, .. } => format!(
                "Rename [{}]",
                pairs
                    .iter()
                    .map(|(s, t)| format!("{} as {}", s, t))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            LogicalPlan::Replace {
                from, to, fields, ..
            } => format!(
                "Replace [{:?} with {:?} in {}]",
                from,
                to,
                fields.join(", ")
            ),
            LogicalPlan::Fillnull { fields, .. } => {
                if fields.is_empty() {
                    "Fillnull [all fields]".to_string()
                } else {
                    format!("Fillnull [{}]", fields.join(", "))
                }
            }
            LogicalPlan::RegexExtract {
                field, captures, ..
            } => format!("RegexExtract [field={}, captures: {}]", field, captures.join(", ")),
            LogicalPlan::Lookup {
                table, key_field, ..
            } => format!("Lookup [table={}, key={}]", table, key_field),
            LogicalPlan::Append { .. } => "Append".to_string(),
            LogicalPlan::Join {
                join_type,
                key_field,
                ..
            } => format!("Join [type={}, key={}]", join_type, key_field),
            LogicalPlan::Reverse { .. } => "Reverse".to_string(),
            LogicalPlan::Flatten { field, .. } => format!("Flatten [{}]", field),
            LogicalPlan::Window {
                mode,
                aggregations,
                by,
                ..
            } => {
                let head = match mode {
                    WindowMode::Eventstats => "Eventstats".to_string(),
                    WindowMode::Streamstats { window: 0 } => "Streamstats".to_string(),
                    WindowMode::Streamstats { window } => {
                        format!("Streamstats window={}", window)
                    }
                };
                if by.is_empty() {
                    format!("{} [aggs: {}]", head, join(aggregations))
                } else {
                    format!("{} [aggs: {}; by: {}]", head, join(aggregations), join(by))
                }
            }
            LogicalPlan::Values { rows, .. } => format!("Values [{} rows]", rows.len()),
            LogicalPlan::Explain { .. } => "Explain".to_string(),
        }
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{}{}", "  ".repeat(depth), self.describe())?;
        for child in self.children() {
            child.fmt_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}
