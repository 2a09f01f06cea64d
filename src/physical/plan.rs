use super::fragments::ScanFragments;
use crate::ast::{
    Aggregation, EvalAssignment, Expr, FieldRef, JoinType, LiteralValue, LookupOutput, SortKey,
};
use crate::catalog::Schema;
use crate::logical::WindowMode;
use crate::row::Row;
use std::fmt;
use std::sync::Arc;

/// Where a physical operator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionLocation {
    DataNode,
    Coordinator,
}

impl fmt::Display for ExecutionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionLocation::DataNode => f.write_str("[DataNode]"),
            ExecutionLocation::Coordinator => f.write_str("[Coordinator]"),
        }
    }
}

/// Aggregation algorithm choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateAlgorithm {
    Hash,
    /// Input is known to arrive sorted on the group keys.
    Stream,
}

/// Top/rare algorithm choice; the bounded heap exists as a hint target
/// for low-cardinality keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopNAlgorithm {
    HashCount,
    BoundedHeap,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalPlan {
    Scan {
        dataset: String,
        fragments: ScanFragments,
        schema: Arc<Schema>,
    },
    Filter {
        input: Box<PhysicalPlan>,
        condition: Expr,
        schema: Arc<Schema>,
    },
    Project {
        input: Box<PhysicalPlan>,
        fields: Vec<String>,
        exclude: bool,
        schema: Arc<Schema>,
    },
    Sort {
        input: Box<PhysicalPlan>,
        keys: Vec<SortKey>,
        schema: Arc<Schema>,
    },
    Limit {
        input: Box<PhysicalPlan>,
        count: u64,
        schema: Arc<Schema>,
    },
    Aggregate {
        input: Box<PhysicalPlan>,
        keys: Vec<FieldRef>,
        aggregations: Vec<Aggregation>,
        algorithm: AggregateAlgorithm,
        schema: Arc<Schema>,
    },
    Dedup {
        input: Box<PhysicalPlan>,
        count: u64,
        fields: Vec<FieldRef>,
        consecutive: bool,
        sort_by: Vec<SortKey>,
        schema: Arc<Schema>,
    },
    TopN {
        input: Box<PhysicalPlan>,
        count: u64,
        fields: Vec<FieldRef>,
        by: Vec<FieldRef>,
        rare: bool,
        algorithm: TopNAlgorithm,
        schema: Arc<Schema>,
    },
    Bin {
        input: Box<PhysicalPlan>,
        field: FieldRef,
        span_seconds: Option<i64>,
        bins: Option<u32>,
        schema: Arc<Schema>,
    },
    Eval {
        input: Box<PhysicalPlan>,
        assignments: Vec<EvalAssignment>,
        schema: Arc<Schema>,
    },
    Rename {
        input: Box<PhysicalPlan>,
        pairs: Vec<(String, String)>,
        schema: Arc<Schema>,
    },
    Replace {
        input: Box<PhysicalPlan>,
        from: String,
        to: String,
        fields: Vec<String>,
        schema: Arc<Schema>,
    },
    Fillnull {
        input: Box<PhysicalPlan>,
        value: LiteralValue,
        fields: Vec<String>,
        schema: Arc<Schema>,
    },
    RegexExtract {
        input: Box<PhysicalPlan>,
        field: FieldRef,
        pattern: String,
        captures: Vec<String>,
        schema: Arc<Schema>,
    },
    Lookup {
        input: Box<PhysicalPlan>,
        table: String,
        key_field: FieldRef,
        outputs: Vec<LookupOutput>,
        schema: Arc<Schema>,
    },
    Append {
        input: Box<PhysicalPlan>,
        subsearch: Box<PhysicalPlan>,
        schema: Arc<Schema>,
    },
    Join {
        input: Box<PhysicalPlan>,
        subsearch: Box<PhysicalPlan>,
        join_type: JoinType,
        key_field: FieldRef,
        schema: Arc<Schema>,
    },
    Reverse {
        input: Box<PhysicalPlan>,
        schema: Arc<Schema>,
    },
    Flatten {
        input: Box<PhysicalPlan>,
        field: FieldRef,
        schema: Arc<Schema>,
    },
    Window {
        input: Box<PhysicalPlan>,
        mode: WindowMode,
        aggregations: Vec<Aggregation>,
        by: Vec<FieldRef>,
        schema: Arc<Schema>,
    },
    Values {
        rows: Vec<Row>,
        schema: Arc<Schema>,
    },
}

impl PhysicalPlan {
    pub fn schema(&self) -> Arc<Schema> {
        match self {
            PhysicalPlan::Scan { schema, .. }
            | PhysicalPlan::Filter { schema, .. }
            | PhysicalPlan::Project { schema, .. }
            | PhysicalPlan::Sort { schema, .. }
            | PhysicalPlan::Limit { schema, .. }
            | PhysicalPlan::Aggregate { schema, .. }
            | PhysicalPlan::Dedup { schema, .. }
            | PhysicalPlan::TopN { schema, .. }
            | PhysicalPlan::Bin { schema, .. }
            | PhysicalPlan::Eval { schema, .. }
            | PhysicalPlan::Rename { schema, .. }
            | PhysicalPlan::Replace { schema, .. }
            | PhysicalPlan::Fillnull { schema, .. }
            | PhysicalPlan::RegexExtract { schema, .. }
            | PhysicalPlan::Lookup { schema, .. }
            | PhysicalPlan::Append { schema, .. }
            | PhysicalPlan::Join { schema, .. }
            | PhysicalPlan::Reverse { schema, .. }
            | PhysicalPlan::Flatten { schema, .. }
            | PhysicalPlan::Window { schema, .. }
            | PhysicalPlan::Values { schema, .. } => schema.clone(),
        }
    }

    pub fn children(&self) -> Vec<&PhysicalPlan> {
        match self {
            PhysicalPlan::Scan { .. } | PhysicalPlan::Values { .. } => vec![],
            PhysicalPlan::Append {
                input, subsearch, ..
            }
            | PhysicalPlan::Join {
                input, subsearch, ..
            } => vec![input, subsearch],
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Project { input, .. }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. }
            | PhysicalPlan::Aggregate { input, .. }
            | PhysicalPlan::Dedup { input, .. }
            | PhysicalPlan::TopN { input, .. }
            | PhysicalPlan::Bin { input, .. }
            | PhysicalPlan::Eval { input, .. }
            | PhysicalPlan::Rename { input, .. }
            | PhysicalPlan::Replace { input, .. }
            | PhysicalPlan::Fillnull { input, .. }
            | PhysicalPlan::RegexExtract { input, .. }
            | PhysicalPlan::Lookup { input, .. }
            | PhysicalPlan::Reverse { input, .. }
            | PhysicalPlan::Flatten { input, .. }
            | PhysicalPlan::Window { input, .. } => vec![input],
        }
    }

    pub fn location(&self) -> ExecutionLocation {
        match self {
            PhysicalPlan::Scan { .. } => ExecutionLocation::DataNode,
            _ => ExecutionLocation::Coordinator,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhysicalPlan::Scan { .. } => "PhysicalScan",
            PhysicalPlan::Filter { .. } => "PhysicalFilter",
            PhysicalPlan::Project { .. } => "PhysicalProject",
            PhysicalPlan::Sort { .. } => "PhysicalSort",
            PhysicalPlan::Limit { .. } => "PhysicalLimit",
            PhysicalPlan::Aggregate { .. } => "PhysicalAggregate",
            PhysicalPlan::Dedup { .. } => "PhysicalDedup",
            PhysicalPlan::TopN { rare: false, .. } => "PhysicalTop",
            PhysicalPlan::TopN { rare: true, .. } => "PhysicalRare",
            PhysicalPlan::Bin { .. } => "PhysicalBin",
            PhysicalPlan::Eval { .. } => "PhysicalEval",
            PhysicalPlan::Rename { .. } => "PhysicalRename",
            PhysicalPlan::Replace { .. } => "PhysicalReplace",
            PhysicalPlan::Fillnull { .. } => "PhysicalFillnull",
            PhysicalPlan::RegexExtract { .. } => "PhysicalRegexExtract",
            PhysicalPlan::Lookup { .. } => "PhysicalLookup",
            PhysicalPlan::Append { .. } => "PhysicalAppend",
            PhysicalPlan::Join { .. } => "PhysicalJoin",
            PhysicalPlan::Reverse { .. } => "PhysicalReverse",
            PhysicalPlan::Flatten { .. } => "PhysicalFlatten",
            PhysicalPlan::Window {
                mode: WindowMode::Eventstats,
                ..
            } => "PhysicalEventstats",
            PhysicalPlan::Window {
                mode: WindowMode::Streamstats { .. },
                ..
            } => "PhysicalStreamstats",
            PhysicalPlan::Values { .. } => "PhysicalValues",
        }
    }

    /// One-line rendering: name, bracketed attributes, location.
    pub fn describe(&self) -> String {
        let attrs = match self {
            PhysicalPlan::Scan {
                dataset, fragments, ..
            } => {
                let mut parts = vec![format!("dataset={}", dataset)];
                if let Some(filter) = &fragments.filter {
                    parts.push(format!("filter={}", filter));
                }
                if let Some(projection) = &fragments.projection {
                    parts.push(format!("projection={}", projection.join(", ")));
                }
                if let Some(sort) = &fragments.sort {
                    let keys: Vec<String> = sort
                        .iter()
                        .map(|k| {
                            if k.descending {
                                format!("-{}", k.field)
                            } else {
                                k.field.clone()
                            }
                        })
                        .collect();
                    parts.push(format!("sort={}", keys.join(", ")));
                }
                if let Some(limit) = fragments.limit {
                    parts.push(format!("limit={}", limit));
                }
                if !fragments.computed.is_empty() {
                    let fields: Vec<String> = fragments
                        .computed
                        .iter()
                        .map(|c| format!("{} = {}", c.field, c.expr))
                        .collect();
                    parts.push(format!("computed={}", fields.join(", ")));
                }
                parts.join(", ")
            }
            PhysicalPlan::Filter { condition, .. } => condition.to_string(),
            PhysicalPlan::Project {
                fields, exclude, ..
            } => {
                if *exclude {
                    format!("exclude: {}", fields.join(", "))
                } else {
                    fields.join(", ")
                }
            }
            PhysicalPlan::Sort { keys, .. } => keys
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            PhysicalPlan::Limit { count, .. } => count.to_string(),
            PhysicalPlan::Aggregate {
                keys,
                aggregations,
                algorithm,
                ..
            } => format!(
                "keys: {}; aggs: {}; {:?}",
                join_display(keys),
                join_display(aggregations),
                algorithm
            ),
            PhysicalPlan::Dedup {
                count,
                fields,
                consecutive,
                ..
            } => format!(
                "count={}, fields: {}, consecutive={}",
                count,
                join_display(fields),
                consecutive
            ),
            PhysicalPlan::TopN {
                count, fields, by, ..
            } => {
                if by.is_empty() {
                    format!("count={}, fields: {}", count, join_display(fields))
                } else {
                    format!(
                        "count={}, fields: {}, by: {}",
                        count,
                        join_display(fields),
                        join_display(by)
                    )
                }
            }
            PhysicalPlan::Bin {
                field,
                span_seconds,
                bins,
                ..
            } => match (span_seconds, bins) {
                (Some(s), _) => format!("{} span={}s", field, s),
                (None, Some(b)) => format!("{} bins={}", field, b),
                (None, None) => format!("{} auto", field),
            },
            PhysicalPlan::Eval { assignments, .. } => assignments
                .iter()
                .map(|a| format!("{} = {}", a.field, a.expr))
                .collect::<Vec<_>>()
                .join(", "),
            PhysicalPlan::Rename { pairs, .. } => pairs
                .iter()
                .map(|(s, t)| format!("{} as {}", s, t))
                .collect::<Vec<_>>()
                .join(", "),
            PhysicalPlan::Replace {
                from, to, fields, ..
            } => format!("{:?} with {:?} in {}", from, to, fields.join(", ")),
            PhysicalPlan::Fillnull { fields, .. } => {
                if fields.is_empty() {
                    "all fields".to_string()
                } else {
                    fields.join(", ")
                }
            }
            PhysicalPlan::RegexExtract {
                field, captures, ..
            } => format!("field={}, captures: {}", field, captures.join(", ")),
            PhysicalPlan::Lookup {
                table, key_field, ..
            } => format!("table={}, key={}", table, key_field),
            PhysicalPlan::Append { .. } => String::new(),
            PhysicalPlan::Join {
                join_type,
                key_field,
                ..
            } => format!("type={}, key={}", join_type, key_field),
            PhysicalPlan::Reverse { .. } => String::new(),
            PhysicalPlan::Flatten { field, .. } => field.to_string(),
            PhysicalPlan::Window {
                mode,
                aggregations,
                by,
                ..
            } => {
                let mut parts = Vec::new();
                if let WindowMode::Streamstats { window } = mode {
                    if *window > 0 {
                        parts.push(format!("window={}", window));
                    }
                }
                parts.push(format!("aggs: {}", join_display(aggregations)));
                if !by.is_empty() {
                    parts.push(format!("by: {}", join_display(by)));
                }
                parts.join(", ")
            }
            PhysicalPlan::Values { rows, .. } => format!("{} rows", rows.len()),
        };
        if attrs.is_empty() {
            format!("{} {}", self.name(), self.location())
        } else {
            format!("{} [{}] {}", self.name(), attrs, self.location())
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

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_tree(f, 0)
    }
}
