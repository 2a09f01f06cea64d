//! Lowers the optimized logical plan to physical operators and decides
//! what each scan pushes down to the backend.
//!
//! Absorption happens while an operator sits directly on a scan: filters,
//! plain-field projections and sorts, limits and function-bearing eval
//! assignments fold into the scan's fragments. Barrier operators
//! (aggregate, dedup, top/rare, join, append, reverse, flatten,
//! eventstats, streamstats) are never absorbed, so everything above them
//! runs on the coordinator.

use super::fragments::{ComputedField, FragmentSortKey, ScanFragments};
use super::plan::{AggregateAlgorithm, PhysicalPlan, TopNAlgorithm};
use crate::ast::{BinaryOp, Expr, FieldRef, SortKey};
use crate::catalog::Schema;
use crate::error::Result;
use crate::functions::{self, Purity};
use crate::logical::LogicalPlan;
use std::sync::Arc;
use tracing::debug;

pub struct PhysicalPlanner {
    enable_push_down: bool,
}

impl PhysicalPlanner {
    pub fn new(enable_push_down: bool) -> Self {
        Self { enable_push_down }
    }

    pub fn plan(&self, logical: &LogicalPlan) -> Result<PhysicalPlan> {
        // The explain wrapper is a meta-request handled by the engine; the
        // physical tree is the plan for the wrapped query.
        let logical = match logical {
            LogicalPlan::Explain { input, .. } => input.as_ref(),
            other => other,
        };
        let physical = self.lower(logical)?;
        debug!(plan = %physical, "physical plan built");
        Ok(physical)
    }

    fn lower(&self, logical: &LogicalPlan) -> Result<PhysicalPlan> {
        Ok(match logical {
            LogicalPlan::Scan {
                dataset,
                filter,
                schema,
            } => {
                let mut fragments = ScanFragments::default();
                let scan = |fragments: ScanFragments| PhysicalPlan::Scan {
                    dataset: dataset.clone(),
                    fragments,
                    schema: schema.clone(),
                };
                match filter {
                    Some(condition) if self.enable_push_down && is_pushable_filter(condition) => {
                        fragments.and_filter(condition.clone());
                        scan(fragments)
                    }
                    Some(condition) => PhysicalPlan::Filter {
                        input: Box::new(scan(fragments)),
                        condition: condition.clone(),
                        schema: schema.clone(),
                    },
                    None => scan(fragments),
                }
            }
            LogicalPlan::Filter {
                input,
                condition,
                schema,
            } => {
                let child = self.lower(input)?;
                match self.absorb_filter(child, condition) {
                    Ok(scan) => scan,
                    Err(child) => PhysicalPlan::Filter {
                        input: Box::new(child),
                        condition: condition.clone(),
                        schema: schema.clone(),
                    },
                }
            }
            LogicalPlan::Project {
                input,
                fields,
                exclude,
                schema,
            } => {
                let child = self.lower(input)?;
                match self.absorb_projection(child, schema) {
                    Ok(scan) => scan,
                    Err(child) => PhysicalPlan::Project {
                        input: Box::new(child),
                        fields: fields.clone(),
                        exclude: *exclude,
                        schema: schema.clone(),
                    },
                }
            }
            LogicalPlan::Sort { input, keys, schema } => {
                let child = self.lower(input)?;
                match self.absorb_sort(child, keys) {
                    Ok(scan) => scan,
                    Err(child) => PhysicalPlan::Sort {
                        input: Box::new(child),
                        keys: keys.clone(),
                        schema: schema.clone(),
                    },
                }
            }
            LogicalPlan::Limit {
                input,
                count,
                schema,
            } => {
                let child = self.lower(input)?;
                match self.absorb_limit(child, *count) {
                    Ok(scan) => scan,
                    Err(child) => PhysicalPlan::Limit {
                        input: Box::new(child),
                        count: *count,
                        schema: schema.clone(),
                    },
                }
            }
            LogicalPlan::Eval {
                input,
                assignments,
                schema,
            } => {
                let child = self.lower(input)?;
                self.lower_eval(child, assignments, schema)
            }
            LogicalPlan::Aggregate {
                input,
                keys,
                aggregations,
                schema,
            } => {
                let child = self.lower(input)?;
                let algorithm = if sorted_on_keys(&child, keys) {
                    AggregateAlgorithm::Stream
                } else {
                    AggregateAlgorithm::Hash
                };
                PhysicalPlan::Aggregate {
                    input: Box::new(child),
                    keys: keys.clone(),
                    aggregations: aggregations.clone(),
                    algorithm,
                    schema: schema.clone(),
                }
            }
            LogicalPlan::Dedup {
                input,
                count,
                fields,
                consecutive,
                sort_by,
                schema,
            } => PhysicalPlan::Dedup {
                input: Box::new(self.lower(input)?),
                count: *count,
                fields: fields.clone(),
                consecutive: *consecutive,
                sort_by: sort_by.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::TopN {
                input,
                count,
                fields,
                by,
                rare,
                schema,
            } => PhysicalPlan::TopN {
                input: Box::new(self.lower(input)?),
                count: *count,
                fields: fields.clone(),
                by: by.clone(),
                rare: *rare,
                algorithm: TopNAlgorithm::HashCount,
                schema: schema.clone(),
            },
            LogicalPlan::Bin {
                input,
                field,
                span,
                bins,
                schema,
            } => PhysicalPlan::Bin {
                input: Box::new(self.lower(input)?),
                field: field.clone(),
                span_seconds: span.map(|s| s.as_seconds()),
                bins: *bins,
                schema: schema.clone(),
            },
            LogicalPlan::Rename {
                input,
                pairs,
                schema,
            } => PhysicalPlan::Rename {
                input: Box::new(self.lower(input)?),
                pairs: pairs.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Replace {
                input,
                from,
                to,
                fields,
                schema,
            } => PhysicalPlan::Replace {
                input: Box::new(self.lower(input)?),
                from: from.clone(),
                to: to.clone(),
                fields: fields.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Fillnull {
                input,
                value,
                fields,
                schema,
            } => PhysicalPlan::Fillnull {
                input: Box::new(self.lower(input)?),
                value: value.clone(),
                fields: fields.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::RegexExtract {
                input,
                field,
                pattern,
                captures,
                schema,
            } => PhysicalPlan::RegexExtract {
                input: Box::new(self.lower(input)?),
                field: field.clone(),
                pattern: pattern.clone(),
                captures: captures.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Lookup {
                input,
                table,
                key_field,
                outputs,
                schema,
            } => PhysicalPlan::Lookup {
                input: Box::new(self.lower(input)?),
                table: table.clone(),
                key_field: key_field.clone(),
                outputs: outputs.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Append {
                input,
                subsearch,
                schema,
            } => PhysicalPlan::Append {
                input: Box::new(self.lower(input)?),
                subsearch: Box::new(self.lower(subsearch)?),
                schema: schema.clone(),
            },
            LogicalPlan::Join {
                input,
                subsearch,
                join_type,
                key_field,
                schema,
            } => PhysicalPlan::Join {
                input: Box::new(self.lower(input)?),
                subsearch: Box::new(self.lower(subsearch)?),
                join_type: *join_type,
                key_field: key_field.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Reverse { input, schema } => PhysicalPlan::Reverse {
                input: Box::new(self.lower(input)?),
                schema: schema.clone(),
            },
            LogicalPlan::Flatten {
                input,
                field,
                schema,
            } => PhysicalPlan::Flatten {
                input: Box::new(self.lower(input)?),
                field: field.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Window {
                input,
                mode,
                aggregations,
                by,
                schema,
            } => PhysicalPlan::Window {
                input: Box::new(self.lower(input)?),
                mode: mode.clone(),
                aggregations: aggregations.clone(),
                by: by.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Values { rows, schema } => PhysicalPlan::Values {
                rows: rows.clone(),
                schema: schema.clone(),
            },
            LogicalPlan::Explain { input, .. } => self.lower(input)?,
        })
    }

    /// Absorbs a filter into a bare scan. Returns the updated scan, or
    /// gives the child back when it cannot absorb.
    fn absorb_filter(
        &self,
        child: PhysicalPlan,
        condition: &Expr,
    ) -> std::result::Result<PhysicalPlan, PhysicalPlan> {
        if !self.enable_push_down || !is_pushable_filter(condition) {
            return Err(child);
        }
        match child {
            PhysicalPlan::Scan {
                dataset,
                mut fragments,
                schema,
                // A limit fragment caps rows before the coordinator sees
                // them; filtering after the cap is not the same query.
            } if fragments.limit.is_none() => {
                fragments.and_filter(condition.clone());
                Ok(PhysicalPlan::Scan {
                    dataset,
                    fragments,
                    schema,
                })
            }
            other => Err(other),
        }
    }

    fn absorb_projection(
        &self,
        child: PhysicalPlan,
        project_schema: &Arc<Schema>,
    ) -> std::result::Result<PhysicalPlan, PhysicalPlan> {
        if !self.enable_push_down {
            return Err(child);
        }
        match child {
            PhysicalPlan::Scan {
                dataset,
                mut fragments,
                ..
            } => {
                fragments.intersect_projection(project_schema.field_names());
                Ok(PhysicalPlan::Scan {
                    dataset,
                    fragments,
                    // The scan's schema is its output after fragments.
                    schema: project_schema.clone(),
                })
            }
            other => Err(other),
        }
    }

    fn absorb_sort(
        &self,
        child: PhysicalPlan,
        keys: &[SortKey],
    ) -> std::result::Result<PhysicalPlan, PhysicalPlan> {
        if !self.enable_push_down {
            return Err(child);
        }
        let Some(fragment_keys) = keys
            .iter()
            .map(|k| {
                k.expr.as_field().map(|f| FragmentSortKey {
                    field: f.name.clone(),
                    descending: k.descending,
                })
            })
            .collect::<Option<Vec<_>>>()
        else {
            return Err(child);
        };
        match child {
            PhysicalPlan::Scan {
                dataset,
                mut fragments,
                schema,
                // Sorting after a row cap would pick different rows than
                // the backend's sort-then-cap.
            } if fragments.limit.is_none() => {
                fragments.sort = Some(fragment_keys);
                Ok(PhysicalPlan::Scan {
                    dataset,
                    fragments,
                    schema,
                })
            }
            other => Err(other),
        }
    }

    fn absorb_limit(
        &self,
        child: PhysicalPlan,
        count: u64,
    ) -> std::result::Result<PhysicalPlan, PhysicalPlan> {
        // The limit fragment is non-zero; a zero limit stays on the
        // coordinator and never touches the backend.
        if !self.enable_push_down || count == 0 {
            return Err(child);
        }
        match child {
            PhysicalPlan::Scan {
                dataset,
                mut fragments,
                schema,
            } => {
                fragments.cap_limit(count);
                Ok(PhysicalPlan::Scan {
                    dataset,
                    fragments,
                    schema,
                })
            }
            other => Err(other),
        }
    }

    /// Splits eval assignments between computed-field fragments and a
    /// coordinator eval. An assignment pushes when its expression
    /// contains a function call and every field it reads is visible to
    /// the backend.
    fn lower_eval(
        &self,
        child: PhysicalPlan,
        assignments: &[crate::ast::EvalAssignment],
        schema: &Arc<Schema>,
    ) -> PhysicalPlan {
        let can_absorb = self.enable_push_down
            && matches!(child, PhysicalPlan::Scan { .. });
        if !can_absorb {
            return PhysicalPlan::Eval {
                input: Box::new(child),
                assignments: assignments.to_vec(),
                schema: schema.clone(),
            };
        }
        let PhysicalPlan::Scan {
            dataset,
            mut fragments,
            schema: scan_schema,
        } = child
        else {
            unreachable!()
        };

        let mut coordinator_fields: Vec<String> = Vec::new();
        let mut pushed: Vec<ComputedField> = Vec::new();
        let mut kept: Vec<crate::ast::EvalAssignment> = Vec::new();
        for assignment in assignments {
            let mut reads = Vec::new();
            assignment.expr.referenced_fields(&mut reads);
            let reads_coordinator_field =
                reads.iter().any(|r| coordinator_fields.contains(r));
            if assignment.expr.contains_call() && !reads_coordinator_field {
                pushed.push(ComputedField {
                    field: assignment.field.clone(),
                    expr: assignment.expr.clone(),
                });
            } else {
                coordinator_fields.push(assignment.field.clone());
                kept.push(assignment.clone());
            }
        }

        // Scan output schema grows by the pushed computed fields.
        let scan_schema = if pushed.is_empty() {
            scan_schema
        } else {
            let mut grown = (*scan_schema).clone();
            for computed in &pushed {
                if let Some(kind) = schema.field_kind(&computed.field) {
                    grown.set_field(computed.field.clone(), kind);
                }
            }
            Arc::new(grown)
        };
        fragments.computed.extend(pushed);

        let scan = PhysicalPlan::Scan {
            dataset,
            fragments,
            schema: scan_schema,
        };
        if kept.is_empty() {
            scan
        } else {
            PhysicalPlan::Eval {
                input: Box::new(scan),
                assignments: kept,
                schema: schema.clone(),
            }
        }
    }
}

/// A condition pushes down when it is built from field references,
/// literals and the simple operator set, or is a comparison whose left
/// side is a registered scalar function call (shipped as a backend UDF).
pub fn is_pushable_filter(expr: &Expr) -> bool {
    if is_simple_expr(expr) {
        return true;
    }
    if let Expr::Binary(bin) = expr {
        if bin.op.is_comparison() {
            if let Expr::Call(call) = bin.left.as_ref() {
                let registered_scalar = functions::get_function(&call.name)
                    .map(|d| matches!(d.purity, Purity::PureScalar | Purity::Relevance))
                    .unwrap_or(false);
                return registered_scalar
                    && call.args.iter().all(is_simple_expr)
                    && is_simple_expr(&bin.right);
            }
        }
    }
    false
}

fn is_simple_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Field(_) | Expr::Literal(_) => true,
        Expr::List(l) => l.items.iter().all(is_simple_expr),
        Expr::Unary(u) => u.op == crate::ast::UnaryOp::Not && is_simple_expr(&u.operand),
        Expr::Binary(b) => {
            matches!(
                b.op,
                BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge
                    | BinaryOp::Like
                    | BinaryOp::In
                    | BinaryOp::And
                    | BinaryOp::Or
            ) && is_simple_expr(&b.left)
                && is_simple_expr(&b.right)
        }
        Expr::Call(_) | Expr::Case(_) => false,
    }
}

/// True when the input is known to deliver rows sorted such that equal
/// group keys arrive adjacent. Row-wise operators preserve their input's
/// order.
fn sorted_on_keys(plan: &PhysicalPlan, keys: &[FieldRef]) -> bool {
    if keys.is_empty() {
        return false;
    }
    let Some(sorted) = delivered_sort_fields(plan) else {
        return false;
    };
    if sorted.len() < keys.len() {
        return false;
    }
    let prefix = &sorted[..keys.len()];
    keys.iter().all(|k| prefix.contains(&k.name))
}

fn delivered_sort_fields(plan: &PhysicalPlan) -> Option<Vec<String>> {
    match plan {
        PhysicalPlan::Sort { keys, .. } => keys
            .iter()
            .map(|k| k.expr.as_field().map(|f| f.name.clone()))
            .collect(),
        PhysicalPlan::Scan { fragments, .. } => fragments
            .sort
            .as_ref()
            .map(|keys| keys.iter().map(|k| k.field.clone()).collect()),
        // Only operators that neither reorder rows nor rewrite existing
        // field values pass the ordering through.
        PhysicalPlan::Filter { input, .. }
        | PhysicalPlan::Limit { input, .. }
        | PhysicalPlan::RegexExtract { input, .. }
        | PhysicalPlan::Lookup { input, .. }
        | PhysicalPlan::Project { input, .. } => delivered_sort_fields(input),
        _ => None,
    }
}
