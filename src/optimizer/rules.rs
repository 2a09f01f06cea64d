use crate::ast::{BinaryOp, Expr, LiteralValue, Position, UnaryOp};
use crate::logical::LogicalPlan;

/// One rewrite. `apply` returns the replacement subtree when the rule
/// matches at this node, `None` otherwise; it never mutates its input.
pub trait OptimizerRule {
    fn name(&self) -> &'static str;

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan>;
}

/// Filter(A) over Filter(B) becomes Filter(A AND B) over B's input. A is
/// the AND-left so evaluation order mirrors the original nesting.
pub struct FilterMerge;

impl OptimizerRule for FilterMerge {
    fn name(&self) -> &'static str {
        "FilterMerge"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Filter {
            input,
            condition: outer,
            schema,
        } = plan
        else {
            return None;
        };
        let LogicalPlan::Filter {
            input: inner_input,
            condition: inner,
            ..
        } = input.as_ref()
        else {
            return None;
        };
        Some(LogicalPlan::Filter {
            input: inner_input.clone(),
            condition: Expr::binary(
                BinaryOp::And,
                outer.clone(),
                inner.clone(),
                Position::none(),
            ),
            schema: schema.clone(),
        })
    }
}

/// Filter moves below Project when the projection preserves every field
/// the filter references, and always below Sort.
pub struct FilterPushDown;

impl OptimizerRule for FilterPushDown {
    fn name(&self) -> &'static str {
        "FilterPushDown"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Filter {
            input,
            condition,
            schema: _,
        } = plan
        else {
            return None;
        };
        match input.as_ref() {
            LogicalPlan::Project {
                input: project_input,
                fields,
                exclude,
                schema: project_schema,
            } => {
                let mut referenced = Vec::new();
                condition.referenced_fields(&mut referenced);
                if !referenced.iter().all(|f| project_schema.has_field(f)) {
                    return None;
                }
                let pushed = LogicalPlan::Filter {
                    input: project_input.clone(),
                    condition: condition.clone(),
                    schema: project_input.schema(),
                };
                Some(LogicalPlan::Project {
                    input: Box::new(pushed),
                    fields: fields.clone(),
                    exclude: *exclude,
                    schema: project_schema.clone(),
                })
            }
            // Sort does not alter row membership.
            LogicalPlan::Sort {
                input: sort_input,
                keys,
                schema: sort_schema,
            } => {
                let pushed = LogicalPlan::Filter {
                    input: sort_input.clone(),
                    condition: condition.clone(),
                    schema: sort_input.schema(),
                };
                Some(LogicalPlan::Sort {
                    input: Box::new(pushed),
                    keys: keys.clone(),
                    schema: sort_schema.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Two stacked include-projections collapse to the outer one over the
/// inner's input when the inner preserves everything the outer needs.
pub struct ProjectMerge;

impl OptimizerRule for ProjectMerge {
    fn name(&self) -> &'static str {
        "ProjectMerge"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Project {
            input,
            fields: outer_fields,
            exclude: false,
            schema,
        } = plan
        else {
            return None;
        };
        let LogicalPlan::Project {
            input: inner_input,
            fields: inner_fields,
            exclude: false,
            ..
        } = input.as_ref()
        else {
            return None;
        };
        if !outer_fields.iter().all(|f| inner_fields.contains(f)) {
            return None;
        }
        Some(LogicalPlan::Project {
            input: inner_input.clone(),
            fields: outer_fields.clone(),
            exclude: false,
            schema: schema.clone(),
        })
    }
}

/// Limit moves below Project (row-wise 1:1) and merges with an adjacent
/// Limit by taking the smaller count. It never crosses a barrier; the
/// physical planner separately caps the scan when the limit reaches it.
pub struct LimitPushDown;

impl OptimizerRule for LimitPushDown {
    fn name(&self) -> &'static str {
        "LimitPushDown"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        let LogicalPlan::Limit {
            input,
            count,
            schema,
        } = plan
        else {
            return None;
        };
        match input.as_ref() {
            LogicalPlan::Project {
                input: project_input,
                fields,
                exclude,
                schema: project_schema,
            } => {
                let pushed = LogicalPlan::Limit {
                    input: project_input.clone(),
                    count: *count,
                    schema: project_input.schema(),
                };
                Some(LogicalPlan::Project {
                    input: Box::new(pushed),
                    fields: fields.clone(),
                    exclude: *exclude,
                    schema: project_schema.clone(),
                })
            }
            LogicalPlan::Limit {
                input: inner_input,
                count: inner_count,
                ..
            } => Some(LogicalPlan::Limit {
                input: inner_input.clone(),
                count: (*count).min(*inner_count),
                schema: schema.clone(),
            }),
            _ => None,
        }
    }
}

/// Folds pure literal arithmetic and boolean NOT inside filter conditions
/// and eval assignments. Division by zero is left unfolded so the error
/// surfaces at runtime.
pub struct ConstantFolding;

impl OptimizerRule for ConstantFolding {
    fn name(&self) -> &'static str {
        "ConstantFolding"
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        match plan {
            LogicalPlan::Filter {
                input,
                condition,
                schema,
            } => {
                let (folded, changed) = fold_expr(condition);
                changed.then(|| LogicalPlan::Filter {
                    input: input.clone(),
                    condition: folded,
                    schema: schema.clone(),
                })
            }
            LogicalPlan::Eval {
                input,
                assignments,
                schema,
            } => {
                let mut changed = false;
                let folded: Vec<_> = assignments
                    .iter()
                    .map(|a| {
                        let (expr, ch) = fold_expr(&a.expr);
                        changed |= ch;
                        crate::ast::EvalAssignment {
                            field: a.field.clone(),
                            expr,
                            position: a.position,
                        }
                    })
                    .collect();
                changed.then(|| LogicalPlan::Eval {
                    input: input.clone(),
                    assignments: folded,
                    schema: schema.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Bottom-up fold; returns the (possibly unchanged) expression and
/// whether anything folded.
fn fold_expr(expr: &Expr) -> (Expr, bool) {
    match expr {
        Expr::Binary(bin) => {
            let (left, lc) = fold_expr(&bin.left);
            let (right, rc) = fold_expr(&bin.right);
            if let (Some(LiteralValue::Int(a)), Some(LiteralValue::Int(b))) =
                (left.as_literal(), right.as_literal())
            {
                let folded = match bin.op {
                    BinaryOp::Add => a.checked_add(*b),
                    BinaryOp::Sub => a.checked_sub(*b),
                    BinaryOp::Mul => a.checked_mul(*b),
                    // Zero divisors are not folded; the runtime error
                    // surfaces instead.
                    BinaryOp::Div => a.checked_div(*b),
                    BinaryOp::Mod => a.checked_rem(*b),
                    _ => None,
                };
                if let Some(value) = folded {
                    return (
                        Expr::literal(LiteralValue::Int(value), bin.position),
                        true,
                    );
                }
            }
            let changed = lc || rc;
            (
                Expr::binary(bin.op, left, right, bin.position),
                changed,
            )
        }
        Expr::Unary(un) => {
            let (operand, oc) = fold_expr(&un.operand);
            if un.op == UnaryOp::Not {
                if let Some(LiteralValue::Bool(b)) = operand.as_literal() {
                    return (
                        Expr::literal(LiteralValue::Bool(!b), un.position),
                        true,
                    );
                }
            }
            (Expr::unary(un.op, operand, un.position), oc)
        }
        _ => (expr.clone(), false),
    }
}
