//! Heuristic logical-plan optimizer.
//!
//! A fixed-point rule engine: each round applies every registered rule
//! once, top-down. A rule that matches a node replaces the subtree;
//! otherwise the engine descends and rebuilds the parent when any child
//! changed. Rounds repeat until a full pass changes nothing or the round
//! cap is hit. Optimization never fails; a rule that cannot apply cleanly
//! simply leaves the plan unchanged.

mod rules;

pub use rules::{
    ConstantFolding, FilterMerge, FilterPushDown, LimitPushDown, OptimizerRule, ProjectMerge,
};

use crate::logical::LogicalPlan;
use tracing::{debug, trace};

pub const DEFAULT_MAX_ROUNDS: usize = 10;

pub struct Optimizer {
    rules: Vec<Box<dyn OptimizerRule + Send + Sync>>,
    max_rounds: usize,
}

impl Optimizer {
    /// Rule set for the given optimization level: 0 disables everything,
    /// 1 runs merge-and-fold, 2 adds the reordering rules.
    pub fn for_level(level: u8, max_rounds: usize) -> Self {
        let mut rules: Vec<Box<dyn OptimizerRule + Send + Sync>> = Vec::new();
        if level >= 1 {
            rules.push(Box::new(FilterMerge));
        }
        if level >= 2 {
            rules.push(Box::new(FilterPushDown));
            rules.push(Box::new(ProjectMerge));
            rules.push(Box::new(LimitPushDown));
        }
        if level >= 1 {
            rules.push(Box::new(ConstantFolding));
        }
        Self { rules, max_rounds }
    }

    pub fn new() -> Self {
        Self::for_level(2, DEFAULT_MAX_ROUNDS)
    }

    pub fn optimize(&self, plan: LogicalPlan) -> LogicalPlan {
        // The explain wrapper stays at the root; optimize what it carries.
        if let LogicalPlan::Explain { input, schema } = plan {
            let inner = self.optimize(*input);
            return LogicalPlan::Explain {
                input: Box::new(inner),
                schema,
            };
        }

        let mut current = plan;
        for round in 0..self.max_rounds {
            let mut round_changed = false;
            for rule in &self.rules {
                let (next, changed) = apply_top_down(rule.as_ref(), &current);
                if changed {
                    trace!(rule = rule.name(), round, "rule rewrote plan");
                    current = next;
                    round_changed = true;
                }
            }
            if !round_changed {
                debug!(rounds = round + 1, "optimizer reached fixpoint");
                return current;
            }
        }
        debug!(rounds = self.max_rounds, "optimizer hit round cap");
        current
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies a rule at this node, or failing that, to the children; a
/// parent with any changed child is rebuilt.
fn apply_top_down(rule: &dyn OptimizerRule, plan: &LogicalPlan) -> (LogicalPlan, bool) {
    if let Some(rewritten) = rule.apply(plan) {
        return (rewritten, true);
    }
    let children = plan.children();
    if children.is_empty() {
        return (plan.clone(), false);
    }
    let mut changed = false;
    let new_children: Vec<LogicalPlan> = children
        .into_iter()
        .map(|child| {
            let (next, child_changed) = apply_top_down(rule, child);
            changed |= child_changed;
            next
        })
        .collect();
    if changed {
        (plan.with_children(new_children), true)
    } else {
        (plan.clone(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::catalog::{DatasetCatalog, FieldKind, MemoryCatalog, Schema};
    use crate::logical::plan_query;

    fn pos() -> Position {
        Position::none()
    }

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.register(
            "logs",
            Schema::from_fields([
                ("host", FieldKind::String),
                ("status", FieldKind::Int),
                ("latency", FieldKind::Double),
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

    fn where_cmd(field: &str, value: i64) -> Command {
        Command::Where(WhereCommand {
            condition: Expr::binary(
                BinaryOp::Eq,
                Expr::field(field, pos()),
                Expr::int(value),
                pos(),
            ),
            position: pos(),
        })
    }

    #[test]
    fn test_filter_merge_joins_with_and() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![search(), where_cmd("status", 200), where_cmd("status", 300)]),
        )
        .unwrap();
        let optimized = Optimizer::new().optimize(plan);
        match &optimized {
            LogicalPlan::Filter {
                input, condition, ..
            } => {
                assert!(matches!(input.as_ref(), LogicalPlan::Scan { .. }));
                // Outer condition is the AND-left.
                assert_eq!(
                    condition.to_string(),
                    "((status = 300) AND (status = 200))"
                );
            }
            other => panic!("expected merged Filter, got {}", other.name()),
        }
    }

    #[test]
    fn test_filter_merge_idempotent() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![search(), where_cmd("status", 200), where_cmd("status", 300)]),
        )
        .unwrap();
        let optimizer = Optimizer::new();
        let once = optimizer.optimize(plan);
        let twice = optimizer.optimize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_optimizer_fixpoint_is_noop() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                where_cmd("status", 200),
                Command::Fields(FieldsCommand {
                    exclude: false,
                    fields: vec![FieldRef::new("host", pos()), FieldRef::new("status", pos())],
                    position: pos(),
                }),
                Command::Head(HeadCommand {
                    count: 10,
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        let optimizer = Optimizer::new();
        let once = optimizer.optimize(plan);
        assert_eq!(once, optimizer.optimize(once.clone()));
    }

    #[test]
    fn test_filter_pushes_below_project() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Fields(FieldsCommand {
                    exclude: false,
                    fields: vec![FieldRef::new("host", pos()), FieldRef::new("status", pos())],
                    position: pos(),
                }),
                where_cmd("status", 200),
            ]),
        )
        .unwrap();
        let optimized = Optimizer::new().optimize(plan);
        match &optimized {
            LogicalPlan::Project { input, .. } => {
                assert!(matches!(input.as_ref(), LogicalPlan::Filter { .. }));
            }
            other => panic!("expected Project over Filter, got {}", other.name()),
        }
    }

    #[test]
    fn test_filter_stays_above_narrowing_project() {
        // The filter references a field the projection drops.
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Fields(FieldsCommand {
                    exclude: false,
                    fields: vec![FieldRef::new("status", pos())],
                    position: pos(),
                }),
                where_cmd("status", 200),
            ]),
        )
        .unwrap();
        // References only preserved fields, so it still pushes; now drop
        // the referenced field instead.
        let optimized = Optimizer::new().optimize(plan);
        assert!(matches!(optimized, LogicalPlan::Project { .. }));

        let plan2 = {
            use crate::logical::LogicalPlan as LP;
            let scan_schema = c.dataset_schema("logs").unwrap();
            let scan = LP::Scan {
                dataset: "logs".into(),
                filter: None,
                schema: scan_schema.clone(),
            };
            let project_schema =
                std::sync::Arc::new(scan_schema.project(&["host".to_string()]));
            let project = LP::Project {
                input: Box::new(scan),
                fields: vec!["host".into()],
                exclude: false,
                schema: project_schema.clone(),
            };
            LP::Filter {
                input: Box::new(project),
                condition: Expr::binary(
                    BinaryOp::Eq,
                    Expr::field("status", pos()),
                    Expr::int(200),
                    pos(),
                ),
                schema: project_schema,
            }
        };
        let optimized2 = Optimizer::new().optimize(plan2.clone());
        // No rule applies; the filter cannot cross a projection that
        // drops `status`.
        assert_eq!(optimized2, plan2);
    }

    #[test]
    fn test_limit_pushes_below_project_but_not_past_sort() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Sort(SortCommand {
                    keys: vec![SortKey {
                        expr: Expr::field("status", pos()),
                        descending: false,
                        position: pos(),
                    }],
                    position: pos(),
                }),
                Command::Head(HeadCommand {
                    count: 5,
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        let optimized = Optimizer::new().optimize(plan);
        // Limit must stay above Sort.
        assert!(matches!(optimized, LogicalPlan::Limit { .. }));
    }

    #[test]
    fn test_limit_never_crosses_barriers() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Stats(StatsCommand {
                    aggregations: vec![Aggregation {
                        func: "count".into(),
                        args: vec![],
                        distinct: false,
                        alias: None,
                        position: pos(),
                    }],
                    by: vec![FieldRef::new("host", pos())],
                    position: pos(),
                }),
                Command::Head(HeadCommand {
                    count: 3,
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        let optimized = Optimizer::new().optimize(plan);
        match &optimized {
            LogicalPlan::Limit { input, .. } => {
                assert!(matches!(input.as_ref(), LogicalPlan::Aggregate { .. }));
            }
            other => panic!("expected Limit over Aggregate, got {}", other.name()),
        }
    }

    #[test]
    fn test_adjacent_limits_take_min() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Head(HeadCommand {
                    count: 10,
                    position: pos(),
                }),
                Command::Head(HeadCommand {
                    count: 3,
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        let optimized = Optimizer::new().optimize(plan);
        assert!(matches!(optimized, LogicalPlan::Limit { count: 3, .. }));
    }

    #[test]
    fn test_constant_folding_in_eval() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Eval(EvalCommand {
                    assignments: vec![EvalAssignment {
                        field: "x".into(),
                        expr: Expr::binary(
                            BinaryOp::Add,
                            Expr::int(2),
                            Expr::int(3),
                            pos(),
                        ),
                        position: pos(),
                    }],
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        let optimized = Optimizer::new().optimize(plan);
        match &optimized {
            LogicalPlan::Eval { assignments, .. } => {
                assert_eq!(
                    assignments[0].expr.as_literal(),
                    Some(&LiteralValue::Int(5))
                );
            }
            other => panic!("expected Eval, got {}", other.name()),
        }
    }

    #[test]
    fn test_division_by_zero_survives_optimization() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                Command::Eval(EvalCommand {
                    assignments: vec![EvalAssignment {
                        field: "x".into(),
                        expr: Expr::binary(
                            BinaryOp::Div,
                            Expr::int(10),
                            Expr::int(0),
                            pos(),
                        ),
                        position: pos(),
                    }],
                    position: pos(),
                }),
            ]),
        )
        .unwrap();
        let optimized = Optimizer::new().optimize(plan);
        match &optimized {
            LogicalPlan::Eval { assignments, .. } => {
                assert!(matches!(assignments[0].expr, Expr::Binary(_)));
            }
            other => panic!("expected Eval, got {}", other.name()),
        }
    }

    #[test]
    fn test_level_zero_is_identity() {
        let c = catalog();
        let plan = plan_query(
            &c,
            &Query::new(vec![
                search(),
                where_cmd("status", 200),
                where_cmd("status", 300),
            ]),
        )
        .unwrap();
        let optimizer = Optimizer::for_level(0, DEFAULT_MAX_ROUNDS);
        assert_eq!(optimizer.optimize(plan.clone()), plan);
    }
}
