//! Logical plan: relational operator tree and the AST-to-plan lowering.

mod build;
mod plan;

pub use build::{plan_query, LogicalPlanner};
pub use plan::{LogicalPlan, WindowMode};
