//! Physical plan: operator tree with execution locations, push-down
//! fragments, and the planner that assigns them.

pub mod fragments;
mod plan;
mod planner;

pub use fragments::{decode_expr, encode_expr, ComputedField, FragmentSortKey, ScanFragments};
pub use plan::{AggregateAlgorithm, ExecutionLocation, PhysicalPlan, TopNAlgorithm};
pub use planner::{is_pushable_filter, PhysicalPlanner};
