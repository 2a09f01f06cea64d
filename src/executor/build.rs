//! Builds the operator tree for a physical plan and drives it to
//! completion.

use super::{
    AggregateOp, AppendOp, BinOp, DedupOp, EvalOp, ExecContext, FillnullOp, FilterOp, FlattenOp,
    JoinOp, LimitOp, LookupOp, Operator, ProjectOp, RegexExtractOp, RenameOp, ReplaceOp,
    ReverseOp, ScanOp, SortOp, TopNOp, ValuesOp, WindowOp,
};
use crate::datasource::DataSource;
use crate::error::Result;
use crate::lookup::LookupRegistry;
use crate::physical::PhysicalPlan;
use crate::row::Row;
use std::sync::Arc;

/// Shared collaborators injected into the operator tree.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub source: Arc<dyn DataSource>,
    pub lookups: Arc<LookupRegistry>,
    /// Rows per page when the scan talks to the backend.
    pub scan_batch_size: u64,
}

/// Recursively instantiates operators for a physical plan.
pub fn build_operator(plan: &PhysicalPlan, deps: &ExecutorDeps) -> Box<dyn Operator> {
    match plan {
        PhysicalPlan::Scan {
            dataset, fragments, ..
        } => Box::new(ScanOp::new(
            deps.source.clone(),
            dataset.clone(),
            fragments,
            deps.scan_batch_size,
        )),
        PhysicalPlan::Values { rows, .. } => Box::new(ValuesOp::new(rows.clone())),
        PhysicalPlan::Filter {
            input, condition, ..
        } => Box::new(FilterOp::new(
            build_operator(input, deps),
            condition.clone(),
        )),
        PhysicalPlan::Project {
            input,
            fields,
            exclude,
            ..
        } => Box::new(ProjectOp::new(
            build_operator(input, deps),
            fields.clone(),
            *exclude,
        )),
        PhysicalPlan::Sort {
            input,
            keys,
            schema,
        } => Box::new(SortOp::new(
            build_operator(input, deps),
            keys.clone(),
            schema.clone(),
        )),
        PhysicalPlan::Limit { input, count, .. } => {
            Box::new(LimitOp::new(build_operator(input, deps), *count))
        }
        PhysicalPlan::Aggregate {
            input,
            keys,
            aggregations,
            algorithm,
            ..
        } => Box::new(AggregateOp::new(
            build_operator(input, deps),
            keys.clone(),
            aggregations.clone(),
            *algorithm,
        )),
        PhysicalPlan::Dedup {
            input,
            count,
            fields,
            consecutive,
            sort_by,
            ..
        } => Box::new(DedupOp::new(
            build_operator(input, deps),
            *count,
            fields.clone(),
            *consecutive,
            sort_by.clone(),
        )),
        PhysicalPlan::TopN {
            input,
            count,
            fields,
            by,
            rare,
            algorithm,
            ..
        } => Box::new(TopNOp::new(
            build_operator(input, deps),
            *count,
            fields.clone(),
            by.clone(),
            *rare,
            *algorithm,
        )),
        PhysicalPlan::Bin {
            input,
            field,
            span_seconds,
            bins,
            ..
        } => Box::new(BinOp::new(
            build_operator(input, deps),
            field.clone(),
            *span_seconds,
            *bins,
        )),
        PhysicalPlan::Eval {
            input, assignments, ..
        } => Box::new(EvalOp::new(
            build_operator(input, deps),
            assignments.clone(),
        )),
        PhysicalPlan::Rename { input, pairs, .. } => {
            Box::new(RenameOp::new(build_operator(input, deps), pairs.clone()))
        }
        PhysicalPlan::Replace {
            input,
            from,
            to,
            fields,
            ..
        } => Box::new(ReplaceOp::new(
            build_operator(input, deps),
            from.clone(),
            to.clone(),
            fields.clone(),
        )),
        PhysicalPlan::Fillnull {
            input,
            value,
            fields,
            schema,
        } => {
            // An empty field list targets every schema field.
            let fields = if fields.is_empty() {
                schema.field_names()
            } else {
                fields.clone()
            };
            Box::new(FillnullOp::new(build_operator(input, deps), value, fields))
        }
        PhysicalPlan::RegexExtract {
            input,
            field,
            pattern,
            ..
        } => Box::new(RegexExtractOp::new(
            build_operator(input, deps),
            field.clone(),
            pattern.clone(),
        )),
        PhysicalPlan::Lookup {
            input,
            table,
            key_field,
            outputs,
            ..
        } => Box::new(LookupOp::new(
            build_operator(input, deps),
            deps.lookups.clone(),
            table.clone(),
            key_field.clone(),
            outputs.clone(),
        )),
        PhysicalPlan::Append {
            input, subsearch, ..
        } => Box::new(AppendOp::new(
            build_operator(input, deps),
            build_operator(subsearch, deps),
        )),
        PhysicalPlan::Join {
            input,
            subsearch,
            join_type,
            key_field,
            ..
        } => Box::new(JoinOp::new(
            build_operator(input, deps),
            build_operator(subsearch, deps),
            *join_type,
            key_field.clone(),
        )),
        PhysicalPlan::Reverse { input, .. } => {
            Box::new(ReverseOp::new(build_operator(input, deps)))
        }
        PhysicalPlan::Flatten { input, field, .. } => {
            Box::new(FlattenOp::new(build_operator(input, deps), field.clone()))
        }
        PhysicalPlan::Window {
            input,
            mode,
            aggregations,
            by,
            ..
        } => Box::new(WindowOp::new(
            build_operator(input, deps),
            mode.clone(),
            aggregations.clone(),
            by.clone(),
        )),
    }
}

/// Runs an operator to end-of-stream. The operator is closed on every
/// exit path, including errors.
pub fn collect(op: &mut dyn Operator, ctx: &ExecContext) -> Result<Vec<Row>> {
    let result = (|| {
        op.open(ctx)?;
        let mut rows = Vec::new();
        while let Some(row) = op.next(ctx)? {
            rows.push(row);
        }
        Ok(rows)
    })();
    op.close();
    result
}
