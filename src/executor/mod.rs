//! Coordinator-side iterator runtime.
//!
//! Every physical operator implements open/next/close. The pipeline is
//! pull-based and single-threaded within one query: parents call `next`
//! on their children, rows flow one at a time, and end-of-stream is
//! `Ok(None)`. Operators check the context between rows and before I/O;
//! blocking operators charge their buffers against the context's
//! resource limits.

mod aggregate;
mod build;
mod eval;
mod join;
mod rowwise;
mod scan;
mod sort;
mod topn;
mod window;

pub use aggregate::AggregateOp;
pub use build::{build_operator, collect, ExecutorDeps};
pub use eval::Evaluator;
pub use join::{AppendOp, JoinOp, LookupOp};
pub use rowwise::{
    BinOp, EvalOp, FillnullOp, FilterOp, FlattenOp, LimitOp, ProjectOp, RegexExtractOp, RenameOp,
    ReplaceOp,
};
pub use scan::{ScanOp, ValuesOp};
pub use sort::{ReverseOp, SortOp};
pub use topn::{DedupOp, TopNOp};
pub use window::WindowOp;

use crate::error::{QueryError, Result};
use crate::row::Row;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Per-query resource ceilings.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Rows any single blocking operator may buffer.
    pub max_buffered_rows: usize,
    /// Total bytes buffered across the query.
    pub max_memory_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_buffered_rows: 1_000_000,
            max_memory_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Cancellation, deadline and resource accounting carried through every
/// open/next/close call.
pub struct ExecContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    limits: ResourceLimits,
    memory_used: AtomicUsize,
    /// Demote row-level evaluation errors to null instead of aborting.
    pub lenient_eval: bool,
}

impl ExecContext {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            limits,
            memory_used: AtomicUsize::new(0),
            lenient_eval: false,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_lenient_eval(mut self, lenient: bool) -> Self {
        self.lenient_eval = lenient;
        self
    }

    /// Handle hosts use to cancel the query from another thread.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Deadline and cancellation check; called between rows and before
    /// any I/O.
    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(QueryError::Timeout("query cancelled".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(QueryError::Timeout("query deadline exceeded".to_string()));
            }
        }
        Ok(())
    }

    /// Charges a blocking operator's buffer size.
    pub fn charge_rows(&self, buffered: usize) -> Result<()> {
        if buffered > self.limits.max_buffered_rows {
            return Err(QueryError::RowLimit(format!(
                "operator buffered {} rows, limit is {}",
                buffered, self.limits.max_buffered_rows
            )));
        }
        Ok(())
    }

    /// Charges buffered bytes against the query-wide memory ceiling.
    pub fn charge_memory(&self, bytes: usize) -> Result<()> {
        let used = self.memory_used.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if used > self.limits.max_memory_bytes {
            return Err(QueryError::MemoryLimit(format!(
                "query buffered {} bytes, limit is {}",
                used, self.limits.max_memory_bytes
            )));
        }
        Ok(())
    }

    /// Returns buffered bytes when a blocking operator releases them.
    pub fn release_memory(&self, bytes: usize) {
        self.memory_used.fetch_sub(
            bytes.min(self.memory_used.load(Ordering::Relaxed)),
            Ordering::Relaxed,
        );
    }

}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

/// Pull-based physical operator.
///
/// `open` is idempotent and may lazily initialize the child. `next`
/// yields one row or `None` at end of stream. `close` releases resources
/// on every exit path and is safe to call twice.
pub trait Operator {
    fn open(&mut self, ctx: &ExecContext) -> Result<()>;

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>>;

    fn close(&mut self);
}

/// Drains a child into a buffer, enforcing the blocking-operator limits.
pub(crate) fn drain_all(child: &mut dyn Operator, ctx: &ExecContext) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = child.next(ctx)? {
        ctx.check()?;
        ctx.charge_memory(row.approx_size())?;
        rows.push(row);
        ctx.charge_rows(rows.len())?;
    }
    Ok(rows)
}
