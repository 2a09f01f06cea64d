//! Ties the stages together: analyze, plan, optimize, lower, execute.

use crate::analyzer::Analyzer;
use crate::ast::Query;
use crate::catalog::{DatasetCatalog, Schema};
use crate::datasource::DataSource;
use crate::error::{QueryError, Result};
use crate::executor::{build_operator, collect, ExecContext, ExecutorDeps, ResourceLimits};
use crate::logical::{LogicalPlan, LogicalPlanner};
use crate::lookup::LookupRegistry;
use crate::optimizer::Optimizer;
use crate::physical::{PhysicalPlan, PhysicalPlanner};
use crate::row::Row;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Flat engine options. Hosts construct this record; there is no
/// environment fallback.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Longest accepted query text, in bytes.
    pub max_query_len: usize,
    /// Budget for the external parser front end; the core does not
    /// enforce it, hosts pass it to their parser.
    pub parse_timeout: Duration,
    /// 0 = none, 1 = basic (merge and fold), 2 = full rule set.
    pub optimization_level: u8,
    pub max_optimizer_rounds: usize,
    pub query_timeout: Duration,
    pub max_buffered_rows: usize,
    pub max_memory_bytes: usize,
    pub enable_push_down: bool,
    /// Rows per backend page.
    pub push_down_batch_size: u64,
    /// Demote row-level evaluation errors to null instead of aborting.
    pub lenient_eval: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_query_len: 10_000,
            parse_timeout: Duration::from_secs(5),
            optimization_level: 2,
            max_optimizer_rounds: crate::optimizer::DEFAULT_MAX_ROUNDS,
            query_timeout: Duration::from_secs(30),
            max_buffered_rows: 1_000_000,
            max_memory_bytes: 512 * 1024 * 1024,
            enable_push_down: true,
            push_down_batch_size: 1000,
            lenient_eval: false,
        }
    }
}

/// Compilation result: both logical plans and the physical plan, plus
/// the output schema.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub explain: bool,
    pub logical: LogicalPlan,
    pub optimized: LogicalPlan,
    pub physical: PhysicalPlan,
    pub schema: Arc<Schema>,
}

/// Deterministic, text-printable dump of all three plan stages.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainReport {
    pub logical: String,
    pub optimized: String,
    pub physical: String,
}

impl fmt::Display for ExplainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Logical Plan:")?;
        write!(f, "{}", self.logical)?;
        writeln!(f, "Optimized Logical Plan:")?;
        write!(f, "{}", self.optimized)?;
        writeln!(f, "Physical Plan:")?;
        write!(f, "{}", self.physical)
    }
}

/// What a query run produces: rows for a normal query, a plan report for
/// an explain meta-request.
#[derive(Debug, Clone)]
pub enum QueryOutput {
    Rows { rows: Vec<Row>, schema: Arc<Schema> },
    Explain(ExplainReport),
}

pub struct Engine {
    catalog: Arc<dyn DatasetCatalog>,
    source: Arc<dyn DataSource>,
    lookups: Arc<LookupRegistry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        catalog: Arc<dyn DatasetCatalog>,
        source: Arc<dyn DataSource>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            source,
            lookups: Arc::new(LookupRegistry::new()),
            config,
        }
    }

    pub fn with_lookups(mut self, lookups: Arc<LookupRegistry>) -> Self {
        self.lookups = lookups;
        self
    }

    pub fn lookups(&self) -> &Arc<LookupRegistry> {
        &self.lookups
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the front half of the pipeline: analysis, logical planning,
    /// optimization and physical planning.
    pub fn compile(&self, query: &Query) -> Result<CompiledQuery> {
        let text = query.to_string();
        if text.len() > self.config.max_query_len {
            return Err(QueryError::semantic(
                format!(
                    "query text is {} bytes, limit is {}",
                    text.len(),
                    self.config.max_query_len
                ),
                query.position,
            ));
        }

        let analyzed = Analyzer::new(self.catalog.as_ref()).analyze(query)?;
        let schema = analyzed.output_schema();
        let logical = LogicalPlanner::new(self.catalog.as_ref()).plan(&analyzed)?;

        let optimizer = Optimizer::for_level(
            self.config.optimization_level,
            self.config.max_optimizer_rounds,
        );
        let optimized = optimizer.optimize(logical.clone());

        let physical =
            PhysicalPlanner::new(self.config.enable_push_down).plan(&optimized)?;
        debug!(query = %text, "query compiled");

        Ok(CompiledQuery {
            explain: analyzed.explain,
            logical: unwrap_explain(logical),
            optimized: unwrap_explain(optimized),
            physical,
            schema,
        })
    }

    /// Compiles and runs a query with a fresh context derived from the
    /// engine configuration.
    pub fn execute(&self, query: &Query) -> Result<QueryOutput> {
        let ctx = self.new_context();
        self.execute_with_context(query, &ctx)
    }

    /// Compiles and runs a query under a caller-provided context, letting
    /// hosts hold the cancellation handle.
    pub fn execute_with_context(&self, query: &Query, ctx: &ExecContext) -> Result<QueryOutput> {
        let compiled = self.compile(query)?;
        if compiled.explain {
            // Explain short-circuits execution.
            return Ok(QueryOutput::Explain(ExplainReport {
                logical: compiled.logical.to_string(),
                optimized: compiled.optimized.to_string(),
                physical: compiled.physical.to_string(),
            }));
        }
        let deps = ExecutorDeps {
            source: self.source.clone(),
            lookups: self.lookups.clone(),
            scan_batch_size: self.config.push_down_batch_size,
        };
        let mut root = build_operator(&compiled.physical, &deps);
        let rows = collect(root.as_mut(), ctx)?;
        Ok(QueryOutput::Rows {
            rows,
            schema: compiled.schema,
        })
    }

    /// Fresh execution context with the configured limits and deadline.
    pub fn new_context(&self) -> ExecContext {
        ExecContext::new(ResourceLimits {
            max_buffered_rows: self.config.max_buffered_rows,
            max_memory_bytes: self.config.max_memory_bytes,
        })
        .with_deadline(Instant::now() + self.config.query_timeout)
        .with_lenient_eval(self.config.lenient_eval)
    }
}

fn unwrap_explain(plan: LogicalPlan) -> LogicalPlan {
    match plan {
        LogicalPlan::Explain { input, .. } => *input,
        other => other,
    }
}
