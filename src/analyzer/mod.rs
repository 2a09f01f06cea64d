//! Semantic analysis.
//!
//! The analyzer walks a query's commands top to bottom, threading the
//! current schema: each command is validated against the schema its
//! predecessor produced and yields the schema the next stage sees.
//! Subsearches (append, join) are analyzed against their own initial
//! schema. The first error encountered aborts the walk.

mod typecheck;

pub use typecheck::TypeChecker;

use crate::ast::{
    AddcoltotalsCommand, AddtotalsCommand, AppendCommand, BinCommand, ChartCommand, Command,
    DedupCommand, DescribeCommand, EvalCommand, EventstatsCommand, FieldsCommand, FillnullCommand,
    FlattenCommand, HeadCommand, JoinCommand, LookupCommand, ParseCommand, Query, RareCommand,
    RenameCommand, ReplaceCommand, ReverseCommand, RexCommand, SearchCommand,
    ShowDatasourcesCommand, SortCommand, StatsCommand, StreamstatsCommand, TableCommand,
    TailCommand, TimechartCommand, TopCommand, Visitor, WhereCommand,
};
use crate::catalog::{DatasetCatalog, FieldKind, Schema};
use crate::error::{QueryError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Analysis result: the query (explain wrapper stripped), one output
/// schema per command, and the analyses of any subsearches keyed by the
/// index of the command that owns them.
#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    pub query: Query,
    pub explain: bool,
    pub schemas: Vec<Arc<Schema>>,
    pub subqueries: HashMap<usize, AnalyzedQuery>,
}

impl AnalyzedQuery {
    /// Schema of the final pipeline stage.
    pub fn output_schema(&self) -> Arc<Schema> {
        self.schemas
            .last()
            .cloned()
            .unwrap_or_else(|| Arc::new(Schema::new()))
    }
}

pub struct Analyzer<'a> {
    catalog: &'a dyn DatasetCatalog,
}

impl<'a> Analyzer<'a> {
    pub fn new(catalog: &'a dyn DatasetCatalog) -> Self {
        Self { catalog }
    }

    pub fn analyze(&self, query: &Query) -> Result<AnalyzedQuery> {
        if query.commands.is_empty() {
            return Err(QueryError::semantic("empty query", query.position));
        }
        let explain = query.is_explain();
        let commands: Vec<Command> = if explain {
            query.commands[1..].to_vec()
        } else {
            query.commands.clone()
        };
        if commands.is_empty() {
            return Err(QueryError::semantic(
                "explain requires a query to explain",
                query.position,
            ));
        }
        let stripped = Query::new(commands);
        let (schemas, subqueries) = self.analyze_commands(&stripped)?;
        debug!(
            commands = stripped.commands.len(),
            output = %schemas.last().map(|s| s.to_string()).unwrap_or_default(),
            "analysis complete"
        );
        Ok(AnalyzedQuery {
            query: stripped,
            explain,
            schemas,
            subqueries,
        })
    }

    fn analyze_commands(
        &self,
        query: &Query,
    ) -> Result<(Vec<Arc<Schema>>, HashMap<usize, AnalyzedQuery>)> {
        let mut walker = CommandWalker {
            catalog: self.catalog,
            current: Arc::new(Schema::new()),
            subqueries: HashMap::new(),
            index: 0,
        };
        let mut schemas = Vec::with_capacity(query.commands.len());
        for (i, command) in query.commands.iter().enumerate() {
            walker.index = i;
            if i == 0 {
                match command {
                    Command::Search(_) | Command::Describe(_) | Command::ShowDatasources(_) => {}
                    other => {
                        return Err(QueryError::semantic(
                            format!("query must begin with search, got {}", other.name()),
                            other.position(),
                        ));
                    }
                }
            } else if matches!(command, Command::Search(_)) {
                return Err(QueryError::semantic(
                    "search is only valid as the first command",
                    command.position(),
                ));
            }
            let next = command.accept(&mut walker)?.ok_or_else(|| {
                QueryError::internal(format!("analysis produced no schema for {}", command.name()))
            })?;
            walker.current = next.clone();
            schemas.push(next);
        }
        Ok((schemas, walker.subqueries))
    }
}

/// Visitor that produces each command's output schema from the current
/// one.
struct CommandWalker<'a> {
    catalog: &'a dyn DatasetCatalog,
    current: Arc<Schema>,
    subqueries: HashMap<usize, AnalyzedQuery>,
    index: usize,
}

impl<'a> CommandWalker<'a> {
    fn checker(&self) -> TypeChecker<'_> {
        TypeChecker::new(&self.current)
    }

    fn resolve_all(&self, fields: &[crate::ast::FieldRef]) -> Result<()> {
        let checker = self.checker();
        for field in fields {
            checker.resolve_field(field)?;
        }
        Ok(())
    }

    fn aggregate_schema(
        &self,
        by: &[crate::ast::FieldRef],
        aggregations: &[crate::ast::Aggregation],
        leading: Option<(&str, FieldKind)>,
    ) -> Result<Arc<Schema>> {
        let checker = self.checker();
        let mut out = Schema::new();
        if let Some((name, kind)) = leading {
            out.set_field(name.to_string(), kind);
        }
        for key in by {
            let kind = checker.resolve_field(key)?;
            out.set_field(key.name.clone(), kind);
        }
        for agg in aggregations {
            let kind = checker.check_aggregation(agg)?;
            out.set_field(agg.output_name(), kind);
        }
        Ok(Arc::new(out))
    }

    fn capture_schema(&self, pattern: &str, position: crate::ast::Position) -> Result<Arc<Schema>> {
        let compiled = regex::Regex::new(pattern).map_err(|e| {
            QueryError::semantic(format!("invalid extraction pattern: {}", e), position)
        })?;
        let mut out = (*self.current).clone();
        let mut any = false;
        for name in compiled.capture_names().flatten() {
            out.set_field(name.to_string(), FieldKind::String);
            any = true;
        }
        if !any {
            return Err(QueryError::semantic(
                "extraction pattern has no named captures",
                position,
            ));
        }
        Ok(Arc::new(out))
    }

    fn analyze_subsearch(&mut self, subsearch: &Query) -> Result<AnalyzedQuery> {
        let analyzer = Analyzer::new(self.catalog);
        analyzer.analyze(subsearch)
    }
}

impl<'a> Visitor for CommandWalker<'a> {
    type Output = Arc<Schema>;

    fn visit_search(&mut self, node: &SearchCommand) -> Result<Option<Arc<Schema>>> {
        let schema = self
            .catalog
            .dataset_schema(&node.dataset)
            .map_err(|_| {
                QueryError::semantic(format!("unknown dataset: {}", node.dataset), node.position)
            })?;
        if let Some(filter) = &node.filter {
            TypeChecker::new(&schema).require_boolean(filter)?;
        }
        Ok(Some(schema))
    }

    fn visit_where(&mut self, node: &WhereCommand) -> Result<Option<Arc<Schema>>> {
        self.checker().require_boolean(&node.condition)?;
        Ok(Some(self.current.clone()))
    }

    fn visit_fields(&mut self, node: &FieldsCommand) -> Result<Option<Arc<Schema>>> {
        let names: Vec<String> = node.fields.iter().map(|f| f.name.clone()).collect();
        if node.exclude {
            Ok(Some(Arc::new(self.current.without(&names))))
        } else {
            self.resolve_all(&node.fields)?;
            Ok(Some(Arc::new(self.current.project(&names))))
        }
    }

    fn visit_table(&mut self, node: &TableCommand) -> Result<Option<Arc<Schema>>> {
        self.resolve_all(&node.fields)?;
        let names: Vec<String> = node.fields.iter().map(|f| f.name.clone()).collect();
        Ok(Some(Arc::new(self.current.project(&names))))
    }

    fn visit_stats(&mut self, node: &StatsCommand) -> Result<Option<Arc<Schema>>> {
        if node.aggregations.is_empty() {
            return Err(QueryError::semantic(
                "stats requires at least one aggregation",
                node.position,
            ));
        }
        Ok(Some(self.aggregate_schema(&node.by, &node.aggregations, None)?))
    }

    fn visit_chart(&mut self, node: &ChartCommand) -> Result<Option<Arc<Schema>>> {
        if node.aggregations.is_empty() {
            return Err(QueryError::semantic(
                "chart requires at least one aggregation",
                node.position,
            ));
        }
        Ok(Some(self.aggregate_schema(&node.by, &node.aggregations, None)?))
    }

    fn visit_timechart(&mut self, node: &TimechartCommand) -> Result<Option<Arc<Schema>>> {
        if node.aggregations.is_empty() {
            return Err(QueryError::semantic(
                "timechart requires at least one aggregation",
                node.position,
            ));
        }
        let time_kind = self.checker().resolve_field(&node.time_field)?;
        if !time_kind.is_numeric() {
            return Err(QueryError::semantic(
                format!(
                    "timechart time field {} must be date or numeric, got {}",
                    node.time_field, time_kind
                ),
                node.time_field.position,
            ));
        }
        Ok(Some(self.aggregate_schema(
            &node.by,
            &node.aggregations,
            Some((&node.time_field.name, time_kind)),
        )?))
    }

    fn visit_sort(&mut self, node: &SortCommand) -> Result<Option<Arc<Schema>>> {
        let checker = self.checker();
        for key in &node.keys {
            checker.infer(&key.expr)?;
        }
        Ok(Some(self.current.clone()))
    }

    fn visit_head(&mut self, _node: &HeadCommand) -> Result<Option<Arc<Schema>>> {
        // Negative counts are tolerated here and clamped at execution.
        Ok(Some(self.current.clone()))
    }

    fn visit_tail(&mut self, _node: &TailCommand) -> Result<Option<Arc<Schema>>> {
        Err(QueryError::NotImplemented("tail".to_string()))
    }

    fn visit_top(&mut self, node: &TopCommand) -> Result<Option<Arc<Schema>>> {
        Ok(Some(self.topn_schema(&node.fields, &node.by)?))
    }

    fn visit_rare(&mut self, node: &RareCommand) -> Result<Option<Arc<Schema>>> {
        Ok(Some(self.topn_schema(&node.fields, &node.by)?))
    }

    fn visit_eval(&mut self, node: &EvalCommand) -> Result<Option<Arc<Schema>>> {
        if node.assignments.is_empty() {
            return Err(QueryError::semantic(
                "eval requires at least one assignment",
                node.position,
            ));
        }
        // Later assignments see earlier ones.
        let mut schema = (*self.current).clone();
        for assignment in &node.assignments {
            let kind = TypeChecker::new(&schema).infer(&assignment.expr)?;
            schema.set_field(assignment.field.clone(), kind);
        }
        Ok(Some(Arc::new(schema)))
    }

    fn visit_rename(&mut self, node: &RenameCommand) -> Result<Option<Arc<Schema>>> {
        let checker = self.checker();
        for pair in &node.pairs {
            checker.resolve_field(&pair.source)?;
        }
        let mut out = Schema::new();
        for (name, kind) in self.current.iter() {
            let renamed = node
                .pairs
                .iter()
                .find(|p| p.source.name == name)
                .map(|p| p.target.clone())
                .unwrap_or_else(|| name.to_string());
            out.set_field(renamed, kind);
        }
        Ok(Some(Arc::new(out)))
    }

    fn visit_replace(&mut self, node: &ReplaceCommand) -> Result<Option<Arc<Schema>>> {
        self.resolve_all(&node.fields)?;
        Ok(Some(self.current.clone()))
    }

    fn visit_fillnull(&mut self, node: &FillnullCommand) -> Result<Option<Arc<Schema>>> {
        self.resolve_all(&node.fields)?;
        Ok(Some(self.current.clone()))
    }

    fn visit_parse(&mut self, node: &ParseCommand) -> Result<Option<Arc<Schema>>> {
        self.checker().resolve_field(&node.field)?;
        Ok(Some(self.capture_schema(&node.pattern, node.position)?))
    }

    fn visit_rex(&mut self, node: &RexCommand) -> Result<Option<Arc<Schema>>> {
        self.checker().resolve_field(&node.field)?;
        Ok(Some(self.capture_schema(&node.pattern, node.position)?))
    }

    fn visit_lookup(&mut self, node: &LookupCommand) -> Result<Option<Arc<Schema>>> {
        self.checker().resolve_field(&node.key_field)?;
        if node.outputs.is_empty() {
            return Err(QueryError::semantic(
                "lookup requires at least one output field",
                node.position,
            ));
        }
        let mut out = (*self.current).clone();
        for output in &node.outputs {
            out.set_field(output.output_name().to_string(), FieldKind::String);
        }
        Ok(Some(Arc::new(out)))
    }

    fn visit_append(&mut self, node: &AppendCommand) -> Result<Option<Arc<Schema>>> {
        let sub = self.analyze_subsearch(&node.subsearch)?;
        self.subqueries.insert(self.index, sub);
        // Mismatched subsearch columns stay sparsely populated; the output
        // schema is the main input's.
        Ok(Some(self.current.clone()))
    }

    fn visit_join(&mut self, node: &JoinCommand) -> Result<Option<Arc<Schema>>> {
        self.checker().resolve_field(&node.key_field)?;
        let sub = self.analyze_subsearch(&node.subsearch)?;
        let joined = self.current.union(&sub.output_schema());
        self.subqueries.insert(self.index, sub);
        Ok(Some(Arc::new(joined)))
    }

    fn visit_dedup(&mut self, node: &DedupCommand) -> Result<Option<Arc<Schema>>> {
        if node.fields.is_empty() {
            return Err(QueryError::semantic(
                "dedup requires at least one field",
                node.position,
            ));
        }
        self.resolve_all(&node.fields)?;
        let checker = self.checker();
        for key in &node.sort_by {
            checker.infer(&key.expr)?;
        }
        Ok(Some(self.current.clone()))
    }

    fn visit_bin(&mut self, node: &BinCommand) -> Result<Option<Arc<Schema>>> {
        let kind = self.checker().resolve_field(&node.field)?;
        if !kind.is_numeric() {
            return Err(QueryError::semantic(
                format!("bin field {} must be numeric or date, got {}", node.field, kind),
                node.field.position,
            ));
        }
        if node.span.is_some() && node.bins.is_some() {
            return Err(QueryError::semantic(
                "bin accepts span or bins, not both",
                node.position,
            ));
        }
        Ok(Some(self.current.clone()))
    }

    fn visit_explain(
        &mut self,
        node: &crate::ast::ExplainCommand,
    ) -> Result<Option<Arc<Schema>>> {
        Err(QueryError::semantic(
            "explain is only valid as the first command",
            node.position,
        ))
    }

    fn visit_describe(&mut self, node: &DescribeCommand) -> Result<Option<Arc<Schema>>> {
        self.catalog.dataset_schema(&node.dataset).map_err(|_| {
            QueryError::semantic(format!("unknown dataset: {}", node.dataset), node.position)
        })?;
        Ok(Some(Arc::new(Schema::from_fields([
            ("field", FieldKind::String),
            ("type", FieldKind::String),
        ]))))
    }

    fn visit_show_datasources(
        &mut self,
        _node: &ShowDatasourcesCommand,
    ) -> Result<Option<Arc<Schema>>> {
        Ok(Some(Arc::new(Schema::from_fields([(
            "name",
            FieldKind::String,
        )]))))
    }

    fn visit_reverse(&mut self, _node: &ReverseCommand) -> Result<Option<Arc<Schema>>> {
        Ok(Some(self.current.clone()))
    }

    fn visit_flatten(&mut self, node: &FlattenCommand) -> Result<Option<Arc<Schema>>> {
        self.checker().resolve_field(&node.field)?;
        Ok(Some(self.current.clone()))
    }

    fn visit_eventstats(&mut self, node: &EventstatsCommand) -> Result<Option<Arc<Schema>>> {
        Ok(Some(self.window_schema(&node.by, &node.aggregations, node.position)?))
    }

    fn visit_streamstats(&mut self, node: &StreamstatsCommand) -> Result<Option<Arc<Schema>>> {
        Ok(Some(self.window_schema(&node.by, &node.aggregations, node.position)?))
    }

    fn visit_addtotals(&mut self, _node: &AddtotalsCommand) -> Result<Option<Arc<Schema>>> {
        Err(QueryError::NotImplemented("addtotals".to_string()))
    }

    fn visit_addcoltotals(&mut self, _node: &AddcoltotalsCommand) -> Result<Option<Arc<Schema>>> {
        Err(QueryError::NotImplemented("addcoltotals".to_string()))
    }
}

impl<'a> CommandWalker<'a> {
    fn topn_schema(
        &self,
        fields: &[crate::ast::FieldRef],
        by: &[crate::ast::FieldRef],
    ) -> Result<Arc<Schema>> {
        if fields.is_empty() {
            return Err(QueryError::semantic(
                "top/rare requires at least one field",
                crate::ast::Position::none(),
            ));
        }
        let checker = self.checker();
        let mut out = Schema::new();
        for key in by {
            let kind = checker.resolve_field(key)?;
            out.set_field(key.name.clone(), kind);
        }
        for field in fields {
            let kind = checker.resolve_field(field)?;
            out.set_field(field.name.clone(), kind);
        }
        out.set_field("count".to_string(), FieldKind::Long);
        Ok(Arc::new(out))
    }

    fn window_schema(
        &self,
        by: &[crate::ast::FieldRef],
        aggregations: &[crate::ast::Aggregation],
        position: crate::ast::Position,
    ) -> Result<Arc<Schema>> {
        if aggregations.is_empty() {
            return Err(QueryError::semantic(
                "eventstats/streamstats requires at least one aggregation",
                position,
            ));
        }
        let checker = self.checker();
        self.resolve_all(by)?;
        let mut out = (*self.current).clone();
        for agg in aggregations {
            let kind = checker.check_aggregation(agg)?;
            out.set_field(agg.output_name(), kind);
        }
        Ok(Arc::new(out))
    }
}
