use super::expr::{Aggregation, Expr, FieldRef, Literal, SortKey, TimeSpan};
use super::position::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
    Full,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Outer => "outer",
            JoinType::Full => "full",
        };
        f.write_str(name)
    }
}

/// `search source=<dataset> [<filter>]`: pipeline head, names the dataset
/// and optionally an initial filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCommand {
    pub dataset: String,
    pub filter: Option<Expr>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereCommand {
    pub condition: Expr,
    pub position: Position,
}

/// `fields [+|-] a, b, c`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldsCommand {
    pub exclude: bool,
    pub fields: Vec<FieldRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsCommand {
    pub aggregations: Vec<Aggregation>,
    pub by: Vec<FieldRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortCommand {
    pub keys: Vec<SortKey>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadCommand {
    pub count: i64,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailCommand {
    pub count: i64,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopCommand {
    pub count: u64,
    pub fields: Vec<FieldRef>,
    pub by: Vec<FieldRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RareCommand {
    pub count: u64,
    pub fields: Vec<FieldRef>,
    pub by: Vec<FieldRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalAssignment {
    pub field: String,
    pub expr: Expr,
    pub position: Position,
}

/// `eval ms = latency * 1000, tag = "slow"`; later assignments see
/// earlier ones within the same command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalCommand {
    pub assignments: Vec<EvalAssignment>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenamePair {
    pub source: FieldRef,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameCommand {
    pub pairs: Vec<RenamePair>,
    pub position: Position,
}

/// `replace "old" with "new" in field, ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceCommand {
    pub from: String,
    pub to: String,
    pub fields: Vec<FieldRef>,
    pub position: Position,
}

/// `fillnull value=<literal> [f1, f2]`; an empty field list targets every
/// field in the current schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillnullCommand {
    pub value: Literal,
    pub fields: Vec<FieldRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseCommand {
    pub field: FieldRef,
    pub pattern: String,
    pub position: Position,
}

/// `rex field=<f> "<pattern>"`; named captures become new string fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RexCommand {
    pub field: FieldRef,
    pub pattern: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupOutput {
    pub field: String,
    pub alias: Option<String>,
}

impl LookupOutput {
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }
}

/// `lookup <table> <key field> output f1 [as a1], ...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupCommand {
    pub table: String,
    pub key_field: FieldRef,
    pub outputs: Vec<LookupOutput>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendCommand {
    pub subsearch: Query,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinCommand {
    pub join_type: JoinType,
    pub key_field: FieldRef,
    pub subsearch: Query,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupCommand {
    pub count: u64,
    pub fields: Vec<FieldRef>,
    pub consecutive: bool,
    pub sort_by: Vec<SortKey>,
    pub position: Position,
}

/// `bin <field> [span=5m | bins=10]`; neither option means auto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinCommand {
    pub field: FieldRef,
    pub span: Option<TimeSpan>,
    pub bins: Option<u32>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimechartCommand {
    pub span: Option<TimeSpan>,
    pub time_field: FieldRef,
    pub aggregations: Vec<Aggregation>,
    pub by: Vec<FieldRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartCommand {
    pub aggregations: Vec<Aggregation>,
    pub by: Vec<FieldRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeCommand {
    pub dataset: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowDatasourcesCommand {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainCommand {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseCommand {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenCommand {
    pub field: FieldRef,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCommand {
    pub fields: Vec<FieldRef>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventstatsCommand {
    pub aggregations: Vec<Aggregation>,
    pub by: Vec<FieldRef>,
    pub position: Position,
}

/// `streamstats [window=N] <aggs> [by ...]`; window 0 or absent means the
/// running stat is global-so-far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamstatsCommand {
    pub aggregations: Vec<Aggregation>,
    pub by: Vec<FieldRef>,
    pub window: Option<u64>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddtotalsCommand {
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddcoltotalsCommand {
    pub position: Position,
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Search(SearchCommand),
    Where(WhereCommand),
    Fields(FieldsCommand),
    Stats(StatsCommand),
    Sort(SortCommand),
    Head(HeadCommand),
    Tail(TailCommand),
    Top(TopCommand),
    Rare(RareCommand),
    Eval(EvalCommand),
    Rename(RenameCommand),
    Replace(ReplaceCommand),
    Fillnull(FillnullCommand),
    Parse(ParseCommand),
    Rex(RexCommand),
    Lookup(LookupCommand),
    Append(AppendCommand),
    Join(JoinCommand),
    Dedup(DedupCommand),
    Bin(BinCommand),
    Timechart(TimechartCommand),
    Chart(ChartCommand),
    Describe(DescribeCommand),
    ShowDatasources(ShowDatasourcesCommand),
    Explain(ExplainCommand),
    Reverse(ReverseCommand),
    Flatten(FlattenCommand),
    Table(TableCommand),
    Eventstats(EventstatsCommand),
    Streamstats(StreamstatsCommand),
    Addtotals(AddtotalsCommand),
    Addcoltotals(AddcoltotalsCommand),
}

impl Command {
    pub fn position(&self) -> Position {
        match self {
            Command::Search(c) => c.position,
            Command::Where(c) => c.position,
            Command::Fields(c) => c.position,
            Command::Stats(c) => c.position,
            Command::Sort(c) => c.position,
            Command::Head(c) => c.position,
            Command::Tail(c) => c.position,
            Command::Top(c) => c.position,
            Command::Rare(c) => c.position,
            Command::Eval(c) => c.position,
            Command::Rename(c) => c.position,
            Command::Replace(c) => c.position,
            Command::Fillnull(c) => c.position,
            Command::Parse(c) => c.position,
            Command::Rex(c) => c.position,
            Command::Lookup(c) => c.position,
            Command::Append(c) => c.position,
            Command::Join(c) => c.position,
            Command::Dedup(c) => c.position,
            Command::Bin(c) => c.position,
            Command::Timechart(c) => c.position,
            Command::Chart(c) => c.position,
            Command::Describe(c) => c.position,
            Command::ShowDatasources(c) => c.position,
            Command::Explain(c) => c.position,
            Command::Reverse(c) => c.position,
            Command::Flatten(c) => c.position,
            Command::Table(c) => c.position,
            Command::Eventstats(c) => c.position,
            Command::Streamstats(c) => c.position,
            Command::Addtotals(c) => c.position,
            Command::Addcoltotals(c) => c.position,
        }
    }

    /// Stable printable name of the command kind.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Search(_) => "search",
            Command::Where(_) => "where",
            Command::Fields(_) => "fields",
            Command::Stats(_) => "stats",
            Command::Sort(_) => "sort",
            Command::Head(_) => "head",
            Command::Tail(_) => "tail",
            Command::Top(_) => "top",
            Command::Rare(_) => "rare",
            Command::Eval(_) => "eval",
            Command::Rename(_) => "rename",
            Command::Replace(_) => "replace",
            Command::Fillnull(_) => "fillnull",
            Command::Parse(_) => "parse",
            Command::Rex(_) => "rex",
            Command::Lookup(_) => "lookup",
            Command::Append(_) => "append",
            Command::Join(_) => "join",
            Command::Dedup(_) => "dedup",
            Command::Bin(_) => "bin",
            Command::Timechart(_) => "timechart",
            Command::Chart(_) => "chart",
            Command::Describe(_) => "describe",
            Command::ShowDatasources(_) => "show datasources",
            Command::Explain(_) => "explain",
            Command::Reverse(_) => "reverse",
            Command::Flatten(_) => "flatten",
            Command::Table(_) => "table",
            Command::Eventstats(_) => "eventstats",
            Command::Streamstats(_) => "streamstats",
            Command::Addtotals(_) => "addtotals",
            Command::Addcoltotals(_) => "addcoltotals",
        }
    }
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Search(c) => {
                write!(f, "search source={}", c.dataset)?;
                if let Some(e) = &c.filter {
                    write!(f, " {}", e)?;
                }
                Ok(())
            }
            Command::Where(c) => write!(f, "where {}", c.condition),
            Command::Fields(c) => {
                if c.exclude {
                    write!(f, "fields - {}", join_display(&c.fields))
                } else {
                    write!(f, "fields {}", join_display(&c.fields))
                }
            }
            Command::Stats(c) => {
                write!(f, "stats {}", join_display(&c.aggregations))?;
                if !c.by.is_empty() {
                    write!(f, " by {}", join_display(&c.by))?;
                }
                Ok(())
            }
            Command::Sort(c) => write!(f, "sort {}", join_display(&c.keys)),
            Command::Head(c) => write!(f, "head {}", c.count),
            Command::Tail(c) => write!(f, "tail {}", c.count),
            Command::Top(c) => {
                write!(f, "top {} {}", c.count, join_display(&c.fields))?;
                if !c.by.is_empty() {
                    write!(f, " by {}", join_display(&c.by))?;
                }
                Ok(())
            }
            Command::Rare(c) => {
                write!(f, "rare {} {}", c.count, join_display(&c.fields))?;
                if !c.by.is_empty() {
                    write!(f, " by {}", join_display(&c.by))?;
                }
                Ok(())
            }
            Command::Eval(c) => {
                f.write_str("eval ")?;
                for (i, a) in c.assignments.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", a.field, a.expr)?;
                }
                Ok(())
            }
            Command::Rename(c) => {
                f.write_str("rename ")?;
                for (i, p) in c.pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} as {}", p.source, p.target)?;
                }
                Ok(())
            }
            Command::Replace(c) => {
                write!(
                    f,
                    "replace {} with {}",
                    super::expr::quote_string(&c.from),
                    super::expr::quote_string(&c.to)
                )?;
                if !c.fields.is_empty() {
                    write!(f, " in {}", join_display(&c.fields))?;
                }
                Ok(())
            }
            Command::Fillnull(c) => {
                write!(f, "fillnull value={}", c.value)?;
                if !c.fields.is_empty() {
                    write!(f, " {}", join_display(&c.fields))?;
                }
                Ok(())
            }
            Command::Parse(c) => write!(
                f,
                "parse {} {}",
                c.field,
                super::expr::quote_string(&c.pattern)
            ),
            Command::Rex(c) => write!(
                f,
                "rex field={} {}",
                c.field,
                super::expr::quote_string(&c.pattern)
            ),
            Command::Lookup(c) => {
                write!(f, "lookup {} {}", c.table, c.key_field)?;
                if !c.outputs.is_empty() {
                    f.write_str(" output ")?;
                    for (i, o) in c.outputs.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        f.write_str(&o.field)?;
                        if let Some(a) = &o.alias {
                            write!(f, " as {}", a)?;
                        }
                    }
                }
                Ok(())
            }
            Command::Append(c) => write!(f, "append [{}]", c.subsearch),
            Command::Join(c) => write!(
                f,
                "join type={} {} [{}]",
                c.join_type, c.key_field, c.subsearch
            ),
            Command::Dedup(c) => {
                write!(f, "dedup {} {}", c.count, join_display(&c.fields))?;
                if c.consecutive {
                    f.write_str(" consecutive=true")?;
                }
                if !c.sort_by.is_empty() {
                    write!(f, " sortby {}", join_display(&c.sort_by))?;
                }
                Ok(())
            }
            Command::Bin(c) => {
                write!(f, "bin {}", c.field)?;
                if let Some(span) = &c.span {
                    write!(f, " span={}", span)?;
                }
                if let Some(bins) = c.bins {
                    write!(f, " bins={}", bins)?;
                }
                Ok(())
            }
            Command::Timechart(c) => {
                f.write_str("timechart")?;
                if let Some(span) = &c.span {
                    write!(f, " span={}", span)?;
                }
                write!(f, " {}", join_display(&c.aggregations))?;
                if !c.by.is_empty() {
                    write!(f, " by {}", join_display(&c.by))?;
                }
                Ok(())
            }
            Command::Chart(c) => {
                write!(f, "chart {}", join_display(&c.aggregations))?;
                if !c.by.is_empty() {
                    write!(f, " by {}", join_display(&c.by))?;
                }
                Ok(())
            }
            Command::Describe(c) => write!(f, "describe {}", c.dataset),
            Command::ShowDatasources(_) => f.write_str("show datasources"),
            Command::Explain(_) => f.write_str("explain"),
            Command::Reverse(_) => f.write_str("reverse"),
            Command::Flatten(c) => write!(f, "flatten {}", c.field),
            Command::Table(c) => write!(f, "table {}", join_display(&c.fields)),
            Command::Eventstats(c) => {
                write!(f, "eventstats {}", join_display(&c.aggregations))?;
                if !c.by.is_empty() {
                    write!(f, " by {}", join_display(&c.by))?;
                }
                Ok(())
            }
            Command::Streamstats(c) => {
                f.write_str("streamstats")?;
                if let Some(w) = c.window {
                    write!(f, " window={}", w)?;
                }
                write!(f, " {}", join_display(&c.aggregations))?;
                if !c.by.is_empty() {
                    write!(f, " by {}", join_display(&c.by))?;
                }
                Ok(())
            }
            Command::Addtotals(_) => f.write_str("addtotals"),
            Command::Addcoltotals(_) => f.write_str("addcoltotals"),
        }
    }
}

/// A full pipeline: an ordered, non-empty command sequence. A query whose
/// first command is `explain` is a meta-request answered with plan text
/// instead of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub commands: Vec<Command>,
    pub position: Position,
}

impl Query {
    pub fn new(commands: Vec<Command>) -> Self {
        let position = commands
            .first()
            .map(|c| c.position())
            .unwrap_or_else(Position::none);
        Self { commands, position }
    }

    pub fn is_explain(&self) -> bool {
        matches!(self.commands.first(), Some(Command::Explain(_)))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::BinaryOp;

    fn pos() -> Position {
        Position::none()
    }

    #[test]
    fn test_query_display_pipeline() {
        let q = Query::new(vec![
            Command::Search(SearchCommand {
                dataset: "logs".into(),
                filter: None,
                position: pos(),
            }),
            Command::Where(WhereCommand {
                condition: Expr::binary(
                    BinaryOp::Eq,
                    Expr::field("status", pos()),
                    Expr::int(200),
                    pos(),
                ),
                position: pos(),
            }),
            Command::Head(HeadCommand {
                count: 10,
                position: pos(),
            }),
        ]);
        assert_eq!(
            q.to_string(),
            "search source=logs | where (status = 200) | head 10"
        );
    }

    #[test]
    fn test_explain_detection() {
        let q = Query::new(vec![
            Command::Explain(ExplainCommand { position: pos() }),
            Command::Search(SearchCommand {
                dataset: "logs".into(),
                filter: None,
                position: pos(),
            }),
        ]);
        assert!(q.is_explain());
    }

    #[test]
    fn test_command_names_stable() {
        let c = Command::ShowDatasources(ShowDatasourcesCommand { position: pos() });
        assert_eq!(c.name(), "show datasources");
    }
}
