//! Abstract syntax tree for the piped processing language.
//!
//! The AST is the public contract between the parser front end and the
//! engine: a `Query` is an ordered command sequence, commands hold
//! expression trees, and every node carries a `Position`. `Display` impls
//! are the stable printable forms used in plan dumps and EXPLAIN text.

pub mod command;
pub mod expr;
pub mod position;
pub mod visitor;

pub use command::{
    AddcoltotalsCommand, AddtotalsCommand, AppendCommand, BinCommand, ChartCommand, Command,
    DedupCommand, DescribeCommand, EvalAssignment, EvalCommand, EventstatsCommand, ExplainCommand,
    FieldsCommand, FillnullCommand, FlattenCommand, HeadCommand, JoinCommand, JoinType,
    LookupCommand, LookupOutput, ParseCommand, Query, RareCommand, RenameCommand, RenamePair,
    ReplaceCommand, ReverseCommand, RexCommand, SearchCommand, ShowDatasourcesCommand,
    SortCommand, StatsCommand, StreamstatsCommand, TableCommand, TailCommand, TimechartCommand,
    TopCommand, WhereCommand,
};
pub use expr::{
    quote_string, Aggregation, BinaryExpr, BinaryOp, CaseExpr, Expr, FieldRef, FunctionCall,
    ListLiteral, Literal, LiteralValue, SortKey, TimeSpan, TimeUnit, UnaryExpr, UnaryOp,
    WhenClause,
};
pub use position::Position;
pub use visitor::{walk_command, walk_expr, walk_query, Visitor};
