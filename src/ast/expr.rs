use super::position::Position;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators as they appear in the surface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
    In,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Like => "LIKE",
            BinaryOp::In => "IN",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => f.write_str("NOT"),
            UnaryOp::Neg => f.write_str("-"),
        }
    }
}

/// Literal payload. The tag and the carried value always agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub value: LiteralValue,
    pub position: Position,
}

impl Literal {
    pub fn null(position: Position) -> Self {
        Self {
            value: LiteralValue::Null,
            position,
        }
    }

    pub fn bool(v: bool, position: Position) -> Self {
        Self {
            value: LiteralValue::Bool(v),
            position,
        }
    }

    pub fn int(v: i64, position: Position) -> Self {
        Self {
            value: LiteralValue::Int(v),
            position,
        }
    }

    pub fn float(v: f64, position: Position) -> Self {
        Self {
            value: LiteralValue::Float(v),
            position,
        }
    }

    pub fn string(v: impl Into<String>, position: Position) -> Self {
        Self {
            value: LiteralValue::Str(v.into()),
            position,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            LiteralValue::Null => f.write_str("null"),
            LiteralValue::Bool(b) => write!(f, "{}", b),
            LiteralValue::Int(i) => write!(f, "{}", i),
            LiteralValue::Float(v) => write!(f, "{}", v),
            LiteralValue::Str(s) => f.write_str(&quote_string(s)),
        }
    }
}

/// A reference to a field by dotted path, optionally subscripted with a
/// trailing `[index]` for array access (e.g. `tags[0]`,
/// `request.headers.host`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub name: String,
    pub position: Position,
}

impl FieldRef {
    pub fn new(name: impl Into<String>, position: Position) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }

    /// Splits the dotted path, returning the path segments and the array
    /// index if the final segment carries one.
    pub fn path(&self) -> (Vec<&str>, Option<usize>) {
        let mut segments: Vec<&str> = self.name.split('.').collect();
        let mut index = None;
        if let Some(last) = segments.last_mut() {
            if let Some(open) = last.find('[') {
                if last.ends_with(']') {
                    if let Ok(i) = last[open + 1..last.len() - 1].parse::<usize>() {
                        index = Some(i);
                        *last = &last[..open];
                    }
                }
            }
        }
        (segments, index)
    }

    /// The root segment of the dotted path, without any subscript.
    pub fn root(&self) -> &str {
        let (segments, _) = self.path();
        segments.first().copied().unwrap_or("")
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
    pub position: Position,
}

/// A scalar or aggregation-style call. `distinct` is only meaningful for
/// aggregation-style calls (`count(distinct host)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub distinct: bool,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListLiteral {
    pub items: Vec<Expr>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenClause {
    pub condition: Box<Expr>,
    pub result: Box<Expr>,
    pub position: Position,
}

/// `case(when1, result1, ..., else)`: an ordered, non-empty list of when
/// clauses plus an optional else expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseExpr {
    pub whens: Vec<WhenClause>,
    pub else_expr: Option<Box<Expr>>,
    pub position: Position,
}

/// One aggregation inside stats/chart/eventstats/streamstats, e.g.
/// `count() as errors` or `percentile(latency, 95)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub func: String,
    pub args: Vec<Expr>,
    pub distinct: bool,
    pub alias: Option<String>,
    pub position: Position,
}

impl Aggregation {
    /// The output column name: the alias if given, else the printed call.
    pub fn output_name(&self) -> String {
        match &self.alias {
            Some(a) => a.clone(),
            None => self.call_text(),
        }
    }

    pub fn call_text(&self) -> String {
        let args = self
            .args
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        if self.distinct {
            format!("{}(distinct {})", self.func, args)
        } else {
            format!("{}({})", self.func, args)
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.call_text())?;
        if let Some(alias) = &self.alias {
            write!(f, " as {}", alias)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub descending: bool,
    pub position: Position,
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.expr)
        } else {
            write!(f, "{}", self.expr)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl TimeUnit {
    pub fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
            TimeUnit::Weeks => "w",
            TimeUnit::Months => "mon",
        }
    }

    /// Nominal length in seconds; months use the 30-day convention.
    pub fn seconds(&self) -> i64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3600,
            TimeUnit::Days => 86_400,
            TimeUnit::Weeks => 604_800,
            TimeUnit::Months => 2_592_000,
        }
    }
}

/// A bucketing span such as `5m` or `1h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub value: i64,
    pub unit: TimeUnit,
    pub position: Position,
}

impl TimeSpan {
    pub fn as_seconds(&self) -> i64 {
        self.value * self.unit.seconds()
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

/// Expression tree. Each variant wraps a node struct carrying its own
/// position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Call(FunctionCall),
    Field(FieldRef),
    Literal(Literal),
    List(ListLiteral),
    Case(CaseExpr),
}

impl Expr {
    pub fn position(&self) -> Position {
        match self {
            Expr::Binary(e) => e.position,
            Expr::Unary(e) => e.position,
            Expr::Call(e) => e.position,
            Expr::Field(e) => e.position,
            Expr::Literal(e) => e.position,
            Expr::List(e) => e.position,
            Expr::Case(e) => e.position,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr, position: Position) -> Expr {
        Expr::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
            position,
        })
    }

    pub fn unary(op: UnaryOp, operand: Expr, position: Position) -> Expr {
        Expr::Unary(UnaryExpr {
            op,
            operand: Box::new(operand),
            position,
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>, position: Position) -> Expr {
        Expr::Call(FunctionCall {
            name: name.into(),
            args,
            distinct: false,
            position,
        })
    }

    pub fn field(name: impl Into<String>, position: Position) -> Expr {
        Expr::Field(FieldRef::new(name, position))
    }

    pub fn literal(value: LiteralValue, position: Position) -> Expr {
        Expr::Literal(Literal { value, position })
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(Literal::int(v, Position::none()))
    }

    pub fn string(v: impl Into<String>) -> Expr {
        Expr::Literal(Literal::string(v, Position::none()))
    }

    /// True when the expression is a bare field reference.
    pub fn as_field(&self) -> Option<&FieldRef> {
        match self {
            Expr::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&LiteralValue> {
        match self {
            Expr::Literal(l) => Some(&l.value),
            _ => None,
        }
    }

    /// Collects the names of every field referenced anywhere in the tree.
    pub fn referenced_fields(&self, out: &mut Vec<String>) {
        match self {
            Expr::Field(f) => out.push(f.name.clone()),
            Expr::Binary(e) => {
                e.left.referenced_fields(out);
                e.right.referenced_fields(out);
            }
            Expr::Unary(e) => e.operand.referenced_fields(out),
            Expr::Call(c) => {
                for a in &c.args {
                    a.referenced_fields(out);
                }
            }
            Expr::List(l) => {
                for item in &l.items {
                    item.referenced_fields(out);
                }
            }
            Expr::Case(c) => {
                for w in &c.whens {
                    w.condition.referenced_fields(out);
                    w.result.referenced_fields(out);
                }
                if let Some(e) = &c.else_expr {
                    e.referenced_fields(out);
                }
            }
            Expr::Literal(_) => {}
        }
    }

    /// True when any function call occurs in the tree. Drives the eval
    /// push-down partitioning.
    pub fn contains_call(&self) -> bool {
        match self {
            Expr::Call(_) => true,
            Expr::Binary(e) => e.left.contains_call() || e.right.contains_call(),
            Expr::Unary(e) => e.operand.contains_call(),
            Expr::List(l) => l.items.iter().any(|i| i.contains_call()),
            Expr::Case(c) => {
                c.whens
                    .iter()
                    .any(|w| w.condition.contains_call() || w.result.contains_call())
                    || c.else_expr.as_ref().is_some_and(|e| e.contains_call())
            }
            Expr::Field(_) | Expr::Literal(_) => false,
        }
    }
}

/// Escapes a string literal the way plan dumps print it: double quotes,
/// embedded quotes doubled.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Binary expressions always print fully parenthesized.
            Expr::Binary(e) => write!(f, "({} {} {})", e.left, e.op, e.right),
            Expr::Unary(e) => match e.op {
                UnaryOp::Not => write!(f, "(NOT {})", e.operand),
                UnaryOp::Neg => write!(f, "(-{})", e.operand),
            },
            Expr::Call(c) => {
                write!(f, "{}(", c.name)?;
                if c.distinct {
                    f.write_str("distinct ")?;
                }
                for (i, a) in c.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                f.write_str(")")
            }
            Expr::Field(fr) => write!(f, "{}", fr),
            Expr::Literal(l) => write!(f, "{}", l),
            Expr::List(l) => {
                f.write_str("(")?;
                for (i, item) in l.items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            Expr::Case(c) => {
                f.write_str("case(")?;
                for (i, w) in c.whens.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} -> {}", w.condition, w.result)?;
                }
                if let Some(e) = &c.else_expr {
                    write!(f, ", else {}", e)?;
                }
                f.write_str(")")
            }
        }
    }
}
