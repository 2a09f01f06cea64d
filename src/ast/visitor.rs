//! Double-dispatch traversal over the AST.
//!
//! Every visit method defaults to `Ok(None)`, so concrete visitors
//! override only the kinds they care about. Traversal is explicit: a
//! visitor that wants to descend calls `accept` on the children itself,
//! and any error short-circuits the walk.

use super::command::*;
use super::expr::*;
use crate::error::Result;

pub trait Visitor {
    /// Value produced by a visit. `None` is the "no result" outcome every
    /// default method returns.
    type Output;

    fn visit_query(&mut self, _node: &Query) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    // Command kinds.

    fn visit_search(&mut self, _node: &SearchCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_where(&mut self, _node: &WhereCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_fields(&mut self, _node: &FieldsCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_stats(&mut self, _node: &StatsCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_sort(&mut self, _node: &SortCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_head(&mut self, _node: &HeadCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_tail(&mut self, _node: &TailCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_top(&mut self, _node: &TopCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_rare(&mut self, _node: &RareCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_eval(&mut self, _node: &EvalCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_rename(&mut self, _node: &RenameCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_replace(&mut self, _node: &ReplaceCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_fillnull(&mut self, _node: &FillnullCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_parse(&mut self, _node: &ParseCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_rex(&mut self, _node: &RexCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_lookup(&mut self, _node: &LookupCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_append(&mut self, _node: &AppendCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_join(&mut self, _node: &JoinCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_dedup(&mut self, _node: &DedupCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_bin(&mut self, _node: &BinCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_timechart(&mut self, _node: &TimechartCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_chart(&mut self, _node: &ChartCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_describe(&mut self, _node: &DescribeCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_show_datasources(
        &mut self,
        _node: &ShowDatasourcesCommand,
    ) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_explain(&mut self, _node: &ExplainCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_reverse(&mut self, _node: &ReverseCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_flatten(&mut self, _node: &FlattenCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_table(&mut self, _node: &TableCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_eventstats(&mut self, _node: &EventstatsCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_streamstats(&mut self, _node: &StreamstatsCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_addtotals(&mut self, _node: &AddtotalsCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_addcoltotals(&mut self, _node: &AddcoltotalsCommand) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    // Expression kinds.

    fn visit_binary(&mut self, _node: &BinaryExpr) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_unary(&mut self, _node: &UnaryExpr) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_call(&mut self, _node: &FunctionCall) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_field(&mut self, _node: &FieldRef) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_literal(&mut self, _node: &Literal) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_list(&mut self, _node: &ListLiteral) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_case(&mut self, _node: &CaseExpr) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_when(&mut self, _node: &WhenClause) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_aggregation(&mut self, _node: &Aggregation) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_sort_key(&mut self, _node: &SortKey) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    fn visit_time_span(&mut self, _node: &TimeSpan) -> Result<Option<Self::Output>> {
        Ok(None)
    }
}

impl Query {
    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> Result<Option<V::Output>> {
        visitor.visit_query(self)
    }
}

impl Command {
    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> Result<Option<V::Output>> {
        match self {
            Command::Search(c) => visitor.visit_search(c),
            Command::Where(c) => visitor.visit_where(c),
            Command::Fields(c) => visitor.visit_fields(c),
            Command::Stats(c) => visitor.visit_stats(c),
            Command::Sort(c) => visitor.visit_sort(c),
            Command::Head(c) => visitor.visit_head(c),
            Command::Tail(c) => visitor.visit_tail(c),
            Command::Top(c) => visitor.visit_top(c),
            Command::Rare(c) => visitor.visit_rare(c),
            Command::Eval(c) => visitor.visit_eval(c),
            Command::Rename(c) => visitor.visit_rename(c),
            Command::Replace(c) => visitor.visit_replace(c),
            Command::Fillnull(c) => visitor.visit_fillnull(c),
            Command::Parse(c) => visitor.visit_parse(c),
            Command::Rex(c) => visitor.visit_rex(c),
            Command::Lookup(c) => visitor.visit_lookup(c),
            Command::Append(c) => visitor.visit_append(c),
            Command::Join(c) => visitor.visit_join(c),
            Command::Dedup(c) => visitor.visit_dedup(c),
            Command::Bin(c) => visitor.visit_bin(c),
            Command::Timechart(c) => visitor.visit_timechart(c),
            Command::Chart(c) => visitor.visit_chart(c),
            Command::Describe(c) => visitor.visit_describe(c),
            Command::ShowDatasources(c) => visitor.visit_show_datasources(c),
            Command::Explain(c) => visitor.visit_explain(c),
            Command::Reverse(c) => visitor.visit_reverse(c),
            Command::Flatten(c) => visitor.visit_flatten(c),
            Command::Table(c) => visitor.visit_table(c),
            Command::Eventstats(c) => visitor.visit_eventstats(c),
            Command::Streamstats(c) => visitor.visit_streamstats(c),
            Command::Addtotals(c) => visitor.visit_addtotals(c),
            Command::Addcoltotals(c) => visitor.visit_addcoltotals(c),
        }
    }
}

impl Expr {
    pub fn accept<V: Visitor>(&self, visitor: &mut V) -> Result<Option<V::Output>> {
        match self {
            Expr::Binary(e) => visitor.visit_binary(e),
            Expr::Unary(e) => visitor.visit_unary(e),
            Expr::Call(e) => visitor.visit_call(e),
            Expr::Field(e) => visitor.visit_field(e),
            Expr::Literal(e) => visitor.visit_literal(e),
            Expr::List(e) => visitor.visit_list(e),
            Expr::Case(e) => visitor.visit_case(e),
        }
    }
}

/// Convenience forwarding to `accept`.
pub fn walk_query<V: Visitor>(node: &Query, visitor: &mut V) -> Result<Option<V::Output>> {
    node.accept(visitor)
}

pub fn walk_command<V: Visitor>(node: &Command, visitor: &mut V) -> Result<Option<V::Output>> {
    node.accept(visitor)
}

pub fn walk_expr<V: Visitor>(node: &Expr, visitor: &mut V) -> Result<Option<V::Output>> {
    node.accept(visitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;

    /// A visitor that overrides nothing; every visit must yield (None, no
    /// error).
    struct DefaultVisitor;

    impl Visitor for DefaultVisitor {
        type Output = ();
    }

    fn pos() -> Position {
        Position::none()
    }

    #[test]
    fn test_default_visitor_is_noop_for_commands() {
        let commands: Vec<Command> = vec![
            Command::Search(SearchCommand {
                dataset: "logs".into(),
                filter: None,
                position: pos(),
            }),
            Command::Where(WhereCommand {
                condition: Expr::int(1),
                position: pos(),
            }),
            Command::Head(HeadCommand {
                count: 5,
                position: pos(),
            }),
            Command::Reverse(ReverseCommand { position: pos() }),
            Command::Addtotals(AddtotalsCommand { position: pos() }),
            Command::ShowDatasources(ShowDatasourcesCommand { position: pos() }),
        ];
        let mut v = DefaultVisitor;
        for c in &commands {
            assert_eq!(c.accept(&mut v).unwrap(), None);
        }
    }

    #[test]
    fn test_default_visitor_is_noop_for_exprs() {
        let exprs = vec![
            Expr::int(1),
            Expr::field("host", pos()),
            Expr::call("abs", vec![Expr::int(-1)], pos()),
            Expr::unary(crate::ast::UnaryOp::Not, Expr::int(0), pos()),
            Expr::List(ListLiteral {
                items: vec![],
                position: pos(),
            }),
        ];
        let mut v = DefaultVisitor;
        for e in &exprs {
            assert_eq!(e.accept(&mut v).unwrap(), None);
        }
    }

    /// Counts field references; exercises explicit recursion and error
    /// short-circuiting.
    struct FieldCounter {
        count: usize,
    }

    impl Visitor for FieldCounter {
        type Output = ();

        fn visit_field(&mut self, _node: &FieldRef) -> Result<Option<()>> {
            self.count += 1;
            Ok(None)
        }

        fn visit_binary(&mut self, node: &BinaryExpr) -> Result<Option<()>> {
            node.left.accept(self)?;
            node.right.accept(self)?;
            Ok(None)
        }
    }

    #[test]
    fn test_concrete_visitor_recursion() {
        let e = Expr::binary(
            crate::ast::BinaryOp::And,
            Expr::field("a", pos()),
            Expr::binary(
                crate::ast::BinaryOp::Eq,
                Expr::field("b", pos()),
                Expr::int(1),
                pos(),
            ),
            pos(),
        );
        let mut v = FieldCounter { count: 0 };
        walk_expr(&e, &mut v).unwrap();
        assert_eq!(v.count, 2);
    }
}
