//! Non-collapsing aggregation: eventstats and streamstats.

use super::aggregate::{key_tuple, tuple_repr, AggAccumulator};
use super::{drain_all, Evaluator, ExecContext, Operator};
use crate::ast::{Aggregation, FieldRef};
use crate::error::Result;
use crate::logical::WindowMode;
use crate::row::Row;
use std::collections::{HashMap, VecDeque};

/// Eventstats buffers the input, aggregates per group, then re-emits
/// every original row with the group's results attached. Streamstats is
/// online: each row carries the running (or sliding-window) stat at the
/// moment it flows through, order preserved.
pub struct WindowOp {
    input: Box<dyn Operator>,
    mode: WindowMode,
    aggregations: Vec<Aggregation>,
    by: Vec<FieldRef>,
    evaluator: Evaluator,
    // eventstats state
    replay: Option<VecDeque<Row>>,
    group_results: HashMap<String, Vec<(String, crate::row::Value)>>,
    // streamstats state
    running: HashMap<String, Vec<AggAccumulator>>,
    windows: HashMap<String, VecDeque<Row>>,
    opened: bool,
}

impl WindowOp {
    pub fn new(
        input: Box<dyn Operator>,
        mode: WindowMode,
        aggregations: Vec<Aggregation>,
        by: Vec<FieldRef>,
    ) -> Self {
        Self {
            input,
            mode,
            aggregations,
            by,
            evaluator: Evaluator::new(),
            replay: None,
            group_results: HashMap::new(),
            running: HashMap::new(),
            windows: HashMap::new(),
            opened: false,
        }
    }

    fn new_accumulators(&self) -> Vec<AggAccumulator> {
        self.aggregations.iter().map(AggAccumulator::new).collect()
    }

    fn prepare_eventstats(&mut self, ctx: &ExecContext) -> Result<()> {
        let rows = drain_all(self.input.as_mut(), ctx)?;
        let mut groups: HashMap<String, Vec<AggAccumulator>> = HashMap::new();
        for row in &rows {
            let key = tuple_repr(&key_tuple(&self.by, row));
            let accumulators = groups
                .entry(key)
                .or_insert_with(|| self.new_accumulators());
            for acc in accumulators {
                acc.update(row, &self.evaluator)?;
            }
        }
        for (key, accumulators) in groups {
            let results = accumulators
                .iter()
                .map(|acc| (acc.output_name(), acc.finish()))
                .collect();
            self.group_results.insert(key, results);
        }
        self.replay = Some(rows.into());
        Ok(())
    }

    fn next_eventstats(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        if self.replay.is_none() {
            self.prepare_eventstats(ctx)?;
        }
        let Some(mut row) = self.replay.as_mut().and_then(|r| r.pop_front()) else {
            return Ok(None);
        };
        let key = tuple_repr(&key_tuple(&self.by, &row));
        if let Some(results) = self.group_results.get(&key) {
            for (name, value) in results {
                row.set(name.clone(), value.clone());
            }
        }
        Ok(Some(row))
    }

    fn next_streamstats(&mut self, ctx: &ExecContext, window: u64) -> Result<Option<Row>> {
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let key = tuple_repr(&key_tuple(&self.by, &row));
        if window == 0 {
            // Global-so-far: running accumulators per group.
            if !self.running.contains_key(&key) {
                let fresh = self.new_accumulators();
                self.running.insert(key.clone(), fresh);
                ctx.charge_rows(self.running.len())?;
            }
            let evaluator = &self.evaluator;
            let accumulators = self.running.get_mut(&key).unwrap();
            for acc in accumulators.iter_mut() {
                acc.update(&row, evaluator)?;
            }
            for acc in accumulators.iter() {
                row.set(acc.output_name(), acc.finish());
            }
        } else {
            // Sliding window: recompute over the retained rows.
            let mut accumulators = self.new_accumulators();
            let evaluator = &self.evaluator;
            let buffer = self.windows.entry(key).or_default();
            buffer.push_back(row.clone());
            if buffer.len() as u64 > window {
                buffer.pop_front();
            }
            for buffered in buffer.iter() {
                for acc in accumulators.iter_mut() {
                    acc.update(buffered, evaluator)?;
                }
            }
            for acc in &accumulators {
                row.set(acc.output_name(), acc.finish());
            }
        }
        Ok(Some(row))
    }
}

impl Operator for WindowOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        match self.mode {
            WindowMode::Eventstats => self.next_eventstats(ctx),
            WindowMode::Streamstats { window } => self.next_streamstats(ctx, window),
        }
    }

    fn close(&mut self) {
        self.input.close();
        self.replay = None;
        self.group_results.clear();
        self.running.clear();
        self.windows.clear();
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;
    use crate::executor::ValuesOp;
    use crate::row::Value;

    fn agg(func: &str, field: Option<&str>, alias: &str) -> Aggregation {
        Aggregation {
            func: func.into(),
            args: field
                .map(|f| vec![crate::ast::Expr::field(f, Position::none())])
                .unwrap_or_default(),
            distinct: false,
            alias: Some(alias.into()),
            position: Position::none(),
        }
    }

    fn input_rows() -> Vec<Row> {
        vec![
            Row::from_fields([("host", Value::Str("a".into())), ("v", Value::Int(1))]),
            Row::from_fields([("host", Value::Str("b".into())), ("v", Value::Int(10))]),
            Row::from_fields([("host", Value::Str("a".into())), ("v", Value::Int(3))]),
        ]
    }

    fn collect_all(op: &mut dyn Operator) -> Vec<Row> {
        let ctx = ExecContext::default();
        op.open(&ctx).unwrap();
        let mut out = Vec::new();
        while let Some(row) = op.next(&ctx).unwrap() {
            out.push(row);
        }
        op.close();
        out
    }

    #[test]
    fn test_eventstats_attaches_group_aggregate_to_all_rows() {
        let mut op = WindowOp::new(
            Box::new(ValuesOp::new(input_rows())),
            WindowMode::Eventstats,
            vec![agg("sum", Some("v"), "total")],
            vec![FieldRef::new("host", Position::none())],
        );
        let out = collect_all(&mut op);
        assert_eq!(out.len(), 3);
        // Original order preserved, each row sees its group total.
        assert_eq!(out[0].get("total"), Value::Float(4.0));
        assert_eq!(out[1].get("total"), Value::Float(10.0));
        assert_eq!(out[2].get("total"), Value::Float(4.0));
        assert_eq!(out[2].get("v"), Value::Int(3));
    }

    #[test]
    fn test_streamstats_global_running_count() {
        let mut op = WindowOp::new(
            Box::new(ValuesOp::new(input_rows())),
            WindowMode::Streamstats { window: 0 },
            vec![agg("count", None, "n")],
            vec![FieldRef::new("host", Position::none())],
        );
        let out = collect_all(&mut op);
        assert_eq!(out[0].get("n"), Value::Int(1));
        assert_eq!(out[1].get("n"), Value::Int(1));
        assert_eq!(out[2].get("n"), Value::Int(2));
    }

    #[test]
    fn test_streamstats_sliding_window() {
        let rows: Vec<Row> = (1..=4)
            .map(|i| Row::from_fields([("v", Value::Int(i))]))
            .collect();
        let mut op = WindowOp::new(
            Box::new(ValuesOp::new(rows)),
            WindowMode::Streamstats { window: 2 },
            vec![agg("sum", Some("v"), "s")],
            vec![],
        );
        let out = collect_all(&mut op);
        assert_eq!(out[0].get("s"), Value::Float(1.0));
        assert_eq!(out[1].get("s"), Value::Float(3.0));
        assert_eq!(out[2].get("s"), Value::Float(5.0));
        assert_eq!(out[3].get("s"), Value::Float(7.0));
    }
}
