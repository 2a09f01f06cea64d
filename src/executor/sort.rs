//! Blocking order operators: sort and reverse.

use super::{drain_all, Evaluator, ExecContext, Operator};
use crate::ast::SortKey;
use crate::catalog::{FieldKind, Schema};
use crate::error::Result;
use crate::row::{Row, Value};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

/// Buffers the whole input, then emits in stable-sorted key order.
/// Numeric keys compare numerically, strings byte-lexicographically, and
/// date-kinded string fields as timestamps.
pub struct SortOp {
    input: Box<dyn Operator>,
    keys: Vec<SortKey>,
    schema: Arc<Schema>,
    sorted: Option<VecDeque<Row>>,
    opened: bool,
}

impl SortOp {
    pub fn new(input: Box<dyn Operator>, keys: Vec<SortKey>, schema: Arc<Schema>) -> Self {
        Self {
            input,
            keys,
            schema,
            sorted: None,
            opened: false,
        }
    }

    fn key_kinds(&self) -> Vec<Option<FieldKind>> {
        self.keys
            .iter()
            .map(|k| {
                k.expr
                    .as_field()
                    .and_then(|f| self.schema.field_kind(&f.name))
            })
            .collect()
    }

    fn sort_rows(&mut self, ctx: &ExecContext) -> Result<()> {
        let rows = drain_all(self.input.as_mut(), ctx)?;
        let evaluator = Evaluator::new();
        let kinds = self.key_kinds();

        // Precompute the key tuple per row so the comparator never
        // re-evaluates expressions.
        let mut keyed: Vec<(Vec<Value>, Row)> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut tuple = Vec::with_capacity(self.keys.len());
            for key in &self.keys {
                tuple.push(evaluator.evaluate(&key.expr, &row).unwrap_or(Value::Null));
            }
            keyed.push((tuple, row));
        }

        let keys = self.keys.clone();
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, key) in keys.iter().enumerate() {
                let ord = compare_typed(kinds.get(i).copied().flatten(), &a[i], &b[i]);
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        self.sorted = Some(keyed.into_iter().map(|(_, row)| row).collect());
        Ok(())
    }
}

impl Operator for SortOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        if self.sorted.is_none() {
            self.sort_rows(ctx)?;
        }
        Ok(self.sorted.as_mut().and_then(|s| s.pop_front()))
    }

    fn close(&mut self) {
        self.input.close();
        self.sorted = None;
        self.opened = false;
    }
}

/// Kind-aware comparison: date-kinded strings parse as timestamps before
/// comparing; everything else uses the dynamic value order.
pub(crate) fn compare_typed(kind: Option<FieldKind>, a: &Value, b: &Value) -> Ordering {
    if kind == Some(FieldKind::Date) {
        if let (Value::Str(sa), Value::Str(sb)) = (a, b) {
            if let (Some(ta), Some(tb)) = (
                super::rowwise::parse_datetime(sa),
                super::rowwise::parse_datetime(sb),
            ) {
                return ta.cmp(&tb);
            }
        }
    }
    a.compare(b)
}

/// Buffers all rows and emits them in reverse arrival order.
pub struct ReverseOp {
    input: Box<dyn Operator>,
    buffered: Option<Vec<Row>>,
    opened: bool,
}

impl ReverseOp {
    pub fn new(input: Box<dyn Operator>) -> Self {
        Self {
            input,
            buffered: None,
            opened: false,
        }
    }
}

impl Operator for ReverseOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        if self.buffered.is_none() {
            self.buffered = Some(drain_all(self.input.as_mut(), ctx)?);
        }
        Ok(self.buffered.as_mut().and_then(|rows| rows.pop()))
    }

    fn close(&mut self) {
        self.input.close();
        self.buffered = None;
        self.opened = false;
    }
}
