//! Binary-input operators: append, hash join and lookup enrichment.

use super::{drain_all, ExecContext, Operator};
use crate::ast::{FieldRef, JoinType, LookupOutput};
use crate::error::Result;
use crate::lookup::{LookupRegistry, LookupTable};
use crate::row::Row;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Drains the main child fully, then the subsearch child; never
/// interleaves.
pub struct AppendOp {
    main: Box<dyn Operator>,
    subsearch: Box<dyn Operator>,
    main_done: bool,
    opened: bool,
}

impl AppendOp {
    pub fn new(main: Box<dyn Operator>, subsearch: Box<dyn Operator>) -> Self {
        Self {
            main,
            subsearch,
            main_done: false,
            opened: false,
        }
    }
}

impl Operator for AppendOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.main.open(ctx)?;
        self.subsearch.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        if !self.main_done {
            if let Some(row) = self.main.next(ctx)? {
                return Ok(Some(row));
            }
            self.main_done = true;
        }
        self.subsearch.next(ctx)
    }

    fn close(&mut self) {
        self.main.close();
        self.subsearch.close();
        self.opened = false;
    }
}

/// Hash join. The right side (subsearch) is the build side, drained fully
/// at open; the left side probes row by row. Multiple right matches emit
/// one combined row each; right columns never overwrite left values.
pub struct JoinOp {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    join_type: JoinType,
    key_field: FieldRef,
    build: HashMap<String, Vec<usize>>,
    build_rows: Vec<Row>,
    matched_right: Vec<bool>,
    pending: VecDeque<Row>,
    left_done: bool,
    emitted_unmatched: bool,
    opened: bool,
}

impl JoinOp {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        join_type: JoinType,
        key_field: FieldRef,
    ) -> Self {
        Self {
            left,
            right,
            join_type,
            key_field,
            build: HashMap::new(),
            build_rows: Vec::new(),
            matched_right: Vec::new(),
            pending: VecDeque::new(),
            left_done: false,
            emitted_unmatched: false,
            opened: false,
        }
    }

    fn key_of(&self, row: &Row) -> String {
        row.get(&self.key_field.name).to_text()
    }

    fn combine(&self, left: &Row, right: &Row) -> Row {
        let mut out = left.clone();
        for name in right.field_names().map(|n| n.to_string()).collect::<Vec<_>>() {
            if !out.contains(&name) {
                out.set(name.clone(), right.get(&name));
            }
        }
        out
    }

    fn wants_unmatched_left(&self) -> bool {
        matches!(
            self.join_type,
            JoinType::Left | JoinType::Outer | JoinType::Full
        )
    }

    fn wants_unmatched_right(&self) -> bool {
        matches!(
            self.join_type,
            JoinType::Right | JoinType::Outer | JoinType::Full
        )
    }
}

impl Operator for JoinOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.left.open(ctx)?;
        self.right.open(ctx)?;
        // Build phase: the subsearch side is fully materialized.
        let rows = drain_all(self.right.as_mut(), ctx)?;
        self.matched_right = vec![false; rows.len()];
        for (i, row) in rows.iter().enumerate() {
            let key = self.key_of(row);
            self.build.entry(key).or_default().push(i);
        }
        self.build_rows = rows;
        Ok(())
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        loop {
            ctx.check()?;
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if !self.left_done {
                match self.left.next(ctx)? {
                    Some(left_row) => {
                        let key = self.key_of(&left_row);
                        let matches: Vec<usize> = if left_row.get(&self.key_field.name).is_null() {
                            // Null keys never join.
                            Vec::new()
                        } else {
                            self.build.get(&key).cloned().unwrap_or_default()
                        };
                        if matches.is_empty() {
                            if self.wants_unmatched_left() {
                                return Ok(Some(left_row));
                            }
                            continue;
                        }
                        for &i in &matches {
                            self.matched_right[i] = true;
                            self.pending
                                .push_back(self.combine(&left_row, &self.build_rows[i]));
                        }
                        continue;
                    }
                    None => self.left_done = true,
                }
            }
            if !self.emitted_unmatched {
                self.emitted_unmatched = true;
                if self.wants_unmatched_right() {
                    for (i, row) in self.build_rows.iter().enumerate() {
                        if !self.matched_right[i] {
                            self.pending.push_back(row.clone());
                        }
                    }
                }
                continue;
            }
            return Ok(None);
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.build.clear();
        self.build_rows.clear();
        self.pending.clear();
        self.opened = false;
    }
}

/// Left-outer enrichment against a registered lookup table. The table is
/// acquired at open (failing if missing); misses pass the row through
/// without the enrichment fields.
pub struct LookupOp {
    input: Box<dyn Operator>,
    registry: Arc<LookupRegistry>,
    table_name: String,
    key_field: FieldRef,
    outputs: Vec<LookupOutput>,
    table: Option<Arc<LookupTable>>,
    opened: bool,
}

impl LookupOp {
    pub fn new(
        input: Box<dyn Operator>,
        registry: Arc<LookupRegistry>,
        table_name: String,
        key_field: FieldRef,
        outputs: Vec<LookupOutput>,
    ) -> Self {
        Self {
            input,
            registry,
            table_name,
            key_field,
            outputs,
            table: None,
            opened: false,
        }
    }
}

impl Operator for LookupOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.table = Some(self.registry.get(&self.table_name)?);
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let Some(table) = self.table.as_ref() else {
            return Err(crate::error::QueryError::internal(
                "lookup used before open",
            ));
        };
        let key_value = row.get(&self.key_field.name);
        if !key_value.is_null() {
            if let Some(record) = table.get(&key_value.to_text()) {
                for output in &self.outputs {
                    if let Some(value) = record.get(&output.field) {
                        row.set(output.output_name().to_string(), value.clone());
                    }
                }
            }
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.input.close();
        self.table = None;
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ValuesOp;
    use crate::row::Value;

    fn rows(values: &[(&str, i64)]) -> Vec<Row> {
        values
            .iter()
            .map(|(k, v)| {
                Row::from_fields([
                    ("user_id", Value::Str(k.to_string())),
                    ("amount", Value::Int(*v)),
                ])
            })
            .collect()
    }

    fn users(ids: &[&str]) -> Vec<Row> {
        ids.iter()
            .map(|id| {
                Row::from_fields([
                    ("user_id", Value::Str(id.to_string())),
                    ("name", Value::Str(format!("name-{}", id))),
                ])
            })
            .collect()
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
    fn test_inner_join_emits_per_match() {
        let left = ValuesOp::new(rows(&[("a", 1), ("b", 2), ("c", 3)]));
        let right = ValuesOp::new(users(&["a", "b", "b"]));
        let mut join = JoinOp::new(
            Box::new(left),
            Box::new(right),
            JoinType::Inner,
            FieldRef::new("user_id", crate::ast::Position::none()),
        );
        let out = collect_all(&mut join);
        // a matches once, b matches twice, c drops.
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].get("name"), Value::Str("name-a".into()));
        assert_eq!(out[1].get("amount"), Value::Int(2));
        assert_eq!(out[2].get("amount"), Value::Int(2));
    }

    #[test]
    fn test_left_join_keeps_unmatched_left() {
        let left = ValuesOp::new(rows(&[("a", 1), ("x", 9)]));
        let right = ValuesOp::new(users(&["a"]));
        let mut join = JoinOp::new(
            Box::new(left),
            Box::new(right),
            JoinType::Left,
            FieldRef::new("user_id", crate::ast::Position::none()),
        );
        let out = collect_all(&mut join);
        assert_eq!(out.len(), 2);
        // The miss keeps its row with the right columns simply absent.
        assert_eq!(out[1].get("name"), Value::Null);
    }

    #[test]
    fn test_right_join_emits_unmatched_right_after_left() {
        let left = ValuesOp::new(rows(&[("a", 1)]));
        let right = ValuesOp::new(users(&["a", "z"]));
        let mut join = JoinOp::new(
            Box::new(left),
            Box::new(right),
            JoinType::Right,
            FieldRef::new("user_id", crate::ast::Position::none()),
        );
        let out = collect_all(&mut join);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].get("name"), Value::Str("name-z".into()));
        assert_eq!(out[1].get("amount"), Value::Null);
    }

    #[test]
    fn test_append_main_first_then_subsearch() {
        let main = ValuesOp::new(rows(&[("a", 1)]));
        let sub = ValuesOp::new(rows(&[("b", 2)]));
        let mut append = AppendOp::new(Box::new(main), Box::new(sub));
        let out = collect_all(&mut append);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get("user_id"), Value::Str("a".into()));
        assert_eq!(out[1].get("user_id"), Value::Str("b".into()));
    }

    #[test]
    fn test_lookup_missing_table_fails_at_open() {
        let registry = Arc::new(LookupRegistry::new());
        let mut lookup = LookupOp::new(
            Box::new(ValuesOp::new(vec![])),
            registry,
            "absent".into(),
            FieldRef::new("user_id", crate::ast::Position::none()),
            vec![LookupOutput {
                field: "name".into(),
                alias: None,
            }],
        );
        let ctx = ExecContext::default();
        assert!(matches!(
            lookup.open(&ctx),
            Err(crate::error::QueryError::TableNotFound(_))
        ));
    }
}
