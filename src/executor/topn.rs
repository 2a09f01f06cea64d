//! Dedup and top/rare frequency ranking.

use super::aggregate::{key_tuple, tuple_repr};
use super::sort::compare_typed;
use super::{drain_all, Evaluator, ExecContext, Operator};
use crate::ast::{FieldRef, SortKey};
use crate::error::Result;
use crate::physical::TopNAlgorithm;
use crate::row::{Row, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

/// Keeps the first N occurrences per distinct key tuple.
/// `consecutive=true` restricts deduplication to runs and only remembers
/// the previous key; a sort-by option orders the input first.
pub struct DedupOp {
    input: Box<dyn Operator>,
    count: u64,
    fields: Vec<FieldRef>,
    consecutive: bool,
    sort_by: Vec<SortKey>,
    seen: HashMap<String, u64>,
    previous: Option<(String, u64)>,
    sorted: Option<VecDeque<Row>>,
    opened: bool,
}

impl DedupOp {
    pub fn new(
        input: Box<dyn Operator>,
        count: u64,
        fields: Vec<FieldRef>,
        consecutive: bool,
        sort_by: Vec<SortKey>,
    ) -> Self {
        Self {
            input,
            count: count.max(1),
            fields,
            consecutive,
            sort_by,
            seen: HashMap::new(),
            previous: None,
            sorted: None,
            opened: false,
        }
    }

    fn pull(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        if !self.sort_by.is_empty() {
            if self.sorted.is_none() {
                let rows = drain_all(self.input.as_mut(), ctx)?;
                let evaluator = Evaluator::new();
                let mut keyed: Vec<(Vec<Value>, Row)> = rows
                    .into_iter()
                    .map(|row| {
                        let tuple = self
                            .sort_by
                            .iter()
                            .map(|k| evaluator.evaluate(&k.expr, &row).unwrap_or(Value::Null))
                            .collect();
                        (tuple, row)
                    })
                    .collect();
                let keys = self.sort_by.clone();
                keyed.sort_by(|(a, _), (b, _)| {
                    for (i, key) in keys.iter().enumerate() {
                        let ord = compare_typed(None, &a[i], &b[i]);
                        let ord = if key.descending { ord.reverse() } else { ord };
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    Ordering::Equal
                });
                self.sorted = Some(keyed.into_iter().map(|(_, row)| row).collect());
            }
            return Ok(self.sorted.as_mut().and_then(|s| s.pop_front()));
        }
        self.input.next(ctx)
    }
}

impl Operator for DedupOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        loop {
            ctx.check()?;
            let Some(row) = self.pull(ctx)? else {
                return Ok(None);
            };
            let key = tuple_repr(&key_tuple(&self.fields, &row));
            let occurrence = if self.consecutive {
                let same_run = self
                    .previous
                    .as_ref()
                    .map(|(prev_key, _)| *prev_key == key)
                    .unwrap_or(false);
                if same_run {
                    let slot = self.previous.as_mut().unwrap();
                    slot.1 += 1;
                    slot.1
                } else {
                    self.previous = Some((key, 1));
                    1
                }
            } else {
                let count = {
                    let counter = self.seen.entry(key).or_insert(0);
                    *counter += 1;
                    *counter
                };
                ctx.charge_rows(self.seen.len())?;
                count
            };
            if occurrence <= self.count {
                return Ok(Some(row));
            }
        }
    }

    fn close(&mut self) {
        self.input.close();
        self.seen.clear();
        self.previous = None;
        self.sorted = None;
        self.opened = false;
    }
}

/// Counts key-tuple occurrences and emits the N most (or least) frequent,
/// ties broken by first arrival. An optional group-by partitions the
/// ranking. The bounded-heap variant is reserved for cardinality hints;
/// hash counting is the default and the shipped algorithm.
pub struct TopNOp {
    input: Box<dyn Operator>,
    count: u64,
    fields: Vec<FieldRef>,
    by: Vec<FieldRef>,
    rare: bool,
    #[allow(dead_code)]
    algorithm: TopNAlgorithm,
    flushed: Option<VecDeque<Row>>,
    opened: bool,
}

impl TopNOp {
    pub fn new(
        input: Box<dyn Operator>,
        count: u64,
        fields: Vec<FieldRef>,
        by: Vec<FieldRef>,
        rare: bool,
        algorithm: TopNAlgorithm,
    ) -> Self {
        Self {
            input,
            count,
            fields,
            by,
            rare,
            algorithm,
            flushed: None,
            opened: false,
        }
    }

    fn run(&mut self, ctx: &ExecContext) -> Result<()> {
        // partition repr -> (partition key values, value repr -> counter
        // index), counters ordered by first arrival.
        struct Partition {
            by_values: Vec<Value>,
            index: HashMap<String, usize>,
            counters: Vec<(Vec<Value>, u64)>,
        }
        let mut partition_order: Vec<String> = Vec::new();
        let mut partitions: HashMap<String, Partition> = HashMap::new();

        while let Some(row) = self.input.next(ctx)? {
            ctx.check()?;
            let by_values = key_tuple(&self.by, &row);
            let partition_key = tuple_repr(&by_values);
            let partition = match partitions.entry(partition_key.clone()) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    partition_order.push(partition_key);
                    e.insert(Partition {
                        by_values,
                        index: HashMap::new(),
                        counters: Vec::new(),
                    })
                }
            };
            let values = key_tuple(&self.fields, &row);
            let repr = tuple_repr(&values);
            match partition.index.get(&repr) {
                Some(&i) => partition.counters[i].1 += 1,
                None => {
                    partition.index.insert(repr, partition.counters.len());
                    partition.counters.push((values, 1));
                    ctx.charge_rows(partition.counters.len())?;
                }
            }
        }

        let mut out = VecDeque::new();
        for partition_key in partition_order {
            let partition = &partitions[&partition_key];
            // Stable sort keeps insertion order among equal counts.
            let mut ranked: Vec<&(Vec<Value>, u64)> = partition.counters.iter().collect();
            if self.rare {
                ranked.sort_by_key(|(_, count)| *count);
            } else {
                ranked.sort_by(|(_, a), (_, b)| b.cmp(a));
            }
            for (values, count) in ranked.into_iter().take(self.count as usize) {
                let mut row = Row::new();
                for (field, value) in self.by.iter().zip(partition.by_values.iter()) {
                    row.set(field.name.clone(), value.clone());
                }
                for (field, value) in self.fields.iter().zip(values.iter()) {
                    row.set(field.name.clone(), value.clone());
                }
                row.set("count", Value::Int(*count as i64));
                out.push_back(row);
            }
        }
        self.flushed = Some(out);
        Ok(())
    }
}

impl Operator for TopNOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        if self.flushed.is_none() {
            self.run(ctx)?;
        }
        Ok(self.flushed.as_mut().and_then(|f| f.pop_front()))
    }

    fn close(&mut self) {
        self.input.close();
        self.flushed = None;
        self.opened = false;
    }
}
