//! Grouped aggregation and the accumulator states shared with the
//! eventstats/streamstats operators.

use super::{Evaluator, ExecContext, Operator};
use crate::ast::{Aggregation, FieldRef};
use crate::error::Result;
use crate::physical::AggregateAlgorithm;
use crate::row::{Row, Value};
use std::collections::{HashMap, HashSet, VecDeque};

/// Per-group running state for one aggregation.
#[derive(Debug, Clone)]
pub(crate) enum AggState {
    Count(u64),
    Sum { total: f64, seen: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Distinct(HashSet<String>),
    Values { items: Vec<Value>, seen: HashSet<String> },
    Earliest(Option<Value>),
    Latest(Option<Value>),
    /// Welford accumulator; `sample` picks stdev vs var at finish.
    Moments { count: u64, mean: f64, m2: f64, stdev: bool },
    Percentile { p: f64, samples: Vec<f64> },
}

#[derive(Debug, Clone)]
pub(crate) struct AggAccumulator {
    spec: Aggregation,
    state: AggState,
}

impl AggAccumulator {
    pub(crate) fn new(spec: &Aggregation) -> Self {
        let func = spec.func.to_ascii_lowercase();
        let state = match func.as_str() {
            "count" | "c" if spec.distinct => AggState::Distinct(HashSet::new()),
            "count" | "c" => AggState::Count(0),
            "sum" => AggState::Sum {
                total: 0.0,
                seen: false,
            },
            "avg" | "mean" => AggState::Avg {
                total: 0.0,
                count: 0,
            },
            "min" => AggState::Min(None),
            "max" => AggState::Max(None),
            "dc" | "distinct_count" => AggState::Distinct(HashSet::new()),
            "values" => AggState::Values {
                items: Vec::new(),
                seen: HashSet::new(),
            },
            "earliest" => AggState::Earliest(None),
            "latest" => AggState::Latest(None),
            "stdev" | "stddev" => AggState::Moments {
                count: 0,
                mean: 0.0,
                m2: 0.0,
                stdev: true,
            },
            "var" | "variance" => AggState::Moments {
                count: 0,
                mean: 0.0,
                m2: 0.0,
                stdev: false,
            },
            "percentile" | "perc" => {
                let p = spec
                    .args
                    .get(1)
                    .and_then(|a| a.as_literal())
                    .and_then(|l| match l {
                        crate::ast::LiteralValue::Int(i) => Some(*i as f64),
                        crate::ast::LiteralValue::Float(f) => Some(*f),
                        _ => None,
                    })
                    .unwrap_or(50.0);
                AggState::Percentile {
                    p,
                    samples: Vec::new(),
                }
            }
            // Unknown functions were rejected by the analyzer.
            _ => AggState::Count(0),
        };
        Self {
            spec: spec.clone(),
            state,
        }
    }

    pub(crate) fn output_name(&self) -> String {
        self.spec.output_name()
    }

    pub(crate) fn update(&mut self, row: &Row, evaluator: &Evaluator) -> Result<()> {
        let arg = match self.spec.args.first() {
            Some(expr) => Some(evaluator.evaluate(expr, row)?),
            None => None,
        };
        match &mut self.state {
            AggState::Count(count) => {
                // count() counts rows; count(field) counts non-null values.
                if arg.map(|v| !v.is_null()).unwrap_or(true) {
                    *count += 1;
                }
            }
            AggState::Sum { total, seen } => {
                if let Some(v) = arg.and_then(|v| v.as_f64()) {
                    *total += v;
                    *seen = true;
                }
            }
            AggState::Avg { total, count } => {
                if let Some(v) = arg.and_then(|v| v.as_f64()) {
                    *total += v;
                    *count += 1;
                }
            }
            AggState::Min(current) => {
                if let Some(v) = arg.filter(|v| !v.is_null()) {
                    let replace = current
                        .as_ref()
                        .map(|c| v.compare(c) == std::cmp::Ordering::Less)
                        .unwrap_or(true);
                    if replace {
                        *current = Some(v);
                    }
                }
            }
            AggState::Max(current) => {
                if let Some(v) = arg.filter(|v| !v.is_null()) {
                    let replace = current
                        .as_ref()
                        .map(|c| v.compare(c) == std::cmp::Ordering::Greater)
                        .unwrap_or(true);
                    if replace {
                        *current = Some(v);
                    }
                }
            }
            AggState::Distinct(set) => {
                if let Some(v) = arg.filter(|v| !v.is_null()) {
                    set.insert(v.key_repr());
                }
            }
            AggState::Values { items, seen } => {
                if let Some(v) = arg.filter(|v| !v.is_null()) {
                    if seen.insert(v.key_repr()) {
                        items.push(v);
                    }
                }
            }
            AggState::Earliest(slot) => {
                if slot.is_none() {
                    if let Some(v) = arg.filter(|v| !v.is_null()) {
                        *slot = Some(v);
                    }
                }
            }
            AggState::Latest(slot) => {
                if let Some(v) = arg.filter(|v| !v.is_null()) {
                    *slot = Some(v);
                }
            }
            AggState::Moments {
                count, mean, m2, ..
            } => {
                if let Some(v) = arg.and_then(|v| v.as_f64()) {
                    *count += 1;
                    let delta = v - *mean;
                    *mean += delta / *count as f64;
                    *m2 += delta * (v - *mean);
                }
            }
            AggState::Percentile { samples, .. } => {
                if let Some(v) = arg.and_then(|v| v.as_f64()) {
                    samples.push(v);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn finish(&self) -> Value {
        match &self.state {
            AggState::Count(count) => Value::Int(*count as i64),
            AggState::Sum { total, seen } => {
                if *seen {
                    Value::Float(*total)
                } else {
                    Value::Null
                }
            }
            AggState::Avg { total, count } => {
                if *count > 0 {
                    Value::Float(*total / *count as f64)
                } else {
                    Value::Null
                }
            }
            AggState::Min(v) | AggState::Max(v) => v.clone().unwrap_or(Value::Null),
            AggState::Distinct(set) => Value::Int(set.len() as i64),
            AggState::Values { items, .. } => Value::List(items.clone()),
            AggState::Earliest(v) | AggState::Latest(v) => v.clone().unwrap_or(Value::Null),
            AggState::Moments {
                count,
                m2,
                stdev,
                ..
            } => {
                if *count < 2 {
                    return Value::Null;
                }
                let variance = *m2 / (*count - 1) as f64;
                Value::Float(if *stdev { variance.sqrt() } else { variance })
            }
            AggState::Percentile { p, samples } => {
                if samples.is_empty() {
                    return Value::Null;
                }
                let mut sorted = samples.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
                Value::Float(sorted[rank.clamp(1, sorted.len()) - 1])
            }
        }
    }
}

pub(crate) fn key_tuple(keys: &[FieldRef], row: &Row) -> Vec<Value> {
    keys.iter().map(|k| row.get(&k.name)).collect()
}

pub(crate) fn tuple_repr(tuple: &[Value]) -> String {
    tuple
        .iter()
        .map(|v| v.key_repr())
        .collect::<Vec<_>>()
        .join("\u{1}")
}

struct Group {
    key: Vec<Value>,
    accumulators: Vec<AggAccumulator>,
}

/// Collapsing grouped aggregation. The hash algorithm buffers group
/// states keyed by the group tuple; the stream algorithm assumes equal
/// keys arrive adjacent and emits each group as it completes.
pub struct AggregateOp {
    input: Box<dyn Operator>,
    keys: Vec<FieldRef>,
    aggregations: Vec<Aggregation>,
    algorithm: AggregateAlgorithm,
    evaluator: Evaluator,
    // hash state
    flushed: Option<VecDeque<Row>>,
    // stream state
    current: Option<Group>,
    input_done: bool,
    opened: bool,
}

impl AggregateOp {
    pub fn new(
        input: Box<dyn Operator>,
        keys: Vec<FieldRef>,
        aggregations: Vec<Aggregation>,
        algorithm: AggregateAlgorithm,
    ) -> Self {
        Self {
            input,
            keys,
            aggregations,
            algorithm,
            evaluator: Evaluator::new(),
            flushed: None,
            current: None,
            input_done: false,
            opened: false,
        }
    }

    fn new_accumulators(&self) -> Vec<AggAccumulator> {
        self.aggregations.iter().map(AggAccumulator::new).collect()
    }

    fn group_row(&self, group: &Group) -> Row {
        let mut row = Row::new();
        for (field, value) in self.keys.iter().zip(group.key.iter()) {
            row.set(field.name.clone(), value.clone());
        }
        for acc in &group.accumulators {
            row.set(acc.output_name(), acc.finish());
        }
        row
    }

    fn run_hash(&mut self, ctx: &ExecContext) -> Result<()> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Group> = HashMap::new();
        while let Some(row) = self.input.next(ctx)? {
            ctx.check()?;
            let key = key_tuple(&self.keys, &row);
            let repr = tuple_repr(&key);
            let group = match groups.entry(repr.clone()) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    order.push(repr);
                    ctx.charge_rows(order.len())?;
                    e.insert(Group {
                        key,
                        accumulators: self.new_accumulators(),
                    })
                }
            };
            for acc in &mut group.accumulators {
                acc.update(&row, &self.evaluator)?;
            }
        }
        // No group-by: exactly one row, even over empty input.
        if self.keys.is_empty() && groups.is_empty() {
            let group = Group {
                key: Vec::new(),
                accumulators: self.new_accumulators(),
            };
            self.flushed = Some(VecDeque::from([self.group_row(&group)]));
            return Ok(());
        }
        let mut out = VecDeque::with_capacity(order.len());
        for repr in order {
            if let Some(group) = groups.get(&repr) {
                out.push_back(self.group_row(group));
            }
        }
        self.flushed = Some(out);
        Ok(())
    }

    fn next_stream(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        if self.input_done {
            return Ok(self.current.take().map(|g| self.group_row(&g)));
        }
        loop {
            ctx.check()?;
            match self.input.next(ctx)? {
                Some(row) => {
                    let key = key_tuple(&self.keys, &row);
                    let same_group = self
                        .current
                        .as_ref()
                        .map(|g| tuple_repr(&g.key) == tuple_repr(&key))
                        .unwrap_or(false);
                    if same_group {
                        let group = self.current.as_mut().unwrap();
                        for acc in &mut group.accumulators {
                            acc.update(&row, &self.evaluator)?;
                        }
                        continue;
                    }
                    let done = self.current.take();
                    let mut fresh = Group {
                        key,
                        accumulators: self.new_accumulators(),
                    };
                    for acc in &mut fresh.accumulators {
                        acc.update(&row, &self.evaluator)?;
                    }
                    self.current = Some(fresh);
                    if let Some(done) = done {
                        return Ok(Some(self.group_row(&done)));
                    }
                }
                None => {
                    self.input_done = true;
                    if self.current.is_none() && self.keys.is_empty() {
                        let group = Group {
                            key: Vec::new(),
                            accumulators: self.new_accumulators(),
                        };
                        return Ok(Some(self.group_row(&group)));
                    }
                    return Ok(self.current.take().map(|g| self.group_row(&g)));
                }
            }
        }
    }
}

impl Operator for AggregateOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        match self.algorithm {
            AggregateAlgorithm::Hash => {
                if self.flushed.is_none() {
                    self.run_hash(ctx)?;
                }
                Ok(self.flushed.as_mut().and_then(|f| f.pop_front()))
            }
            AggregateAlgorithm::Stream => self.next_stream(ctx),
        }
    }

    fn close(&mut self) {
        self.input.close();
        self.flushed = None;
        self.current = None;
        self.opened = false;
    }
}
