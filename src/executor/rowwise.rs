//! Row-wise operators: one input row yields at most one output row (or a
//! short burst for flatten), order preserved.

use super::{drain_all, Evaluator, ExecContext, Operator};
use crate::ast::{EvalAssignment, Expr, FieldRef, LiteralValue};
use crate::error::{QueryError, Result};
use crate::row::{Row, Value};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use tracing::warn;

/// Evaluates the condition per row; rows that do not match are dropped.
pub struct FilterOp {
    input: Box<dyn Operator>,
    condition: Expr,
    evaluator: Evaluator,
    opened: bool,
}

impl FilterOp {
    pub fn new(input: Box<dyn Operator>, condition: Expr) -> Self {
        Self {
            input,
            condition,
            evaluator: Evaluator::new(),
            opened: false,
        }
    }
}

impl Operator for FilterOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        while let Some(row) = self.input.next(ctx)? {
            ctx.check()?;
            match self.evaluator.matches(&self.condition, &row) {
                Ok(true) => return Ok(Some(row)),
                Ok(false) => continue,
                Err(e) if ctx.lenient_eval => {
                    warn!(error = %e, "filter condition error demoted; row dropped");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.input.close();
        self.opened = false;
    }
}

/// Materializes the selected columns in declared order. Exclude-mode
/// keeps everything but the listed fields.
pub struct ProjectOp {
    input: Box<dyn Operator>,
    fields: Vec<String>,
    exclude: bool,
    opened: bool,
}

impl ProjectOp {
    pub fn new(input: Box<dyn Operator>, fields: Vec<String>, exclude: bool) -> Self {
        Self {
            input,
            fields,
            exclude,
            opened: false,
        }
    }
}

impl Operator for ProjectOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let mut out = Row::new();
        out.id = row.id.clone();
        out.score = row.score;
        if self.exclude {
            for name in row.field_names().map(|n| n.to_string()).collect::<Vec<_>>() {
                if !self.fields.contains(&name) {
                    out.set(name.clone(), row.get(&name));
                }
            }
        } else {
            for name in &self.fields {
                if row.contains(name) {
                    out.set(name.clone(), row.get(name));
                }
            }
        }
        Ok(Some(out))
    }

    fn close(&mut self) {
        self.input.close();
        self.opened = false;
    }
}

/// Counts down; zero is a valid edge producing no rows.
pub struct LimitOp {
    input: Box<dyn Operator>,
    remaining: u64,
    opened: bool,
}

impl LimitOp {
    pub fn new(input: Box<dyn Operator>, count: u64) -> Self {
        Self {
            input,
            remaining: count,
            opened: false,
        }
    }
}

impl Operator for LimitOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        ctx.check()?;
        match self.input.next(ctx)? {
            Some(row) => {
                self.remaining -= 1;
                Ok(Some(row))
            }
            None => {
                self.remaining = 0;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.input.close();
        self.opened = false;
    }
}

/// Applies assignments in order; each sees earlier rewrites of the same
/// row.
pub struct EvalOp {
    input: Box<dyn Operator>,
    assignments: Vec<EvalAssignment>,
    evaluator: Evaluator,
    opened: bool,
}

impl EvalOp {
    pub fn new(input: Box<dyn Operator>, assignments: Vec<EvalAssignment>) -> Self {
        Self {
            input,
            assignments,
            evaluator: Evaluator::new(),
            opened: false,
        }
    }
}

impl Operator for EvalOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        for assignment in &self.assignments {
            let value = match self.evaluator.evaluate(&assignment.expr, &row) {
                Ok(value) => value,
                Err(e) if ctx.lenient_eval => {
                    warn!(field = %assignment.field, error = %e, "eval error demoted to null");
                    Value::Null
                }
                Err(e) => return Err(e),
            };
            row.set(assignment.field.clone(), value);
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.input.close();
        self.opened = false;
    }
}

pub struct RenameOp {
    input: Box<dyn Operator>,
    pairs: Vec<(String, String)>,
    opened: bool,
}

impl RenameOp {
    pub fn new(input: Box<dyn Operator>, pairs: Vec<(String, String)>) -> Self {
        Self {
            input,
            pairs,
            opened: false,
        }
    }
}

impl Operator for RenameOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        for (source, target) in &self.pairs {
            if let Some(value) = row.remove(source) {
                row.set(target.clone(), value);
            }
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.input.close();
        self.opened = false;
    }
}

/// Whole-value substitution in the listed fields.
pub struct ReplaceOp {
    input: Box<dyn Operator>,
    from: String,
    to: String,
    fields: Vec<String>,
    opened: bool,
}

impl ReplaceOp {
    pub fn new(
        input: Box<dyn Operator>,
        from: String,
        to: String,
        fields: Vec<String>,
    ) -> Self {
        Self {
            input,
            from,
            to,
            fields,
            opened: false,
        }
    }
}

impl Operator for ReplaceOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        for field in &self.fields {
            if row.contains(field) && row.get(field).to_text() == self.from {
                row.set(field.clone(), Value::Str(self.to.clone()));
            }
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.input.close();
        self.opened = false;
    }
}

/// Fills absent or null fields with the configured literal.
pub struct FillnullOp {
    input: Box<dyn Operator>,
    value: Value,
    fields: Vec<String>,
    opened: bool,
}

impl FillnullOp {
    pub fn new(input: Box<dyn Operator>, value: &LiteralValue, fields: Vec<String>) -> Self {
        let value = match value {
            LiteralValue::Null => Value::Null,
            LiteralValue::Bool(b) => Value::Bool(*b),
            LiteralValue::Int(i) => Value::Int(*i),
            LiteralValue::Float(f) => Value::Float(*f),
            LiteralValue::Str(s) => Value::Str(s.clone()),
        };
        Self {
            input,
            value,
            fields,
            opened: false,
        }
    }
}

impl Operator for FillnullOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        for field in &self.fields {
            if row.get(field).is_null() {
                row.set(field.clone(), self.value.clone());
            }
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.input.close();
        self.opened = false;
    }
}

/// Applies a compiled regex to the source field; matches attach their
/// named captures as string fields, misses pass the row through
/// unchanged.
pub struct RegexExtractOp {
    input: Box<dyn Operator>,
    field: FieldRef,
    pattern: String,
    compiled: Option<regex::Regex>,
    opened: bool,
}

impl RegexExtractOp {
    pub fn new(input: Box<dyn Operator>, field: FieldRef, pattern: String) -> Self {
        Self {
            input,
            field,
            pattern,
            compiled: None,
            opened: false,
        }
    }
}

impl Operator for RegexExtractOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.compiled = Some(regex::Regex::new(&self.pattern).map_err(|e| {
            QueryError::execution(format!("invalid extraction pattern: {}", e))
        })?);
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| QueryError::internal("regex extract used before open"))?;
        let (segments, index) = self.field.path();
        let text = row.get_path(&segments, index).to_text();
        if let Some(captures) = compiled.captures(&text) {
            for name in compiled.capture_names().flatten() {
                if let Some(matched) = captures.name(name) {
                    row.set(name.to_string(), Value::Str(matched.as_str().to_string()));
                }
            }
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.input.close();
        self.compiled = None;
        self.opened = false;
    }
}

/// Bucketizes a field by span, fixed bin count or auto width. Span mode
/// streams; bins/auto need the value range and buffer the input.
pub struct BinOp {
    input: Box<dyn Operator>,
    field: FieldRef,
    span_seconds: Option<i64>,
    bins: Option<u32>,
    buffered: Option<VecDeque<Row>>,
    width: Option<f64>,
    origin: f64,
    opened: bool,
}

impl BinOp {
    pub fn new(
        input: Box<dyn Operator>,
        field: FieldRef,
        span_seconds: Option<i64>,
        bins: Option<u32>,
    ) -> Self {
        Self {
            input,
            field,
            span_seconds,
            bins,
            buffered: None,
            width: None,
            origin: 0.0,
            opened: false,
        }
    }

    fn numeric_value(&self, row: &Row) -> Option<f64> {
        match row.get(&self.field.name) {
            Value::Str(s) => parse_datetime(&s).map(|ts| ts.timestamp() as f64),
            other => other.as_f64(),
        }
    }

    fn apply_bucket(&self, mut row: Row, width: f64, origin: f64) -> Row {
        let was_string = matches!(row.get(&self.field.name), Value::Str(_));
        if let Some(v) = self.numeric_value(&row) {
            let bucket = origin + ((v - origin) / width).floor() * width;
            let value = if was_string {
                match Utc.timestamp_opt(bucket as i64, 0).single() {
                    Some(ts) => Value::Str(ts.to_rfc3339()),
                    None => Value::Float(bucket),
                }
            } else if bucket.fract() == 0.0 {
                Value::Int(bucket as i64)
            } else {
                Value::Float(bucket)
            };
            row.set(self.field.name.clone(), value);
        }
        row
    }

    fn prepare_buffered(&mut self, ctx: &ExecContext) -> Result<()> {
        let rows = drain_all(self.input.as_mut(), ctx)?;
        let values: Vec<f64> = rows.iter().filter_map(|r| self.numeric_value(r)).collect();
        let (min, max) = values.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
        let range = if values.is_empty() { 0.0 } else { max - min };
        let width = match self.bins {
            Some(bins) if bins > 0 && range > 0.0 => range / bins as f64,
            // Auto: a power-of-ten width that yields around ten buckets.
            _ if range > 0.0 => 10f64.powf((range / 10.0).log10().floor()),
            _ => 1.0,
        };
        self.origin = if values.is_empty() { 0.0 } else { min };
        self.width = Some(width);
        self.buffered = Some(rows.into());
        Ok(())
    }
}

impl Operator for BinOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        if let Some(span) = self.span_seconds {
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            return Ok(Some(self.apply_bucket(row, span as f64, 0.0)));
        }
        if self.buffered.is_none() {
            self.prepare_buffered(ctx)?;
        }
        let width = self.width.unwrap_or(1.0);
        let origin = self.origin;
        let next = self.buffered.as_mut().and_then(|b| b.pop_front());
        Ok(next.map(|row| self.apply_bucket(row, width, origin)))
    }

    fn close(&mut self) {
        self.input.close();
        self.buffered = None;
        self.opened = false;
    }
}

/// One output row per element of the array field; non-array or missing
/// values pass the row through unchanged.
pub struct FlattenOp {
    input: Box<dyn Operator>,
    field: FieldRef,
    pending: VecDeque<Row>,
    opened: bool,
}

impl FlattenOp {
    pub fn new(input: Box<dyn Operator>, field: FieldRef) -> Self {
        Self {
            input,
            field,
            pending: VecDeque::new(),
            opened: false,
        }
    }
}

impl Operator for FlattenOp {
    fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.opened {
            return Ok(());
        }
        self.opened = true;
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecContext) -> Result<Option<Row>> {
        ctx.check()?;
        if let Some(row) = self.pending.pop_front() {
            return Ok(Some(row));
        }
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        match row.get(&self.field.name) {
            Value::List(items) if !items.is_empty() => {
                for item in items {
                    let mut expanded = row.clone();
                    expanded.set(self.field.name.clone(), item);
                    self.pending.push_back(expanded);
                }
                Ok(self.pending.pop_front())
            }
            _ => Ok(Some(row)),
        }
    }

    fn close(&mut self) {
        self.input.close();
        self.pending.clear();
        self.opened = false;
    }
}

/// Lenient datetime parsing for date-typed string fields.
pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        if format == "%Y-%m-%d" {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(s, format) {
                return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
            }
        }
    }
    None
}
