//! Tree-walking expression evaluator over dynamic row values.
//!
//! Null discipline: a missing field evaluates to null, null propagates
//! through arithmetic and scalar functions, and any comparison against
//! null is false rather than null. `coalesce`/`ifnull` short-circuit on
//! the first non-null argument.

use crate::ast::{BinaryOp, CaseExpr, Expr, FunctionCall, LiteralValue, UnaryOp};
use crate::error::{QueryError, Result};
use crate::row::{Row, Value};
use chrono::{DateTime, TimeZone, Utc};
use sha1::Digest;
use std::cmp::Ordering;

#[derive(Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Literal(lit) => Ok(literal_value(&lit.value)),
            Expr::Field(field) => {
                let (segments, index) = field.path();
                Ok(row.get_path(&segments, index))
            }
            Expr::Binary(bin) => self.eval_binary(bin.op, &bin.left, &bin.right, row),
            Expr::Unary(un) => {
                let operand = self.evaluate(&un.operand, row)?;
                match un.op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&operand))),
                    UnaryOp::Neg => match operand {
                        Value::Null => Ok(Value::Null),
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(QueryError::execution(format!(
                            "cannot negate {}",
                            type_name(&other)
                        ))),
                    },
                }
            }
            Expr::Call(call) => self.eval_call(call, row),
            Expr::List(list) => {
                let mut items = Vec::with_capacity(list.items.len());
                for item in &list.items {
                    items.push(self.evaluate(item, row)?);
                }
                Ok(Value::List(items))
            }
            Expr::Case(case) => self.eval_case(case, row),
        }
    }

    /// Evaluates a predicate; null and non-boolean results are false.
    pub fn matches(&self, expr: &Expr, row: &Row) -> Result<bool> {
        Ok(truthy(&self.evaluate(expr, row)?))
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr, row: &Row) -> Result<Value> {
        // Logical operators short-circuit.
        match op {
            BinaryOp::And => {
                if !self.matches(left, row)? {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(self.matches(right, row)?));
            }
            BinaryOp::Or => {
                if self.matches(left, row)? {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(self.matches(right, row)?));
            }
            _ => {}
        }

        let lhs = self.evaluate(left, row)?;
        let rhs = self.evaluate(right, row)?;

        if op.is_arithmetic() {
            return self.eval_arithmetic(op, lhs, rhs);
        }

        match op {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => {
                // Comparisons of null are false, not null.
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Bool(false));
                }
                let ord = lhs.compare(&rhs);
                let result = match op {
                    BinaryOp::Eq => ord == Ordering::Equal,
                    BinaryOp::Ne => ord != Ordering::Equal,
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    BinaryOp::Ge => ord != Ordering::Less,
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::Like => {
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Bool(false));
                }
                let pattern = like_to_regex(&rhs.to_text())?;
                Ok(Value::Bool(pattern.is_match(&lhs.to_text())))
            }
            BinaryOp::In => {
                if lhs.is_null() {
                    return Ok(Value::Bool(false));
                }
                match rhs {
                    Value::List(items) => Ok(Value::Bool(
                        items.iter().any(|i| lhs.compare(i) == Ordering::Equal),
                    )),
                    _ => Ok(Value::Bool(false)),
                }
            }
            _ => unreachable!("logical and arithmetic handled above"),
        }
    }

    fn eval_arithmetic(&self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
        if lhs.is_null() || rhs.is_null() {
            return Ok(Value::Null);
        }
        // Integer arithmetic stays integral except for division.
        if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
            match op {
                BinaryOp::Add => return Ok(Value::Int(a.wrapping_add(*b))),
                BinaryOp::Sub => return Ok(Value::Int(a.wrapping_sub(*b))),
                BinaryOp::Mul => return Ok(Value::Int(a.wrapping_mul(*b))),
                BinaryOp::Mod => {
                    if *b == 0 {
                        return Err(QueryError::execution("modulo by zero"));
                    }
                    return Ok(Value::Int(a % b));
                }
                _ => {}
            }
        }
        let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
            return Err(QueryError::execution(format!(
                "arithmetic on non-numeric values: {} {} {}",
                type_name(&lhs),
                op,
                type_name(&rhs)
            )));
        };
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return Err(QueryError::execution("division by zero"));
                }
                a / b
            }
            BinaryOp::Mod => {
                if b == 0.0 {
                    return Err(QueryError::execution("modulo by zero"));
                }
                a % b
            }
            _ => unreachable!(),
        };
        Ok(Value::Float(result))
    }

    fn eval_case(&self, case: &CaseExpr, row: &Row) -> Result<Value> {
        for when in &case.whens {
            if self.matches(&when.condition, row)? {
                return self.evaluate(&when.result, row);
            }
        }
        match &case.else_expr {
            Some(e) => self.evaluate(e, row),
            None => Ok(Value::Null),
        }
    }

    fn eval_call(&self, call: &FunctionCall, row: &Row) -> Result<Value> {
        let name = call.name.to_ascii_lowercase();
        // coalesce and friends get unevaluated arguments so they can
        // short-circuit.
        match name.as_str() {
            "coalesce" => {
                for arg in &call.args {
                    let value = self.evaluate(arg, row)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                return Ok(Value::Null);
            }
            "ifnull" => {
                let first = self.evaluate(&call.args[0], row)?;
                if !first.is_null() {
                    return Ok(first);
                }
                return self.evaluate(&call.args[1], row);
            }
            "if" => {
                return if self.matches(&call.args[0], row)? {
                    self.evaluate(&call.args[1], row)
                } else {
                    self.evaluate(&call.args[2], row)
                };
            }
            "case" => {
                // case(cond1, value1, cond2, value2, ..., [default])
                let mut i = 0;
                while i + 1 < call.args.len() {
                    if self.matches(&call.args[i], row)? {
                        return self.evaluate(&call.args[i + 1], row);
                    }
                    i += 2;
                }
                if call.args.len() % 2 == 1 {
                    return self.evaluate(call.args.last().unwrap(), row);
                }
                return Ok(Value::Null);
            }
            "validate" => {
                // validate(cond1, message1, ...): first failing condition's
                // message, else null.
                let mut i = 0;
                while i + 1 < call.args.len() {
                    if !self.matches(&call.args[i], row)? {
                        return self.evaluate(&call.args[i + 1], row);
                    }
                    i += 2;
                }
                return Ok(Value::Null);
            }
            _ => {}
        }

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.evaluate(arg, row)?);
        }
        scalar_function(&name, &args)
    }
}

fn literal_value(value: &LiteralValue) -> Value {
    match value {
        LiteralValue::Null => Value::Null,
        LiteralValue::Bool(b) => Value::Bool(*b),
        LiteralValue::Int(i) => Value::Int(*i),
        LiteralValue::Float(f) => Value::Float(*f),
        LiteralValue::Str(s) => Value::Str(s.clone()),
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Str(_) => "string",
        Value::List(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Translates a SQL LIKE pattern (`%`, `_`) into an anchored regex.
fn like_to_regex(pattern: &str) -> Result<regex::Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    regex::Regex::new(&out)
        .map_err(|e| QueryError::execution(format!("invalid LIKE pattern: {}", e)))
}

fn need_number(name: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Null => Err(QueryError::execution(format!("{}: argument is null", name))),
        other => other.as_f64().ok_or_else(|| {
            QueryError::execution(format!("{}: expected a number, got {}", name, type_name(other)))
        }),
    }
}

fn need_string(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Err(QueryError::execution(format!("{}: argument is null", name))),
        other => Ok(other.to_text()),
    }
}

/// Built-in scalar function dispatch over evaluated arguments. Null
/// arguments make most functions return null.
fn scalar_function(name: &str, args: &[Value]) -> Result<Value> {
    // Null propagation for the plain value-to-value functions.
    let null_propagates = !matches!(name, "isnull" | "isnotnull" | "typeof" | "tostring" | "nullif");
    if null_propagates && args.iter().any(|a| a.is_null()) {
        return Ok(Value::Null);
    }

    match name {
        // math
        "abs" => match &args[0] {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            other => Ok(Value::Float(need_number("abs", other)?.abs())),
        },
        "ceil" | "ceiling" => Ok(Value::Int(need_number("ceil", &args[0])?.ceil() as i64)),
        "floor" => Ok(Value::Int(need_number("floor", &args[0])?.floor() as i64)),
        "round" => {
            let x = need_number("round", &args[0])?;
            let digits = args
                .get(1)
                .map(|d| need_number("round", d))
                .transpose()?
                .unwrap_or(0.0) as i32;
            let scale = 10f64.powi(digits);
            Ok(Value::Float((x * scale).round() / scale))
        }
        "sqrt" => {
            let x = need_number("sqrt", &args[0])?;
            if x < 0.0 {
                return Err(QueryError::execution("sqrt of a negative number"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        "pow" | "power" => Ok(Value::Float(
            need_number("pow", &args[0])?.powf(need_number("pow", &args[1])?),
        )),
        "exp" => Ok(Value::Float(need_number("exp", &args[0])?.exp())),
        "ln" => {
            let x = need_number("ln", &args[0])?;
            if x <= 0.0 {
                return Err(QueryError::execution("ln of a non-positive number"));
            }
            Ok(Value::Float(x.ln()))
        }
        "log" => {
            let x = need_number("log", &args[0])?;
            let base = args
                .get(1)
                .map(|b| need_number("log", b))
                .transpose()?
                .unwrap_or(10.0);
            if x <= 0.0 || base <= 0.0 {
                return Err(QueryError::execution("log of a non-positive number"));
            }
            Ok(Value::Float(x.log(base)))
        }
        "mod" => {
            let b = need_number("mod", &args[1])?;
            if b == 0.0 {
                return Err(QueryError::execution("modulo by zero"));
            }
            Ok(Value::Float(need_number("mod", &args[0])? % b))
        }
        "sign" => {
            let x = need_number("sign", &args[0])?;
            Ok(Value::Int(if x > 0.0 {
                1
            } else if x < 0.0 {
                -1
            } else {
                0
            }))
        }

        // string
        "lower" => Ok(Value::Str(need_string("lower", &args[0])?.to_lowercase())),
        "upper" => Ok(Value::Str(need_string("upper", &args[0])?.to_uppercase())),
        "length" | "len" => Ok(Value::Int(
            need_string("length", &args[0])?.chars().count() as i64
        )),
        "substr" | "substring" => {
            let s = need_string("substr", &args[0])?;
            let chars: Vec<char> = s.chars().collect();
            // 1-based start position.
            let start = (need_number("substr", &args[1])? as i64 - 1).max(0) as usize;
            let len = args
                .get(2)
                .map(|l| need_number("substr", l))
                .transpose()?
                .map(|l| l.max(0.0) as usize)
                .unwrap_or(usize::MAX);
            let taken: String = chars.into_iter().skip(start).take(len).collect();
            Ok(Value::Str(taken))
        }
        "trim" => Ok(Value::Str(need_string("trim", &args[0])?.trim().to_string())),
        "ltrim" => Ok(Value::Str(
            need_string("ltrim", &args[0])?.trim_start().to_string(),
        )),
        "rtrim" => Ok(Value::Str(
            need_string("rtrim", &args[0])?.trim_end().to_string(),
        )),
        "concat" => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&arg.to_text());
            }
            Ok(Value::Str(out))
        }
        "replace" => Ok(Value::Str(need_string("replace", &args[0])?.replace(
            &need_string("replace", &args[1])?,
            &need_string("replace", &args[2])?,
        ))),
        "split" => {
            let s = need_string("split", &args[0])?;
            let sep = need_string("split", &args[1])?;
            Ok(Value::List(
                s.split(sep.as_str())
                    .map(|part| Value::Str(part.to_string()))
                    .collect(),
            ))
        }
        "reverse_str" => Ok(Value::Str(
            need_string("reverse_str", &args[0])?.chars().rev().collect(),
        )),
        "contains_str" => Ok(Value::Bool(
            need_string("contains_str", &args[0])?
                .contains(&need_string("contains_str", &args[1])?),
        )),

        // date
        "strftime" => {
            let epoch = need_number("strftime", &args[0])? as i64;
            let format = need_string("strftime", &args[1])?;
            let ts: DateTime<Utc> = Utc
                .timestamp_opt(epoch, 0)
                .single()
                .ok_or_else(|| QueryError::execution("strftime: epoch out of range"))?;
            Ok(Value::Str(ts.format(&format).to_string()))
        }
        "relative_time" => {
            let epoch = need_number("relative_time", &args[0])? as i64;
            let modifier = need_string("relative_time", &args[1])?;
            Ok(Value::Int(apply_relative_time(epoch, &modifier)?))
        }
        "date_trunc" => {
            let unit = need_string("date_trunc", &args[0])?;
            let epoch = need_number("date_trunc", &args[1])? as i64;
            let truncated = match unit.as_str() {
                "second" => epoch,
                "minute" => epoch - epoch.rem_euclid(60),
                "hour" => epoch - epoch.rem_euclid(3600),
                "day" => epoch - epoch.rem_euclid(86_400),
                "week" => epoch - epoch.rem_euclid(604_800),
                other => {
                    return Err(QueryError::execution(format!(
                        "date_trunc: unknown unit {}",
                        other
                    )))
                }
            };
            Ok(Value::Int(truncated))
        }

        // type
        "tostring" => Ok(Value::Str(args[0].to_text())),
        "tonumber" => match &args[0] {
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::Str(s) => match s.trim().parse::<f64>() {
                Ok(f) => Ok(Value::Float(f)),
                Err(_) => Ok(Value::Null),
            },
            _ => Ok(Value::Null),
        },
        "toint" => match &args[0] {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Float(f) => Ok(Value::Int(*f as i64)),
            Value::Str(s) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Value::Int(i)),
                Err(_) => Ok(Value::Null),
            },
            _ => Ok(Value::Null),
        },
        "typeof" => Ok(Value::Str(type_name(&args[0]).to_string())),
        "isnull" => Ok(Value::Bool(args[0].is_null())),
        "isnotnull" => Ok(Value::Bool(!args[0].is_null())),
        "nullif" => {
            if args[0].compare(&args[1]) == Ordering::Equal {
                Ok(Value::Null)
            } else {
                Ok(args[0].clone())
            }
        }

        // relevance: backend-only primitives
        "match" | "match_phrase" | "query_string" => Err(QueryError::execution(format!(
            "{} requires the search backend and cannot run on the coordinator",
            name
        ))),

        // crypto
        "sha1" => {
            let mut hasher = sha1::Sha1::new();
            hasher.update(need_string("sha1", &args[0])?.as_bytes());
            Ok(Value::Str(hex::encode(hasher.finalize())))
        }
        "sha256" => {
            let mut hasher = sha2::Sha256::new();
            hasher.update(need_string("sha256", &args[0])?.as_bytes());
            Ok(Value::Str(hex::encode(hasher.finalize())))
        }

        // ip
        "is_ipv4" => Ok(Value::Bool(
            need_string("is_ipv4", &args[0])?.parse::<std::net::Ipv4Addr>().is_ok(),
        )),
        "is_ipv6" => Ok(Value::Bool(
            need_string("is_ipv6", &args[0])?.parse::<std::net::Ipv6Addr>().is_ok(),
        )),
        "cidrmatch" => {
            let cidr = need_string("cidrmatch", &args[0])?;
            let ip = need_string("cidrmatch", &args[1])?;
            Ok(Value::Bool(cidr_match(&cidr, &ip)?))
        }

        // json
        "json_valid" => Ok(Value::Bool(
            serde_json::from_str::<serde_json::Value>(&need_string("json_valid", &args[0])?)
                .is_ok(),
        )),
        "json_extract" => {
            let text = need_string("json_extract", &args[0])?;
            let path = need_string("json_extract", &args[1])?;
            let parsed: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| QueryError::execution(format!("json_extract: {}", e)))?;
            let mut current = &parsed;
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                current = match segment.parse::<usize>() {
                    Ok(index) => current.get(index),
                    Err(_) => current.get(segment),
                }
                .unwrap_or(&serde_json::Value::Null);
            }
            Ok(Value::from_json(current.clone()))
        }
        "json_array_length" => {
            let parsed: serde_json::Value =
                serde_json::from_str(&need_string("json_array_length", &args[0])?)
                    .map_err(|e| QueryError::execution(format!("json_array_length: {}", e)))?;
            match parsed.as_array() {
                Some(items) => Ok(Value::Int(items.len() as i64)),
                None => Ok(Value::Null),
            }
        }

        // system
        "now" => Ok(Value::Int(Utc::now().timestamp())),
        "rand" => {
            let max = args
                .first()
                .map(|m| need_number("rand", m))
                .transpose()?;
            match max {
                Some(max) if max > 0.0 => {
                    Ok(Value::Float(rand::random::<f64>() * max))
                }
                _ => Ok(Value::Float(rand::random::<f64>())),
            }
        }

        other => Err(QueryError::execution(format!("unknown function: {}", other))),
    }
}

/// `relative_time(epoch, "-1h")`-style modifiers: a signed count and a
/// unit suffix.
fn apply_relative_time(epoch: i64, modifier: &str) -> Result<i64> {
    let trimmed = modifier.trim();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let unit = &rest[digits.len()..];
    let count: i64 = digits
        .parse()
        .map_err(|_| QueryError::execution(format!("relative_time: bad modifier {}", modifier)))?;
    let seconds = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "w" => 604_800,
        "mon" => 2_592_000,
        other => {
            return Err(QueryError::execution(format!(
                "relative_time: unknown unit {}",
                other
            )))
        }
    };
    Ok(epoch + sign * count * seconds)
}

fn cidr_match(cidr: &str, ip: &str) -> Result<bool> {
    let (network, bits) = cidr
        .split_once('/')
        .ok_or_else(|| QueryError::execution(format!("cidrmatch: bad CIDR {}", cidr)))?;
    let bits: u32 = bits
        .parse()
        .map_err(|_| QueryError::execution(format!("cidrmatch: bad prefix length in {}", cidr)))?;
    let network: std::net::Ipv4Addr = network
        .parse()
        .map_err(|_| QueryError::execution(format!("cidrmatch: bad network in {}", cidr)))?;
    let Ok(ip) = ip.parse::<std::net::Ipv4Addr>() else {
        return Ok(false);
    };
    if bits > 32 {
        return Err(QueryError::execution(format!(
            "cidrmatch: prefix length {} out of range",
            bits
        )));
    }
    let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
    Ok((u32::from(network) & mask) == (u32::from(ip) & mask))
}
