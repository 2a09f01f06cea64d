//! Dynamic row values flowing through the iterator pipeline.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Dynamically typed cell value. Missing fields evaluate to `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    /// Numeric view. Bools do not coerce; strings do not coerce here
    /// (explicit `tonumber` exists for that).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// String form used for lookup keys, group keys and replace matching.
    /// Null renders empty; lists and objects render as JSON.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Canonical representation for hashing group tuples; distinguishes
    /// kinds so `1` and `"1"` land in different groups.
    pub fn key_repr(&self) -> String {
        match self {
            Value::Null => "\u{0}n".to_string(),
            Value::Bool(b) => format!("\u{0}b{}", b),
            Value::Int(i) => format!("\u{0}i{}", i),
            Value::Float(f) => format!("\u{0}f{}", f),
            Value::Str(s) => format!("\u{0}s{}", s),
            Value::List(_) | Value::Object(_) => format!("\u{0}j{}", self.to_text()),
        }
    }

    /// Total order used by sort and top/rare tie-handling: numerics
    /// compare numerically, strings byte-lexicographically, mixed kinds by
    /// tag rank with nulls first.
    pub fn compare(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => self.tag_rank().cmp(&other.tag_rank()),
            },
        }
    }

    fn tag_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::List(_) => 4,
            Value::Object(_) => 5,
        }
    }

    pub fn from_json(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// One event flowing through the pipeline. The hit id and relevance score
/// are auxiliary attributes surfaced alongside the field map; operators
/// that derive columns build a new row rather than mutating a shared one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub id: String,
    pub score: f64,
    fields: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self {
            id: String::new(),
            score: 0.0,
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Flat field access; absent fields are null.
    pub fn get(&self, name: &str) -> Value {
        self.fields.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn get_ref(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Dotted-path access with an optional trailing array subscript.
    /// Prefers a flat field spelled with the full dotted name, then walks
    /// nested objects. Missing anything along the way yields null.
    pub fn get_path(&self, segments: &[&str], index: Option<usize>) -> Value {
        let full = segments.join(".");
        let base = if let Some(v) = self.fields.get(&full) {
            v.clone()
        } else {
            let mut current = match segments.first().and_then(|s| self.fields.get(*s)) {
                Some(v) => v.clone(),
                None => return Value::Null,
            };
            for seg in &segments[1..] {
                current = match current {
                    Value::Object(ref map) => match map.get(*seg) {
                        Some(v) => v.clone(),
                        None => return Value::Null,
                    },
                    _ => return Value::Null,
                };
            }
            current
        };
        match index {
            None => base,
            Some(i) => match base {
                Value::List(items) => items.get(i).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            },
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    /// Rough memory footprint used by the executor's memory accounting.
    pub fn approx_size(&self) -> usize {
        let mut size = std::mem::size_of::<Row>() + self.id.len();
        for (k, v) in &self.fields {
            size += k.len() + value_size(v);
        }
        size
    }
}

fn value_size(v: &Value) -> usize {
    match v {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => 16,
        Value::Str(s) => 24 + s.len(),
        Value::List(items) => 24 + items.iter().map(value_size).sum::<usize>(),
        Value::Object(map) => {
            24 + map
                .iter()
                .map(|(k, v)| k.len() + value_size(v))
                .sum::<usize>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_is_null() {
        let row = Row::from_fields([("a", Value::Int(1))]);
        assert_eq!(row.get("a"), Value::Int(1));
        assert_eq!(row.get("b"), Value::Null);
    }

    #[test]
    fn test_path_access_nested() {
        let mut inner = BTreeMap::new();
        inner.insert("host".to_string(), Value::Str("web1".into()));
        let row = Row::from_fields([("request", Value::Object(inner))]);
        assert_eq!(
            row.get_path(&["request", "host"], None),
            Value::Str("web1".into())
        );
        assert_eq!(row.get_path(&["request", "missing"], None), Value::Null);
    }

    #[test]
    fn test_path_access_subscript() {
        let row = Row::from_fields([(
            "tags",
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]),
        )]);
        assert_eq!(row.get_path(&["tags"], Some(1)), Value::Str("b".into()));
        assert_eq!(row.get_path(&["tags"], Some(9)), Value::Null);
    }

    #[test]
    fn test_flat_dotted_name_preferred() {
        let row = Row::from_fields([("geo.country", Value::Str("NO".into()))]);
        assert_eq!(
            row.get_path(&["geo", "country"], None),
            Value::Str("NO".into())
        );
    }

    #[test]
    fn test_value_compare_numeric_and_string() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(
            Value::Str("b".into()).compare(&Value::Str("a".into())),
            Ordering::Greater
        );
        assert_eq!(Value::Null.compare(&Value::Int(0)), Ordering::Less);
    }

    #[test]
    fn test_key_repr_distinguishes_kinds() {
        assert_ne!(Value::Int(1).key_repr(), Value::Str("1".into()).key_repr());
    }

    #[test]
    fn test_from_json_round_trip() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": [true, null], "c": "x"}"#).unwrap();
        let v = Value::from_json(json.clone());
        assert_eq!(v.to_json(), json);
    }
}
