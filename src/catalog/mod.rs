//! Dataset field catalogs and the schema type threaded through analysis
//! and planning.

use crate::ast::Position;
use crate::error::{QueryError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Declared kind of a dataset field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Int,
    Long,
    Double,
    Bool,
    Date,
    Text,
    Array,
    Object,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Long => "long",
            FieldKind::Double => "double",
            FieldKind::Bool => "bool",
            FieldKind::Date => "date",
            FieldKind::Text => "text",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldKind::Int | FieldKind::Long | FieldKind::Double | FieldKind::Date
        )
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Text)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered mapping from unique field name to kind. Mutated only while
/// the analyzer builds it; plan nodes share it read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, FieldKind)>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        let mut schema = Self::new();
        for (name, kind) in fields {
            // Last declaration wins when building from a raw list.
            schema.set_field(name.into(), kind);
        }
        schema
    }

    /// Adds a field; duplicate names are rejected.
    pub fn add_field(&mut self, name: impl Into<String>, kind: FieldKind) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(QueryError::internal(format!(
                "duplicate field in schema: {}",
                name
            )));
        }
        self.index.insert(name.clone(), self.fields.len());
        self.fields.push((name, kind));
        Ok(())
    }

    /// Adds or overwrites a field. Overwriting keeps the original slot, so
    /// an eval that redefines a column does not move it.
    pub fn set_field(&mut self, name: impl Into<String>, kind: FieldKind) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => self.fields[i].1 = kind,
            None => {
                self.index.insert(name.clone(), self.fields.len());
                self.fields.push((name, kind));
            }
        }
    }

    pub fn get_field(&self, name: &str) -> Result<FieldKind> {
        self.index
            .get(name)
            .map(|&i| self.fields[i].1)
            .ok_or_else(|| {
                QueryError::semantic(format!("unknown field: {}", name), Position::none())
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.index.get(name).map(|&i| self.fields[i].1)
    }

    /// Insertion-order iteration.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.fields.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Restriction to the named fields, in the order given. Unknown names
    /// are skipped; the analyzer validates them beforehand.
    pub fn project(&self, names: &[String]) -> Schema {
        let mut out = Schema::new();
        for name in names {
            if let Some(kind) = self.field_kind(name) {
                out.set_field(name.clone(), kind);
            }
        }
        out
    }

    /// Everything except the named fields, original order preserved.
    pub fn without(&self, names: &[String]) -> Schema {
        let mut out = Schema::new();
        for (name, kind) in self.iter() {
            if !names.iter().any(|n| n == name) {
                out.set_field(name.to_string(), kind);
            }
        }
        out
    }

    /// Left-biased union: fields of `other` that are new are appended.
    pub fn union(&self, other: &Schema) -> Schema {
        let mut out = self.clone();
        for (name, kind) in other.iter() {
            if !out.has_field(name) {
                out.set_field(name.to_string(), kind);
            }
        }
        out
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, kind)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}", name, kind)?;
        }
        f.write_str("}")
    }
}

/// Resolves dataset names to their field catalogs. The search backend
/// connector implements this; tests use `MemoryCatalog`.
pub trait DatasetCatalog: Send + Sync {
    fn dataset_schema(&self, name: &str) -> Result<Arc<Schema>>;

    fn list_datasets(&self) -> Vec<String>;
}

/// In-memory catalog. Schemas are handed out as shared `Arc`s, so a
/// dataset's schema is resolved once and reused across analyses.
#[derive(Default)]
pub struct MemoryCatalog {
    datasets: RwLock<HashMap<String, Arc<Schema>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, schema: Schema) {
        self.datasets.write().insert(name.into(), Arc::new(schema));
    }
}

impl DatasetCatalog for MemoryCatalog {
    fn dataset_schema(&self, name: &str) -> Result<Arc<Schema>> {
        self.datasets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::DatasetNotFound(name.to_string()))
    }

    fn list_datasets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasets.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_insertion_order() {
        let mut s = Schema::new();
        s.add_field("host", FieldKind::String).unwrap();
        s.add_field("status", FieldKind::Int).unwrap();
        s.add_field("latency", FieldKind::Double).unwrap();
        let names: Vec<_> = s.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, vec!["host", "status", "latency"]);
    }

    #[test]
    fn test_schema_duplicate_rejected() {
        let mut s = Schema::new();
        s.add_field("host", FieldKind::String).unwrap();
        assert!(s.add_field("host", FieldKind::Int).is_err());
    }

    #[test]
    fn test_schema_set_field_keeps_slot() {
        let mut s = Schema::from_fields([("a", FieldKind::Int), ("b", FieldKind::String)]);
        s.set_field("a", FieldKind::Double);
        let fields: Vec<_> = s.iter().collect();
        assert_eq!(fields[0], ("a", FieldKind::Double));
        assert_eq!(fields[1], ("b", FieldKind::String));
    }

    #[test]
    fn test_schema_project_and_without() {
        let s = Schema::from_fields([
            ("a", FieldKind::Int),
            ("b", FieldKind::String),
            ("c", FieldKind::Bool),
        ]);
        let p = s.project(&["c".into(), "a".into()]);
        assert_eq!(p.field_names(), vec!["c", "a"]);
        let w = s.without(&["b".into()]);
        assert_eq!(w.field_names(), vec!["a", "c"]);
    }

    #[test]
    fn test_memory_catalog() {
        let catalog = MemoryCatalog::new();
        catalog.register("logs", Schema::from_fields([("host", FieldKind::String)]));
        assert!(catalog.dataset_schema("logs").is_ok());
        assert!(matches!(
            catalog.dataset_schema("missing"),
            Err(QueryError::DatasetNotFound(_))
        ));
        assert_eq!(catalog.list_datasets(), vec!["logs"]);
    }

    #[test]
    fn test_unknown_field_is_semantic_error() {
        let s = Schema::new();
        assert!(matches!(
            s.get_field("nope"),
            Err(QueryError::Semantic { .. })
        ));
    }
}
