//! Lookup tables and their process-wide registry.
//!
//! A lookup table is a keyed mapping from a string key to a row-shaped
//! record, used by the lookup command for left-outer enrichment. Loading
//! tables from CSV or elsewhere is the host's business; registration and
//! lookup semantics live here.

use crate::error::{QueryError, Result};
use crate::row::Value;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable keyed table. Records are field→value maps like rows, minus
/// the hit attributes.
#[derive(Debug, Default)]
pub struct LookupTable {
    records: HashMap<String, HashMap<String, Value>>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, HashMap<String, Value>)>,
        S: Into<String>,
    {
        Self {
            records: records.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, record: HashMap<String, Value>) {
        self.records.insert(key.into(), record);
    }

    pub fn get(&self, key: &str) -> Option<&HashMap<String, Value>> {
        self.records.get(key)
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }
}

/// Concurrent name→table registry. Names are unique and case-sensitive;
/// registration must not happen mid-query.
#[derive(Default)]
pub struct LookupRegistry {
    tables: DashMap<String, Arc<LookupTable>>,
}

impl LookupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, table: LookupTable) -> Result<()> {
        let name = name.into();
        if self.tables.contains_key(&name) {
            return Err(QueryError::internal(format!(
                "lookup table already registered: {}",
                name
            )));
        }
        self.tables.insert(name, Arc::new(table));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<LookupTable>> {
        self.tables
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| QueryError::TableNotFound(name.to_string()))
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products() -> LookupTable {
        let mut t = LookupTable::new();
        t.insert(
            "p1",
            HashMap::from([
                ("name".to_string(), Value::Str("widget".into())),
                ("price".to_string(), Value::Float(9.99)),
            ]),
        );
        t
    }

    #[test]
    fn test_register_and_get() {
        let registry = LookupRegistry::new();
        registry.register("products", products()).unwrap();
        let table = registry.get("products").unwrap();
        assert_eq!(table.size(), 1);
        assert!(table.get("p1").is_some());
        assert!(table.get("p2").is_none());
    }

    #[test]
    fn test_missing_table_error() {
        let registry = LookupRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(QueryError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = LookupRegistry::new();
        registry.register("products", products()).unwrap();
        assert!(registry.register("products", products()).is_err());
    }

    #[test]
    fn test_names_case_sensitive() {
        let registry = LookupRegistry::new();
        registry.register("Products", products()).unwrap();
        assert!(registry.get("products").is_err());
    }

    #[test]
    fn test_unregister_and_list() {
        let registry = LookupRegistry::new();
        registry.register("b", products()).unwrap();
        registry.register("a", products()).unwrap();
        assert_eq!(registry.list(), vec!["a", "b"]);
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.list(), vec!["b"]);
    }
}
