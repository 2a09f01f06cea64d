//! Process-wide function registry.
//!
//! Surface function names (and their aliases) map case-insensitively to
//! descriptors. The analyzer validates calls against the descriptor's
//! argument shape, the optimizer consults the purity class for folding,
//! and the physical planner uses the category to decide push-down.

mod builtins;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCategory {
    Math,
    String,
    Date,
    Type,
    Conditional,
    Relevance,
    Aggregation,
    Crypto,
    Ip,
    Json,
    System,
}

/// Purity class driving optimizer and planner decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purity {
    /// Deterministic function of its arguments; foldable and reorderable.
    PureScalar,
    /// Operates across a group; only valid in stats-style commands.
    Aggregation,
    /// Must translate to a backend text-search primitive.
    Relevance,
    /// `now`, `rand` and friends; never folded.
    NonDeterministic,
}

/// Accepted argument count range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exact(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    pub const fn range(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    /// Canonical surface name, lowercase.
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub category: FunctionCategory,
    pub purity: Purity,
    pub arity: Arity,
    /// Identifier the backend knows the function by when a call is shipped
    /// as part of a pushed-down fragment.
    pub backend_udf: &'static str,
}

impl FunctionDescriptor {
    pub fn is_aggregation(&self) -> bool {
        self.purity == Purity::Aggregation
    }
}

struct Registry {
    by_name: HashMap<String, Arc<FunctionDescriptor>>,
}

impl Registry {
    fn with_builtins() -> Self {
        let mut registry = Registry {
            by_name: HashMap::new(),
        };
        for descriptor in builtins::builtin_descriptors() {
            registry.insert(Arc::new(descriptor));
        }
        registry
    }

    fn insert(&mut self, descriptor: Arc<FunctionDescriptor>) {
        self.by_name
            .insert(descriptor.name.to_ascii_lowercase(), descriptor.clone());
        for alias in descriptor.aliases {
            self.by_name
                .insert(alias.to_ascii_lowercase(), descriptor.clone());
        }
    }
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::with_builtins()));

/// Case-insensitive membership test.
pub fn has_function(name: &str) -> bool {
    REGISTRY
        .read()
        .by_name
        .contains_key(&name.to_ascii_lowercase())
}

/// Case-insensitive descriptor lookup; `None` for unknown names.
pub fn get_function(name: &str) -> Option<Arc<FunctionDescriptor>> {
    REGISTRY
        .read()
        .by_name
        .get(&name.to_ascii_lowercase())
        .cloned()
}

/// Registers a descriptor (e.g. a loaded UDF), alias-aware. Must not be
/// called mid-query; the registry lock is exclusive for the duration.
pub fn register_function(descriptor: FunctionDescriptor) {
    REGISTRY.write().insert(Arc::new(descriptor));
}

/// Deduplicated descriptor set, sorted by canonical name.
pub fn list_functions() -> Vec<Arc<FunctionDescriptor>> {
    let registry = REGISTRY.read();
    let mut seen: HashMap<&'static str, Arc<FunctionDescriptor>> = HashMap::new();
    for descriptor in registry.by_name.values() {
        seen.entry(descriptor.name).or_insert_with(|| descriptor.clone());
    }
    let mut out: Vec<_> = seen.into_values().collect();
    out.sort_by_key(|d| d.name);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(has_function("ABS"));
        assert!(has_function("abs"));
        let d = get_function("Abs").unwrap();
        assert_eq!(d.name, "abs");
        assert_eq!(d.category, FunctionCategory::Math);
    }

    #[test]
    fn test_alias_resolves_to_same_descriptor() {
        let canonical = get_function("substr").unwrap();
        let alias = get_function("substring").unwrap();
        assert!(Arc::ptr_eq(&canonical, &alias));
    }

    #[test]
    fn test_unknown_function_is_none() {
        assert!(get_function("definitely_not_a_function").is_none());
    }

    #[test]
    fn test_aggregations_flagged() {
        assert!(get_function("count").unwrap().is_aggregation());
        assert!(!get_function("lower").unwrap().is_aggregation());
    }

    #[test]
    fn test_now_is_non_deterministic() {
        assert_eq!(get_function("now").unwrap().purity, Purity::NonDeterministic);
        assert_eq!(get_function("rand").unwrap().purity, Purity::NonDeterministic);
    }

    #[test]
    fn test_list_functions_deduplicates_aliases() {
        let all = list_functions();
        let substr_entries = all.iter().filter(|d| d.name == "substr").count();
        assert_eq!(substr_entries, 1);
    }

    #[test]
    fn test_register_custom_udf() {
        register_function(FunctionDescriptor {
            name: "geo_distance_test",
            aliases: &["geodist_test"],
            category: FunctionCategory::Math,
            purity: Purity::PureScalar,
            arity: Arity::exact(4),
            backend_udf: "udf.geo_distance_test",
        });
        assert!(has_function("GEODIST_TEST"));
        assert!(get_function("geo_distance_test").unwrap().arity.accepts(4));
    }

    #[test]
    fn test_arity_ranges() {
        assert!(Arity::exact(2).accepts(2));
        assert!(!Arity::exact(2).accepts(3));
        assert!(Arity::at_least(1).accepts(10));
        assert!(Arity::range(1, 3).accepts(2));
        assert!(!Arity::range(1, 3).accepts(0));
    }
}
