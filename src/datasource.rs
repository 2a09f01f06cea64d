//! The remote search backend seam.
//!
//! The engine never speaks a backend's wire protocol; it hands the
//! encoded push-down fragments to a `DataSource` and pages through the
//! hits it returns. Tests use `MemoryDataSource`, which interprets the
//! fragment DSL in-process.

use crate::error::{QueryError, Result};
use crate::executor::{Evaluator, ExecContext};
use crate::physical::decode_expr;
use crate::row::{Row, Value};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// One backend hit: document id, relevance score and the source map.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub source: serde_json::Map<String, JsonValue>,
}

impl SearchHit {
    pub fn into_row(self) -> Row {
        let mut row = Row::new();
        row.id = self.id;
        row.score = self.score;
        for (field, value) in self.source {
            row.set(field, Value::from_json(value));
        }
        row
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total: u64,
    pub took_ms: u64,
}

/// Executes the pushed-down fragments against the remote backend.
/// `fragments` is the opaque encoded blob (backend DSL JSON); `from` is
/// zero-based, `size` non-negative.
pub trait DataSource: Send + Sync {
    fn search(
        &self,
        ctx: &ExecContext,
        dataset: &str,
        fragments: &JsonValue,
        from: u64,
        size: u64,
    ) -> Result<SearchResponse>;
}

/// In-memory backend double. Decodes the fragment DSL back into
/// expressions and evaluates them with the coordinator's own evaluator,
/// applying filter, computed fields, sort, limit and projection in the
/// order a real backend would.
#[derive(Default)]
pub struct MemoryDataSource {
    datasets: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, dataset: impl Into<String>, rows: Vec<Row>) {
        self.datasets.write().insert(dataset.into(), rows);
    }
}

impl DataSource for MemoryDataSource {
    fn search(
        &self,
        ctx: &ExecContext,
        dataset: &str,
        fragments: &JsonValue,
        from: u64,
        size: u64,
    ) -> Result<SearchResponse> {
        ctx.check()?;
        let datasets = self.datasets.read();
        let rows = datasets
            .get(dataset)
            .ok_or_else(|| QueryError::DataSource(format!("no such dataset: {}", dataset)))?;
        let evaluator = Evaluator::new();

        let mut selected: Vec<Row> = match fragments.get("filter") {
            Some(encoded) => {
                let condition = decode_expr(encoded).ok_or_else(|| {
                    QueryError::DataSource("undecodable filter fragment".to_string())
                })?;
                let mut kept = Vec::new();
                for row in rows {
                    if evaluator.matches(&condition, row).unwrap_or(false) {
                        kept.push(row.clone());
                    }
                }
                kept
            }
            None => rows.clone(),
        };

        if let Some(computed) = fragments.get("computed").and_then(|c| c.as_array()) {
            for entry in computed {
                let (Some(field), Some(encoded)) = (
                    entry.get("field").and_then(|f| f.as_str()),
                    entry.get("expr"),
                ) else {
                    continue;
                };
                let expr = decode_expr(encoded).ok_or_else(|| {
                    QueryError::DataSource("undecodable computed fragment".to_string())
                })?;
                for row in &mut selected {
                    let value = evaluator.evaluate(&expr, row).unwrap_or(Value::Null);
                    row.set(field.to_string(), value);
                }
            }
        }

        if let Some(keys) = fragments.get("sort").and_then(|s| s.as_array()) {
            let keys: Vec<(String, bool)> = keys
                .iter()
                .filter_map(|k| {
                    Some((
                        k.get("field")?.as_str()?.to_string(),
                        k.get("desc").and_then(|d| d.as_bool()).unwrap_or(false),
                    ))
                })
                .collect();
            selected.sort_by(|a, b| {
                for (field, desc) in &keys {
                    let ord = a.get(field).compare(&b.get(field));
                    let ord = if *desc { ord.reverse() } else { ord };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        if let Some(limit) = fragments.get("limit").and_then(|l| l.as_u64()) {
            selected.truncate(limit as usize);
        }

        let projection: Option<Vec<String>> = fragments
            .get("projection")
            .and_then(|p| p.as_array())
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.as_str().map(|s| s.to_string()))
                    .collect()
            });

        let total = selected.len() as u64;
        let page: Vec<SearchHit> = selected
            .into_iter()
            .skip(from as usize)
            .take(size as usize)
            .map(|row| {
                let mut source = serde_json::Map::new();
                for name in row.field_names().map(|s| s.to_string()).collect::<Vec<_>>() {
                    let keep = projection
                        .as_ref()
                        .map(|p| p.contains(&name))
                        .unwrap_or(true);
                    if keep {
                        source.insert(name.clone(), row.get(&name).to_json());
                    }
                }
                SearchHit {
                    id: row.id.clone(),
                    score: row.score,
                    source,
                }
            })
            .collect();

        Ok(SearchResponse {
            hits: page,
            total,
            took_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Expr, Position};
    use crate::physical::ScanFragments;

    fn rows() -> Vec<Row> {
        (0..10)
            .map(|i| {
                Row::from_fields([
                    ("status", Value::Int(if i % 2 == 0 { 200 } else { 500 })),
                    ("seq", Value::Int(i)),
                ])
            })
            .collect()
    }

    #[test]
    fn test_filter_fragment_applied() {
        let source = MemoryDataSource::new();
        source.load("logs", rows());
        let mut fragments = ScanFragments::default();
        fragments.and_filter(Expr::binary(
            BinaryOp::Eq,
            Expr::field("status", Position::none()),
            Expr::int(500),
            Position::none(),
        ));
        let ctx = ExecContext::default();
        let response = source
            .search(&ctx, "logs", &fragments.encode(), 0, 100)
            .unwrap();
        assert_eq!(response.total, 5);
        assert_eq!(response.hits.len(), 5);
    }

    #[test]
    fn test_paging_window() {
        let source = MemoryDataSource::new();
        source.load("logs", rows());
        let ctx = ExecContext::default();
        let fragments = ScanFragments::default().encode();
        let page = source.search(&ctx, "logs", &fragments, 4, 3).unwrap();
        assert_eq!(page.total, 10);
        assert_eq!(page.hits.len(), 3);
    }

    #[test]
    fn test_unknown_dataset_is_datasource_error() {
        let source = MemoryDataSource::new();
        let ctx = ExecContext::default();
        let fragments = ScanFragments::default().encode();
        assert!(matches!(
            source.search(&ctx, "nope", &fragments, 0, 10),
            Err(QueryError::DataSource(_))
        ));
    }
}
