// Shared fixtures for the integration tests: an in-memory catalog, an
// in-memory backend and a few sample datasets.
#![allow(dead_code)]

use pipeql::ast::*;
use pipeql::catalog::{FieldKind, MemoryCatalog, Schema};
use pipeql::datasource::MemoryDataSource;
use pipeql::lookup::{LookupRegistry, LookupTable};
use pipeql::{Engine, EngineConfig, QueryOutput, Row, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub fn pos() -> Position {
    Position::none()
}

pub fn log_row(host: &str, status: i64, latency: f64, message: &str) -> Row {
    Row::from_fields([
        ("host", Value::Str(host.to_string())),
        ("status", Value::Int(status)),
        ("latency", Value::Float(latency)),
        ("message", Value::Str(message.to_string())),
    ])
}

pub fn sample_logs() -> Vec<Row> {
    vec![
        log_row("web1", 200, 0.12, "404: Not Found"),
        log_row("web2", 500, 2.50, "oops"),
        log_row("web1", 404, 0.30, "404: Not Found"),
        log_row("web2", 200, 0.08, "ok"),
        log_row("web1", 200, 0.50, "ok"),
        log_row("db1", 503, 5.00, "503: Unavailable"),
    ]
}

pub fn order_row(order_id: &str, user_id: &str, product_id: &str, amount: i64) -> Row {
    Row::from_fields([
        ("order_id", Value::Str(order_id.to_string())),
        ("user_id", Value::Str(user_id.to_string())),
        ("product_id", Value::Str(product_id.to_string())),
        ("amount", Value::Int(amount)),
    ])
}

pub fn sample_orders() -> Vec<Row> {
    vec![
        order_row("o1", "u1", "p1", 10),
        order_row("o2", "u2", "p2", 20),
        order_row("o3", "u1", "p9", 30),
    ]
}

pub fn sample_users() -> Vec<Row> {
    vec![
        Row::from_fields([
            ("user_id", Value::Str("u1".into())),
            ("name", Value::Str("alice".into())),
        ]),
        Row::from_fields([
            ("user_id", Value::Str("u1".into())),
            ("name", Value::Str("alice-alt".into())),
        ]),
        Row::from_fields([
            ("user_id", Value::Str("u3".into())),
            ("name", Value::Str("carol".into())),
        ]),
    ]
}

/// Installs the test subscriber once so `--nocapture` runs show the
/// engine's stage tracing.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub fn engine_with_config(config: EngineConfig) -> Engine {
    init_tracing();
    let catalog = MemoryCatalog::new();
    catalog.register(
        "logs",
        Schema::from_fields([
            ("host", FieldKind::String),
            ("status", FieldKind::Int),
            ("latency", FieldKind::Double),
            ("message", FieldKind::Text),
        ]),
    );
    catalog.register(
        "orders",
        Schema::from_fields([
            ("order_id", FieldKind::String),
            ("user_id", FieldKind::String),
            ("product_id", FieldKind::String),
            ("amount", FieldKind::Long),
        ]),
    );
    catalog.register(
        "users",
        Schema::from_fields([
            ("user_id", FieldKind::String),
            ("name", FieldKind::String),
        ]),
    );

    let source = MemoryDataSource::new();
    source.load("logs", sample_logs());
    source.load("orders", sample_orders());
    source.load("users", sample_users());

    let lookups = Arc::new(LookupRegistry::new());
    let mut products = LookupTable::new();
    products.insert(
        "p1",
        HashMap::from([
            ("name".to_string(), Value::Str("widget".into())),
            ("price".to_string(), Value::Float(9.99)),
        ]),
    );
    products.insert(
        "p2",
        HashMap::from([
            ("name".to_string(), Value::Str("gadget".into())),
            ("price".to_string(), Value::Float(19.99)),
        ]),
    );
    lookups.register("products", products).unwrap();

    Engine::new(Arc::new(catalog), Arc::new(source), config).with_lookups(lookups)
}

pub fn engine() -> Engine {
    engine_with_config(EngineConfig::default())
}

pub fn rows(output: QueryOutput) -> Vec<Row> {
    match output {
        QueryOutput::Rows { rows, .. } => rows,
        QueryOutput::Explain(_) => panic!("expected rows, got an explain report"),
    }
}

// AST construction helpers; the parser front end is out of scope, so the
// tests build command pipelines directly.

pub fn search(dataset: &str) -> Command {
    Command::Search(SearchCommand {
        dataset: dataset.into(),
        filter: None,
        position: pos(),
    })
}

pub fn where_eq(field: &str, value: i64) -> Command {
    Command::Where(WhereCommand {
        condition: Expr::binary(BinaryOp::Eq, Expr::field(field, pos()), Expr::int(value), pos()),
        position: pos(),
    })
}

pub fn where_ge(field: &str, value: i64) -> Command {
    Command::Where(WhereCommand {
        condition: Expr::binary(BinaryOp::Ge, Expr::field(field, pos()), Expr::int(value), pos()),
        position: pos(),
    })
}

pub fn head(count: i64) -> Command {
    Command::Head(HeadCommand {
        count,
        position: pos(),
    })
}

pub fn agg(func: &str, field: Option<&str>, alias: Option<&str>) -> Aggregation {
    Aggregation {
        func: func.into(),
        args: field.map(|f| vec![Expr::field(f, pos())]).unwrap_or_default(),
        distinct: false,
        alias: alias.map(|a| a.to_string()),
        position: pos(),
    }
}

pub fn stats(aggregations: Vec<Aggregation>, by: Vec<&str>) -> Command {
    Command::Stats(StatsCommand {
        aggregations,
        by: by.into_iter().map(|f| FieldRef::new(f, pos())).collect(),
        position: pos(),
    })
}

pub fn sort_asc(field: &str) -> Command {
    Command::Sort(SortCommand {
        keys: vec![SortKey {
            expr: Expr::field(field, pos()),
            descending: false,
            position: pos(),
        }],
        position: pos(),
    })
}
