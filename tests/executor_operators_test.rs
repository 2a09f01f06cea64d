// Operator-level behavior through the public engine API: reshaping
// operators, row-wise rewrites, resource limits and cancellation.

mod common;

use common::*;
use pipeql::ast::*;
use pipeql::executor::{collect, build_operator, ExecContext, ExecutorDeps, Operator, ResourceLimits};
use pipeql::{EngineConfig, QueryError, Value};

#[test]
fn test_sort_orders_and_is_stable() {
    let engine = engine();
    let query = Query::new(vec![search("logs"), sort_asc("status")]);
    let out = rows(engine.execute(&query).unwrap());
    let statuses: Vec<i64> = out.iter().map(|r| r.get("status").as_i64().unwrap()).collect();
    assert_eq!(statuses, vec![200, 200, 200, 404, 500, 503]);
    // Equal keys keep arrival order: web1 0.12 before web2 0.08 before
    // web1 0.50.
    assert_eq!(out[0].get("latency"), Value::Float(0.12));
    assert_eq!(out[1].get("latency"), Value::Float(0.08));
    assert_eq!(out[2].get("latency"), Value::Float(0.5));
}

#[test]
fn test_sort_descending() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Sort(SortCommand {
            keys: vec![SortKey {
                expr: Expr::field("latency", pos()),
                descending: true,
                position: pos(),
            }],
            position: pos(),
        }),
        head(1),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out[0].get("host"), Value::Str("db1".into()));
}

#[test]
fn test_dedup_keeps_first_n_per_key() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Dedup(DedupCommand {
            count: 1,
            fields: vec![FieldRef::new("host", pos())],
            consecutive: false,
            sort_by: vec![],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    let hosts: Vec<String> = out.iter().map(|r| r.get("host").to_text()).collect();
    assert_eq!(hosts, vec!["web1", "web2", "db1"]);
}

#[test]
fn test_dedup_consecutive_only_breaks_runs() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Dedup(DedupCommand {
            count: 1,
            fields: vec![FieldRef::new("host", pos())],
            consecutive: true,
            sort_by: vec![],
            position: pos(),
        }),
    ]);
    // Arrival order: web1, web2, web1, web2, web1, db1. No adjacent
    // duplicates, so everything survives.
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out.len(), 6);
}

#[test]
fn test_dedup_with_sort_by() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Dedup(DedupCommand {
            count: 1,
            fields: vec![FieldRef::new("host", pos())],
            consecutive: false,
            sort_by: vec![SortKey {
                expr: Expr::field("latency", pos()),
                descending: true,
                position: pos(),
            }],
            position: pos(),
        }),
    ]);
    // Highest-latency row per host wins.
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].get("host"), Value::Str("db1".into()));
    assert_eq!(out[1].get("latency"), Value::Float(2.5));
    assert_eq!(out[2].get("latency"), Value::Float(0.5));
}

#[test]
fn test_top_ranks_by_count_with_ties_by_arrival() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Top(TopCommand {
            count: 2,
            fields: vec![FieldRef::new("host", pos())],
            by: vec![],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].get("host"), Value::Str("web1".into()));
    assert_eq!(out[0].get("count"), Value::Int(3));
    // web2 (2) beats db1 (1); ties would keep arrival order.
    assert_eq!(out[1].get("host"), Value::Str("web2".into()));
}

#[test]
fn test_rare_ranks_least_frequent_first() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Rare(RareCommand {
            count: 1,
            fields: vec![FieldRef::new("host", pos())],
            by: vec![],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out[0].get("host"), Value::Str("db1".into()));
    assert_eq!(out[0].get("count"), Value::Int(1));
}

#[test]
fn test_reverse_emits_in_reverse_arrival_order() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Reverse(ReverseCommand { position: pos() }),
        head(1),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out[0].get("host"), Value::Str("db1".into()));
}

#[test]
fn test_rename_replace_fillnull() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Rename(RenameCommand {
            pairs: vec![RenamePair {
                source: FieldRef::new("host", pos()),
                target: "server".into(),
            }],
            position: pos(),
        }),
        Command::Replace(ReplaceCommand {
            from: "web1".into(),
            to: "frontend-1".into(),
            fields: vec![FieldRef::new("server", pos())],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out[0].get("server"), Value::Str("frontend-1".into()));
    assert_eq!(out[0].get("host"), Value::Null);
    assert_eq!(out[1].get("server"), Value::Str("web2".into()));
}

#[test]
fn test_fillnull_fills_missing_capture() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Rex(RexCommand {
            field: FieldRef::new("message", pos()),
            pattern: r"(?P<code>\d{3}):".into(),
            position: pos(),
        }),
        Command::Fillnull(FillnullCommand {
            value: Literal::string("none", pos()),
            fields: vec![FieldRef::new("code", pos())],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out[0].get("code"), Value::Str("404".into()));
    assert_eq!(out[1].get("code"), Value::Str("none".into()));
}

#[test]
fn test_fields_exclude() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Fields(FieldsCommand {
            exclude: true,
            fields: vec![FieldRef::new("message", pos())],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out[0].get("message"), Value::Null);
    assert!(!out[0].get("host").is_null());
}

#[test]
fn test_flatten_expands_arrays() {
    use pipeql::catalog::{FieldKind, MemoryCatalog, Schema};
    use pipeql::datasource::MemoryDataSource;
    use pipeql::Row;
    use std::sync::Arc;

    let catalog = MemoryCatalog::new();
    catalog.register(
        "events",
        Schema::from_fields([("id", FieldKind::String), ("tags", FieldKind::Array)]),
    );
    let source = MemoryDataSource::new();
    source.load(
        "events",
        vec![
            Row::from_fields([
                ("id", Value::Str("e1".into())),
                (
                    "tags",
                    Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]),
                ),
            ]),
            Row::from_fields([
                ("id", Value::Str("e2".into())),
                ("tags", Value::Str("not-an-array".into())),
            ]),
        ],
    );
    let engine = pipeql::Engine::new(
        Arc::new(catalog),
        Arc::new(source),
        EngineConfig::default(),
    );
    let query = Query::new(vec![
        search("events"),
        Command::Flatten(FlattenCommand {
            field: FieldRef::new("tags", pos()),
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].get("tags"), Value::Str("a".into()));
    assert_eq!(out[1].get("tags"), Value::Str("b".into()));
    // Non-array values emit one unchanged row.
    assert_eq!(out[2].get("tags"), Value::Str("not-an-array".into()));
}

#[test]
fn test_eventstats_keeps_rows_and_adds_columns() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Eventstats(EventstatsCommand {
            aggregations: vec![agg("avg", Some("latency"), Some("avg_latency"))],
            by: vec![FieldRef::new("host", pos())],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out.len(), 6);
    // web2 rows both see (2.50 + 0.08) / 2.
    assert_eq!(out[1].get("avg_latency"), Value::Float((2.5 + 0.08) / 2.0));
    assert_eq!(out[3].get("avg_latency"), Value::Float((2.5 + 0.08) / 2.0));
    // Original columns survive.
    assert_eq!(out[1].get("status"), Value::Int(500));
}

#[test]
fn test_streamstats_running_count_preserves_order() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Streamstats(StreamstatsCommand {
            aggregations: vec![agg("count", None, Some("seen"))],
            by: vec![FieldRef::new("host", pos())],
            window: None,
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    let seen: Vec<i64> = out.iter().map(|r| r.get("seen").as_i64().unwrap()).collect();
    // Arrival: web1, web2, web1, web2, web1, db1.
    assert_eq!(seen, vec![1, 1, 2, 2, 3, 1]);
}

#[test]
fn test_chart_behaves_like_stats() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Chart(ChartCommand {
            aggregations: vec![agg("max", Some("latency"), Some("worst"))],
            by: vec![FieldRef::new("host", pos())],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out.len(), 3);
    let web2 = out.iter().find(|r| r.get("host").to_text() == "web2").unwrap();
    assert_eq!(web2.get("worst"), Value::Float(2.5));
}

#[test]
fn test_bin_with_fixed_span() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Bin(BinCommand {
            field: FieldRef::new("status", pos()),
            span: Some(TimeSpan {
                value: 100,
                unit: TimeUnit::Seconds,
                position: pos(),
            }),
            bins: None,
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    let buckets: Vec<i64> = out.iter().map(|r| r.get("status").as_i64().unwrap()).collect();
    assert_eq!(buckets, vec![200, 500, 400, 200, 200, 500]);
}

#[test]
fn test_aggregations_sum_avg_min_max_dc() {
    let engine = engine();
    let p50 = Aggregation {
        func: "percentile".into(),
        args: vec![Expr::field("latency", pos()), Expr::int(50)],
        distinct: false,
        alias: Some("p50".into()),
        position: pos(),
    };
    let query = Query::new(vec![
        search("logs"),
        stats(
            vec![
                agg("sum", Some("latency"), Some("total")),
                agg("min", Some("status"), Some("lo")),
                agg("max", Some("status"), Some("hi")),
                agg("dc", Some("host"), Some("hosts")),
                p50,
            ],
            vec![],
        ),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out.len(), 1);
    let row = &out[0];
    let total = row.get("total").as_f64().unwrap();
    assert!((total - 8.5).abs() < 1e-9);
    assert_eq!(row.get("lo"), Value::Int(200));
    assert_eq!(row.get("hi"), Value::Int(503));
    assert_eq!(row.get("hosts"), Value::Int(3));
    assert_eq!(row.get("p50"), Value::Float(0.3));
}

#[test]
fn test_row_limit_aborts_blocking_operator() {
    // Push-down disabled so the sort actually buffers on the coordinator.
    let engine = engine_with_config(EngineConfig {
        max_buffered_rows: 2,
        enable_push_down: false,
        ..EngineConfig::default()
    });
    let query = Query::new(vec![search("logs"), sort_asc("status")]);
    assert!(matches!(
        engine.execute(&query),
        Err(QueryError::RowLimit(_))
    ));
}

#[test]
fn test_memory_limit_aborts_query() {
    let engine = engine_with_config(EngineConfig {
        max_memory_bytes: 64,
        ..EngineConfig::default()
    });
    let query = Query::new(vec![
        search("logs"),
        Command::Reverse(ReverseCommand { position: pos() }),
    ]);
    assert!(matches!(
        engine.execute(&query),
        Err(QueryError::MemoryLimit(_))
    ));
}

#[test]
fn test_cancellation_surfaces_as_timeout_kind() {
    let engine = engine();
    let query = Query::new(vec![search("logs"), sort_asc("status")]);
    let ctx = engine.new_context();
    ctx.cancel_handle().store(true, std::sync::atomic::Ordering::Relaxed);
    assert!(matches!(
        engine.execute_with_context(&query, &ctx),
        Err(QueryError::Timeout(_))
    ));
}

#[test]
fn test_operator_double_close_is_safe() {
    let engine = engine();
    let query = Query::new(vec![search("logs"), where_eq("status", 200)]);
    let compiled = engine.compile(&query).unwrap();
    let deps = ExecutorDeps {
        source: std::sync::Arc::new(pipeql::datasource::MemoryDataSource::new()),
        lookups: engine.lookups().clone(),
        scan_batch_size: 100,
    };
    let mut op = build_operator(&compiled.physical, &deps);
    let ctx = ExecContext::new(ResourceLimits::default());
    op.open(&ctx).unwrap();
    op.close();
    op.close();
}

#[test]
fn test_collect_closes_on_error() {
    // A query against a dataset the backend does not have: collect must
    // return the error after closing the tree (no panic, no hang).
    let engine = engine();
    let compiled = engine
        .compile(&Query::new(vec![search("logs")]))
        .unwrap();
    let deps = ExecutorDeps {
        source: std::sync::Arc::new(pipeql::datasource::MemoryDataSource::new()),
        lookups: engine.lookups().clone(),
        scan_batch_size: 100,
    };
    let mut op = build_operator(&compiled.physical, &deps);
    let ctx = ExecContext::new(ResourceLimits::default());
    assert!(matches!(
        collect(op.as_mut(), &ctx),
        Err(QueryError::DataSource(_))
    ));
}

#[test]
fn test_case_expression_in_eval() {
    let engine = engine();
    let query = Query::new(vec![
        search("logs"),
        Command::Eval(EvalCommand {
            assignments: vec![EvalAssignment {
                field: "class".into(),
                expr: Expr::Case(CaseExpr {
                    whens: vec![WhenClause {
                        condition: Box::new(Expr::binary(
                            BinaryOp::Ge,
                            Expr::field("status", pos()),
                            Expr::int(500),
                            pos(),
                        )),
                        result: Box::new(Expr::string("server-error")),
                        position: pos(),
                    }],
                    else_expr: Some(Box::new(Expr::string("ok"))),
                    position: pos(),
                }),
                position: pos(),
            }],
            position: pos(),
        }),
    ]);
    let out = rows(engine.execute(&query).unwrap());
    assert_eq!(out[0].get("class"), Value::Str("ok".into()));
    assert_eq!(out[1].get("class"), Value::Str("server-error".into()));
}

#[test]
fn test_like_and_in_filters() {
    let engine = engine();
    let like_query = Query::new(vec![
        search("logs"),
        Command::Where(WhereCommand {
            condition: Expr::binary(
                BinaryOp::Like,
                Expr::field("host", pos()),
                Expr::string("web%"),
                pos(),
            ),
            position: pos(),
        }),
    ]);
    assert_eq!(rows(engine.execute(&like_query).unwrap()).len(), 5);

    let in_query = Query::new(vec![
        search("logs"),
        Command::Where(WhereCommand {
            condition: Expr::binary(
                BinaryOp::In,
                Expr::field("status", pos()),
                Expr::List(ListLiteral {
                    items: vec![Expr::int(404), Expr::int(503)],
                    position: pos(),
                }),
                pos(),
            ),
            position: pos(),
        }),
    ]);
    assert_eq!(rows(engine.execute(&in_query).unwrap()).len(), 2);
}
