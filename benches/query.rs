//! Query Execution Performance Benchmarks
//!
//! These benchmarks measure:
//! - Simple SELECT through the pooled executor
//! - Dry-run validation
//! - Capped fetch over a large table (reads stop at 101 rows)
//! - The full `sql_query` tool including rendering

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use text2sql::{ConnectionPool, PoolOptions, QueryExecutor, QueryValidator, Toolbox};

#[cfg(feature = "sqlite")]
use text2sql::engine::sqlite::SqliteEngine;

#[cfg(feature = "sqlite")]
fn create_db(name: &str, rows: usize) -> std::path::PathBuf {
    let temp_file = std::env::temp_dir().join(name);
    let _ = std::fs::remove_file(&temp_file);

    let conn = rusqlite::Connection::open(&temp_file).expect("Failed to create database");
    conn.execute_batch(&format!(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER);
         WITH RECURSIVE seq(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM seq WHERE x < {rows})
         INSERT INTO users (name, age) SELECT 'User ' || x, x % 100 FROM seq;"
    ))
    .expect("Failed to populate database");

    temp_file
}

#[cfg(feature = "sqlite")]
fn pool(path: &std::path::Path) -> Arc<ConnectionPool<SqliteEngine>> {
    let pool = ConnectionPool::new(SqliteEngine::new(path), PoolOptions::default())
        .expect("Failed to build pool");
    Arc::new(pool)
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_simple_select(c: &mut Criterion) {
    let temp_file = create_db("text2sql_bench_query_simple.db", 50);
    let executor = QueryExecutor::new(pool(&temp_file));
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("sqlite_select_50_rows", |b| {
        b.iter(|| {
            let result = runtime.block_on(executor.execute(black_box("SELECT * FROM users")));
            assert!(result.is_ok());
            result
        });
    });

    let _ = std::fs::remove_file(&temp_file);
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_validation(c: &mut Criterion) {
    let temp_file = create_db("text2sql_bench_query_validate.db", 10);
    let validator = QueryValidator::new(pool(&temp_file));
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("sqlite_dry_run", |b| {
        b.iter(|| {
            let verdict = runtime.block_on(
                validator.check(black_box("SELECT name FROM users WHERE age > 50 ORDER BY name")),
            );
            assert!(verdict.is_valid());
            verdict
        });
    });

    let _ = std::fs::remove_file(&temp_file);
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_capped_large_result(c: &mut Criterion) {
    let temp_file = create_db("text2sql_bench_query_large.db", 10_000);
    let executor = QueryExecutor::new(pool(&temp_file));
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("sqlite_select_10000_rows_capped", |b| {
        b.iter(|| {
            let result = runtime
                .block_on(executor.execute(black_box("SELECT * FROM users")))
                .expect("query failed");
            assert!(result.truncated);
            result
        });
    });

    let _ = std::fs::remove_file(&temp_file);
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_query_tool(c: &mut Criterion) {
    let temp_file = create_db("text2sql_bench_query_tool.db", 100);
    let toolbox = Toolbox::new(pool(&temp_file), None);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("sqlite_sql_query_tool", |b| {
        b.iter(|| {
            let text = runtime
                .block_on(toolbox.sql_query(black_box("SELECT * FROM users")))
                .expect("tool failed");
            assert!(!text.is_empty());
            text
        });
    });

    let _ = std::fs::remove_file(&temp_file);
}

#[cfg(feature = "sqlite")]
criterion_group!(
    benches,
    bench_sqlite_simple_select,
    bench_sqlite_validation,
    bench_sqlite_capped_large_result,
    bench_sqlite_query_tool
);

#[cfg(not(feature = "sqlite"))]
criterion_group!(benches,);

criterion_main!(benches);
