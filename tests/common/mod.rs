//! Shared helpers for the SQLite-backed integration tests.
#![allow(dead_code)]

use cfsql::plan::TableRef;
use cfsql::{Config, Dataset, DatasetBindings, SqliteExecutor};
use rusqlite::types::Value;
use std::sync::Arc;

/// In-memory database loaded with `setup` SQL
pub fn database(setup: &str) -> SqliteExecutor {
    let executor = SqliteExecutor::open_in_memory().unwrap();
    executor.execute_batch(setup).unwrap();
    executor
}

/// Dataset handle with the schema currently in the database
pub fn dataset(executor: &SqliteExecutor, role: &str, table: &str) -> Arc<dyn Dataset> {
    Arc::new(executor.dataset(role, TableRef::new(table)).unwrap())
}

/// Bind `(role, table)` inputs and outputs on `executor`
pub fn bindings(
    executor: &SqliteExecutor,
    inputs: &[(&str, &str)],
    outputs: &[(&str, &str)],
) -> DatasetBindings {
    let mut bindings = DatasetBindings::new();
    for (role, table) in inputs {
        bindings = bindings.with_input(role, dataset(executor, role, table));
    }
    for (role, table) in outputs {
        bindings = bindings.with_output(role, dataset(executor, role, table));
    }
    bindings
}

pub fn config(raw: &str) -> Config {
    Config::from_toml_str(raw).unwrap()
}

pub fn text(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        other => panic!("expected text, got {other:?}"),
    }
}

pub fn real(value: &Value) -> f64 {
    match value {
        Value::Real(f) => *f,
        Value::Integer(i) => *i as f64,
        other => panic!("expected number, got {other:?}"),
    }
}

pub fn int(value: &Value) -> i64 {
    match value {
        Value::Integer(i) => *i,
        other => panic!("expected integer, got {other:?}"),
    }
}

/// `(text, text, real)` rows of a three-column query
pub fn triples(executor: &SqliteExecutor, sql: &str) -> Vec<(String, String, f64)> {
    executor
        .fetch(sql)
        .unwrap()
        .iter()
        .map(|row| (text(&row[0]), text(&row[1]), real(&row[2])))
        .collect()
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-12,
        "expected {expected}, got {actual}"
    );
}

/// Compare `(text, text, real)` rows in order, numbers within 1e-12
pub fn assert_triples(actual: &[(String, String, f64)], expected: &[(&str, &str, f64)]) {
    assert_eq!(actual.len(), expected.len(), "rows: {actual:?}");
    for (row, (a, b, score)) in actual.iter().zip(expected) {
        assert_eq!((row.0.as_str(), row.1.as_str()), (*a, *b), "rows: {actual:?}");
        assert_close(row.2, *score);
    }
}
