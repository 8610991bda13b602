//! Query Execution Module
//!
//! A composed pipeline is an [`ExecutionPlan`]: an ordered list of rendered
//! statements, each materialized into one target dataset. Plans are fully
//! composed before anything runs; [`run_plan`] hands the statements to a
//! [`QueryExecutor`] in order.
//!
//! - `sqlite` - in-process execution sink backed by `rusqlite`

mod sqlite;

pub use sqlite::SqliteExecutor;

use crate::catalog::Dataset;
use crate::dialect::Dialect;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Execution error types
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Engine error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Reading a dataset schema failed
    #[error("Cannot read schema of '{table}': {reason}")]
    Schema { table: String, reason: String },

    /// Target dataset is not writable by this executor
    #[error("Executor on '{executor}' cannot write dataset '{dataset}' on '{connection}'")]
    ForeignDataset {
        executor: String,
        dataset: String,
        connection: String,
    },
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Column name -> description
pub type ColumnDescriptions = BTreeMap<String, String>;

/// One statement materialized into `target`
#[derive(Debug, Clone)]
pub struct Statement {
    pub target: Arc<dyn Dataset>,
    pub sql: String,
    pub descriptions: ColumnDescriptions,
}

/// Ordered statements of one pipeline run
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub dialect: Dialect,
    pub statements: Vec<Statement>,
}

impl ExecutionPlan {
    pub fn new(dialect: Dialect) -> Self {
        ExecutionPlan {
            dialect,
            statements: Vec::new(),
        }
    }

    pub fn push(&mut self, target: Arc<dyn Dataset>, sql: String, descriptions: ColumnDescriptions) {
        tracing::info!(
            target_dataset = target.name(),
            engine = %self.dialect.engine,
            sql_len = sql.len(),
            "statement_composed"
        );
        self.statements.push(Statement {
            target,
            sql,
            descriptions,
        });
    }

    /// Rendered SQL of the last statement
    pub fn final_sql(&self) -> Option<&str> {
        self.statements.last().map(|s| s.sql.as_str())
    }
}

/// Sink that materializes one statement into a target dataset
pub trait QueryExecutor {
    /// Replace the contents of `target` with the result of `sql`
    fn execute(&self, sql: &str, target: &dyn Dataset) -> ExecutionResult<()>;

    /// Attach column descriptions to a materialized dataset
    fn set_column_descriptions(
        &self,
        _target: &dyn Dataset,
        _descriptions: &ColumnDescriptions,
    ) -> ExecutionResult<()> {
        Ok(())
    }
}

/// Execute every statement of `plan` in order
pub fn run_plan(executor: &dyn QueryExecutor, plan: &ExecutionPlan) -> ExecutionResult<()> {
    for statement in &plan.statements {
        tracing::info!(
            target_dataset = statement.target.name(),
            sql_len = statement.sql.len(),
            "executing_statement"
        );
        tracing::debug!(sql = %statement.sql, "statement_sql");
        executor.execute(&statement.sql, statement.target.as_ref())?;
        executor.set_column_descriptions(statement.target.as_ref(), &statement.descriptions)?;
        tracing::info!(target_dataset = statement.target.name(), "statement_done");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnSchema, ColumnType, ConnectionInfo, TableHandle};
    use crate::dialect::Engine;
    use crate::plan::TableRef;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        executed: RefCell<Vec<String>>,
    }

    impl QueryExecutor for Recorder {
        fn execute(&self, sql: &str, target: &dyn Dataset) -> ExecutionResult<()> {
            self.executed
                .borrow_mut()
                .push(format!("{} <- {sql}", target.name()));
            Ok(())
        }
    }

    fn target(name: &str) -> Arc<dyn Dataset> {
        Arc::new(TableHandle::new(
            name,
            TableRef::new(name),
            ConnectionInfo::new("postgres", "pg"),
            vec![ColumnSchema::new("score", ColumnType::Double)],
        ))
    }

    #[test]
    fn test_run_plan_keeps_statement_order() {
        let mut plan = ExecutionPlan::new(Dialect::new(Engine::Postgres));
        plan.push(target("similarity"), "SELECT 1".into(), ColumnDescriptions::new());
        plan.push(target("scores"), "SELECT 2".into(), ColumnDescriptions::new());
        let recorder = Recorder::default();
        run_plan(&recorder, &plan).unwrap();
        assert_eq!(
            *recorder.executed.borrow(),
            vec!["similarity <- SELECT 1", "scores <- SELECT 2"]
        );
        assert_eq!(plan.final_sql(), Some("SELECT 2"));
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::Schema {
            table: "events".into(),
            reason: "no such table".into(),
        };
        assert_eq!(format!("{err}"), "Cannot read schema of 'events': no such table");
    }
}
