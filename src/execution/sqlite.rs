//! In-process SQLite execution sink
//!
//! Materializes statements with `CREATE TABLE ... AS`, introspects dataset
//! schemas through `pragma_table_info` and keeps column descriptions in a
//! side table. `sqrt` and `ceil` are registered as scalar functions so the
//! generated SQL does not depend on how the engine was compiled.

use super::{ColumnDescriptions, ExecutionError, ExecutionResult, QueryExecutor};
use crate::catalog::{ColumnSchema, ColumnType, ConnectionInfo, Dataset, TableHandle};
use crate::dialect::{Dialect, Engine};
use crate::plan::TableRef;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const COMMENTS_TABLE: &str = "_cfsql_column_comments";

/// SQLite-backed [`QueryExecutor`]
pub struct SqliteExecutor {
    conn: Connection,
    connection_name: String,
    dialect: Dialect,
}

impl SqliteExecutor {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> ExecutionResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, &path.display().to_string())
    }

    pub fn open_in_memory() -> ExecutionResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, "memory")
    }

    fn with_connection(conn: Connection, connection_name: &str) -> ExecutionResult<Self> {
        let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
        conn.create_scalar_function("sqrt", 1, flags, |ctx| {
            let value: Option<f64> = ctx.get(0)?;
            Ok(value.map(f64::sqrt))
        })?;
        conn.create_scalar_function("ceil", 1, flags, |ctx| {
            let value: Option<f64> = ctx.get(0)?;
            Ok(value.map(f64::ceil))
        })?;
        tracing::debug!(connection = connection_name, "sqlite_executor_opened");
        Ok(SqliteExecutor {
            conn,
            connection_name: connection_name.to_string(),
            dialect: Dialect::new(Engine::Sqlite),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo::new(Engine::Sqlite.as_str(), self.connection_name.clone())
    }

    /// Run raw SQL (schema setup, fixtures)
    pub fn execute_batch(&self, sql: &str) -> ExecutionResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Dataset handle for `table`, schema read from the database. A table
    /// that does not exist yet yields an empty schema.
    pub fn dataset(&self, name: &str, table: TableRef) -> ExecutionResult<TableHandle> {
        let schema = self.read_schema(&table)?;
        Ok(TableHandle::new(name, table, self.connection_info(), schema))
    }

    fn read_schema(&self, table: &TableRef) -> ExecutionResult<Vec<ColumnSchema>> {
        let schema_name = table.schema.as_deref().unwrap_or("main");
        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1, ?2) ORDER BY cid")
            .map_err(|e| ExecutionError::Schema {
                table: table.to_string(),
                reason: e.to_string(),
            })?;
        let rows = stmt.query_map(params![table.name, schema_name], |row| {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            Ok(ColumnSchema::new(name, ColumnType::from_declared(&declared)))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn qualified(&self, table: &TableRef) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                self.dialect.quote_ident(schema),
                self.dialect.quote_ident(&table.name)
            ),
            None => self.dialect.quote_ident(&table.name),
        }
    }

    /// Fetch all rows of a query
    pub fn fetch(&self, sql: &str) -> ExecutionResult<Vec<Vec<Value>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let rows = stmt.query_map([], |row| {
            (0..width).map(|idx| row.get::<_, Value>(idx)).collect()
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Stored description of one column, if any
    pub fn column_description(&self, table: &TableRef, column: &str) -> ExecutionResult<Option<String>> {
        let comment = self
            .conn
            .query_row(
                &format!(
                    "SELECT comment FROM {COMMENTS_TABLE} WHERE table_name = ?1 AND column_name = ?2"
                ),
                params![table.to_string(), column],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(comment.flatten())
    }

    fn check_target(&self, target: &dyn Dataset) -> ExecutionResult<()> {
        let connection = target.connection();
        if connection.engine_kind == Engine::Sqlite.as_str()
            && connection.connection_name == self.connection_name
        {
            Ok(())
        } else {
            Err(ExecutionError::ForeignDataset {
                executor: self.connection_info().to_string(),
                dataset: target.name().to_string(),
                connection: connection.to_string(),
            })
        }
    }
}

impl QueryExecutor for SqliteExecutor {
    fn execute(&self, sql: &str, target: &dyn Dataset) -> ExecutionResult<()> {
        self.check_target(target)?;
        let table = self.qualified(target.table_ref());
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
        let changes = self.conn.execute(&format!("CREATE TABLE {table} AS\n{sql}"), [])?;
        tracing::debug!(table = %target.table_ref(), changes, "sqlite_table_created");
        Ok(())
    }

    fn set_column_descriptions(
        &self,
        target: &dyn Dataset,
        descriptions: &ColumnDescriptions,
    ) -> ExecutionResult<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {COMMENTS_TABLE} (table_name TEXT, column_name TEXT, comment TEXT);"
        ))?;
        let table = target.table_ref().to_string();
        self.conn.execute(
            &format!("DELETE FROM {COMMENTS_TABLE} WHERE table_name = ?1"),
            params![table],
        )?;
        let mut insert = self.conn.prepare(&format!(
            "INSERT INTO {COMMENTS_TABLE} (table_name, column_name, comment) VALUES (?1, ?2, ?3)"
        ))?;
        for column in self.read_schema(target.table_ref())? {
            insert.execute(params![table, column.name, descriptions.get(&column.name)])?;
        }
        Ok(())
    }
}
