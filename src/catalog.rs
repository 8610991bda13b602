//! Catalog: dataset handles and their schemas
//!
//! A dataset handle is the pipeline's view of one table living in the target
//! engine: its name, the physical table it maps to, the connection it lives
//! on and its ordered column schema. Pipelines bind handles to roles
//! (`samples`, `scored_samples`, ...) through [`DatasetBindings`], which also
//! enforces that every bound dataset shares one engine and one connection.

use crate::dialect::{resolve_unique_dialect, Dialect, DialectError};
use crate::plan::{Relation, TableRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Column types as reported by dataset schemas
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Int,
    Bigint,
    Float,
    Double,
    Boolean,
    Date,
    Timestamp,
    #[serde(untagged)]
    Other(String),
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int | ColumnType::Bigint | ColumnType::Float | ColumnType::Double
        )
    }

    /// Types that can order interactions by recency
    pub fn is_orderable_time(&self) -> bool {
        self.is_numeric() || matches!(self, ColumnType::Date | ColumnType::Timestamp)
    }

    /// Map a declared SQL column type (SQLite affinity rules) to a column type
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("BIGINT") {
            ColumnType::Bigint
        } else if upper.contains("INT") {
            ColumnType::Int
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::String
        } else if upper.contains("REAL") || upper.contains("DOUB") {
            ColumnType::Double
        } else if upper.contains("FLOA") || upper.contains("NUMERIC") || upper.contains("DECIMAL")
        {
            ColumnType::Float
        } else if upper.contains("BOOL") {
            ColumnType::Boolean
        } else if upper.contains("TIMESTAMP") || upper.contains("DATETIME") {
            ColumnType::Timestamp
        } else if upper.contains("DATE") {
            ColumnType::Date
        } else {
            ColumnType::Other(declared.to_string())
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::String => f.write_str("string"),
            ColumnType::Int => f.write_str("int"),
            ColumnType::Bigint => f.write_str("bigint"),
            ColumnType::Float => f.write_str("float"),
            ColumnType::Double => f.write_str("double"),
            ColumnType::Boolean => f.write_str("boolean"),
            ColumnType::Date => f.write_str("date"),
            ColumnType::Timestamp => f.write_str("timestamp"),
            ColumnType::Other(raw) => f.write_str(raw),
        }
    }
}

/// One column of a dataset schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnSchema {
            name: name.into(),
            column_type,
        }
    }
}

/// Engine and connection a dataset lives on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub engine_kind: String,
    pub connection_name: String,
}

impl ConnectionInfo {
    pub fn new(engine_kind: impl Into<String>, connection_name: impl Into<String>) -> Self {
        ConnectionInfo {
            engine_kind: engine_kind.into(),
            connection_name: connection_name.into(),
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.engine_kind, self.connection_name)
    }
}

/// A table the pipelines read from or write into
pub trait Dataset: Send + Sync + fmt::Debug {
    /// Dataset name, used in logs and errors
    fn name(&self) -> &str;

    fn table_ref(&self) -> &TableRef;

    fn connection(&self) -> &ConnectionInfo;

    /// Ordered column schema
    fn read_schema(&self) -> Vec<ColumnSchema>;
}

/// Look up a column type by name
pub fn column_type(dataset: &dyn Dataset, column: &str) -> Option<ColumnType> {
    dataset
        .read_schema()
        .into_iter()
        .find(|c| c.name == column)
        .map(|c| c.column_type)
}

/// Relation reading the dataset's table with its current columns
pub fn relation_of(dataset: &dyn Dataset) -> Relation {
    Relation::table(
        dataset.table_ref().clone(),
        dataset.read_schema().into_iter().map(|c| c.name).collect(),
    )
}

/// Dataset handle with a schema known up front
#[derive(Debug, Clone, PartialEq)]
pub struct TableHandle {
    name: String,
    table: TableRef,
    connection: ConnectionInfo,
    schema: Vec<ColumnSchema>,
}

impl TableHandle {
    pub fn new(
        name: impl Into<String>,
        table: TableRef,
        connection: ConnectionInfo,
        schema: Vec<ColumnSchema>,
    ) -> Self {
        TableHandle {
            name: name.into(),
            table,
            connection,
            schema,
        }
    }
}

impl Dataset for TableHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn table_ref(&self) -> &TableRef {
        &self.table
    }

    fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    fn read_schema(&self) -> Vec<ColumnSchema> {
        self.schema.clone()
    }
}

/// Error raised when a required role has no dataset
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Required dataset '{0}' is not bound")]
pub struct MissingDataset(pub String);

/// Role -> dataset bindings for one pipeline run
#[derive(Debug, Clone, Default)]
pub struct DatasetBindings {
    inputs: BTreeMap<String, Arc<dyn Dataset>>,
    outputs: BTreeMap<String, Arc<dyn Dataset>>,
}

impl DatasetBindings {
    pub fn new() -> Self {
        DatasetBindings::default()
    }

    pub fn with_input(mut self, role: &str, dataset: Arc<dyn Dataset>) -> Self {
        self.inputs.insert(role.to_string(), dataset);
        self
    }

    pub fn with_output(mut self, role: &str, dataset: Arc<dyn Dataset>) -> Self {
        self.outputs.insert(role.to_string(), dataset);
        self
    }

    pub fn input(&self, role: &str) -> Result<Arc<dyn Dataset>, MissingDataset> {
        self.optional_input(role)
            .ok_or_else(|| MissingDataset(role.to_string()))
    }

    pub fn optional_input(&self, role: &str) -> Option<Arc<dyn Dataset>> {
        self.inputs.get(role).cloned()
    }

    pub fn output(&self, role: &str) -> Result<Arc<dyn Dataset>, MissingDataset> {
        self.optional_output(role)
            .ok_or_else(|| MissingDataset(role.to_string()))
    }

    pub fn optional_output(&self, role: &str) -> Option<Arc<dyn Dataset>> {
        self.outputs.get(role).cloned()
    }

    /// One engine and one connection across every input and output
    pub fn resolve_dialect(&self) -> Result<Dialect, DialectError> {
        resolve_unique_dialect(
            self.inputs
                .values()
                .chain(self.outputs.values())
                .map(|d| d.connection()),
        )
    }
}
