//! # SQL Dialects
//!
//! Static capability table keyed by engine identity, plus the small set of
//! per-engine spelling differences the renderer needs (identifier quoting,
//! cast type names, null-safe equality, rounding and ceiling).
//!
//! | engine | full outer join | WITH clause |
//! |--------|-----------------|-------------|
//! | postgres | yes | yes |
//! | snowflake | yes | yes |
//! | bigquery | yes | yes |
//! | sqlserver | yes | no |
//! | synapse | yes | no |
//! | sqlite | yes | yes |
//! | mysql | no | yes |

use crate::catalog::ConnectionInfo;
use crate::plan::SqlType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Dialect resolution errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DialectError {
    #[error("Connection type '{engine}' is not supported. Supported connection types are {supported:?}")]
    UnsupportedEngine {
        engine: String,
        supported: Vec<&'static str>,
    },
    #[error("All input and output datasets must be in the same connection, found: {found:?}")]
    MixedConnections { found: Vec<String> },
    #[error("No datasets bound, cannot resolve a dialect")]
    NoDatasets,
}

/// Engine identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    Snowflake,
    BigQuery,
    SqlServer,
    Synapse,
    Sqlite,
    MySql,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::Snowflake => "snowflake",
            Engine::BigQuery => "bigquery",
            Engine::SqlServer => "sqlserver",
            Engine::Synapse => "synapse",
            Engine::Sqlite => "sqlite",
            Engine::MySql => "mysql",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = DialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        SUPPORTED_DIALECTS
            .iter()
            .map(|(engine, _)| *engine)
            .find(|engine| engine.as_str() == normalized)
            .ok_or_else(|| DialectError::UnsupportedEngine {
                engine: s.to_string(),
                supported: SUPPORTED_DIALECTS.iter().map(|(e, _)| e.as_str()).collect(),
            })
    }
}

/// What an engine can express
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialectCapabilities {
    pub supports_full_outer_join: bool,
    pub supports_with_clause: bool,
}

const fn caps(full_outer_join: bool, with_clause: bool) -> DialectCapabilities {
    DialectCapabilities {
        supports_full_outer_join: full_outer_join,
        supports_with_clause: with_clause,
    }
}

/// Capability table, shared read-only by every pipeline run
pub const SUPPORTED_DIALECTS: [(Engine, DialectCapabilities); 7] = [
    (Engine::Postgres, caps(true, true)),
    (Engine::Snowflake, caps(true, true)),
    (Engine::BigQuery, caps(true, true)),
    (Engine::SqlServer, caps(true, false)),
    (Engine::Synapse, caps(true, false)),
    (Engine::Sqlite, caps(true, true)),
    (Engine::MySql, caps(false, true)),
];

/// Look up an engine in the capability table
pub fn capabilities(engine: Engine) -> DialectCapabilities {
    SUPPORTED_DIALECTS
        .iter()
        .find(|(e, _)| *e == engine)
        .map_or(caps(false, false), |(_, c)| *c)
}

/// Engine plus the capabilities the plan is specialised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dialect {
    pub engine: Engine,
    pub capabilities: DialectCapabilities,
}

impl Dialect {
    pub fn new(engine: Engine) -> Self {
        Dialect {
            engine,
            capabilities: capabilities(engine),
        }
    }

    /// Same engine syntax, different capabilities (used to force a fallback path)
    pub fn with_capabilities(mut self, capabilities: DialectCapabilities) -> Self {
        if capabilities != self.capabilities {
            tracing::warn!(
                engine = %self.engine,
                full_outer_join = capabilities.supports_full_outer_join,
                with_clause = capabilities.supports_with_clause,
                "dialect_capabilities_overridden"
            );
        }
        self.capabilities = capabilities;
        self
    }

    pub fn quote_ident(&self, ident: &str) -> String {
        match self.engine {
            Engine::BigQuery | Engine::MySql => format!("`{}`", ident.replace('`', "``")),
            Engine::SqlServer | Engine::Synapse => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    pub fn type_name(&self, ty: SqlType) -> &'static str {
        match (self.engine, ty) {
            (Engine::Postgres, SqlType::String) => "TEXT",
            (Engine::Postgres, SqlType::Double) => "DOUBLE PRECISION",
            (Engine::Snowflake, SqlType::String) => "VARCHAR",
            (Engine::Snowflake | Engine::MySql, SqlType::Double) => "DOUBLE",
            (Engine::BigQuery, SqlType::String) => "STRING",
            (Engine::BigQuery, SqlType::Double) => "FLOAT64",
            (Engine::BigQuery, SqlType::Int) => "INT64",
            (Engine::SqlServer | Engine::Synapse, SqlType::String) => "NVARCHAR(4000)",
            (Engine::SqlServer | Engine::Synapse, SqlType::Double) => "FLOAT",
            (Engine::SqlServer | Engine::Synapse, SqlType::Int) => "INT",
            (Engine::Sqlite, SqlType::String) => "TEXT",
            (Engine::Sqlite, SqlType::Double) => "REAL",
            (Engine::MySql, SqlType::String) => "CHAR",
            (Engine::MySql, SqlType::Int) => "SIGNED",
            (_, SqlType::Int) => "INTEGER",
        }
    }

    /// Null-safe equality between two rendered operands
    pub fn null_safe_eq(&self, left: &str, right: &str) -> String {
        match self.engine {
            Engine::Sqlite => format!("({left} IS {right})"),
            Engine::MySql => format!("({left} <=> {right})"),
            Engine::SqlServer | Engine::Synapse => {
                format!("({left} = {right} OR ({left} IS NULL AND {right} IS NULL))")
            }
            _ => format!("({left} IS NOT DISTINCT FROM {right})"),
        }
    }

    pub fn ceil_function(&self) -> &'static str {
        match self.engine {
            Engine::SqlServer | Engine::Synapse => "CEILING",
            _ => "CEIL",
        }
    }

    /// Round to an integral value
    pub fn round(&self, operand: &str) -> String {
        match self.engine {
            Engine::SqlServer | Engine::Synapse => format!("ROUND({operand}, 0)"),
            _ => format!("ROUND({operand})"),
        }
    }
}

/// Resolve the single dialect shared by every bound dataset
pub fn resolve_unique_dialect<'a>(
    connections: impl IntoIterator<Item = &'a ConnectionInfo>,
) -> Result<Dialect, DialectError> {
    let mut seen: Vec<&ConnectionInfo> = Vec::new();
    for info in connections {
        if !seen.contains(&info) {
            seen.push(info);
        }
    }
    match seen.as_slice() {
        [] => Err(DialectError::NoDatasets),
        [only] => Ok(Dialect::new(only.engine_kind.parse()?)),
        many => Err(DialectError::MixedConnections {
            found: many.iter().map(ToString::to_string).collect(),
        }),
    }
}
