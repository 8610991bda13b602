//! # cfsql
//!
//! Collaborative filtering computed inside the database: every recipe is
//! composed as a graph of relational plan nodes, rendered once into SQL for
//! the engine the datasets live on, and handed to an execution sink.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Config (TOML + CFSQL_* env)        DatasetBindings (role → dataset)
//!     ↓                                   ↓
//! [Validation]            → typed parameters, one dialect per run
//!     ↓
//! [Scoring / Sampling]    → plan nodes (Arc-shared DAG)
//!     ↓
//! [SqlRenderer]           → WITH-hoisted or inlined SQL per dialect
//!     ↓
//! [ExecutionPlan]         → ordered statements + column descriptions
//!     ↓
//! [QueryExecutor]         → materialized output datasets
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cfsql::{compose, Config, DatasetBindings, Recipe};
//!
//! let config = Config::from_file("cf.toml")?;
//! let bindings = DatasetBindings::new()
//!     .with_input("samples", samples)
//!     .with_output("scored_samples", scores);
//! let plan = compose(Recipe::CollaborativeFiltering, &config, &bindings)?;
//! for statement in &plan.statements {
//!     println!("{}", statement.sql);
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `dialect` | Engine identities, capability table, SQL spellings |
//! | `plan` | Plan nodes, validation and SQL rendering |
//! | `catalog` | Dataset handles, schemas and role bindings |
//! | `config` | Layered configuration and parameter validation |
//! | `scoring` | Visits, similarity, Top-N and score aggregation |
//! | `sampling` | Positive/negative training samples |
//! | `execution` | Execution plans and the SQLite sink |

pub mod catalog;
pub mod config;
pub mod descriptions;
pub mod dialect;
pub mod error;
pub mod execution;
pub mod plan;
pub mod sampling;
pub mod scoring;

pub use catalog::{ColumnSchema, ColumnType, ConnectionInfo, Dataset, DatasetBindings, TableHandle};
pub use config::{Config, ConfigError, Recipe};
pub use dialect::{Dialect, DialectCapabilities, DialectError, Engine};
pub use error::{PipelineError, PipelineResult};
pub use execution::{run_plan, ExecutionPlan, QueryExecutor, SqliteExecutor};
pub use plan::{PlanError, SqlRenderer};
pub use sampling::SamplingPipeline;
pub use scoring::ScoringPipeline;

/// Validate `config` against `bindings` and compose the statements of `recipe`
pub fn compose(
    recipe: Recipe,
    config: &Config,
    bindings: &DatasetBindings,
) -> PipelineResult<ExecutionPlan> {
    let plan = match recipe {
        Recipe::CollaborativeFiltering => {
            ScoringPipeline::collaborative_filtering(config, bindings)?.compose()?
        }
        Recipe::AffinityScore => {
            ScoringPipeline::custom_collaborative_filtering(config, bindings)?.compose()?
        }
        Recipe::Sampling => SamplingPipeline::from_config(config, bindings)?.compose()?,
    };
    tracing::info!(
        ?recipe,
        engine = %plan.dialect.engine,
        statements = plan.statements.len(),
        "pipeline_composed"
    );
    Ok(plan)
}
