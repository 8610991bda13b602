//! Pipeline Error Types

use crate::catalog::MissingDataset;
use crate::config::ConfigError;
use crate::dialect::DialectError;
use crate::execution::ExecutionError;
use crate::plan::PlanError;
use thiserror::Error;

/// Errors surfaced by a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid or missing parameter
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unknown engine or mixed connections
    #[error(transparent)]
    Dialect(#[from] DialectError),

    /// Structural plan error
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    MissingDataset(#[from] MissingDataset),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
