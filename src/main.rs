//! `cfsql` command line
//!
//! Composes one recipe from a TOML configuration and either prints the
//! rendered SQL or runs it against a SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! # Print the statements for the engine named in the config
//! cfsql --config cf.toml collaborative-filtering
//!
//! # Execute them against a SQLite file
//! cfsql --config cf.toml --sqlite events.db sampling
//! ```
//!
//! Logging goes to stderr. `CFSQL_LOG` overrides `logging.level`.

use anyhow::{Context, Result};
use cfsql::catalog::ConnectionInfo;
use cfsql::config::LoggingConfig;
use cfsql::plan::TableRef;
use cfsql::sampling::roles as sampling_roles;
use cfsql::scoring::roles as scoring_roles;
use cfsql::{compose, run_plan, Config, Dataset, DatasetBindings, Recipe, SqliteExecutor, TableHandle};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser)]
#[command(name = "cfsql")]
#[command(about = "Collaborative filtering as SQL pipelines")]
struct Args {
    /// Path to the TOML configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Execute against this SQLite database instead of printing the SQL
    #[arg(long)]
    sqlite: Option<PathBuf>,

    #[command(subcommand)]
    recipe: RecipeCommand,
}

#[derive(Subcommand, Clone, Copy)]
enum RecipeCommand {
    /// Similarity computed from the samples, then scores
    CollaborativeFiltering,
    /// Scores from a provided similarity dataset
    CustomCollaborativeFiltering,
    /// Positive/negative training samples from scored pairs
    Sampling,
}

impl From<RecipeCommand> for Recipe {
    fn from(command: RecipeCommand) -> Self {
        match command {
            RecipeCommand::CollaborativeFiltering => Recipe::CollaborativeFiltering,
            RecipeCommand::CustomCollaborativeFiltering => Recipe::AffinityScore,
            RecipeCommand::Sampling => Recipe::Sampling,
        }
    }
}

/// Roles a recipe writes; every other configured dataset is an input
fn output_roles(recipe: Recipe) -> &'static [&'static str] {
    match recipe {
        Recipe::CollaborativeFiltering => &[
            scoring_roles::SCORED_SAMPLES,
            scoring_roles::SIMILARITY_SCORES,
        ],
        Recipe::AffinityScore => &[scoring_roles::SCORED_SAMPLES],
        Recipe::Sampling => &[sampling_roles::POSITIVE_NEGATIVE_SAMPLES],
    }
}

fn bind_datasets(
    config: &Config,
    recipe: Recipe,
    executor: Option<&SqliteExecutor>,
) -> Result<DatasetBindings> {
    let mut bindings = DatasetBindings::new();
    for (role, dataset) in &config.datasets {
        let table = TableRef::parse(&dataset.table);
        let handle: Arc<dyn Dataset> = match executor {
            Some(executor) => Arc::new(
                executor
                    .dataset(role, table)
                    .with_context(|| format!("reading schema of dataset '{role}'"))?,
            ),
            None => Arc::new(TableHandle::new(
                role.as_str(),
                table,
                ConnectionInfo::new(dataset.engine.as_str(), dataset.connection.as_str()),
                dataset.columns.clone(),
            )),
        };
        bindings = if output_roles(recipe).iter().any(|r| *r == role.as_str()) {
            bindings.with_output(role, handle)
        } else {
            bindings.with_input(role, handle)
        };
    }
    Ok(bindings)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.display().to_string();
    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading configuration from '{config_path}'"))?;
    init_tracing(&config.logging);

    let recipe = Recipe::from(args.recipe);
    let executor = args
        .sqlite
        .as_deref()
        .map(SqliteExecutor::open)
        .transpose()
        .context("opening SQLite database")?;

    let bindings = bind_datasets(&config, recipe, executor.as_ref())?;
    let plan = compose(recipe, &config, &bindings)?;

    match &executor {
        Some(executor) => {
            run_plan(executor, &plan)?;
            for statement in &plan.statements {
                println!("{} -> {}", statement.target.name(), statement.target.table_ref());
            }
        }
        None => {
            for statement in &plan.statements {
                println!("-- {} ({})", statement.target.name(), statement.target.table_ref());
                println!("{};\n", statement.sql);
            }
        }
    }
    Ok(())
}

fn init_tracing(logging_config: &LoggingConfig) {
    // CFSQL_LOG takes precedence over the configured level
    let level = env::var("CFSQL_LOG")
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());
    let json = logging_config.format == "json";

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = TRACE_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter.clone())
            .with_ansi(false)
            .with_writer(non_blocking.clone())
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if json {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}
