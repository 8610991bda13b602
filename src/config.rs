//! Configuration System
//!
//! Provides layered configuration loading from:
//! - a TOML file given on the command line
//! - Environment variables (CFSQL_* prefix)
//!
//! ## Example
//!
//! ```toml
//! [datasets.samples]
//! engine = "postgres"
//! connection = "warehouse"
//! table = "public.events"
//! columns = [
//!     { name = "user_id", type = "string" },
//!     { name = "item_id", type = "string" },
//! ]
//!
//! [scoring]
//! users_column_name = "user_id"
//! items_column_name = "item_id"
//! top_n_most_similar = 10
//! user_visit_threshold = 2
//! item_visit_threshold = 2
//! normalization_method = "l2"
//! collaborative_filtering_method = "item_based"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! CFSQL_SCORING__TOP_N_MOST_SIMILAR=20
//! CFSQL_LOGGING__FORMAT=json
//! ```
//!
//! Sections are read leniently; every recipe validates the sections it needs
//! against the bound dataset schemas and produces typed parameters
//! ([`ScoringParams`], [`SimilarityColumns`], [`SamplingParams`]) before any
//! plan node is built.

use crate::catalog::{column_type, ColumnSchema, ColumnType, Dataset};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration errors. Raised before any plan node is built and always
/// carry the offending parameter and value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("Parameter '{param}': column '{column}' does not exist in dataset '{dataset}'")]
    UnknownColumn {
        param: String,
        column: String,
        dataset: String,
    },

    #[error("Parameter '{param}' is {value}, expected {expected}")]
    OutOfRange {
        param: String,
        value: String,
        expected: String,
    },

    #[error("Parameter '{param}': column '{column}' has type {found}, expected {expected}")]
    InvalidColumnType {
        param: String,
        column: String,
        found: String,
        expected: &'static str,
    },

    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Datasets by role (`samples`, `scored_samples`, ...)
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetConfig>,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub custom_similarity: CustomSimilarityConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// One dataset binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Engine kind (postgres, snowflake, sqlite, ...)
    pub engine: String,

    /// Connection name; every dataset of a run must share it
    pub connection: String,

    /// `[schema.]table`
    pub table: String,

    /// Column schema; may be left empty when the executor can introspect it
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
}

/// Pipeline recipes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipe {
    /// Scores from a user-provided similarity dataset
    AffinityScore,
    CollaborativeFiltering,
    Sampling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMethod {
    L1,
    L2,
}

/// Orientation of collaborative filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CfMethod {
    UserBased,
    ItemBased,
}

/// What a provided similarity dataset compares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityType {
    UserSimilarity,
    ItemSimilarity,
}

impl From<SimilarityType> for CfMethod {
    fn from(kind: SimilarityType) -> Self {
        match kind {
            SimilarityType::UserSimilarity => CfMethod::UserBased,
            SimilarityType::ItemSimilarity => CfMethod::ItemBased,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    NoSampling,
    #[serde(rename = "negative_sampling_percentage")]
    NegativeSamplingPerc,
}

/// How negative samples are generated. Only one policy exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeSamplesGenerationMode {
    #[default]
    RemoveHistoricalSamples,
}

/// `[scoring]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub users_column_name: Option<String>,
    pub items_column_name: Option<String>,

    /// Explicit feedback when set, implicit otherwise
    pub ratings_column_name: Option<String>,

    /// Recency filtering; requires `top_n_most_recent`
    pub timestamps_column_name: Option<String>,
    pub top_n_most_recent: Option<i64>,

    pub top_n_most_similar: Option<i64>,
    pub user_visit_threshold: Option<i64>,
    pub item_visit_threshold: Option<i64>,
    pub normalization_method: Option<NormalizationMethod>,

    /// Orientation for computed similarity
    pub collaborative_filtering_method: Option<CfMethod>,
}

/// `[custom_similarity]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomSimilarityConfig {
    pub similarity_scores_type: Option<SimilarityType>,
    pub similarity_column_1_name: Option<String>,
    pub similarity_column_2_name: Option<String>,
    pub similarity_score_column_name: Option<String>,
}

/// `[sampling]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Key columns of the scored samples
    pub users_column_name: Option<String>,
    pub items_column_name: Option<String>,
    #[serde(default)]
    pub score_column_names: Vec<String>,

    pub training_samples_users_column_name: Option<String>,
    pub training_samples_items_column_name: Option<String>,

    pub historical_samples_users_column_name: Option<String>,
    pub historical_samples_items_column_name: Option<String>,

    pub sampling_method: Option<SamplingMethod>,
    /// Target share of negatives among samples, in percent, within [0, 100)
    pub negative_samples_percentage: Option<f64>,
    #[serde(default)]
    pub negative_samples_generation_mode: NegativeSamplesGenerationMode,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from specific file path, then `CFSQL_*` overrides
    pub fn from_file(path: &str) -> ConfigResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CFSQL_").split("__"))
            .extract()?)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(Figment::new().merge(Toml::string(raw)).extract()?)
    }

    pub fn dataset(&self, role: &str) -> Option<&DatasetConfig> {
        self.datasets.get(role)
    }
}

// Validation helpers

fn required<T: Clone>(value: Option<&T>, param: &str) -> ConfigResult<T> {
    value
        .cloned()
        .ok_or_else(|| ConfigError::MissingParameter(param.to_string()))
}

fn positive(value: Option<i64>, param: &str) -> ConfigResult<u32> {
    let value = value.ok_or_else(|| ConfigError::MissingParameter(param.to_string()))?;
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::OutOfRange {
            param: param.to_string(),
            value: value.to_string(),
            expected: "a positive integer".to_string(),
        })
}

fn existing_column(
    dataset: &dyn Dataset,
    param: &str,
    column: &str,
) -> ConfigResult<ColumnType> {
    column_type(dataset, column).ok_or_else(|| ConfigError::UnknownColumn {
        param: param.to_string(),
        column: column.to_string(),
        dataset: dataset.name().to_string(),
    })
}

fn numeric_column(dataset: &dyn Dataset, param: &str, column: &str) -> ConfigResult<()> {
    let found = existing_column(dataset, param, column)?;
    if found.is_numeric() {
        Ok(())
    } else {
        Err(ConfigError::InvalidColumnType {
            param: param.to_string(),
            column: column.to_string(),
            found: found.to_string(),
            expected: "a numeric type",
        })
    }
}

/// Keep only the N most recent interactions per anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecencyFilter {
    pub timestamps_column_name: String,
    pub top_n_most_recent: u32,
}

/// Validated scoring parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringParams {
    pub users_column_name: String,
    pub items_column_name: String,
    pub ratings_column_name: Option<String>,
    pub recency: Option<RecencyFilter>,
    pub top_n_most_similar: u32,
    pub user_visit_threshold: u32,
    pub item_visit_threshold: u32,
    pub normalization_method: NormalizationMethod,
}

impl ScoringConfig {
    /// Validate against the schema of the samples dataset
    pub fn validate(&self, samples: &dyn Dataset) -> ConfigResult<ScoringParams> {
        let users = required(self.users_column_name.as_ref(), "users_column_name")?;
        let items = required(self.items_column_name.as_ref(), "items_column_name")?;
        existing_column(samples, "users_column_name", &users)?;
        existing_column(samples, "items_column_name", &items)?;

        if let Some(ratings) = &self.ratings_column_name {
            numeric_column(samples, "ratings_column_name", ratings)?;
        }

        let recency = match &self.timestamps_column_name {
            None => None,
            Some(timestamps) => {
                let found = existing_column(samples, "timestamps_column_name", timestamps)?;
                if !found.is_orderable_time() {
                    return Err(ConfigError::InvalidColumnType {
                        param: "timestamps_column_name".to_string(),
                        column: timestamps.clone(),
                        found: found.to_string(),
                        expected: "a numeric, date or timestamp type",
                    });
                }
                Some(RecencyFilter {
                    timestamps_column_name: timestamps.clone(),
                    top_n_most_recent: positive(self.top_n_most_recent, "top_n_most_recent")?,
                })
            }
        };

        Ok(ScoringParams {
            users_column_name: users,
            items_column_name: items,
            ratings_column_name: self.ratings_column_name.clone(),
            recency,
            top_n_most_similar: positive(self.top_n_most_similar, "top_n_most_similar")?,
            user_visit_threshold: positive(self.user_visit_threshold, "user_visit_threshold")?,
            item_visit_threshold: positive(self.item_visit_threshold, "item_visit_threshold")?,
            normalization_method: required(
                self.normalization_method.as_ref(),
                "normalization_method",
            )?,
        })
    }

    pub fn cf_method(&self) -> ConfigResult<CfMethod> {
        required(
            self.collaborative_filtering_method.as_ref(),
            "collaborative_filtering_method",
        )
    }
}

/// Validated columns of a provided similarity dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityColumns {
    pub similarity_scores_type: SimilarityType,
    pub similarity_column_1_name: String,
    pub similarity_column_2_name: String,
    pub similarity_score_column_name: String,
}

impl CustomSimilarityConfig {
    pub fn validate(&self, similarity: &dyn Dataset) -> ConfigResult<SimilarityColumns> {
        let kind = required(self.similarity_scores_type.as_ref(), "similarity_scores_type")?;
        let first = required(self.similarity_column_1_name.as_ref(), "similarity_column_1_name")?;
        let second = required(self.similarity_column_2_name.as_ref(), "similarity_column_2_name")?;
        let score = required(
            self.similarity_score_column_name.as_ref(),
            "similarity_score_column_name",
        )?;
        existing_column(similarity, "similarity_column_1_name", &first)?;
        existing_column(similarity, "similarity_column_2_name", &second)?;
        numeric_column(similarity, "similarity_score_column_name", &score)?;
        Ok(SimilarityColumns {
            similarity_scores_type: kind,
            similarity_column_1_name: first,
            similarity_column_2_name: second,
            similarity_score_column_name: score,
        })
    }
}

/// Key columns of a training or historical samples dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleKeys {
    pub users_column_name: String,
    pub items_column_name: String,
}

/// Post-filter applied after labelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    NoSampling,
    /// Negatives allowed per positive as the reduced fraction
    /// `negatives / positives`, exact to one part per million
    NegativeSamplingPerc { negatives: i64, positives: i64 },
}

impl SamplingStrategy {
    /// Budget for a negative share of `percentage` percent, which must lie in [0, 100)
    pub fn negative_sampling(percentage: f64) -> ConfigResult<Self> {
        let negatives = (percentage * 10_000.0).round() as i64;
        if !(0.0..100.0).contains(&percentage) || negatives >= PARTS_PER_MILLION {
            return Err(ConfigError::OutOfRange {
                param: "negative_samples_percentage".to_string(),
                value: percentage.to_string(),
                expected: "a value in [0, 100)".to_string(),
            });
        }
        let positives = PARTS_PER_MILLION - negatives;
        let divisor = gcd(negatives, positives);
        Ok(SamplingStrategy::NegativeSamplingPerc {
            negatives: negatives / divisor,
            positives: positives / divisor,
        })
    }
}

const PARTS_PER_MILLION: i64 = 1_000_000;

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Validated sampling parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub users_column_name: String,
    pub items_column_name: String,
    pub score_column_names: Vec<String>,
    pub training_keys: SampleKeys,
    pub historical_keys: Option<SampleKeys>,
    pub strategy: SamplingStrategy,
    pub generation_mode: NegativeSamplesGenerationMode,
}

impl SamplingConfig {
    /// Validate against the bound datasets. Historical key columns are only
    /// required when a historical dataset is bound.
    pub fn validate(
        &self,
        scored: &dyn Dataset,
        training: &dyn Dataset,
        historical: Option<&dyn Dataset>,
    ) -> ConfigResult<SamplingParams> {
        let users = required(self.users_column_name.as_ref(), "users_column_name")?;
        let items = required(self.items_column_name.as_ref(), "items_column_name")?;
        existing_column(scored, "users_column_name", &users)?;
        existing_column(scored, "items_column_name", &items)?;

        if self.score_column_names.is_empty() {
            return Err(ConfigError::MissingParameter("score_column_names".to_string()));
        }
        for score in &self.score_column_names {
            numeric_column(scored, "score_column_names", score)?;
        }

        let training_keys = SampleKeys {
            users_column_name: required(
                self.training_samples_users_column_name.as_ref(),
                "training_samples_users_column_name",
            )?,
            items_column_name: required(
                self.training_samples_items_column_name.as_ref(),
                "training_samples_items_column_name",
            )?,
        };
        existing_column(
            training,
            "training_samples_users_column_name",
            &training_keys.users_column_name,
        )?;
        existing_column(
            training,
            "training_samples_items_column_name",
            &training_keys.items_column_name,
        )?;

        let historical_keys = match historical {
            None => None,
            Some(dataset) => {
                let keys = SampleKeys {
                    users_column_name: required(
                        self.historical_samples_users_column_name.as_ref(),
                        "historical_samples_users_column_name",
                    )?,
                    items_column_name: required(
                        self.historical_samples_items_column_name.as_ref(),
                        "historical_samples_items_column_name",
                    )?,
                };
                existing_column(
                    dataset,
                    "historical_samples_users_column_name",
                    &keys.users_column_name,
                )?;
                existing_column(
                    dataset,
                    "historical_samples_items_column_name",
                    &keys.items_column_name,
                )?;
                Some(keys)
            }
        };

        let strategy = match required(self.sampling_method.as_ref(), "sampling_method")? {
            SamplingMethod::NoSampling => SamplingStrategy::NoSampling,
            SamplingMethod::NegativeSamplingPerc => {
                let percentage = self.negative_samples_percentage.ok_or_else(|| {
                    ConfigError::MissingParameter("negative_samples_percentage".to_string())
                })?;
                SamplingStrategy::negative_sampling(percentage)?
            }
        };

        Ok(SamplingParams {
            users_column_name: users,
            items_column_name: items,
            score_column_names: self.score_column_names.clone(),
            training_keys,
            historical_keys,
            strategy,
            generation_mode: self.negative_samples_generation_mode,
        })
    }
}
