//! # Collaborative Filtering Scoring
//!
//! Composes the scoring pipeline as plan nodes:
//!
//! ```text
//! samples
//!     ↓
//! [prepare]     cast → (recency) → visit counts → thresholds → normalization
//!     ↓                                                         │
//! [similarity]  computed self-join, or a provided dataset        │
//!     ↓                                                         │
//! [aggregate]   Top-N per anchor → join normalized rows ←────────┘
//!     ↓
//! scores (anchor, pivot, score)
//! ```
//!
//! The variant is picked once: [`ComputedSimilarity`] derives the similarity
//! matrix from the samples, [`ProvidedSimilarity`] reads it from a dataset.
//! Implicit versus explicit feedback is a [`FeedbackModel`] carried in the
//! [`ScoringContext`]; stages ask it for expressions instead of branching.

mod aggregate;
mod similarity;
mod top_n;
mod visits;

pub use aggregate::aggregate_scores;
pub use similarity::computed_similarity;
pub use top_n::top_n_similar;
pub use visits::normalized_interactions;

use crate::catalog::{relation_of, Dataset, DatasetBindings};
use crate::config::{CfMethod, Config, ScoringParams, SimilarityColumns};
use crate::descriptions;
use crate::dialect::Dialect;
use crate::error::PipelineResult;
use crate::execution::ExecutionPlan;
use crate::plan::{rename_and_cast, PlanResult, Relation, SelectQuery, SqlRenderer, SqlType};
use std::sync::Arc;

/// Similarity column of similarity outputs
pub const SIMILARITY_COLUMN_NAME: &str = "similarity";
/// Score column of scoring outputs
pub const SCORE_COLUMN_NAME: &str = "score";

/// Dataset roles read and written by the scoring recipes
pub mod roles {
    pub const SAMPLES: &str = "samples";
    pub const SIMILARITY_SCORES: &str = "similarity_scores";
    pub const SCORED_SAMPLES: &str = "scored_samples";
}

/// Canonical column names threaded between stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnManifest {
    pub users: String,
    pub items: String,
    pub rating: Option<String>,
    pub timestamp: Option<String>,
    /// Entity similarities are computed for
    pub anchor: String,
    /// Entity shared between two anchors
    pub pivot: String,
}

impl ColumnManifest {
    pub fn new(params: &ScoringParams, method: CfMethod) -> Self {
        let (anchor, pivot) = match method {
            CfMethod::UserBased => (&params.users_column_name, &params.items_column_name),
            CfMethod::ItemBased => (&params.items_column_name, &params.users_column_name),
        };
        ColumnManifest {
            users: params.users_column_name.clone(),
            items: params.items_column_name.clone(),
            rating: params.ratings_column_name.clone(),
            timestamp: params
                .recency
                .as_ref()
                .map(|r| r.timestamps_column_name.clone()),
            anchor: anchor.clone(),
            pivot: pivot.clone(),
        }
    }

    pub fn anchor_1(&self) -> String {
        format!("{}_1", self.anchor)
    }

    pub fn anchor_2(&self) -> String {
        format!("{}_2", self.anchor)
    }

    /// Interaction columns kept through preparation
    pub fn interaction_columns(&self) -> Vec<String> {
        let mut columns = vec![self.users.clone(), self.items.clone()];
        columns.extend(self.rating.clone());
        columns
    }

    /// `(anchor_1, anchor_2, similarity)`
    pub fn similarity_columns(&self) -> Vec<String> {
        vec![
            self.anchor_1(),
            self.anchor_2(),
            SIMILARITY_COLUMN_NAME.to_string(),
        ]
    }

    /// `(anchor, pivot, score)`
    pub fn score_columns(&self) -> Vec<String> {
        vec![
            self.anchor.clone(),
            self.pivot.clone(),
            SCORE_COLUMN_NAME.to_string(),
        ]
    }
}

/// Implicit (presence only) or explicit (rated) feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackModel {
    Implicit,
    Explicit,
}

impl FeedbackModel {
    pub fn of(params: &ScoringParams) -> Self {
        if params.ratings_column_name.is_some() {
            FeedbackModel::Explicit
        } else {
            FeedbackModel::Implicit
        }
    }
}

/// Everything a stage needs, fixed for one pipeline run
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub dialect: Dialect,
    pub params: ScoringParams,
    pub manifest: ColumnManifest,
    pub model: FeedbackModel,
    /// Raw samples
    pub samples: Relation,
}

impl ScoringContext {
    pub fn new(dialect: Dialect, params: ScoringParams, method: CfMethod, samples: Relation) -> Self {
        ScoringContext {
            dialect,
            manifest: ColumnManifest::new(&params, method),
            model: FeedbackModel::of(&params),
            params,
            samples,
        }
    }
}

/// Stage interface shared by every scoring variant
pub trait ScoringStages: Send + Sync + std::fmt::Debug {
    /// Normalized interactions, shared by similarity and aggregation
    fn prepare(&self, ctx: &ScoringContext) -> PlanResult<Relation> {
        normalized_interactions(ctx)
    }

    /// Similarity matrix `(anchor_1, anchor_2, similarity)`
    fn similarity(&self, ctx: &ScoringContext, normed: &Relation) -> PlanResult<Arc<SelectQuery>>;

    /// Top-N similar anchors, then scores `(anchor, pivot, score)`
    fn aggregate(
        &self,
        ctx: &ScoringContext,
        similarity: Relation,
        normed: &Relation,
    ) -> PlanResult<Arc<SelectQuery>> {
        let top_n = top_n_similar(ctx, similarity)?;
        aggregate_scores(ctx, top_n, normed)
    }
}

/// Similarity derived from the samples themselves
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputedSimilarity;

impl ScoringStages for ComputedSimilarity {
    fn similarity(&self, ctx: &ScoringContext, normed: &Relation) -> PlanResult<Arc<SelectQuery>> {
        computed_similarity(ctx, normed)
    }
}

/// Similarity read from a user-provided dataset
#[derive(Debug, Clone)]
pub struct ProvidedSimilarity {
    pub source: Relation,
    pub columns: SimilarityColumns,
}

impl ScoringStages for ProvidedSimilarity {
    fn similarity(&self, ctx: &ScoringContext, _normed: &Relation) -> PlanResult<Arc<SelectQuery>> {
        let anchor_1 = ctx.manifest.anchor_1();
        let anchor_2 = ctx.manifest.anchor_2();
        rename_and_cast(
            self.source.clone(),
            "_sim_renamed",
            &[
                (
                    self.columns.similarity_column_1_name.as_str(),
                    anchor_1.as_str(),
                    Some(SqlType::String),
                ),
                (
                    self.columns.similarity_column_2_name.as_str(),
                    anchor_2.as_str(),
                    Some(SqlType::String),
                ),
                (
                    self.columns.similarity_score_column_name.as_str(),
                    SIMILARITY_COLUMN_NAME,
                    Some(SqlType::Double),
                ),
            ],
        )
    }
}

/// A scoring run: context, variant and output datasets
#[derive(Debug)]
pub struct ScoringPipeline {
    ctx: ScoringContext,
    stages: Box<dyn ScoringStages>,
    scored_samples: Arc<dyn Dataset>,
    similarity_scores: Option<Arc<dyn Dataset>>,
}

impl ScoringPipeline {
    /// Auto collaborative filtering: similarity computed from `samples`,
    /// optionally materialized into `similarity_scores`
    pub fn collaborative_filtering(config: &Config, bindings: &DatasetBindings) -> PipelineResult<Self> {
        let dialect = bindings.resolve_dialect()?;
        let samples = bindings.input(roles::SAMPLES)?;
        let params = config.scoring.validate(samples.as_ref())?;
        let method = config.scoring.cf_method()?;
        tracing::debug!(
            ?method,
            engine = %dialect.engine,
            similarity_output = bindings.optional_output(roles::SIMILARITY_SCORES).is_some(),
            "collaborative_filtering_configured"
        );
        Ok(ScoringPipeline {
            ctx: ScoringContext::new(dialect, params, method, relation_of(samples.as_ref())),
            stages: Box::new(ComputedSimilarity),
            scored_samples: bindings.output(roles::SCORED_SAMPLES)?,
            similarity_scores: bindings.optional_output(roles::SIMILARITY_SCORES),
        })
    }

    /// Scores from a provided similarity dataset
    pub fn custom_collaborative_filtering(
        config: &Config,
        bindings: &DatasetBindings,
    ) -> PipelineResult<Self> {
        let dialect = bindings.resolve_dialect()?;
        let samples = bindings.input(roles::SAMPLES)?;
        let similarity = bindings.input(roles::SIMILARITY_SCORES)?;
        let params = config.scoring.validate(samples.as_ref())?;
        let columns = config.custom_similarity.validate(similarity.as_ref())?;
        let method = CfMethod::from(columns.similarity_scores_type);
        tracing::debug!(?method, engine = %dialect.engine, "custom_collaborative_filtering_configured");
        Ok(ScoringPipeline {
            ctx: ScoringContext::new(dialect, params, method, relation_of(samples.as_ref())),
            stages: Box::new(ProvidedSimilarity {
                source: relation_of(similarity.as_ref()),
                columns,
            }),
            scored_samples: bindings.output(roles::SCORED_SAMPLES)?,
            similarity_scores: None,
        })
    }

    /// Same pipeline specialised for another dialect
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.ctx.dialect = dialect;
        self
    }

    pub fn context(&self) -> &ScoringContext {
        &self.ctx
    }

    /// Compose the statements of this run
    pub fn compose(&self) -> PlanResult<ExecutionPlan> {
        let renderer = SqlRenderer::new(self.ctx.dialect);
        let manifest = &self.ctx.manifest;
        let mut plan = ExecutionPlan::new(self.ctx.dialect);

        let normed = self.stages.prepare(&self.ctx)?;
        tracing::debug!(stage = "prepare", "scoring_stage_built");
        let similarity = self.stages.similarity(&self.ctx, &normed)?;
        tracing::debug!(stage = "similarity", "scoring_stage_built");

        let similarity = match &self.similarity_scores {
            Some(output) => {
                plan.push(
                    Arc::clone(output),
                    renderer.render(&similarity)?,
                    descriptions::similarity(manifest),
                );
                Relation::table(output.table_ref().clone(), manifest.similarity_columns())
            }
            None => Relation::from(similarity),
        };

        let scores = self.stages.aggregate(&self.ctx, similarity, &normed)?;
        tracing::debug!(stage = "aggregate", "scoring_stage_built");
        plan.push(
            Arc::clone(&self.scored_samples),
            renderer.render(&scores)?,
            descriptions::scores(manifest),
        );
        Ok(plan)
    }
}
