//! # Positive/Negative Sampling
//!
//! Labels scored `(user, item)` pairs for training a model on top of the
//! collaborative filtering scores:
//!
//! ```text
//! scored samples ──LEFT JOIN── training samples   → target
//!                └─LEFT JOIN── historical samples → score_sample
//!     ↓
//! drop negatives already seen in history
//!     ↓
//! post-filter: none, or a per-user negative budget
//!     ↓
//! (user, item, scores..., target)
//! ```
//!
//! A pair is positive (`target = 1`) when it appears in the training
//! samples. Training and historical samples are grouped by key pair before
//! joining, so duplicates never multiply scored rows.

use crate::catalog::{relation_of, Dataset, DatasetBindings};
use crate::config::{
    Config, NegativeSamplesGenerationMode, SampleKeys, SamplingParams, SamplingStrategy,
};
use crate::descriptions;
use crate::dialect::Dialect;
use crate::error::PipelineResult;
use crate::execution::ExecutionPlan;
use crate::plan::{
    col, lit_int, qcol, rename_and_cast, Expr, JoinKind, OrderItem, PlanResult,
    Relation, SelectQuery, SqlRenderer, SqlType, Window,
};
use std::sync::Arc;

/// Label column of the sampling output
pub const TARGET_COLUMN_NAME: &str = "target";

const IS_TRAINING_SAMPLE: &str = "is_training_sample";
const IS_SCORE_SAMPLE: &str = "is_score_sample";
const SCORE_SAMPLE: &str = "score_sample";
const NB_POSITIVE: &str = "_nb_positive";
const NEGATIVE_RANK: &str = "_negative_rank";

/// Dataset roles read and written by the sampling recipe
pub mod roles {
    pub const SCORED_SAMPLES: &str = "scored_samples";
    pub const TRAINING_SAMPLES: &str = "training_samples";
    pub const HISTORICAL_SAMPLES: &str = "historical_samples";
    pub const POSITIVE_NEGATIVE_SAMPLES: &str = "positive_negative_samples";
}

/// A sampling run
#[derive(Debug)]
pub struct SamplingPipeline {
    dialect: Dialect,
    params: SamplingParams,
    scored: Relation,
    training: Relation,
    historical: Option<Relation>,
    output: Arc<dyn Dataset>,
}

impl SamplingPipeline {
    pub fn from_config(config: &Config, bindings: &DatasetBindings) -> PipelineResult<Self> {
        let dialect = bindings.resolve_dialect()?;
        let scored = bindings.input(roles::SCORED_SAMPLES)?;
        let training = bindings.input(roles::TRAINING_SAMPLES)?;
        let historical = bindings.optional_input(roles::HISTORICAL_SAMPLES);
        let params =
            config
                .sampling
                .validate(scored.as_ref(), training.as_ref(), historical.as_deref())?;
        tracing::debug!(
            engine = %dialect.engine,
            strategy = ?params.strategy,
            historical = historical.is_some(),
            "sampling_configured"
        );
        Ok(SamplingPipeline {
            dialect,
            scored: relation_of(scored.as_ref()),
            training: relation_of(training.as_ref()),
            historical: historical.as_deref().map(relation_of),
            output: bindings.output(roles::POSITIVE_NEGATIVE_SAMPLES)?,
            params,
        })
    }

    /// Same pipeline specialised for another dialect
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Compose the single statement of this run
    pub fn compose(&self) -> PlanResult<ExecutionPlan> {
        let samples = self.build()?;
        let mut plan = ExecutionPlan::new(self.dialect);
        plan.push(
            Arc::clone(&self.output),
            SqlRenderer::new(self.dialect).render(&samples)?,
            descriptions::sampling(&self.params),
        );
        Ok(plan)
    }

    /// Output node `(user, item, scores..., target)`
    pub fn build(&self) -> PlanResult<Arc<SelectQuery>> {
        let training = self.keyed_samples(
            &self.training,
            &self.params.training_keys,
            "_training_samples",
            IS_TRAINING_SAMPLE,
        )?;
        let historical = match (&self.historical, &self.params.historical_keys) {
            (Some(relation), Some(keys)) => Some(self.keyed_samples(
                relation,
                keys,
                "_historical_samples",
                IS_SCORE_SAMPLE,
            )?),
            _ => None,
        };

        let scored = self.scored_samples()?;
        let all_scores = self.all_cf_scores(scored, training, historical.clone())?;
        let labelled = self.with_target(all_scores, historical.is_some())?;
        tracing::debug!(stage = "label", "sampling_stage_built");

        let labelled = if historical.is_some() {
            match self.params.generation_mode {
                NegativeSamplesGenerationMode::RemoveHistoricalSamples => {
                    self.remove_historical_samples(labelled)?
                }
            }
        } else {
            labelled
        };

        let sampled = match self.params.strategy {
            SamplingStrategy::NoSampling => labelled,
            SamplingStrategy::NegativeSamplingPerc {
                negatives,
                positives,
            } => self.negative_sampling(labelled, negatives, positives)?,
        };
        tracing::debug!(stage = "post_filter", "sampling_stage_built");

        let users = self.params.users_column_name.as_str();
        let items = self.params.items_column_name.as_str();
        SelectQuery::from(sampled, "_positive_negative_samples")
            .select_all("_positive_negative_samples", &self.output_columns())
            .order_by(OrderItem::asc(col(users)))
            .order_by(OrderItem::asc(col(items)))
            .finish()
    }

    /// `(user, item, scores..., target)`
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = self.key_columns();
        columns.extend(self.params.score_column_names.iter().cloned());
        columns.push(TARGET_COLUMN_NAME.to_string());
        columns
    }

    fn key_columns(&self) -> Vec<String> {
        vec![
            self.params.users_column_name.clone(),
            self.params.items_column_name.clone(),
        ]
    }

    /// Sample keys renamed onto the canonical pair, deduplicated and flagged
    fn keyed_samples(
        &self,
        relation: &Relation,
        keys: &SampleKeys,
        alias: &str,
        flag: &str,
    ) -> PlanResult<Arc<SelectQuery>> {
        let users = self.params.users_column_name.as_str();
        let items = self.params.items_column_name.as_str();
        let renamed = rename_and_cast(
            relation.clone(),
            alias,
            &[
                (keys.users_column_name.as_str(), users, Some(SqlType::String)),
                (keys.items_column_name.as_str(), items, Some(SqlType::String)),
            ],
        )?;
        let grouped_alias = format!("{alias}_keys");
        SelectQuery::from(renamed, &grouped_alias)
            .select(qcol(grouped_alias.as_str(), users))
            .select(qcol(grouped_alias.as_str(), items))
            .select_as(lit_int(1), flag)
            .group_by(qcol(grouped_alias.as_str(), users))
            .group_by(qcol(grouped_alias.as_str(), items))
            .finish()
    }

    fn scored_samples(&self) -> PlanResult<Arc<SelectQuery>> {
        let users = self.params.users_column_name.as_str();
        let items = self.params.items_column_name.as_str();
        let mut mapping = vec![
            (users, users, Some(SqlType::String)),
            (items, items, Some(SqlType::String)),
        ];
        for score in &self.params.score_column_names {
            mapping.push((score.as_str(), score.as_str(), Some(SqlType::Double)));
        }
        rename_and_cast(self.scored.clone(), "_scored_samples", &mapping)
    }

    /// Scored pairs with their training (and historical) flags. Rows where
    /// every score is NULL are dropped.
    fn all_cf_scores(
        &self,
        scored: Arc<SelectQuery>,
        training: Arc<SelectQuery>,
        historical: Option<Arc<SelectQuery>>,
    ) -> PlanResult<Arc<SelectQuery>> {
        const SCORES: &str = "all_cf_scores";
        const TRAINING: &str = "samples_for_training_to_join";
        const HISTORICAL: &str = "samples_for_scores_to_join";

        let keys_match = |other: &str| -> Vec<Expr> {
            self.key_columns()
                .iter()
                .map(|key| qcol(other, key.as_str()).null_safe_eq(qcol(SCORES, key.as_str())))
                .collect()
        };

        let mut query = SelectQuery::from(scored, SCORES)
            .join(training, JoinKind::Left, keys_match(TRAINING), TRAINING)
            .select(qcol(TRAINING, IS_TRAINING_SAMPLE));
        if let Some(historical) = historical {
            query = query
                .join(historical, JoinKind::Left, keys_match(HISTORICAL), HISTORICAL)
                .select(qcol(HISTORICAL, IS_SCORE_SAMPLE));
        }
        query = query
            .select_all(SCORES, &self.key_columns())
            .select_all(SCORES, &self.params.score_column_names);

        let any_score = self
            .params
            .score_column_names
            .iter()
            .map(|score| qcol(SCORES, score.as_str()).is_not_null())
            .reduce(Expr::or);
        if let Some(predicate) = any_score {
            query = query.filter(predicate);
        }
        query.finish()
    }

    fn with_target(
        &self,
        all_scores: Arc<SelectQuery>,
        has_history: bool,
    ) -> PlanResult<Arc<SelectQuery>> {
        const ALIAS: &str = "all_cf_scores_with_target";
        let mut query = SelectQuery::from(all_scores, ALIAS)
            .select_all(ALIAS, &self.key_columns())
            .select_all(ALIAS, &self.params.score_column_names)
            .select_as(
                qcol(ALIAS, IS_TRAINING_SAMPLE)
                    .coalesce(lit_int(0))
                    .cast(SqlType::Int),
                TARGET_COLUMN_NAME,
            );
        if has_history {
            query = query.select_as(
                qcol(ALIAS, IS_SCORE_SAMPLE)
                    .coalesce(lit_int(0))
                    .cast(SqlType::Int),
                SCORE_SAMPLE,
            );
        }
        query.finish()
    }

    /// Negatives already present in the historical samples are removed
    fn remove_historical_samples(&self, labelled: Arc<SelectQuery>) -> PlanResult<Arc<SelectQuery>> {
        const ALIAS: &str = "remove_negative_samples_seen";
        SelectQuery::from(labelled, ALIAS)
            .select_all(ALIAS, &self.output_columns())
            .filter(
                qcol(ALIAS, TARGET_COLUMN_NAME)
                    .eq(lit_int(1))
                    .or(qcol(ALIAS, SCORE_SAMPLE).eq(lit_int(0))),
            )
            .finish()
    }

    /// Keep every positive and, per user, the first
    /// `ceil(nb_positive × negatives / positives)` negatives by item, then
    /// by score descending.
    /// `rank <= ceil(x)` is evaluated as `rank - 1 < x` in integers.
    fn negative_sampling(
        &self,
        labelled: Arc<SelectQuery>,
        negatives: i64,
        positives: i64,
    ) -> PlanResult<Arc<SelectQuery>> {
        const ALIAS: &str = "_labelled";
        let users = self.params.users_column_name.as_str();
        let items = self.params.items_column_name.as_str();
        let columns = self.output_columns();

        let ranked = SelectQuery::from(labelled, ALIAS)
            .select_all(ALIAS, &columns)
            .select_as(
                qcol(ALIAS, TARGET_COLUMN_NAME)
                    .sum_over(Window::partition_by(vec![qcol(ALIAS, users)])),
                NB_POSITIVE,
            )
            .select_as(
                Expr::row_number_over(
                    self.params.score_column_names.iter().fold(
                        Window::partition_by(vec![qcol(ALIAS, users), qcol(ALIAS, TARGET_COLUMN_NAME)])
                            .order_by(OrderItem::asc(qcol(ALIAS, items))),
                        |window, score| window.order_by(OrderItem::desc(qcol(ALIAS, score.as_str()))),
                    ),
                ),
                NEGATIVE_RANK,
            )
            .finish()?;

        let within_budget = qcol("_ranked", NEGATIVE_RANK)
            .minus(lit_int(1))
            .times(lit_int(positives))
            .lt(qcol("_ranked", NB_POSITIVE).times(lit_int(negatives)));
        SelectQuery::from(ranked, "_ranked")
            .select_all("_ranked", &columns)
            .filter(
                qcol("_ranked", TARGET_COLUMN_NAME)
                    .eq(lit_int(1))
                    .or(within_budget),
            )
            .finish()
    }
}
