//! Score aggregation over the Top-N neighbourhood.
//!
//! Each anchor inherits the pivots its most similar anchors interacted with:
//!
//! - implicit feedback: `score = Σ similarity / top_n_most_similar`
//! - explicit feedback: `score = Σ similarity × centered rating / Σ |similarity|`
//!
//! Output rows are ordered by anchor ascending, score descending, pivot
//! ascending.

use super::visits::{CENTERED_RATING, NORMED_COUNT};
use super::{FeedbackModel, ScoringContext, SCORE_COLUMN_NAME, SIMILARITY_COLUMN_NAME};
use crate::plan::{
    col, lit_float, qcol, Expr, JoinKind, OrderItem, PlanResult, Relation, SelectQuery, SqlType,
};
use std::sync::Arc;

const TOP_N: &str = "_top_n";

impl FeedbackModel {
    /// Score expression over one `(anchor, pivot)` group
    fn score(self, ctx: &ScoringContext) -> Expr {
        let similarity = qcol(TOP_N, SIMILARITY_COLUMN_NAME);
        match self {
            FeedbackModel::Implicit => similarity
                .sum()
                .div(lit_float(f64::from(ctx.params.top_n_most_similar))),
            FeedbackModel::Explicit => similarity
                .clone()
                .times(qcol(NORMED_COUNT, CENTERED_RATING))
                .sum()
                .div(similarity.abs().sum().null_if(lit_float(0.0))),
        }
    }
}

/// Join the Top-N similar anchors with the normalized interactions of the
/// neighbours and aggregate one score per `(anchor, pivot)`
pub fn aggregate_scores(
    ctx: &ScoringContext,
    top_n: Arc<SelectQuery>,
    normed: &Relation,
) -> PlanResult<Arc<SelectQuery>> {
    let manifest = &ctx.manifest;
    let anchor = manifest.anchor.as_str();
    let pivot = manifest.pivot.as_str();

    SelectQuery::from(top_n, TOP_N)
        .join(
            normed.clone(),
            JoinKind::Inner,
            vec![qcol(TOP_N, manifest.anchor_2()).null_safe_eq(qcol(NORMED_COUNT, anchor))],
            NORMED_COUNT,
        )
        .group_by(qcol(TOP_N, manifest.anchor_1()))
        .group_by(qcol(NORMED_COUNT, pivot))
        .select_as(qcol(TOP_N, manifest.anchor_1()), anchor)
        .select(qcol(NORMED_COUNT, pivot))
        .select_as(
            ctx.model.score(ctx).round_15().cast(SqlType::Double),
            SCORE_COLUMN_NAME,
        )
        .order_by(OrderItem::asc(col(anchor)))
        .order_by(OrderItem::desc(col(SCORE_COLUMN_NAME)))
        .order_by(OrderItem::asc(col(pivot)))
        .finish()
}
