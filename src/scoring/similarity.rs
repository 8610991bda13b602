//! Similarity matrix from normalized interactions.
//!
//! similarity(a₁, a₂) = Σ normed(a₁, p) × normed(a₂, p) over shared pivots p,
//! rounded to 15 decimals and typed as a double. Self pairs never appear.

use super::visits::VISIT_NORMED;
use super::{ScoringContext, SIMILARITY_COLUMN_NAME};
use crate::plan::{qcol, Expr, JoinKind, PlanResult, Relation, SelectQuery, SqlType};
use std::sync::Arc;

const LEFT: &str = "_left_normed_count";
const RIGHT: &str = "_right_normed_count";
const ORDERED_SIMILARITY: &str = "_ordered_similarity";

/// Symmetric similarity matrix `(anchor_1, anchor_2, similarity)`.
///
/// With full outer join support only ordered pairs (`anchor_1 < anchor_2`)
/// are aggregated and the mirrored half is added with UNION ALL; otherwise
/// both directions are aggregated in one pass with `anchor_1 <> anchor_2`.
pub fn computed_similarity(ctx: &ScoringContext, normed: &Relation) -> PlanResult<Arc<SelectQuery>> {
    if ctx.dialect.capabilities.supports_full_outer_join {
        let ordered = pair_similarity(ctx, normed, Expr::lt)?;
        let ordered = Relation::with_cte(ordered, ORDERED_SIMILARITY)?;
        mirrored(ctx, &ordered)
    } else {
        pair_similarity(ctx, normed, Expr::ne)
    }
}

/// Self-join on the pivot, anchors related by `anchor_filter`
fn pair_similarity(
    ctx: &ScoringContext,
    normed: &Relation,
    anchor_filter: fn(Expr, Expr) -> Expr,
) -> PlanResult<Arc<SelectQuery>> {
    let manifest = &ctx.manifest;
    let anchor = manifest.anchor.as_str();
    let pivot = manifest.pivot.as_str();

    SelectQuery::from(normed.clone(), LEFT)
        .join(
            normed.clone(),
            JoinKind::Inner,
            vec![qcol(LEFT, pivot).null_safe_eq(qcol(RIGHT, pivot))],
            RIGHT,
        )
        .filter(anchor_filter(qcol(LEFT, anchor), qcol(RIGHT, anchor)))
        .group_by(qcol(LEFT, anchor))
        .group_by(qcol(RIGHT, anchor))
        .select_as(qcol(LEFT, anchor), manifest.anchor_1())
        .select_as(qcol(RIGHT, anchor), manifest.anchor_2())
        .select_as(
            qcol(LEFT, VISIT_NORMED)
                .times(qcol(RIGHT, VISIT_NORMED))
                .sum()
                .round_15()
                .cast(SqlType::Double),
            SIMILARITY_COLUMN_NAME,
        )
        .finish()
}

/// Ordered pairs plus their mirror image
fn mirrored(ctx: &ScoringContext, ordered: &Relation) -> PlanResult<Arc<SelectQuery>> {
    let anchor_1 = ctx.manifest.anchor_1();
    let anchor_2 = ctx.manifest.anchor_2();

    let forward = SelectQuery::from(ordered.clone(), "_forward")
        .select(qcol("_forward", anchor_1.as_str()))
        .select(qcol("_forward", anchor_2.as_str()))
        .select(qcol("_forward", SIMILARITY_COLUMN_NAME))
        .finish()?;
    let backward = SelectQuery::from(ordered.clone(), "_backward")
        .select_as(qcol("_backward", anchor_2.as_str()), anchor_1.as_str())
        .select_as(qcol("_backward", anchor_1.as_str()), anchor_2.as_str())
        .select(qcol("_backward", SIMILARITY_COLUMN_NAME))
        .finish()?;

    SelectQuery::from(Relation::union_all(vec![forward, backward])?, "_similarity_matrix")
        .select_all("_similarity_matrix", &ctx.manifest.similarity_columns())
        .finish()
}
