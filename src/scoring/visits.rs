//! Visit counting and per-anchor normalization.
//!
//! Visit counts are window counts over the population that survives the
//! recency filter; the threshold filter runs on those counts in the next
//! node, and normalization windows only see the rows that passed it.

use super::{FeedbackModel, ScoringContext};
use crate::config::NormalizationMethod;
use crate::plan::{
    col, lit_float, lit_int, qcol, rename_and_cast, Expr, OrderItem, PlanResult, Relation,
    SelectQuery, SqlType, Window,
};
use std::sync::Arc;

pub(crate) const NB_VISIT_USER: &str = "_nb_visit_user";
pub(crate) const NB_VISIT_ITEM: &str = "_nb_visit_item";
pub(crate) const RECENCY_RANK: &str = "_recency_rank";
/// Rating minus the anchor's average rating (explicit feedback only)
pub(crate) const CENTERED_RATING: &str = "_centered_rating";
/// Normalized interaction weight of the anchor
pub(crate) const VISIT_NORMED: &str = "_visit_normed";
/// CTE holding the normalized interactions
pub(crate) const NORMED_COUNT: &str = "_normed_count";

/// Build the normalized interactions node, named as a CTE
pub fn normalized_interactions(ctx: &ScoringContext) -> PlanResult<Relation> {
    let manifest = &ctx.manifest;
    let mut columns = manifest.interaction_columns();

    let mut mapping: Vec<(&str, &str, Option<SqlType>)> = vec![
        (manifest.users.as_str(), manifest.users.as_str(), Some(SqlType::String)),
        (manifest.items.as_str(), manifest.items.as_str(), Some(SqlType::String)),
    ];
    if let Some(rating) = manifest.rating.as_deref() {
        mapping.push((rating, rating, Some(SqlType::Double)));
    }
    if let Some(timestamp) = manifest.timestamp.as_deref() {
        mapping.push((timestamp, timestamp, None));
    }
    let mut current = rename_and_cast(ctx.samples.clone(), "_raw_input_dataset", &mapping)?;

    if let (Some(timestamp), Some(recency)) = (&manifest.timestamp, &ctx.params.recency) {
        current = most_recent(current, &columns, timestamp, ctx, recency.top_n_most_recent)?;
    }

    let visit_count = SelectQuery::from(current, "_visit_count_input")
        .select_all("_visit_count_input", &columns)
        .select_as(
            Expr::count_over(Window::partition_by(vec![qcol(
                "_visit_count_input",
                manifest.users.as_str(),
            )])),
            NB_VISIT_USER,
        )
        .select_as(
            Expr::count_over(Window::partition_by(vec![qcol(
                "_visit_count_input",
                manifest.items.as_str(),
            )])),
            NB_VISIT_ITEM,
        )
        .finish()?;

    let eligible = SelectQuery::from(visit_count, "_visit_count")
        .select_all("_visit_count", &columns)
        .filter(
            qcol("_visit_count", NB_VISIT_USER)
                .ge(lit_int(i64::from(ctx.params.user_visit_threshold))),
        )
        .filter(
            qcol("_visit_count", NB_VISIT_ITEM)
                .ge(lit_int(i64::from(ctx.params.item_visit_threshold))),
        )
        .finish()?;

    let anchor_window = |alias: &str| Window::partition_by(vec![qcol(alias, manifest.anchor.as_str())]);

    let (source, signal) = match (ctx.model, &manifest.rating) {
        (FeedbackModel::Explicit, Some(rating)) => {
            let centered = SelectQuery::from(eligible, "_eligible")
                .select_all("_eligible", &columns)
                .select_as(
                    qcol("_eligible", rating.as_str()).minus(
                        qcol("_eligible", rating.as_str()).avg_over(anchor_window("_eligible")),
                    ),
                    CENTERED_RATING,
                )
                .finish()?;
            columns.push(CENTERED_RATING.to_string());
            (centered, qcol("_eligible", CENTERED_RATING))
        }
        _ => (eligible, lit_float(1.0)),
    };

    let normed = SelectQuery::from(source, "_eligible")
        .select_all("_eligible", &columns)
        .select_as(
            normalize(
                ctx.params.normalization_method,
                signal,
                anchor_window("_eligible"),
            ),
            VISIT_NORMED,
        )
        .finish()?;

    Relation::with_cte(normed, NORMED_COUNT)
}

/// `signal / NULLIF(norm, 0)` where the norm is taken over the anchor's rows
fn normalize(method: NormalizationMethod, signal: Expr, window: Window) -> Expr {
    let norm = match method {
        NormalizationMethod::L1 => signal.clone().abs().sum_over(window),
        NormalizationMethod::L2 => signal.clone().times(signal.clone()).sum_over(window).sqrt(),
    };
    signal.div(norm.null_if(lit_float(0.0)))
}

/// Keep the `n` most recent interactions per anchor, ties by pivot DESC
fn most_recent(
    source: Arc<SelectQuery>,
    columns: &[String],
    timestamp: &str,
    ctx: &ScoringContext,
    n: u32,
) -> PlanResult<Arc<SelectQuery>> {
    let manifest = &ctx.manifest;
    let ranked = SelectQuery::from(source, "_recency_input")
        .select_all("_recency_input", columns)
        .select_as(
            Expr::row_number_over(
                Window::partition_by(vec![qcol("_recency_input", manifest.anchor.as_str())])
                    .order_by(OrderItem::desc(qcol("_recency_input", timestamp)))
                    .order_by(OrderItem::desc(qcol("_recency_input", manifest.pivot.as_str()))),
            ),
            RECENCY_RANK,
        )
        .finish()?;

    SelectQuery::from(ranked, "_recency_ranked")
        .select_all("_recency_ranked", columns)
        .filter(col(RECENCY_RANK).le(lit_int(i64::from(n))))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CfMethod, RecencyFilter, ScoringParams};
    use crate::dialect::{Dialect, Engine};
    use crate::plan::{SqlRenderer, TableRef};

    fn context(ratings: Option<&str>, recency: Option<RecencyFilter>) -> ScoringContext {
        let mut columns = vec!["user_id".to_string(), "item_id".to_string()];
        columns.extend(ratings.map(str::to_string));
        columns.push("ts".to_string());
        let params = ScoringParams {
            users_column_name: "user_id".into(),
            items_column_name: "item_id".into(),
            ratings_column_name: ratings.map(str::to_string),
            recency,
            top_n_most_similar: 2,
            user_visit_threshold: 2,
            item_visit_threshold: 3,
            normalization_method: NormalizationMethod::L2,
        };
        ScoringContext::new(
            Dialect::new(Engine::Postgres),
            params,
            CfMethod::ItemBased,
            Relation::table(TableRef::new("events"), columns),
        )
    }

    fn render(relation: &Relation) -> String {
        let query = SelectQuery::from(relation.clone(), "_n")
            .select(qcol("_n", VISIT_NORMED))
            .finish()
            .unwrap();
        SqlRenderer::new(Dialect::new(Engine::Postgres))
            .render(&query)
            .unwrap()
    }

    #[test]
    fn test_implicit_output_columns() {
        let normed = normalized_interactions(&context(None, None)).unwrap();
        assert_eq!(
            normed.output_columns(),
            vec!["user_id", "item_id", VISIT_NORMED]
        );
        let sql = render(&normed);
        assert!(sql.contains("COUNT(*) OVER (PARTITION BY \"_visit_count_input\".\"user_id\")"));
        assert!(sql.contains("(\"_visit_count\".\"_nb_visit_user\" >= 2)"));
        assert!(sql.contains("(\"_visit_count\".\"_nb_visit_item\" >= 3)"));
        assert!(sql.contains("SQRT(SUM((1.0 * 1.0)) OVER (PARTITION BY \"_eligible\".\"item_id\"))"));
        assert!(!sql.contains("\"ts\""));
    }

    #[test]
    fn test_explicit_centers_then_normalizes() {
        let normed = normalized_interactions(&context(Some("rating"), None)).unwrap();
        assert_eq!(
            normed.output_columns(),
            vec!["user_id", "item_id", "rating", CENTERED_RATING, VISIT_NORMED]
        );
        let sql = render(&normed);
        assert!(sql.contains("AVG(\"_eligible\".\"rating\") OVER (PARTITION BY \"_eligible\".\"item_id\")"));
        assert!(sql.contains("CAST(\"_raw_input_dataset\".\"rating\" AS DOUBLE PRECISION)"));
    }

    #[test]
    fn test_recency_filter_ranks_by_timestamp() {
        let recency = RecencyFilter {
            timestamps_column_name: "ts".into(),
            top_n_most_recent: 5,
        };
        let normed = normalized_interactions(&context(None, Some(recency))).unwrap();
        let sql = render(&normed);
        assert!(sql.contains(
            "ROW_NUMBER() OVER (PARTITION BY \"_recency_input\".\"item_id\" ORDER BY \"_recency_input\".\"ts\" DESC, \"_recency_input\".\"user_id\" DESC)"
        ));
        assert!(sql.contains("(\"_recency_rank\" <= 5)"));
    }

    #[test]
    fn test_l1_normalization_shape() {
        let expr = normalize(
            NormalizationMethod::L1,
            lit_float(1.0),
            Window::partition_by(vec![col("item_id")]),
        );
        let renderer = SqlRenderer::new(Dialect::new(Engine::Postgres));
        assert_eq!(
            renderer.render_expr(&expr),
            "(1.0 / NULLIF(SUM(ABS(1.0)) OVER (PARTITION BY \"item_id\"), 0.0))"
        );
    }
}
