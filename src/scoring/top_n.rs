//! Top-N most similar anchors per anchor.

use super::{ScoringContext, SIMILARITY_COLUMN_NAME};
use crate::plan::{col, lit_int, qcol, Expr, OrderItem, PlanResult, Relation, SelectQuery, Window};
use std::sync::Arc;

const ROW_NUMBER: &str = "_row_number";

/// Keep the `top_n_most_similar` rows of each `anchor_1`, ranked by
/// similarity then `anchor_2`, both descending. Rows with a NULL similarity
/// are not ranked.
pub fn top_n_similar(ctx: &ScoringContext, similarity: Relation) -> PlanResult<Arc<SelectQuery>> {
    let columns = ctx.manifest.similarity_columns();
    let anchor_1 = ctx.manifest.anchor_1();
    let anchor_2 = ctx.manifest.anchor_2();

    let ranked = SelectQuery::from(similarity, "_similarity")
        .select_all("_similarity", &columns)
        .select_as(
            Expr::row_number_over(
                Window::partition_by(vec![qcol("_similarity", anchor_1.as_str())])
                    .order_by(OrderItem::desc(qcol("_similarity", SIMILARITY_COLUMN_NAME)))
                    .order_by(OrderItem::desc(qcol("_similarity", anchor_2.as_str()))),
            ),
            ROW_NUMBER,
        )
        .filter(qcol("_similarity", SIMILARITY_COLUMN_NAME).is_not_null())
        .finish()?;

    SelectQuery::from(ranked, "_row_number_table")
        .select_all("_row_number_table", &columns)
        .filter(col(ROW_NUMBER).le(lit_int(i64::from(ctx.params.top_n_most_similar))))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CfMethod, NormalizationMethod, ScoringParams};
    use crate::dialect::{Dialect, Engine};
    use crate::plan::{SqlRenderer, TableRef};

    #[test]
    fn test_rank_window_and_limit() {
        let params = ScoringParams {
            users_column_name: "user_id".into(),
            items_column_name: "item_id".into(),
            ratings_column_name: None,
            recency: None,
            top_n_most_similar: 3,
            user_visit_threshold: 1,
            item_visit_threshold: 1,
            normalization_method: NormalizationMethod::L2,
        };
        let ctx = ScoringContext::new(
            Dialect::new(Engine::SqlServer),
            params,
            CfMethod::ItemBased,
            Relation::table(TableRef::new("events"), vec!["user_id".into(), "item_id".into()]),
        );
        let similarity = Relation::table(
            TableRef::new("item_similarity"),
            ctx.manifest.similarity_columns(),
        );
        let top_n = top_n_similar(&ctx, similarity).unwrap();
        assert_eq!(
            top_n.output_columns(),
            vec!["item_id_1", "item_id_2", "similarity"]
        );

        let sql = SqlRenderer::new(ctx.dialect).render(&top_n).unwrap();
        assert!(sql.contains(
            "ROW_NUMBER() OVER (PARTITION BY [_similarity].[item_id_1] ORDER BY [_similarity].[similarity] DESC, [_similarity].[item_id_2] DESC) AS [_row_number]"
        ));
        assert!(sql.contains("([_similarity].[similarity] IS NOT NULL)"));
        assert!(sql.contains("([_row_number] <= 3)"));
    }
}
