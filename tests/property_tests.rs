//! Property-based tests (proptest) over random interaction sets.

mod common;

use cfsql::config::{CfMethod, NormalizationMethod, ScoringParams};
use cfsql::dialect::{Dialect, DialectCapabilities, Engine};
use cfsql::plan::{Relation, SqlRenderer, TableRef};
use cfsql::scoring::{roles, top_n_similar, ScoringContext};
use cfsql::{compose, run_plan, Recipe, ScoringPipeline, SqliteExecutor};
use common::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn insert_pairs(db: &SqliteExecutor, table: &str, pairs: &BTreeSet<(u8, u8)>) {
    for (user, item) in pairs {
        db.execute_batch(&format!("INSERT INTO {table} VALUES ('u{user}', 'i{item}');"))
            .unwrap();
    }
}

fn similarity_matrix(
    pairs: &BTreeSet<(u8, u8)>,
    full_outer_join: bool,
) -> Vec<(String, String, f64)> {
    let db = database("CREATE TABLE events (user_id TEXT, item_id TEXT);");
    insert_pairs(&db, "events", pairs);
    let raw = r#"
[scoring]
users_column_name = "user_id"
items_column_name = "item_id"
top_n_most_similar = 2
user_visit_threshold = 1
item_visit_threshold = 1
normalization_method = "l2"
collaborative_filtering_method = "item_based"
"#;
    let bindings = bindings(
        &db,
        &[(roles::SAMPLES, "events")],
        &[
            (roles::SCORED_SAMPLES, "scores"),
            (roles::SIMILARITY_SCORES, "item_similarity"),
        ],
    );
    let dialect = Dialect::new(Engine::Sqlite).with_capabilities(DialectCapabilities {
        supports_full_outer_join: full_outer_join,
        supports_with_clause: true,
    });
    let plan = ScoringPipeline::collaborative_filtering(&config(raw), &bindings)
        .unwrap()
        .with_dialect(dialect)
        .compose()
        .unwrap();
    run_plan(&db, &plan).unwrap();
    triples(&db, "SELECT item_id_1, item_id_2, similarity FROM item_similarity")
}

fn interactions() -> impl Strategy<Value = BTreeSet<(u8, u8)>> {
    prop::collection::btree_set((0u8..5, 0u8..6), 1..20)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_similarity_symmetric_without_self_pairs(
        pairs in interactions(),
        full_outer_join in any::<bool>(),
    ) {
        let matrix = similarity_matrix(&pairs, full_outer_join);
        let by_pair: BTreeMap<(String, String), f64> = matrix
            .iter()
            .map(|(a, b, s)| ((a.clone(), b.clone()), *s))
            .collect();
        prop_assert_eq!(by_pair.len(), matrix.len());
        for ((a, b), s) in &by_pair {
            prop_assert_ne!(a, b);
            let mirrored = by_pair.get(&(b.clone(), a.clone()));
            prop_assert!(mirrored.is_some());
            prop_assert!((mirrored.copied().unwrap_or(f64::NAN) - s).abs() < 1e-12);
            // cosine of non-negative vectors
            prop_assert!(*s > 0.0 && *s <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn prop_top_n_keeps_best_neighbours(
        rows in prop::collection::btree_map((0u8..4, 0u8..6), 0u8..4, 1..24),
        top_n in 1u32..4,
    ) {
        let db = database("CREATE TABLE sim (item_id_1 TEXT, item_id_2 TEXT, similarity REAL);");
        for ((a, b), s) in &rows {
            db.execute_batch(&format!(
                "INSERT INTO sim VALUES ('i{a}', 'i{b}', {});",
                f64::from(*s) / 4.0
            ))
            .unwrap();
        }

        let params = ScoringParams {
            users_column_name: "user_id".into(),
            items_column_name: "item_id".into(),
            ratings_column_name: None,
            recency: None,
            top_n_most_similar: top_n,
            user_visit_threshold: 1,
            item_visit_threshold: 1,
            normalization_method: NormalizationMethod::L2,
        };
        let ctx = ScoringContext::new(
            Dialect::new(Engine::Sqlite),
            params,
            CfMethod::ItemBased,
            Relation::table(TableRef::new("unused"), vec!["user_id".into(), "item_id".into()]),
        );
        let similarity = Relation::table(TableRef::new("sim"), ctx.manifest.similarity_columns());
        let query = top_n_similar(&ctx, similarity).unwrap();
        let sql = SqlRenderer::new(ctx.dialect).render(&query).unwrap();
        let kept = triples(&db, &sql);

        // expected: per anchor, sort by (similarity desc, anchor_2 desc), take top_n
        let mut by_anchor: BTreeMap<String, Vec<(f64, String)>> = BTreeMap::new();
        for ((a, b), s) in &rows {
            by_anchor
                .entry(format!("i{a}"))
                .or_default()
                .push((f64::from(*s) / 4.0, format!("i{b}")));
        }
        let mut expected = BTreeSet::new();
        for (anchor, mut candidates) in by_anchor {
            candidates.sort_by(|x, y| y.0.total_cmp(&x.0).then_with(|| y.1.cmp(&x.1)));
            for (_, neighbour) in candidates.into_iter().take(top_n as usize) {
                expected.insert((anchor.clone(), neighbour));
            }
        }
        let actual: BTreeSet<(String, String)> =
            kept.iter().map(|(a, b, _)| (a.clone(), b.clone())).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_negative_budget(
        scored in prop::collection::btree_set((0u8..3, 0u8..8), 1..24),
        positives in prop::collection::btree_set((0u8..3, 0u8..8), 0..10),
        percentage in prop::sample::select(vec![0usize, 20, 35, 40, 50, 75]),
    ) {
        let db = database(
            "CREATE TABLE scored (user_id TEXT, item_id TEXT, cf_score REAL);
             CREATE TABLE training (user_id TEXT, item_id TEXT);",
        );
        for (user, item) in &scored {
            db.execute_batch(&format!("INSERT INTO scored VALUES ('u{user}', 'i{item}', 0.5);"))
                .unwrap();
        }
        insert_pairs(&db, "training", &positives);

        let raw = format!(
            r#"
[sampling]
users_column_name = "user_id"
items_column_name = "item_id"
score_column_names = ["cf_score"]
training_samples_users_column_name = "user_id"
training_samples_items_column_name = "item_id"
sampling_method = "negative_sampling_percentage"
negative_samples_percentage = {percentage}.0
"#
        );
        let bindings = bindings(
            &db,
            &[
                (cfsql::sampling::roles::SCORED_SAMPLES, "scored"),
                (cfsql::sampling::roles::TRAINING_SAMPLES, "training"),
            ],
            &[(cfsql::sampling::roles::POSITIVE_NEGATIVE_SAMPLES, "out")],
        );
        run_plan(&db, &compose(Recipe::Sampling, &config(&raw), &bindings).unwrap()).unwrap();
        let rows = db.fetch("SELECT user_id, target FROM out").unwrap();

        for user in 0u8..3 {
            let user_scored: Vec<(u8, u8)> =
                scored.iter().copied().filter(|(u, _)| *u == user).collect();
            let pos = user_scored.iter().filter(|p| positives.contains(p)).count();
            let neg = user_scored.len() - pos;
            let budget = (pos * percentage).div_ceil(100 - percentage);

            let name = format!("u{user}");
            let kept_pos = rows.iter().filter(|r| text(&r[0]) == name && int(&r[1]) == 1).count();
            let kept_neg = rows.iter().filter(|r| text(&r[0]) == name && int(&r[1]) == 0).count();
            prop_assert_eq!(kept_pos, pos);
            prop_assert_eq!(kept_neg, neg.min(budget));
        }
    }
}
