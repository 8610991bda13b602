//! Collaborative filtering pipelines executed end to end on SQLite.

mod common;

use cfsql::dialect::{Dialect, DialectCapabilities, Engine};
use cfsql::scoring::roles;
use cfsql::{compose, run_plan, Recipe, ScoringPipeline, SqliteExecutor};
use common::*;

const IMPLICIT_EVENTS: &str = "
    CREATE TABLE events (user_id TEXT, item_id TEXT);
    INSERT INTO events VALUES ('u1', 'i1'), ('u1', 'i2'), ('u2', 'i1'), ('u2', 'i2'), ('u2', 'i3');
";

const IMPLICIT_CONFIG: &str = r#"
[scoring]
users_column_name = "user_id"
items_column_name = "item_id"
top_n_most_similar = 1
user_visit_threshold = 1
item_visit_threshold = 1
normalization_method = "l2"
collaborative_filtering_method = "item_based"
"#;

const EXPLICIT_EVENTS: &str = "
    CREATE TABLE ratings (user_id TEXT, item_id TEXT, rating INTEGER);
    INSERT INTO ratings VALUES
        ('u1', 'i1', 5), ('u1', 'i2', 3),
        ('u2', 'i1', 4), ('u2', 'i2', 2),
        ('u3', 'i1', 1), ('u3', 'i2', 5);
";

const EXPLICIT_CONFIG: &str = r#"
[scoring]
users_column_name = "user_id"
items_column_name = "item_id"
ratings_column_name = "rating"
top_n_most_similar = 1
user_visit_threshold = 1
item_visit_threshold = 1
normalization_method = "l2"
collaborative_filtering_method = "user_based"
"#;

const SQRT_HALF: f64 = std::f64::consts::FRAC_1_SQRT_2;

fn implicit_scores(dialect: Option<Dialect>) -> Vec<(String, String, f64)> {
    let db = database(IMPLICIT_EVENTS);
    let bindings = bindings(
        &db,
        &[(roles::SAMPLES, "events")],
        &[(roles::SCORED_SAMPLES, "scores")],
    );
    let mut pipeline =
        ScoringPipeline::collaborative_filtering(&config(IMPLICIT_CONFIG), &bindings).unwrap();
    if let Some(dialect) = dialect {
        pipeline = pipeline.with_dialect(dialect);
    }
    run_plan(&db, &pipeline.compose().unwrap()).unwrap();
    triples(&db, "SELECT item_id, user_id, score FROM scores")
}

const IMPLICIT_EXPECTED: [(&str, &str, f64); 6] = [
    ("i1", "u1", 1.0),
    ("i1", "u2", 1.0),
    ("i2", "u1", 1.0),
    ("i2", "u2", 1.0),
    ("i3", "u1", SQRT_HALF),
    ("i3", "u2", SQRT_HALF),
];

#[test]
fn test_implicit_item_based_scores() {
    assert_triples(&implicit_scores(None), &IMPLICIT_EXPECTED);
}

#[test]
fn test_explicit_user_based_scores() {
    let db = database(EXPLICIT_EVENTS);
    let bindings = bindings(
        &db,
        &[(roles::SAMPLES, "ratings")],
        &[(roles::SCORED_SAMPLES, "scores")],
    );
    let plan = compose(Recipe::CollaborativeFiltering, &config(EXPLICIT_CONFIG), &bindings).unwrap();
    assert_eq!(plan.statements.len(), 1);
    run_plan(&db, &plan).unwrap();

    let rows = triples(&db, "SELECT user_id, item_id, score FROM scores");
    assert_triples(
        &rows,
        &[
            ("u1", "i1", 1.0),
            ("u1", "i2", -1.0),
            ("u2", "i1", 1.0),
            ("u2", "i2", -1.0),
            ("u3", "i2", 1.0),
            ("u3", "i1", -1.0),
        ],
    );
}

#[test]
fn test_fallback_without_full_outer_join_matches() {
    let dialect = Dialect::new(Engine::Sqlite).with_capabilities(DialectCapabilities {
        supports_full_outer_join: false,
        supports_with_clause: true,
    });
    assert_triples(&implicit_scores(Some(dialect)), &IMPLICIT_EXPECTED);
}

#[test]
fn test_inlined_ctes_match() {
    let dialect = Dialect::new(Engine::Sqlite).with_capabilities(DialectCapabilities {
        supports_full_outer_join: true,
        supports_with_clause: false,
    });
    assert_triples(&implicit_scores(Some(dialect)), &IMPLICIT_EXPECTED);
}

const IMPLICIT_SIMILARITY: [(&str, &str, f64); 6] = [
    ("i1", "i2", 1.0),
    ("i1", "i3", SQRT_HALF),
    ("i2", "i1", 1.0),
    ("i2", "i3", SQRT_HALF),
    ("i3", "i1", SQRT_HALF),
    ("i3", "i2", SQRT_HALF),
];

/// Runs the implicit recipe with the similarity output bound
fn implicit_with_similarity(dialect: Option<Dialect>) -> SqliteExecutor {
    let db = database(IMPLICIT_EVENTS);
    let bindings = bindings(
        &db,
        &[(roles::SAMPLES, "events")],
        &[
            (roles::SCORED_SAMPLES, "scores"),
            (roles::SIMILARITY_SCORES, "item_similarity"),
        ],
    );
    let mut pipeline =
        ScoringPipeline::collaborative_filtering(&config(IMPLICIT_CONFIG), &bindings).unwrap();
    if let Some(dialect) = dialect {
        pipeline = pipeline.with_dialect(dialect);
    }
    let plan = pipeline.compose().unwrap();
    assert_eq!(plan.statements.len(), 2);
    assert!(plan.final_sql().unwrap().contains("\"item_similarity\""));
    run_plan(&db, &plan).unwrap();
    db
}

fn sorted_similarity(db: &SqliteExecutor) -> Vec<(String, String, f64)> {
    triples(
        db,
        "SELECT item_id_1, item_id_2, similarity FROM item_similarity ORDER BY item_id_1, item_id_2",
    )
}

#[test]
fn test_similarity_output_symmetric_without_self_pairs() {
    let db = implicit_with_similarity(None);
    assert_triples(&sorted_similarity(&db), &IMPLICIT_SIMILARITY);

    let scores = triples(&db, "SELECT item_id, user_id, score FROM scores");
    assert_triples(&scores, &IMPLICIT_EXPECTED);
    assert_eq!(
        db.column_description(&cfsql::plan::TableRef::new("scores"), "score")
            .unwrap()
            .as_deref(),
        Some("Collaborative filtering score of the user_id for the item_id")
    );
}

#[test]
fn test_similarity_output_symmetric_without_full_outer_join() {
    let dialect = Dialect::new(Engine::Sqlite).with_capabilities(DialectCapabilities {
        supports_full_outer_join: false,
        supports_with_clause: true,
    });
    let db = implicit_with_similarity(Some(dialect));
    let similarity = sorted_similarity(&db);
    assert_triples(&similarity, &IMPLICIT_SIMILARITY);
    for (a, b, s) in &similarity {
        assert_ne!(a, b);
        assert!(similarity
            .iter()
            .any(|(c, d, t)| c == b && d == a && (t - s).abs() < 1e-12));
    }
}

#[test]
fn test_similarity_and_score_typed_as_double() {
    let db = implicit_with_similarity(None);
    for sql in [
        "SELECT DISTINCT typeof(similarity) FROM item_similarity",
        "SELECT DISTINCT typeof(score) FROM scores",
    ] {
        let types: Vec<String> = db.fetch(sql).unwrap().iter().map(|r| text(&r[0])).collect();
        assert_eq!(types, vec!["real"]);
    }
}

#[test]
fn test_visit_thresholds_drop_rare_anchors() {
    let db = database(IMPLICIT_EVENTS);
    let raw = IMPLICIT_CONFIG.replace("item_visit_threshold = 1", "item_visit_threshold = 2");
    let bindings = bindings(
        &db,
        &[(roles::SAMPLES, "events")],
        &[(roles::SCORED_SAMPLES, "scores")],
    );
    run_plan(
        &db,
        &compose(Recipe::CollaborativeFiltering, &config(&raw), &bindings).unwrap(),
    )
    .unwrap();
    let rows = triples(&db, "SELECT item_id, user_id, score FROM scores");
    assert_triples(
        &rows,
        &[
            ("i1", "u1", 1.0),
            ("i1", "u2", 1.0),
            ("i2", "u1", 1.0),
            ("i2", "u2", 1.0),
        ],
    );
}

#[test]
fn test_recency_keeps_most_recent_interactions() {
    let db = database(
        "
        CREATE TABLE events (user_id TEXT, item_id TEXT, ts INTEGER);
        INSERT INTO events VALUES
            ('u1', 'i1', 1), ('u1', 'i2', 2), ('u1', 'i3', 3),
            ('u2', 'i2', 1), ('u2', 'i3', 2);
        ",
    );
    let raw = r#"
[scoring]
users_column_name = "user_id"
items_column_name = "item_id"
timestamps_column_name = "ts"
top_n_most_recent = 2
top_n_most_similar = 1
user_visit_threshold = 1
item_visit_threshold = 1
normalization_method = "l1"
collaborative_filtering_method = "user_based"
"#;
    let bindings = bindings(
        &db,
        &[(roles::SAMPLES, "events")],
        &[(roles::SCORED_SAMPLES, "scores")],
    );
    run_plan(
        &db,
        &compose(Recipe::CollaborativeFiltering, &config(raw), &bindings).unwrap(),
    )
    .unwrap();

    // u1 keeps i2 and i3, so both users share exactly the same items
    let rows = triples(&db, "SELECT user_id, item_id, score FROM scores");
    assert_triples(
        &rows,
        &[
            ("u1", "i2", 0.5),
            ("u1", "i3", 0.5),
            ("u2", "i2", 0.5),
            ("u2", "i3", 0.5),
        ],
    );
}

#[test]
fn test_rerun_is_idempotent() {
    let db = database(EXPLICIT_EVENTS);
    let bindings = bindings(
        &db,
        &[(roles::SAMPLES, "ratings")],
        &[(roles::SCORED_SAMPLES, "scores")],
    );
    let plan = compose(Recipe::CollaborativeFiltering, &config(EXPLICIT_CONFIG), &bindings).unwrap();
    run_plan(&db, &plan).unwrap();
    let first = triples(&db, "SELECT user_id, item_id, score FROM scores");
    run_plan(&db, &plan).unwrap();
    let second = triples(&db, "SELECT user_id, item_id, score FROM scores");
    assert_eq!(first, second);
}

#[test]
fn test_custom_similarity_scores() {
    let db = database(
        "
        CREATE TABLE events (user_id TEXT, item_id TEXT);
        INSERT INTO events VALUES ('u1', 'i1'), ('u2', 'i2'), ('u2', 'i3');
        CREATE TABLE provided (left_item TEXT, right_item TEXT, weight REAL);
        INSERT INTO provided VALUES
            ('i1', 'i2', 0.9), ('i1', 'i3', 0.4),
            ('i2', 'i1', 0.9), ('i3', 'i1', 0.4), ('i3', 'i2', NULL);
        ",
    );
    let raw = r#"
[scoring]
users_column_name = "user_id"
items_column_name = "item_id"
top_n_most_similar = 1
user_visit_threshold = 1
item_visit_threshold = 1
normalization_method = "l2"

[custom_similarity]
similarity_scores_type = "item_similarity"
similarity_column_1_name = "left_item"
similarity_column_2_name = "right_item"
similarity_score_column_name = "weight"
"#;
    let bindings = bindings(
        &db,
        &[(roles::SAMPLES, "events"), (roles::SIMILARITY_SCORES, "provided")],
        &[(roles::SCORED_SAMPLES, "scores")],
    );
    run_plan(&db, &compose(Recipe::AffinityScore, &config(raw), &bindings).unwrap()).unwrap();

    // i3's NULL similarity to i2 is never ranked, so i3 falls back to i1
    let rows = triples(&db, "SELECT item_id, user_id, score FROM scores");
    assert_triples(
        &rows,
        &[("i1", "u2", 0.9), ("i2", "u1", 0.9), ("i3", "u1", 0.4)],
    );
}

#[test]
fn test_mixed_connections_rejected() {
    let db = database(IMPLICIT_EVENTS);
    let bindings = cfsql::DatasetBindings::new()
        .with_input(roles::SAMPLES, dataset(&db, roles::SAMPLES, "events"))
        .with_output(
            roles::SCORED_SAMPLES,
            std::sync::Arc::new(cfsql::TableHandle::new(
                roles::SCORED_SAMPLES,
                cfsql::plan::TableRef::new("scores"),
                cfsql::ConnectionInfo::new("postgres", "warehouse"),
                Vec::new(),
            )),
        );
    let err = compose(Recipe::CollaborativeFiltering, &config(IMPLICIT_CONFIG), &bindings)
        .unwrap_err();
    assert!(matches!(
        err,
        cfsql::PipelineError::Dialect(cfsql::DialectError::MixedConnections { .. })
    ));
}
