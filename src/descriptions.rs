//! Column descriptions attached to every materialized output

use crate::config::SamplingParams;
use crate::execution::ColumnDescriptions;
use crate::sampling::TARGET_COLUMN_NAME;
use crate::scoring::{ColumnManifest, SCORE_COLUMN_NAME, SIMILARITY_COLUMN_NAME};

fn entry(map: &mut ColumnDescriptions, column: &str, description: String) {
    map.insert(column.to_string(), description);
}

/// Similarity output `(anchor_1, anchor_2, similarity)`
pub fn similarity(manifest: &ColumnManifest) -> ColumnDescriptions {
    let mut map = ColumnDescriptions::new();
    entry(
        &mut map,
        &manifest.anchor_1(),
        format!("First {} of the pair", manifest.anchor),
    );
    entry(
        &mut map,
        &manifest.anchor_2(),
        format!("Second {} of the pair", manifest.anchor),
    );
    entry(
        &mut map,
        SIMILARITY_COLUMN_NAME,
        format!(
            "Similarity between the two {} values, computed from their shared {} values",
            manifest.anchor, manifest.pivot
        ),
    );
    map
}

/// Scoring output `(anchor, pivot, score)`
pub fn scores(manifest: &ColumnManifest) -> ColumnDescriptions {
    let mut map = ColumnDescriptions::new();
    entry(&mut map, &manifest.anchor, format!("Scored {}", manifest.anchor));
    entry(
        &mut map,
        &manifest.pivot,
        format!("Candidate {} for the {}", manifest.pivot, manifest.anchor),
    );
    entry(
        &mut map,
        SCORE_COLUMN_NAME,
        format!(
            "Collaborative filtering score of the {} for the {}",
            manifest.pivot, manifest.anchor
        ),
    );
    map
}

/// Sampling output `(user, item, scores..., target)`
pub fn sampling(params: &SamplingParams) -> ColumnDescriptions {
    let mut map = ColumnDescriptions::new();
    entry(&mut map, &params.users_column_name, "User of the sample".to_string());
    entry(&mut map, &params.items_column_name, "Item of the sample".to_string());
    for score in &params.score_column_names {
        entry(&mut map, score, format!("Input score '{score}'"));
    }
    entry(
        &mut map,
        TARGET_COLUMN_NAME,
        "1 if the pair is a training sample (positive), 0 otherwise (negative)".to_string(),
    );
    map
}
