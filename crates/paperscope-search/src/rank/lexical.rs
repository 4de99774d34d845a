//! Field-weighted term overlap, used to merge the full-text shards.

use std::collections::HashSet;

use paperscope_core::PaperRecord;

pub const TITLE_WEIGHT: f64 = 2.0;
pub const ABSTRACT_WEIGHT: f64 = 1.0;
pub const AUTHOR_WEIGHT: f64 = 0.5;
pub const ALTERNATE_ID_WEIGHT: f64 = 0.5;

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(ToOwned::to_owned)
        .collect()
}

fn overlap(query: &HashSet<String>, words: &HashSet<String>) -> f64 {
    query.intersection(words).count() as f64
}

/// Additive relevance of `record` for `query`. The shard's native rank is
/// subtracted, so a better (lower) native rank raises the score.
pub fn lexical_score(record: &PaperRecord, query: &str) -> f64 {
    let query_words = word_set(query);
    let mut score = 0.0;

    if let Some(title) = record.title.as_deref() {
        score += TITLE_WEIGHT * overlap(&query_words, &word_set(title));
    }

    if record.has_abstract() {
        score += ABSTRACT_WEIGHT * overlap(&query_words, &word_set(&record.abstract_text));
    }

    // Author names are matched whole, not word by word.
    let author_names: HashSet<String> = record
        .authors
        .iter()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    score += AUTHOR_WEIGHT * overlap(&query_words, &author_names);

    if let Some(alternate) = record.alternate_id.as_deref() {
        score += ALTERNATE_ID_WEIGHT * overlap(&query_words, &word_set(alternate));
    }

    score - record.rank_hint
}

/// Scores every record, stores the score in `relevance_score` and sorts
/// descending. Equal scores keep their input order.
pub fn rank_lexical(mut records: Vec<PaperRecord>, query: &str) -> Vec<PaperRecord> {
    for record in &mut records {
        record.relevance_score = lexical_score(record, query);
    }
    records.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    records
}
