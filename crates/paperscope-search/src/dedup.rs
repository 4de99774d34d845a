use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use paperscope_core::PaperRecord;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, SearchError};

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Dedup key: markup removed, lowercased, all whitespace removed.
pub fn title_key(title: &str) -> String {
    MARKUP
        .replace_all(title, "")
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Keeps the first record seen for each title key, in arrival order.
/// Records without both a title and a DOI are dropped.
pub fn dedup_by_title(records: Vec<PaperRecord>) -> Vec<PaperRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(PaperRecord::is_rankable)
        .filter(|record| seen.insert(title_key(record.title_str())))
        .collect()
}

/// One `{doi, title}` line recovered from a vector-index text blob.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VectorCandidate {
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Scores every non-empty line of `text` against `query`, keeps the best
/// `limit` (ties in line order) and parses each as a JSON candidate.
/// Unparsable lines are skipped; if none parse the blob is malformed.
pub fn rematch_vector_lines(query: &str, text: &str, limit: usize) -> Result<Vec<VectorCandidate>> {
    let mut scored: Vec<(f64, &str)> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| (partial_token_set_ratio(query, line), line))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(limit);

    let selected = scored.len();
    let candidates: Vec<VectorCandidate> = scored
        .into_iter()
        .filter_map(|(_, line)| serde_json::from_str(line.trim_end_matches(',')).ok())
        .collect();

    if selected > 0 && candidates.is_empty() {
        return Err(SearchError::MalformedUpstream(
            "vector-index".to_string(),
            format!("none of {selected} matched lines parsed as JSON"),
        ));
    }
    Ok(candidates)
}

/// Case-folded alphanumeric runs, so JSON quoting never sticks to a word.
fn tokens(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Token-set fuzzy ratio on a 0..=100 scale: any shared token scores 100,
/// otherwise the best partial alignment of the sorted leftover tokens.
pub fn partial_token_set_ratio(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    if left.intersection(&right).next().is_some() {
        return 100.0;
    }

    let only_left = left.into_iter().collect::<Vec<_>>().join(" ");
    let only_right = right.into_iter().collect::<Vec<_>>().join(" ");
    partial_ratio(&only_left, &only_right)
}

/// Best similarity of the shorter string against any equal-length window
/// of the longer one.
fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let long_chars: Vec<char> = long.chars().collect();
    let width = short.chars().count();
    if width == 0 {
        return 0.0;
    }

    let mut best = 0.0_f64;
    for start in 0..=(long_chars.len() - width) {
        let window: String = long_chars[start..start + width].iter().collect();
        best = best.max(strsim::normalized_levenshtein(short, &window));
        if best >= 1.0 {
            break;
        }
    }
    (best * 100.0).round()
}

#[cfg(test)]
mod tests {
    use paperscope_core::SourceKind;

    use super::*;

    fn record(title: &str, doi: Option<&str>) -> PaperRecord {
        let mut r = PaperRecord::new(SourceKind::Other);
        r.title = Some(title.to_string());
        r.doi = doi.map(ToOwned::to_owned);
        r
    }

    #[test]
    fn title_key_ignores_markup_case_and_spacing() {
        assert_eq!(title_key("<i>Graphene</i>  Oxide\tMembranes"), "grapheneoxidemembranes");
        assert_eq!(title_key("GRAPHENE oxide membranes"), title_key("graphene oxide  membranes"));
    }

    #[test]
    fn first_seen_wins_and_unrankable_records_drop() {
        let mut first = record("Graphene Oxide", Some("10.1/a"));
        first.source = SourceKind::FulltextDbA;
        let records = vec![
            first,
            record("graphene  oxide", Some("10.1/b")),
            record("No DOI here", None),
            record("   ", Some("10.1/c")),
            record("Protein folding", Some("10.1/d")),
        ];

        let out = dedup_by_title(records);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].source, SourceKind::FulltextDbA);
        assert_eq!(out[1].doi.as_deref(), Some("10.1/d"));
    }

    #[test]
    fn dedup_is_idempotent() {
        let records = vec![
            record("A study", Some("10.1/a")),
            record("a  STUDY", Some("10.1/b")),
            record("Another", Some("10.1/c")),
        ];
        let once = dedup_by_title(records);
        let twice = dedup_by_title(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn shared_token_is_a_full_match() {
        assert_eq!(partial_token_set_ratio("Graphene sheets", "graphene oxide"), 100.0);
        assert_eq!(partial_token_set_ratio("", "graphene"), 0.0);
        let partial = partial_token_set_ratio("graphite", "graphene");
        assert!(partial > 50.0 && partial < 100.0);
    }

    #[test]
    fn json_punctuation_and_case_do_not_hide_a_shared_word() {
        let line = r#"{"doi": "10.1/x", "title": "Graphene sheets"},"#;
        assert_eq!(partial_token_set_ratio("graphene", line), 100.0);
        assert_eq!(partial_token_set_ratio("GRAPHENE", "graphene"), 100.0);
    }

    #[test]
    fn rematch_keeps_best_lines_and_skips_garbage() {
        let text = "\
{\"doi\": \"10.1/x\", \"title\": \"Unrelated topic\"},
not json at all graphene
{\"doi\": \"10.1/a\", \"title\": \"Graphene membranes\"},
";
        let out = rematch_vector_lines("graphene", text, 2).unwrap();
        assert_eq!(
            out,
            vec![VectorCandidate {
                doi: Some("10.1/a".to_string()),
                title: Some("Graphene membranes".to_string()),
            }]
        );
    }

    #[test]
    fn all_garbage_is_malformed() {
        assert!(rematch_vector_lines("graphene", "graphene soup\nmore graphene", 5).is_err());
        assert!(rematch_vector_lines("graphene", "", 5).unwrap().is_empty());
    }
}
