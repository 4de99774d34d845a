//! TF-IDF cosine similarity over titles, and the final bucketing pass.
//!
//! Terms are lowercase word tokens of two or more characters with English
//! stop words removed, plus the bigrams of what remains. IDF is smoothed,
//! `ln((1 + n) / (1 + df)) + 1`, and every document vector is L2-normalized.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use paperscope_core::{PaperRecord, SimilarityTag};
use regex::Regex;
use tracing::debug;

/// Similarity above this is `highly-related`.
pub const HIGHLY_RELATED_THRESHOLD: f64 = 0.25;
/// Similarity above this (and not above the previous) is `related`.
pub const RELATED_THRESHOLD: f64 = 0.15;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w\w+\b").expect("valid regex"));

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| ENGLISH_STOP_WORDS.iter().copied().collect());

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst",
    "amoungst", "amount", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
    "anywhere", "are", "around", "as", "at", "back", "be", "became", "because", "become",
    "becomes", "becoming", "been", "before", "beforehand", "behind", "being", "below", "beside",
    "besides", "between", "beyond", "bill", "both", "bottom", "but", "by", "call", "can", "cannot",
    "cant", "co", "con", "could", "couldnt", "cry", "de", "describe", "detail", "do", "done",
    "down", "due", "during", "each", "eg", "eight", "either", "eleven", "else", "elsewhere",
    "empty", "enough", "etc", "even", "ever", "every", "everyone", "everything", "everywhere",
    "except", "few", "fifteen", "fifty", "fill", "find", "fire", "first", "five", "for", "former",
    "formerly", "forty", "found", "four", "from", "front", "full", "further", "get", "give", "go",
    "had", "has", "hasnt", "have", "he", "hence", "her", "here", "hereafter", "hereby", "herein",
    "hereupon", "hers", "herself", "him", "himself", "his", "how", "however", "hundred", "i", "ie",
    "if", "in", "inc", "indeed", "interest", "into", "is", "it", "its", "itself", "keep", "last",
    "latter", "latterly", "least", "less", "ltd", "made", "many", "may", "me", "meanwhile",
    "might", "mill", "mine", "more", "moreover", "most", "mostly", "move", "much", "must", "my",
    "myself", "name", "namely", "neither", "never", "nevertheless", "next", "nine", "no", "nobody",
    "none", "noone", "nor", "not", "nothing", "now", "nowhere", "of", "off", "often", "on", "once",
    "one", "only", "onto", "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out",
    "over", "own", "part", "per", "perhaps", "please", "put", "rather", "re", "same", "see",
    "seem", "seemed", "seeming", "seems", "serious", "several", "she", "should", "show", "side",
    "since", "sincere", "six", "sixty", "so", "some", "somehow", "someone", "something",
    "sometime", "sometimes", "somewhere", "still", "such", "system", "take", "ten", "than", "that",
    "the", "their", "them", "themselves", "then", "thence", "there", "thereafter", "thereby",
    "therefore", "therein", "thereupon", "these", "they", "thick", "thin", "third", "this",
    "those", "though", "three", "through", "throughout", "thru", "thus", "to", "together", "too",
    "top", "toward", "towards", "twelve", "twenty", "two", "un", "under", "until", "up", "upon",
    "us", "very", "via", "was", "we", "well", "were", "what", "whatever", "when", "whence",
    "whenever", "where", "whereafter", "whereas", "whereby", "wherein", "whereupon", "wherever",
    "whether", "which", "while", "whither", "who", "whoever", "whole", "whom", "whose", "why",
    "will", "with", "within", "without", "would", "yet", "you", "your", "yours", "yourself",
    "yourselves",
];

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word)
}

/// Unigrams then bigrams of the non-stop-word tokens of `text`.
pub fn terms(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| !is_stop_word(w))
        .collect();

    let mut out: Vec<String> = words.iter().map(|w| (*w).to_string()).collect();
    out.extend(words.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
    out
}

type SparseVector = HashMap<String, f64>;

/// Fits TF-IDF over `documents` and returns one L2-normalized vector each.
/// `None` when no document contributes a single term.
pub fn tfidf_vectors(documents: &[&str]) -> Option<Vec<SparseVector>> {
    let tokenized: Vec<Vec<String>> = documents.iter().map(|d| terms(d)).collect();

    let mut df: HashMap<&str, usize> = HashMap::new();
    for doc in &tokenized {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for term in unique {
            *df.entry(term).or_insert(0) += 1;
        }
    }
    if df.is_empty() {
        return None;
    }

    let n_docs = documents.len() as f64;
    let vectors = tokenized
        .iter()
        .map(|doc| {
            let mut counts: SparseVector = HashMap::new();
            for term in doc {
                *counts.entry(term.clone()).or_insert(0.0) += 1.0;
            }
            for (term, weight) in counts.iter_mut() {
                let doc_freq = df.get(term.as_str()).copied().unwrap_or(0) as f64;
                *weight *= ((1.0 + n_docs) / (1.0 + doc_freq)).ln() + 1.0;
            }
            let norm = counts.values().map(|w| w * w).sum::<f64>().sqrt();
            if norm > f64::EPSILON {
                counts.values_mut().for_each(|w| *w /= norm);
            }
            counts
        })
        .collect();
    Some(vectors)
}

/// Dot product of two normalized sparse vectors.
pub fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

/// Bucket for a similarity already rounded to two decimals. Both
/// comparisons are strict.
pub fn bucket_for(similarity: f64) -> SimilarityTag {
    if similarity > HIGHLY_RELATED_THRESHOLD {
        SimilarityTag::HighlyRelated
    } else if similarity > RELATED_THRESHOLD {
        SimilarityTag::Related
    } else {
        SimilarityTag::BarelyRelated
    }
}

/// Rounds the exact binary value to two decimals, so 0.155 (stored just
/// below) gives 0.15.
fn round2(value: f64) -> f64 {
    format!("{value:.2}").parse().unwrap_or(value)
}

/// Final cross-source ordering.
///
/// Records whose title equals the query (ignoring case) are tagged
/// `fully-matched` and placed first in arrival order. The rest are bucketed
/// by title similarity to the query and stable-sorted by bucket only.
/// `relevance_score` is set to the bucket rank, so it never increases down
/// the list.
pub fn rank_by_similarity(records: Vec<PaperRecord>, query: &str) -> Vec<PaperRecord> {
    let query_lower = query.to_lowercase();

    let titles: Vec<&str> = records.iter().map(PaperRecord::title_str).collect();
    let similarities: Option<Vec<f64>> = if records.len() < 2 {
        None
    } else {
        let mut documents = Vec::with_capacity(titles.len() + 1);
        documents.push(query);
        documents.extend(titles.iter().copied());
        tfidf_vectors(&documents).map(|vectors| {
            let (query_vec, rest) = vectors.split_first().map_or((None, &[][..]), |(q, r)| (Some(q), r));
            rest.iter()
                .map(|v| query_vec.map_or(0.0, |q| round2(cosine(q, v))))
                .collect()
        })
    };
    if similarities.is_none() {
        debug!(records = records.len(), "similarity ranking degenerate, keeping arrival order");
    }

    let mut fully_matched = Vec::new();
    let mut others = Vec::new();
    for (i, mut record) in records.into_iter().enumerate() {
        let tag = if record.title_str().to_lowercase() == query_lower {
            SimilarityTag::FullyMatched
        } else {
            similarities
                .as_ref()
                .and_then(|s| s.get(i).copied())
                .map_or(SimilarityTag::BarelyRelated, bucket_for)
        };
        record.similarity_tag = Some(tag);
        record.relevance_score = f64::from(tag.bucket_rank());
        if tag == SimilarityTag::FullyMatched {
            fully_matched.push(record);
        } else {
            others.push(record);
        }
    }

    others.sort_by_key(|r| std::cmp::Reverse(r.similarity_tag.map_or(0, |t| t.bucket_rank())));
    fully_matched.extend(others);
    fully_matched
}
