pub mod lexical;
pub mod tfidf;

pub use lexical::{lexical_score, rank_lexical};
pub use tfidf::{bucket_for, rank_by_similarity};
