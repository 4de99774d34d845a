use async_trait::async_trait;
use paperscope_core::{FulltextRow, PaperRecord, ShardLayout, SourceKind};

use crate::error::Result;
use crate::identifiers::Doi;

pub mod fulltext;
pub mod openalex;
pub mod vector;

pub use fulltext::FulltextSource;
pub use openalex::{OpenAlexSource, OpenAlexWork};
pub use vector::{HttpSimilarityIndex, SimilarityIndex, VectorSource};

/// What every backend is asked: the text, how many hits, and filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub text: String,
    pub limit: usize,
    pub open_access_only: bool,
}

impl SourceQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            open_access_only: false,
        }
    }

    pub fn open_access_only(mut self, value: bool) -> Self {
        self.open_access_only = value;
        self
    }
}

/// A backend's native hit, before normalization.
#[derive(Debug, Clone)]
pub enum RawRecord {
    Fulltext {
        kind: SourceKind,
        layout: ShardLayout,
        row: FulltextRow,
    },
    Work(OpenAlexWork),
    VectorMatch {
        doi: Option<String>,
        title: Option<String>,
    },
    /// Already in canonical shape (test fakes, identifier hits).
    Record(PaperRecord),
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn query(&self, query: &SourceQuery) -> Result<Vec<RawRecord>>;
}

/// Exact lookup of a single work by DOI. `Ok(None)` means no match.
#[async_trait]
pub trait IdentifierResolver: Send + Sync {
    async fn resolve(&self, doi: &Doi) -> Result<Option<RawRecord>>;
}
