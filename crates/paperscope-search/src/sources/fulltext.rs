use std::sync::Arc;

use async_trait::async_trait;
use paperscope_core::{FulltextShard, SourceKind};
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::sources::{RawRecord, SourceClient, SourceQuery};

/// A local FTS5 shard behind the source interface. Queries run on the
/// blocking pool; the shard's connection is shared read-only.
pub struct FulltextSource {
    shard: Arc<FulltextShard>,
    kind: SourceKind,
}

impl FulltextSource {
    pub fn new(shard: FulltextShard, kind: SourceKind) -> Self {
        Self::shared(Arc::new(shard), kind)
    }

    pub fn shared(shard: Arc<FulltextShard>, kind: SourceKind) -> Self {
        Self { shard, kind }
    }

    pub fn shard(&self) -> &FulltextShard {
        &self.shard
    }
}

#[async_trait]
impl SourceClient for FulltextSource {
    fn name(&self) -> &str {
        self.shard.name()
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn query(&self, query: &SourceQuery) -> Result<Vec<RawRecord>> {
        let shard = Arc::clone(&self.shard);
        let text = query.text.clone();
        let limit = query.limit;

        let rows = tokio::task::spawn_blocking(move || shard.search(&text, limit))
            .await
            .map_err(|e| SearchError::SourceUnavailable(format!("{}: {e}", self.name())))??;

        debug!(source = self.name(), hits = rows.len(), "full-text query");
        let layout = self.shard.layout();
        Ok(rows
            .into_iter()
            .map(|row| RawRecord::Fulltext {
                kind: self.kind,
                layout,
                row,
            })
            .collect())
    }
}
