//! Builds a `ResultPipeline` from `AppConfig`. Connections and clients are
//! created once here and shared by every request.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use paperscope_core::{AppConfig, FulltextShard, MirrorIndex, ShardLayout, SourceKind};
use tracing::{info, warn};

use crate::collaborators::ChatCompletionsClient;
use crate::error::Result;
use crate::http::{HttpClient, USER_AGENT};
use crate::normalize::RecordNormalizer;
use crate::pipeline::ResultPipeline;
use crate::provenance::ProvenanceChain;
use crate::sources::{FulltextSource, HttpSimilarityIndex, OpenAlexSource, VectorSource};

/// Kind and column layout of each configured shard, in `fulltext_shards` order.
pub const SHARD_KINDS: [(SourceKind, ShardLayout); 3] = [
    (SourceKind::FulltextDbA, ShardLayout::Metadata),
    (SourceKind::FulltextDbB, ShardLayout::Metadata),
    (SourceKind::FulltextDbC, ShardLayout::MetadataWithAbstract),
];

fn open_mirror(path: &str) -> Option<Arc<MirrorIndex>> {
    match MirrorIndex::open(Path::new(path)) {
        Ok(index) => Some(Arc::new(index)),
        Err(e) => {
            warn!(path, error = %e, "mirror index unavailable, rule disabled");
            None
        }
    }
}

pub fn pipeline_from_config(config: &AppConfig) -> Result<ResultPipeline> {
    let search = &config.search;
    let source_timeout = Duration::from_secs(search.source_timeout_secs);

    let api_http = Arc::new(HttpClient::new(Duration::from_millis(100), source_timeout, USER_AGENT)?);
    let probe_http = Arc::new(HttpClient::new(
        Duration::ZERO,
        Duration::from_secs(config.provenance.probe_timeout_secs),
        USER_AGENT,
    )?);

    let mirror = if config.provenance.mirror_index_enabled {
        open_mirror(&config.sources.mirror_index_path)
    } else {
        None
    };
    let provenance = ProvenanceChain::from_config(&config.provenance, mirror, probe_http);
    let normalizer =
        RecordNormalizer::new(provenance).with_max_parallel(config.provenance.max_parallel_records);

    let mut pipeline = ResultPipeline::new(search.clone()).with_normalizer(normalizer);

    if config.sources.vector_index.enabled {
        let index = HttpSimilarityIndex::new(
            Arc::clone(&api_http),
            &config.sources.vector_index.endpoint,
            &config.sources.vector_index.collection,
        );
        pipeline = pipeline.with_source(Arc::new(VectorSource::new(Arc::new(index))));
    }

    if config.sources.openalex.enabled {
        let openalex = Arc::new(
            OpenAlexSource::new(Arc::clone(&api_http), &config.sources.openalex.base_url)
                .with_polite_email(config.sources.openalex.polite_email.clone()),
        );
        pipeline = pipeline
            .with_source(openalex.clone())
            .with_identifier_resolver(openalex);
    }

    for ((name, shard), (kind, layout)) in config.fulltext_shards().into_iter().zip(SHARD_KINDS) {
        if !shard.enabled {
            continue;
        }
        match FulltextShard::open(name, Path::new(&shard.path), layout) {
            Ok(opened) => {
                pipeline = pipeline.with_source(Arc::new(FulltextSource::new(opened, kind)));
            }
            Err(e) => warn!(shard = name, path = %shard.path, error = %e, "full-text shard unavailable"),
        }
    }

    let collaborators = &config.collaborators;
    if collaborators.summarize_enabled || collaborators.rewrite_enabled {
        let chat_http = Arc::new(HttpClient::new(
            Duration::ZERO,
            Duration::from_secs(collaborators.timeout_secs),
            USER_AGENT,
        )?);
        let chat = Arc::new(ChatCompletionsClient::from_config(chat_http, collaborators));
        if collaborators.summarize_enabled {
            pipeline = pipeline.with_summarizer(chat.clone());
        }
        if collaborators.rewrite_enabled {
            pipeline = pipeline.with_rewriter(chat);
        }
        pipeline = pipeline.with_collaborator_timeout(Duration::from_secs(collaborators.timeout_secs));
    }

    info!(
        sources = ?pipeline.source_names(),
        max_concurrency = search.max_concurrency,
        "search pipeline ready"
    );
    Ok(pipeline)
}
