//! End-to-end search: identifier short-circuit, query rewriting, fan-out,
//! normalization, dedup, ranking and the optional summary.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use paperscope_core::config::SearchConfig;
use paperscope_core::{
    PaperRecord, SUMMARY_NOT_REQUESTED, SUMMARY_UNAVAILABLE, SearchRequest, SearchResponse,
    SimilarityTag, SourceKind, Summary,
};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::collaborators::{QueryRewriter, Summarizer};
use crate::dedup::dedup_by_title;
use crate::error::{Result, SearchError};
use crate::fetch::{FanoutState, Fetcher, SlotReport, SourceJob, transition};
use crate::identifiers::Doi;
use crate::normalize::RecordNormalizer;
use crate::rank::{rank_by_similarity, rank_lexical};
use crate::sources::{IdentifierResolver, SourceClient, SourceQuery};

/// The forms of the query each stage works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryForms {
    /// What the caller typed.
    pub original: String,
    /// Translated and condensed; ranks the final list.
    pub rewritten: String,
    /// Keyword form sent to the sources.
    pub keywords: String,
}

impl QueryForms {
    pub fn verbatim(query: &str) -> Self {
        Self {
            original: query.to_string(),
            rewritten: query.to_string(),
            keywords: query.to_string(),
        }
    }
}

/// Ranked records before summarization.
#[derive(Debug, Clone)]
pub struct RankedResults {
    pub records: Vec<PaperRecord>,
    /// The query the summary should answer.
    pub summary_query: String,
    pub identifier_hit: bool,
    pub sources: Vec<SlotReport>,
}

/// An empty or "none" collaborator answer keeps the previous form.
fn usable_answer(answer: Result<String>, previous: &str, step: &str) -> String {
    match answer {
        Ok(text) if !text.trim().is_empty() && !text.trim().eq_ignore_ascii_case("none") => {
            text.trim().to_string()
        }
        Ok(_) => previous.to_string(),
        Err(e) => {
            warn!(step, error = %e, "query rewriting failed, keeping previous form");
            previous.to_string()
        }
    }
}

pub struct ResultPipeline {
    settings: SearchConfig,
    fetcher: Fetcher,
    normalizer: RecordNormalizer,
    sources: Vec<Arc<dyn SourceClient>>,
    resolver: Option<Arc<dyn IdentifierResolver>>,
    rewriter: Option<Arc<dyn QueryRewriter>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    collaborator_timeout: Duration,
}

impl ResultPipeline {
    pub fn new(settings: SearchConfig) -> Self {
        Self {
            fetcher: Fetcher::from_config(&settings),
            settings,
            normalizer: RecordNormalizer::default(),
            sources: Vec::new(),
            resolver: None,
            rewriter: None,
            summarizer: None,
            collaborator_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_normalizer(mut self, normalizer: RecordNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Sources are queried, and their slots merged, in the order added.
    pub fn with_source(mut self, source: Arc<dyn SourceClient>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_identifier_resolver(mut self, resolver: Arc<dyn IdentifierResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_collaborator_timeout(mut self, limit: Duration) -> Self {
        self.collaborator_timeout = limit;
        self
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Never fails: any pipeline error or panic becomes the degraded response.
    pub async fn search(&self, request: &SearchRequest) -> SearchResponse {
        let span = info_span!("search", request_id = %Uuid::new_v4());
        async {
            info!(query = %request.query, limit = request.limit.get(), "search started");
            match AssertUnwindSafe(self.respond(request)).catch_unwind().await {
                Ok(Ok(response)) => {
                    info!(results = response.results.len(), "search finished");
                    response
                }
                Ok(Err(e)) => {
                    error!(error = %e, "search pipeline failed");
                    SearchResponse::degraded()
                }
                Err(_) => {
                    error!("search pipeline panicked");
                    SearchResponse::degraded()
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn respond(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let ranked = self.rank(request).await?;
        let summary = self.summarize(request, &ranked).await;
        Ok(SearchResponse {
            summary,
            results: ranked.records,
        })
    }

    /// Everything except the summary.
    pub async fn rank(&self, request: &SearchRequest) -> Result<RankedResults> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::MissingQuery);
        }
        let limit = request.limit.get();
        let cap = limit * self.settings.expansion_factor.max(1);

        let identifier_hit = self.lookup_identifier(query).await;
        let had_hit = identifier_hit.is_some();
        if let Some(hit) = &identifier_hit {
            debug!(doi = hit.doi.as_deref(), source = %hit.source, "identifier hit");
        }
        let summary_query = if had_hit {
            format!("Find the paper with {query}")
        } else {
            query.to_string()
        };

        if let Some(hit) = identifier_hit.clone()
            && !self.settings.expand_identifier_hits
        {
            transition(FanoutState::Idle, FanoutState::Done);
            return Ok(RankedResults {
                records: vec![hit],
                summary_query,
                identifier_hit: true,
                sources: Vec::new(),
            });
        }

        let forms = if had_hit {
            QueryForms::verbatim(query)
        } else {
            self.query_forms(query).await
        };
        debug!(rewritten = %forms.rewritten, keywords = %forms.keywords, "query forms");

        let deadline = self.fetcher.deadline();
        let jobs = self.jobs(&forms, limit, request.options.open_access_only);
        let outcome = self.fetcher.fan_out_until(jobs, deadline).await;
        let sources = outcome.reports();

        transition(FanoutState::Collecting, FanoutState::Merging);
        let mut fulltext = Vec::new();
        let mut others = Vec::new();
        for slot in outcome.slots {
            let target = if slot.report.kind.is_fulltext() {
                &mut fulltext
            } else {
                &mut others
            };
            target.extend(slot.records.into_iter().map(|raw| self.normalizer.to_record(raw)));
        }

        let mut merged_fulltext = rank_lexical(fulltext, &forms.keywords);
        merged_fulltext.truncate(self.settings.fulltext_limit);
        others.extend(merged_fulltext);

        // The hit leads so it wins its title; it already carries provenance.
        let mut records: Vec<PaperRecord> = identifier_hit.into_iter().collect();
        records.extend(others);
        let mut unique = dedup_by_title(records);
        let rest = unique.split_off(usize::from(had_hit));
        unique.extend(self.bounded_provenance(rest, deadline).await);

        let mut ranked = rank_by_similarity(unique, &forms.rewritten);
        ranked.truncate(cap);
        transition(FanoutState::Merging, FanoutState::Done);

        Ok(RankedResults {
            records: ranked,
            summary_query,
            identifier_hit: had_hit,
            sources,
        })
    }

    /// Records past the request deadline keep the links their source gave.
    async fn bounded_provenance(&self, records: Vec<PaperRecord>, deadline: Instant) -> Vec<PaperRecord> {
        match timeout_at(deadline, self.normalizer.rewrite_provenance(records.clone())).await {
            Ok(rewritten) => rewritten,
            Err(_) => {
                warn!(records = records.len(), "provenance rewriting passed the request deadline");
                records
            }
        }
    }

    /// `None` when the query is not a DOI, nothing matches, or the lookup fails.
    async fn lookup_identifier(&self, query: &str) -> Option<PaperRecord> {
        let resolver = self.resolver.as_ref()?;
        let doi = Doi::from_query(query)?;

        let raw = match timeout(self.fetcher.source_timeout(), resolver.resolve(&doi)).await {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => {
                debug!(doi = %doi.normalized, "no identifier match");
                return None;
            }
            Ok(Err(e)) => {
                warn!(doi = %doi.normalized, error = %e, "identifier lookup failed");
                return None;
            }
            Err(_) => {
                warn!(doi = %doi.normalized, "identifier lookup timed out");
                return None;
            }
        };

        let mut record = self.normalizer.to_record(raw);
        if !record.is_rankable() {
            debug!(doi = %doi.normalized, "identifier match lacks title or DOI");
            return None;
        }
        record.source = SourceKind::Other;
        let mut record = self.normalizer.provenance().apply(record).await;
        record.similarity_tag = Some(SimilarityTag::FullyMatched);
        record.relevance_score = f64::from(SimilarityTag::FullyMatched.bucket_rank());
        Some(record)
    }

    async fn query_forms(&self, query: &str) -> QueryForms {
        let Some(rewriter) = &self.rewriter else {
            return QueryForms::verbatim(query);
        };

        let rewritten = usable_answer(
            self.bounded(rewriter.rewrite(query)).await,
            query,
            "rewrite",
        );
        let keywords = usable_answer(
            self.bounded(rewriter.extract_keywords(&rewritten)).await,
            &rewritten,
            "keywords",
        );
        QueryForms {
            original: query.to_string(),
            rewritten,
            keywords,
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.collaborator_timeout, call)
            .await
            .map_err(|_| SearchError::Timeout("collaborator".to_string()))?
    }

    fn jobs(&self, forms: &QueryForms, limit: usize, open_access_only: bool) -> Vec<SourceJob> {
        let per_source = limit * self.settings.expansion_factor.max(1);
        let mut jobs = Vec::new();
        for source in &self.sources {
            let kind = source.kind();
            if kind.is_fulltext() {
                jobs.push(SourceJob::new(
                    Arc::clone(source),
                    SourceQuery::new(&forms.keywords, self.settings.fulltext_limit),
                ));
                continue;
            }

            let query = SourceQuery::new(&forms.keywords, per_source).open_access_only(open_access_only);
            jobs.push(SourceJob::new(Arc::clone(source), query));
            if kind == SourceKind::BibliographicApi && forms.rewritten != forms.keywords {
                jobs.push(SourceJob::new(
                    Arc::clone(source),
                    SourceQuery::new(&forms.rewritten, per_source).open_access_only(open_access_only),
                ));
            }
        }
        jobs
    }

    async fn summarize(&self, request: &SearchRequest, ranked: &RankedResults) -> Summary {
        if !request.options.summarize {
            return Summary::message(SUMMARY_NOT_REQUESTED);
        }
        let Some(summarizer) = &self.summarizer else {
            return Summary::message(SUMMARY_UNAVAILABLE);
        };

        let top = &ranked.records[..ranked.records.len().min(self.settings.summary_top_n)];
        let top_text = match serde_json::to_string(top) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "could not serialize records for summary");
                return Summary::message(SUMMARY_UNAVAILABLE);
            }
        };

        match self
            .bounded(summarizer.summarize(&ranked.summary_query, &top_text, request.limit.get()))
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "summary unavailable");
                Summary::message(SUMMARY_UNAVAILABLE)
            }
        }
    }
}
