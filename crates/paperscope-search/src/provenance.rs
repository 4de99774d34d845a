//! Provenance rewriting: an ordered list of rules, first claim wins.
//!
//! Each rule inspects a normalized record and may claim it, changing where
//! the record says it came from and which links it carries. A rule that
//! errors (network failure, unreadable index) simply does not claim.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use paperscope_core::config::ProvenanceConfig;
use paperscope_core::{MirrorIndex, PaperRecord, SourceKind};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::http::HttpClient;
use crate::identifiers::{ArxivId, Doi};

/// What a claiming rule changes. `None` fields are left as they were.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewrite {
    pub source: Option<SourceKind>,
    pub url: Option<String>,
    pub mirror_url: Option<String>,
}

impl Rewrite {
    fn apply(self, record: &mut PaperRecord) {
        if let Some(source) = self.source {
            record.source = source;
        }
        if let Some(url) = self.url {
            record.url = url;
        }
        if let Some(mirror_url) = self.mirror_url {
            record.mirror_url = mirror_url;
        }
    }
}

#[async_trait]
pub trait ProvenanceRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn claim(&self, record: &PaperRecord) -> Result<Option<Rewrite>>;
}

/// The ordered rule list.
#[derive(Clone, Default)]
pub struct ProvenanceChain {
    rules: Vec<Arc<dyn ProvenanceRule>>,
}

impl ProvenanceChain {
    pub fn new(rules: Vec<Arc<dyn ProvenanceRule>>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the standard chain: mirror index, secondary mirror,
    /// preprint link, archive A, archive B. Disabled rules are left out.
    pub fn from_config(
        config: &ProvenanceConfig,
        mirror: Option<Arc<MirrorIndex>>,
        http: Arc<HttpClient>,
    ) -> Self {
        let mut rules: Vec<Arc<dyn ProvenanceRule>> = Vec::new();
        if config.mirror_index_enabled
            && let Some(index) = mirror
        {
            rules.push(Arc::new(MirrorIndexRule::new(index, &config.mirror_base_url)));
        }
        if config.secondary_mirror_enabled {
            rules.push(Arc::new(SecondaryMirrorRule::new(
                Arc::clone(&http),
                &config.secondary_mirror_base_url,
            )));
        }
        if config.preprint_enabled {
            rules.push(Arc::new(PreprintRule));
        }
        if config.archive_a_enabled {
            rules.push(Arc::new(ArchiveARule::new(
                &config.archive_a_dois,
                &config.archive_download_base_url,
            )));
        }
        if config.archive_b_enabled {
            rules.push(Arc::new(ArchiveBRule::new(
                http,
                &config.archive_b_endpoint,
                &config.archive_b_app_name,
                &config.archive_download_base_url,
            )));
        }
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub async fn apply(&self, mut record: PaperRecord) -> PaperRecord {
        // Hosted on a preprint server; not terminal, a later rule may still claim.
        if record.location.to_lowercase().contains("arxiv") {
            record.source = SourceKind::Preprint;
        }

        for rule in &self.rules {
            match rule.claim(&record).await {
                Ok(Some(rewrite)) => {
                    debug!(rule = rule.name(), doi = record.doi.as_deref(), "provenance claimed");
                    rewrite.apply(&mut record);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(rule = rule.name(), error = %e, "provenance rule failed");
                }
            }
        }
        record
    }
}

fn record_doi(record: &PaperRecord) -> Option<Doi> {
    record.doi.as_deref().and_then(|raw| Doi::parse(raw).ok())
}

fn archive_link(base: &str, doi: &Doi) -> String {
    format!("{}/{}.pdf", base.trim_end_matches('/'), doi.flattened())
}

// ─── Rules ────────────────────────────────────────────────────────────────────

/// DOI present in the local mirror index.
pub struct MirrorIndexRule {
    index: Arc<MirrorIndex>,
    base_url: String,
}

impl MirrorIndexRule {
    pub fn new(index: Arc<MirrorIndex>, base_url: &str) -> Self {
        Self {
            index,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ProvenanceRule for MirrorIndexRule {
    fn name(&self) -> &'static str {
        "mirror-index"
    }

    async fn claim(&self, record: &PaperRecord) -> Result<Option<Rewrite>> {
        let Some(doi) = record.normalized_doi() else {
            return Ok(None);
        };
        let index = Arc::clone(&self.index);
        let key = doi.clone();
        let hit = tokio::task::spawn_blocking(move || index.contains(&key))
            .await
            .map_err(|e| SearchError::SourceUnavailable(format!("mirror-index: {e}")))??;
        if !hit {
            return Ok(None);
        }

        let link = format!("{}/{doi}", self.base_url);
        Ok(Some(Rewrite {
            source: Some(SourceKind::MirrorIndex),
            url: Some(link.clone()),
            mirror_url: Some(link),
        }))
    }
}

/// Existence probe against the secondary mirror. A page counts only when it
/// is served as HTML at the probed address, not via a redirect to the homepage.
pub struct SecondaryMirrorRule {
    http: Arc<HttpClient>,
    base_url: String,
}

impl SecondaryMirrorRule {
    pub fn new(http: Arc<HttpClient>, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn page_url(&self, doi: &Doi) -> String {
        let encoded = doi
            .normalized
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{encoded}", self.base_url)
    }
}

#[async_trait]
impl ProvenanceRule for SecondaryMirrorRule {
    fn name(&self) -> &'static str {
        "secondary-mirror"
    }

    async fn claim(&self, record: &PaperRecord) -> Result<Option<Rewrite>> {
        let Some(doi) = record_doi(record) else {
            return Ok(None);
        };
        let url = self.page_url(&doi);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));

        let probe = self.http.probe(&url, headers).await?;
        let landed = probe.final_url.trim_end_matches('/');
        let valid = probe.status == 200
            && probe.content_type.starts_with("text/html")
            && probe.final_url == url
            && landed != self.base_url;

        Ok(valid.then(|| Rewrite {
            source: Some(SourceKind::SecondaryMirror),
            url: None,
            mirror_url: Some(url),
        }))
    }
}

/// A preprint id embedded in the record's link becomes the canonical PDF link.
pub struct PreprintRule;

#[async_trait]
impl ProvenanceRule for PreprintRule {
    fn name(&self) -> &'static str {
        "preprint"
    }

    async fn claim(&self, record: &PaperRecord) -> Result<Option<Rewrite>> {
        Ok(ArxivId::find_in(&record.url).map(|id| Rewrite {
            source: None,
            url: Some(id.pdf_url()),
            mirror_url: None,
        }))
    }
}

/// A fixed set of DOIs known to be stored in archive A.
pub struct ArchiveARule {
    dois: HashSet<String>,
    download_base: String,
}

impl ArchiveARule {
    pub fn new(dois: &[String], download_base: &str) -> Self {
        Self {
            dois: dois
                .iter()
                .filter_map(|d| Doi::parse(d).ok())
                .map(|d| d.normalized)
                .collect(),
            download_base: download_base.to_string(),
        }
    }
}

#[async_trait]
impl ProvenanceRule for ArchiveARule {
    fn name(&self) -> &'static str {
        "archive-a"
    }

    async fn claim(&self, record: &PaperRecord) -> Result<Option<Rewrite>> {
        let Some(doi) = record_doi(record).filter(|d| self.dois.contains(&d.normalized)) else {
            return Ok(None);
        };
        Ok(Some(Rewrite {
            source: Some(SourceKind::ArchiveA),
            url: Some(archive_link(&self.download_base, &doi)),
            mirror_url: None,
        }))
    }
}

const ARCHIVE_B_QUERY: &str = r#"
query ($app: String!, $doi: String!) {
  transactions(
    tags: [
      { name: "App-Name", values: [$app] }
      { name: "Content-Type", values: ["application/pdf"] }
      { name: "Version", values: ["2.0.0"] }
      { name: "doi", values: [$doi] }
    ]
  ) {
    edges { node { id } }
  }
}
"#;

/// GraphQL existence query against archive B's upload index.
pub struct ArchiveBRule {
    http: Arc<HttpClient>,
    endpoint: String,
    app_name: String,
    download_base: String,
}

impl ArchiveBRule {
    pub fn new(http: Arc<HttpClient>, endpoint: &str, app_name: &str, download_base: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            app_name: app_name.to_string(),
            download_base: download_base.to_string(),
        }
    }
}

#[async_trait]
impl ProvenanceRule for ArchiveBRule {
    fn name(&self) -> &'static str {
        "archive-b"
    }

    async fn claim(&self, record: &PaperRecord) -> Result<Option<Rewrite>> {
        let Some(doi) = record_doi(record) else {
            return Ok(None);
        };
        let body = json!({
            "query": ARCHIVE_B_QUERY,
            "variables": { "app": self.app_name, "doi": doi.normalized },
        });
        let response: Value = self.http.post_json(&self.endpoint, &body).await?;
        let found = response
            .pointer("/data/transactions/edges")
            .and_then(Value::as_array)
            .is_some_and(|edges| !edges.is_empty());

        Ok(found.then(|| Rewrite {
            source: Some(SourceKind::ArchiveB),
            url: Some(archive_link(&self.download_base, &doi)),
            mirror_url: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};
    use paperscope_core::ConnectionPool;

    use super::*;
    use crate::http::USER_AGENT;

    fn http() -> Arc<HttpClient> {
        Arc::new(HttpClient::new(Duration::ZERO, Duration::from_secs(5), USER_AGENT).unwrap())
    }

    fn record(doi: &str) -> PaperRecord {
        let mut r = PaperRecord::new(SourceKind::BibliographicApi);
        r.title = Some("A paper".to_string());
        r.doi = Some(doi.to_string());
        r.url = doi.to_string();
        r.mirror_url = doi.to_string();
        r
    }

    struct Claims(SourceKind);

    #[async_trait]
    impl ProvenanceRule for Claims {
        fn name(&self) -> &'static str {
            "claims"
        }

        async fn claim(&self, _record: &PaperRecord) -> Result<Option<Rewrite>> {
            Ok(Some(Rewrite {
                source: Some(self.0),
                ..Rewrite::default()
            }))
        }
    }

    struct Fails;

    #[async_trait]
    impl ProvenanceRule for Fails {
        fn name(&self) -> &'static str {
            "fails"
        }

        async fn claim(&self, _record: &PaperRecord) -> Result<Option<Rewrite>> {
            Err(SearchError::SourceUnavailable("down".to_string()))
        }
    }

    fn mirror_with(dois: &[&str]) -> Arc<MirrorIndex> {
        let pool = ConnectionPool::open_in_memory().unwrap();
        {
            let conn = pool.get_connection();
            conn.execute_batch("CREATE TABLE dois (doi TEXT PRIMARY KEY);").unwrap();
            for doi in dois {
                conn.execute("INSERT INTO dois (doi) VALUES (?1)", [doi]).unwrap();
            }
        }
        Arc::new(MirrorIndex::with_pool(pool))
    }

    #[tokio::test]
    async fn first_claim_wins_and_errors_do_not_claim() {
        let chain = ProvenanceChain::new(vec![
            Arc::new(Fails),
            Arc::new(Claims(SourceKind::ArchiveA)),
            Arc::new(Claims(SourceKind::ArchiveB)),
        ]);
        let out = chain.apply(record("10.1/a")).await;
        assert_eq!(out.source, SourceKind::ArchiveA);
    }

    #[tokio::test]
    async fn preprint_location_is_tagged_before_rules() {
        let mut r = record("10.1/a");
        r.location = "arXiv (Cornell University)".to_string();
        let out = ProvenanceChain::empty().apply(r).await;
        assert_eq!(out.source, SourceKind::Preprint);
    }

    #[tokio::test]
    async fn mirror_index_rewrites_links() {
        let rule = MirrorIndexRule::new(mirror_with(&["10.1038/s41598-021-95939-y"]), "https://mirror.example/");
        let rewrite = rule
            .claim(&record("https://doi.org/10.1038/S41598-021-95939-Y"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rewrite.source, Some(SourceKind::MirrorIndex));
        assert_eq!(
            rewrite.mirror_url.as_deref(),
            Some("https://mirror.example/10.1038/s41598-021-95939-y")
        );
        assert!(rule.claim(&record("10.1/absent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn secondary_mirror_accepts_html_page() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/10.1007/s12083-023-01582-x")
            .match_header("accept", "text/html")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html>paper</html>")
            .create_async()
            .await;

        let rule = SecondaryMirrorRule::new(http(), &server.url());
        let rewrite = rule.claim(&record("10.1007/s12083-023-01582-x")).await.unwrap().unwrap();
        assert_eq!(rewrite.source, Some(SourceKind::SecondaryMirror));
        assert!(rewrite.url.is_none());
    }

    #[tokio::test]
    async fn secondary_mirror_rejects_redirect_to_homepage() {
        let mut server = Server::new_async().await;
        let home = format!("{}/", server.url());
        let _redirect = server
            .mock("GET", "/10.1/missing")
            .with_status(302)
            .with_header("location", &home)
            .create_async()
            .await;
        let _home = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .create_async()
            .await;

        let rule = SecondaryMirrorRule::new(http(), &server.url());
        assert!(rule.claim(&record("10.1/missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn secondary_mirror_rejects_non_html() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/10.1/pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .create_async()
            .await;

        let rule = SecondaryMirrorRule::new(http(), &server.url());
        assert!(rule.claim(&record("10.1/pdf")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn preprint_rule_rewrites_url_only() {
        let rewrite = PreprintRule
            .claim(&record("https://doi.org/10.48550/arxiv.2102.05095"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rewrite.url.as_deref(), Some("https://arxiv.org/pdf/2102.05095"));
        assert!(rewrite.source.is_none());
        assert!(PreprintRule.claim(&record("10.1/plain")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archive_a_uses_flattened_doi() {
        let rule = ArchiveARule::new(
            &["https://doi.org/10.1145/3597926.3598111".to_string()],
            "https://archive.example/dl",
        );
        let rewrite = rule.claim(&record("10.1145/3597926.3598111")).await.unwrap().unwrap();
        assert_eq!(rewrite.source, Some(SourceKind::ArchiveA));
        assert_eq!(
            rewrite.url.as_deref(),
            Some("https://archive.example/dl/10.11453597926.3598111.pdf")
        );
        assert!(rule.claim(&record("10.1/other")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archive_b_claims_on_non_empty_edges() {
        let mut server = Server::new_async().await;
        let _hit = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({"variables": {"doi": "10.1/hit"}})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"transactions":{"edges":[{"node":{"id":"x"}}]}}}"#)
            .create_async()
            .await;
        let _miss = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({"variables": {"doi": "10.1/miss"}})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":{"transactions":{"edges":[]}}}"#)
            .create_async()
            .await;

        let rule = ArchiveBRule::new(
            http(),
            &format!("{}/graphql", server.url()),
            "scivault",
            "https://archive.example/dl",
        );
        let rewrite = rule.claim(&record("10.1/hit")).await.unwrap().unwrap();
        assert_eq!(rewrite.source, Some(SourceKind::ArchiveB));
        assert_eq!(rewrite.url.as_deref(), Some("https://archive.example/dl/10.1hit.pdf"));
        assert!(rule.claim(&record("10.1/miss")).await.unwrap().is_none());
    }

    #[test]
    fn disabled_rules_are_left_out() {
        let config = ProvenanceConfig {
            secondary_mirror_enabled: false,
            archive_b_enabled: false,
            ..ProvenanceConfig::default()
        };
        let chain = ProvenanceChain::from_config(&config, Some(mirror_with(&[])), http());
        assert_eq!(chain.rule_names(), vec!["mirror-index", "preprint", "archive-a"]);
    }
}
