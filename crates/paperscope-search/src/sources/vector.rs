use std::sync::Arc;

use async_trait::async_trait;
use paperscope_core::SourceKind;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::dedup::rematch_vector_lines;
use crate::error::{Result, SearchError};
use crate::http::HttpClient;
use crate::sources::{RawRecord, SourceClient, SourceQuery};

/// The similarity search primitive: returns opaque text blobs, best first.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<String>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimilarityRequest<'a> {
    collection: &'a str,
    query: &'a str,
    limit: usize,
    output_fields: [&'static str; 1],
}

/// Vector store reached over HTTP: `POST {endpoint}/search`, reading `data[].text`.
pub struct HttpSimilarityIndex {
    client: Arc<HttpClient>,
    endpoint: String,
    collection: String,
}

impl HttpSimilarityIndex {
    pub fn new(client: Arc<HttpClient>, endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl SimilarityIndex for HttpSimilarityIndex {
    async fn search_text(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let url = format!("{}/search", self.endpoint.trim_end_matches('/'));
        let body = SimilarityRequest {
            collection: &self.collection,
            query,
            limit,
            output_fields: ["text"],
        };
        let json: Value = self.client.post_json(&url, &body).await?;
        let Some(data) = json.get("data").and_then(Value::as_array) else {
            return Err(SearchError::MalformedUpstream(
                "vector-index".to_string(),
                "response has no data array".to_string(),
            ));
        };
        Ok(data
            .iter()
            .filter_map(|hit| hit.get("text").and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .collect())
    }
}

/// Vector-index adapter: similarity search, then fuzzy re-matching of the
/// returned lines against the query.
pub struct VectorSource {
    index: Arc<dyn SimilarityIndex>,
}

impl VectorSource {
    pub fn new(index: Arc<dyn SimilarityIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl SourceClient for VectorSource {
    fn name(&self) -> &str {
        "vector-index"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::VectorIndex
    }

    async fn query(&self, query: &SourceQuery) -> Result<Vec<RawRecord>> {
        let blobs = self.index.search_text(&query.text, query.limit).await?;
        let text = blobs.join("\n");
        let candidates = rematch_vector_lines(&query.text, &text, query.limit)?;
        debug!(blobs = blobs.len(), candidates = candidates.len(), "vector re-match");
        Ok(candidates
            .into_iter()
            .map(|c| RawRecord::VectorMatch {
                doi: c.doi,
                title: c.title,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;
    use crate::http::USER_AGENT;

    struct CannedIndex(Vec<String>);

    #[async_trait]
    impl SimilarityIndex for CannedIndex {
        async fn search_text(&self, _query: &str, _limit: usize) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn lines_are_rematched_and_parsed() {
        let blob = [
            r#"{"doi": "10.1/a", "title": "Graphene oxide membranes"},"#,
            r#"{"doi": "10.1/b", "title": "Protein folding dynamics"},"#,
        ]
        .join("\n");
        let source = VectorSource::new(Arc::new(CannedIndex(vec![blob])));

        let records = source.query(&SourceQuery::new("graphene oxide", 1)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(
            &records[0],
            RawRecord::VectorMatch { doi: Some(d), .. } if d == "10.1/a"
        ));
    }

    #[tokio::test]
    async fn http_index_reads_text_fields() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/search")
            .match_body(Matcher::PartialJson(json!({"collection": "papers", "limit": 3})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"data": [{"text": "one"}, {"score": 0.1}, {"text": "two"}]}).to_string())
            .create_async()
            .await;

        let http = HttpClient::new(Duration::ZERO, Duration::from_secs(5), USER_AGENT).unwrap();
        let index = HttpSimilarityIndex::new(Arc::new(http), server.url(), "papers");
        assert_eq!(index.search_text("q", 3).await.unwrap(), vec!["one", "two"]);
    }
}
