use std::sync::Arc;

use async_trait::async_trait;
use paperscope_core::SourceKind;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::http::HttpClient;
use crate::identifiers::Doi;
use crate::sources::{IdentifierResolver, RawRecord, SourceClient, SourceQuery};

pub const BASE_URL: &str = "https://api.openalex.org";
const MAX_PER_PAGE: usize = 200;

/// The fields of an OpenAlex work the pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OpenAlexWork {
    pub id: String,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub publication_year: Option<i32>,
    pub is_oa: bool,
    pub authors: Vec<String>,
    pub cited_by_count: u32,
    /// Display name of the first location's source.
    pub location: Option<String>,
    /// Word to positions, in document order.
    pub abstract_inverted_index: Option<Vec<(String, Vec<u32>)>>,
}

impl OpenAlexWork {
    pub fn from_json(v: &Value) -> Result<Self> {
        if !v.is_object() {
            return Err(SearchError::MalformedUpstream(
                "openalex".to_string(),
                "work is not an object".to_string(),
            ));
        }

        let id = v
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let doi = v
            .get("doi")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(ToOwned::to_owned);

        let title = v
            .get("title")
            .or_else(|| v.get("display_name"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        let publication_year = v
            .get("publication_year")
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok());

        let is_oa = v
            .get("open_access")
            .and_then(|oa| oa.get("is_oa"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let authors = v
            .get("authorships")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|a| a.get("author")?.get("display_name")?.as_str())
                    .map(ToOwned::to_owned)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let cited_by_count = v
            .get("cited_by_count")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);

        let location = v
            .get("locations")
            .and_then(Value::as_array)
            .and_then(|locs| locs.first())
            .and_then(|loc| loc.get("source")?.get("display_name")?.as_str())
            .map(ToOwned::to_owned);

        let abstract_inverted_index = v
            .get("abstract_inverted_index")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(token, positions)| {
                        let values = positions
                            .as_array()?
                            .iter()
                            .filter_map(Value::as_u64)
                            .filter_map(|n| u32::try_from(n).ok())
                            .collect::<Vec<_>>();
                        Some((token.clone(), values))
                    })
                    .collect::<Vec<_>>()
            });

        Ok(Self {
            id,
            doi,
            title,
            publication_year,
            is_oa,
            authors,
            cited_by_count,
            location,
            abstract_inverted_index,
        })
    }
}

/// OpenAlex-compatible bibliographic API: keyword search and DOI lookup.
pub struct OpenAlexSource {
    client: Arc<HttpClient>,
    base_url: String,
    polite_email: Option<String>,
}

impl OpenAlexSource {
    pub fn new(client: Arc<HttpClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            polite_email: None,
        }
    }

    pub fn with_polite_email(mut self, email: Option<String>) -> Self {
        self.polite_email = email.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn search_url(&self, query: &SourceQuery) -> Result<Url> {
        let mut url = self.works_url()?;
        let per_page = query.limit.clamp(1, MAX_PER_PAGE);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("search", &query.text);
            if query.open_access_only {
                pairs.append_pair("filter", "open_access.is_oa:true");
            }
            pairs
                .append_pair("per-page", &per_page.to_string())
                .append_pair("page", "1")
                .append_pair("sort", "relevance_score:desc");
            if let Some(email) = &self.polite_email {
                pairs.append_pair("mailto", email);
            }
        }
        Ok(url)
    }

    pub async fn search(&self, query: &SourceQuery) -> Result<Vec<OpenAlexWork>> {
        let url = self.search_url(query)?;
        let json: Value = self.client.get_json(url.as_str()).await?;
        let Some(results) = json.get("results").and_then(Value::as_array) else {
            return Err(SearchError::MalformedUpstream(
                self.name().to_string(),
                "response has no results array".to_string(),
            ));
        };
        let works = results
            .iter()
            .map(OpenAlexWork::from_json)
            .collect::<Result<Vec<_>>>()?;
        debug!(source = "openalex", hits = works.len(), "keyword search");
        Ok(works)
    }

    pub async fn fetch_by_doi(&self, doi: &Doi) -> Result<Option<OpenAlexWork>> {
        // Pushed as a segment the DOI slash would be percent-encoded.
        let raw = format!("{}/doi:{}", self.works_url()?, doi.normalized);
        let mut url = Url::parse(&raw)
            .map_err(|e| SearchError::Parse(format!("invalid URL {raw}: {e}")))?;
        if let Some(email) = &self.polite_email {
            url.query_pairs_mut().append_pair("mailto", email);
        }

        let Some(json) = self.client.get_json_opt::<Value>(url.as_str()).await? else {
            return Ok(None);
        };
        let mut work = OpenAlexWork::from_json(&json)?;
        // The looked-up form is authoritative; resolver links are derived from it.
        work.doi = Some(doi.normalized.clone());
        Ok(Some(work))
    }

    fn works_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SearchError::Parse(format!("invalid URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| SearchError::Parse("invalid OpenAlex base URL".to_string()))?
            .pop_if_empty()
            .push("works");
        Ok(url)
    }
}

#[async_trait]
impl SourceClient for OpenAlexSource {
    fn name(&self) -> &str {
        "openalex"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::BibliographicApi
    }

    async fn query(&self, query: &SourceQuery) -> Result<Vec<RawRecord>> {
        let works = self.search(query).await?;
        Ok(works.into_iter().map(RawRecord::Work).collect())
    }
}

#[async_trait]
impl IdentifierResolver for OpenAlexSource {
    async fn resolve(&self, doi: &Doi) -> Result<Option<RawRecord>> {
        Ok(self.fetch_by_doi(doi).await?.map(RawRecord::Work))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;
    use crate::http::USER_AGENT;

    fn source(base: &str) -> OpenAlexSource {
        let http = HttpClient::new(Duration::ZERO, Duration::from_secs(5), USER_AGENT).unwrap();
        OpenAlexSource::new(Arc::new(http), base)
    }

    fn sample_work() -> Value {
        json!({
            "id": "https://openalex.org/W1",
            "doi": "https://doi.org/10.1038/nature14539",
            "title": "Deep learning",
            "publication_year": 2015,
            "open_access": {"is_oa": true},
            "authorships": [
                {"author": {"display_name": "Yann LeCun"}},
                {"author": {"display_name": "Yoshua Bengio"}}
            ],
            "cited_by_count": 42,
            "locations": [{"source": {"display_name": "Nature"}}, {"source": null}],
            "abstract_inverted_index": {"learning": [1], "deep": [0]}
        })
    }

    #[test]
    fn parses_work_fields() {
        let work = OpenAlexWork::from_json(&sample_work()).unwrap();
        assert_eq!(work.title.as_deref(), Some("Deep learning"));
        assert_eq!(work.doi.as_deref(), Some("https://doi.org/10.1038/nature14539"));
        assert_eq!(work.publication_year, Some(2015));
        assert!(work.is_oa);
        assert_eq!(work.authors, vec!["Yann LeCun", "Yoshua Bengio"]);
        assert_eq!(work.cited_by_count, 42);
        assert_eq!(work.location.as_deref(), Some("Nature"));
        assert_eq!(work.abstract_inverted_index.map(|i| i.len()), Some(2));
    }

    #[test]
    fn missing_fields_fall_back() {
        let work = OpenAlexWork::from_json(&json!({"id": "W2", "locations": []})).unwrap();
        assert!(work.title.is_none());
        assert!(work.doi.is_none());
        assert!(work.location.is_none());
        assert!(!work.is_oa);
        assert!(work.abstract_inverted_index.is_none());
        assert!(OpenAlexWork::from_json(&json!("nope")).is_err());
    }

    #[test]
    fn search_url_carries_filter_only_for_open_access() {
        let src = source("https://api.example.org");
        let url = src
            .search_url(&SourceQuery::new("graphene oxide", 20).open_access_only(true))
            .unwrap();
        let query = url.query().unwrap_or_default();
        assert_eq!(url.path(), "/works");
        assert!(query.contains("search=graphene+oxide"));
        assert!(query.contains("filter=open_access.is_oa%3Atrue"));
        assert!(query.contains("per-page=20"));

        let url = src.search_url(&SourceQuery::new("graphene", 20)).unwrap();
        assert!(!url.query().unwrap_or_default().contains("filter="));
    }

    #[tokio::test]
    async fn keyword_search_returns_works() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/works")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("search".into(), "deep learning".into()),
                Matcher::UrlEncoded("per-page".into(), "4".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"results": [sample_work()]}).to_string())
            .create_async()
            .await;

        let records = source(&server.url())
            .query(&SourceQuery::new("deep learning", 4))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], RawRecord::Work(w) if w.cited_by_count == 42));
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/works")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let err = source(&server.url())
            .query(&SourceQuery::new("anything", 4))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::ApiError(..)));
    }

    #[tokio::test]
    async fn doi_lookup_miss_is_none() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/works/doi:10.1000/missing")
            .with_status(404)
            .create_async()
            .await;

        let doi = Doi::parse("10.1000/missing").unwrap();
        assert!(source(&server.url()).resolve(&doi).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn doi_lookup_hit_keeps_looked_up_doi() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/works/doi:10.1038/nature14539")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(sample_work().to_string())
            .create_async()
            .await;

        let doi = Doi::parse("https://doi.org/10.1038/NATURE14539").unwrap();
        let work = source(&server.url()).fetch_by_doi(&doi).await.unwrap().unwrap();
        assert_eq!(work.doi.as_deref(), Some("10.1038/nature14539"));
        assert_eq!(work.title.as_deref(), Some("Deep learning"));
    }
}
