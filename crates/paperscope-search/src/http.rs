use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::{Result, SearchError};

pub const USER_AGENT: &str = "paperscope/0.1";

// ─── HttpClient ───────────────────────────────────────────────────────────────

/// Shared HTTP client with request spacing and a hard per-request timeout.
/// One attempt per call: failures are returned, never retried.
pub struct HttpClient {
    client: reqwest::Client,
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

/// What an existence probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub final_url: String,
    pub content_type: String,
}

impl HttpClient {
    pub fn new(min_interval: Duration, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    async fn wait_for_rate_limit(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn get(&self, url: &str) -> Result<String> {
        self.get_with_headers(url, HeaderMap::new()).await
    }

    pub async fn get_with_headers(&self, url: &str, headers: HeaderMap) -> Result<String> {
        self.wait_for_rate_limit().await;
        let resp = self.client.get(url).headers(headers).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchError::ApiError(
                url.to_string(),
                format!("HTTP {status}: {body}"),
            ));
        }
        resp.text().await.map_err(SearchError::Http)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self.get(url).await?;
        serde_json::from_str(&text).map_err(|e| SearchError::Parse(e.to_string()))
    }

    /// Like `get_json`, but a 404 is `Ok(None)`.
    pub async fn get_json_opt<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        self.wait_for_rate_limit().await;
        let resp = self.client.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchError::ApiError(
                url.to_string(),
                format!("HTTP {status}: {body}"),
            ));
        }
        let text = resp.text().await.map_err(SearchError::Http)?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| SearchError::Parse(e.to_string()))
    }

    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<R> {
        self.post_json_with_headers(url, body, HeaderMap::new())
            .await
    }

    pub async fn post_json_with_headers<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        headers: HeaderMap,
    ) -> Result<R> {
        self.wait_for_rate_limit().await;
        let resp = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let msg = resp.text().await.unwrap_or_default();
            return Err(SearchError::ApiError(
                url.to_string(),
                format!("HTTP {status}: {msg}"),
            ));
        }

        let text = resp.text().await.map_err(SearchError::Http)?;
        serde_json::from_str(&text).map_err(|e| SearchError::Parse(e.to_string()))
    }

    /// GET that follows redirects and reports where it landed, whatever the status.
    pub async fn probe(&self, url: &str, headers: HeaderMap) -> Result<ProbeResponse> {
        self.wait_for_rate_limit().await;
        let resp = self.client.get(url).headers(headers).send().await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(ProbeResponse {
            status: resp.status().as_u16(),
            final_url: resp.url().to_string(),
            content_type,
        })
    }
}
