//! Language-model collaborators: query rewriting, keyword extraction and
//! the prose summary of the top results. The pipeline only depends on the
//! traits; `ChatCompletionsClient` talks to an OpenAI-compatible endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use paperscope_core::Summary;
use paperscope_core::config::CollaboratorConfig;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SearchError};
use crate::http::HttpClient;

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid regex"));

const REWRITE_PROMPT: &str = "You are a program. Translate the [query] into English and output it as [trans]:
- If the query is not in English, translate it to English.
- If the query is already in English, do not translate it.
- Rewrite it as a declarative phrase and remove redundant words.
- Example: \"Find some papers on the magnetic dipole model for defect detection\" -> \"magnetic dipole model for defect detection\"
- Output the [trans] and nothing else, in the format [trans]: xxx";

const KEYWORD_PROMPT: &str = "You are a program that analyzes a [query]. Identify and extract its keywords and output them as [keywords]:
- Include at most one additional keyword naming the domain of the query.
- Rank the keywords by importance, preferring terms specific to the query's domain.
- Do not repeat words.
- Extract no more than 4 keywords.
- Output only the keywords in the format [keywords]: xxx, with no other text.";

/// Writes the prose summary for the top results.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, query: &str, top_records: &str, limit: usize) -> Result<Summary>;
}

/// Turns a free-text query into search-friendly forms.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    /// English, declarative, without filler words.
    async fn rewrite(&self, query: &str) -> Result<String>;

    /// At most four space-separated keywords.
    async fn extract_keywords(&self, query: &str) -> Result<String>;
}

/// Splits `<think>…</think>` out of a model answer: the inner text becomes
/// the reasoning trace, the remainder the summary.
pub fn split_reasoning(answer: &str) -> Summary {
    let cot = THINK_BLOCK
        .captures_iter(answer)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .collect::<Vec<_>>()
        .join("\n");
    let sum = THINK_BLOCK
        .replace_all(answer, "")
        .replace("<think>", "")
        .trim()
        .to_string();
    Summary { sum, cot }
}

/// Drops a `[label]: ` echo and commas from a one-line model answer.
fn clean_answer(answer: &str, label: &str) -> String {
    answer
        .replace(&format!("[{label}]: "), "")
        .replace(',', "")
        .trim()
        .to_string()
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatCompletionsClient {
    http: Arc<HttpClient>,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(http: Arc<HttpClient>, base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Reads the API key from the environment variable the config names.
    pub fn from_config(http: Arc<HttpClient>, config: &CollaboratorConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(http, &config.base_url, &config.model, api_key)
    }

    async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        };

        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| SearchError::Collaborator("chat".to_string(), e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response: Value = self.http.post_json_with_headers(&url, &body, headers).await?;
        let content = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SearchError::Collaborator("chat".to_string(), "response has no message content".to_string())
            })?;
        debug!(model = %self.model, chars = content.len(), "chat completion");
        Ok(content.to_string())
    }
}

#[async_trait]
impl Summarizer for ChatCompletionsClient {
    async fn summarize(&self, query: &str, top_records: &str, _limit: usize) -> Result<Summary> {
        let prompt = format!(
            "You are a search engine and answer bot; you have acquired [data] for a [query].
- The user's [query]: {query}
- The [data] in JSON format: {top_records}
- Answer formally, simply and professionally.
- Answer in at most 2-3 paragraphs and at most 300 words, in Markdown.
- Use information and URLs from [data] with inline citations formatted as numbered links (e.g. [1], [2]), strictly increasing.
- List the citations at the end."
        );
        let answer = self.complete(None, &prompt).await?;
        Ok(split_reasoning(&answer))
    }
}

#[async_trait]
impl QueryRewriter for ChatCompletionsClient {
    async fn rewrite(&self, query: &str) -> Result<String> {
        let answer = self
            .complete(Some(REWRITE_PROMPT), &format!("[query]: {query}"))
            .await?;
        Ok(clean_answer(&answer, "trans"))
    }

    async fn extract_keywords(&self, query: &str) -> Result<String> {
        let answer = self
            .complete(Some(KEYWORD_PROMPT), &format!("[query]: {query}"))
            .await?;
        Ok(clean_answer(&answer, "keywords"))
    }
}
