use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::models::paper::PaperRecord;

pub const FAILURE_MESSAGE: &str = "Sorry, something went wrong, please try again";
pub const SUMMARY_UNAVAILABLE: &str = "Summary is currently unavailable";
pub const SUMMARY_NOT_REQUESTED: &str = "No summary was requested";

/// Result page sizes accepted from callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "usize", try_from = "usize")]
pub enum ResultLimit {
    #[default]
    Ten,
    Twenty,
}

impl ResultLimit {
    /// Absent or small requests get 10, anything larger gets 20.
    pub fn from_requested(requested: Option<usize>) -> Self {
        match requested {
            Some(n) if n > 5 => Self::Twenty,
            _ => Self::Ten,
        }
    }

    pub fn get(&self) -> usize {
        match self {
            Self::Ten => 10,
            Self::Twenty => 20,
        }
    }
}

impl From<ResultLimit> for usize {
    fn from(value: ResultLimit) -> Self {
        value.get()
    }
}

impl TryFrom<usize> for ResultLimit {
    type Error = String;

    fn try_from(value: usize) -> std::result::Result<Self, Self::Error> {
        match value {
            10 => Ok(Self::Ten),
            20 => Ok(Self::Twenty),
            other => Err(format!("unsupported result limit {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    pub open_access_only: bool,
    pub summarize: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            open_access_only: false,
            summarize: true,
        }
    }
}

/// A validated inbound search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: ResultLimit,
    pub options: SearchOptions,
}

impl SearchRequest {
    pub fn new(
        query: Option<&str>,
        limit: Option<usize>,
        options: SearchOptions,
    ) -> Result<Self> {
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| CoreError::ValidationError("query parameter is required".to_string()))?;

        Ok(Self {
            query: query.to_string(),
            limit: ResultLimit::from_requested(limit),
            options,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub sum: String,
    pub cot: String,
}

impl Summary {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            sum: text.into(),
            cot: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub summary: Summary,
    pub results: Vec<PaperRecord>,
}

impl SearchResponse {
    /// Well-formed response returned when the pipeline itself fails.
    pub fn degraded() -> Self {
        Self {
            summary: Summary::message(FAILURE_MESSAGE),
            results: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped_to_ten_or_twenty() {
        assert_eq!(ResultLimit::from_requested(None), ResultLimit::Ten);
        assert_eq!(ResultLimit::from_requested(Some(0)), ResultLimit::Ten);
        assert_eq!(ResultLimit::from_requested(Some(5)), ResultLimit::Ten);
        assert_eq!(ResultLimit::from_requested(Some(6)), ResultLimit::Twenty);
        assert_eq!(ResultLimit::from_requested(Some(500)), ResultLimit::Twenty);
    }

    #[test]
    fn missing_or_blank_query_is_rejected() {
        assert!(SearchRequest::new(None, Some(10), SearchOptions::default()).is_err());
        assert!(SearchRequest::new(Some("   "), Some(10), SearchOptions::default()).is_err());

        let req = SearchRequest::new(Some(" graphene "), Some(50), SearchOptions::default()).unwrap();
        assert_eq!(req.query, "graphene");
        assert_eq!(req.limit.get(), 20);
    }

    #[test]
    fn degraded_response_shape() {
        let json = serde_json::to_value(SearchResponse::degraded()).unwrap();
        assert_eq!(json["summary"]["sum"], FAILURE_MESSAGE);
        assert_eq!(json["summary"]["cot"], "");
        assert_eq!(json["results"].as_array().map(Vec::len), Some(0));
    }
}
