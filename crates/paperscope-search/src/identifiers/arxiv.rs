use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

// YYMM.NNNN or YYMM.NNNNN, optional version
static BARE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}\.\d{4,5})(?:v(\d+))?$").expect("valid regex"));

// Embedded in a URL or DOI: `10.48550/arxiv.2102.05095`, `arXiv:2102.05095`
static EMBEDDED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:arxiv\.|arXiv:)(\d{4}\.\d{4,5})").expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArxivId {
    pub id: String,
    pub version: Option<u8>,
}

impl ArxivId {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let stripped = input
            .strip_prefix("arXiv:")
            .or_else(|| input.strip_prefix("arxiv:"))
            .unwrap_or(input);

        let caps = BARE_ID
            .captures(stripped)
            .ok_or_else(|| SearchError::InvalidArxivId(input.to_string()))?;
        let id = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| SearchError::InvalidArxivId(input.to_string()))?;
        let version = caps.get(2).and_then(|v| v.as_str().parse::<u8>().ok());

        Ok(Self { id, version })
    }

    /// First preprint id encoded in a URL or DOI string.
    pub fn find_in(text: &str) -> Option<Self> {
        EMBEDDED_ID
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| Self {
                id: m.as_str().to_string(),
                version: None,
            })
    }

    pub fn pdf_url(&self) -> String {
        format!("https://arxiv.org/pdf/{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_ids_with_versions() {
        let id = ArxivId::parse("arXiv:1706.03762v5").unwrap();
        assert_eq!(id.id, "1706.03762");
        assert_eq!(id.version, Some(5));
        assert!(ArxivId::parse("1706.0376").is_err());
        assert!(ArxivId::parse("not-arxiv").is_err());
    }

    #[test]
    fn finds_ids_inside_doi_urls() {
        let id = ArxivId::find_in("https://doi.org/10.48550/arxiv.2102.05095").unwrap();
        assert_eq!(id.pdf_url(), "https://arxiv.org/pdf/2102.05095");

        let id = ArxivId::find_in("see arXiv:2301.04567 for details").unwrap();
        assert_eq!(id.id, "2301.04567");
    }

    #[test]
    fn ignores_urls_without_ids() {
        assert!(ArxivId::find_in("https://doi.org/10.1038/nature14539").is_none());
        assert!(ArxivId::find_in("").is_none());
    }
}
