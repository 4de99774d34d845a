use once_cell::sync::Lazy;
use paperscope_core::normalize_doi;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

static DOI_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^10\.\d{4,9}/\S+$").expect("valid regex"));

const URL_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "https://www.doi.org/",
    "doi:",
];

/// A syntactically valid DOI in its lowercase comparison form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Doi {
    pub normalized: String,
}

impl Doi {
    pub fn parse(input: &str) -> Result<Self> {
        let compact = normalize_doi(input);
        let stripped = URL_PREFIXES
            .iter()
            .find_map(|prefix| compact.strip_prefix(prefix))
            .unwrap_or(&compact);

        if !DOI_SHAPE.is_match(stripped) {
            return Err(SearchError::InvalidDoi(input.trim().to_string()));
        }

        Ok(Self {
            normalized: stripped.to_string(),
        })
    }

    /// The whole query is a DOI (possibly as a resolver URL), not just containing one.
    pub fn from_query(query: &str) -> Option<Self> {
        let trimmed = query.trim();
        if trimmed.split_whitespace().count() != 1 {
            return None;
        }
        Self::parse(trimmed).ok()
    }

    pub fn resolver_url(&self) -> String {
        format!("https://www.doi.org/{}", self.normalized)
    }

    /// DOI with every `/` removed, the form archive object keys use.
    pub fn flattened(&self) -> String {
        self.normalized.replace('/', "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_prefixed_forms() {
        for input in [
            "10.1038/s41598-021-95939-y",
            "https://doi.org/10.1038/S41598-021-95939-Y",
            "http://dx.doi.org/10.1038/s41598-021-95939-y",
            "doi:10.1038/s41598-021-95939-y",
            "DOI: 10.1038/s41598-021-95939-y",
        ] {
            assert_eq!(
                Doi::parse(input).unwrap().normalized,
                "10.1038/s41598-021-95939-y",
                "input {input}"
            );
        }
    }

    #[test]
    fn rejects_non_dois() {
        assert!(Doi::parse("graphene oxide").is_err());
        assert!(Doi::parse("10.1000").is_err());
        assert!(Doi::parse("10.12/short-registrant").is_err());
        assert!(Doi::parse("").is_err());
    }

    #[test]
    fn from_query_requires_a_single_token() {
        assert!(Doi::from_query("  10.1145/3597926.3598111 ").is_some());
        assert!(Doi::from_query("see 10.1145/3597926.3598111").is_none());
    }

    #[test]
    fn derived_forms() {
        let doi = Doi::parse("10.1145/3597926.3598111").unwrap();
        assert_eq!(doi.flattened(), "10.11453597926.3598111");
        assert_eq!(doi.resolver_url(), "https://www.doi.org/10.1145/3597926.3598111");
    }
}
