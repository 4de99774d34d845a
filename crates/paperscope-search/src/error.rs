use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("invalid arXiv ID: {0}")]
    InvalidArxivId(String),

    #[error("query parameter is required")]
    MissingQuery,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error from {0}: {1}")]
    ApiError(String, String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("malformed data from {0}: {1}")]
    MalformedUpstream(String, String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(#[from] paperscope_core::CoreError),

    #[error("collaborator error from {0}: {1}")]
    Collaborator(String, String),

    #[error("identifier not found: {0}")]
    IdentifierNotFound(String),

    #[error("pipeline failure: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;
