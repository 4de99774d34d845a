use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const NOT_AVAILABLE: &str = "Not Available";
pub const ABSTRACT_NOT_AVAILABLE: &str = "Abstract Not Available";
pub const UNKNOWN: &str = "Unknown";

/// Where a record came from, or which provenance rule claimed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    VectorIndex,
    FulltextDbA,
    FulltextDbB,
    FulltextDbC,
    BibliographicApi,
    MirrorIndex,
    SecondaryMirror,
    Preprint,
    ArchiveA,
    ArchiveB,
    Other,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VectorIndex => "vector-index",
            Self::FulltextDbA => "fulltext-db-a",
            Self::FulltextDbB => "fulltext-db-b",
            Self::FulltextDbC => "fulltext-db-c",
            Self::BibliographicApi => "bibliographic-api",
            Self::MirrorIndex => "mirror-index",
            Self::SecondaryMirror => "secondary-mirror",
            Self::Preprint => "preprint",
            Self::ArchiveA => "archive-a",
            Self::ArchiveB => "archive-b",
            Self::Other => "other",
        }
    }

    pub fn is_fulltext(&self) -> bool {
        matches!(self, Self::FulltextDbA | Self::FulltextDbB | Self::FulltextDbC)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse relevance bucket assigned by the final ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimilarityTag {
    FullyMatched,
    HighlyRelated,
    Related,
    BarelyRelated,
}

impl SimilarityTag {
    /// Sort key, higher sorts first.
    pub fn bucket_rank(&self) -> u8 {
        match self {
            Self::FullyMatched => 4,
            Self::HighlyRelated => 3,
            Self::Related => 2,
            Self::BarelyRelated => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyMatched => "fully-matched",
            Self::HighlyRelated => "highly-related",
            Self::Related => "related",
            Self::BarelyRelated => "barely-related",
        }
    }
}

/// Publication year; serialized as a number, or `"Unknown"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublicationYear {
    Known(i32),
    #[default]
    Unknown,
}

impl PublicationYear {
    pub fn as_option(&self) -> Option<i32> {
        match self {
            Self::Known(year) => Some(*year),
            Self::Unknown => None,
        }
    }
}

impl From<Option<i32>> for PublicationYear {
    fn from(value: Option<i32>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl Serialize for PublicationYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(year) => serializer.serialize_i32(*year),
            Self::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

impl<'de> Deserialize<'de> for PublicationYear {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
            Missing(()),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => i32::try_from(n).map_or(Self::Unknown, Self::Known),
            Raw::Text(s) => s.trim().parse::<i32>().map_or(Self::Unknown, Self::Known),
            Raw::Missing(()) => Self::Unknown,
        })
    }
}

/// Canonical paper record flowing through the search pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperRecord {
    pub source: SourceKind,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub doi: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_id: Option<String>,

    #[serde(rename = "abstract", default = "not_available")]
    pub abstract_text: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub year: PublicationYear,

    #[serde(default)]
    pub reference_count: u32,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub mirror_url: String,

    #[serde(default = "not_available")]
    pub location: String,

    #[serde(default)]
    pub is_open_access: bool,

    #[serde(default)]
    pub rank_hint: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_tag: Option<SimilarityTag>,

    #[serde(default)]
    pub relevance_score: f64,
}

fn not_available() -> String {
    NOT_AVAILABLE.to_string()
}

impl PaperRecord {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            title: None,
            doi: None,
            alternate_id: None,
            abstract_text: not_available(),
            authors: Vec::new(),
            year: PublicationYear::Unknown,
            reference_count: 0,
            url: String::new(),
            mirror_url: String::new(),
            location: not_available(),
            is_open_access: false,
            rank_hint: 0.0,
            similarity_tag: None,
            relevance_score: 0.0,
        }
    }

    pub fn title_str(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    /// DOI in its comparison form, if the record carries one.
    pub fn normalized_doi(&self) -> Option<String> {
        self.doi
            .as_deref()
            .map(normalize_doi)
            .filter(|doi| !doi.is_empty())
    }

    /// Records need both a title and a DOI to be deduplicated or ranked.
    pub fn is_rankable(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
            && self.doi.as_deref().is_some_and(|d| !d.trim().is_empty())
    }

    pub fn has_abstract(&self) -> bool {
        let text = self.abstract_text.trim();
        !text.is_empty() && text != NOT_AVAILABLE && text != ABSTRACT_NOT_AVAILABLE
    }

    pub fn authors_display(&self) -> String {
        if self.authors.is_empty() {
            UNKNOWN.to_string()
        } else {
            self.authors.join(", ")
        }
    }
}

/// Lowercase, drop all whitespace, strip a `doi.org` URL prefix.
pub fn normalize_doi(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    for prefix in ["https://doi.org/", "http://doi.org/"] {
        if let Some(stripped) = compact.strip_prefix(prefix) {
            return stripped.to_string();
        }
    }
    compact
}
