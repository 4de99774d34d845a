use futures::{StreamExt, stream};
use paperscope_core::{
    ABSTRACT_NOT_AVAILABLE, FulltextRow, NOT_AVAILABLE, PaperRecord, PublicationYear, ShardLayout,
    SourceKind,
};

use crate::identifiers::{ArxivId, Doi};
use crate::provenance::ProvenanceChain;
use crate::sources::{OpenAlexWork, RawRecord};

const DEFAULT_PARALLEL_RECORDS: usize = 8;

/// Rebuilds abstract text from a word -> positions index. Words are ordered
/// by position (ties keep input order) and joined with single spaces.
pub fn restore_abstract(index: Option<&[(String, Vec<u32>)]>) -> String {
    let Some(index) = index else {
        return ABSTRACT_NOT_AVAILABLE.to_string();
    };

    let mut placed: Vec<(u32, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |&p| (p, word.as_str())))
        .collect();
    if placed.is_empty() {
        return ABSTRACT_NOT_AVAILABLE.to_string();
    }
    placed.sort_by_key(|(position, _)| *position);

    placed
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn doi_link(doi: &str) -> String {
    match Doi::parse(doi) {
        Ok(parsed) => parsed.resolver_url(),
        Err(_) => format!("https://www.doi.org/{}", doi.trim()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Maps native hits into `PaperRecord`s and runs provenance rewriting.
#[derive(Clone)]
pub struct RecordNormalizer {
    provenance: ProvenanceChain,
    max_parallel: usize,
}

impl Default for RecordNormalizer {
    fn default() -> Self {
        Self::new(ProvenanceChain::empty())
    }
}

impl RecordNormalizer {
    pub fn new(provenance: ProvenanceChain) -> Self {
        Self {
            provenance,
            max_parallel: DEFAULT_PARALLEL_RECORDS,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn provenance(&self) -> &ProvenanceChain {
        &self.provenance
    }

    /// Shape conversion only; no I/O.
    pub fn to_record(&self, raw: RawRecord) -> PaperRecord {
        match raw {
            RawRecord::Fulltext { kind, layout, row } => from_fulltext(kind, layout, row),
            RawRecord::Work(work) => from_work(work),
            RawRecord::VectorMatch { doi, title } => from_vector(doi, title),
            RawRecord::Record(record) => record,
        }
    }

    /// Converts a batch, then rewrites provenance for the rankable records.
    /// Output order equals input order.
    pub async fn normalize_all(&self, raws: Vec<RawRecord>) -> Vec<PaperRecord> {
        let records: Vec<PaperRecord> = raws.into_iter().map(|raw| self.to_record(raw)).collect();
        self.rewrite_provenance(records).await
    }

    pub async fn rewrite_provenance(&self, records: Vec<PaperRecord>) -> Vec<PaperRecord> {
        stream::iter(records)
            .map(|record| async move {
                if record.is_rankable() {
                    self.provenance.apply(record).await
                } else {
                    record
                }
            })
            .buffered(self.max_parallel)
            .collect()
            .await
    }
}

fn from_fulltext(kind: SourceKind, layout: ShardLayout, row: FulltextRow) -> PaperRecord {
    let mut record = PaperRecord::new(kind);
    let doi = row.doi.trim().to_string();

    record.title = non_blank(row.title);
    record.authors = row
        .author
        .as_deref()
        .map(|a| {
            a.split(", ")
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();
    record.is_open_access = true;
    record.rank_hint = row.rank;

    if !doi.is_empty() {
        record.url = doi_link(&doi);
        record.mirror_url = record.url.clone();
    }

    if layout == ShardLayout::MetadataWithAbstract {
        record.abstract_text = non_blank(row.abstract_text).unwrap_or_else(|| NOT_AVAILABLE.to_string());
        if !doi.is_empty() {
            if let Ok(id) = ArxivId::parse(&doi) {
                record.url = id.pdf_url();
            }
            record.alternate_id = Some(doi.clone());
        }
    }

    record.doi = Some(doi).filter(|d| !d.is_empty());
    record
}

fn from_work(work: OpenAlexWork) -> PaperRecord {
    let mut record = PaperRecord::new(SourceKind::BibliographicApi);

    record.abstract_text = restore_abstract(work.abstract_inverted_index.as_deref());
    record.title = non_blank(work.title);
    record.authors = work.authors;
    record.year = PublicationYear::from(work.publication_year);
    record.reference_count = work.cited_by_count;
    record.is_open_access = work.is_oa;
    record.location = work.location.unwrap_or_else(|| NOT_AVAILABLE.to_string());

    if let Some(raw) = non_blank(work.doi) {
        // Search hits carry a resolver URL; lookups carry the bare DOI.
        record.url = if raw.starts_with("http") {
            raw.clone()
        } else {
            doi_link(&raw)
        };
        record.mirror_url = record.url.clone();
        record.doi = Some(raw);
    }
    record
}

fn from_vector(doi: Option<String>, title: Option<String>) -> PaperRecord {
    let mut record = PaperRecord::new(SourceKind::VectorIndex);
    record.title = non_blank(title);
    if let Some(doi) = non_blank(doi) {
        record.url = doi_link(&doi);
        record.mirror_url = record.url.clone();
        record.doi = Some(doi);
    }
    record
}
