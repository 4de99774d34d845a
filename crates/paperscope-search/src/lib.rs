//! Paperscope Search — source adapters, normalization, dedup, ranking and
//! the federated search pipeline.

pub mod collaborators;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod http;
pub mod identifiers;
pub mod normalize;
pub mod pipeline;
pub mod provenance;
pub mod rank;
pub mod setup;
pub mod sources;

pub use collaborators::{ChatCompletionsClient, QueryRewriter, Summarizer};
pub use error::{Result, SearchError};
pub use fetch::{FanoutOutcome, Fetcher, SlotReport, SlotStatus, SourceJob};
pub use normalize::{RecordNormalizer, restore_abstract};
pub use pipeline::{QueryForms, RankedResults, ResultPipeline};
pub use provenance::{ProvenanceChain, ProvenanceRule, Rewrite};
pub use setup::{SHARD_KINDS, pipeline_from_config};
pub use sources::{IdentifierResolver, RawRecord, SourceClient, SourceQuery};
