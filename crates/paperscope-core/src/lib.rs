//! Paperscope Core — paper records, configuration, local full-text indexes.

pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::AppConfig;
pub use error::{CoreError, Result};
pub use models::*;

pub use storage::connection::ConnectionPool;
pub use storage::fulltext::{FulltextRow, FulltextShard, ShardLayout};
pub use storage::mirror::MirrorIndex;
