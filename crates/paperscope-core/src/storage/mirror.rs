use std::path::Path;

use rusqlite::{OptionalExtension, params};

use super::connection::ConnectionPool;
use crate::error::Result;
use crate::models::paper::normalize_doi;

/// Local index of DOIs with a known mirror copy (`dois(doi TEXT)`).
pub struct MirrorIndex {
    pool: ConnectionPool,
}

impl MirrorIndex {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            pool: ConnectionPool::open_read_only(path)?,
        })
    }

    pub fn with_pool(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn contains(&self, doi: &str) -> Result<bool> {
        let key = normalize_doi(doi);
        if key.is_empty() {
            return Ok(false);
        }
        let conn = self.pool.get_connection();
        let hit: Option<i64> = conn
            .query_row("SELECT 1 FROM dois WHERE doi = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.pool.get_connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dois", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
