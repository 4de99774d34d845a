use std::path::Path;

use rusqlite::params;

use super::connection::ConnectionPool;
use crate::error::{CoreError, Result};

pub const LITERATURE_TABLE: &str = "literature";

/// Which columns a full-text shard exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardLayout {
    /// `doi, title, author`
    Metadata,
    /// `doi, title, author, abstract`; `doi` holds the preprint id.
    MetadataWithAbstract,
}

impl ShardLayout {
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Metadata => &["doi", "title", "author"],
            Self::MetadataWithAbstract => &["doi", "title", "author", "abstract"],
        }
    }

    fn searched_columns(&self) -> &'static str {
        match self {
            Self::Metadata => "{title doi}",
            Self::MetadataWithAbstract => "{title abstract doi}",
        }
    }
}

/// One hit from a shard; `rank` is the FTS5 rank (lower is better).
#[derive(Debug, Clone, PartialEq)]
pub struct FulltextRow {
    pub doi: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub abstract_text: Option<String>,
    pub rank: f64,
}

/// A local SQLite FTS5 index over bibliographic metadata.
pub struct FulltextShard {
    name: String,
    layout: ShardLayout,
    pool: ConnectionPool,
}

impl FulltextShard {
    pub fn open(name: impl Into<String>, path: &Path, layout: ShardLayout) -> Result<Self> {
        let pool = ConnectionPool::open_read_only(path)?;
        Ok(Self::with_pool(name, layout, pool))
    }

    pub fn with_pool(name: impl Into<String>, layout: ShardLayout, pool: ConnectionPool) -> Self {
        Self {
            name: name.into(),
            layout,
            pool,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> ShardLayout {
        self.layout
    }

    pub fn table_columns(&self) -> Result<Vec<String>> {
        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({LITERATURE_TABLE})"))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Fails with `SchemaMismatch` when a required column is absent.
    pub fn validate_schema(&self) -> Result<()> {
        let columns = self.table_columns()?;
        let missing: Vec<String> = self
            .layout
            .required_columns()
            .iter()
            .filter(|required| !columns.iter().any(|c| c == *required))
            .map(|c| (*c).to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::SchemaMismatch {
                table: format!("{}.{LITERATURE_TABLE}", self.name),
                missing,
            })
        }
    }

    /// Validates the schema, then runs a ranked MATCH query.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<FulltextRow>> {
        self.validate_schema()?;

        let Some(expression) = build_match_expression(self.layout, query) else {
            return Ok(Vec::new());
        };

        let sql = match self.layout {
            ShardLayout::Metadata => format!(
                "SELECT doi, title, author, rank FROM {LITERATURE_TABLE}
                 WHERE {LITERATURE_TABLE} MATCH ?1 ORDER BY rank LIMIT ?2"
            ),
            ShardLayout::MetadataWithAbstract => format!(
                "SELECT doi, title, author, rank, abstract FROM {LITERATURE_TABLE}
                 WHERE {LITERATURE_TABLE} MATCH ?1 ORDER BY rank LIMIT ?2"
            ),
        };
        let with_abstract = self.layout == ShardLayout::MetadataWithAbstract;

        let conn = self.pool.get_connection();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![expression, limit as i64], |row| {
                Ok(FulltextRow {
                    doi: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    title: row.get(1)?,
                    author: row.get(2)?,
                    rank: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    abstract_text: if with_abstract { row.get(4)? } else { None },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

/// Builds an FTS5 expression that ANDs every query word as a quoted phrase,
/// restricted to the shard's searchable columns. `None` when no word survives.
pub fn build_match_expression(layout: ShardLayout, query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|word| word.chars().any(char::is_alphanumeric))
        .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        return None;
    }

    Some(format!("{} : ({})", layout.searched_columns(), terms.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_with(layout: ShardLayout, ddl: &str, rows: &[(&str, &str, &str, &str)]) -> FulltextShard {
        let pool = ConnectionPool::open_in_memory().unwrap();
        {
            let conn = pool.get_connection();
            conn.execute_batch(ddl).unwrap();
            for (doi, title, author, abs) in rows {
                if layout == ShardLayout::MetadataWithAbstract {
                    conn.execute(
                        "INSERT INTO literature (doi, title, author, abstract) VALUES (?1, ?2, ?3, ?4)",
                        params![doi, title, author, abs],
                    )
                    .unwrap();
                } else {
                    conn.execute(
                        "INSERT INTO literature (doi, title, author) VALUES (?1, ?2, ?3)",
                        params![doi, title, author],
                    )
                    .unwrap();
                }
            }
        }
        FulltextShard::with_pool("test-shard", layout, pool)
    }

    #[test]
    fn match_expression_quotes_words() {
        let expr = build_match_expression(ShardLayout::Metadata, "graphene \"oxide\" -- 10.1/x").unwrap();
        assert_eq!(expr, "{title doi} : (\"graphene\" \"\"\"oxide\"\"\" \"10.1/x\")");
        assert!(build_match_expression(ShardLayout::Metadata, " -- ?? ").is_none());
    }

    #[test]
    fn metadata_shard_returns_ranked_rows() {
        let shard = shard_with(
            ShardLayout::Metadata,
            "CREATE VIRTUAL TABLE literature USING fts5(doi, title, author);",
            &[
                ("10.1/a", "Graphene oxide membranes", "Li Wei, Ann Smith", ""),
                ("10.1/b", "Protein folding", "Bob Jones", ""),
                ("10.1/c", "Graphene oxide graphene oxide review", "Carl Doe", ""),
            ],
        );

        let rows = shard.search("graphene oxide", 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.abstract_text.is_none()));
        assert!(rows[0].rank <= rows[1].rank);
        assert!(rows.iter().any(|r| r.doi == "10.1/a"));
    }

    #[test]
    fn abstract_shard_reads_abstract_column() {
        let shard = shard_with(
            ShardLayout::MetadataWithAbstract,
            "CREATE VIRTUAL TABLE literature USING fts5(doi, title, author, abstract);",
            &[("2102.05095", "Attention maps", "Ann Lee", "We study transformers.")],
        );

        let rows = shard.search("transformers", 5).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].abstract_text.as_deref(), Some("We study transformers."));
        assert_eq!(rows[0].doi, "2102.05095");
    }

    #[test]
    fn unexpected_schema_is_rejected() {
        let shard = shard_with(
            ShardLayout::MetadataWithAbstract,
            "CREATE VIRTUAL TABLE literature USING fts5(doi, title);",
            &[],
        );

        match shard.search("anything", 5) {
            Err(CoreError::SchemaMismatch { missing, .. }) => {
                assert_eq!(missing, vec!["author".to_string(), "abstract".to_string()]);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_table_is_a_schema_mismatch() {
        let shard = shard_with(ShardLayout::Metadata, "CREATE TABLE other (x TEXT);", &[]);
        assert!(matches!(
            shard.validate_schema(),
            Err(CoreError::SchemaMismatch { .. })
        ));
    }
}
