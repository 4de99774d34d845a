use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Root application configuration, loaded from `~/.config/paperscope/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: SourcesConfig,
    pub search: SearchConfig,
    pub provenance: ProvenanceConfig,
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub fulltext_a: ShardConfig,
    pub fulltext_b: ShardConfig,
    pub fulltext_c: ShardConfig,
    pub mirror_index_path: String,
    pub openalex: OpenAlexConfig,
    pub vector_index: VectorIndexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAlexConfig {
    pub enabled: bool,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polite_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub fulltext_limit: usize,
    pub expansion_factor: usize,
    pub max_concurrency: usize,
    pub source_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub expand_identifier_hits: bool,
    pub summary_top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    pub mirror_index_enabled: bool,
    pub mirror_base_url: String,
    pub secondary_mirror_enabled: bool,
    pub secondary_mirror_base_url: String,
    pub preprint_enabled: bool,
    pub archive_a_enabled: bool,
    pub archive_a_dois: Vec<String>,
    pub archive_download_base_url: String,
    pub archive_b_enabled: bool,
    pub archive_b_endpoint: String,
    pub archive_b_app_name: String,
    pub probe_timeout_secs: u64,
    pub max_parallel_records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub summarize_enabled: bool,
    pub rewrite_enabled: bool,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

// ─── Defaults ──────────────────────────────────────────────

fn index_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("paperscope")
        .join("indexes")
}

fn index_path(file: &str) -> String {
    index_dir().join(file).to_string_lossy().to_string()
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fulltext_a: ShardConfig::at(index_path("fulltext_missing_abstract.db")),
            fulltext_b: ShardConfig::at(index_path("fulltext_existing.db")),
            fulltext_c: ShardConfig::at(index_path("fulltext_preprints.db")),
            mirror_index_path: index_path("mirror_dois.db"),
            openalex: OpenAlexConfig::default(),
            vector_index: VectorIndexConfig::default(),
        }
    }
}

impl ShardConfig {
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            enabled: true,
            path: path.into(),
        }
    }
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: String::new(),
        }
    }
}

impl Default for OpenAlexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openalex.org".to_string(),
            polite_email: None,
        }
    }
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:19530".to_string(),
            collection: "paper_rag".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fulltext_limit: 25,
            expansion_factor: 2,
            max_concurrency: 5,
            source_timeout_secs: 15,
            request_timeout_secs: 40,
            expand_identifier_hits: false,
            summary_top_n: 6,
        }
    }
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            mirror_index_enabled: true,
            mirror_base_url: "https://sci-hub.se".to_string(),
            secondary_mirror_enabled: true,
            secondary_mirror_base_url: "https://sci-net.xyz".to_string(),
            preprint_enabled: true,
            archive_a_enabled: true,
            archive_a_dois: vec![
                "10.1109/comsnets59351.2024.10426894".to_string(),
                "10.1145/3597926.3598111".to_string(),
                "10.1109/bigcomp60711.2024.00030".to_string(),
            ],
            archive_download_base_url:
                "https://gnfd-testnet-sp1.bnbchain.org/download/scai/bnbgf-exp".to_string(),
            archive_b_enabled: true,
            archive_b_endpoint: "https://uploader.irys.xyz/graphql".to_string(),
            archive_b_app_name: "scivault".to_string(),
            probe_timeout_secs: 10,
            max_parallel_records: 8,
        }
    }
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            summarize_enabled: false,
            rewrite_enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "PAPERSCOPE_LLM_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/paperscope/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PAPERSCOPE_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("paperscope")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Shards in fan-out order, paired with the name used in logs.
    pub fn fulltext_shards(&self) -> [(&'static str, &ShardConfig); 3] {
        [
            ("fulltext-db-a", &self.sources.fulltext_a),
            ("fulltext-db-b", &self.sources.fulltext_b),
            ("fulltext-db-c", &self.sources.fulltext_c),
        ]
    }
}
