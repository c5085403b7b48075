use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HsknnConfig {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
}

/// Locations of the externally produced inputs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    /// JSON Lines corpus, one record per line, in `row_index` order.
    pub corpus_path: String,
    /// JSON object of curated codes: `code -> {desc, chapter}`.
    pub reference_path: String,
    /// Optional precomputed 2-D layout, one point per corpus row.
    pub projection_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub artifact_db: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Upper bound on `k` for the distance-weighted vote.
    pub neighbors: usize,
    pub top_k: usize,
    pub min_confidence: f32,
    pub similar_examples: usize,
    pub latent_neighbors: usize,
}

impl Default for HsknnConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            data: DataConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        let data_dir = default_hsknn_dir().join("data");
        Self {
            corpus_path: data_dir.join("corpus.jsonl").to_string_lossy().into_owned(),
            reference_path: data_dir
                .join("hs_codes_reference.json")
                .to_string_lossy()
                .into_owned(),
            projection_path: data_dir
                .join("projection.json")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let artifact_db = default_hsknn_dir()
            .join("artifacts.db")
            .to_string_lossy()
            .into_owned();
        Self { artifact_db }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_hsknn_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "multilingual-e5-small".into(),
            cache_dir,
            batch_size: 32,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            neighbors: 5,
            top_k: 5,
            min_confidence: 0.01,
            similar_examples: 3,
            latent_neighbors: 5,
        }
    }
}

/// Returns `~/.hsknn/`
pub fn default_hsknn_dir() -> PathBuf {
    home_dir().join(".hsknn")
}

// Working directory when no home is set.
fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the default config file path: `~/.hsknn/config.toml`
pub fn default_config_path() -> PathBuf {
    default_hsknn_dir().join("config.toml")
}

impl HsknnConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            HsknnConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (HSKNN_DB, HSKNN_CORPUS, HSKNN_REFERENCE,
    /// HSKNN_PROJECTION, HSKNN_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HSKNN_DB") {
            self.storage.artifact_db = val;
        }
        if let Ok(val) = std::env::var("HSKNN_CORPUS") {
            self.data.corpus_path = val;
        }
        if let Ok(val) = std::env::var("HSKNN_REFERENCE") {
            self.data.reference_path = val;
        }
        if let Ok(val) = std::env::var("HSKNN_PROJECTION") {
            self.data.projection_path = val;
        }
        if let Ok(val) = std::env::var("HSKNN_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the artifact database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.artifact_db)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(path)
    }
}
