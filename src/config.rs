use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MnemoConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub decay: DecayConfig,
    pub sync: SyncConfig,
    pub facade: FacadeConfig,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Vector dimension shared by every provider in the chain and the store.
    pub dimension: usize,
    /// Provider chain order. The last entry must be "local" — it is the
    /// deterministic fallback that is never skipped.
    pub providers: Vec<ProviderConfig>,
    /// Consecutive failures before a provider is skipped on later calls.
    pub max_failures: u32,
    /// Bounded FIFO cache of embedding results.
    pub cache_size: usize,
    /// Upper bound on in-flight provider requests during batch embedding.
    pub batch_concurrency: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// One of "openai", "ollama", "local".
    pub kind: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub default_top_k: usize,
    /// RRF rank constant.
    pub rrf_k: usize,
    pub vector_weight: f64,
    pub fts_weight: f64,
    /// Minimum cosine similarity for vector results.
    pub similarity_threshold: f64,
}

/// Constants for the confidence decay law. Durations are in hours so tests
/// can shrink them without touching the formulas.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    pub base_half_life_hours: f64,
    /// Half-life extension per recorded access.
    pub access_boost_hours: f64,
    pub max_half_life_hours: f64,
    /// Fraction of forgotten confidence recovered on access.
    pub reinforcement_factor: f64,
    /// Flat bonus added on every access.
    pub access_bonus: f64,
    /// Below this computed confidence a memory is no longer valid.
    pub min_confidence_threshold: f64,
    /// Below this computed confidence a memory may be deleted.
    /// Must be lower than `min_confidence_threshold`.
    pub cleanup_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Chunk window in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Files larger than this are skipped outright.
    pub max_file_size: u64,
    /// Glob patterns excluded from indexing.
    pub ignore: Vec<String>,
    pub debounce_ms: u64,
    /// File extensions considered indexable.
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FacadeConfig {
    /// One of "local", "remote", "hybrid".
    pub mode: String,
    pub local_timeout_ms: u64,
    pub remote_timeout_ms: u64,
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Characters of lower-cased content used as the dedup key.
    pub dedup_prefix_len: usize,
}

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            decay: DecayConfig::default(),
            sync: SyncConfig::default(),
            facade: FacadeConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnemo_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            providers: vec![ProviderConfig {
                kind: "local".into(),
                model: None,
                base_url: None,
                api_key_env: None,
            }],
            max_failures: 3,
            cache_size: 1000,
            batch_concurrency: 4,
            request_timeout_secs: 30,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            rrf_k: 60,
            vector_weight: 0.6,
            fts_weight: 0.4,
            similarity_threshold: 0.0,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            base_half_life_hours: 7.0 * 24.0,
            access_boost_hours: 24.0,
            max_half_life_hours: 90.0 * 24.0,
            reinforcement_factor: 0.5,
            access_bonus: 0.05,
            min_confidence_threshold: 0.2,
            cleanup_threshold: 0.05,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 200,
            max_file_size: 1024 * 1024,
            ignore: vec![
                "**/.git/**".into(),
                "**/node_modules/**".into(),
                "**/target/**".into(),
                "**/dist/**".into(),
                "**/.venv/**".into(),
            ],
            debounce_ms: 500,
            extensions: vec![
                "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "c", "h", "cpp",
                "hpp", "md", "txt", "toml", "yaml", "yml", "json",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            mode: "local".into(),
            local_timeout_ms: 2_000,
            remote_timeout_ms: 5_000,
            remote_url: None,
            dedup_prefix_len: 100,
        }
    }
}

/// Returns `~/.mnemo/`
pub fn default_mnemo_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnemo")
}

/// Returns the default config file path: `~/.mnemo/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemo_dir().join("config.toml")
}

impl MnemoConfig {
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
            MnemoConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMO_DB, MNEMO_MODE, MNEMO_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMO_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMO_MODE") {
            self.facade.mode = val;
        }
        if let Ok(val) = std::env::var("MNEMO_LOG_LEVEL") {
            self.log_level = val;
        }
    }

    /// Reject configurations that would violate engine invariants.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.embedding.dimension > 0,
            "embedding.dimension must be positive"
        );
        anyhow::ensure!(
            !self.embedding.providers.is_empty(),
            "embedding.providers must not be empty"
        );
        anyhow::ensure!(
            self.decay.cleanup_threshold < self.decay.min_confidence_threshold,
            "decay.cleanup_threshold must be below decay.min_confidence_threshold"
        );
        anyhow::ensure!(
            self.sync.chunk_overlap < self.sync.chunk_size,
            "sync.chunk_overlap must be smaller than sync.chunk_size"
        );
        match self.facade.mode.as_str() {
            "local" | "remote" | "hybrid" => {}
            other => anyhow::bail!("unknown facade mode: {other}"),
        }
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
