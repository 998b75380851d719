//! Configuration module for docsift.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.docsift/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary after loading)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `DOCSIFT_` and use double
//! underscores to separate nested levels:
//! - `DOCSIFT_CHUNKING__CHUNK_SIZE=800` sets `chunking.chunk_size`
//! - `DOCSIFT_INDEX__KIND=clustered` sets `index.kind`
//! - `DOCSIFT_RETRIEVAL__MIN_SCORE=0.4` sets `retrieval.min_score`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::chunking::ChunkingConfig;
use crate::error::{RetrievalError, RetrievalResult};
use crate::retrieval::RetrievalConfig;
use crate::store::StorageConfig;
use crate::vector::{EmbeddingConfig, IndexConfig};

/// Directory holding settings and, by default, persisted indexes.
pub const CONFIG_DIR: &str = ".docsift";

const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory where per-document artifacts are written
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Workspace root directory (where .docsift is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct IndexingConfig {
    /// Number of threads in the rayon pool used for scans and clustering
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Show progress spinners on the terminal
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

/// Log levels per module, fed to `tracing_subscriber::EnvFilter`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level for every target not listed in `modules`
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `store = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("indexes")
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            workspace_root: None,
            chunking: ChunkingConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            storage: StorageConfig::default(),
            indexing: IndexingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            show_progress: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file (env overrides still apply)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nesting levels, single underscores
            // stay inside field names
            .merge(Env::prefixed("DOCSIFT_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find `.docsift/settings.toml` in the current directory or an ancestor
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(SETTINGS_FILE))
    }

    /// Get the workspace root directory (where .docsift is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Index directory, resolved against the workspace root when relative
    pub fn index_dir(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) if self.index_path.is_relative() => root.join(&self.index_path),
            _ => self.index_path.clone(),
        }
    }

    /// Reject settings that would make chunking or retrieval ill-defined.
    pub fn validate(&self) -> RetrievalResult<()> {
        let invalid = |reason: String| Err(RetrievalError::Config { reason });

        if self.chunking.chunk_size == 0 {
            return invalid("chunking.chunk_size must be greater than 0".to_string());
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            return invalid(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            ));
        }
        if self.index.clusters == 0 {
            return invalid("index.clusters must be at least 1".to_string());
        }
        if self.index.probes == 0 {
            return invalid("index.probes must be at least 1".to_string());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be at least 1".to_string());
        }
        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be at least 1".to_string());
        }
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            return invalid(format!(
                "retrieval.min_score ({}) must be within [0.0, 1.0]",
                self.retrieval.min_score
            ));
        }
        if self.indexing.parallel_threads == 0 {
            return invalid("indexing.parallel_threads must be at least 1".to_string());
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# docsift configuration

# Version of the configuration schema
version = 1

# Directory for per-document artifacts (relative to the workspace root)
index_path = ".docsift/indexes"

[chunking]
# Characters accumulated before a chunk is closed
chunk_size = 1600
# Characters carried over from the end of the previous chunk
overlap = 200

[index]
# "flat" scans every chunk; "clustered" partitions chunks with k-means
kind = "flat"
clusters = 4
probes = 2
seed = 42

[embedding]
# "fastembed" runs a local ONNX model; "hashed" needs no download
backend = "fastembed"
model = "AllMiniLML6V2"
batch_size = 32
# Output dimension of the hashed backend
dimension = 384

[retrieval]
top_k = 5
# Character budget for assembled context
max_length = 2000
# Normalized scores below this are discarded. Scores lie in [1/3, 1] and
# unrelated text scores about 0.41, so raise this above 0.33 to filter.
min_score = 0.3
separator = "\n\n"

[storage]
# "records" (length-prefixed) or "delimited" (legacy <<<END>>> text)
chunk_format = "records"

[indexing]
# parallel_threads = {}
show_progress = true

[logging]
# error | warn | info | debug | trace; RUST_LOG overrides
default = "warn"

[logging.modules]
# store = "debug"
"#,
            num_cpus::get()
        );

        std::fs::write(&config_path, template)?;

        Ok(config_path)
    }
}
