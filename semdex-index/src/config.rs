//! Runtime configuration for the index manager.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SEMDEX_*` environment variables. Every knob can also be set
//! programmatically through the `with_*` builder methods.

use anyhow::{Context, Result};
use semdex_embed::EmbedConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the index manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory whose immediate subdirectories are collections
    pub root_dir: PathBuf,
    /// Directory holding the manifest, usage stats, graphs and chunk maps
    pub store_dir: PathBuf,
    /// Above this change ratio an update becomes a full rebuild
    pub change_ratio_threshold: f64,
    /// Process memory ceiling in MiB before resident indices are evicted
    pub max_memory_mb: u64,
    /// Maximum number of cached search results
    pub cache_size: usize,
    /// Lifetime of a cached search result in milliseconds
    pub cache_ttl_ms: u64,
    /// Number of most-used collections loaded at startup
    pub prewarm_count: usize,
    /// HNSW search expansion factor
    pub ef_search: usize,
    /// Chunk budget in tokens
    pub max_tokens: usize,
    /// Overlap between consecutive chunks in tokens
    pub overlap_tokens: usize,
    /// Quiet period before file system events are delivered, in milliseconds
    pub watch_debounce_ms: u64,
    /// File extensions (without dot) that count as documents
    pub extensions: Vec<String>,
    /// Embedding service settings
    pub embedding: EmbedConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("documents"),
            store_dir: PathBuf::from("vector_store"),
            change_ratio_threshold: 0.5,
            max_memory_mb: 500,
            cache_size: 100,
            cache_ttl_ms: 60_000,
            prewarm_count: 5,
            ef_search: 150,
            max_tokens: semdex_context::text::DEFAULT_MAX_TOKENS,
            overlap_tokens: semdex_context::text::DEFAULT_OVERLAP_TOKENS,
            watch_debounce_ms: 2_000,
            extensions: vec!["txt".to_string(), "md".to_string()],
            embedding: EmbedConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Create a configuration for the given documents root and store directory.
    ///
    /// All other settings take their defaults.
    pub fn new(root_dir: impl Into<PathBuf>, store_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            store_dir: store_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// [`Self::apply_overrides`] against the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Overlays `SEMDEX_*` values from `lookup`. Unparsable values are
    /// ignored with a warning.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup("SEMDEX_ROOT") {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(store) = lookup("SEMDEX_STORE") {
            self.store_dir = PathBuf::from(store);
        }
        parse_into(&lookup, "SEMDEX_CHANGE_RATIO_THRESHOLD", &mut self.change_ratio_threshold);
        parse_into(&lookup, "SEMDEX_MAX_MEMORY_MB", &mut self.max_memory_mb);
        parse_into(&lookup, "SEMDEX_CACHE_SIZE", &mut self.cache_size);
        parse_into(&lookup, "SEMDEX_CACHE_TTL_MS", &mut self.cache_ttl_ms);
        parse_into(&lookup, "SEMDEX_PREWARM_COUNT", &mut self.prewarm_count);
        parse_into(&lookup, "SEMDEX_EF_SEARCH", &mut self.ef_search);
        parse_into(&lookup, "SEMDEX_MAX_TOKENS", &mut self.max_tokens);
        parse_into(&lookup, "SEMDEX_OVERLAP_TOKENS", &mut self.overlap_tokens);
        parse_into(&lookup, "SEMDEX_WATCH_DEBOUNCE_MS", &mut self.watch_debounce_ms);
        self.embedding = self.embedding.apply_overrides(&lookup);
        self
    }

    /// Set the embedding service configuration (builder style)
    pub fn with_embedding(mut self, embedding: EmbedConfig) -> Self {
        self.embedding = embedding;
        self
    }

    /// Set the change ratio above which a full rebuild replaces an incremental update
    pub fn with_change_ratio_threshold(mut self, threshold: f64) -> Self {
        self.change_ratio_threshold = threshold;
        self
    }

    /// Set the memory ceiling in MiB
    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }

    /// Set search cache capacity and entry lifetime
    pub fn with_cache(mut self, size: usize, ttl: Duration) -> Self {
        self.cache_size = size;
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Set how many of the most-used collections are loaded at startup
    pub fn with_prewarm_count(mut self, count: usize) -> Self {
        self.prewarm_count = count;
        self
    }

    /// Set the HNSW search expansion factor
    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    /// Set chunk budget and overlap in tokens
    pub fn with_chunking(mut self, max_tokens: usize, overlap_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self.overlap_tokens = overlap_tokens;
        self
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.store_dir.join("manifest.json")
    }

    pub fn usage_stats_path(&self) -> PathBuf {
        self.store_dir.join("usage_stats.json")
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(name) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("Ignoring unparsable {}={:?}", name, raw),
        }
    }
}
