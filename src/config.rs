//! Layered TOML configuration (§4.11)
//!
//! Loaded in increasing precedence:
//! 1. `~/.config/pommel/config.toml` (user defaults)
//! 2. `.pommel.toml` in the project root (project overrides)
//!
//! CLI flags override both and are applied by callers on top of `Config::load`'s
//! result, outside this module.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// `embedding.*` (§4.1, §4.11).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// One of `local`, `local-remote`, `hosted-a`, `hosted-b`.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub cache_capacity: Option<usize>,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
}

impl EmbeddingConfig {
    pub const DEFAULT_PROVIDER: &'static str = "local";
    pub const DEFAULT_MODEL: &'static str = "v2";
    pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
    pub const DEFAULT_BATCH_SIZE: usize = 32;
    pub const DEFAULT_CONCURRENCY: usize = 4;

    fn override_with(self, other: Self) -> Self {
        Self {
            provider: other.provider.or(self.provider),
            model: other.model.or(self.model),
            url: other.url.or(self.url),
            api_key: other.api_key.or(self.api_key),
            cache_capacity: other.cache_capacity.or(self.cache_capacity),
            batch_size: other.batch_size.or(self.batch_size),
            concurrency: other.concurrency.or(self.concurrency),
        }
    }

    pub fn provider_or_default(&self) -> &str {
        self.provider.as_deref().unwrap_or(Self::DEFAULT_PROVIDER)
    }

    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(Self::DEFAULT_MODEL)
    }

    pub fn cache_capacity_or_default(&self) -> usize {
        self.cache_capacity.unwrap_or(Self::DEFAULT_CACHE_CAPACITY)
    }

    pub fn batch_size_or_default(&self) -> usize {
        self.batch_size.unwrap_or(Self::DEFAULT_BATCH_SIZE)
    }

    pub fn concurrency_or_default(&self) -> usize {
        self.concurrency.unwrap_or(Self::DEFAULT_CONCURRENCY)
    }
}

/// `retry.*` (§4.2, §4.11). Kept as raw milliseconds here (TOML-friendly); converted
/// to `crate::retry::RetryConfig`'s `Duration` fields by `Config::retry_config()`.
///
/// `max_retries` is `Option<u32>` rather than defaulting eagerly so that an explicit
/// `max_retries = 0` in a config file (meaning "never retry") survives layering and
/// isn't silently treated the same as "unset" by an earlier `.unwrap_or(3)`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfigToml {
    pub max_retries: Option<u32>,
    pub base_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

impl RetryConfigToml {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1000;
    pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

    fn override_with(self, other: Self) -> Self {
        Self {
            max_retries: other.max_retries.or(self.max_retries),
            base_backoff_ms: other.base_backoff_ms.or(self.base_backoff_ms),
            max_backoff_ms: other.max_backoff_ms.or(self.max_backoff_ms),
        }
    }

    pub fn to_retry_config(&self) -> crate::retry::RetryConfig {
        crate::retry::RetryConfig {
            max_retries: self.max_retries.unwrap_or(Self::DEFAULT_MAX_RETRIES),
            base_delay: Duration::from_millis(self.base_backoff_ms.unwrap_or(Self::DEFAULT_BASE_BACKOFF_MS)),
            max_delay: Duration::from_millis(self.max_backoff_ms.unwrap_or(Self::DEFAULT_MAX_BACKOFF_MS)),
        }
    }
}

/// `search.*` (§4.6, §4.11).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: Option<usize>,
    /// Subset of `file`, `class`, `method`.
    pub default_levels: Option<Vec<String>>,
}

impl SearchConfig {
    pub const DEFAULT_LIMIT: usize = 10;

    fn override_with(self, other: Self) -> Self {
        Self {
            default_limit: other.default_limit.or(self.default_limit),
            default_levels: other.default_levels.or(self.default_levels),
        }
    }

    pub fn default_limit_or_default(&self) -> usize {
        self.default_limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

/// `hybrid.*` (§4.6, §4.11).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub enabled: Option<bool>,
    pub rrf_k: Option<u32>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self { enabled: None, rrf_k: None }
    }
}

impl HybridConfig {
    pub const DEFAULT_RRF_K: u32 = 60;

    fn override_with(self, other: Self) -> Self {
        Self {
            enabled: other.enabled.or(self.enabled),
            rrf_k: other.rrf_k.or(self.rrf_k),
        }
    }

    pub fn enabled_or_default(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn rrf_k_or_default(&self) -> u32 {
        self.rrf_k.unwrap_or(Self::DEFAULT_RRF_K)
    }
}

/// `reranker.*` (§4.6, §4.11).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: Option<bool>,
    pub candidates: Option<usize>,
}

impl RerankerConfig {
    pub const DEFAULT_CANDIDATES: usize = 50;

    fn override_with(self, other: Self) -> Self {
        Self {
            enabled: other.enabled.or(self.enabled),
            candidates: other.candidates.or(self.candidates),
        }
    }

    pub fn enabled_or_default(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn candidates_or_default(&self) -> usize {
        self.candidates.unwrap_or(Self::DEFAULT_CANDIDATES)
    }
}

/// `indexing.*` (§4.5, §4.11).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Subset of `file`, `class`, `method`.
    pub chunk_levels: Option<Vec<String>>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
}

impl IndexingConfig {
    fn override_with(self, other: Self) -> Self {
        Self {
            chunk_levels: other.chunk_levels.or(self.chunk_levels),
            include_patterns: other.include_patterns.or(self.include_patterns),
            exclude_patterns: other.exclude_patterns.or(self.exclude_patterns),
        }
    }
}

/// `watcher.*` (§4.10, §4.11).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_ms: Option<u64>,
    pub max_file_size: Option<u64>,
}

impl WatcherConfig {
    pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

    fn override_with(self, other: Self) -> Self {
        Self {
            debounce_ms: other.debounce_ms.or(self.debounce_ms),
            max_file_size: other.max_file_size.or(self.max_file_size),
        }
    }

    pub fn debounce_or_default(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.unwrap_or(Self::DEFAULT_DEBOUNCE_MS))
    }
}

/// `store.*` (§4.11): path plus teacher-style HNSW build tunables.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfigToml {
    pub path: Option<PathBuf>,
    pub hnsw_m: Option<usize>,
    pub hnsw_ef_construction: Option<usize>,
}

impl StoreConfigToml {
    pub const DEFAULT_HNSW_M: usize = 16;
    pub const DEFAULT_HNSW_EF_CONSTRUCTION: usize = 200;

    fn override_with(self, other: Self) -> Self {
        Self {
            path: other.path.or(self.path),
            hnsw_m: other.hnsw_m.or(self.hnsw_m),
            hnsw_ef_construction: other.hnsw_ef_construction.or(self.hnsw_ef_construction),
        }
    }

    pub fn path_or_default(&self, project_root: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| project_root.join(crate::INDEX_DIR).join("index.db"))
    }

    pub fn hnsw_m_or_default(&self) -> usize {
        self.hnsw_m.unwrap_or(Self::DEFAULT_HNSW_M)
    }

    pub fn hnsw_ef_construction_or_default(&self) -> usize {
        self.hnsw_ef_construction.unwrap_or(Self::DEFAULT_HNSW_EF_CONSTRUCTION)
    }
}

/// `log.*` (§4.11).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
}

impl LogConfig {
    pub const DEFAULT_LEVEL: &'static str = "info";
    pub const DEFAULT_FORMAT: &'static str = "pretty";

    fn override_with(self, other: Self) -> Self {
        Self {
            level: other.level.or(self.level),
            format: other.format.or(self.format),
        }
    }

    pub fn level_or_default(&self) -> &str {
        self.level.as_deref().unwrap_or(Self::DEFAULT_LEVEL)
    }

    pub fn format_or_default(&self) -> &str {
        self.format.as_deref().unwrap_or(Self::DEFAULT_FORMAT)
    }
}

/// `mcp.*` (§4.11). `enabled` stays `Option<bool>` rather than defaulting eagerly so
/// an absent `[mcp]` section in one layer doesn't silently clobber an explicit
/// `enabled = false` set in another layer (same hazard as `retry.max_retries = 0`).
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: Option<bool>,
}

impl McpConfig {
    fn override_with(self, other: Self) -> Self {
        Self { enabled: other.enabled.or(self.enabled) }
    }

    pub fn enabled_or_default(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Configuration options loaded from layered TOML files (§4.11).
///
/// # Example
///
/// ```toml
/// # ~/.config/pommel/config.toml or .pommel.toml
/// [embedding]
/// provider = "local-remote"
/// model = "v2"
/// url = "http://127.0.0.1:8088"
///
/// [search]
/// default_limit = 10
///
/// [hybrid]
/// enabled = true
/// rrf_k = 60
/// ```
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub retry: RetryConfigToml,
    pub search: SearchConfig,
    pub hybrid: HybridConfig,
    pub reranker: RerankerConfig,
    pub indexing: IndexingConfig,
    pub watcher: WatcherConfig,
    pub store: StoreConfigToml,
    pub log: LogConfig,
    pub mcp: McpConfig,
}

impl Config {
    /// Load configuration from the user config dir and the project root, project
    /// overriding user. CLI flags are layered on top by callers, outside this type.
    pub fn load(project_root: &Path) -> Self {
        let user_config = dirs::config_dir()
            .map(|d| d.join("pommel/config.toml"))
            .and_then(|p| Self::load_file(&p))
            .unwrap_or_default();

        let project_config = Self::load_file(&project_root.join(".pommel.toml")).unwrap_or_default();

        let merged = user_config.override_with(project_config);
        tracing::debug!(
            provider = merged.embedding.provider_or_default(),
            model = merged.embedding.model_or_default(),
            hybrid_enabled = merged.hybrid.enabled_or_default(),
            reranker_enabled = merged.reranker.enabled_or_default(),
            "effective config after merge"
        );
        merged
    }

    fn load_file(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("failed to read config {}: {}", path.display(), e);
                return None;
            }
        };

        match toml::from_str::<Self>(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded config");
                Some(config)
            }
            Err(e) => {
                tracing::warn!("failed to parse config {}: {}", path.display(), e);
                None
            }
        }
    }

    fn override_with(self, other: Self) -> Self {
        Config {
            embedding: self.embedding.override_with(other.embedding),
            retry: self.retry.override_with(other.retry),
            search: self.search.override_with(other.search),
            hybrid: self.hybrid.override_with(other.hybrid),
            reranker: self.reranker.override_with(other.reranker),
            indexing: self.indexing.override_with(other.indexing),
            watcher: self.watcher.override_with(other.watcher),
            store: self.store.override_with(other.store),
            log: self.log.override_with(other.log),
            mcp: self.mcp.override_with(other.mcp),
        }
    }

    /// Builds the active embedding provider stack (provider → cache → retry) from
    /// this config, per §2's "Cache/Retry Coordinator wrap a provider transparently".
    pub fn build_provider_stack(&self) -> anyhow::Result<std::sync::Arc<dyn crate::embedder::Provider>> {
        let inner = crate::embedder::build_provider(
            self.embedding.provider_or_default(),
            self.embedding.model_or_default(),
            self.embedding.url.as_deref(),
            self.embedding.api_key.clone(),
        )?;
        let cached = crate::cache::CachingProvider::new(inner, self.embedding.cache_capacity_or_default());
        let retried = crate::retry::RetryingProvider::new(Box::new(cached), self.retry.to_retry_config());
        Ok(std::sync::Arc::new(retried))
    }

    pub fn chunk_levels(&self) -> Vec<crate::parser::ChunkLevel> {
        use std::str::FromStr;
        self.indexing
            .chunk_levels
            .as_ref()
            .map(|levels| levels.iter().filter_map(|l| crate::parser::ChunkLevel::from_str(l).ok()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_valid_config() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(".pommel.toml");
        std::fs::write(&config_path, "[embedding]\nmodel = \"v4\"\n\n[search]\ndefault_limit = 20\n").unwrap();

        let config = Config::load_file(&config_path).unwrap();
        assert_eq!(config.embedding.model.as_deref(), Some("v4"));
        assert_eq!(config.search.default_limit, Some(20));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_file(&dir.path().join("nonexistent.toml"));
        assert!(config.is_none());
    }

    #[test]
    fn test_load_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(".pommel.toml");
        std::fs::write(&config_path, "not valid [[[").unwrap();

        let config = Config::load_file(&config_path);
        assert!(config.is_none());
    }

    #[test]
    fn test_merge_override_field_by_field() {
        let base = Config {
            embedding: EmbeddingConfig { model: Some("v2".to_string()), ..Default::default() },
            search: SearchConfig { default_limit: Some(10), ..Default::default() },
            ..Default::default()
        };
        let override_cfg = Config {
            embedding: EmbeddingConfig { provider: Some("hosted-a".to_string()), ..Default::default() },
            ..Default::default()
        };

        let merged = base.override_with(override_cfg);
        assert_eq!(merged.embedding.model.as_deref(), Some("v2"), "unset in override keeps base");
        assert_eq!(merged.embedding.provider.as_deref(), Some("hosted-a"), "override wins when set");
        assert_eq!(merged.search.default_limit, Some(10));
    }

    #[test]
    fn test_retry_max_retries_zero_survives_merge_distinct_from_unset() {
        let base = Config::default();
        let override_cfg = Config {
            retry: RetryConfigToml { max_retries: Some(0), ..Default::default() },
            ..Default::default()
        };

        let merged = base.override_with(override_cfg);
        assert_eq!(merged.retry.max_retries, Some(0));
        assert_eq!(merged.retry.to_retry_config().max_retries, 0);
    }

    #[test]
    fn test_retry_config_defaults_when_unset() {
        let config = Config::default();
        let retry = config.retry.to_retry_config();
        assert_eq!(retry.max_retries, RetryConfigToml::DEFAULT_MAX_RETRIES);
        assert_eq!(retry.base_delay, Duration::from_millis(RetryConfigToml::DEFAULT_BASE_BACKOFF_MS));
    }

    #[test]
    fn test_store_path_or_default_joins_index_dir() {
        let config = StoreConfigToml::default();
        let root = Path::new("/project");
        assert_eq!(config.path_or_default(root), root.join(".pommel").join("index.db"));
    }

    #[test]
    fn test_chunk_levels_parses_known_names_and_skips_unknown() {
        let config = Config {
            indexing: IndexingConfig {
                chunk_levels: Some(vec!["file".to_string(), "bogus".to_string(), "method".to_string()]),
                ..Default::default()
            },
            ..Default::default()
        };
        let levels = config.chunk_levels();
        assert_eq!(levels, vec![crate::parser::ChunkLevel::File, crate::parser::ChunkLevel::Method]);
    }

    #[test]
    fn test_parse_full_config_all_sections() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(".pommel.toml");
        std::fs::write(
            &config_path,
            r#"
[embedding]
provider = "hosted-a"
model = "text-embedding-3-small"
api_key = "sk-test"
cache_capacity = 500

[retry]
max_retries = 5
base_backoff_ms = 500

[search]
default_limit = 15
default_levels = ["method"]

[hybrid]
enabled = false
rrf_k = 30

[reranker]
enabled = true
candidates = 75

[indexing]
include_patterns = ["**/*.rs"]
exclude_patterns = ["**/target/**"]

[watcher]
debounce_ms = 500

[store]
path = "custom/index.db"

[log]
level = "debug"
format = "json"

[mcp]
enabled = false
"#,
        )
        .unwrap();

        let config = Config::load_file(&config_path).unwrap();
        assert_eq!(config.embedding.provider.as_deref(), Some("hosted-a"));
        assert_eq!(config.retry.max_retries, Some(5));
        assert_eq!(config.search.default_limit, Some(15));
        assert_eq!(config.hybrid.enabled, Some(false));
        assert_eq!(config.reranker.candidates, Some(75));
        assert_eq!(config.indexing.exclude_patterns, Some(vec!["**/target/**".to_string()]));
        assert_eq!(config.watcher.debounce_ms, Some(500));
        assert_eq!(config.store.path, Some(PathBuf::from("custom/index.db")));
        assert_eq!(config.log.format.as_deref(), Some("json"));
        assert_eq!(config.mcp.enabled, Some(false));
    }
}
