//! Configuration management.

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration for the research MCP server core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config. Paths support
    /// `~` expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Persistent cache configuration.
    pub cache: CacheConfig,
    /// Persistent event store configuration.
    pub event_store: EventStoreConfig,
    /// Scraping pipeline configuration.
    pub scraping: ScrapingConfig,
    /// Circuit breaker configuration shared by guarded external calls.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Tool orchestrator configuration.
    pub orchestrator: OrchestratorConfig,
}

/// Persistence strategy selector (see `cache::strategy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceStrategyKind {
    /// Never persist on set/get; flush the dirty set every interval.
    Periodic,
    /// Persist on every set; ignore get; no periodic flush.
    WriteThrough,
    /// Never persist during runtime; flush everything on `dispose`.
    OnShutdown,
    /// Write-through for `critical_namespaces`; periodic for the rest.
    Hybrid,
}

impl Default for PersistenceStrategyKind {
    fn default() -> Self {
        Self::Periodic
    }
}

/// Persistent cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the persistent cache (disabled short-circuits to always-miss).
    pub enabled: bool,
    /// Root directory for on-disk cache entries.
    pub root: PathBuf,
    /// Default time-to-live for entries that don't override it.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Default stale-while-revalidate grace period past `default_ttl`.
    #[serde(with = "humantime_serde")]
    pub default_stale_time: Duration,
    /// Whether stale-while-revalidate is enabled by default.
    pub stale_while_revalidate: bool,
    /// Maximum number of in-memory entries before LRU eviction.
    pub max_size: usize,
    /// Load every on-disk entry into memory at startup (dropping expired
    /// ones); when false, disk is consulted lazily on miss.
    pub eager_load: bool,
    /// Which persistence strategy governs flush timing.
    pub persistence_strategy: PersistenceStrategyKind,
    /// Interval between periodic dirty-set flushes (periodic/hybrid).
    #[serde(with = "humantime_serde")]
    pub persistence_interval: Duration,
    /// Namespaces treated as write-through under the hybrid strategy.
    #[serde(default)]
    pub critical_namespaces: Vec<String>,
    /// Interval of the expired-entry sweep.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Disable all background tasks (sweep, periodic flush). Intended for
    /// test fixtures so no timer outlives the test.
    pub disable_background_tasks: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("./data/cache"),
            default_ttl: Duration::from_secs(3600),
            default_stale_time: Duration::from_secs(86_400),
            stale_while_revalidate: true,
            max_size: 10_000,
            eager_load: false,
            persistence_strategy: PersistenceStrategyKind::Periodic,
            persistence_interval: Duration::from_secs(60),
            critical_namespaces: Vec::new(),
            sweep_interval: Duration::from_secs(60),
            disable_background_tasks: false,
        }
    }
}

/// Persistent event store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// Enable the event store.
    pub enabled: bool,
    /// Root directory for on-disk event records.
    pub root: PathBuf,
    /// Maximum events retained per stream before oldest-first eviction.
    pub max_events_per_stream: usize,
    /// Maximum events retained across all streams.
    pub max_total_events: usize,
    /// Time-to-live for an event record before the periodic sweep removes it.
    #[serde(with = "humantime_serde")]
    pub event_ttl: Duration,
    /// Hex-encoded 32-byte (64 hex char) AES-256-GCM key. When set,
    /// enables at-rest encryption of stored message bodies.
    #[serde(default)]
    pub encryption_key: Option<String>,
    /// Stream ids persisted immediately on every `store_event`, bypassing
    /// the periodic flush.
    #[serde(default)]
    pub critical_streams: Vec<String>,
    /// Require an authorizer decision before replaying a stream.
    pub access_control_enabled: bool,
    /// Emit structured audit records for store/replay/erasure operations.
    pub audit_log_enabled: bool,
    /// Disable all background tasks (TTL sweep). Intended for test fixtures.
    pub disable_background_tasks: bool,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: PathBuf::from("./data/events"),
            max_events_per_stream: 1000,
            max_total_events: 100_000,
            event_ttl: Duration::from_secs(7 * 86_400),
            encryption_key: None,
            critical_streams: Vec::new(),
            access_control_enabled: false,
            audit_log_enabled: true,
            disable_background_tasks: false,
        }
    }
}

impl EventStoreConfig {
    /// Decode [`Self::encryption_key`] into raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEncryptionKeyLength`] if the decoded key is
    /// not exactly 32 bytes, or [`Error::Config`] if the hex is malformed.
    pub fn decode_encryption_key(&self) -> Result<Option<[u8; 32]>> {
        let Some(hex_key) = &self.encryption_key else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_key).map_err(|e| Error::Config(format!("invalid encryption key hex: {e}")))?;
        let len = bytes.len();
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidEncryptionKeyLength(len))?;
        Ok(Some(array))
    }
}

/// Scraping pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Skip the reserved-IP-range SSRF check. Never skips the static
    /// blocked-hostname check.
    pub allow_private_ips: bool,
    /// If non-empty, restrict scraping to these domains (exact match or
    /// subdomain of).
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Static-tier HTTP GET timeout.
    #[serde(with = "humantime_serde")]
    pub static_fetch_timeout: Duration,
    /// JS-rendered fallback tier timeout ceiling.
    #[serde(with = "humantime_serde")]
    pub navigation_timeout: Duration,
    /// Minimum extracted character count below which the JS-rendered
    /// fallback tier is invoked.
    pub insufficient_content_threshold: usize,
    /// Byte ceiling at which extracted content is truncated.
    pub truncate_bytes: usize,
    /// Maximum redirect hops followed, each re-validated by the SSRF check.
    pub max_redirects: u8,
    /// Maximum YouTube transcript fetch attempts.
    pub youtube_max_attempts: u32,
    /// Base delay for the YouTube retry backoff formula.
    #[serde(with = "humantime_serde")]
    pub youtube_base_delay: Duration,
    /// Cap on the YouTube retry backoff delay.
    #[serde(with = "humantime_serde")]
    pub youtube_max_delay: Duration,
    /// Exponential base for the YouTube retry backoff formula.
    pub youtube_exponential_base: f64,
    /// Uniform jitter factor applied to the YouTube retry backoff delay.
    pub youtube_jitter_factor: f64,
    /// Per-attempt timeout for YouTube transcript fetches.
    #[serde(with = "humantime_serde")]
    pub youtube_timeout: Duration,
    /// Timeout for search API calls.
    #[serde(with = "humantime_serde")]
    pub search_timeout: Duration,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            allow_private_ips: false,
            allowed_domains: Vec::new(),
            static_fetch_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(60),
            insufficient_content_threshold: 200,
            truncate_bytes: 1_000_000,
            max_redirects: 5,
            youtube_max_attempts: 3,
            youtube_base_delay: Duration::from_millis(500),
            youtube_max_delay: Duration::from_secs(10),
            youtube_exponential_base: 2.0,
            youtube_jitter_factor: 0.25,
            youtube_timeout: Duration::from_secs(15),
            search_timeout: Duration::from_secs(15),
        }
    }
}

/// Circuit breaker configuration shared by every guarded external call
/// (search API, scrape fetch, transcript fetcher each hold their own
/// breaker instance constructed from this config).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the circuit breaker (disabled always allows calls through).
    pub enabled: bool,
    /// Consecutive failures in `CLOSED` before tripping to `OPEN`.
    pub failure_threshold: u32,
    /// Successful `HALF_OPEN` probes required to close the circuit.
    pub half_open_max_attempts: u32,
    /// Time after the last failure before a `HALF_OPEN` probe is allowed.
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            half_open_max_attempts: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Tool orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Google Custom Search API key. Supports a literal value or
    /// `env:VAR_NAME` to resolve from the process environment.
    #[serde(default)]
    pub google_search_api_key: Option<String>,
    /// Google Custom Search engine id (`cx` parameter).
    #[serde(default)]
    pub google_search_cx: Option<String>,
    /// TTL for cached `googleSearch` namespace entries.
    #[serde(with = "humantime_serde")]
    pub search_cache_ttl: Duration,
    /// Stale-while-revalidate window for `googleSearch` entries.
    #[serde(with = "humantime_serde")]
    pub search_cache_stale_time: Duration,
    /// TTL for cached `scrapePage` namespace entries.
    #[serde(with = "humantime_serde")]
    pub scrape_cache_ttl: Duration,
    /// Stale-while-revalidate window for `scrapePage` entries.
    #[serde(with = "humantime_serde")]
    pub scrape_cache_stale_time: Duration,
    /// Minimum paragraph length retained by deduplication.
    pub dedup_min_paragraph_length: usize,
    /// Similarity threshold above which two paragraphs are near-duplicates.
    pub dedup_similarity_threshold: f64,
    /// Reservoir size bounding per-tool latency sample memory.
    pub metrics_reservoir_size: usize,
    /// Maximum concurrent scrape fan-out for `search_and_scrape`.
    pub max_concurrent_scrapes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            google_search_api_key: None,
            google_search_cx: None,
            search_cache_ttl: Duration::from_secs(30 * 60),
            search_cache_stale_time: Duration::from_secs(30 * 60),
            scrape_cache_ttl: Duration::from_secs(3600),
            scrape_cache_stale_time: Duration::from_secs(24 * 3600),
            dedup_min_paragraph_length: 50,
            dedup_similarity_threshold: 0.8,
            metrics_reservoir_size: 1000,
            max_concurrent_scrapes: 10,
        }
    }
}

impl OrchestratorConfig {
    /// Resolve the configured Google Search API key (expand `env:VAR`).
    #[must_use]
    pub fn resolve_google_search_api_key(&self) -> Option<String> {
        self.google_search_api_key.as_ref().map(|key| {
            key.strip_prefix("env:")
                .map_or_else(|| key.clone(), |var| env::var(var).unwrap_or_else(|_| key.clone()))
        })
    }
}

impl Config {
    /// Load configuration from an optional file layered under environment
    /// variables prefixed `RESEARCH_MCP_` (double underscore = nesting).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be
    /// parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!("config file not found: {}", p.display())));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("RESEARCH_MCP_").split("__"));

        let mut config: Self = figment.extract().map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load `.env`-style files into the process environment. Supports `~`
    /// expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                dirs::home_dir().map_or_else(
                    || path_str.clone(),
                    |home| path_str.replacen('~', &home.display().to_string(), 1),
                )
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Custom humantime serde module for `Duration`, reused across every
/// config struct above so timings read as `"30s"` / `"5m"` / `"100ms"` in
/// YAML rather than raw nanosecond counts.
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize `Duration` to a human-readable string (e.g. `"30s"`).
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize a human-readable duration string (`"30s"`, `"5m"`, `"100ms"`).
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a
    /// duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis).map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs).map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>().map(Duration::from_secs).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "RESEARCH_MCP_TEST_KEY_A=hello_from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(env::var("RESEARCH_MCP_TEST_KEY_A").unwrap(), "hello_from_env_file");
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let reloaded: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reloaded.cache.max_size, config.cache.max_size);
        assert_eq!(reloaded.event_store.max_total_events, config.event_store.max_total_events);
    }

    #[test]
    fn decode_encryption_key_rejects_wrong_length() {
        let cfg = EventStoreConfig {
            encryption_key: Some("abcd".to_string()),
            ..Default::default()
        };
        assert!(cfg.decode_encryption_key().is_err());
    }

    #[test]
    fn decode_encryption_key_accepts_32_bytes() {
        let key_hex = "00".repeat(32);
        let cfg = EventStoreConfig {
            encryption_key: Some(key_hex),
            ..Default::default()
        };
        let decoded = cfg.decode_encryption_key().unwrap();
        assert_eq!(decoded.unwrap().len(), 32);
    }

    #[test]
    fn resolve_google_search_api_key_falls_back_when_env_var_absent() {
        let cfg = OrchestratorConfig {
            google_search_api_key: Some("env:RESEARCH_MCP_TEST_GSEARCH_KEY_ABSENT".to_string()),
            ..Default::default()
        };
        // Falls back to the literal `env:...` string when the variable isn't set,
        // matching AuthConfig::resolve_bearer_token's behavior for the same case.
        assert_eq!(
            cfg.resolve_google_search_api_key().as_deref(),
            Some("env:RESEARCH_MCP_TEST_GSEARCH_KEY_ABSENT")
        );
    }

    #[test]
    fn resolve_google_search_api_key_passes_through_literal() {
        let cfg = OrchestratorConfig {
            google_search_api_key: Some("literal-key".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_google_search_api_key().as_deref(), Some("literal-key"));
    }
}
