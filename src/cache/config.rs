//! Configuration for the query layer

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the fetch timeout in milliseconds (0 disables it)
pub const ENV_FETCH_TIMEOUT_MS: &str = "UNREAL_QUERY_FETCH_TIMEOUT_MS";

/// Environment variable toggling stats collection
pub const ENV_ENABLE_METRICS: &str = "UNREAL_QUERY_ENABLE_METRICS";

/// Environment variable toggling debug logs on every store hit
pub const ENV_LOG_CACHE_HITS: &str = "UNREAL_QUERY_LOG_CACHE_HITS";

/// Configuration for the query client
///
/// The deduplicator itself never times out; `fetch_timeout` is applied by
/// [`QueryClient`](crate::cache::QueryClient) around each backend fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound on a single backend fetch. `None` waits indefinitely.
    pub fetch_timeout: Option<Duration>,

    /// Enable stats collection in the store and deduplicator
    pub enable_metrics: bool,

    /// Emit a debug log line for every entity served from the store
    pub log_cache_hits: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: None,
            enable_metrics: true,
            log_cache_hits: false,
        }
    }
}

impl QueryConfig {
    /// Create a new builder for query configuration
    pub fn builder() -> QueryConfigBuilder {
        QueryConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(timeout) = self.fetch_timeout {
            if timeout.is_zero() {
                return Err(QueryError::Config(
                    "fetch_timeout must be greater than 0 (use None to disable)".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Load configuration from the environment, reading a `.env` file first if present
    ///
    /// Unset variables fall back to [`QueryConfig::default`].
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = Self::builder();

        if let Ok(raw) = std::env::var(ENV_FETCH_TIMEOUT_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                QueryError::Config(format!("{} must be an integer, got '{}'", ENV_FETCH_TIMEOUT_MS, raw))
            })?;
            builder = if ms == 0 {
                builder.no_fetch_timeout()
            } else {
                builder.fetch_timeout(Duration::from_millis(ms))
            };
        }

        if let Ok(raw) = std::env::var(ENV_ENABLE_METRICS) {
            builder = builder.enable_metrics(parse_bool(ENV_ENABLE_METRICS, &raw)?);
        }

        if let Ok(raw) = std::env::var(ENV_LOG_CACHE_HITS) {
            builder = builder.log_cache_hits(parse_bool(ENV_LOG_CACHE_HITS, &raw)?);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(QueryError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, raw
        ))),
    }
}

/// Builder for query configuration
#[derive(Debug, Default)]
pub struct QueryConfigBuilder {
    fetch_timeout: Option<Option<Duration>>,
    enable_metrics: Option<bool>,
    log_cache_hits: Option<bool>,
}

impl QueryConfigBuilder {
    /// Bound every backend fetch by `timeout`
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(Some(timeout));
        self
    }

    /// Let backend fetches run indefinitely
    pub fn no_fetch_timeout(mut self) -> Self {
        self.fetch_timeout = Some(None);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Enable or disable hit logging
    pub fn log_cache_hits(mut self, enable: bool) -> Self {
        self.log_cache_hits = Some(enable);
        self
    }

    /// Build the query configuration
    pub fn build(self) -> QueryConfig {
        let defaults = QueryConfig::default();

        QueryConfig {
            fetch_timeout: self.fetch_timeout.unwrap_or(defaults.fetch_timeout),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
            log_cache_hits: self.log_cache_hits.unwrap_or(defaults.log_cache_hits),
        }
    }
}

/// Preset configurations for common use cases
impl QueryConfig {
    /// Interactive screens (feed, comments): fail fast so the UI can retry
    pub fn realtime() -> Self {
        Self {
            fetch_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }
    }

    /// Slow networks or long-running generation jobs: never time out
    pub fn offline_tolerant() -> Self {
        Self {
            fetch_timeout: None,
            ..Default::default()
        }
    }
}
