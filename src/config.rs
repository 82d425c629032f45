//! Process configuration read from the environment

use crate::cache::CacheConfig;
use crate::data_source::{DataSourceConfig, RetryConfig};
use crate::upstream::DEFAULT_MOVIES_ORIGIN;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub upstream_max_retries: u32,
    pub upstream_bearer_token: Option<String>,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub shutdown_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            upstream_base_url: DEFAULT_MOVIES_ORIGIN.to_string(),
            upstream_timeout: Duration::from_secs(10),
            upstream_max_retries: 2,
            upstream_bearer_token: None,
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1000,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from process environment variables.
    ///
    /// Unset variables keep their defaults; a value that does not parse is an
    /// [`Error::Config`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            listen_addr: parse_or(
                get("GATEWAY_LISTEN_ADDR"),
                "GATEWAY_LISTEN_ADDR",
                defaults.listen_addr,
            )?,
            upstream_base_url: get("UPSTREAM_BASE_URL").unwrap_or(defaults.upstream_base_url),
            upstream_timeout: parse_secs(
                get("UPSTREAM_TIMEOUT_SECS"),
                "UPSTREAM_TIMEOUT_SECS",
                defaults.upstream_timeout,
            )?,
            upstream_max_retries: parse_or(
                get("UPSTREAM_MAX_RETRIES"),
                "UPSTREAM_MAX_RETRIES",
                defaults.upstream_max_retries,
            )?,
            upstream_bearer_token: get("UPSTREAM_BEARER_TOKEN"),
            cache_ttl: parse_secs(get("CACHE_TTL_SECS"), "CACHE_TTL_SECS", defaults.cache_ttl)?,
            cache_max_entries: parse_or(
                get("CACHE_MAX_ENTRIES"),
                "CACHE_MAX_ENTRIES",
                defaults.cache_max_entries,
            )?,
            shutdown_timeout: parse_secs(
                get("SHUTDOWN_TIMEOUT_SECS"),
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout,
            )?,
        })
    }

    pub fn data_source(&self) -> DataSourceConfig {
        let retry = RetryConfig {
            max_retries: self.upstream_max_retries,
            ..RetryConfig::default()
        };
        DataSourceConfig::new(self.upstream_base_url.clone())
            .timeout(self.upstream_timeout)
            .retry(retry)
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.cache_max_entries,
            default_ttl: self.cache_ttl,
        }
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_secs(value: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    parse_or(value, key, default.as_secs()).map(Duration::from_secs)
}
