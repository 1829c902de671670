//! Service configuration, read from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{CacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
use crate::event_bus::DEFAULT_EVENT_CHANNEL;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Runtime configuration of the API process.
///
/// | Variable | Default |
/// |---|---|
/// | `BIND_ADDR` | `0.0.0.0:8080` |
/// | `DATABASE_URL` | unset (in-memory store) |
/// | `DB_MAX_CONNECTIONS` | `10` |
/// | `REDIS_URL` | unset (in-memory bus) |
/// | `EVENT_CHANNEL` | `review_events` |
/// | `CACHE_TTL_SECS` | `60` |
/// | `CACHE_MAX_ENTRIES` | `1000` |
/// | `REQUEST_TIMEOUT_MS` | `5000` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub redis_url: Option<String>,
    pub event_channel: String,
    pub cache: CacheConfig,
    pub request_timeout: Duration,
}

impl ServiceConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr_raw = lookup("BIND_ADDR").unwrap_or_else(|| {
            tracing::info!("BIND_ADDR not set; using {DEFAULT_BIND_ADDR}");
            DEFAULT_BIND_ADDR.to_string()
        });
        let bind_addr = SocketAddr::from_str(bind_addr_raw.trim())
            .map_err(|_| ConfigError::invalid("BIND_ADDR", &bind_addr_raw))?;

        let database_url = lookup("DATABASE_URL");
        if database_url.is_none() {
            tracing::warn!("DATABASE_URL not set; using the in-memory store (data is not persisted)");
        }

        let redis_url = lookup("REDIS_URL");
        if redis_url.is_none() {
            tracing::warn!("REDIS_URL not set; review notifications stay in-process");
        }

        let event_channel = lookup("EVENT_CHANNEL").unwrap_or_else(|| DEFAULT_EVENT_CHANNEL.to_string());

        let db_max_connections = positive(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?;
        let ttl_secs = positive(&lookup, "CACHE_TTL_SECS", DEFAULT_TTL.as_secs())?;
        let max_entries = positive(&lookup, "CACHE_MAX_ENTRIES", DEFAULT_MAX_ENTRIES)?;
        let timeout_ms = positive(
            &lookup,
            "REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
        )?;

        Ok(Self {
            bind_addr,
            database_url,
            db_max_connections,
            redis_url,
            event_channel,
            cache: CacheConfig {
                ttl: Duration::from_secs(ttl_secs),
                max_entries,
            },
            request_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            redis_url: None,
            event_channel: DEFAULT_EVENT_CHANNEL.to_string(),
            cache: CacheConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Parse a strictly positive number, falling back to `default` when unset.
fn positive<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::invalid(key, &raw)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.event_channel, "review_events");
    }

    #[test]
    fn values_are_read_from_lookup() {
        let config = config_from(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/catalog"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("EVENT_CHANNEL", "reviews"),
            ("CACHE_TTL_SECS", "5"),
            ("CACHE_MAX_ENTRIES", "42"),
            ("REQUEST_TIMEOUT_MS", "250"),
            ("DB_MAX_CONNECTIONS", "3"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/catalog"));
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.event_channel, "reviews");
        assert_eq!(config.cache.ttl, Duration::from_secs(5));
        assert_eq!(config.cache.max_entries, 42);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.db_max_connections, 3);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = config_from(&[("CACHE_TTL_SECS", "soon")]).unwrap_err();
        assert_eq!(err, ConfigError::invalid("CACHE_TTL_SECS", "soon"));
    }

    #[test]
    fn zero_is_rejected() {
        assert!(config_from(&[("CACHE_MAX_ENTRIES", "0")]).is_err());
        assert!(config_from(&[("REQUEST_TIMEOUT_MS", "0")]).is_err());
    }

    #[test]
    fn bad_bind_address_is_rejected() {
        assert!(matches!(
            config_from(&[("BIND_ADDR", "nowhere")]),
            Err(ConfigError::Invalid { key, .. }) if key == "BIND_ADDR"
        ));
    }
}
