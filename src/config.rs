//! Process configuration from environment variables
//!
//! - `UPWATCH_HOST` bind address (default: 0.0.0.0)
//! - `UPWATCH_PORT` port (default: 4001)
//! - `UPWATCH_TICK_SECS` scheduler tick (default: 5)
//! - `UPWATCH_FALLBACK_INTERVAL_SECS` interval for services without one (default: 10)
//! - `UPWATCH_DEFAULT_TIMEOUT_MS` timeout for services without one (default: 10000)
//! - `UPWATCH_HUB_CAPACITY` live feed queue size (default: 64)
//! - `UPWATCH_SUBSCRIBER_BUFFER` per-subscriber buffer (default: 32)
//! - `UPWATCH_SHUTDOWN_GRACE_SECS` wait for in-flight checks on shutdown (default: 30)
//! - `UPWATCH_SERVICES_FILE` JSON file of service definitions
//! - `UPWATCH_CORS_ORIGINS` comma-separated allowed origins, `*` for any
//!   (default: http://localhost:3000,http://127.0.0.1:3000)
//! - `DATABASE_URL` Postgres connection string (`postgres` feature)
//! - `UPWATCH_DB_MAX_CONNECTIONS` pool size (default: 10)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::hub::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SUBSCRIBER_BUFFER};
use crate::monitor::{DEFAULT_PROBE_TIMEOUT, DEFAULT_TICK, FALLBACK_INTERVAL};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub tick: Duration,
    pub fallback_interval: Duration,
    pub default_timeout: Duration,
    pub hub_capacity: usize,
    pub subscriber_buffer: usize,
    pub shutdown_grace: Duration,
    pub services_file: Option<PathBuf>,
    pub cors_origins: Vec<String>,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4001,
            tick: DEFAULT_TICK,
            fallback_interval: FALLBACK_INTERVAL,
            default_timeout: DEFAULT_PROBE_TIMEOUT,
            hub_capacity: DEFAULT_QUEUE_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            shutdown_grace: Duration::from_secs(30),
            services_file: None,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            database_url: None,
            db_max_connections: 10,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset variables keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: get("UPWATCH_HOST").unwrap_or(defaults.host),
            port: parse(&get, "UPWATCH_PORT")?.unwrap_or(defaults.port),
            tick: parse_positive(&get, "UPWATCH_TICK_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick),
            fallback_interval: parse_positive(&get, "UPWATCH_FALLBACK_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.fallback_interval),
            default_timeout: parse_positive(&get, "UPWATCH_DEFAULT_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            hub_capacity: parse_positive(&get, "UPWATCH_HUB_CAPACITY")?
                .map(|v| v as usize)
                .unwrap_or(defaults.hub_capacity),
            subscriber_buffer: parse_positive(&get, "UPWATCH_SUBSCRIBER_BUFFER")?
                .map(|v| v as usize)
                .unwrap_or(defaults.subscriber_buffer),
            shutdown_grace: parse(&get, "UPWATCH_SHUTDOWN_GRACE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            services_file: get("UPWATCH_SERVICES_FILE").map(PathBuf::from),
            cors_origins: get("UPWATCH_CORS_ORIGINS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.cors_origins),
            database_url: get("DATABASE_URL"),
            db_max_connections: parse(&get, "UPWATCH_DB_MAX_CONNECTIONS")?
                .unwrap_or(defaults.db_max_connections),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_positive<G>(get: &G, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match parse::<u64, G>(get, key)? {
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 4001);
        assert_eq!(config.tick, Duration::from_secs(5));
        assert_eq!(config.fallback_interval, Duration::from_secs(10));
        assert_eq!(config.hub_capacity, 64);
        assert!(config.services_file.is_none());
        assert!(config.database_url.is_none());
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:3000", "http://127.0.0.1:3000"]
        );
    }

    #[test]
    fn test_cors_origins_list() {
        let config = config_from(&[(
            "UPWATCH_CORS_ORIGINS",
            "https://status.example.com, ,https://ops.example.com ",
        )])
        .unwrap();
        assert_eq!(
            config.cors_origins,
            vec!["https://status.example.com", "https://ops.example.com"]
        );
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("UPWATCH_PORT", "9000"),
            ("UPWATCH_TICK_SECS", "2"),
            ("UPWATCH_DEFAULT_TIMEOUT_MS", "1500"),
            ("UPWATCH_SERVICES_FILE", "/etc/upwatch/services.json"),
            ("UPWATCH_HOST", "  "),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.tick, Duration::from_secs(2));
        assert_eq!(config.default_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.services_file,
            Some(PathBuf::from("/etc/upwatch/services.json"))
        );
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = config_from(&[("UPWATCH_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("UPWATCH_PORT"));

        assert!(config_from(&[("UPWATCH_TICK_SECS", "0")]).is_err());
        assert!(config_from(&[("UPWATCH_HUB_CAPACITY", "-1")]).is_err());
    }
}
