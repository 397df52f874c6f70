//! Configuration for the query coordinator
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `QUERYCOORD_*` environment variables. The binary applies CLI flags last.

use crate::common::utils::{format_duration, parse_duration};
use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix (`QUERYCOORD_JOB_WORKERS=4`).
pub const ENV_PREFIX: &str = "QUERYCOORD";

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Node ID of this coordinator
    pub node_id: i64,

    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// Base URL of the catalog service
    pub broker_addr: String,

    /// Parallel job workers (jobs of distinct collections)
    pub job_workers: usize,

    /// Maximum in-flight node probes during a health check
    pub health_check_parallelism: usize,

    /// A node whose last heartbeat is older than this is treated as offline
    #[serde(with = "duration_str")]
    pub heartbeat_available_interval: Duration,

    /// How long a recorded load failure stays visible
    #[serde(with = "duration_str")]
    pub failed_load_cache_ttl: Duration,

    /// Maximum number of collections tracked by the failed load cache
    pub failed_load_cache_capacity: usize,

    /// Poll interval while waiting for released segments to disappear
    #[serde(with = "duration_str")]
    pub release_poll_interval: Duration,

    /// Give up waiting for released segments after this long
    #[serde(with = "duration_str")]
    pub release_timeout: Duration,

    /// Tick interval of the target / collection observers
    #[serde(with = "duration_str")]
    pub observer_interval: Duration,

    /// Logging level
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 19531)),
            broker_addr: "http://127.0.0.1:19530".to_string(),
            job_workers: 8,
            health_check_parallelism: 16,
            heartbeat_available_interval: Duration::from_secs(10),
            failed_load_cache_ttl: Duration::from_secs(300),
            failed_load_cache_capacity: 1024,
            release_poll_interval: Duration::from_millis(100),
            release_timeout: Duration::from_secs(60),
            observer_interval: Duration::from_secs(1),
            log_level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let conf: CoordinatorConfig = builder.build()?.try_deserialize()?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_workers == 0 {
            return Err(crate::Error::InvalidConfig(
                "job_workers must be greater than 0".into(),
            ));
        }
        if self.health_check_parallelism == 0 {
            return Err(crate::Error::InvalidConfig(
                "health_check_parallelism must be greater than 0".into(),
            ));
        }
        if self.failed_load_cache_capacity == 0 {
            return Err(crate::Error::InvalidConfig(
                "failed_load_cache_capacity must be greater than 0".into(),
            ));
        }
        if self.release_poll_interval.is_zero() || self.observer_interval.is_zero() {
            return Err(crate::Error::InvalidConfig(
                "poll intervals must be non-zero".into(),
            ));
        }
        if self.release_timeout < self.release_poll_interval {
            return Err(crate::Error::InvalidConfig(
                "release_timeout must not be shorter than release_poll_interval".into(),
            ));
        }
        Ok(())
    }

    /// Flattened `querycoord.<key> = <value>` pairs.
    pub fn to_key_values(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(self) {
            for (key, value) in map {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                pairs.push((format!("querycoord.{}", key), value));
            }
        }
        pairs.sort();
        pairs
    }
}

/// Durations are written as `"500ms"`, `"10s"`, `"5m"`.
mod duration_str {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let conf = CoordinatorConfig::default();
        assert!(conf.validate().is_ok());
        assert_eq!(conf.job_workers, 8);
        assert_eq!(conf.failed_load_cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "node_id = 7\njob_workers = 2\nheartbeat_available_interval = \"3s\"\nrelease_poll_interval = \"20ms\""
        )
        .unwrap();

        let conf = CoordinatorConfig::load(Some(file.path())).unwrap();
        assert_eq!(conf.node_id, 7);
        assert_eq!(conf.job_workers, 2);
        assert_eq!(conf.heartbeat_available_interval, Duration::from_secs(3));
        assert_eq!(conf.release_poll_interval, Duration::from_millis(20));
        // untouched fields keep their defaults
        assert_eq!(conf.health_check_parallelism, 16);
    }

    #[test]
    fn test_load_rejects_zero_workers() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "job_workers = 0").unwrap();
        assert!(CoordinatorConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_release_timeout_bounds() {
        let conf = CoordinatorConfig {
            release_poll_interval: Duration::from_secs(1),
            release_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(conf.validate().is_err());
    }

    #[test]
    fn test_key_values() {
        let pairs = CoordinatorConfig::default().to_key_values();
        assert!(pairs
            .iter()
            .any(|(k, v)| k == "querycoord.job_workers" && v == "8"));
        assert!(pairs
            .iter()
            .any(|(k, v)| k == "querycoord.observer_interval" && v == "1s"));
    }
}
