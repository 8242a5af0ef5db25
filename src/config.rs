//! Ambient configuration layer: the environment-variable surface consumed
//! by `lifecycle::start` when it isn't given explicit arguments.

use std::env;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::role::{ClusterName, NodeName};

/// Helper to get a required environment variable.
fn env_required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.into()))
}

/// Helper to parse an environment variable with a default value.
fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parses a duration string like `"30s"`, `"2s"`, `"1s"`. This agent's
/// intervals are always sub-minute, so only the seconds unit is
/// supported.
fn env_duration_or(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(val) => parse_seconds(&val).map_err(|message| ConfigError::InvalidDuration {
            var: name.into(),
            message,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let digits = s.strip_suffix('s').unwrap_or(s);
    digits
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("expected a duration like '30s', got '{s}'"))
}

/// The hostname with trailing digits stripped — the default cluster name,
/// e.g. `db-node-03` -> `db-node-`.
fn default_cluster_name() -> String {
    let hostname = hostname_or_unknown();
    hostname.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

fn hostname_or_unknown() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "unknown-node".to_string())
}

/// Configuration for a `lifecycle::start` invocation, covering every
/// setting in the core's external interface.
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_name: ClusterName,
    pub node_name: NodeName,
    pub application_port: u16,
    pub api_port: u16,
    pub consul_addr: String,
    pub consul_token: Option<String>,
    pub log_level: String,
    pub check_interval: Duration,
    pub lock_delay: Duration,
    pub disable_flag_path: String,
}

impl Config {
    /// Loads configuration from environment variables, applying defaults:
    /// `api_port=8000`, `check_interval=30s` (the Consul health-check
    /// interval; the controller's own tick cadence is fixed at 2s and is
    /// not configurable here), `cluster_name=`hostname with trailing
    /// digits stripped.
    pub fn from_env(application_port: u16) -> Result<Self, ConfigError> {
        let cluster_name = env::var("FAILOVER_CLUSTER_NAME").unwrap_or_else(|_| default_cluster_name());
        let node_name = env::var("FAILOVER_NODE_NAME").unwrap_or_else(|_| hostname_or_unknown());

        let api_port: u16 = env_parse_or("FAILOVER_API_PORT", 8000u16)?;
        let consul_addr = env::var("CONSUL_HTTP_ADDR")
            .unwrap_or_else(|_| "http://127.0.0.1:8500".to_string());
        let consul_token = env::var("CONSUL_HTTP_TOKEN").ok();
        let log_level = env::var("FAILOVER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let check_interval = env_duration_or("FAILOVER_CHECK_INTERVAL", Duration::from_secs(30))?;
        let lock_delay = env_duration_or("FAILOVER_LOCK_DELAY", Duration::from_secs(1))?;

        let disable_flag_path = env::var("FAILOVER_DISABLE_FLAG_PATH")
            .unwrap_or_else(|_| "/var/tmp/consul_failover_disable".to_string());

        Ok(Config {
            cluster_name: ClusterName::new(cluster_name),
            node_name: NodeName::new(node_name),
            application_port,
            api_port,
            consul_addr,
            consul_token,
            log_level,
            check_interval,
            lock_delay,
            disable_flag_path,
        })
    }

    /// A config suitable for tests — no environment dependency.
    #[cfg(test)]
    pub fn for_testing(cluster_name: &str, node_name: &str, application_port: u16) -> Self {
        Config {
            cluster_name: ClusterName::new(cluster_name),
            node_name: NodeName::new(node_name),
            application_port,
            api_port: 8000,
            consul_addr: "http://127.0.0.1:8500".to_string(),
            consul_token: None,
            log_level: "info".to_string(),
            check_interval: Duration::from_secs(30),
            lock_delay: Duration::from_secs(1),
            disable_flag_path: "/var/tmp/consul_failover_disable".to_string(),
        }
    }

    /// Exposes the same "required env var" helper used by `from_env` so
    /// the example handler binaries (e.g. a replication password) don't
    /// duplicate it.
    pub fn env_required(name: &str) -> Result<String, ConfigError> {
        env_required(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cluster_name_strips_trailing_digits() {
        assert_eq!(
            "db-node-".to_string(),
            "db-node-03".trim_end_matches(|c: char| c.is_ascii_digit())
        );
    }

    #[test]
    fn parse_seconds_accepts_suffix_and_bare_number() {
        assert_eq!(parse_seconds("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_seconds("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_seconds_rejects_garbage() {
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn for_testing_config_has_sane_defaults() {
        let cfg = Config::for_testing("mysql-prod", "db-1", 3306);
        assert_eq!(cfg.cluster_name.as_str(), "mysql-prod");
        assert_eq!(cfg.check_interval, Duration::from_secs(30));
        assert_eq!(cfg.lock_delay, Duration::from_secs(1));
    }

    // env::set_var/remove_var mutate process-global state, so these tests
    // must not interleave with each other or with any other test reading
    // the same variables.
    #[test]
    #[serial_test::serial(failover_env)]
    fn from_env_picks_up_overrides() {
        env::set_var("FAILOVER_CLUSTER_NAME", "search-prod");
        env::set_var("FAILOVER_NODE_NAME", "search-3");
        env::set_var("FAILOVER_API_PORT", "9100");
        env::set_var("FAILOVER_CHECK_INTERVAL", "15s");

        let cfg = Config::from_env(7000).unwrap();

        assert_eq!(cfg.cluster_name.as_str(), "search-prod");
        assert_eq!(cfg.node_name.as_str(), "search-3");
        assert_eq!(cfg.api_port, 9100);
        assert_eq!(cfg.check_interval, Duration::from_secs(15));
        assert_eq!(cfg.application_port, 7000);

        env::remove_var("FAILOVER_CLUSTER_NAME");
        env::remove_var("FAILOVER_NODE_NAME");
        env::remove_var("FAILOVER_API_PORT");
        env::remove_var("FAILOVER_CHECK_INTERVAL");
    }

    #[test]
    #[serial_test::serial(failover_env)]
    fn from_env_falls_back_to_defaults_when_unset() {
        env::remove_var("FAILOVER_API_PORT");
        env::remove_var("FAILOVER_CHECK_INTERVAL");
        env::remove_var("FAILOVER_LOCK_DELAY");

        let cfg = Config::from_env(3306).unwrap();

        assert_eq!(cfg.api_port, 8000);
        assert_eq!(cfg.check_interval, Duration::from_secs(30));
        assert_eq!(cfg.lock_delay, Duration::from_secs(1));
    }

    #[test]
    #[serial_test::serial(failover_env)]
    fn from_env_rejects_invalid_duration() {
        env::set_var("FAILOVER_CHECK_INTERVAL", "soon");
        let err = Config::from_env(3306).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));
        env::remove_var("FAILOVER_CHECK_INTERVAL");
    }
}
