//! Global pool settings

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::TenantLimits;

/// Global pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Master switch; when false every acquire fails
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cap across all tenants, in-flight connects included
    #[serde(default = "default_max_total_connections")]
    pub max_total_connections: usize,

    /// Per-tenant cap used when the tenant config is unavailable
    #[serde(default = "default_max_connections_per_tenant")]
    pub max_connections_per_tenant: usize,

    /// Per-tenant rate used when the tenant config is unavailable
    #[serde(default = "default_max_operations_per_minute")]
    pub max_operations_per_minute: usize,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub connection_idle_timeout_secs: u64,

    /// Per-attempt handshake timeout
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Handshake attempts per acquire
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Default per-chunk timeout for file transfers
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_total_connections() -> usize {
    50
}

fn default_max_connections_per_tenant() -> usize {
    5
}

fn default_max_operations_per_minute() -> usize {
    15
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_health_check_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_operation_timeout_secs() -> u64 {
    30
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_total_connections: default_max_total_connections(),
            max_connections_per_tenant: default_max_connections_per_tenant(),
            max_operations_per_minute: default_max_operations_per_minute(),
            health_check_interval_secs: default_health_check_interval_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            connection_idle_timeout_secs: default_idle_timeout_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T) {
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!("Invalid value for {}: {:?}, keeping default", name, raw),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl PoolConfig {
    /// Defaults overridden by `SFTP_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `SFTP_*`
    /// names. Malformed values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("SFTP_ENABLED") {
            match parse_bool(&raw) {
                Some(enabled) => config.enabled = enabled,
                None => warn!("Invalid value for SFTP_ENABLED: {:?}, keeping default", raw),
            }
        }
        parse_override(&lookup, "SFTP_MAX_TOTAL_CONNECTIONS", &mut config.max_total_connections);
        parse_override(
            &lookup,
            "SFTP_MAX_CONNECTIONS_PER_GUILD",
            &mut config.max_connections_per_tenant,
        );
        parse_override(
            &lookup,
            "SFTP_MAX_OPERATIONS_PER_MINUTE",
            &mut config.max_operations_per_minute,
        );
        parse_override(
            &lookup,
            "SFTP_HEALTH_CHECK_INTERVAL",
            &mut config.health_check_interval_secs,
        );
        parse_override(
            &lookup,
            "SFTP_CONNECTION_IDLE_TIMEOUT",
            &mut config.connection_idle_timeout_secs,
        );
        parse_override(&lookup, "SFTP_CONNECTION_TIMEOUT", &mut config.connection_timeout_secs);
        parse_override(&lookup, "SFTP_MAX_RETRIES", &mut config.max_retries);
        parse_override(&lookup, "SFTP_RETRY_DELAY", &mut config.retry_delay_secs);
        parse_override(&lookup, "SFTP_OPERATION_TIMEOUT", &mut config.operation_timeout_secs);

        info!(
            "SFTP pool config: enabled={}, max_total={}, max_per_tenant={}, idle_timeout={}s, health_interval={}s",
            config.enabled,
            config.max_total_connections,
            config.max_connections_per_tenant,
            config.connection_idle_timeout_secs,
            config.health_check_interval_secs
        );
        config
    }

    /// Limits for tenants the config collaborator knows nothing about
    pub fn default_tenant_limits(&self) -> TenantLimits {
        TenantLimits {
            max_connections: self.max_connections_per_tenant,
            max_operations_per_minute: self.max_operations_per_minute,
            idle_timeout_secs: self.connection_idle_timeout_secs,
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_total_connections, 50);
        assert_eq!(config.max_connections_per_tenant, 5);
        assert_eq!(config.health_check_interval_secs, 60);
        assert_eq!(config.connection_idle_timeout_secs, 300);
        assert_eq!(config.connection_timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_secs, 2);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SFTP_ENABLED", "false"),
            ("SFTP_MAX_TOTAL_CONNECTIONS", "10"),
            ("SFTP_MAX_CONNECTIONS_PER_GUILD", "2"),
            ("SFTP_CONNECTION_IDLE_TIMEOUT", "120"),
            ("SFTP_HEALTH_CHECK_INTERVAL", "not-a-number"),
        ]);
        let config = PoolConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(!config.enabled);
        assert_eq!(config.max_total_connections, 10);
        assert_eq!(config.max_connections_per_tenant, 2);
        assert_eq!(config.connection_idle_timeout_secs, 120);
        // Malformed value keeps the default
        assert_eq!(config.health_check_interval_secs, 60);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: PoolConfig = serde_json::from_str(r#"{"max_total_connections": 7}"#).unwrap();
        assert_eq!(config.max_total_connections, 7);
        assert_eq!(config.max_retries, 3);
        assert!(config.enabled);
    }

    #[test]
    fn test_default_tenant_limits() {
        let limits = PoolConfig::default().default_tenant_limits();
        assert_eq!(limits.max_connections, 5);
        assert_eq!(limits.max_operations_per_minute, 15);
        assert_eq!(limits.idle_timeout_secs, 300);
    }
}
