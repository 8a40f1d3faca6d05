//! Premium-tier resource limits
//!
//! Tenants are assigned one of four tiers. Each tier maps to a fixed set of
//! limits, individually overridable through `TIER_<n>_<LIMIT>` environment
//! variables (e.g. `TIER_0_MAX_SFTP_CONNECTIONS=3`).

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{TenantConfigProvider, TenantLimits};
use crate::error::SftpPoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PremiumTier {
    Free = 0,
    Basic = 1,
    Pro = 2,
    Enterprise = 3,
}

impl PremiumTier {
    pub const ALL: [PremiumTier; 4] = [
        PremiumTier::Free,
        PremiumTier::Basic,
        PremiumTier::Pro,
        PremiumTier::Enterprise,
    ];

    /// Out-of-range levels clamp to the nearest tier
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => PremiumTier::Free,
            1 => PremiumTier::Basic,
            2 => PremiumTier::Pro,
            _ => PremiumTier::Enterprise,
        }
    }

    pub fn level(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_sftp_connections: usize,
    pub max_sftp_operations_per_minute: usize,
    pub max_file_size_mb: u64,
    pub connection_idle_timeout: u64,
    pub max_search_depth: usize,
    pub max_retry_count: u32,
}

impl TierLimits {
    pub const fn for_tier(tier: PremiumTier) -> Self {
        match tier {
            PremiumTier::Free => Self {
                max_sftp_connections: 2,
                max_sftp_operations_per_minute: 5,
                max_file_size_mb: 5,
                connection_idle_timeout: 120,
                max_search_depth: 2,
                max_retry_count: 2,
            },
            PremiumTier::Basic => Self {
                max_sftp_connections: 5,
                max_sftp_operations_per_minute: 15,
                max_file_size_mb: 15,
                connection_idle_timeout: 300,
                max_search_depth: 3,
                max_retry_count: 3,
            },
            PremiumTier::Pro => Self {
                max_sftp_connections: 10,
                max_sftp_operations_per_minute: 30,
                max_file_size_mb: 25,
                connection_idle_timeout: 600,
                max_search_depth: 5,
                max_retry_count: 4,
            },
            PremiumTier::Enterprise => Self {
                max_sftp_connections: 20,
                max_sftp_operations_per_minute: 60,
                max_file_size_mb: 50,
                connection_idle_timeout: 900,
                max_search_depth: 10,
                max_retry_count: 5,
            },
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn tenant_limits(&self) -> TenantLimits {
        TenantLimits {
            max_connections: self.max_sftp_connections,
            max_operations_per_minute: self.max_sftp_operations_per_minute,
            idle_timeout_secs: self.connection_idle_timeout,
        }
    }

    fn apply_override(&mut self, name: &str, value: u64) -> bool {
        match name {
            "MAX_SFTP_CONNECTIONS" => self.max_sftp_connections = value as usize,
            "MAX_SFTP_OPERATIONS_PER_MINUTE" => self.max_sftp_operations_per_minute = value as usize,
            "MAX_FILE_SIZE_MB" => self.max_file_size_mb = value,
            "CONNECTION_IDLE_TIMEOUT" => self.connection_idle_timeout = value,
            "MAX_SEARCH_DEPTH" => self.max_search_depth = value as usize,
            "MAX_RETRY_COUNT" => self.max_retry_count = value as u32,
            _ => return false,
        }
        true
    }
}

const LIMIT_NAMES: [&str; 6] = [
    "MAX_SFTP_CONNECTIONS",
    "MAX_SFTP_OPERATIONS_PER_MINUTE",
    "MAX_FILE_SIZE_MB",
    "CONNECTION_IDLE_TIMEOUT",
    "MAX_SEARCH_DEPTH",
    "MAX_RETRY_COUNT",
];

/// Limits for every tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierTable {
    tiers: [TierLimits; 4],
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tiers: PremiumTier::ALL.map(TierLimits::for_tier),
        }
    }
}

impl TierTable {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut table = Self::default();
        for tier in PremiumTier::ALL {
            let mut applied = Vec::new();
            for limit in LIMIT_NAMES {
                let env_name = format!("TIER_{}_{}", tier.level(), limit);
                let Some(raw) = lookup(&env_name) else {
                    continue;
                };
                match raw.trim().parse::<u64>() {
                    Ok(value) => {
                        table.tiers[tier.level()].apply_override(limit, value);
                        applied.push(format!("{}={}", limit, value));
                    }
                    Err(_) => warn!("Invalid value for {}: {:?}", env_name, raw),
                }
            }
            if !applied.is_empty() {
                info!("Resource limit overrides for tier {}: {}", tier.level(), applied.join(", "));
            }
        }
        table
    }

    pub fn get(&self, tier: PremiumTier) -> &TierLimits {
        &self.tiers[tier.level()]
    }

    pub fn set(&mut self, tier: PremiumTier, limits: TierLimits) {
        self.tiers[tier.level()] = limits;
    }
}

/// [`TenantConfigProvider`] backed by an in-process tenant → tier map.
/// Unknown tenants are on the free tier.
#[derive(Debug, Default)]
pub struct StaticTenantConfig {
    table: TierTable,
    tenants: DashMap<String, PremiumTier>,
}

impl StaticTenantConfig {
    pub fn new(table: TierTable) -> Self {
        Self {
            table,
            tenants: DashMap::new(),
        }
    }

    pub fn set_tier(&self, tenant_id: &str, tier: PremiumTier) {
        self.tenants.insert(tenant_id.to_string(), tier);
    }

    pub fn tier_of(&self, tenant_id: &str) -> PremiumTier {
        self.tenants
            .get(tenant_id)
            .map(|t| *t.value())
            .unwrap_or(PremiumTier::Free)
    }

    pub fn limits_for(&self, tenant_id: &str) -> TierLimits {
        *self.table.get(self.tier_of(tenant_id))
    }
}

#[async_trait]
impl TenantConfigProvider for StaticTenantConfig {
    async fn tenant_limits(&self, tenant_id: &str) -> Result<TenantLimits, SftpPoolError> {
        Ok(self.limits_for(tenant_id).tenant_limits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_table() {
        let table = TierTable::default();
        assert_eq!(table.get(PremiumTier::Free).max_sftp_connections, 2);
        assert_eq!(table.get(PremiumTier::Basic).max_sftp_operations_per_minute, 15);
        assert_eq!(table.get(PremiumTier::Pro).max_file_size_mb, 25);
        assert_eq!(table.get(PremiumTier::Enterprise).connection_idle_timeout, 900);
        assert_eq!(table.get(PremiumTier::Enterprise).max_search_depth, 10);
        assert_eq!(table.get(PremiumTier::Pro).max_retry_count, 4);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TIER_0_MAX_SFTP_CONNECTIONS", "3"),
            ("TIER_2_CONNECTION_IDLE_TIMEOUT", "60"),
            ("TIER_1_MAX_FILE_SIZE_MB", "lots"),
        ]);
        let table = TierTable::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(table.get(PremiumTier::Free).max_sftp_connections, 3);
        assert_eq!(table.get(PremiumTier::Pro).connection_idle_timeout, 60);
        assert_eq!(table.get(PremiumTier::Basic).max_file_size_mb, 15);
    }

    #[test]
    fn test_from_level_clamps() {
        assert_eq!(PremiumTier::from_level(0), PremiumTier::Free);
        assert_eq!(PremiumTier::from_level(2), PremiumTier::Pro);
        assert_eq!(PremiumTier::from_level(9), PremiumTier::Enterprise);
    }

    #[test]
    fn test_max_file_size_bytes() {
        assert_eq!(
            TierLimits::for_tier(PremiumTier::Free).max_file_size_bytes(),
            5 * 1024 * 1024
        );
    }

    #[tokio::test]
    async fn test_static_tenant_config() {
        let config = StaticTenantConfig::new(TierTable::default());
        config.set_tier("guild-pro", PremiumTier::Pro);

        let pro = config.tenant_limits("guild-pro").await.unwrap();
        assert_eq!(pro.max_connections, 10);
        assert_eq!(pro.max_operations_per_minute, 30);
        assert_eq!(pro.idle_timeout_secs, 600);

        let unknown = config.tenant_limits("guild-new").await.unwrap();
        assert_eq!(unknown.max_connections, 2);
    }
}
