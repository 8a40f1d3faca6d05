//! Pool statistics

use std::collections::BTreeMap;

use serde::Serialize;

use super::record::PoolState;

/// Per-tenant connection counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConnectionStats {
    pub total: usize,
    pub in_use: usize,
}

/// Pool statistics snapshot for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Registered connections, in-flight connects included
    pub active_connections: usize,
    pub connections_in_use: usize,
    pub tenants_with_connections: usize,
    pub per_tenant_counts: BTreeMap<String, TenantConnectionStats>,
    pub cumulative_created: u64,
    pub cumulative_closed: u64,
    /// Failed connection attempts
    pub connection_errors: u64,
    pub health_check_failures: u64,
    pub max_total_connections: usize,
}

impl PoolStats {
    pub(crate) fn collect(state: &PoolState, max_total_connections: usize) -> Self {
        let mut per_tenant_counts: BTreeMap<String, TenantConnectionStats> = BTreeMap::new();
        let mut connections_in_use = 0;

        for record in state.records.values() {
            let entry = per_tenant_counts
                .entry(record.tenant_id.clone())
                .or_default();
            entry.total += 1;
            if record.in_use {
                entry.in_use += 1;
                connections_in_use += 1;
            }
        }

        Self {
            active_connections: state.total(),
            connections_in_use,
            tenants_with_connections: per_tenant_counts.len(),
            per_tenant_counts,
            cumulative_created: state.counters.created,
            cumulative_closed: state.counters.closed,
            connection_errors: state.counters.connection_errors,
            health_check_failures: state.counters.health_check_failures,
            max_total_connections,
        }
    }

    pub fn tenant(&self, tenant_id: &str) -> TenantConnectionStats {
        self.per_tenant_counts
            .get(tenant_id)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::record::ConnectionRecord;
    use crate::transport::ConnectTarget;
    use std::time::Duration;

    #[test]
    fn test_collect() {
        let mut state = PoolState::default();
        for (id, tenant, in_use) in [("a", "t1", true), ("b", "t1", false), ("c", "t2", false)] {
            let mut record = ConnectionRecord::pending(
                id.to_string(),
                tenant,
                ConnectTarget::new("h", 22, "u"),
                Duration::from_secs(60),
            );
            record.in_use = in_use;
            state.insert(record);
        }
        state.counters.created = 3;

        let stats = PoolStats::collect(&state, 50);
        assert_eq!(stats.active_connections, 3);
        assert_eq!(stats.connections_in_use, 1);
        assert_eq!(stats.tenants_with_connections, 2);
        assert_eq!(stats.tenant("t1"), TenantConnectionStats { total: 2, in_use: 1 });
        assert_eq!(stats.tenant("missing"), TenantConnectionStats::default());

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["activeConnections"], 3);
        assert_eq!(json["perTenantCounts"]["t1"]["inUse"], 1);
        assert_eq!(json["cumulativeCreated"], 3);
    }
}
