//! Connection records and the pool index
//!
//! # Invariants
//!
//! - `records` and `by_tenant` always describe the same set of ids
//! - `in_use = true` records are never reused, health-checked or evicted
//! - `connected = false` implies `session` is `None`
//! - `error_count` only grows

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::transport::{ConnectTarget, RemoteSession};

/// One pooled connection
pub struct ConnectionRecord {
    pub id: String,
    pub tenant_id: String,
    pub target: ConnectTarget,

    pub connected: bool,
    pub in_use: bool,
    pub(crate) session: Option<Arc<dyn RemoteSession>>,

    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// Monotonic twin of `last_used_at` for idle computations
    pub(crate) last_used: Instant,
    /// Idle period after which the record is stale
    pub idle_timeout: Duration,

    pub connect_count: u32,
    pub error_count: u32,
    pub operation_count: u64,
    pub last_error: Option<String>,
}

impl ConnectionRecord {
    /// A record for a connection about to be established; in use by the
    /// caller that registers it.
    pub fn pending(id: String, tenant_id: &str, target: ConnectTarget, idle_timeout: Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant_id: tenant_id.to_string(),
            target,
            connected: false,
            in_use: true,
            session: None,
            created_at: now,
            last_used_at: now,
            last_health_check_at: None,
            last_used: Instant::now(),
            idle_timeout,
            connect_count: 0,
            error_count: 0,
            operation_count: 0,
            last_error: None,
        }
    }

    pub fn matches(&self, target: &ConnectTarget) -> bool {
        self.target == *target
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Idle, and either past its idle timeout or already disconnected
    pub fn is_stale(&self, now: Instant) -> bool {
        !self.in_use && (!self.connected || self.idle_for(now) > self.idle_timeout)
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
        self.last_used_at = Utc::now();
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }

    /// Mark disconnected and hand back the session handle for closing
    pub fn disconnect(&mut self) -> Option<Arc<dyn RemoteSession>> {
        self.connected = false;
        self.session.take()
    }

    /// One-line human-readable state
    pub fn status_line(&self) -> String {
        if self.connected {
            format!(
                "connected, {}, idle {}s, {} operations",
                if self.in_use { "in use" } else { "available" },
                self.idle_for(Instant::now()).as_secs(),
                self.operation_count
            )
        } else {
            match &self.last_error {
                Some(err) => format!("disconnected (last error: {})", err),
                None => "disconnected".to_string(),
            }
        }
    }

    pub fn to_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            tenant_id: self.tenant_id.clone(),
            host: self.target.host.clone(),
            port: self.target.port,
            username: self.target.username.clone(),
            connected: self.connected,
            in_use: self.in_use,
            created_at: self.created_at.to_rfc3339(),
            last_used_at: self.last_used_at.to_rfc3339(),
            last_health_check_at: self.last_health_check_at.map(|t| t.to_rfc3339()),
            connect_count: self.connect_count,
            error_count: self.error_count,
            operation_count: self.operation_count,
            last_error: self.last_error.clone(),
            status: self.status_line(),
        }
    }
}

/// Snapshot of one record, safe to hand out
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub tenant_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub connected: bool,
    pub in_use: bool,
    pub created_at: String,
    pub last_used_at: String,
    pub last_health_check_at: Option<String>,
    pub connect_count: u32,
    pub error_count: u32,
    pub operation_count: u64,
    pub last_error: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PoolCounters {
    pub created: u64,
    pub closed: u64,
    pub connection_errors: u64,
    pub health_check_failures: u64,
}

/// Everything guarded by the pool's global lock
#[derive(Default)]
pub(crate) struct PoolState {
    pub records: HashMap<String, ConnectionRecord>,
    pub by_tenant: HashMap<String, HashSet<String>>,
    pub counters: PoolCounters,
}

impl PoolState {
    pub fn insert(&mut self, record: ConnectionRecord) {
        self.by_tenant
            .entry(record.tenant_id.clone())
            .or_default()
            .insert(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<ConnectionRecord> {
        let record = self.records.remove(id)?;
        if let Some(ids) = self.by_tenant.get_mut(&record.tenant_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_tenant.remove(&record.tenant_id);
            }
        }
        Some(record)
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn tenant_count(&self, tenant_id: &str) -> usize {
        self.by_tenant.get(tenant_id).map_or(0, HashSet::len)
    }

    /// Claim an idle, connected record of `tenant_id` matching `target`
    pub fn claim_idle(&mut self, tenant_id: &str, target: &ConnectTarget) -> Option<String> {
        let ids = self.by_tenant.get(tenant_id)?;
        let id = ids
            .iter()
            .find(|id| {
                self.records
                    .get(*id)
                    .is_some_and(|r| !r.in_use && r.connected && r.matches(target))
            })?
            .clone();
        let record = self.records.get_mut(&id)?;
        record.in_use = true;
        record.touch();
        Some(id)
    }

    /// Remove every stale record; the caller closes their sessions
    pub fn take_stale(&mut self, now: Instant) -> Vec<ConnectionRecord> {
        let stale: Vec<String> = self
            .records
            .values()
            .filter(|r| r.is_stale(now))
            .map(|r| r.id.clone())
            .collect();
        let removed: Vec<ConnectionRecord> =
            stale.iter().filter_map(|id| self.remove(id)).collect();
        self.counters.closed += removed.len() as u64;
        removed
    }

    /// Ids of records maintenance may health-check
    pub fn idle_connected_ids(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| !r.in_use && r.connected)
            .map(|r| r.id.clone())
            .collect()
    }
}
