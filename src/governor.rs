//! Per-tenant resource governor
//!
//! Sliding one-minute operation windows keyed by (tenant, operation kind),
//! plus the lookup of per-tenant limits with a fallback to pool defaults.
//!
//! Denial is immediate: callers get a retry-after hint, never a queue slot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{TenantConfigProvider, TenantLimits};
use crate::error::SftpPoolError;

/// Length of the rate window
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Per-minute cap for operation kinds other than SFTP connects
pub const DEFAULT_OTHER_OPERATIONS_PER_MINUTE: usize = 10;

/// Shortest retry-after ever reported
const MIN_RETRY_AFTER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// New SFTP connection attempts; limited by the tenant's tier
    Sftp,
    Other(String),
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Sftp => "sftp",
            OperationKind::Other(name) => name,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    pub fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }

    /// `Err(ResourceError(rate_limit))` when denied
    pub fn into_result(self, tenant_id: &str) -> Result<(), SftpPoolError> {
        if self.allowed {
            Ok(())
        } else {
            Err(SftpPoolError::rate_limited(
                tenant_id,
                self.retry_after.unwrap_or(MIN_RETRY_AFTER),
            ))
        }
    }
}

type WindowKey = (String, OperationKind);

pub struct ResourceGovernor {
    provider: Arc<dyn TenantConfigProvider>,
    defaults: TenantLimits,
    windows: DashMap<WindowKey, VecDeque<Instant>>,
}

impl ResourceGovernor {
    pub fn new(provider: Arc<dyn TenantConfigProvider>, defaults: TenantLimits) -> Self {
        Self {
            provider,
            defaults,
            windows: DashMap::new(),
        }
    }

    /// Limits for `tenant_id`, or the pool defaults if the provider fails
    pub async fn tenant_limits(&self, tenant_id: &str) -> TenantLimits {
        match self.provider.tenant_limits(tenant_id).await {
            Ok(limits) => limits,
            Err(e) => {
                warn!(
                    "Tenant config unavailable for {}, using defaults: {}",
                    tenant_id, e
                );
                self.defaults
            }
        }
    }

    /// Check and, if allowed, record one operation
    pub async fn check_rate_limit(&self, tenant_id: &str, kind: &OperationKind) -> RateDecision {
        let max_operations = match kind {
            OperationKind::Sftp => self.tenant_limits(tenant_id).await.max_operations_per_minute,
            OperationKind::Other(_) => DEFAULT_OTHER_OPERATIONS_PER_MINUTE,
        };
        self.check_with_limit(tenant_id, kind, max_operations)
    }

    /// Same as [`check_rate_limit`](Self::check_rate_limit) with a known cap
    pub fn check_with_limit(
        &self,
        tenant_id: &str,
        kind: &OperationKind,
        max_operations: usize,
    ) -> RateDecision {
        let now = Instant::now();
        let mut window = self
            .windows
            .entry((tenant_id.to_string(), kind.clone()))
            .or_default();

        while window
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= RATE_WINDOW)
        {
            window.pop_front();
        }

        if window.len() >= max_operations {
            let retry_after = window
                .front()
                .map(|oldest| (*oldest + RATE_WINDOW).saturating_duration_since(now))
                .unwrap_or(RATE_WINDOW)
                .max(MIN_RETRY_AFTER);
            debug!(
                "Rate limit hit for tenant {} ({}): {}/{} per minute, retry after {:?}",
                tenant_id,
                kind,
                window.len(),
                max_operations,
                retry_after
            );
            return RateDecision::denied(retry_after);
        }

        window.push_back(now);
        RateDecision::allowed()
    }

    /// Operations recorded in the current window
    pub fn recent_operations(&self, tenant_id: &str, kind: &OperationKind) -> usize {
        let now = Instant::now();
        self.windows
            .get(&(tenant_id.to_string(), kind.clone()))
            .map(|w| {
                w.iter()
                    .filter(|t| now.duration_since(**t) < RATE_WINDOW)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop windows whose timestamps have all expired
    pub fn prune_idle_windows(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|newest| now.duration_since(*newest) < RATE_WINDOW)
        });
        before - self.windows.len()
    }
}
