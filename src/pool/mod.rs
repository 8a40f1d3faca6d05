//! Multi-tenant SFTP connection pool
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ConnectionPool (Arc<PoolInner>)                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  PoolState (global lock)                                │  │
//! │  │  ├── records:   id → ConnectionRecord                   │  │
//! │  │  ├── by_tenant: tenant → {id}                           │  │
//! │  │  └── counters                                           │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  tenant_locks: tenant → Mutex   (quota evaluation)           │
//! │  governor:     (tenant, kind) → sliding window               │
//! │  maintenance:  JoinHandle (weak ref to the pool)             │
//! └──────────────────────────────────────────────────────────────┘
//!          │
//!          │  connection id only
//!          ▼
//!    ScopedSession ── release on drop
//! ```
//!
//! # Acquire
//!
//! 1. Under the tenant lock: reuse an idle connected record matching
//!    (host, port, username); otherwise check quotas (evicting stale records
//!    once if over), check the rate window and register a pending record.
//! 2. Without any lock: handshake with per-attempt timeout and retries.
//!    Authentication failures stop the retry loop at once.
//! 3. The pending record is removed again if the handshake fails or the
//!    acquire future is dropped.
//!
//! Locks are never held across network I/O.

mod maintenance;
pub mod record;
pub mod retry;
mod scoped;
pub mod stats;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classify::{ErrorClassifier, FailureContext, PatternClassifier};
use crate::config::{CredentialSource, PoolConfig, TenantConfigProvider, TenantLimits};
use crate::error::{ResourceKind, SftpPoolError};
use crate::governor::{OperationKind, ResourceGovernor};
use crate::transport::{ConnectTarget, Connector, Credentials, RemoteSession, TransportError};

pub use maintenance::MaintenanceReport;
pub use record::{ConnectionInfo, ConnectionRecord};
pub use retry::{calculate_backoff, RetryPolicy};
pub use scoped::ScopedSession;
pub use stats::{PoolStats, TenantConnectionStats};

use record::PoolState;

/// Username used when none is given
pub const DEFAULT_USERNAME: &str = "anonymous";

/// Upper bound for closing one session
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call acquire settings
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Per-attempt handshake timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Skip reuse and always establish a new connection
    pub force_new: bool,
}

impl AcquireOptions {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            timeout: config.connection_timeout(),
            retry: RetryPolicy::from_config(config),
            force_new: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_force_new(mut self, force_new: bool) -> Self {
        self.force_new = force_new;
        self
    }
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

/// Tenant config used when none is supplied: everyone gets the pool defaults
struct PoolDefaults(TenantLimits);

#[async_trait]
impl TenantConfigProvider for PoolDefaults {
    async fn tenant_limits(&self, _tenant_id: &str) -> Result<TenantLimits, SftpPoolError> {
        Ok(self.0)
    }
}

pub struct PoolBuilder {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    tenant_config: Option<Arc<dyn TenantConfigProvider>>,
    credentials: Option<Arc<dyn CredentialSource>>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
}

impl PoolBuilder {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tenant_config(mut self, provider: Arc<dyn TenantConfigProvider>) -> Self {
        self.tenant_config = Some(provider);
        self
    }

    pub fn credential_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> ConnectionPool {
        let defaults = self.config.default_tenant_limits();
        let provider = self
            .tenant_config
            .unwrap_or_else(|| Arc::new(PoolDefaults(defaults)));

        ConnectionPool {
            inner: Arc::new(PoolInner {
                governor: Arc::new(ResourceGovernor::new(provider, defaults)),
                classifier: self
                    .classifier
                    .unwrap_or_else(|| Arc::new(PatternClassifier::new())),
                credentials: self.credentials,
                connector: self.connector,
                config: self.config,
                state: Mutex::new(PoolState::default()),
                tenant_locks: DashMap::new(),
                maintenance: Mutex::new(None),
            }),
        }
    }
}

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    connector: Arc<dyn Connector>,
    pub(crate) classifier: Arc<dyn ErrorClassifier>,
    pub(crate) governor: Arc<ResourceGovernor>,
    credentials: Option<Arc<dyn CredentialSource>>,
    pub(crate) state: Mutex<PoolState>,
    tenant_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle to one pool. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn builder(connector: Arc<dyn Connector>) -> PoolBuilder {
        PoolBuilder {
            config: PoolConfig::default(),
            connector,
            tenant_config: None,
            credentials: None,
            classifier: None,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn governor(&self) -> &Arc<ResourceGovernor> {
        &self.inner.governor
    }

    /// Acquire settings derived from the pool config
    pub fn default_options(&self) -> AcquireOptions {
        AcquireOptions::from_config(&self.inner.config)
    }

    /// Start background maintenance. Idempotent; needs a Tokio runtime.
    pub fn start(&self) {
        let mut slot = self.inner.maintenance.lock();
        if slot.is_none() {
            info!(
                "Starting SFTP pool maintenance (interval={}s)",
                self.inner.config.health_check_interval_secs
            );
            *slot = Some(maintenance::spawn(&self.inner));
        }
    }

    /// Stop maintenance and close every connection, in use or not
    pub async fn stop(&self) {
        if let Some(handle) = self.inner.maintenance.lock().take() {
            handle.abort();
        }

        let records: Vec<ConnectionRecord> = {
            let mut state = self.inner.state.lock();
            let ids: Vec<String> = state.records.keys().cloned().collect();
            let removed: Vec<ConnectionRecord> =
                ids.iter().filter_map(|id| state.remove(id)).collect();
            state.counters.closed += removed.len() as u64;
            removed
        };

        info!("Stopping SFTP pool, closing {} connections", records.len());
        self.inner.shutdown_records(records).await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.maintenance.lock().is_some()
    }

    /// Check out a session for `tenant_id` on `target`.
    ///
    /// Reuses an idle connection unless `options.force_new` is set. Quota and
    /// rate-limit denials fail immediately with a `Resource` error.
    pub async fn acquire(
        &self,
        tenant_id: &str,
        target: ConnectTarget,
        credentials: &Credentials,
        options: &AcquireOptions,
    ) -> Result<ScopedSession, SftpPoolError> {
        let inner = &self.inner;
        if !inner.config.enabled {
            return Err(SftpPoolError::configuration(
                "SFTP connections are disabled",
                "sftp_enabled",
            ));
        }

        let target = normalize_target(target)?;
        self.start();

        let tenant_lock = inner.tenant_lock(tenant_id);
        let guard = tenant_lock.lock().await;

        if !options.force_new {
            let reused = inner.state.lock().claim_idle(tenant_id, &target);
            if let Some(id) = reused {
                debug!("Reusing SFTP connection {} for tenant {} ({})", id, tenant_id, target);
                return Ok(ScopedSession::new(inner.clone(), id, tenant_id, target));
            }
        }

        let limits = inner.governor.tenant_limits(tenant_id).await;
        let (evicted, reserved) = inner.reserve(tenant_id, &target, &limits);
        let pending = reserved.map(|id| PendingRegistration {
            inner: inner.clone(),
            id,
            armed: true,
        });
        drop(guard);

        inner.shutdown_records(evicted).await;
        let pending = pending?;

        let session = inner
            .establish(&pending.id, tenant_id, &target, credentials, options)
            .await?;

        match pending.complete(session.clone()) {
            Some(id) => {
                info!("SFTP connection {} established for tenant {} ({})", id, tenant_id, target);
                Ok(ScopedSession::new(inner.clone(), id, tenant_id, target))
            }
            None => {
                shutdown_session(session).await;
                Err(SftpPoolError::connection("Pool was stopped while connecting")
                    .with_context("host", &target.host)
                    .with_context("port", target.port))
            }
        }
    }

    /// Acquire using the credential source's entry for `server_id`.
    /// Credentials are dropped once the acquire completes.
    pub async fn acquire_for_server(
        &self,
        tenant_id: &str,
        server_id: &str,
        options: &AcquireOptions,
    ) -> Result<ScopedSession, SftpPoolError> {
        let source = self.inner.credentials.as_ref().ok_or_else(|| {
            SftpPoolError::configuration("No credential source configured", "credential_source")
        })?;

        let server = source
            .server_credentials(tenant_id, server_id)
            .await?
            .ok_or_else(|| {
                SftpPoolError::configuration(
                    format!("Server {} is not configured for tenant {}", server_id, tenant_id),
                    "server_id",
                )
                .with_context("tenant_id", tenant_id)
                .with_context("server_id", server_id)
            })?;
        let credentials = server.credentials()?;

        self.acquire(tenant_id, server.target(), &credentials, options)
            .await
    }

    /// Return a connection to the idle set. Unknown ids are ignored.
    pub fn release(&self, connection_id: &str) {
        self.inner.release(connection_id);
    }

    /// Close a connection and forget it. Never fails.
    pub async fn close(&self, connection_id: &str) {
        let record = {
            let mut state = self.inner.state.lock();
            let record = state.remove(connection_id);
            if record.is_some() {
                state.counters.closed += 1;
            }
            record
        };

        match record {
            Some(record) => {
                info!("Closing SFTP connection {} ({})", connection_id, record.target);
                self.inner.shutdown_records(vec![record]).await;
            }
            None => debug!("Close requested for unknown connection {}", connection_id),
        }
    }

    /// Round-trip check of an idle connection.
    ///
    /// In-use connections report healthy without being touched. A failure
    /// marks the connection disconnected; it is not removed here.
    pub async fn check_health(&self, connection_id: &str) -> bool {
        self.inner.check_health(connection_id).await
    }

    /// One maintenance cycle: evict stale connections, health-check the rest
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.inner.run_maintenance().await
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::collect(&self.inner.state.lock(), self.inner.config.max_total_connections)
    }

    pub fn connection_info(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.inner
            .state
            .lock()
            .records
            .get(connection_id)
            .map(ConnectionRecord::to_info)
    }

    pub fn list_connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .inner
            .state
            .lock()
            .records
            .values()
            .map(ConnectionRecord::to_info)
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }
}

fn normalize_target(target: ConnectTarget) -> Result<ConnectTarget, SftpPoolError> {
    let host = target.host.trim().to_string();
    if host.is_empty() {
        return Err(SftpPoolError::configuration("Host must not be empty", "host"));
    }
    let username = match target.username.trim() {
        "" => DEFAULT_USERNAME.to_string(),
        name => name.to_string(),
    };
    Ok(ConnectTarget::new(host, target.port, username))
}

/// A registered-but-unconnected record; removed on drop unless completed
struct PendingRegistration {
    inner: Arc<PoolInner>,
    id: String,
    armed: bool,
}

impl PendingRegistration {
    /// Attach the session. `None` if the record vanished meanwhile.
    fn complete(mut self, session: Arc<dyn RemoteSession>) -> Option<String> {
        let mut state = self.inner.state.lock();
        let record = state.records.get_mut(&self.id)?;
        record.connected = true;
        record.session = Some(session);
        record.connect_count += 1;
        record.touch();
        state.counters.created += 1;
        drop(state);

        self.armed = false;
        Some(self.id.clone())
    }
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        if self.armed && self.inner.state.lock().remove(&self.id).is_some() {
            debug!("Removed pending SFTP connection {}", self.id);
        }
    }
}

/// A record held `in_use` by a health check; released on drop if the check
/// never finished
struct HealthCheckClaim<'a> {
    state: &'a Mutex<PoolState>,
    id: &'a str,
    armed: bool,
}

impl HealthCheckClaim<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for HealthCheckClaim<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(record) = self.state.lock().records.get_mut(self.id) {
            record.in_use = false;
            debug!("Health check of SFTP connection {} abandoned", self.id);
        }
    }
}

async fn shutdown_session(session: Arc<dyn RemoteSession>) {
    if tokio::time::timeout(CLOSE_TIMEOUT, session.close())
        .await
        .is_err()
    {
        warn!("Timed out closing SFTP session after {:?}", CLOSE_TIMEOUT);
    }
}

impl PoolInner {
    fn tenant_lock(&self, tenant_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id.to_string())
            .or_default()
            .clone()
    }

    /// Quota check, rate check and registration in one critical section.
    /// Stale records evicted on the way are returned for closing.
    fn reserve(
        &self,
        tenant_id: &str,
        target: &ConnectTarget,
        limits: &TenantLimits,
    ) -> (Vec<ConnectionRecord>, Result<String, SftpPoolError>) {
        let max_total = self.config.max_total_connections;
        let over = |state: &PoolState| {
            state.total() >= max_total || state.tenant_count(tenant_id) >= limits.max_connections
        };

        let mut state = self.state.lock();
        let evicted = if over(&*state) {
            let stale = state.take_stale(Instant::now());
            if !stale.is_empty() {
                info!("Evicted {} stale SFTP connections to make room", stale.len());
            }
            stale
        } else {
            Vec::new()
        };

        if state.total() >= max_total {
            warn!("Global SFTP connection limit reached ({}/{})", state.total(), max_total);
            let err = SftpPoolError::resource(
                ResourceKind::Connections,
                format!(
                    "Maximum total SFTP connections reached ({}/{})",
                    state.total(),
                    max_total
                ),
            )
            .with_context("tenant_id", tenant_id)
            .with_context("current", state.total())
            .with_context("max", max_total);
            return (evicted, Err(err));
        }

        let tenant_count = state.tenant_count(tenant_id);
        if tenant_count >= limits.max_connections {
            warn!(
                "SFTP connection limit reached for tenant {} ({}/{})",
                tenant_id, tenant_count, limits.max_connections
            );
            let err = SftpPoolError::resource(
                ResourceKind::TenantConnections,
                format!(
                    "Maximum SFTP connections for this tenant reached ({}/{})",
                    tenant_count, limits.max_connections
                ),
            )
            .with_context("tenant_id", tenant_id)
            .with_context("current", tenant_count)
            .with_context("max", limits.max_connections);
            return (evicted, Err(err));
        }

        let decision = self.governor.check_with_limit(
            tenant_id,
            &OperationKind::Sftp,
            limits.max_operations_per_minute,
        );
        if let Err(err) = decision.into_result(tenant_id) {
            return (evicted, Err(err));
        }

        let id = uuid::Uuid::new_v4().to_string();
        state.insert(ConnectionRecord::pending(
            id.clone(),
            tenant_id,
            target.clone(),
            Duration::from_secs(limits.idle_timeout_secs),
        ));
        (evicted, Ok(id))
    }

    async fn establish(
        &self,
        connection_id: &str,
        tenant_id: &str,
        target: &ConnectTarget,
        credentials: &Credentials,
        options: &AcquireOptions,
    ) -> Result<Arc<dyn RemoteSession>, SftpPoolError> {
        let policy = &options.retry;
        let mut last_error = None;

        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(calculate_backoff(attempt - 1, policy)).await;
            }

            debug!(
                "Connecting {} for tenant {} -> {} via {} (attempt {}/{})",
                connection_id,
                tenant_id,
                target,
                credentials.method(),
                attempt + 1,
                policy.max_attempts
            );

            let context = FailureContext::connect(target)
                .with_timeout(options.timeout)
                .with("tenant_id", tenant_id)
                .with("attempt", attempt + 1);
            let error = match tokio::time::timeout(
                options.timeout,
                self.connector.connect(target, credentials),
            )
            .await
            {
                Ok(Ok(session)) => return Ok(session),
                Ok(Err(failure)) => self.classifier.classify(&failure, &context),
                Err(_) => SftpPoolError::timeout(
                    format!(
                        "Connection timed out after {} seconds",
                        options.timeout.as_secs()
                    ),
                    "connect",
                    options.timeout,
                )
                .with_context_map(&context.to_context()),
            };
            self.note_connect_failure(connection_id, &error);

            if !error.is_retryable() {
                warn!(
                    "SFTP connect to {} failed with non-retryable error: {}",
                    target, error
                );
                return Err(error);
            }

            warn!(
                "SFTP connect to {} failed (attempt {}/{}): {}",
                target,
                attempt + 1,
                policy.max_attempts,
                error
            );
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| {
            SftpPoolError::connection(format!(
                "Failed to connect after {} attempts",
                policy.max_attempts
            ))
            .with_context("host", &target.host)
            .with_context("port", target.port)
        }))
    }

    fn note_connect_failure(&self, connection_id: &str, error: &SftpPoolError) {
        let mut state = self.state.lock();
        state.counters.connection_errors += 1;
        if let Some(record) = state.records.get_mut(connection_id) {
            record.record_error(error.to_string());
        }
    }

    pub(crate) fn release(&self, connection_id: &str) {
        let mut state = self.state.lock();
        match state.records.get_mut(connection_id) {
            Some(record) => {
                record.in_use = false;
                record.touch();
                debug!("Released SFTP connection {}", connection_id);
            }
            None => warn!("Release requested for unknown connection {}", connection_id),
        }
    }

    /// Drop a connection whose state is indeterminate. Closing happens in the
    /// background since this runs from `Drop`.
    pub(crate) fn discard(&self, connection_id: &str) {
        let record = {
            let mut state = self.state.lock();
            let record = state.remove(connection_id);
            if record.is_some() {
                state.counters.closed += 1;
            }
            record
        };

        let Some(mut record) = record else {
            return;
        };
        warn!("Discarding SFTP connection {} after an interrupted operation", connection_id);
        if let Some(session) = record.disconnect() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(shutdown_session(session));
                }
                Err(_) => debug!("No runtime to close connection {}, dropping it", connection_id),
            }
        }
    }

    pub(crate) fn session_handle(
        &self,
        connection_id: &str,
    ) -> Result<Arc<dyn RemoteSession>, TransportError> {
        self.state
            .lock()
            .records
            .get(connection_id)
            .and_then(|r| r.session.clone())
            .ok_or_else(|| {
                TransportError::new(
                    "PoolError",
                    format!("Connection {} is no longer available (session closed)", connection_id),
                )
            })
    }

    pub(crate) fn record_operation(&self, connection_id: &str, failure: Option<&str>) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get_mut(connection_id) {
            record.operation_count += 1;
            if let Some(message) = failure {
                record.record_error(message);
            }
        }
    }

    pub(crate) async fn check_health(&self, connection_id: &str) -> bool {
        let session = {
            let mut state = self.state.lock();
            let Some(record) = state.records.get_mut(connection_id) else {
                warn!("Health check requested for unknown connection {}", connection_id);
                return false;
            };
            if record.in_use {
                return true;
            }
            let Some(session) = record.session.clone().filter(|_| record.connected) else {
                return false;
            };
            record.in_use = true;
            session
        };
        let mut claim = HealthCheckClaim {
            state: &self.state,
            id: connection_id,
            armed: true,
        };

        let timeout = self.config.health_check_timeout();
        let failure = match tokio::time::timeout(timeout, session.stat(".")).await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("Health check timed out after {}s", timeout.as_secs())),
        };

        claim.disarm();
        let dead = {
            let mut state = self.state.lock();
            let dead = match state.records.get_mut(connection_id) {
                Some(record) => {
                    record.in_use = false;
                    match &failure {
                        None => {
                            record.last_health_check_at = Some(chrono::Utc::now());
                            None
                        }
                        Some(message) => {
                            record.record_error(message.clone());
                            record.disconnect()
                        }
                    }
                }
                None => None,
            };
            if failure.is_some() {
                state.counters.health_check_failures += 1;
            }
            dead
        };

        match failure {
            None => {
                debug!("SFTP connection {} health check OK", connection_id);
                true
            }
            Some(message) => {
                warn!("SFTP connection {} failed health check: {}", connection_id, message);
                if let Some(session) = dead {
                    shutdown_session(session).await;
                }
                false
            }
        }
    }

    pub(crate) async fn shutdown_records(&self, records: Vec<ConnectionRecord>) {
        for mut record in records {
            debug!("Closing SFTP connection {} ({})", record.id, record.target);
            if let Some(session) = record.disconnect() {
                shutdown_session(session).await;
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests;
