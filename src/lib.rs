//! sftp-pool - Multi-tenant SFTP connection pool
//!
//! Pools SSH/SFTP connections per tenant with connection quotas, a sliding
//! window rate limit, health checks and idle eviction, and layers cached
//! directory listings and size-guarded transfers on top.
//!
//! ```text
//! ConnectionPool ──acquire──▶ ScopedSession ──▶ FileOperations
//!      │                            │
//!      ├── ResourceGovernor         └── ErrorClassifier
//!      └── Connector (russh / memory)
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod governor;
pub mod pool;
pub mod sftp;
pub mod ssh;
pub mod transport;

pub use classify::{ErrorClassifier, FailureContext, PatternClassifier};
pub use config::{
    CredentialSource, PoolConfig, PremiumTier, ServerCredentials, StaticServerCredentials,
    StaticTenantConfig, TenantConfigProvider, TenantLimits, TierLimits, TierTable,
};
pub use error::{ErrorKind, ResourceKind, Result, SftpPoolError};
pub use governor::{OperationKind, RateDecision, ResourceGovernor};
pub use pool::{
    AcquireOptions, ConnectionInfo, ConnectionPool, MaintenanceReport, PoolStats, RetryPolicy,
    ScopedSession, TenantConnectionStats,
};
pub use sftp::{FileEntry, FileOperations, ListOptions, TransferLimits, WriteSource};
pub use ssh::RusshConnector;
pub use transport::{ConnectTarget, Connector, Credentials, MemoryConnector, TransportError};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber: `RUST_LOG` filter (default `info`)
/// and the fmt layer. For binaries only; the library never calls it.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
