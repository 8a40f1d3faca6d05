use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::{
    PremiumTier, ServerCredentials, StaticServerCredentials, StaticTenantConfig, TierTable,
};
use crate::error::{ErrorKind, ResourceKind};
use crate::transport::MemoryConnector;

fn test_config() -> PoolConfig {
    PoolConfig {
        // keep background maintenance out of the way
        health_check_interval_secs: 3600,
        retry_delay_secs: 0,
        ..Default::default()
    }
}

fn pool_with(connector: &MemoryConnector, config: PoolConfig) -> ConnectionPool {
    ConnectionPool::builder(Arc::new(connector.clone()))
        .config(config)
        .build()
}

fn target() -> ConnectTarget {
    ConnectTarget::new("sftp.example.com", 22, "reports")
}

fn password() -> Credentials {
    Credentials::password("secret")
}

fn options() -> AcquireOptions {
    AcquireOptions::default().with_retry(RetryPolicy::new(3, Duration::ZERO))
}

#[tokio::test]
async fn test_released_connection_is_reused() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let first = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let first_id = first.id().to_string();
    drop(first);

    let second = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    assert_eq!(second.id(), first_id);
    assert_eq!(connector.connect_count(), 1);

    let info = pool.connection_info(&first_id).unwrap();
    assert!(info.in_use);
    assert_eq!(info.connect_count, 1);
    assert_eq!(pool.stats().cumulative_created, 1);
}

#[tokio::test]
async fn test_reuse_requires_same_endpoint_and_tenant() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    drop(pool.acquire("guild-1", target(), &password(), &options()).await.unwrap());

    let other_user = ConnectTarget::new("sftp.example.com", 22, "uploads");
    let a = pool.acquire("guild-1", other_user, &password(), &options()).await.unwrap();
    let b = pool.acquire("guild-2", target(), &password(), &options()).await.unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(connector.connect_count(), 3);
}

#[tokio::test]
async fn test_force_new_skips_idle_connection() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let first = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let first_id = first.id().to_string();
    drop(first);

    let fresh = pool
        .acquire("guild-1", target(), &password(), &options().with_force_new(true))
        .await
        .unwrap();
    assert_ne!(fresh.id(), first_id);
    assert_eq!(pool.stats().active_connections, 2);
}

#[tokio::test]
async fn test_tenant_quota_from_tier() {
    let connector = MemoryConnector::new();
    let tenants = Arc::new(StaticTenantConfig::new(TierTable::default()));
    tenants.set_tier("paid", PremiumTier::Pro);
    let pool = ConnectionPool::builder(Arc::new(connector.clone()))
        .config(test_config())
        .tenant_config(tenants)
        .build();

    // unknown tenants are on the free tier: two connections
    let _a = pool.acquire("free", target(), &password(), &options()).await.unwrap();
    let _b = pool.acquire("free", target(), &password(), &options()).await.unwrap();
    let err = pool
        .acquire("free", target(), &password(), &options())
        .await
        .unwrap_err();

    assert_eq!(err.resource_kind(), Some(ResourceKind::TenantConnections));
    assert_eq!(err.context().get("current").map(String::as_str), Some("2"));
    assert_eq!(err.context().get("max").map(String::as_str), Some("2"));
    assert_eq!(connector.connect_attempts(), 2);

    let _c = pool.acquire("paid", target(), &password(), &options()).await.unwrap();
    assert_eq!(pool.stats().tenant("free").total, 2);
}

#[tokio::test]
async fn test_global_cap() {
    let connector = MemoryConnector::new();
    let pool = pool_with(
        &connector,
        PoolConfig {
            max_total_connections: 2,
            ..test_config()
        },
    );

    let _a = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let _b = pool.acquire("guild-2", target(), &password(), &options()).await.unwrap();
    let err = pool
        .acquire("guild-3", target(), &password(), &options())
        .await
        .unwrap_err();

    assert_eq!(err.resource_kind(), Some(ResourceKind::Connections));
    assert_eq!(pool.stats().active_connections, 2);
}

#[tokio::test(start_paused = true)]
async fn test_over_capacity_evicts_stale_first() {
    let connector = MemoryConnector::new();
    let pool = pool_with(
        &connector,
        PoolConfig {
            max_connections_per_tenant: 1,
            connection_idle_timeout_secs: 1,
            ..test_config()
        },
    );

    let other = ConnectTarget::new("backup.example.com", 22, "reports");
    drop(pool.acquire("guild-1", target(), &password(), &options()).await.unwrap());
    tokio::time::advance(Duration::from_millis(1200)).await;

    // different endpoint, so no reuse; the stale record makes room
    let session = pool.acquire("guild-1", other, &password(), &options()).await.unwrap();
    assert_eq!(session.host(), "backup.example.com");
    assert_eq!(pool.stats().active_connections, 1);
    assert_eq!(pool.stats().cumulative_closed, 1);
    assert_eq!(connector.open_sessions(), 1);
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let connector = MemoryConnector::new();
    connector.require_password("secret");
    let pool = pool_with(&connector, test_config());

    let err = pool
        .acquire("guild-1", target(), &Credentials::password("wrong"), &options())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(connector.connect_attempts(), 1);

    let stats = pool.stats();
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.connection_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let connector = MemoryConnector::new();
    connector.fail_next_connect(TransportError::new("io", "Connection refused"));
    connector.fail_next_connect(TransportError::new("io", "Connection refused"));
    let pool = pool_with(&connector, test_config());

    let started = Instant::now();
    let retry = RetryPolicy::new(3, Duration::from_secs(2));
    let session = pool
        .acquire("guild-1", target(), &password(), &options().with_retry(retry))
        .await
        .unwrap();

    assert_eq!(connector.connect_attempts(), 3);
    assert!(started.elapsed() >= Duration::from_secs(4));

    let info = pool.connection_info(session.id()).unwrap();
    assert!(info.connected);
    assert_eq!(info.error_count, 2);
    assert_eq!(pool.stats().connection_errors, 2);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let connector = MemoryConnector::new();
    for _ in 0..3 {
        connector.fail_next_connect(TransportError::new("io", "Connection refused"));
    }
    let pool = pool_with(&connector, test_config());

    let err = pool
        .acquire("guild-1", target(), &password(), &options())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.context().get("attempt").map(String::as_str), Some("3"));
    assert_eq!(connector.connect_attempts(), 3);
    assert_eq!(pool.stats().active_connections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let connector = MemoryConnector::new();
    connector.set_connect_delay(Some(Duration::from_secs(60)));
    let pool = pool_with(&connector, test_config());

    let opts = options()
        .with_timeout(Duration::from_secs(1))
        .with_retry(RetryPolicy::new(1, Duration::ZERO));
    let err = pool
        .acquire("guild-1", target(), &password(), &opts)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.is_retryable());
    assert!(err.message().contains("timed out after 1 seconds"));
    assert_eq!(err.context().get("timeout").map(String::as_str), Some("1"));
    assert_eq!(err.context().get("operation").map(String::as_str), Some("connect"));
    assert_eq!(err.context().get("host").map(String::as_str), Some("sftp.example.com"));
    assert_eq!(err.context().get("tenant_id").map(String::as_str), Some("guild-1"));
    assert_eq!(pool.stats().active_connections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_applies_to_new_connections() {
    let connector = MemoryConnector::new();
    let pool = pool_with(
        &connector,
        PoolConfig {
            max_operations_per_minute: 2,
            ..test_config()
        },
    );

    let a = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let _b = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let err = pool
        .acquire("guild-1", target(), &password(), &options())
        .await
        .unwrap_err();

    assert_eq!(err.resource_kind(), Some(ResourceKind::RateLimit));
    let retry_after = err.retry_after().unwrap();
    assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(60));
    assert_eq!(connector.connect_attempts(), 2);
    assert_eq!(pool.stats().active_connections, 2);

    // handing back an idle connection is not rate limited
    drop(a);
    pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_acquire_leaves_no_record() {
    let connector = MemoryConnector::new();
    connector.set_connect_delay(Some(Duration::from_secs(10)));
    let pool = pool_with(&connector, test_config());

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        pool.acquire("guild-1", target(), &password(), &options()),
    )
    .await;
    assert!(result.is_err());

    let stats = pool.stats();
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.tenant("guild-1").total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_respect_quota() {
    let connector = MemoryConnector::new();
    connector.set_connect_delay(Some(Duration::from_secs(1)));
    let pool = pool_with(
        &connector,
        PoolConfig {
            max_connections_per_tenant: 2,
            ..test_config()
        },
    );

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            pool.acquire("guild-1", target(), &password(), &options()).await
        }));
    }

    let mut held = Vec::new();
    let mut denied = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(session) => held.push(session),
            Err(err) => {
                assert_eq!(err.resource_kind(), Some(ResourceKind::TenantConnections));
                denied += 1;
            }
        }
    }

    assert_eq!(held.len(), 2);
    assert_eq!(denied, 3);
    assert_eq!(pool.stats().tenant("guild-1").in_use, 2);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_evicts_idle_connections() {
    let connector = MemoryConnector::new();
    let pool = pool_with(
        &connector,
        PoolConfig {
            connection_idle_timeout_secs: 1,
            ..test_config()
        },
    );

    let idle = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let busy = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    drop(idle);

    tokio::time::advance(Duration::from_millis(1200)).await;
    let report = pool.run_maintenance().await;

    assert_eq!(report.evicted, 1);
    assert_eq!(connector.open_sessions(), 1);
    assert!(pool.connection_info(busy.id()).is_some());
}

#[tokio::test]
async fn test_health_check() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let session = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let id = session.id().to_string();

    // in use: reported healthy without touching it
    assert!(pool.check_health(&id).await);
    drop(session);
    assert!(pool.check_health(&id).await);
    assert!(pool.connection_info(&id).unwrap().last_health_check_at.is_some());

    assert!(!pool.check_health("missing").await);
}

#[tokio::test]
async fn test_failed_health_check_marks_disconnected() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let id = {
        let session = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
        session.id().to_string()
    };
    connector.break_existing_sessions();

    assert!(!pool.check_health(&id).await);
    let info = pool.connection_info(&id).unwrap();
    assert!(!info.connected);
    assert!(!info.in_use);
    assert_eq!(info.error_count, 1);
    assert_eq!(pool.stats().health_check_failures, 1);

    // next acquire does not hand it out
    let fresh = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    assert_ne!(fresh.id(), id);

    let report = pool.run_maintenance().await;
    assert_eq!(report.evicted, 1);
    assert!(pool.connection_info(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_health_check_timeout() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let id = {
        let session = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
        session.id().to_string()
    };
    connector.set_stat_delay(Some(Duration::from_secs(60)));

    let started = Instant::now();
    assert!(!pool.check_health(&id).await);
    assert!(started.elapsed() < Duration::from_secs(60));

    let info = pool.connection_info(&id).unwrap();
    assert!(!info.connected);
    assert!(!info.in_use);
    assert!(info.last_error.unwrap().contains("timed out"));
    assert_eq!(pool.stats().health_check_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_health_check_frees_record() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let id = {
        let session = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
        session.id().to_string()
    };
    connector.set_stat_delay(Some(Duration::from_secs(3600)));

    let abandoned = tokio::time::timeout(Duration::from_secs(1), pool.check_health(&id)).await;
    assert!(abandoned.is_err());

    let info = pool.connection_info(&id).unwrap();
    assert!(!info.in_use);
    assert!(info.connected);
    assert_eq!(pool.stats().connections_in_use, 0);

    // still evictable once idle
    tokio::time::advance(Duration::from_secs(3600)).await;
    let report = pool.run_maintenance().await;
    assert_eq!(report.evicted, 1);
    assert_eq!(pool.stats().active_connections, 0);
}

#[tokio::test]
async fn test_maintenance_closes_unhealthy() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    drop(pool.acquire("guild-1", target(), &password(), &options()).await.unwrap());
    connector.break_existing_sessions();

    let report = pool.run_maintenance().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.unhealthy, 1);
    assert_eq!(pool.stats().active_connections, 0);
}

#[tokio::test]
async fn test_invalidated_session_is_discarded() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let session = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let id = session.id().to_string();
    session.invalidate();
    drop(session);

    assert!(pool.connection_info(&id).is_none());
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(connector.open_sessions(), 0);
}

#[tokio::test]
async fn test_scoped_close_and_release() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let session = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    let id = session.id().to_string();
    session.close().await;
    assert!(pool.connection_info(&id).is_none());
    assert_eq!(connector.open_sessions(), 0);
    assert_eq!(pool.stats().cumulative_closed, 1);

    // unknown ids are ignored
    pool.release("missing");
    pool.close("missing").await;
}

#[tokio::test]
async fn test_operations_are_counted() {
    let connector = MemoryConnector::new();
    connector.fs().add_file("/data/report.csv", "a,b\n");
    let pool = pool_with(&connector, test_config());

    let session = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    assert!(session.stat("/data/report.csv").await.unwrap().is_file());
    let err = session.stat("/data/missing.csv").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::File);

    let info = pool.connection_info(session.id()).unwrap();
    assert_eq!(info.operation_count, 2);
    assert_eq!(info.error_count, 1);
}

#[tokio::test]
async fn test_disabled_pool() {
    let connector = MemoryConnector::new();
    let pool = pool_with(
        &connector,
        PoolConfig {
            enabled: false,
            ..test_config()
        },
    );

    let err = pool
        .acquire("guild-1", target(), &password(), &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(
        err.context().get("config_item").map(String::as_str),
        Some("sftp_enabled")
    );
    assert_eq!(connector.connect_attempts(), 0);
}

#[tokio::test]
async fn test_target_is_normalized() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());

    let err = pool
        .acquire("guild-1", ConnectTarget::new("  ", 22, "u"), &password(), &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let session = pool
        .acquire("guild-1", ConnectTarget::new(" host ", 22, ""), &password(), &options())
        .await
        .unwrap();
    assert_eq!(session.host(), "host");
    assert_eq!(session.username(), DEFAULT_USERNAME);
}

#[tokio::test]
async fn test_start_stop() {
    let connector = MemoryConnector::new();
    let pool = pool_with(&connector, test_config());
    assert!(!pool.is_running());

    let _held = pool.acquire("guild-1", target(), &password(), &options()).await.unwrap();
    drop(pool.acquire("guild-2", target(), &password(), &options()).await.unwrap());
    assert!(pool.is_running());

    pool.stop().await;
    assert!(!pool.is_running());
    assert_eq!(pool.stats().active_connections, 0);
    assert_eq!(connector.open_sessions(), 0);
}

#[tokio::test]
async fn test_acquire_for_server() {
    let connector = MemoryConnector::new();
    connector.require_password("secret");
    let servers = Arc::new(StaticServerCredentials::new());
    servers.insert(
        "guild-1",
        "reports",
        ServerCredentials {
            host: "sftp.example.com".into(),
            port: 2222,
            username: "reports".into(),
            password: Some("secret".into()),
            key_path: None,
            key_passphrase: None,
        },
    );
    let pool = ConnectionPool::builder(Arc::new(connector.clone()))
        .config(test_config())
        .credential_source(servers)
        .build();

    let session = pool
        .acquire_for_server("guild-1", "reports", &options())
        .await
        .unwrap();
    assert_eq!(session.port(), 2222);

    let err = pool
        .acquire_for_server("guild-2", "reports", &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_acquire_for_server_without_source() {
    let pool = pool_with(&MemoryConnector::new(), test_config());
    let err = pool
        .acquire_for_server("guild-1", "reports", &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
