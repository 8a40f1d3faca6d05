//! Background pool maintenance
//!
//! The task only holds a `Weak` reference: once the last pool handle is
//! gone it stops on its next tick.

use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::PoolInner;

/// Outcome of one maintenance cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// Stale connections removed
    pub evicted: usize,
    /// Idle connections health-checked
    pub checked: usize,
    /// Health checks that failed; those connections were closed
    pub unhealthy: usize,
}

impl PoolInner {
    pub(crate) async fn run_maintenance(&self) -> MaintenanceReport {
        let stale = self.state.lock().take_stale(Instant::now());
        let mut report = MaintenanceReport {
            evicted: stale.len(),
            ..Default::default()
        };
        if !stale.is_empty() {
            info!("Closing {} stale SFTP connections", stale.len());
        }
        self.shutdown_records(stale).await;

        let idle = self.state.lock().idle_connected_ids();
        for id in idle {
            report.checked += 1;
            if !self.check_health(&id).await {
                report.unhealthy += 1;
                self.close_if_idle(&id).await;
            }
        }

        let pruned = self.governor.prune_idle_windows();
        debug!(
            "SFTP pool maintenance: evicted={}, checked={}, unhealthy={}, pruned rate windows={}",
            report.evicted, report.checked, report.unhealthy, pruned
        );
        report
    }

    /// Remove a record unless someone checked it out meanwhile
    async fn close_if_idle(&self, connection_id: &str) {
        let record = {
            let mut state = self.state.lock();
            let idle = state
                .records
                .get(connection_id)
                .is_some_and(|r| !r.in_use);
            let record = if idle { state.remove(connection_id) } else { None };
            if record.is_some() {
                state.counters.closed += 1;
            }
            record
        };
        if let Some(record) = record {
            self.shutdown_records(vec![record]).await;
        }
    }
}

pub(super) fn spawn(inner: &Arc<PoolInner>) -> JoinHandle<()> {
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    let period = inner.config.health_check_interval();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick fires immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                debug!("SFTP pool dropped, stopping maintenance");
                break;
            };
            inner.run_maintenance().await;
        }
    })
}
