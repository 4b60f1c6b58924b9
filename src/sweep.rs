use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Spawn the periodic retention sweep. Failures are logged and swallowed;
/// live requests are never affected.
pub fn spawn_retention_sweep(
    store: Arc<Store>,
    retention_days: i64,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired(retention_days, Utc::now()) {
                Ok(stats) => {
                    let removed = stats.expired_results
                        + stats.old_requests
                        + stats.old_events
                        + stats.old_payloads;
                    if removed > 0 {
                        info!(
                            expired_results = stats.expired_results,
                            old_requests = stats.old_requests,
                            old_events = stats.old_events,
                            old_payloads = stats.old_payloads,
                            "retention sweep removed rows"
                        );
                    } else {
                        debug!("retention sweep found nothing to remove");
                    }
                }
                Err(e) => error!("retention sweep failed: {e:#}"),
            }
        }
    })
}
