//! Background task for enforcing the snapshot retention limit.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use watchtower_snapshots::SnapshotStore;

/// Starts a background loop that keeps only the `max_count` newest snapshots.
///
/// This task runs indefinitely. It sleeps before the first sweep so startup
/// is not slowed down by a large directory.
///
/// # Arguments
///
/// * `store` - Snapshot store to sweep.
/// * `max_count` - Number of snapshots to keep.
/// * `interval` - Time to wait between sweeps.
pub async fn start_retention_task(store: Arc<SnapshotStore>, max_count: usize, interval: Duration) {
    tracing::info!(
        max_count,
        interval_secs = interval.as_secs(),
        "starting snapshot retention task"
    );

    loop {
        sleep(interval).await;

        match store.enforce_retention(max_count).await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "evicted old snapshots");
                } else {
                    tracing::debug!("no snapshots to evict");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "snapshot retention sweep failed");
            }
        }
    }
}
