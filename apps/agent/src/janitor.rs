//! Periodic abandonment of idle, incomplete upload sessions.

use std::sync::Arc;
use std::time::Duration;

use mediavault_resources::ResourceManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Abandons every session idle for longer than `max_idle`. Returns how
/// many were abandoned.
pub async fn sweep(manager: &ResourceManager, max_idle: Duration) -> usize {
    let mut abandoned = 0;
    for snapshot in manager.stale_sessions(max_idle) {
        match manager.abandon(&snapshot.session_id).await {
            Ok(()) => {
                info!(
                    session = %snapshot.session_id,
                    filename = %snapshot.filename,
                    received = snapshot.received_count,
                    expected = snapshot.expected_chunk_count,
                    "abandoned stale upload"
                );
                abandoned += 1;
            }
            // Finished or removed since the snapshot was taken.
            Err(e) => debug!(session = %snapshot.session_id, error = %e, "stale session already gone"),
        }
    }
    abandoned
}

/// Sweeps every `interval` until `cancel` fires.
pub async fn run(
    manager: Arc<ResourceManager>,
    interval: Duration,
    max_idle: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let n = sweep(&manager, max_idle).await;
                if n > 0 {
                    warn!(abandoned = n, "janitor abandoned idle uploads");
                }
            }
        }
    }
    debug!("janitor stopped");
}
