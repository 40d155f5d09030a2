// ABOUTME: Background idle reaper for session sandboxes
// ABOUTME: Periodically tears down sessions whose last access exceeds the configured TTL

use crate::manager::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Spawn the reaper loop; the first sweep runs one `period` after start.
///
/// Abort the returned handle to stop it.
pub fn spawn_reaper(manager: Arc<SessionManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Started idle session reaper (interval: {:?}, ttl: {:?})",
            period,
            manager.settings().session_ttl
        );

        loop {
            interval.tick().await;

            let reaped = manager.cleanup_sessions().await;
            if reaped > 0 {
                info!(
                    "Reaped {} idle session(s), {} remaining",
                    reaped,
                    manager.registry().len()
                );
            }
        }
    })
}
