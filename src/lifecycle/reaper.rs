use super::manager::SessionManager;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn a background task that periodically reaps idle sessions
pub fn spawn_reaper(manager: SessionManager, reaper_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(reaper_interval);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            debug!("Running idle session sweep");
            let reaped = manager.sweep_idle().await;

            if reaped > 0 {
                info!(
                    reaped_sessions = reaped,
                    active_sessions = manager.registry().len(),
                    "Idle session sweep completed"
                );
            } else {
                debug!("Idle session sweep completed, nothing to reap");
            }
        }
    })
}
