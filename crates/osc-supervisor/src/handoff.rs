use std::time::Duration;

use coordinator_client::CoordinatorClient;
use tokio::time::interval;
use tracing::{info, warn};

use crate::registry::{AcceptFlag, InFlightRegistry};
use crate::supervisor::kill_helper;

const STOP_FILE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls `stop_file_path` for existence. While present, clears `accept` so
/// the claim loop stops picking up new work, kills every in-flight helper,
/// and offers each killed migration back to the fleet. Runs until `stop_file_path`
/// is removed, at which point `accept` is restored and the loop returns.
pub async fn run_handoff_watcher(
    stop_file_path: String,
    accept: AcceptFlag,
    registry: InFlightRegistry,
    coordinator: std::sync::Arc<CoordinatorClient>,
) {
    let mut ticker = interval(STOP_FILE_POLL_INTERVAL);
    let mut handing_off = false;

    loop {
        ticker.tick().await;
        let present = tokio::fs::try_exists(&stop_file_path).await.unwrap_or(false);

        if present && !handing_off {
            info!(stop_file_path, "stop file detected, beginning fleet handoff");
            handing_off = true;
            accept.set(false);
        }

        if present {
            for (id, _pid) in registry.snapshot().await {
                if let Err(err) = kill_helper(&registry, id).await {
                    warn!(id, %err, "failed to kill in-flight helper during handoff");
                    continue;
                }
                if let Err(err) = coordinator.offer(id).await {
                    warn!(id, %err, "failed to offer migration back to the fleet");
                }
            }
        }

        if !present && handing_off {
            info!(stop_file_path, "stop file removed, resuming claims");
            handing_off = false;
            accept.set(true);
        }
    }
}
