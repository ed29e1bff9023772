use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use coordinator_client::CoordinatorClient;
use coordinator_client::CoordinatorError;
use db_client::{DbClient, TlsConfig};
use job_engine::state_machine::{run_step, JobContext, StepOutcome};
use job_engine::MigrationError;
use model::Migration;
use osc_supervisor::{AcceptFlag, InFlightRegistry, Supervisor};
use rand::Rng;
use runner_config::RunnerConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CLAIM_SLEEP_BASE: Duration = Duration::from_secs(10);
const CLAIM_SLEEP_JITTER_SECS: u64 = 10;

/// Shared dependencies a claim-loop iteration and every worker it spawns
/// need. Cloneable (all fields are `Arc`/`Clone`) so each worker can own
/// its copy without borrowing the loop.
#[derive(Clone)]
pub struct ClaimLoopContext {
    pub coordinator: Arc<CoordinatorClient>,
    pub config: Arc<RunnerConfig>,
    pub registry: InFlightRegistry,
    pub accept: AcceptFlag,
    pub hostname: String,
    pub log_sync_interval: Duration,
    pub state_sync_interval: Duration,
    in_flight_claims: Arc<AtomicUsize>,
}

impl ClaimLoopContext {
    pub fn new(
        coordinator: Arc<CoordinatorClient>,
        config: Arc<RunnerConfig>,
        registry: InFlightRegistry,
        accept: AcceptFlag,
        hostname: String,
    ) -> Self {
        let log_sync_interval = Duration::from_secs(config.log_sync_interval);
        let state_sync_interval = Duration::from_secs(config.state_sync_interval);
        Self {
            coordinator,
            config,
            registry,
            accept,
            hostname,
            log_sync_interval,
            state_sync_interval,
            in_flight_claims: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counts claims handed off to a worker but not yet through their first
    /// step. The shutdown path waits on this to reach zero before killing
    /// every entry in the in-flight registry, closing the window between
    /// "claim accepted" and "pid registered" (spec.md §4.6).
    pub async fn wait_for_in_flight_claims(&self) {
        while self.in_flight_claims.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Polls `Staged` on a jittered interval and hands each claimable record to
/// a fresh worker task, until `cancel` fires. If `once` is set, performs a
/// single poll-and-drain pass and returns instead of looping forever.
pub async fn run_claim_loop(ctx: ClaimLoopContext, cancel: CancellationToken, once: bool) {
    loop {
        if !ctx.accept.is_accepting() {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                _ = cancel.cancelled() => return,
            }
        }

        let jitter = rand::thread_rng().gen_range(0..CLAIM_SLEEP_JITTER_SECS);
        let sleep_for = CLAIM_SLEEP_BASE + Duration::from_secs(jitter);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = cancel.cancelled() => return,
        }

        let staged = match ctx.coordinator.staged().await {
            Ok(records) => records,
            Err(err) => {
                warn!(%err, "failed to fetch staged migrations");
                if once {
                    return;
                }
                continue;
            }
        };

        for record in staged {
            match unstage_runnable(&ctx, record).await {
                Ok(Some(migration)) => spawn_worker(ctx.clone(), migration),
                Ok(None) => {}
                Err(err) => error!(%err, "failed to claim staged migration"),
            }
        }

        if once {
            return;
        }
    }
}

/// Validates and claims a single staged record, applying host/port/db
/// overrides and run_host pinning before attempting `Unstage`.
async fn unstage_runnable(
    ctx: &ClaimLoopContext,
    record: coordinator_client::types::MigrationRecord,
) -> Result<Option<Migration>, CoordinatorError> {
    if let Some(pinned_host) = &record.run_host {
        if pinned_host != &ctx.hostname {
            return Ok(None);
        }
    }

    let Some(id) = record.id else {
        return Ok(None);
    };

    match ctx.coordinator.unstage(id).await {
        Ok(claimed) => {
            let mut migration = claimed.into_migration("unstage", &ctx.config.log_dir)?;
            apply_overrides(ctx, &mut migration);
            Ok(Some(migration))
        }
        Err(CoordinatorError::Stolen(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

fn apply_overrides(ctx: &ClaimLoopContext, migration: &mut Migration) {
    if let Some(host) = &ctx.config.host_override {
        migration.host = host.clone();
    }
    if let Some(port) = ctx.config.port_override {
        migration.port = port;
    }
    if let Some(database) = &ctx.config.database_override {
        migration.database = database.clone();
    }
    if !ctx.config.pending_drops_db.is_empty() {
        migration.pending_drops_db = ctx.config.pending_drops_db.clone();
    }
    migration.normalize_pending_drops_db();
}

fn spawn_worker(ctx: ClaimLoopContext, migration: Migration) {
    ctx.in_flight_claims.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        let result = run_worker(&ctx, &migration).await;
        ctx.in_flight_claims.fetch_sub(1, Ordering::SeqCst);
        if let Err(err) = result {
            fail_migration(&ctx, &migration, &err).await;
        }
    });
}

async fn run_worker(ctx: &ClaimLoopContext, migration: &Migration) -> Result<StepOutcome, MigrationError> {
    let tls = TlsConfig {
        ca_path: ctx.config.mysql_root_ca.clone(),
        cert_path: ctx.config.mysql_cert.clone(),
        key_path: ctx.config.mysql_key.clone(),
    };
    let db = job_engine::migration_ops::setup_db_client(
        &migration.host,
        migration.port,
        &ctx.config.mysql_user,
        &ctx.config.mysql_password,
        Some(&tls),
    )
    .await?;

    let mut supervisor = Supervisor::new(
        ctx.config.pt_osc_path.clone(),
        ctx.config.mysql_defaults_file.clone(),
        ctx.coordinator.clone(),
        ctx.registry.clone(),
    );
    supervisor.log_sync_interval = ctx.log_sync_interval;
    supervisor.state_sync_interval = ctx.state_sync_interval;

    let job_ctx = JobContext {
        coordinator: ctx.coordinator.clone(),
        supervisor,
        registry: ctx.registry.clone(),
        hostname: ctx.hostname.clone(),
    };

    run_step(&job_ctx, &db, migration).await
}

/// On any step error, reports `Fail` to the coordinator (or `Error` when
/// the error happened mid-RUN and is resumable). Failure of the report
/// itself is logged and dropped, never escalated (spec.md §7).
async fn fail_migration(ctx: &ClaimLoopContext, migration: &Migration, err: &MigrationError) {
    error!(migration_id = migration.id, %err, "migration step failed");

    let is_run_resumable = migration.status == model::Status::Run && err.is_resumable_during_run();
    let report = if is_run_resumable {
        ctx.coordinator.error(migration.id, &err.to_string()).await
    } else {
        ctx.coordinator.fail(migration.id, &err.to_string()).await
    };

    if let Err(report_err) = report {
        warn!(migration_id = migration.id, %report_err, "failed to report migration failure to coordinator");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_window_is_base_plus_single_digit_jitter() {
        let min = CLAIM_SLEEP_BASE;
        let max = CLAIM_SLEEP_BASE + Duration::from_secs(CLAIM_SLEEP_JITTER_SECS - 1);
        assert!(min < max);
    }
}
