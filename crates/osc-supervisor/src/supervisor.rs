use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use coordinator_client::CoordinatorClient;
use model::Migration;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::argv::{build_dry_run_argv, build_run_argv};
use crate::error::SupervisorError;
use crate::registry::InFlightRegistry;
use crate::replication::{run_copy_percent_replicator, run_log_replicator, run_statefile_replicator};
use crate::stdio::{drain_stderr_plain, drain_stderr_run, drain_stdout};

/// Outcome of a supervised helper invocation, distinct from `Err` which
/// signals the helper itself misbehaved (unexpected stderr, bad signal, I/O
/// failure).
#[derive(Debug, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Clean exit. For RUN, a final 100 was pushed to the copy-percent
    /// channel before the helper's other replicators were torn down.
    Completed,
    /// Killed by SIGKILL while the step was RUN, i.e. a pause or cancel
    /// requested via `kill_helper`.
    Canceled,
}

const LOG_SYNC_INTERVAL_DEFAULT: Duration = Duration::from_secs(5);
const STATE_SYNC_INTERVAL_DEFAULT: Duration = Duration::from_secs(5);

/// Ties together argv construction, child spawn, stdio draining, telemetry,
/// and log/statefile replication into the single-helper-invocation lifecycle
/// described for the RUN and PREP (dry-run) steps.
pub struct Supervisor {
    pub pt_osc_path: String,
    pub defaults_file: String,
    pub coordinator: Arc<CoordinatorClient>,
    pub registry: InFlightRegistry,
    pub log_sync_interval: Duration,
    pub state_sync_interval: Duration,
}

impl Supervisor {
    pub fn new(pt_osc_path: String, defaults_file: String, coordinator: Arc<CoordinatorClient>, registry: InFlightRegistry) -> Self {
        Self {
            pt_osc_path,
            defaults_file,
            coordinator,
            registry,
            log_sync_interval: LOG_SYNC_INTERVAL_DEFAULT,
            state_sync_interval: STATE_SYNC_INTERVAL_DEFAULT,
        }
    }

    /// PREP step: `--dry-run`. No telemetry, no statefile replication; any
    /// stderr output at all is treated as failure.
    pub async fn run_dry_run(&self, migration: &Migration) -> Result<(), SupervisorError> {
        let argv = build_dry_run_argv(migration, &self.defaults_file);
        let mut child = Command::new(&self.pt_osc_path)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        let pid = child.id().unwrap_or_default();
        self.registry.insert(migration.id, pid).await;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let (log_tx, log_rx) = mpsc::channel(256);

        let replicator = tokio::spawn(run_log_replicator(
            migration.id,
            migration.log_file.clone(),
            log_rx,
            self.coordinator.clone(),
            self.log_sync_interval,
        ));
        let stdout_task = tokio::spawn(drain_stdout(stdout, log_tx.clone()));
        let stderr_task = tokio::spawn(drain_stderr_plain(stderr, log_tx.clone()));
        drop(log_tx);

        let stdout_result = stdout_task.await.map_err(|_| SupervisorError::ReaderTaskPanicked)?;
        let stderr_result = stderr_task.await.map_err(|_| SupervisorError::ReaderTaskPanicked)?;
        let status = child.wait().await.map_err(SupervisorError::Wait)?;
        let _ = replicator.await;
        self.registry.remove(migration.id).await;

        info!(migration_id = migration.id, ?status, "dry run helper exited");

        stderr_result?;
        stdout_result?;
        Ok(())
    }

    /// RUN step: full tuning/execute argv, telemetry, log replication, and
    /// statefile replication all run concurrently with the child. The
    /// caller passes `state_file_exists` (pre-stat'd) and `on_spawned`,
    /// invoked right after the PID is registered so the claim-in-progress
    /// latch can be released at exactly that point (spec.md §4.6).
    pub async fn run(
        &self,
        migration: &Migration,
        state_file_exists: bool,
        on_spawned: impl FnOnce(u32) + Send,
    ) -> Result<SupervisorOutcome, SupervisorError> {
        let argv = build_run_argv(migration, &self.defaults_file, state_file_exists);
        let mut child = Command::new(&self.pt_osc_path)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        let pid = child.id().unwrap_or_default();
        self.registry.insert(migration.id, pid).await;
        on_spawned(pid);

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (log_tx, log_rx) = mpsc::channel(256);
        let (copy_tx, copy_rx) = mpsc::channel::<u8>(256);
        let (quit_tx, quit_rx) = oneshot::channel();

        let copy_replicator = tokio::spawn(run_copy_percent_replicator(migration.id, copy_rx, self.coordinator.clone()));
        let log_replicator = tokio::spawn(run_log_replicator(
            migration.id,
            migration.log_file.clone(),
            log_rx,
            self.coordinator.clone(),
            self.log_sync_interval,
        ));
        let state_replicator = tokio::spawn(run_statefile_replicator(
            migration.id,
            migration.state_file.clone(),
            self.coordinator.clone(),
            self.state_sync_interval,
            quit_rx,
        ));

        let stdout_task = tokio::spawn(drain_stdout(stdout, log_tx.clone()));
        let stderr_task = tokio::spawn(drain_stderr_run(stderr, log_tx.clone(), copy_tx.clone()));
        drop(log_tx);

        let stdout_result = stdout_task.await.map_err(|_| SupervisorError::ReaderTaskPanicked)?;
        let stderr_result = stderr_task.await.map_err(|_| SupervisorError::ReaderTaskPanicked)?;
        let status = child.wait().await.map_err(SupervisorError::Wait)?;

        self.registry.remove(migration.id).await;

        #[cfg(unix)]
        let signal_outcome = {
            use std::os::unix::process::ExitStatusExt;
            status.signal().map(|signal| {
                if signal == libc_sigkill() {
                    info!(migration_id = migration.id, "helper killed by SIGKILL, treating as canceled");
                    Ok(SupervisorOutcome::Canceled)
                } else {
                    warn!(migration_id = migration.id, signal, "helper killed by unexpected signal");
                    Err(SupervisorError::UnexpectedSignal)
                }
            })
        };
        #[cfg(not(unix))]
        let signal_outcome: Option<Result<SupervisorOutcome, SupervisorError>> = None;

        // A clean reap with no stderr error means the copy is complete per
        // spec.md §4.5; push the terminal 100 before closing the channel so
        // it lands after every real percentage already in flight.
        if signal_outcome.is_none() && stdout_result.is_ok() && stderr_result.is_ok() {
            let _ = copy_tx.send(100).await;
        }
        drop(copy_tx);

        let _ = quit_tx.send(());
        let _ = state_replicator.await;
        let _ = copy_replicator.await;
        let _ = log_replicator.await;

        if let Some(outcome) = signal_outcome {
            return outcome;
        }

        stderr_result?;
        stdout_result?;

        info!(migration_id = migration.id, ?status, "run helper exited cleanly");
        Ok(SupervisorOutcome::Completed)
    }
}

#[cfg(unix)]
fn libc_sigkill() -> i32 {
    nix::sys::signal::Signal::SIGKILL as i32
}

/// Sends SIGKILL to the registered pid for `id`, if any, and removes it
/// from the registry. Absence is not an error: the helper may already have
/// reaped on its own.
pub async fn kill_helper(registry: &InFlightRegistry, id: i64) -> Result<(), SupervisorError> {
    let Some(pid) = registry.remove(id).await else {
        return Ok(());
    };
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {}
            Err(nix::errno::Errno::ESRCH) => {}
            Err(err) => warn!(id, pid, %err, "failed to signal helper process"),
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use coordinator_client::TlsIdentity;
    use mockito::Matcher;
    use model::{Action, CustomOptions, Migration, Mode, RunType, Status};
    use std::collections::HashMap;
    use std::io::Write as _;
    use std::os::unix::fs::PermissionsExt;

    fn base_migration(dir: &std::path::Path) -> Migration {
        Migration {
            id: 42,
            status: Status::Run,
            host: "db1".into(),
            port: 3306,
            database: "appdb".into(),
            table: "users".into(),
            ddl: "ALTER TABLE users ADD COLUMN foo INT".into(),
            final_insert: None,
            run_type: RunType::Long,
            mode: Mode::Table,
            action: Action::Alter,
            pending_drops_db: "appdb".into(),
            custom_options: CustomOptions(HashMap::new()),
            files_dir: dir.to_string_lossy().into_owned(),
            state_file: dir.join("statefile.txt").to_string_lossy().into_owned(),
            log_file: dir.join("ptosc-output.log").to_string_lossy().into_owned(),
            pid: None,
        }
    }

    fn write_script(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("pt-osc");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn percent_mock(server: &mut mockito::ServerGuard, pct: &str, times: usize) -> mockito::Mock {
        server
            .mock("PUT", "/migrations/42")
            .match_body(Matcher::PartialJson(serde_json::json!({ "copy_percentage": pct })))
            .with_status(200)
            .with_body("{}")
            .expect(times)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn clean_run_emits_terminal_100_after_real_percentages() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "#!/bin/sh\necho 'Copying `db`.`table`:   6% 04:21 remain' 1>&2\necho 'Copying `db`.`table`:   72% 01:21 remain' 1>&2\nexit 0\n",
        );
        let migration = base_migration(tmp.path());

        let mut server = mockito::Server::new_async().await;
        let m6 = percent_mock(&mut server, "6", 1).await;
        let m72 = percent_mock(&mut server, "72", 1).await;
        let m100 = percent_mock(&mut server, "100", 1).await;

        let coordinator = Arc::new(CoordinatorClient::new(server.url(), &TlsIdentity::default()).unwrap());
        let registry = InFlightRegistry::new();
        let supervisor = Supervisor::new(script, "/dev/null".into(), coordinator, registry);

        let outcome = supervisor.run(&migration, false, |_pid| {}).await.unwrap();
        assert_eq!(outcome, SupervisorOutcome::Completed);
        m6.assert_async().await;
        m72.assert_async().await;
        m100.assert_async().await;
    }

    #[tokio::test]
    async fn unexpected_stderr_does_not_emit_terminal_100() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "#!/bin/sh\necho 'Copying `db`.`table`:   6% 04:21 remain' 1>&2\necho 'something unexpected' 1>&2\nexit 0\n",
        );
        let migration = base_migration(tmp.path());

        let mut server = mockito::Server::new_async().await;
        let m6 = percent_mock(&mut server, "6", 1).await;
        let m100 = percent_mock(&mut server, "100", 0).await;

        let coordinator = Arc::new(CoordinatorClient::new(server.url(), &TlsIdentity::default()).unwrap());
        let registry = InFlightRegistry::new();
        let supervisor = Supervisor::new(script, "/dev/null".into(), coordinator, registry);

        let err = supervisor.run(&migration, false, |_pid| {}).await.unwrap_err();
        assert!(matches!(err, SupervisorError::PtOscUnexpectedStderr));
        m6.assert_async().await;
        m100.assert_async().await;
    }
}
