use std::collections::HashMap;
use std::io::Write as _;
use std::time::Duration;

use coordinator_client::{CoordinatorClient, FileType};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::warn;

use crate::stdio::LogLine;

/// Writes every captured log line to the local log file (buffered, flushed
/// per line) and ships accumulated lines to the coordinator every
/// `sync_interval`. Performs one final flush when the channel closes.
pub async fn run_log_replicator(
    migration_id: i64,
    log_file_path: String,
    mut log_rx: mpsc::Receiver<LogLine>,
    coordinator: std::sync::Arc<CoordinatorClient>,
    sync_interval: Duration,
) {
    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_file_path) {
        Ok(f) => f,
        Err(err) => {
            warn!(migration_id, %err, "failed to open local log file");
            return;
        }
    };
    let mut writer = std::io::BufWriter::new(file);
    let mut buffer = String::new();
    let mut ticker = interval(sync_interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            line = log_rx.recv() => {
                match line {
                    Some((ts, text)) => {
                        let formatted = format!("[{}] {text}\n", ts.format("%Y-%m-%d %H:%M:%S"));
                        if let Err(err) = writer.write_all(formatted.as_bytes()).and_then(|_| writer.flush()) {
                            warn!(migration_id, %err, "failed to write local log line");
                        }
                        buffer.push_str(&formatted);
                    }
                    None => {
                        flush_buffer(migration_id, &coordinator, &mut buffer).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush_buffer(migration_id, &coordinator, &mut buffer).await;
            }
        }
    }
}

async fn flush_buffer(migration_id: i64, coordinator: &CoordinatorClient, buffer: &mut String) {
    if buffer.is_empty() {
        return;
    }
    if let Err(err) = coordinator.append_to_file(migration_id, FileType::Log, buffer).await {
        warn!(migration_id, %err, "failed to append log buffer to coordinator");
    }
    buffer.clear();
}

/// Every `sync_interval`, reads the statefile and ships its contents via
/// `WriteFile`. On the quit signal, does one final post before returning.
pub async fn run_statefile_replicator(
    migration_id: i64,
    state_file_path: String,
    coordinator: std::sync::Arc<CoordinatorClient>,
    sync_interval: Duration,
    mut quit_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut ticker = interval(sync_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                post_statefile(migration_id, &state_file_path, &coordinator).await;
            }
            _ = &mut quit_rx => {
                post_statefile(migration_id, &state_file_path, &coordinator).await;
                return;
            }
        }
    }
}

/// Forwards each copy-percent value to the coordinator as it arrives, one
/// `Update` call per value, in the order they were observed on stderr.
/// Update failures are logged and swallowed (spec.md §9 Open Question):
/// a dropped telemetry point never fails the migration.
pub async fn run_copy_percent_replicator(
    migration_id: i64,
    mut copy_rx: mpsc::Receiver<u8>,
    coordinator: std::sync::Arc<CoordinatorClient>,
) {
    while let Some(pct) = copy_rx.recv().await {
        let mut fields = HashMap::new();
        fields.insert("copy_percentage".to_string(), pct.to_string());
        if let Err(err) = coordinator.update(migration_id, fields).await {
            warn!(migration_id, %err, "failed to post copy percentage, swallowing");
        }
    }
}

async fn post_statefile(migration_id: i64, state_file_path: &str, coordinator: &CoordinatorClient) {
    match fs::read_to_string(state_file_path).await {
        Ok(contents) => {
            if let Err(err) = coordinator.write_file(migration_id, FileType::State, &contents).await {
                warn!(migration_id, %err, "failed to ship statefile");
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(migration_id, %err, "failed to read statefile"),
    }
}
