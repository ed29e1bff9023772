use std::collections::HashMap;
use std::sync::Arc;

use coordinator_client::{CoordinatorClient, FileType};
use db_client::DbClient;
use model::{Action, Migration, RunType, Status};
use osc_supervisor::{InFlightRegistry, Supervisor, SupervisorOutcome};
use tracing::{info, warn};

use crate::error::MigrationError;
use crate::migration_ops::{
    collect_table_stats, direct_drop, drop_triggers, dry_run_creates_new, move_to_pending_drops, swap_osc_tables,
    validate_final_insert,
};

/// Everything a single step needs beyond the migration record itself: the
/// coordinator handle, a ready-to-use OSC supervisor, the registry it shares
/// with the fleet-handoff watcher, and this node's hostname for run_host
/// pinning.
pub struct JobContext {
    pub coordinator: Arc<CoordinatorClient>,
    pub supervisor: Supervisor,
    pub registry: InFlightRegistry,
    pub hostname: String,
}

/// What happened to the claim after running its step. `Canceled` and
/// `Paused` are not errors: the coordinator was not advanced because the
/// coordinator itself chose the terminal verb (spec.md §4.4).
#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced,
    Completed,
    Canceled,
}

async fn read_local_file(path: &str) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

async fn write_local_file(path: &str, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await
}

async fn maybe_final_insert(db: &DbClient, migration: &Migration) -> Result<(), MigrationError> {
    if let Some(insert) = &migration.final_insert {
        validate_final_insert(db, insert).await?;
    }
    Ok(())
}

pub async fn run_step(
    ctx: &JobContext,
    db: &DbClient,
    migration: &Migration,
) -> Result<StepOutcome, MigrationError> {
    match migration.status {
        Status::Prep => run_prep(ctx, db, migration).await,
        Status::Run => run_run(ctx, db, migration).await,
        Status::Rename => run_rename(ctx, db, migration).await,
        Status::Pause => run_pause(ctx, migration).await,
        Status::Cancel => run_cancel(ctx, db, migration).await,
    }
}

async fn run_prep(ctx: &JobContext, db: &DbClient, migration: &Migration) -> Result<StepOutcome, MigrationError> {
    maybe_final_insert(db, migration).await?;

    if migration.run_type != RunType::Short {
        ctx.supervisor.run_dry_run(migration).await?;
    }

    if migration.action == Action::Create {
        dry_run_creates_new(db, migration).await?;
    } else {
        let stats = collect_table_stats(db, migration).await?;
        let mut fields = HashMap::new();
        fields.insert("table_rows_start".to_string(), stats.table_rows);
        fields.insert("table_size_start".to_string(), stats.table_size);
        fields.insert("index_size_start".to_string(), stats.index_size);
        ctx.coordinator.update(migration.id, fields).await?;
    }

    ctx.coordinator.next_step(migration.id).await?;
    Ok(StepOutcome::Advanced)
}

async fn run_run(ctx: &JobContext, db: &DbClient, migration: &Migration) -> Result<StepOutcome, MigrationError> {
    match (migration.run_type, migration.action) {
        (RunType::Short, Action::Create | Action::Alter) => {
            db.execute(&migration.ddl, &[]).await?;
            maybe_final_insert(db, migration).await?;
            ctx.coordinator.complete(migration.id).await?;
            Ok(StepOutcome::Completed)
        }
        (RunType::Short, Action::Drop) => {
            drop_triggers(db, &migration.database, &migration.table).await?;
            if migration.mode == model::Mode::View {
                direct_drop(db, migration).await?;
            } else {
                let dst = Migration::timestamped(&migration.table, chrono::Utc::now());
                move_to_pending_drops(db, &migration.database, &migration.pending_drops_db, &migration.table, &dst)
                    .await?;
            }
            maybe_final_insert(db, migration).await?;
            ctx.coordinator.complete(migration.id).await?;
            Ok(StepOutcome::Completed)
        }
        _ => run_long(ctx, migration).await,
    }
}

async fn run_long(ctx: &JobContext, migration: &Migration) -> Result<StepOutcome, MigrationError> {
    let mut fields = HashMap::new();
    fields.insert("run_host".to_string(), ctx.hostname.clone());
    ctx.coordinator.update(migration.id, fields).await?;

    let state_file_exists = tokio::fs::try_exists(&migration.state_file).await.unwrap_or(false);
    let run_result = ctx.supervisor.run(migration, state_file_exists, |_pid| {}).await;

    let unpin = ctx.coordinator.unpin_run_host(migration.id).await;
    if let Err(err) = unpin {
        warn!(migration_id = migration.id, %err, "failed to unpin run_host");
    }

    match run_result {
        Ok(SupervisorOutcome::Canceled) => Ok(StepOutcome::Canceled),
        Ok(SupervisorOutcome::Completed) => {
            ctx.coordinator.next_step(migration.id).await?;
            Ok(StepOutcome::Advanced)
        }
        Err(err) => Err(MigrationError::Supervisor(err)),
    }
}

async fn run_rename(ctx: &JobContext, db: &DbClient, migration: &Migration) -> Result<StepOutcome, MigrationError> {
    let cached_state = ctx.coordinator.get_file(migration.id, FileType::State).await?;
    if !cached_state.is_empty() {
        if let Err(err) = write_local_file(&migration.state_file, &cached_state).await {
            warn!(migration_id = migration.id, %err, "failed to cache statefile locally before rename");
        }
    }

    let old_name = swap_osc_tables(db, migration).await?;
    drop_triggers(db, &migration.database, &old_name).await?;

    if migration.pending_drops_db != migration.database {
        move_to_pending_drops(db, &migration.database, &migration.pending_drops_db, &old_name, &old_name).await?;
    }

    let stats = collect_table_stats(db, migration).await?;
    let mut fields = HashMap::new();
    fields.insert("table_rows_end".to_string(), stats.table_rows);
    fields.insert("table_size_end".to_string(), stats.table_size);
    fields.insert("index_size_end".to_string(), stats.index_size);
    ctx.coordinator.update(migration.id, fields).await?;

    maybe_final_insert(db, migration).await?;
    ctx.coordinator.complete(migration.id).await?;
    Ok(StepOutcome::Completed)
}

async fn run_pause(ctx: &JobContext, migration: &Migration) -> Result<StepOutcome, MigrationError> {
    osc_supervisor::kill_helper(&ctx.registry, migration.id).await?;

    if let Some(contents) = read_local_file(&migration.state_file).await {
        ctx.coordinator.write_file(migration.id, FileType::State, &contents).await?;
    }

    ctx.coordinator.next_step(migration.id).await?;
    info!(migration_id = migration.id, "paused");
    Ok(StepOutcome::Advanced)
}

async fn run_cancel(ctx: &JobContext, db: &DbClient, migration: &Migration) -> Result<StepOutcome, MigrationError> {
    osc_supervisor::kill_helper(&ctx.registry, migration.id).await?;

    let cached_state = ctx.coordinator.get_file(migration.id, FileType::State).await?;
    if !cached_state.is_empty() {
        if let Err(err) = write_local_file(&migration.state_file, &cached_state).await {
            warn!(migration_id = migration.id, %err, "failed to refresh local statefile before cancel cleanup");
        }
    }

    crate::migration_ops::clean_up(db, migration).await?;
    info!(migration_id = migration.id, "canceled");
    Ok(StepOutcome::Canceled)
}
