use chrono::Utc;
use db_client::{DbClient, DbParam, TlsConfig};
use model::Migration;

use crate::error::MigrationError;

/// pt-online-schema-change's fixed naming convention for the shadow table
/// it builds alongside the original.
fn shadow_table(table: &str) -> String {
    format!("_{table}_new")
}

pub async fn setup_db_client(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    tls: Option<&TlsConfig>,
) -> Result<DbClient, MigrationError> {
    DbClient::connect(host, port, user, password, tls)
        .await
        .map_err(MigrationError::DbConnect)
}

/// Queries `information_schema.tables` for the exact target and requires
/// all three expected columns present with cardinality exactly 1.
pub async fn collect_table_stats(db: &DbClient, migration: &Migration) -> Result<model::TableStats, MigrationError> {
    let sql = "SELECT TABLE_ROWS, DATA_LENGTH, INDEX_LENGTH FROM information_schema.tables \
               WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?";
    let args = [DbParam::from(migration.database.as_str()), DbParam::from(migration.table.as_str())];
    let columns = db.query_columns(sql, &args).await?;

    let one = |name: &'static str| -> Result<String, MigrationError> {
        let values = columns.get(name).ok_or_else(|| MigrationError::TableStats {
            database: migration.database.clone(),
            table: migration.table.clone(),
            got: 0,
        })?;
        if values.len() != 1 {
            return Err(MigrationError::TableStats {
                database: migration.database.clone(),
                table: migration.table.clone(),
                got: values.len(),
            });
        }
        Ok(values[0].clone())
    };

    Ok(model::TableStats {
        table_rows: one("TABLE_ROWS")?,
        table_size: one("DATA_LENGTH")?,
        index_size: one("INDEX_LENGTH")?,
    })
}

pub async fn validate_final_insert(db: &DbClient, insert: &str) -> Result<(), MigrationError> {
    if !Migration::final_insert_is_well_formed(insert) {
        return Err(MigrationError::InvalidInsert);
    }
    db.validate_insert(insert, &[]).await.map_err(MigrationError::QueryFailed)
}

/// Asserts the target doesn't already exist, runs the DDL, then drops it.
pub async fn dry_run_creates_new(db: &DbClient, migration: &Migration) -> Result<(), MigrationError> {
    let sql = "SELECT COUNT(*) AS c FROM information_schema.tables WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?";
    let args = [DbParam::from(migration.database.as_str()), DbParam::from(migration.table.as_str())];
    let columns = db.query_columns(sql, &args).await?;
    let exists = columns
        .get("c")
        .and_then(|v| v.first())
        .map(|v| v != "0")
        .unwrap_or(false);
    if exists {
        return Err(MigrationError::DryRunCreatesNew(format!("{}.{}", migration.database, migration.table)));
    }

    db.execute(&migration.ddl, &[]).await?;

    let drop_sql = format!(
        "DROP {} `{}`.`{}`",
        if migration.mode == model::Mode::View { "VIEW" } else { "TABLE" },
        migration.database,
        migration.table
    );
    db.execute(&drop_sql, &[]).await?;
    Ok(())
}

pub async fn direct_drop(db: &DbClient, migration: &Migration) -> Result<(), MigrationError> {
    let verb = if migration.mode == model::Mode::View { "VIEW" } else { "TABLE" };
    let sql = format!("DROP {verb} `{}`.`{}`", migration.database, migration.table);
    db.execute(&sql, &[]).await?;
    Ok(())
}

/// Atomically `RENAME TABLE original -> timestamped_original, shadow -> original`.
/// Returns the timestamp-prefixed old name.
pub async fn swap_osc_tables(db: &DbClient, migration: &Migration) -> Result<String, MigrationError> {
    let old_name = Migration::timestamped(&migration.table, Utc::now());
    let shadow = shadow_table(&migration.table);
    let sql = format!(
        "RENAME TABLE `{db}`.`{table}` TO `{db}`.`{old}`, `{db}`.`{shadow}` TO `{db}`.`{table}`",
        db = migration.database,
        table = migration.table,
        old = old_name,
        shadow = shadow,
    );
    db.execute(&sql, &[]).await?;
    Ok(old_name)
}

/// Enumerates triggers on `database.table` and drops each with `IF EXISTS`,
/// making the operation idempotent.
pub async fn drop_triggers(db: &DbClient, database: &str, table: &str) -> Result<(), MigrationError> {
    let sql = "SELECT TRIGGER_NAME FROM information_schema.TRIGGERS \
               WHERE TRIGGER_SCHEMA = ? AND EVENT_OBJECT_TABLE = ?";
    let args = [DbParam::from(database), DbParam::from(table)];
    let columns = db.query_columns(sql, &args).await?;
    let Some(names) = columns.get("TRIGGER_NAME") else {
        return Ok(());
    };
    for name in names {
        let drop_sql = format!("DROP TRIGGER IF EXISTS `{database}`.`{name}`");
        db.execute(&drop_sql, &[]).await?;
    }
    Ok(())
}

/// `RENAME TABLE <db>.<src> TO <pending_drops_db>.<dst>`.
pub async fn move_to_pending_drops(
    db: &DbClient,
    database: &str,
    pending_drops_db: &str,
    src: &str,
    dst: &str,
) -> Result<(), MigrationError> {
    let sql = format!("RENAME TABLE `{database}`.`{src}` TO `{pending_drops_db}`.`{dst}`");
    db.execute(&sql, &[]).await?;
    Ok(())
}

/// Drops triggers for the original, then moves the shadow table into
/// `pending_drops_db` under a timestamped name. The second rename fails
/// once the shadow is already gone, which is the documented non-idempotent
/// half of this operation (spec.md §8).
pub async fn clean_up(db: &DbClient, migration: &Migration) -> Result<(), MigrationError> {
    drop_triggers(db, &migration.database, &migration.table).await?;
    let shadow = shadow_table(&migration.table);
    let dst = Migration::timestamped(&shadow, Utc::now());
    move_to_pending_drops(db, &migration.database, &migration.pending_drops_db, &shadow, &dst).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_table_uses_pt_osc_naming_convention() {
        assert_eq!(shadow_table("users"), "_users_new");
    }
}
