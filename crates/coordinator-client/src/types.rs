use std::collections::HashMap;

use model::{Action, CustomOptions, Migration, Mode, RunType, Status};
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

/// Wire shape of a coordinator migration record. `id` is optional because
/// `Unstage`'s "stolen" response omits it entirely (spec.md §4.2) — every
/// other endpoint that returns a record is expected to carry one.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MigrationRecord {
    pub id: Option<i64>,
    pub status: Option<i64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub table: Option<String>,
    pub ddl: Option<String>,
    pub final_insert: Option<String>,
    pub run_type: Option<i64>,
    pub mode: Option<i64>,
    pub action: Option<i64>,
    #[serde(default)]
    pub pending_drops_db: String,
    #[serde(default)]
    pub custom_options: HashMap<String, String>,
    pub run_host: Option<String>,
}

impl MigrationRecord {
    pub fn into_migration(self, op: &'static str, log_dir: &str) -> Result<Migration, CoordinatorError> {
        let id = self.id.ok_or(CoordinatorError::InvalidMigration {
            op,
            source: serde::de::Error::custom("missing id"),
        })?;

        let status = Status::from_wire(self.status.unwrap_or_default())
            .map_err(|e| CoordinatorError::InvalidMigration {
                op,
                source: serde::de::Error::custom(e.to_string()),
            })?;
        let run_type = RunType::from_wire(self.run_type.unwrap_or_default()).ok_or_else(|| {
            CoordinatorError::InvalidMigration {
                op,
                source: serde::de::Error::custom("unknown run_type"),
            }
        })?;
        let mode = Mode::from_wire(self.mode.unwrap_or_default()).ok_or_else(|| {
            CoordinatorError::InvalidMigration {
                op,
                source: serde::de::Error::custom("unknown mode"),
            }
        })?;
        let action = Action::from_wire(self.action.unwrap_or_default()).ok_or_else(|| {
            CoordinatorError::InvalidMigration {
                op,
                source: serde::de::Error::custom("unknown action"),
            }
        })?;

        let database = self.database.unwrap_or_default();
        let mut pending_drops_db = self.pending_drops_db;
        if pending_drops_db.is_empty() {
            pending_drops_db = database.clone();
        }

        let (files_dir, state_file, log_file) = Migration::derive_paths(log_dir, id);

        Ok(Migration {
            id,
            status,
            host: self.host.unwrap_or_default(),
            port: self.port.unwrap_or(3306),
            database,
            table: self.table.unwrap_or_default(),
            ddl: self.ddl.unwrap_or_default(),
            final_insert: self.final_insert.filter(|s| !s.is_empty()),
            run_type,
            mode,
            action,
            pending_drops_db,
            custom_options: CustomOptions(self.custom_options),
            files_dir,
            state_file,
            log_file,
            pid: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    State,
}

impl FileType {
    pub fn as_wire(self) -> &'static str {
        match self {
            FileType::Log => "0",
            FileType::State => "1",
        }
    }
}

/// Wire shape of `GetFile`'s response. `contents` defaults to empty for a
/// file the coordinator has never received (spec.md §4.2).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileRecord {
    pub migration_id: Option<i64>,
    pub file_type: Option<String>,
    #[serde(default)]
    pub contents: String,
}
