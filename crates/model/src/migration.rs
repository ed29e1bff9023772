use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunType {
    Short,
    Long,
    NocheckAlter,
}

impl RunType {
    pub fn as_wire(self) -> i64 {
        match self {
            RunType::Short => 0,
            RunType::Long => 1,
            RunType::NocheckAlter => 2,
        }
    }

    pub fn from_wire(wire: i64) -> Option<Self> {
        match wire {
            0 => Some(RunType::Short),
            1 => Some(RunType::Long),
            2 => Some(RunType::NocheckAlter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Table,
    View,
}

impl Mode {
    pub fn as_wire(self) -> i64 {
        match self {
            Mode::Table => 0,
            Mode::View => 1,
        }
    }

    pub fn from_wire(wire: i64) -> Option<Self> {
        match wire {
            0 => Some(Mode::Table),
            1 => Some(Mode::View),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    Drop,
    Alter,
}

impl Action {
    pub fn as_wire(self) -> i64 {
        match self {
            Action::Create => 0,
            Action::Drop => 1,
            Action::Alter => 2,
        }
    }

    pub fn from_wire(wire: i64) -> Option<Self> {
        match wire {
            0 => Some(Action::Create),
            1 => Some(Action::Drop),
            2 => Some(Action::Alter),
            _ => None,
        }
    }
}

/// Helper-tuning keys a coordinator operator may set per migration. Any key
/// outside this recognized set is preserved verbatim but never consulted by
/// argv construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomOptions(pub HashMap<String, String>);

impl CustomOptions {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn max_threads_running(&self) -> Option<&str> {
        self.get("max_threads_running")
    }

    pub fn max_replication_lag(&self) -> Option<&str> {
        self.get("max_replication_lag")
    }

    pub fn config_path(&self) -> Option<&str> {
        self.get("config_path")
    }

    pub fn recursion_method(&self) -> Option<&str> {
        self.get("recursion_method")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStats {
    pub table_rows: String,
    pub table_size: String,
    pub index_size: String,
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub id: i64,
    pub status: Status,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub table: String,
    pub ddl: String,
    pub final_insert: Option<String>,
    pub run_type: RunType,
    pub mode: Mode,
    pub action: Action,
    pub pending_drops_db: String,
    pub custom_options: CustomOptions,
    pub files_dir: String,
    pub state_file: String,
    pub log_file: String,
    pub pid: Option<u32>,
}

fn final_insert_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^INSERT\s+INTO\s+[^;]+$").expect("static regex compiles"))
}

impl Migration {
    /// Deterministic on-disk paths for a freshly claimed migration, rooted
    /// at `log_dir`. `pending_drops_db` defaults to `database` when the
    /// coordinator record left it empty (invariant from spec.md §3).
    pub fn derive_paths(log_dir: &str, id: i64) -> (String, String, String) {
        let files_dir = format!("{log_dir}/id-{id}");
        let state_file = format!("{files_dir}/statefile.txt");
        let log_file = format!("{files_dir}/ptosc-output.log");
        (files_dir, state_file, log_file)
    }

    pub fn normalize_pending_drops_db(&mut self) {
        if self.pending_drops_db.is_empty() {
            self.pending_drops_db = self.database.clone();
        }
    }

    /// `^INSERT\s+INTO\s+[^;]+$`, case-insensitive, no trailing semicolon.
    pub fn final_insert_is_well_formed(insert: &str) -> bool {
        final_insert_regex().is_match(insert)
    }

    /// Prefix `table` with `YYYYMMDDhhmmssSSS_` and clip the concatenation
    /// (not the prefix or the name individually) to 64 bytes. Clipping after
    /// concatenation is the edge case spec.md §4.4 calls out explicitly.
    pub fn timestamped(table: &str, now: chrono::DateTime<chrono::Utc>) -> String {
        let prefix = now.format("%Y%m%d%H%M%S%3f").to_string();
        let mut combined = format!("{prefix}_{table}");
        combined.truncate(64);
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn final_insert_accepts_well_formed_statement() {
        assert!(Migration::final_insert_is_well_formed(
            "insert into t (a) values (1)"
        ));
        assert!(Migration::final_insert_is_well_formed(
            "INSERT INTO t (a) VALUES (1)"
        ));
    }

    #[test]
    fn final_insert_rejects_trailing_semicolon_and_other_verbs() {
        assert!(!Migration::final_insert_is_well_formed(
            "insert into t (a) values (1);"
        ));
        assert!(!Migration::final_insert_is_well_formed("update t set a=1"));
    }

    #[test]
    fn timestamped_clips_after_concatenation_to_64_chars() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let name = "x".repeat(59);
        let out = Migration::timestamped(&name, now);
        assert_eq!(out.len(), 64);
        assert!(regex::Regex::new(r"^\d{17}_").unwrap().is_match(&out));
    }

    #[test]
    fn timestamped_of_timestamped_stays_within_budget() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let once = Migration::timestamped("orig", now);
        let twice = Migration::timestamped(&once, now);
        assert!(twice.len() <= 64);
        assert!(regex::Regex::new(r"^\d{17}_").unwrap().is_match(&twice));
    }
}
