use std::sync::OnceLock;

use model::Migration;
use regex::Regex;

fn alter_table_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^\s*ALTER\s+TABLE\s+\S+\s*").expect("static regex compiles")
    })
}

/// Strips the leading `ALTER TABLE <name>` (case-insensitive,
/// whitespace-tolerant) from `ddl`, yielding the bare alter clause the
/// helper expects after its own `--alter` flag.
pub fn bare_alter_clause(ddl: &str) -> String {
    alter_table_prefix().replace(ddl, "").trim().to_string()
}

fn table_spec(migration: &Migration) -> String {
    format!("D={},t={}", migration.database, migration.table)
}

/// `--alter <clause> --dry-run -h <host> -P <port> --defaults-file <creds> D=<db>,t=<table>`
pub fn build_dry_run_argv(migration: &Migration, defaults_file: &str) -> Vec<String> {
    let clause = bare_alter_clause(&migration.ddl);
    vec![
        "--alter".into(),
        clause,
        "--dry-run".into(),
        "-h".into(),
        migration.host.clone(),
        "-P".into(),
        migration.port.to_string(),
        "--defaults-file".into(),
        defaults_file.into(),
        table_spec(migration),
    ]
}

/// Full RUN argv, in the deterministic order spec.md §4.5 requires for test
/// stability. `state_file_exists` is passed in rather than stat'd here so
/// callers can keep argv construction pure and synchronous.
pub fn build_run_argv(migration: &Migration, defaults_file: &str, state_file_exists: bool) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(config_path) = migration.custom_options.config_path() {
        args.push("--config".to_string());
        args.push(config_path.to_string());
    } else {
        let max_threads_running = migration.custom_options.max_threads_running().unwrap_or("200");
        let max_replication_lag = migration.custom_options.max_replication_lag().unwrap_or("1");
        args.push("--max-load".into());
        args.push("Threads_running=125".into());
        args.push("--critical-load".into());
        args.push(format!("Threads_running={max_threads_running}"));
        args.push("--tries".into());
        args.push("create_triggers:200:1,copy_rows:10000:1".into());
        args.push("--max-lag".into());
        args.push(max_replication_lag.to_string());
        args.push("--set-vars".into());
        args.push("wait_timeout=600,lock_wait_timeout=1".into());
    }

    let clause = bare_alter_clause(&migration.ddl);
    args.push("--alter".into());
    args.push(clause);
    args.push("--execute".into());
    args.push("-h".into());
    args.push(migration.host.clone());
    args.push("-P".into());
    args.push(migration.port.to_string());
    args.push("--defaults-file".into());
    args.push(defaults_file.into());
    args.push("--progress".into());
    args.push("time,5".into());
    args.push("--exit-at".into());
    args.push("copy".into());
    args.push("--save-state".into());
    args.push(migration.state_file.clone());

    if state_file_exists {
        args.push("--load-state".into());
        args.push(migration.state_file.clone());
    }

    if migration.run_type == model::RunType::NocheckAlter {
        args.push("--nocheck-alter".into());
    }

    if let Some(recursion_method) = migration.custom_options.recursion_method() {
        args.push("--recursion-method".into());
        args.push(recursion_method.to_string());
    }

    args.push(table_spec(migration));
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{Action, CustomOptions, Migration, Mode, RunType, Status};
    use std::collections::HashMap;

    fn base_migration() -> Migration {
        Migration {
            id: 1,
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
            files_dir: "/tmp/id-1".into(),
            state_file: "/tmp/id-1/statefile.txt".into(),
            log_file: "/tmp/id-1/ptosc-output.log".into(),
            pid: None,
        }
    }

    #[test]
    fn strips_alter_table_prefix_case_insensitively() {
        assert_eq!(bare_alter_clause("alter table Users add column foo int"), "add column foo int");
        assert_eq!(
            bare_alter_clause("ALTER   TABLE   users ADD COLUMN foo INT"),
            "ADD COLUMN foo INT"
        );
    }

    #[test]
    fn dry_run_argv_matches_spec_order() {
        let migration = base_migration();
        let argv = build_dry_run_argv(&migration, "/etc/creds.cnf");
        assert_eq!(
            argv,
            vec![
                "--alter", "ADD COLUMN foo INT", "--dry-run", "-h", "db1", "-P", "3306",
                "--defaults-file", "/etc/creds.cnf", "D=appdb,t=users",
            ]
        );
    }

    #[test]
    fn run_argv_defaults_when_no_custom_options() {
        let migration = base_migration();
        let argv = build_run_argv(&migration, "/etc/creds.cnf", false);
        assert_eq!(argv[0], "--max-load");
        assert!(argv.contains(&"Threads_running=200".to_string()));
        assert!(argv.contains(&"--max-lag".to_string()));
        assert_eq!(argv.last().unwrap(), "D=appdb,t=users");
        assert!(!argv.contains(&"--load-state".to_string()));
        assert!(!argv.contains(&"--nocheck-alter".to_string()));
    }

    #[test]
    fn run_argv_uses_config_path_when_set() {
        let mut migration = base_migration();
        migration
            .custom_options
            .0
            .insert("config_path".into(), "/etc/pt-osc.conf".into());
        let argv = build_run_argv(&migration, "/etc/creds.cnf", false);
        assert_eq!(argv[0], "--config");
        assert_eq!(argv[1], "/etc/pt-osc.conf");
        assert!(!argv.contains(&"--max-load".to_string()));
    }

    #[test]
    fn run_argv_appends_load_state_when_file_exists() {
        let migration = base_migration();
        let argv = build_run_argv(&migration, "/etc/creds.cnf", true);
        let idx = argv.iter().position(|a| a == "--load-state").unwrap();
        assert_eq!(argv[idx + 1], migration.state_file);
    }

    #[test]
    fn run_argv_appends_nocheck_alter_for_that_run_type() {
        let mut migration = base_migration();
        migration.run_type = RunType::NocheckAlter;
        let argv = build_run_argv(&migration, "/etc/creds.cnf", false);
        assert!(argv.contains(&"--nocheck-alter".to_string()));
    }
}
