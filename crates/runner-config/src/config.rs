use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

fn env_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex compiles"))
}

/// Replaces every `${NAME}` occurrence in `raw` with the matching
/// environment variable, or an empty string if unset.
fn expand_env(raw: &str) -> String {
    env_token_regex()
        .replace_all(raw, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Replaces the literal token `%hostname%` with `hostname` in `value`.
fn expand_hostname(value: &str, hostname: &str) -> String {
    value.replace("%hostname%", hostname)
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    pub rest_api: String,
    #[serde(default)]
    pub rest_cert: Option<String>,
    #[serde(default)]
    pub rest_key: Option<String>,

    pub mysql_user: String,
    pub mysql_password: String,
    #[serde(default)]
    pub mysql_cert: Option<String>,
    #[serde(default)]
    pub mysql_key: Option<String>,
    #[serde(default, rename = "mysql_rootCA")]
    pub mysql_root_ca: Option<String>,
    pub mysql_defaults_file: String,

    pub log_dir: String,
    #[serde(default)]
    pub pending_drops_db: String,
    pub pt_osc_path: String,

    #[serde(default)]
    pub host_override: Option<String>,
    #[serde(default)]
    pub port_override: Option<u16>,
    #[serde(default)]
    pub database_override: Option<String>,

    #[serde(default = "default_sync_interval")]
    pub log_sync_interval: u64,
    #[serde(default = "default_sync_interval")]
    pub state_sync_interval: u64,

    pub stop_file_path: String,
}

fn default_sync_interval() -> u64 {
    5
}

impl RunnerConfig {
    /// Reads `path`, applies `${NAME}` environment expansion to the raw
    /// text, then parses the YAML. Certificate/key paths still contain any
    /// literal `%hostname%` token at this point; call `resolve_hostname`
    /// once the local hostname is known.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let expanded = expand_env(&raw);
        serde_yaml::from_str(&expanded).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Substitutes `%hostname%` into every cert/key path field.
    pub fn resolve_hostname(&mut self, hostname: &str) {
        for field in [&mut self.rest_cert, &mut self.rest_key, &mut self.mysql_cert, &mut self.mysql_key, &mut self.mysql_root_ca] {
            if let Some(value) = field {
                *value = expand_hostname(value, hostname);
            }
        }
    }
}

/// `ENVIRONMENT` selects `<config_dir>/<env>-config.yaml`; unset defaults to
/// `development`.
pub fn resolve_config_path(config_dir: &Path) -> PathBuf {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
    config_dir.join(format!("{environment}-config.yaml"))
}

/// Writes `[client]` with `user`/`password` and, if supplied, `ssl-ca`/
/// `ssl-cert`/`ssl-key`, but only when the file does not already exist
/// (spec.md §4.6 startup sequence).
pub fn write_mysql_defaults_file_if_missing(
    path: &str,
    user: &str,
    password: &str,
    ca_path: Option<&str>,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<(), ConfigError> {
    if std::path::Path::new(path).exists() {
        return Ok(());
    }

    let mut contents = format!("[client]\nuser={user}\npassword={password}\n");
    if let Some(ca) = ca_path {
        contents.push_str(&format!("ssl-ca={ca}\n"));
    }
    if let Some(cert) = cert_path {
        contents.push_str(&format!("ssl-cert={cert}\n"));
    }
    if let Some(key) = key_path {
        contents.push_str(&format!("ssl-key={key}\n"));
    }

    std::fs::write(path, contents).map_err(|source| ConfigError::WriteDefaultsFile {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn expands_env_tokens_before_parsing() {
        unsafe {
            std::env::set_var("RUNNER_CONFIG_TEST_USER", "alice");
        }
        let raw = r#"
rest_api: https://coordinator.internal
mysql_user: ${RUNNER_CONFIG_TEST_USER}
mysql_password: secret
mysql_defaults_file: /etc/my.cnf
log_dir: /var/log/runner
pt_osc_path: /usr/bin/pt-online-schema-change
stop_file_path: /tmp/stop
"#;
        let file = write_temp(raw);
        let config = RunnerConfig::load(file.path()).unwrap();
        assert_eq!(config.mysql_user, "alice");
        assert_eq!(config.log_sync_interval, 5);
    }

    #[test]
    fn resolve_hostname_substitutes_token_in_cert_paths() {
        let mut config = RunnerConfig {
            rest_api: "https://x".into(),
            rest_cert: Some("/certs/%hostname%/rest.pem".into()),
            rest_key: None,
            mysql_user: "u".into(),
            mysql_password: "p".into(),
            mysql_cert: None,
            mysql_key: None,
            mysql_root_ca: None,
            mysql_defaults_file: "/etc/my.cnf".into(),
            log_dir: "/var/log".into(),
            pending_drops_db: String::new(),
            pt_osc_path: "/usr/bin/pt-osc".into(),
            host_override: None,
            port_override: None,
            database_override: None,
            log_sync_interval: 5,
            state_sync_interval: 5,
            stop_file_path: "/tmp/stop".into(),
        };
        config.resolve_hostname("db-node-1");
        assert_eq!(config.rest_cert.unwrap(), "/certs/db-node-1/rest.pem");
    }

    #[test]
    fn resolve_config_path_defaults_to_development() {
        unsafe {
            std::env::remove_var("ENVIRONMENT");
        }
        let path = resolve_config_path(Path::new("/srv/app/config"));
        assert_eq!(path, Path::new("/srv/app/config/development-config.yaml"));
    }

    #[test]
    fn writes_defaults_file_only_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my.cnf");
        write_mysql_defaults_file_if_missing(path.to_str().unwrap(), "u", "p", Some("/ca.pem"), None, None).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("user=u"));
        assert!(contents.contains("ssl-ca=/ca.pem"));

        std::fs::write(&path, "untouched").unwrap();
        write_mysql_defaults_file_if_missing(path.to_str().unwrap(), "u", "p", None, None, None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "untouched");
    }
}
