use mysql_async::Value as MyValue;
use mysql_async::prelude::ToValue;

/// A positional query argument. Kept as a thin enum rather than exposing
/// `mysql_async::Value` directly so callers outside this crate never need
/// the driver crate in scope.
#[derive(Debug, Clone)]
pub enum DbParam {
    Str(String),
    Int(i64),
}

impl From<&str> for DbParam {
    fn from(value: &str) -> Self {
        DbParam::Str(value.to_string())
    }
}

impl From<String> for DbParam {
    fn from(value: String) -> Self {
        DbParam::Str(value)
    }
}

impl From<i64> for DbParam {
    fn from(value: i64) -> Self {
        DbParam::Int(value)
    }
}

pub(crate) fn to_mysql_params(args: &[DbParam]) -> Vec<MyValue> {
    args.iter()
        .map(|p| match p {
            DbParam::Str(s) => s.to_value(),
            DbParam::Int(i) => i.to_value(),
        })
        .collect()
}

/// Render any MySQL column value as text, matching spec.md §4.1: "All
/// values are returned as strings; numeric coercion is the caller's
/// responsibility."
pub(crate) fn value_to_string(value: &MyValue) -> String {
    match value {
        MyValue::NULL => String::new(),
        MyValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        MyValue::Int(i) => i.to_string(),
        MyValue::UInt(u) => u.to_string(),
        MyValue::Float(f) => f.to_string(),
        MyValue::Double(d) => d.to_string(),
        other => format!("{other:?}"),
    }
}

/// Credential-free DSN suffix for log/trace fields, carrying the same
/// connect/lock-wait timeouts `DbClient::connect` sets via `OptsBuilder`.
/// Never used to actually open a connection — host, user and password stay
/// out of both the string and the logs.
pub(crate) fn make_dsn(database: &str) -> String {
    format!("/{database}?timeout=5s&lock_wait_timeout=1&innodb_lock_wait_timeout=1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_dsn_matches_fixed_timeout_suffix() {
        assert_eq!(
            make_dsn("mysqldb"),
            "/mysqldb?timeout=5s&lock_wait_timeout=1&innodb_lock_wait_timeout=1"
        );
    }
}
