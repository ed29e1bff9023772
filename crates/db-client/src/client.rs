use std::collections::HashMap;
use std::time::Duration;

use mysql_async::prelude::Queryable;
use mysql_async::{Opts, OptsBuilder, Pool, SslOpts};
use tracing::instrument;

use crate::error::DbError;
use crate::params::{DbParam, to_mysql_params, value_to_string};
use crate::retry::{is_connection_lost, randomized_backoff, with_lock_wait_retry};

/// Row set as `column_name -> ordered values`, matching spec.md §4.1's
/// "mapping column_name -> ordered list of row values".
pub type ColumnRows = HashMap<String, Vec<String>>;

/// Row set as `first_column_value -> remainder of row`, with ambiguity on
/// collisions left to the caller per spec.md §4.1.
pub type IndexedRows = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub ca_path: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

impl TlsConfig {
    fn is_complete(&self) -> bool {
        self.ca_path.is_some() && self.cert_path.is_some() && self.key_path.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RetryLimits {
    pub read_lock_wait_attempts: usize,
    pub write_lock_wait_attempts: usize,
    pub reconnect_attempts: usize,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            read_lock_wait_attempts: 10,
            write_lock_wait_attempts: 200,
            reconnect_attempts: 5,
        }
    }
}

#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
    retry: RetryLimits,
}

impl DbClient {
    #[instrument(skip(password, tls), fields(host = %host, port = port))]
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        tls: Option<&TlsConfig>,
    ) -> Result<Self, DbError> {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(host)
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .tcp_connect_timeout(Some(Duration::from_secs(5)))
            .init(vec![
                "SET wait_timeout = 600",
                "SET lock_wait_timeout = 1",
                "SET innodb_lock_wait_timeout = 1",
            ]);

        if let Some(tls) = tls {
            if tls.is_complete() {
                let ssl_opts = SslOpts::default()
                    .with_root_cert_path(tls.ca_path.clone().map(Into::into))
                    .with_pk_and_cert_path(
                        tls.cert_path.clone().unwrap_or_default(),
                        tls.key_path.clone().unwrap_or_default(),
                    );
                builder = builder.ssl_opts(Some(ssl_opts));
            }
        }

        let pool = Pool::new(Opts::from(builder));

        // Ping-validate the connection before handing it back, per spec.md
        // §4.3's `setup_db_client`.
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|source| DbError::Connect {
                host: host.to_string(),
                port,
                source,
            })?;
        conn.ping().await.map_err(|source| DbError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
        drop(conn);

        Ok(Self {
            pool,
            retry: RetryLimits::default(),
        })
    }

    pub fn with_retry_limits(mut self, retry: RetryLimits) -> Self {
        self.retry = retry;
        self
    }

    async fn get_conn_with_reopen(&self) -> Result<mysql_async::Conn, mysql_async::Error> {
        let mut attempt = 0;
        loop {
            match self.pool.get_conn().await {
                Ok(conn) => return Ok(conn),
                Err(err) if is_connection_lost(&err) && attempt + 1 < self.retry.reconnect_attempts => {
                    attempt += 1;
                    tracing::warn!(attempt, "db connection lost, reopening");
                    randomized_backoff().await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `fails with QueryFailed`.
    pub async fn query_columns(
        &self,
        sql: &str,
        args: &[DbParam],
    ) -> Result<ColumnRows, DbError> {
        let params = to_mysql_params(args);
        let rows = with_lock_wait_retry(self.retry.read_lock_wait_attempts, || {
            let sql = sql.to_string();
            let params = params.clone();
            async move {
                let mut conn = self.get_conn_with_reopen().await?;
                conn.exec::<mysql_async::Row, _, _>(sql, params).await
            }
        })
        .await
        .map_err(DbError::QueryFailed)?;

        let mut columns: ColumnRows = HashMap::new();
        for row in &rows {
            for (idx, col) in row.columns_ref().iter().enumerate() {
                let name = col.name_str().into_owned();
                let value = row.as_ref(idx).map(value_to_string).unwrap_or_default();
                columns.entry(name).or_default().push(value);
            }
        }
        Ok(columns)
    }

    /// `fails with QueryFailed`; collisions on the first column are left
    /// undefined per spec.md §4.1.
    pub async fn query_first_column_indexed(
        &self,
        sql: &str,
        args: &[DbParam],
    ) -> Result<IndexedRows, DbError> {
        let params = to_mysql_params(args);
        let rows = with_lock_wait_retry(self.retry.read_lock_wait_attempts, || {
            let sql = sql.to_string();
            let params = params.clone();
            async move {
                let mut conn = self.get_conn_with_reopen().await?;
                conn.exec::<mysql_async::Row, _, _>(sql, params).await
            }
        })
        .await
        .map_err(DbError::QueryFailed)?;

        let mut indexed = IndexedRows::new();
        for row in &rows {
            if row.columns_ref().is_empty() {
                continue;
            }
            let key = row.as_ref(0).map(value_to_string).unwrap_or_default();
            let rest: Vec<String> = (1..row.columns_ref().len())
                .map(|idx| row.as_ref(idx).map(value_to_string).unwrap_or_default())
                .collect();
            indexed.insert(key, rest);
        }
        Ok(indexed)
    }

    /// `fails with QueryFailed`.
    pub async fn execute(&self, sql: &str, args: &[DbParam]) -> Result<(), DbError> {
        let params = to_mysql_params(args);
        with_lock_wait_retry(self.retry.write_lock_wait_attempts, || {
            let sql = sql.to_string();
            let params = params.clone();
            async move {
                let mut conn = self.get_conn_with_reopen().await?;
                conn.exec_drop(sql, params).await
            }
        })
        .await
        .map_err(DbError::QueryFailed)
    }

    /// Opens a transaction, executes `sql`, then always rolls back,
    /// including on the error path. Success iff the execution succeeded.
    pub async fn validate_insert(&self, sql: &str, args: &[DbParam]) -> Result<(), DbError> {
        let params = to_mysql_params(args);
        let mut conn = self
            .get_conn_with_reopen()
            .await
            .map_err(DbError::QueryFailed)?;
        let mut tx = conn
            .start_transaction(mysql_async::TxOpts::default())
            .await
            .map_err(DbError::QueryFailed)?;

        let exec_result = tx.exec_drop(sql, params).await;

        match exec_result {
            Ok(()) => {
                tx.rollback().await.map_err(DbError::RollbackFailed)?;
                Ok(())
            }
            Err(err) => {
                // Best-effort rollback on the failure path too; the original
                // query error is what the caller sees either way.
                let _ = tx.rollback().await;
                Err(DbError::QueryFailed(err))
            }
        }
    }
}
