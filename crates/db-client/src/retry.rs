use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

/// Error code MySQL uses for "lock wait timeout exceeded; try restarting
/// transaction" (innodb_lock_wait_timeout expiry).
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;

pub fn is_lock_wait_timeout(err: &mysql_async::Error) -> bool {
    matches!(
        err,
        mysql_async::Error::Server(server_err) if server_err.code == ER_LOCK_WAIT_TIMEOUT
    )
}

pub fn is_connection_lost(err: &mysql_async::Error) -> bool {
    matches!(
        err,
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_)
    )
}

/// Bounded reopen loop used before each query, distinct from the lock-wait
/// retry below (spec.md §9 Open Question: the two loops are intentionally
/// not unified).
pub async fn randomized_backoff() {
    let millis = rand::thread_rng().gen_range(0..300);
    sleep(Duration::from_millis(millis)).await;
}

/// Retries `op` while it fails with a lock-wait timeout, up to `max_attempts`
/// total tries, sleeping 1s between attempts. Any other error returns
/// immediately.
pub async fn with_lock_wait_retry<F, Fut, T>(
    max_attempts: usize,
    mut op: F,
) -> Result<T, mysql_async::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, mysql_async::Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_lock_wait_timeout(&err) && attempt + 1 < max_attempts => {
                attempt += 1;
                tracing::warn!(attempt, max_attempts, "lock wait timeout, retrying");
                sleep(Duration::from_secs(1)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
