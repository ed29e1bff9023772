use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::error::SupervisorError;

/// A log line captured at the moment it arrived on stdio, already
/// timestamped so replication ordering survives even if the replicator
/// task is delayed relative to capture (spec.md §5 ordering guarantee).
pub type LogLine = (chrono::DateTime<Local>, String);

fn copy_percent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Copying `.*`\.`.*`: +([0-9]|[1-9][0-9]|100)% .*").expect("static regex compiles")
    })
}

fn waiting_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Replica.*Waiting\.$").expect("static regex compiles"))
}

fn pausing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^Pausing because.*").expect("static regex compiles"))
}

/// Extracts an integer copy-percent (0..=100) from a `Copying ...` stderr
/// line, field index 2 of the whitespace split with the trailing `%`
/// stripped. Non-matching lines pass through with `None`.
pub fn parse_copy_percent(line: &str) -> Option<u8> {
    if !copy_percent_regex().is_match(line) {
        return None;
    }
    let field = line.split_whitespace().nth(2)?;
    field.trim_end_matches('%').parse::<u8>().ok()
}

/// Acceptable terminal lines for the RUN-step stderr stream: the copy-%
/// pattern, a replica-waiting line, or a pause announcement, all
/// case-insensitive for the latter two.
pub fn is_acceptable_terminator(line: &str) -> bool {
    copy_percent_regex().is_match(line) || waiting_regex().is_match(line) || pausing_regex().is_match(line)
}

async fn read_lines<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<String>, std::io::Error> {
    let mut lines = Vec::new();
    let mut buf = BufReader::new(reader).lines();
    while let Some(line) = buf.next_line().await? {
        lines.push(line);
    }
    Ok(lines)
}

/// stdout reader: every line forwarded as `stdout: <line>`.
pub async fn drain_stdout<R: AsyncRead + Unpin>(
    reader: R,
    log_tx: mpsc::Sender<LogLine>,
) -> Result<(), SupervisorError> {
    let lines = read_lines(reader).await.map_err(SupervisorError::PtOscStdout)?;
    for line in lines {
        let _ = log_tx.send((Local::now(), format!("stdout: {line}"))).await;
    }
    Ok(())
}

/// stderr reader for non-copy steps (PREP dry run, anything other than
/// RUN): every line forwarded as `stderr: <line>`; any line at all is an
/// error.
pub async fn drain_stderr_plain<R: AsyncRead + Unpin>(
    reader: R,
    log_tx: mpsc::Sender<LogLine>,
) -> Result<(), SupervisorError> {
    let lines = read_lines(reader).await.map_err(SupervisorError::PtOscStderrIo)?;
    let saw_any = !lines.is_empty();
    for line in &lines {
        let _ = log_tx.send((Local::now(), format!("stderr: {line}"))).await;
    }
    if saw_any {
        return Err(SupervisorError::PtOscUnexpectedStderr);
    }
    Ok(())
}

/// stderr reader for the RUN step: logs every line, emits copy-percent
/// values as they're observed, and validates the final line against
/// `is_acceptable_terminator` once EOF is reached. Zero lines is
/// acceptable (a very fast migration).
pub async fn drain_stderr_run<R: AsyncRead + Unpin>(
    reader: R,
    log_tx: mpsc::Sender<LogLine>,
    copy_tx: mpsc::Sender<u8>,
) -> Result<(), SupervisorError> {
    let lines = read_lines(reader).await.map_err(SupervisorError::PtOscStderrIo)?;

    for line in &lines {
        let _ = log_tx.send((Local::now(), format!("stderr: {line}"))).await;
        if let Some(pct) = parse_copy_percent(line) {
            let _ = copy_tx.send(pct).await;
        }
    }

    if let Some(last) = lines.last() {
        if !is_acceptable_terminator(last) {
            return Err(SupervisorError::PtOscUnexpectedStderr);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_copy_percent_values() {
        assert_eq!(
            parse_copy_percent("Copying `db`.`table`:   6% 04:21 remain"),
            Some(6)
        );
        assert_eq!(
            parse_copy_percent("Copying `db`.`table`:   72% 01:21 remain"),
            Some(72)
        );
        assert_eq!(
            parse_copy_percent("Copying `db`.`table`:   100% 00:00 remain"),
            Some(100)
        );
    }

    #[test]
    fn rejects_out_of_range_percent() {
        assert_eq!(parse_copy_percent("Copying `db`.`table`:   101% 00:00 remain"), None);
    }

    #[test]
    fn non_matching_lines_pass_through_without_percent() {
        assert_eq!(parse_copy_percent("line one"), None);
    }

    #[test]
    fn terminator_accepts_copy_waiting_and_pausing() {
        assert!(is_acceptable_terminator("Copying `db`.`table`:   72% 01:21 remain"));
        assert!(is_acceptable_terminator("Replica is Waiting."));
        assert!(is_acceptable_terminator("replica is waiting."));
        assert!(is_acceptable_terminator("Pausing because Threads_running=130"));
    }

    #[test]
    fn terminator_rejects_arbitrary_lines() {
        assert!(!is_acceptable_terminator("not expected"));
    }
}
