//! The audit sink: bounded queue, single writer task.

use crate::{rotation, AuditKind, AuditRecord, AuditResult};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

/// Output records are capped at this many characters.
const OUTPUT_CEILING_CHARS: usize = 500;

/// Queue depth. Full means drop, never block.
const QUEUE_CAPACITY: usize = 256;

/// Rotation check cadence once running.
const ROTATION_INTERVAL_SECS: u64 = 60 * 60;

enum Msg {
    Record(AuditRecord),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit pipeline. Cheap to clone; a disabled sink accepts
/// and discards everything.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<Msg>>,
}

impl AuditSink {
    /// A sink that drops all records (audit logging disabled).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start the writer task. Rotation runs immediately, then hourly.
    pub fn start(path: PathBuf, retention_days: u32) -> AuditResult<Self> {
        if let Err(err) = rotation::rotate_if_stale(&path, retention_days) {
            warn!(error = %err, "Audit rotation failed at startup");
        }
        if let Err(err) = rotation::prune_archives(&path, retention_days) {
            warn!(error = %err, "Audit archive pruning failed at startup");
        }

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(writer_task(path, retention_days, rx));

        Ok(Self { tx: Some(tx) })
    }

    /// Record a committed command. Commands are never truncated.
    pub fn command(&self, session_id: &str, client_label: &str, command: &str) {
        self.push(AuditRecord::now(
            session_id,
            client_label,
            AuditKind::Command,
            command.to_string(),
        ));
    }

    /// Record a terminal output chunk, capped at the output ceiling.
    pub fn output(&self, session_id: &str, client_label: &str, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let capped: String = text.chars().take(OUTPUT_CEILING_CHARS).collect();
        self.push(AuditRecord::now(
            session_id,
            client_label,
            AuditKind::Output,
            capped,
        ));
    }

    /// Record a connection lifecycle event with its cause.
    pub fn connection(&self, session_id: &str, client_label: &str, event: &str) {
        self.push(AuditRecord::now(
            session_id,
            client_label,
            AuditKind::Connection,
            event.to_string(),
        ));
    }

    /// Wait until everything enqueued so far has hit the file. Test seam.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else { return };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(Msg::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    fn push(&self, record: AuditRecord) {
        let Some(tx) = &self.tx else { return };
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(Msg::Record(record)) {
            warn!("Audit queue full, dropping record");
        }
    }
}

async fn writer_task(path: PathBuf, retention_days: u32, mut rx: mpsc::Receiver<Msg>) {
    let mut rotation_timer =
        tokio::time::interval(std::time::Duration::from_secs(ROTATION_INTERVAL_SECS));
    // The first tick fires immediately; rotation already ran at startup.
    rotation_timer.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(Msg::Record(record)) => {
                        if let Err(err) = append_record(&path, &record) {
                            error!(error = %err, "Failed to append audit record");
                        }
                    }
                    Some(Msg::Flush(ack)) => {
                        let _ = ack.send(());
                    }
                    None => break,
                }
            }
            _ = rotation_timer.tick() => {
                if let Err(err) = rotation::rotate_if_stale(&path, retention_days) {
                    warn!(error = %err, "Periodic audit rotation failed");
                }
                if let Err(err) = rotation::prune_archives(&path, retention_days) {
                    warn!(error = %err, "Periodic audit pruning failed");
                }
            }
        }
    }
}

fn append_record(path: &PathBuf, record: &AuditRecord) -> AuditResult<()> {
    let existed = path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if !existed {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_records_land_as_json_lines() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let sink = AuditSink::start(log.clone(), 30).unwrap();

        sink.command("s1", "Phone A", "echo hi");
        sink.connection("s1", "Phone A", "established");
        sink.flush().await;

        let content = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, AuditKind::Command);
        assert_eq!(first.payload, "echo hi");
    }

    #[tokio::test]
    async fn test_output_is_capped_commands_are_not() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let sink = AuditSink::start(log.clone(), 30).unwrap();

        let long = "x".repeat(2000);
        sink.output("s1", "Phone A", long.as_bytes());
        sink.command("s1", "Phone A", &long);
        sink.flush().await;

        let content = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        let output: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(output.payload.chars().count(), 500);

        let command: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(command.payload.chars().count(), 2000);
    }

    #[tokio::test]
    async fn test_file_mode_is_owner_only() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let sink = AuditSink::start(log.clone(), 30).unwrap();

        sink.connection("s1", "Phone A", "established");
        sink.flush().await;

        let mode = std::fs::metadata(&log).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_disabled_sink_writes_nothing() {
        let sink = AuditSink::disabled();
        sink.command("s1", "Phone A", "echo hi");
        sink.flush().await;
        // Nothing to assert on disk; the call simply must not panic.
    }

    #[tokio::test]
    async fn test_lossy_output_bytes_do_not_poison_the_log() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let sink = AuditSink::start(log.clone(), 30).unwrap();

        sink.output("s1", "Phone A", &[0xff, 0xfe, b'o', b'k']);
        sink.flush().await;

        let content = std::fs::read_to_string(&log).unwrap();
        let record: AuditRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert!(record.payload.contains("ok"));
    }
}
