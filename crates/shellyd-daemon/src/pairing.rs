//! The pairing controller: one short-lived 6-digit code at a time.

use rand::Rng;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Codes are valid for this long.
const CODE_VALIDITY: Duration = Duration::from_secs(10 * 60);

/// Errors from the pairing controller.
#[derive(Error, Debug)]
pub enum PairingError {
    /// A connection-initiated attempt is already pending.
    #[error("another pairing attempt is already active")]
    AnotherAttemptActive,
}

/// Who created the active attempt. Operator attempts (CLI `pair`,
/// startup auto-activation) carry no proposed key and yield to a
/// connection's pair request; connection attempts exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Operator,
    Connection,
}

#[derive(Debug)]
struct Attempt {
    code: String,
    expires_at: Instant,
    origin: Origin,
    proposed_key: Option<String>,
    proposed_label: String,
}

impl Attempt {
    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Process-wide pairing state: at most one active attempt.
#[derive(Debug)]
pub struct PairingController {
    active: Mutex<Option<Attempt>>,
    code_file: PathBuf,
}

impl PairingController {
    /// Create a controller writing its transient code to the given path.
    pub fn new(code_file: PathBuf) -> Self {
        Self {
            active: Mutex::new(None),
            code_file,
        }
    }

    /// Operator path: draw a fresh code, replacing any prior attempt.
    pub fn generate(&self) -> String {
        let code = draw_code();
        let mut guard = self.active.lock().unwrap();
        if guard.is_some() {
            info!("Replacing previous pairing attempt");
        }
        *guard = Some(Attempt {
            code: code.clone(),
            expires_at: Instant::now() + CODE_VALIDITY,
            origin: Origin::Operator,
            proposed_key: None,
            proposed_label: String::new(),
        });
        drop(guard);

        self.write_code_file(&code);
        code
    }

    /// Connection path: begin an attempt for a proposed key.
    ///
    /// Refused while another connection's unexpired attempt is pending;
    /// an operator-initiated attempt (which carries no key) is replaced.
    pub fn begin(&self, proposed_key: &str, proposed_label: &str) -> Result<String, PairingError> {
        let code = draw_code();
        {
            let mut guard = self.active.lock().unwrap();
            if let Some(attempt) = guard.as_ref() {
                if attempt.origin == Origin::Connection && !attempt.expired() {
                    return Err(PairingError::AnotherAttemptActive);
                }
            }
            *guard = Some(Attempt {
                code: code.clone(),
                expires_at: Instant::now() + CODE_VALIDITY,
                origin: Origin::Connection,
                proposed_key: Some(proposed_key.to_string()),
                proposed_label: proposed_label.to_string(),
            });
        }

        self.write_code_file(&code);
        Ok(code)
    }

    /// Verify a code. The attempt is consumed on success *and* failure;
    /// an expired attempt fails and is consumed as well.
    pub fn verify(&self, code: &str) -> bool {
        let taken = self.active.lock().unwrap().take();
        self.remove_code_file();

        match taken {
            Some(attempt) if !attempt.expired() && attempt.code == code => {
                info!("Pairing code verified");
                true
            }
            Some(_) => {
                warn!("Pairing verification failed");
                false
            }
            None => {
                warn!("Pairing verification without an active attempt");
                false
            }
        }
    }

    /// Whether an unexpired attempt is pending.
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| !a.expired())
            .unwrap_or(false)
    }

    /// The proposed key and label of the active attempt, when it came
    /// from a connection.
    pub fn proposed(&self) -> Option<(String, String)> {
        let guard = self.active.lock().unwrap();
        let attempt = guard.as_ref()?;
        let key = attempt.proposed_key.clone()?;
        Some((key, attempt.proposed_label.clone()))
    }

    fn write_code_file(&self, code: &str) {
        if let Err(err) = std::fs::write(&self.code_file, format!("{}\n", code)) {
            warn!(error = %err, "Could not write pairing code file");
            return;
        }
        if let Err(err) =
            std::fs::set_permissions(&self.code_file, std::fs::Permissions::from_mode(0o600))
        {
            warn!(error = %err, "Could not set pairing code file mode");
        }
    }

    fn remove_code_file(&self) {
        if self.code_file.exists() {
            let _ = std::fs::remove_file(&self.code_file);
        }
    }
}

/// Uniform draw over 000000–999999.
fn draw_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn controller(dir: &tempfile::TempDir) -> PairingController {
        PairingController::new(dir.path().join("pairing_code"))
    }

    #[test]
    fn test_generate_produces_six_digits() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);

        let code = ctrl.generate();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert!(ctrl.is_active());
    }

    #[test]
    fn test_code_file_written_and_removed() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);

        let code = ctrl.generate();
        let on_disk = std::fs::read_to_string(dir.path().join("pairing_code")).unwrap();
        assert_eq!(on_disk.trim(), code);

        ctrl.verify(&code);
        assert!(!dir.path().join("pairing_code").exists());
    }

    #[test]
    fn test_verify_correct_code_consumes_attempt() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);

        let code = ctrl.begin("AAAA", "Phone A").unwrap();
        assert!(ctrl.verify(&code));
        assert!(!ctrl.is_active());
        // Consumed: the same code no longer verifies.
        assert!(!ctrl.verify(&code));
    }

    #[test]
    fn test_wrong_code_also_consumes_attempt() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);

        let code = ctrl.begin("AAAA", "Phone A").unwrap();
        assert!(!ctrl.verify("000000"));
        // Second try with the true code fails too; the attempt is gone.
        assert!(!ctrl.verify(&code));
    }

    #[test]
    fn test_generate_invalidates_previous_attempt() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);

        let first = ctrl.generate();
        let second = ctrl.generate();

        if first != second {
            assert!(!ctrl.verify(&first));
        } else {
            // Same code drawn twice: still only one attempt to consume.
            assert!(ctrl.verify(&second));
        }
        assert!(!ctrl.is_active());
    }

    #[test]
    fn test_connection_attempt_blocks_other_connections() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);

        ctrl.begin("AAAA", "Phone A").unwrap();
        assert!(matches!(
            ctrl.begin("BBBB", "Phone B"),
            Err(PairingError::AnotherAttemptActive)
        ));
    }

    #[test]
    fn test_connection_attempt_replaces_operator_attempt() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);

        ctrl.generate();
        let code = ctrl.begin("AAAA", "Phone A").unwrap();
        assert!(ctrl.verify(&code));
    }

    #[test]
    fn test_proposed_key_only_for_connection_attempts() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);

        ctrl.generate();
        assert!(ctrl.proposed().is_none());

        ctrl.begin("AAAA", "Phone A").unwrap();
        let (key, label) = ctrl.proposed().unwrap();
        assert_eq!(key, "AAAA");
        assert_eq!(label, "Phone A");
    }

    #[test]
    fn test_verify_without_attempt_fails() {
        let dir = tempdir().unwrap();
        let ctrl = controller(&dir);
        assert!(!ctrl.verify("123456"));
    }
}
