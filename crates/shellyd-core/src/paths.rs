//! File system paths for the daemon.

use crate::{CoreError, CoreResult};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Manages file system paths for the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for daemon runtime files (~/.shellyd)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.shellyd`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".shellyd"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.shellyd).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.shellyd/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the authorized keys file path (~/.shellyd/authorized_keys).
    pub fn authorized_keys_file(&self) -> PathBuf {
        self.base_dir.join("authorized_keys")
    }

    /// Get the server certificate path (~/.shellyd/server.crt).
    pub fn certificate_file(&self) -> PathBuf {
        self.base_dir.join("server.crt")
    }

    /// Get the server private key path (~/.shellyd/server.key).
    pub fn private_key_file(&self) -> PathBuf {
        self.base_dir.join("server.key")
    }

    /// Get the audit log path (~/.shellyd/audit.log).
    pub fn audit_log_file(&self) -> PathBuf {
        self.base_dir.join("audit.log")
    }

    /// Get the PID file path (~/.shellyd/shellyd.pid).
    pub fn pid_file(&self) -> PathBuf {
        self.base_dir.join("shellyd.pid")
    }

    /// Get the transient pairing code path (~/.shellyd/pairing_code).
    pub fn pairing_code_file(&self) -> PathBuf {
        self.base_dir.join("pairing_code")
    }

    /// Ensure the base directory exists with owner-only permissions.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::set_permissions(&self.base_dir, std::fs::Permissions::from_mode(0o700))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-shellyd");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.authorized_keys_file(), base.join("authorized_keys"));
        assert_eq!(paths.certificate_file(), base.join("server.crt"));
        assert_eq!(paths.private_key_file(), base.join("server.key"));
        assert_eq!(paths.audit_log_file(), base.join("audit.log"));
        assert_eq!(paths.pid_file(), base.join("shellyd.pid"));
        assert_eq!(paths.pairing_code_file(), base.join("pairing_code"));
    }

    #[test]
    fn test_paths_default_under_home() {
        let paths = Paths::new().unwrap();
        let home = dirs::home_dir().unwrap();

        assert_eq!(paths.base_dir(), &home.join(".shellyd"));
    }

    #[test]
    fn test_ensure_dirs_creates_directory_with_mode() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("shellyd");
        let paths = Paths::with_base_dir(base.clone());

        assert!(!base.exists());
        paths.ensure_dirs().unwrap();

        assert!(base.is_dir());
        let mode = std::fs::metadata(&base).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_ensure_dirs_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.base_dir().exists());
    }
}
