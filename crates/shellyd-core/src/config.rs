//! Configuration management for the daemon.
//!
//! The config file is owned by the daemon; the mobile client requests
//! updates to the security-profile fields through `settingsUpdate`
//! messages and the daemon persists and echoes them back.

use crate::{CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port. The TLS endpoint binds `port + 1`.
pub const DEFAULT_PORT: u16 = 8765;

/// Default audit retention window in days.
const DEFAULT_AUDIT_RETENTION_DAYS: u32 = 30;

/// Main daemon configuration, persisted as `~/.shellyd/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Listen port for the plain endpoint.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Login shell executed for each session.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Whether sudo password prompts are intercepted and mediated.
    #[serde(default = "default_true")]
    pub enable_sudo_interception: bool,
    /// Whether push notifications are forwarded for long-running commands.
    #[serde(default)]
    pub push_notifications_enabled: bool,
    /// Legacy session timeout field, kept for older clients.
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,
    /// Maximum concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Whether the TLS endpoint on `port + 1` is served.
    #[serde(default = "default_true")]
    pub tls_enabled: bool,
    /// Whether clients are expected to pin the certificate fingerprint.
    #[serde(default = "default_true")]
    pub certificate_pinning_enabled: bool,
    /// Whether the client enforces an idle session timeout.
    #[serde(default)]
    pub session_timeout_enabled: bool,
    /// Idle session timeout in seconds (client-enforced).
    #[serde(default = "default_session_timeout")]
    pub session_timeout_seconds: u64,
    /// Whether the audit log is written.
    #[serde(default = "default_true")]
    pub audit_logging_enabled: bool,
    /// Days of audit history to retain.
    #[serde(default = "default_audit_retention")]
    pub audit_log_retention_days: u32,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

fn default_true() -> bool {
    true
}

fn default_session_timeout() -> u64 {
    1800
}

fn default_max_connections() -> usize {
    5
}

fn default_audit_retention() -> u32 {
    DEFAULT_AUDIT_RETENTION_DAYS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            shell: default_shell(),
            enable_sudo_interception: true,
            push_notifications_enabled: false,
            session_timeout: default_session_timeout(),
            max_connections: default_max_connections(),
            tls_enabled: true,
            certificate_pinning_enabled: true,
            session_timeout_enabled: false,
            session_timeout_seconds: default_session_timeout(),
            audit_logging_enabled: true,
            audit_log_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
        }
    }
}

impl Config {
    /// Load configuration from the standard location, falling back to
    /// defaults when no file exists yet.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration with owner-only permissions.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        std::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert!(config.tls_enabled);
        assert!(config.certificate_pinning_enabled);
        assert!(config.audit_logging_enabled);
        assert!(!config.session_timeout_enabled);
        assert_eq!(config.audit_log_retention_days, 30);
    }

    #[test]
    fn test_config_uses_camel_case_on_disk() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"enableSudoInterception\""));
        assert!(json.contains("\"tlsEnabled\""));
        assert!(json.contains("\"auditLogRetentionDays\""));
        assert!(!json.contains("\"tls_enabled\""));
    }

    #[test]
    fn test_config_load_from_partial_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(&config_path, r#"{ "port": 9000, "tlsEnabled": false }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.port, 9000);
        assert!(!config.tls_enabled);
        // Unspecified fields fall back to defaults
        assert_eq!(config.host, DEFAULT_HOST);
        assert!(config.enable_sudo_interception);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.port = 9100;
        config.max_connections = 2;
        config.certificate_pinning_enabled = false;

        config.save(&paths).unwrap();
        let loaded = Config::load(&paths).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_save_sets_owner_only_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        Config::default().save(&paths).unwrap();

        let mode = std::fs::metadata(paths.config_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_config_load_invalid_json_errors() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "not json").unwrap();

        assert!(Config::load_from_file(&config_path).is_err());
    }
}
