//! Applying client `settingsUpdate` requests to the security profile.

use shellyd_core::Config;
use shellyd_protocol::SettingsValue;
use thiserror::Error;

/// Errors while applying a settings update.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    /// The setting name is not part of the security profile.
    #[error("unknown setting: {0}")]
    Unknown(String),

    /// The value has the wrong type or range for the setting.
    #[error("invalid value for {0}")]
    InvalidValue(String),
}

/// Result of a successful application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// Whether the change affects transport and the client must
    /// reconnect for it to take effect.
    pub reconnect_required: bool,
}

/// Apply one recognized setting to the in-memory config. The caller
/// persists and replies with the `reconnectRequired` hint.
pub fn apply(config: &mut Config, setting: &str, value: &SettingsValue) -> Result<Applied, SettingsError> {
    let reconnect = match setting {
        "tlsEnabled" => {
            config.tls_enabled = as_bool(setting, value)?;
            true
        }
        "certificatePinningEnabled" => {
            config.certificate_pinning_enabled = as_bool(setting, value)?;
            true
        }
        "enableSudoInterception" => {
            config.enable_sudo_interception = as_bool(setting, value)?;
            false
        }
        "pushNotificationsEnabled" => {
            config.push_notifications_enabled = as_bool(setting, value)?;
            false
        }
        "sessionTimeoutEnabled" => {
            config.session_timeout_enabled = as_bool(setting, value)?;
            false
        }
        "sessionTimeout" => {
            config.session_timeout = as_u64(setting, value)?;
            false
        }
        "sessionTimeoutSeconds" => {
            config.session_timeout_seconds = as_u64(setting, value)?;
            false
        }
        "auditLoggingEnabled" => {
            config.audit_logging_enabled = as_bool(setting, value)?;
            false
        }
        "auditLogRetentionDays" => {
            let days = as_u64(setting, value)?;
            config.audit_log_retention_days =
                u32::try_from(days).map_err(|_| SettingsError::InvalidValue(setting.to_string()))?;
            false
        }
        "maxConnections" => {
            let max = as_u64(setting, value)?;
            if max == 0 {
                return Err(SettingsError::InvalidValue(setting.to_string()));
            }
            config.max_connections = max as usize;
            false
        }
        other => return Err(SettingsError::Unknown(other.to_string())),
    };

    Ok(Applied {
        reconnect_required: reconnect,
    })
}

fn as_bool(setting: &str, value: &SettingsValue) -> Result<bool, SettingsError> {
    match value {
        SettingsValue::Bool(b) => Ok(*b),
        _ => Err(SettingsError::InvalidValue(setting.to_string())),
    }
}

fn as_u64(setting: &str, value: &SettingsValue) -> Result<u64, SettingsError> {
    match value {
        SettingsValue::Int(i) if *i >= 0 => Ok(*i as u64),
        _ => Err(SettingsError::InvalidValue(setting.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_toggle_requires_reconnect() {
        let mut config = Config::default();
        let applied = apply(&mut config, "tlsEnabled", &SettingsValue::Bool(false)).unwrap();

        assert!(!config.tls_enabled);
        assert!(applied.reconnect_required);
    }

    #[test]
    fn test_pinning_toggle_requires_reconnect() {
        let mut config = Config::default();
        let applied = apply(
            &mut config,
            "certificatePinningEnabled",
            &SettingsValue::Bool(false),
        )
        .unwrap();

        assert!(!config.certificate_pinning_enabled);
        assert!(applied.reconnect_required);
    }

    #[test]
    fn test_non_transport_settings_do_not_require_reconnect() {
        let mut config = Config::default();

        let applied = apply(&mut config, "auditLoggingEnabled", &SettingsValue::Bool(false)).unwrap();
        assert!(!applied.reconnect_required);
        assert!(!config.audit_logging_enabled);

        let applied = apply(&mut config, "sessionTimeoutSeconds", &SettingsValue::Int(600)).unwrap();
        assert!(!applied.reconnect_required);
        assert_eq!(config.session_timeout_seconds, 600);
    }

    #[test]
    fn test_unknown_setting_is_rejected() {
        let mut config = Config::default();
        let err = apply(&mut config, "flurble", &SettingsValue::Bool(true)).unwrap_err();
        assert_eq!(err, SettingsError::Unknown("flurble".to_string()));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let mut config = Config::default();
        let err = apply(&mut config, "tlsEnabled", &SettingsValue::Int(1)).unwrap_err();
        assert_eq!(err, SettingsError::InvalidValue("tlsEnabled".to_string()));
    }

    #[test]
    fn test_negative_numbers_are_rejected() {
        let mut config = Config::default();
        let err = apply(&mut config, "sessionTimeout", &SettingsValue::Int(-5)).unwrap_err();
        assert_eq!(err, SettingsError::InvalidValue("sessionTimeout".to_string()));
    }

    #[test]
    fn test_zero_max_connections_is_rejected() {
        let mut config = Config::default();
        assert!(apply(&mut config, "maxConnections", &SettingsValue::Int(0)).is_err());
        assert!(apply(&mut config, "maxConnections", &SettingsValue::Int(3)).is_ok());
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn test_retention_days_fits_u32() {
        let mut config = Config::default();
        apply(&mut config, "auditLogRetentionDays", &SettingsValue::Int(7)).unwrap();
        assert_eq!(config.audit_log_retention_days, 7);
    }
}
