//! Message type taxonomy and per-type payload documents.

use serde::{Deserialize, Serialize};

/// Every message type on the wire.
///
/// Unknown strings decode to [`MessageType::Unknown`] so the connection
/// can answer with a recoverable error instead of dropping the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    // Lifecycle
    Hello,
    AuthChallenge,
    AuthResponse,
    AuthResult,
    Disconnect,

    // Pairing
    PairRequest,
    PairChallenge,
    PairVerify,
    PairResponse,

    // Terminal
    TerminalOutput,
    TerminalInput,
    TerminalResize,

    // Sudo
    SudoPrompt,
    SudoConfirmRequest,
    SudoConfirmResponse,
    SudoPassword,

    // Notifications
    RegisterPushToken,
    LongRunningCommand,
    CommandComplete,

    // Settings
    SettingsSync,
    SettingsUpdate,
    SettingsConfirm,

    // Utility
    Ping,
    Pong,
    Error,

    /// Any type this daemon does not know about.
    #[serde(other)]
    Unknown,
}

/// A settings value: bool, integer, or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingsValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Client greeting opening the authentication flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    #[serde(default)]
    pub client_version: Option<String>,
    /// Base64-encoded Ed25519 public key.
    pub public_key: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// Server challenge answered by signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallengePayload {
    /// Base64-encoded random challenge bytes.
    pub challenge: String,
    pub server_version: String,
    /// Base64-encoded ephemeral server Ed25519 public key.
    pub server_public_key: String,
}

/// Client signature over the challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponsePayload {
    /// Base64-encoded Ed25519 signature.
    pub signature: String,
}

/// Authentication verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResultPayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// Request to begin pairing with a new key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequestPayload {
    /// Base64-encoded Ed25519 public key proposed for authorization.
    pub public_key: String,
    #[serde(default)]
    pub device_name: Option<String>,
}

/// Server acknowledgment that a code is being displayed on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairChallengePayload {
    /// Host machine label shown to the user.
    pub mac_name: String,
    pub message: String,
}

/// The 6-digit code the operator read from the host display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairVerifyPayload {
    pub code: String,
}

/// Pairing verdict. On success the certificate fingerprint is the trust
/// anchor the client pins for TLS connects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairResponsePayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Raw terminal output bytes, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputPayload {
    pub data: String,
}

/// Keystrokes from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInputPayload {
    pub data: String,
}

/// Window size change. Non-positive values are ignored by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResizePayload {
    pub rows: i32,
    pub cols: i32,
}

/// Raw sudo prompt text, kept for client compatibility. The canonical
/// server path emits [`SudoConfirmRequestPayload`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SudoPromptPayload {
    pub prompt: String,
}

/// Ask the client to approve typing a password for a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SudoConfirmRequestPayload {
    pub id: String,
    pub command: String,
}

/// Client approval or denial of a sudo confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SudoConfirmResponsePayload {
    pub id: String,
    pub approved: bool,
}

/// The password to type into the shell. Never logged, never audited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SudoPasswordPayload {
    pub password: String,
}

/// Push notification token registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPushTokenPayload {
    pub token: String,
    #[serde(default)]
    pub platform: Option<String>,
}

/// A command has been running for a while without completing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongRunningCommandPayload {
    pub command: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// A previously flagged long-running command finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCompletePayload {
    pub command: String,
}

/// Full security profile pushed to the client on connection establishment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSyncPayload {
    pub settings: serde_json::Value,
}

/// Client request to change one setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdatePayload {
    pub setting: String,
    pub value: SettingsValue,
}

/// Echo of an applied (or rejected) settings update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsConfirmPayload {
    pub setting: String,
    pub success: bool,
    #[serde(default)]
    pub reconnect_required: bool,
}

/// Stable error surface: `{code, message, recoverable}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

impl ErrorPayload {
    /// An error the client can recover from without reconnecting.
    pub fn recoverable(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            recoverable: true,
        }
    }

    /// An error that will be followed by a transport close.
    pub fn fatal(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            recoverable: false,
        }
    }
}

/// Stable error codes used in [`ErrorPayload::code`].
pub mod codes {
    pub const MALFORMED_FRAME: &str = "malformedFrame";
    pub const UNKNOWN_TYPE: &str = "unknownType";
    pub const OUT_OF_PHASE: &str = "outOfPhase";
    pub const PAYLOAD_MISMATCH: &str = "payloadMismatch";
    pub const NOT_AUTHORIZED: &str = "notAuthorized";
    pub const PAIRING_BUSY: &str = "pairingBusy";
    pub const SHELL_FAILED: &str = "shellFailed";
}
