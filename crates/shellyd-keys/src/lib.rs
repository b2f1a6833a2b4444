//! Authorized client keys for the shellyd daemon.
//!
//! The store is a small line-oriented file (`~/.shellyd/authorized_keys`,
//! mode 0600): one `<algorithm> <base64> <label>` triple per line. The
//! file is the source of truth; every query re-reads it. This crate also
//! hosts the single Ed25519 challenge-verification path used during
//! authentication.

mod store;
mod verify;

use thiserror::Error;

pub use store::{AuthorizedKey, KeyStore};
pub use verify::verify_challenge_signature;

/// Errors from key parsing, persistence, and verification.
#[derive(Error, Debug)]
pub enum KeyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The key is not a usable Ed25519 public key.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The signature bytes are not a well-formed Ed25519 signature.
    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),
}

/// Result type alias using KeyError.
pub type KeyResult<T> = Result<T, KeyError>;
