//! PTY-backed shell sessions for the shellyd daemon.
//!
//! A session runs the configured login shell under a pseudo-terminal.
//! Output is drained by a dedicated reader thread in ≤4 KiB chunks and
//! delivered over a bounded channel; input bytes go straight to the
//! master. The crate also hosts the input line tracker (for command
//! auditing) and the sudo prompt sniffer.

mod line;
mod prompt;
mod session;

use thiserror::Error;

pub use line::{InputLineTracker, LineEvent};
pub use prompt::contains_sudo_prompt;
pub use session::{ShellConfig, ShellEvent, ShellSession, OUTPUT_CHUNK_SIZE};

/// Errors from PTY allocation and shell process management.
#[derive(Error, Debug)]
pub enum PtyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PTY allocation or control failure.
    #[error("PTY error: {0}")]
    Pty(String),

    /// The shell process could not be started.
    #[error("Failed to spawn shell: {0}")]
    Spawn(String),
}

/// Result type alias using PtyError.
pub type PtyResult<T> = Result<T, PtyError>;
