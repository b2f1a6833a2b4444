//! Connection phase machine using rust-fsm.
//!
//! The phase governs which message types are legal next. Transitions are
//! explicit; anything else is answered per the error-handling table
//! instead of being derived from scattered flags.
//!
//! ```text
//! AwaitingHello ──PairRequested──► AwaitingPairVerify ──PairResolved──► Closing
//!      │                                  │
//!      │ HelloAuthorized                  │ Rejected
//!      ▼                                  ▼
//! AwaitingAuthResponse ──Authenticated──► Open ──Disconnect/ShellExited/TransportFailed──► Closing
//!      │
//!      │ Rejected
//!      ▼
//!   Closing
//! ```

use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub connection_phase(AwaitingHello)

    AwaitingHello => {
        PairRequested => AwaitingPairVerify,
        HelloAuthorized => AwaitingAuthResponse,
        Rejected => Closing
    },
    AwaitingPairVerify => {
        PairResolved => Closing,
        Rejected => Closing
    },
    AwaitingAuthResponse => {
        Authenticated => Open,
        Rejected => Closing
    },
    Open => {
        DisconnectRequested => Closing,
        ShellExited => Closing,
        TransportFailed => Closing
    }
}

// Re-export the generated types with clearer names
pub use connection_phase::Input as PhaseInput;
pub use connection_phase::State as PhaseState;
pub use connection_phase::StateMachine as PhaseMachine;

/// Stable phase label for logs and error messages.
pub fn phase_name(state: &PhaseState) -> &'static str {
    match state {
        PhaseState::AwaitingHello => "awaiting-hello",
        PhaseState::AwaitingPairVerify => "awaiting-pair-verify",
        PhaseState::AwaitingAuthResponse => "awaiting-auth-response",
        PhaseState::Open => "open",
        PhaseState::Closing => "closing",
    }
}
