//! Wire-protocol types for the shellyd daemon.
//!
//! Pure data and serde, with no I/O or transport concerns: the JSON
//! envelope both sides exchange, the message type taxonomy, and one typed
//! payload document per message. The payload travels base64-encoded
//! inside the envelope.

mod envelope;
mod messages;

pub use envelope::{Envelope, ProtocolError, ProtocolResult};
pub use messages::*;
