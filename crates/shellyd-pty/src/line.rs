//! Logical input line tracking for command auditing.

/// Events produced while feeding client keystrokes through the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// An end-of-line committed the buffer as the last command.
    Committed(String),
    /// ETX (Ctrl-C) cleared the in-progress buffer.
    Cleared,
}

/// Mirrors the client's in-progress input line.
///
/// Printable bytes append, backspace removes the last byte, CR/LF commits
/// the buffer, and ETX clears it. The shell's own line editing stays
/// authoritative; this heuristic view feeds the audit log and the sudo
/// command context.
#[derive(Debug, Default)]
pub struct InputLineTracker {
    buffer: Vec<u8>,
}

impl InputLineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw input bytes; returns commit/clear events in order.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<LineEvent> {
        let mut events = Vec::new();

        for &byte in bytes {
            match byte {
                b'\r' | b'\n' => {
                    if !self.buffer.is_empty() {
                        let line = String::from_utf8_lossy(&self.buffer).to_string();
                        events.push(LineEvent::Committed(line));
                        self.buffer.clear();
                    }
                }
                0x08 | 0x7f => {
                    self.buffer.pop();
                }
                0x03 => {
                    self.buffer.clear();
                    events.push(LineEvent::Cleared);
                }
                _ => self.buffer.push(byte),
            }
        }

        events
    }

    /// The uncommitted buffer contents.
    pub fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buffer).to_string()
    }
}
