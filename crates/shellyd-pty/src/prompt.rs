//! Heuristic detection of privileged-command password prompts.

/// Case-insensitive substrings that mark a password prompt in shell
/// output. Matching is heuristic; duplicate triggers are expected and the
/// client handles them idempotently.
const PROMPT_PATTERNS: &[&str] = &["password:", "[sudo] password for", "password for"];

/// Whether an output chunk contains a password prompt.
pub fn contains_sudo_prompt(chunk: &[u8]) -> bool {
    let text = String::from_utf8_lossy(chunk).to_lowercase();
    PROMPT_PATTERNS.iter().any(|p| text.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_sudo_prompt() {
        assert!(contains_sudo_prompt(b"[sudo] password for alice: "));
    }

    #[test]
    fn test_bare_password_prompt() {
        assert!(contains_sudo_prompt(b"Password:"));
    }

    #[test]
    fn test_password_for_variant() {
        assert!(contains_sudo_prompt(b"Password for alice@host:"));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(contains_sudo_prompt(b"PASSWORD: "));
    }

    #[test]
    fn test_prompt_embedded_in_chunk() {
        assert!(contains_sudo_prompt(
            b"\x1b[0m\r\n[sudo] password for alice: \x1b[?25h"
        ));
    }

    #[test]
    fn test_ordinary_output_does_not_trigger() {
        assert!(!contains_sudo_prompt(b"total 42\ndrwxr-xr-x  alice staff"));
        assert!(!contains_sudo_prompt(b"passwords are stored in the vault"));
    }

    #[test]
    fn test_invalid_utf8_is_tolerated() {
        assert!(!contains_sudo_prompt(&[0xff, 0xfe, 0xfd]));
    }
}
