//! The on-disk authorized keys store.

use crate::{KeyError, KeyResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// The canonical algorithm name written to the file.
const CANONICAL_ALGORITHM: &str = "ssh-ed25519";

/// Algorithm names accepted on `add`. Everything else is rejected.
const SUPPORTED_ALGORITHMS: &[&str] = &["ssh-ed25519", "ed25519"];

/// Ed25519 public keys are exactly 32 bytes.
const ED25519_KEY_LEN: usize = 32;

/// One authorized client key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    /// Always the canonical `ssh-ed25519`.
    pub algorithm: String,
    /// Raw public key bytes.
    pub key_bytes: Vec<u8>,
    /// Free-form device label; advisory and non-unique.
    pub label: String,
}

impl AuthorizedKey {
    /// OpenSSH-style fingerprint: `SHA256:` plus the unpadded base64 of
    /// the SHA-256 digest of the raw key bytes. Stable across hosts and
    /// processes; used as the removal handle.
    pub fn fingerprint(&self) -> String {
        fingerprint_bytes(&self.key_bytes)
    }

    /// The base64 encoding written to the file.
    pub fn key_base64(&self) -> String {
        BASE64.encode(&self.key_bytes)
    }

    fn to_line(&self) -> String {
        if self.label.is_empty() {
            format!("{} {}", self.algorithm, self.key_base64())
        } else {
            format!("{} {} {}", self.algorithm, self.key_base64(), self.label)
        }
    }
}

/// Compute the fingerprint of raw public key bytes.
pub(crate) fn fingerprint_bytes(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    let encoded = BASE64.encode(digest);
    format!("SHA256:{}", encoded.trim_end_matches('='))
}

/// The authorized keys store. All queries re-read the backing file; the
/// file is small and this keeps every reader consistent with concurrent
/// CLI edits.
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    /// Create a store over the given file path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the backing file (mode 0600) if it does not exist yet.
    pub fn ensure_file(&self) -> KeyResult<()> {
        if !self.path.exists() {
            std::fs::write(&self.path, "")?;
        }
        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        Ok(())
    }

    /// List all authorized keys. Blank lines, comments, and malformed
    /// lines are skipped; a bad line is never fatal.
    pub fn list(&self) -> KeyResult<Vec<AuthorizedKey>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let mut keys = Vec::new();

        for (lineno, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_line(trimmed) {
                Ok(key) => keys.push(key),
                Err(err) => {
                    warn!(line = lineno + 1, error = %err, "Skipping malformed authorized_keys line");
                }
            }
        }

        Ok(keys)
    }

    /// Add a key (base64 blob) under an advisory label, rewriting the
    /// file atomically with owner-only permissions.
    pub fn add(&self, key_base64: &str, label: &str) -> KeyResult<AuthorizedKey> {
        self.add_with_algorithm(CANONICAL_ALGORITHM, key_base64, label)
    }

    /// Add a key with an explicit algorithm token. Non-whitelisted
    /// algorithms and undecodable blobs are rejected.
    pub fn add_with_algorithm(
        &self,
        algorithm: &str,
        key_base64: &str,
        label: &str,
    ) -> KeyResult<AuthorizedKey> {
        let key = build_key(algorithm, key_base64, label)?;

        let mut keys = self.list()?;
        // Replacing an existing entry keeps fingerprints unique in the store.
        keys.retain(|existing| existing.key_bytes != key.key_bytes);
        keys.push(key.clone());
        self.rewrite(&keys)?;

        Ok(key)
    }

    /// Remove the key with the given fingerprint. Returns whether a key
    /// was removed.
    pub fn remove(&self, fingerprint: &str) -> KeyResult<bool> {
        let keys = self.list()?;
        let remaining: Vec<AuthorizedKey> = keys
            .iter()
            .filter(|k| k.fingerprint() != fingerprint)
            .cloned()
            .collect();

        let removed = remaining.len() != keys.len();
        if removed {
            self.rewrite(&remaining)?;
        }
        Ok(removed)
    }

    /// Whether the given base64 public key is authorized. Matching is on
    /// the decoded key bytes only; labels are cosmetic.
    pub fn is_authorized(&self, key_base64: &str) -> KeyResult<bool> {
        let Ok(candidate) = BASE64.decode(key_base64.trim()) else {
            return Ok(false);
        };

        Ok(self.list()?.iter().any(|k| k.key_bytes == candidate))
    }

    /// Whether any key is authorized at all. Pairing auto-activates on an
    /// empty store.
    pub fn is_empty(&self) -> KeyResult<bool> {
        Ok(self.list()?.is_empty())
    }

    fn rewrite(&self, keys: &[AuthorizedKey]) -> KeyResult<()> {
        let mut content = String::new();
        for key in keys {
            content.push_str(&key.to_line());
            content.push('\n');
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn build_key(algorithm: &str, key_base64: &str, label: &str) -> KeyResult<AuthorizedKey> {
    if !SUPPORTED_ALGORITHMS.contains(&algorithm) {
        return Err(KeyError::InvalidKeyFormat(format!(
            "unsupported algorithm: {}",
            algorithm
        )));
    }

    let key_bytes = BASE64
        .decode(key_base64.trim())
        .map_err(|e| KeyError::InvalidKeyFormat(format!("bad base64: {}", e)))?;

    if key_bytes.len() != ED25519_KEY_LEN {
        return Err(KeyError::InvalidKeyFormat(format!(
            "expected {} key bytes, got {}",
            ED25519_KEY_LEN,
            key_bytes.len()
        )));
    }

    Ok(AuthorizedKey {
        algorithm: CANONICAL_ALGORITHM.to_string(),
        key_bytes,
        label: label.trim().to_string(),
    })
}

fn parse_line(line: &str) -> KeyResult<AuthorizedKey> {
    let mut parts = line.splitn(3, char::is_whitespace);
    let algorithm = parts
        .next()
        .ok_or_else(|| KeyError::InvalidKeyFormat("empty line".to_string()))?;
    let blob = parts
        .next()
        .ok_or_else(|| KeyError::InvalidKeyFormat("missing key blob".to_string()))?;
    // Remaining whitespace-joined words form the label.
    let label = parts.next().unwrap_or("").trim();

    build_key(algorithm, blob, label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> KeyStore {
        KeyStore::new(dir.path().join("authorized_keys"))
    }

    fn sample_key(byte: u8) -> String {
        BASE64.encode([byte; 32])
    }

    #[test]
    fn test_add_then_list_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let added = store.add(&sample_key(7), "Phone A").unwrap();
        let listed = store.list().unwrap();

        assert_eq!(listed, vec![added]);
        assert_eq!(listed[0].algorithm, "ssh-ed25519");
        assert_eq!(listed[0].label, "Phone A");
    }

    #[test]
    fn test_add_rejects_unsupported_algorithm() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let err = store
            .add_with_algorithm("ssh-rsa", &sample_key(1), "old laptop")
            .unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeyFormat(_)));
    }

    #[test]
    fn test_add_rejects_bad_base64_and_wrong_length() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        assert!(matches!(
            store.add("!!!", "x").unwrap_err(),
            KeyError::InvalidKeyFormat(_)
        ));
        assert!(matches!(
            store.add(&BASE64.encode([0u8; 16]), "short").unwrap_err(),
            KeyError::InvalidKeyFormat(_)
        ));
    }

    #[test]
    fn test_malformed_lines_are_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let good = format!("ssh-ed25519 {} Phone A", sample_key(9));
        std::fs::write(
            &path,
            format!(
                "# comment\n\nssh-rsa AAAAB3Nza... legacy\nnot-even-a-line\n{}\n",
                good
            ),
        )
        .unwrap();

        let store = KeyStore::new(path);
        let keys = store.list().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].label, "Phone A");
    }

    #[test]
    fn test_is_authorized_ignores_label() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add(&sample_key(3), "Phone A").unwrap();

        assert!(store.is_authorized(&sample_key(3)).unwrap());
        assert!(!store.is_authorized(&sample_key(4)).unwrap());
        assert!(!store.is_authorized("garbage!").unwrap());
    }

    #[test]
    fn test_add_remove_restores_prior_state() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add(&sample_key(1), "keeper").unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let added = store.add(&sample_key(2), "visitor").unwrap();
        assert!(store.remove(&added.fingerprint()).unwrap());

        let after = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_remove_unknown_fingerprint_is_noop() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add(&sample_key(1), "keeper").unwrap();
        assert!(!store.remove("SHA256:doesnotexist").unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_fingerprint_is_stable_and_tagged() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let key = store.add(&sample_key(5), "phone").unwrap();
        let fp1 = key.fingerprint();
        let fp2 = store.list().unwrap()[0].fingerprint();

        assert_eq!(fp1, fp2);
        assert!(fp1.starts_with("SHA256:"));
        assert!(!fp1.ends_with('='));
    }

    #[test]
    fn test_duplicate_add_replaces_instead_of_duplicating() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add(&sample_key(6), "old name").unwrap();
        store.add(&sample_key(6), "new name").unwrap();

        let keys = store.list().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].label, "new name");
    }

    #[test]
    fn test_rewrite_sets_owner_only_mode() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add(&sample_key(8), "phone").unwrap();

        let mode = std::fs::metadata(store.path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_label_with_spaces_survives_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.add(&sample_key(2), "Priya's Phone 15 Pro").unwrap();
        let keys = store.list().unwrap();
        assert_eq!(keys[0].label, "Priya's Phone 15 Pro");
    }

    #[test]
    fn test_empty_store() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.is_empty().unwrap());
        store.add(&sample_key(1), "phone").unwrap();
        assert!(!store.is_empty().unwrap());
    }

    #[test]
    fn test_ensure_file_creates_mode_0600() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.ensure_file().unwrap();
        assert!(store.path().exists());

        let mode = std::fs::metadata(store.path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
