//! Server trust material for the shellyd daemon.
//!
//! The daemon is its own certificate authority of one: a self-signed EC
//! P-256 leaf (CN=Shelly Daemon, 365-day validity) generated on first
//! start. Clients receive the certificate's SHA-256 fingerprint during
//! pairing and pin it for every later TLS connect.

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};
use std::io::BufReader;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use shellyd_core::Paths;

/// Certificate validity window in days.
const CERT_VALIDITY_DAYS: i64 = 365;

/// Subject common name of the generated leaf.
const CERT_COMMON_NAME: &str = "Shelly Daemon";

/// Errors from trust material generation and loading.
#[derive(Error, Debug)]
pub enum TrustError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate or key generation failed.
    #[error("Certificate generation failed: {0}")]
    Generate(String),

    /// The PEM files could not be parsed into a usable TLS identity.
    #[error("TLS configuration failed: {0}")]
    Tls(String),
}

/// Result type alias using TrustError.
pub type TrustResult<T> = Result<T, TrustError>;

/// Loaded trust material: a TLS acceptor plus the pinned fingerprint.
///
/// Constructed once by the listener and read-only thereafter.
#[derive(Clone)]
pub struct TrustMaterial {
    acceptor: TlsAcceptor,
    fingerprint: String,
}

impl TrustMaterial {
    /// Generate the certificate and private key files if either is
    /// missing. The private key is written mode 0600, the certificate
    /// 0644.
    pub fn ensure(paths: &Paths) -> TrustResult<()> {
        let cert_path = paths.certificate_file();
        let key_path = paths.private_key_file();

        if cert_path.exists() && key_path.exists() {
            debug!("Trust material already present");
            return Ok(());
        }

        info!("Generating self-signed server certificate");

        let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| TrustError::Generate(e.to_string()))?;

        let mut params = rcgen::CertificateParams::default();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(
            rcgen::DnType::CommonName,
            rcgen::DnValue::Utf8String(CERT_COMMON_NAME.to_string()),
        );
        params.distinguished_name = dn;
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = OffsetDateTime::now_utc() + Duration::days(CERT_VALIDITY_DAYS);
        params.subject_alt_names = vec![rcgen::SanType::DnsName(
            "localhost"
                .try_into()
                .map_err(|_| TrustError::Generate("invalid SAN".to_string()))?,
        )];

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| TrustError::Generate(e.to_string()))?;

        std::fs::write(&cert_path, cert.pem())?;
        std::fs::set_permissions(&cert_path, std::fs::Permissions::from_mode(0o644))?;

        std::fs::write(&key_path, key_pair.serialize_pem())?;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Load both files into an in-memory TLS server context (TLS 1.2
    /// minimum) and compute the pinned fingerprint.
    pub fn load(paths: &Paths) -> TrustResult<Self> {
        let cert_file = std::fs::File::open(paths.certificate_file())?;
        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(cert_file))
                .collect::<Result<_, _>>()
                .map_err(|e| TrustError::Tls(format!("bad certificate PEM: {}", e)))?;

        let leaf = certs
            .first()
            .ok_or_else(|| TrustError::Tls("certificate file contains no certificate".to_string()))?;
        let fingerprint = fingerprint_der(leaf.as_ref());

        let key_file = std::fs::File::open(paths.private_key_file())?;
        let key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut BufReader::new(key_file))
                .map_err(|e| TrustError::Tls(format!("bad private key PEM: {}", e)))?
                .ok_or_else(|| TrustError::Tls("key file contains no private key".to_string()))?;

        let config = rustls::ServerConfig::builder_with_protocol_versions(&[
            &rustls::version::TLS12,
            &rustls::version::TLS13,
        ])
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TrustError::Tls(e.to_string()))?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            fingerprint,
        })
    }

    /// The TLS acceptor for the secured listener.
    pub fn acceptor(&self) -> TlsAcceptor {
        self.acceptor.clone()
    }

    /// SHA-256 of the leaf certificate's DER form, colon-separated
    /// uppercase hex. This is the value clients pin.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustMaterial")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Format the fingerprint of DER-encoded certificate bytes.
pub fn fingerprint_der(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_der_format() {
        let fp = fingerprint_der(b"arbitrary bytes");
        // 32 hex pairs joined by 31 colons.
        assert_eq!(fp.len(), 32 * 2 + 31);
        assert!(fp
            .split(':')
            .all(|pair| pair.len() == 2 && pair.chars().all(|c| c.is_ascii_hexdigit())));
        assert_eq!(fp, fp.to_uppercase());
    }

    #[test]
    fn test_fingerprint_der_is_stable() {
        assert_eq!(fingerprint_der(b"same"), fingerprint_der(b"same"));
        assert_ne!(fingerprint_der(b"same"), fingerprint_der(b"different"));
    }

    #[test]
    fn test_ensure_writes_both_files_with_modes() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        TrustMaterial::ensure(&paths).unwrap();

        assert!(paths.certificate_file().exists());
        assert!(paths.private_key_file().exists());

        let cert_mode = std::fs::metadata(paths.certificate_file())
            .unwrap()
            .permissions()
            .mode();
        let key_mode = std::fs::metadata(paths.private_key_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(cert_mode & 0o777, 0o644);
        assert_eq!(key_mode & 0o777, 0o600);
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        TrustMaterial::ensure(&paths).unwrap();
        let cert_before = std::fs::read(paths.certificate_file()).unwrap();

        TrustMaterial::ensure(&paths).unwrap();
        let cert_after = std::fs::read(paths.certificate_file()).unwrap();

        assert_eq!(cert_before, cert_after);
    }

    #[test]
    fn test_load_produces_stable_fingerprint() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        TrustMaterial::ensure(&paths).unwrap();

        let first = TrustMaterial::load(&paths).unwrap();
        let second = TrustMaterial::load(&paths).unwrap();

        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 32 * 2 + 31);
    }

    #[test]
    fn test_load_without_files_errors() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        assert!(TrustMaterial::load(&paths).is_err());
    }

    #[test]
    fn test_certificate_pem_mentions_no_private_material() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        TrustMaterial::ensure(&paths).unwrap();

        let cert = std::fs::read_to_string(paths.certificate_file()).unwrap();
        assert!(cert.contains("BEGIN CERTIFICATE"));
        assert!(!cert.contains("PRIVATE KEY"));
    }
}
