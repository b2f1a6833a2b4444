//! Ed25519 challenge-response verification.
//!
//! The single canonical signature path: the connection machine stores a
//! fresh random challenge, the client signs it with its device private
//! key, and the daemon verifies against the authorized public key.

use crate::{KeyError, KeyResult};
use ed25519_dalek::{Signature, VerifyingKey};

/// Verify a signature over a challenge.
///
/// Returns `Ok(false)` when the signature simply does not match; returns
/// an error only when the key or signature bytes are structurally
/// malformed.
pub fn verify_challenge_signature(
    public_key: &[u8],
    challenge: &[u8],
    signature: &[u8],
) -> KeyResult<bool> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| KeyError::InvalidKeyFormat(format!("expected 32 key bytes, got {}", public_key.len())))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| KeyError::InvalidKeyFormat(e.to_string()))?;

    let signature = Signature::from_slice(signature)
        .map_err(|e| KeyError::InvalidSignatureFormat(e.to_string()))?;

    Ok(verifying_key.verify_strict(challenge, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, Vec<u8>) {
        let signing = SigningKey::generate(&mut OsRng);
        let public = signing.verifying_key().to_bytes().to_vec();
        (signing, public)
    }

    #[test]
    fn test_valid_signature_verifies() {
        let (signing, public) = keypair();
        let challenge = b"thirty-two bytes of challenge!!!";
        let sig = signing.sign(challenge);

        assert!(verify_challenge_signature(&public, challenge, &sig.to_bytes()).unwrap());
    }

    #[test]
    fn test_challenge_length_boundaries() {
        let (signing, public) = keypair();

        for len in [0usize, 32, 1_000_000] {
            let challenge = vec![0xA5u8; len];
            let sig = signing.sign(&challenge);
            assert!(
                verify_challenge_signature(&public, &challenge, &sig.to_bytes()).unwrap(),
                "challenge of {} bytes should verify",
                len
            );
        }
    }

    #[test]
    fn test_bit_flipped_signature_fails() {
        let (signing, public) = keypair();
        let challenge = b"non-malleability check";
        let mut sig = signing.sign(challenge).to_bytes();

        for i in 0..sig.len() {
            sig[i] ^= 0x01;
            let ok = verify_challenge_signature(&public, challenge, &sig).unwrap_or(false);
            assert!(!ok, "flipping signature byte {} must break verification", i);
            sig[i] ^= 0x01;
        }
    }

    #[test]
    fn test_bit_flipped_challenge_fails() {
        let (signing, public) = keypair();
        let mut challenge = b"the exact challenge matters".to_vec();
        let sig = signing.sign(&challenge).to_bytes();

        for i in 0..challenge.len() {
            challenge[i] ^= 0x01;
            assert!(!verify_challenge_signature(&public, &challenge, &sig).unwrap());
            challenge[i] ^= 0x01;
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let (signing, _) = keypair();
        let (_, other_public) = keypair();
        let challenge = b"challenge";
        let sig = signing.sign(challenge);

        assert!(!verify_challenge_signature(&other_public, challenge, &sig.to_bytes()).unwrap());
    }

    #[test]
    fn test_malformed_inputs_error() {
        let (signing, public) = keypair();
        let sig = signing.sign(b"x").to_bytes();

        // Wrong key length
        assert!(matches!(
            verify_challenge_signature(&public[..16], b"x", &sig),
            Err(KeyError::InvalidKeyFormat(_))
        ));

        // Wrong signature length
        assert!(matches!(
            verify_challenge_signature(&public, b"x", &sig[..32]),
            Err(KeyError::InvalidSignatureFormat(_))
        ));
    }
}
