//! Interaction request signature verification.
//!
//! The chat platform signs every interaction request with Ed25519 over the
//! concatenation of the `X-Signature-Timestamp` header value and the raw
//! request body. The application's public key is published in the platform
//! dashboard as a hex string.

use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use tracing::warn;

/// Verify an interaction request signature.
///
/// # Arguments
///
/// * `public_key_hex` - Hex-encoded 32-byte Ed25519 public key
/// * `timestamp` - The `X-Signature-Timestamp` header value
/// * `body` - The raw, unparsed request body bytes
/// * `signature_hex` - The `X-Signature-Ed25519` header value
///
/// # Returns
///
/// `true` only when the signature is a valid Ed25519 signature over
/// `timestamp ++ body`. Every malformed input returns `false`.
pub fn verify_interaction_signature(
    public_key_hex: &str,
    timestamp: &str,
    body: &[u8],
    signature_hex: &str,
) -> bool {
    if public_key_hex.is_empty() || timestamp.is_empty() || signature_hex.is_empty() {
        warn!(
            has_public_key = !public_key_hex.is_empty(),
            has_timestamp = !timestamp.is_empty(),
            has_signature = !signature_hex.is_empty(),
            "interaction_signature_missing_fields"
        );
        return false;
    }

    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = match hex::decode(public_key_hex) {
        Ok(bytes) => match bytes.try_into() {
            Ok(arr) => arr,
            Err(_) => {
                warn!("interaction_signature_bad_key_length");
                return false;
            }
        },
        Err(_) => {
            warn!("interaction_signature_key_not_hex");
            return false;
        }
    };

    let verifying_key = match VerifyingKey::from_bytes(&key_bytes) {
        Ok(k) => k,
        Err(_) => {
            warn!("interaction_signature_invalid_key");
            return false;
        }
    };

    let sig_bytes: [u8; SIGNATURE_LENGTH] = match hex::decode(signature_hex) {
        Ok(bytes) => match bytes.try_into() {
            Ok(arr) => arr,
            Err(_) => {
                warn!("interaction_signature_bad_signature_length");
                return false;
            }
        },
        Err(_) => {
            warn!("interaction_signature_not_hex");
            return false;
        }
    };

    let signature = Signature::from_bytes(&sig_bytes);

    // Signed message is the timestamp followed by the raw body
    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    let valid = verifying_key.verify(&message, &signature).is_ok();

    if !valid {
        warn!(
            timestamp = %timestamp,
            body_length = body.len(),
            "interaction_signature_mismatch"
        );
    }

    valid
}

/// Check whether signature verification is configured.
pub fn is_signature_verification_enabled(public_key: &Option<String>) -> bool {
    public_key
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn test_keypair() -> (SigningKey, String) {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let public_hex = hex::encode(signing_key.verifying_key().to_bytes());
        (signing_key, public_hex)
    }

    fn sign(signing_key: &SigningKey, timestamp: &str, body: &[u8]) -> String {
        let mut message = timestamp.as_bytes().to_vec();
        message.extend_from_slice(body);
        hex::encode(signing_key.sign(&message).to_bytes())
    }

    #[test]
    fn test_verify_signature_valid() {
        let (signing_key, public_hex) = test_keypair();
        let timestamp = "1700000000";
        let body = br#"{"type":1}"#;
        let signature = sign(&signing_key, timestamp, body);

        assert!(verify_interaction_signature(
            &public_hex,
            timestamp,
            body,
            &signature
        ));
    }

    #[test]
    fn test_verify_signature_wrong_body() {
        let (signing_key, public_hex) = test_keypair();
        let signature = sign(&signing_key, "1700000000", br#"{"type":1}"#);

        assert!(!verify_interaction_signature(
            &public_hex,
            "1700000000",
            br#"{"type":2}"#,
            &signature
        ));
    }

    #[test]
    fn test_verify_signature_wrong_timestamp() {
        let (signing_key, public_hex) = test_keypair();
        let body = br#"{"type":1}"#;
        let signature = sign(&signing_key, "1700000000", body);

        assert!(!verify_interaction_signature(
            &public_hex,
            "1700000001",
            body,
            &signature
        ));
    }

    #[test]
    fn test_verify_signature_wrong_key() {
        let (signing_key, _) = test_keypair();
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let other_hex = hex::encode(other.verifying_key().to_bytes());
        let body = br#"{"type":1}"#;
        let signature = sign(&signing_key, "1700000000", body);

        assert!(!verify_interaction_signature(
            &other_hex,
            "1700000000",
            body,
            &signature
        ));
    }

    #[test]
    fn test_verify_signature_missing_fields() {
        assert!(!verify_interaction_signature("", "123", b"{}", "aa"));
        assert!(!verify_interaction_signature("aa", "", b"{}", "aa"));
        assert!(!verify_interaction_signature("aa", "123", b"{}", ""));
    }

    #[test]
    fn test_verify_signature_malformed_hex() {
        let (_, public_hex) = test_keypair();
        assert!(!verify_interaction_signature(
            "not-hex",
            "123",
            b"{}",
            "aabb"
        ));
        assert!(!verify_interaction_signature(
            &public_hex,
            "123",
            b"{}",
            "zz-not-hex"
        ));
        // Valid hex, wrong length
        assert!(!verify_interaction_signature(&public_hex, "123", b"{}", "aabb"));
        assert!(!verify_interaction_signature("aabb", "123", b"{}", "aabb"));
    }

    #[test]
    fn test_is_signature_verification_enabled() {
        assert!(!is_signature_verification_enabled(&None));
        assert!(!is_signature_verification_enabled(&Some("".to_string())));
        assert!(!is_signature_verification_enabled(&Some("   ".to_string())));
        assert!(is_signature_verification_enabled(&Some(
            "aabbcc".to_string()
        )));
    }
}
