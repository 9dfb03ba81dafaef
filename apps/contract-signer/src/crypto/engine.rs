//! Signing and verification of template payloads.
//!
//! The signed payload is the lowercase hex template hash immediately followed
//! by the decimal millisecond timestamp, with no separator. Both the sign and
//! verify paths build it through [`build_payload`].
//!
//! ## Determinism
//!
//! Signatures use SHA-256 with the keystore's key type:
//! - RSA keys: PKCS#1 v1.5, deterministic for a given payload and key
//! - EC keys: ECDSA with a random nonce, so repeated signatures differ
//! - Ed25519 keys: pure EdDSA, deterministic
//!
//! Callers must not assume two signatures over the same payload are equal.

use openssl::hash::MessageDigest;
use openssl::pkey::{HasPrivate, HasPublic, Id, PKey, PKeyRef, Public};
use openssl::sign::{Signer, Verifier};
use openssl::x509::{X509, X509VerifyResult};

use crate::error::{ContractError, ContractResult};
use crate::manifest::TimestampMillis;

/// Build the signed payload for a template hash and timestamp.
pub fn build_payload(template_hash: &str, timestamp: TimestampMillis) -> Vec<u8> {
    format!("{template_hash}{timestamp}").into_bytes()
}

/// Key types signed without a separate digest step.
fn is_one_shot(id: Id) -> bool {
    id == Id::ED25519 || id == Id::ED448
}

/// SHA-256 signature engine over OpenSSL keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureEngine;

impl SignatureEngine {
    pub fn new() -> Self {
        Self
    }

    /// Sign `payload` and return the hex-encoded signature.
    pub fn sign<T: HasPrivate>(&self, payload: &[u8], key: &PKeyRef<T>) -> ContractResult<String> {
        let signature = if is_one_shot(key.id()) {
            let mut signer = Signer::new_without_digest(key)?;
            signer.sign_oneshot_to_vec(payload)?
        } else {
            let mut signer = Signer::new(MessageDigest::sha256(), key)?;
            signer.update(payload)?;
            signer.sign_to_vec()?
        };
        Ok(hex::encode(signature))
    }

    /// Verify a hex-encoded signature over `payload`.
    ///
    /// Malformed hex, mismatched key types, and bad signatures all yield `false`.
    pub fn verify<T: HasPublic>(
        &self,
        payload: &[u8],
        signature_hex: &str,
        key: &PKeyRef<T>,
    ) -> bool {
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };

        let verified = if is_one_shot(key.id()) {
            Verifier::new_without_digest(key)
                .and_then(|mut verifier| verifier.verify_oneshot(&signature, payload))
        } else {
            Verifier::new(MessageDigest::sha256(), key).and_then(|mut verifier| {
                verifier.update(payload)?;
                verifier.verify(&signature)
            })
        };

        verified.unwrap_or(false)
    }
}

/// Parse an embedded certificate and return its public key.
///
/// A self-issued certificate must carry a valid self-signature, so edits to
/// any part of the PEM are caught even when the public key survives them.
pub fn certificate_public_key(certificate_pem: &str) -> ContractResult<PKey<Public>> {
    let certificate = X509::from_pem(certificate_pem.as_bytes())
        .map_err(|e| ContractError::InvalidCertificate(format!("Unparseable PEM: {e}")))?;
    let public_key = certificate
        .public_key()
        .map_err(|e| ContractError::InvalidCertificate(format!("Unsupported public key: {e}")))?;

    if certificate.issued(&certificate) == X509VerifyResult::OK {
        let self_signed = certificate.verify(&public_key).unwrap_or(false);
        if !self_signed {
            return Err(ContractError::InvalidCertificate(
                "self-signature does not verify".to_string(),
            ));
        }
    }

    Ok(public_key)
}
