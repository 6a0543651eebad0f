//! Assertion signature verification
//!
//! An assertion proves possession of a credential by signing
//! `authData || clientDataHash`. ES256 (COSE -7) is verified here; other
//! algorithms surface [`CryptoError::UnsupportedAlgorithm`] so the caller
//! can verify externally with the raw bytes the workflow exposes.

use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};

use crate::error::{CryptoError, Result};

/// COSE algorithm identifier for ES256.
pub const COSE_ES256: i64 = -7;

/// Verify an ES256 signature.
///
/// * `public_key` - uncompressed SEC1 point (`0x04 || x || y`)
/// * `message` - `authData || clientDataHash`
/// * `signature` - DER-encoded ECDSA signature as CTAP2 returns it
pub fn verify_es256(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = Signature::from_der(signature).map_err(|_| CryptoError::InvalidSignature)?;

    key.verify(message, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Dispatch on the credential's COSE algorithm.
pub fn verify(alg: i64, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    match alg {
        COSE_ES256 => verify_es256(public_key, message, signature),
        other => Err(CryptoError::UnsupportedAlgorithm(other)),
    }
}
