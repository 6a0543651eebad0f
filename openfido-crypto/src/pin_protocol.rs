//! PIN/UV authentication protocol primitives (protocols 1 and 2)
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#pinProto1>
//!
//! Protocol 1 derives a single 32-byte secret (SHA-256 of the ECDH
//! x-coordinate) used for both encryption and authentication; ciphertexts
//! use a zero IV and MACs are truncated to 16 bytes.
//!
//! Protocol 2 derives two independent 32-byte keys with HKDF-SHA-256; the
//! 64-byte concatenation `hmac_key || aes_key` is the shared secret.
//! Ciphertexts carry a fresh random IV in their first 16 bytes and MACs are
//! the full 32-byte HMAC-SHA-256 output.
//!
//! CTAP never pads: every plaintext on this layer is already a multiple of
//! the AES block size (padded PINs, 16-byte PIN hashes, token blocks).

use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// PIN protocol 1: AES-256-CBC with zero IV, 16-byte truncated HMAC.
pub mod v1 {
    use super::*;

    /// Derive the session secret from the ECDH x-coordinate.
    pub fn kdf(ecdh_x: &[u8; 32]) -> [u8; 32] {
        Sha256::digest(ecdh_x).into()
    }

    /// Encrypt with a zero IV. `plaintext` must be block-aligned.
    pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() || plaintext.len() % 16 != 0 {
            return Err(CryptoError::EncryptionFailed);
        }

        let mut buffer = plaintext.to_vec();
        let len = buffer.len();
        Aes256CbcEnc::new(key.into(), &[0u8; 16].into())
            .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(buffer)
    }

    /// Decrypt a zero-IV ciphertext.
    pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CryptoError::DecryptionFailed);
        }

        let mut buffer = ciphertext.to_vec();
        Aes256CbcDec::new(key.into(), &[0u8; 16].into())
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(buffer)
    }

    /// First 16 bytes of HMAC-SHA-256 over `data`.
    pub fn authenticate(key: &[u8], data: &[u8]) -> [u8; 16] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
        mac.update(data);
        let full = mac.finalize().into_bytes();

        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }

    /// Constant-time MAC check.
    pub fn verify(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
        authenticate(key, data).ct_eq(expected).into()
    }
}

/// PIN protocol 2: HKDF-split keys, random IV, full-length HMAC.
pub mod v2 {
    use super::*;
    use hkdf::Hkdf;

    const HKDF_SALT: [u8; 32] = [0u8; 32];
    const INFO_HMAC: &[u8] = b"CTAP2 HMAC key";
    const INFO_AES: &[u8] = b"CTAP2 AES key";

    /// Derive the 64-byte session secret `hmac_key || aes_key`.
    pub fn kdf(ecdh_x: &[u8; 32]) -> [u8; 64] {
        let hkdf = Hkdf::<Sha256>::new(Some(&HKDF_SALT), ecdh_x);

        let mut secret = [0u8; 64];
        hkdf.expand(INFO_HMAC, &mut secret[..32])
            .expect("32 bytes is a valid HKDF-SHA-256 length");
        hkdf.expand(INFO_AES, &mut secret[32..])
            .expect("32 bytes is a valid HKDF-SHA-256 length");
        secret
    }

    fn aes_key(secret: &[u8; 64]) -> &[u8; 32] {
        secret[32..].try_into().expect("32-byte half")
    }

    fn hmac_key(secret: &[u8; 64]) -> &[u8; 32] {
        secret[..32].try_into().expect("32-byte half")
    }

    /// Encrypt under a fresh random IV; the IV leads the ciphertext.
    pub fn encrypt(secret: &[u8; 64], plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() || plaintext.len() % 16 != 0 {
            return Err(CryptoError::EncryptionFailed);
        }

        let mut iv = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let mut out = Vec::with_capacity(16 + plaintext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(plaintext);

        let body_len = plaintext.len();
        Aes256CbcEnc::new(aes_key(secret).into(), &iv.into())
            .encrypt_padded_mut::<NoPadding>(&mut out[16..], body_len)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(out)
    }

    /// Strip the leading IV and decrypt.
    pub fn decrypt(secret: &[u8; 64], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 32 || (ciphertext.len() - 16) % 16 != 0 {
            return Err(CryptoError::DecryptionFailed);
        }

        let (iv, body) = ciphertext.split_at(16);
        let mut buffer = body.to_vec();
        Aes256CbcDec::new(aes_key(secret).into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(buffer)
    }

    /// Full 32-byte HMAC-SHA-256 over `data`.
    ///
    /// Token MACs use the token itself as the key, so the key parameter is
    /// a slice rather than the 64-byte session secret.
    pub fn authenticate(key: &[u8], data: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// Session-secret MAC, keyed with the HMAC half.
    pub fn authenticate_with_secret(secret: &[u8; 64], data: &[u8]) -> [u8; 32] {
        authenticate(hmac_key(secret), data)
    }

    /// Constant-time MAC check.
    pub fn verify(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
        authenticate(key, data).ct_eq(expected).into()
    }
}
