//! Error types for cryptographic operations

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Peer public key is not a valid P-256 point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature bytes are malformed or do not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// COSE algorithm this library cannot verify
    #[error("unsupported COSE algorithm {0}")]
    UnsupportedAlgorithm(i64),

    /// Ciphertext length is not usable (missing IV or not block-aligned)
    #[error("decryption failed")]
    DecryptionFailed,

    /// Plaintext is not a multiple of the AES block size
    #[error("encryption failed")]
    EncryptionFailed,
}

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;
