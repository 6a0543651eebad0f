//! Cryptographic primitives for the CTAP client
//!
//! - **ECDH**: P-256 key agreement for the PIN/UV protocols
//! - **PIN protocols**: protocol 1 and 2 encryption, decryption, and MACs
//! - **Verification**: ES256 assertion signatures
//!
//! All constructions follow the FIDO2 specification:
//! <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html>

pub mod ecdh;
pub mod error;
pub mod pin_protocol;
pub mod verify;

pub use ecdh::PlatformKeyAgreement;
pub use error::{CryptoError, Result};
