//! Authenticator data parsing
//!
//! Both makeCredential and getAssertion replies carry an opaque
//! `authData` byte string: a fixed 37-byte prefix, optionally followed by
//! attested credential data and an extensions map.
//!
//! Layout: `rpIdHash[32] || flags[1] || signCount[4] ||
//! (aaguid[16] || credIdLen[2] || credId || credPubKey)? || extensions?`

use std::fmt;

use crate::cbor::{self, CborError, Value};
use crate::types::CoseKey;

/// Flag bits in the authenticator data.
pub mod flags {
    /// User present
    pub const UP: u8 = 0x01;
    /// User verified
    pub const UV: u8 = 0x04;
    /// Backup eligible
    pub const BE: u8 = 0x08;
    /// Backed up
    pub const BS: u8 = 0x10;
    /// Attested credential data follows
    pub const AT: u8 = 0x40;
    /// Extension map follows
    pub const ED: u8 = 0x80;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDataError {
    /// Shorter than its declared contents
    Truncated,

    /// Bytes left over after the declared contents
    TrailingBytes,

    /// Embedded COSE key or extension map failed to decode
    Cbor(CborError),
}

impl fmt::Display for AuthDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthDataError::Truncated => write!(f, "authenticator data truncated"),
            AuthDataError::TrailingBytes => {
                write!(f, "authenticator data has trailing bytes")
            }
            AuthDataError::Cbor(e) => write!(f, "authenticator data: {e}"),
        }
    }
}

impl std::error::Error for AuthDataError {}

/// Credential attested by a makeCredential reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    pub public_key: CoseKey,
}

/// Parsed view of an `authData` byte string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
    pub extensions: Option<Value>,
}

impl AuthenticatorData {
    /// Parse an authData blob. The embedded COSE key is decoded strictly:
    /// it feeds signature verification.
    pub fn parse(data: &[u8]) -> Result<Self, AuthDataError> {
        if data.len() < 37 {
            return Err(AuthDataError::Truncated);
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..32]);
        let flags = data[32];
        let sign_count = u32::from_be_bytes(data[33..37].try_into().unwrap());

        let mut rest = &data[37..];

        let attested_credential = if flags & flags::AT != 0 {
            if rest.len() < 18 {
                return Err(AuthDataError::Truncated);
            }
            let mut aaguid = [0u8; 16];
            aaguid.copy_from_slice(&rest[..16]);
            let id_len = u16::from_be_bytes(rest[16..18].try_into().unwrap()) as usize;
            rest = &rest[18..];
            if rest.len() < id_len {
                return Err(AuthDataError::Truncated);
            }
            let credential_id = rest[..id_len].to_vec();
            rest = &rest[id_len..];

            let (key_value, used) =
                cbor::decode_strict(rest).map_err(AuthDataError::Cbor)?;
            rest = &rest[used..];
            let public_key =
                CoseKey::from_value(&key_value).ok_or(AuthDataError::Cbor(CborError::BadType))?;

            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                public_key,
            })
        } else {
            None
        };

        let extensions = if flags & flags::ED != 0 {
            let (ext, used) = cbor::decode(rest).map_err(AuthDataError::Cbor)?;
            rest = &rest[used..];
            Some(ext)
        } else {
            None
        };

        if !rest.is_empty() {
            return Err(AuthDataError::TrailingBytes);
        }

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
            extensions,
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & flags::UP != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & flags::UV != 0
    }
}
