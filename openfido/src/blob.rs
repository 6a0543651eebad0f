//! Large-blob storage
//!
//! The authenticator stores one opaque byte array (the serialized
//! large-blob array) whose last 16 bytes are a truncated SHA-256 over the
//! rest. Reads fetch it in `maxFragmentLength` chunks and verify the
//! checksum; writes append the checksum and upload authenticated
//! fragments. Decrypting per-credential entries with their `largeBlobKey`
//! is the caller's concern.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#authenticatorLargeBlobs>

use log::debug;
use sha2::{Digest, Sha256};

use openfido_ctap::cbor::{MapBuilder, Value};
use openfido_ctap::CtapCommand;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::pin::Permissions;

/// largeBlobs request map keys.
mod keys {
    pub const GET: i64 = 0x01;
    pub const SET: i64 = 0x02;
    pub const OFFSET: i64 = 0x03;
    pub const LENGTH: i64 = 0x04;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x05;
    pub const PROTOCOL: i64 = 0x06;
}

/// Reply key carrying a fragment.
const REPLY_CONFIG: i64 = 0x01;

/// Checksum trailer length.
const CHECKSUM_LEN: usize = 16;

/// Fallback when getInfo does not report maxMsgSize.
const DEFAULT_MAX_MSG_SIZE: u64 = 1024;

fn checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(data);
    digest[..CHECKSUM_LEN].try_into().unwrap()
}

impl Device {
    /// Fragment ceiling for large-blob transfers: `maxMsgSize - 64`.
    fn max_fragment_length(&mut self) -> Result<usize> {
        let max_msg = self
            .get_info()?
            .max_msg_size
            .unwrap_or(DEFAULT_MAX_MSG_SIZE);
        Ok(max_msg.saturating_sub(64) as usize)
    }

    /// Read the serialized large-blob array. The trailing checksum is
    /// verified and stripped.
    pub fn read_large_blob_array(&mut self) -> Result<Vec<u8>> {
        let fragment_len = self.max_fragment_length()?;
        if fragment_len == 0 {
            return Err(Error::UnsupportedOption);
        }

        let mut serialized = Vec::new();
        loop {
            let params = MapBuilder::new()
                .insert(keys::GET, fragment_len as u64)
                .insert(keys::OFFSET, serialized.len() as u64)
                .build();
            let timeout = self.timeout();
            let body = self
                .cbor_transaction(CtapCommand::LargeBlobs, Some(&params), timeout)?
                .ok_or(Error::RxNotCbor)?;

            let fragment = body
                .map_get(REPLY_CONFIG)
                .and_then(Value::as_bytes)
                .ok_or(Error::RxInvalidCbor)?;
            serialized.extend_from_slice(fragment);

            // A short fragment ends the array
            if fragment.len() < fragment_len {
                break;
            }
        }
        debug!("large blob array: {} byte(s)", serialized.len());

        if serialized.len() < CHECKSUM_LEN + 1 {
            return Err(Error::RxInvalidLen);
        }
        let (body, trailer) = serialized.split_at(serialized.len() - CHECKSUM_LEN);
        if checksum(body)[..] != trailer[..] {
            return Err(Error::RxInvalidSig);
        }
        Ok(body.to_vec())
    }

    /// Replace the large-blob array. The checksum trailer is appended
    /// here; `data` is the bare serialized array. Requires a token with
    /// the large-blob-write permission.
    pub fn write_large_blob_array(&mut self, data: &[u8], pin: Option<&str>) -> Result<()> {
        let fragment_len = self.max_fragment_length()?;
        if fragment_len == 0 {
            return Err(Error::UnsupportedOption);
        }
        if let Some(max) = self.get_info()?.max_serialized_large_blob_array {
            if data.len() + CHECKSUM_LEN > max as usize {
                return Err(Error::LargeBlobStorageFull);
            }
        }

        self.ensure_token(Permissions::LARGE_BLOB_WRITE, None, pin)?;

        let mut serialized = data.to_vec();
        serialized.extend_from_slice(&checksum(data));
        let total = serialized.len();

        let mut offset = 0usize;
        while offset < total {
            let end = (offset + fragment_len).min(total);
            let fragment = &serialized[offset..end];

            // pinUvAuthParam covers
            // 0xff*32 || 0x0c00 || uint32le(offset) || SHA-256(fragment)
            let mut message = vec![0xff; 32];
            message.extend_from_slice(&[0x0c, 0x00]);
            message.extend_from_slice(&(offset as u32).to_le_bytes());
            message.extend_from_slice(&Sha256::digest(fragment));

            let token = self.cached_token().ok_or(Error::PinRequired)?;
            let auth = token.authenticate(&message);
            let protocol = token.protocol().number();

            let mut builder = MapBuilder::new()
                .insert(keys::SET, fragment.to_vec())
                .insert(keys::OFFSET, offset as u64);
            if offset == 0 {
                builder = builder.insert(keys::LENGTH, total as u64);
            }
            let params = builder
                .insert(keys::PIN_UV_AUTH_PARAM, auth)
                .insert(keys::PROTOCOL, protocol as u64)
                .build();

            let timeout = self.timeout();
            self.cbor_transaction(CtapCommand::LargeBlobs, Some(&params), timeout)?;
            offset = end;
        }
        debug!("large blob array written: {total} byte(s)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_truncated_sha256() {
        let data = b"large blob body";
        let full = Sha256::digest(data);
        assert_eq!(checksum(data), full[..16]);
    }

    #[test]
    fn checksum_of_empty_array() {
        // The "empty" serialized array is a zero-length body plus its
        // checksum, which authenticators initialise storage with
        let empty = checksum(b"\x80");
        assert_eq!(empty.len(), CHECKSUM_LEN);
    }
}
