//! Credential management
//!
//! Paginated enumeration of relying parties and their discoverable
//! credentials, credential deletion, and user-entity updates. Stateful
//! sub-commands (`…Begin` / `…GetNext…`) must run back to back on the same
//! session; the convenience methods here do that for the caller.
//!
//! Authenticators that only implement the pre-standard command
//! (FIDO_2_1_PRE) are driven through code 0x41 automatically.

use log::debug;

use openfido_ctap::cbor::{self, MapBuilder, Value};
use openfido_ctap::{CoseKey, CredentialDescriptor, CtapCommand, RelyingParty, User};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::pin::Permissions;

/// credentialManagement sub-command bytes.
mod sub {
    pub const GET_CREDS_METADATA: u8 = 0x01;
    pub const ENUMERATE_RPS_BEGIN: u8 = 0x02;
    pub const ENUMERATE_RPS_NEXT: u8 = 0x03;
    pub const ENUMERATE_CREDS_BEGIN: u8 = 0x04;
    pub const ENUMERATE_CREDS_NEXT: u8 = 0x05;
    pub const DELETE_CREDENTIAL: u8 = 0x06;
    pub const UPDATE_USER_INFORMATION: u8 = 0x07;
}

/// Request map keys.
mod keys {
    pub const SUBCOMMAND: i64 = 0x01;
    pub const SUBCOMMAND_PARAMS: i64 = 0x02;
    pub const PROTOCOL: i64 = 0x03;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x04;
}

/// Sub-command parameter keys.
mod param {
    pub const RP_ID_HASH: i64 = 0x01;
    pub const CREDENTIAL_ID: i64 = 0x02;
    pub const USER: i64 = 0x03;
}

/// Reply map keys.
mod reply {
    pub const EXISTING_COUNT: i64 = 0x01;
    pub const REMAINING_COUNT: i64 = 0x02;
    pub const RP: i64 = 0x03;
    pub const RP_ID_HASH: i64 = 0x04;
    pub const TOTAL_RPS: i64 = 0x05;
    pub const USER: i64 = 0x06;
    pub const CREDENTIAL_ID: i64 = 0x07;
    pub const PUBLIC_KEY: i64 = 0x08;
    pub const TOTAL_CREDENTIALS: i64 = 0x09;
    pub const CRED_PROTECT: i64 = 0x0a;
    pub const LARGE_BLOB_KEY: i64 = 0x0b;
}

/// Credential storage counts from getCredsMetadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialsMetadata {
    /// Discoverable credentials currently stored
    pub existing: u64,
    /// Estimated free credential slots
    pub remaining: u64,
}

/// One relying party with discoverable credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpEntry {
    pub rp: RelyingParty,
    pub rp_id_hash: Vec<u8>,
}

/// One stored discoverable credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialEntry {
    pub user: User,
    pub credential_id: Vec<u8>,
    pub public_key: CoseKey,
    pub cred_protect: Option<u64>,
    pub large_blob_key: Option<Vec<u8>>,
}

impl Device {
    fn mgmt_command(&mut self) -> Result<CtapCommand> {
        Ok(if self.get_info()?.prefers_prototype_commands() {
            CtapCommand::CredentialManagementPre
        } else {
            CtapCommand::CredentialManagement
        })
    }

    /// Authenticated management request: `pinUvAuthParam` covers
    /// `subCommand || subCommandParams`.
    fn mgmt_request(
        &mut self,
        sub_command: u8,
        sub_params: Option<Value>,
        authenticate: bool,
    ) -> Result<Option<Value>> {
        let cmd = self.mgmt_command()?;

        let mut builder = MapBuilder::new().insert(keys::SUBCOMMAND, sub_command as u64);

        if let Some(params) = &sub_params {
            builder = builder.insert(keys::SUBCOMMAND_PARAMS, params.clone());
        }

        if authenticate {
            let token = self.cached_token().ok_or(Error::PinRequired)?;
            let mut message = vec![sub_command];
            if let Some(params) = &sub_params {
                message.extend_from_slice(&cbor::encode(params));
            }
            let auth = token.authenticate(&message);
            builder = builder
                .insert(keys::PROTOCOL, token.protocol().number() as u64)
                .insert(keys::PIN_UV_AUTH_PARAM, auth);
        }

        let params = builder.build();
        let timeout = self.timeout();
        self.cbor_transaction(cmd, Some(&params), timeout)
    }

    /// Stored and remaining discoverable-credential counts.
    pub fn credential_metadata(&mut self, pin: Option<&str>) -> Result<CredentialsMetadata> {
        self.ensure_token(Permissions::CREDENTIAL_MANAGEMENT, None, pin)?;
        let body = self
            .mgmt_request(sub::GET_CREDS_METADATA, None, true)?
            .ok_or(Error::RxNotCbor)?;

        Ok(CredentialsMetadata {
            existing: body
                .map_get(reply::EXISTING_COUNT)
                .and_then(Value::as_unsigned)
                .ok_or(Error::RxInvalidCbor)?,
            remaining: body
                .map_get(reply::REMAINING_COUNT)
                .and_then(Value::as_unsigned)
                .ok_or(Error::RxInvalidCbor)?,
        })
    }

    /// Every relying party with discoverable credentials, via
    /// `enumerateRPsBegin` and `total - 1` `enumerateRPsGetNextRP` calls.
    pub fn enumerate_rps(&mut self, pin: Option<&str>) -> Result<Vec<RpEntry>> {
        self.ensure_token(Permissions::CREDENTIAL_MANAGEMENT, None, pin)?;

        let body = match self.mgmt_request(sub::ENUMERATE_RPS_BEGIN, None, true) {
            Ok(body) => body.ok_or(Error::RxNotCbor)?,
            // An authenticator with no resident credentials reports none
            Err(Error::NoCredentials) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let total = body
            .map_get(reply::TOTAL_RPS)
            .and_then(Value::as_unsigned)
            .unwrap_or(1);
        debug!("enumerate RPs: total={total}");

        let mut rps = Vec::with_capacity(total as usize);
        rps.push(parse_rp_entry(&body)?);
        for _ in 1..total {
            let body = self
                .mgmt_request(sub::ENUMERATE_RPS_NEXT, None, false)?
                .ok_or(Error::RxNotCbor)?;
            rps.push(parse_rp_entry(&body)?);
        }
        Ok(rps)
    }

    /// Every discoverable credential for one relying party, identified by
    /// its rpId hash.
    pub fn enumerate_credentials(
        &mut self,
        rp_id_hash: &[u8],
        pin: Option<&str>,
    ) -> Result<Vec<CredentialEntry>> {
        self.ensure_token(Permissions::CREDENTIAL_MANAGEMENT, None, pin)?;

        let sub_params = MapBuilder::new()
            .insert(param::RP_ID_HASH, rp_id_hash.to_vec())
            .build();
        let body = self
            .mgmt_request(sub::ENUMERATE_CREDS_BEGIN, Some(sub_params), true)?
            .ok_or(Error::RxNotCbor)?;

        let total = body
            .map_get(reply::TOTAL_CREDENTIALS)
            .and_then(Value::as_unsigned)
            .unwrap_or(1);
        debug!("enumerate credentials: total={total}");

        let mut credentials = Vec::with_capacity(total as usize);
        credentials.push(parse_credential_entry(&body)?);
        for _ in 1..total {
            let body = self
                .mgmt_request(sub::ENUMERATE_CREDS_NEXT, None, false)?
                .ok_or(Error::RxNotCbor)?;
            credentials.push(parse_credential_entry(&body)?);
        }
        Ok(credentials)
    }

    /// Permanently delete one credential.
    pub fn delete_credential(&mut self, credential_id: &[u8], pin: Option<&str>) -> Result<()> {
        self.ensure_token(Permissions::CREDENTIAL_MANAGEMENT, None, pin)?;

        let sub_params = MapBuilder::new()
            .insert(
                param::CREDENTIAL_ID,
                CredentialDescriptor::public_key(credential_id.to_vec()).to_value(),
            )
            .build();
        self.mgmt_request(sub::DELETE_CREDENTIAL, Some(sub_params), true)?;
        Ok(())
    }

    /// Update the user entity stored with a credential.
    pub fn update_user_info(
        &mut self,
        credential_id: &[u8],
        user: &User,
        pin: Option<&str>,
    ) -> Result<()> {
        self.ensure_token(Permissions::CREDENTIAL_MANAGEMENT, None, pin)?;

        let sub_params = MapBuilder::new()
            .insert(
                param::CREDENTIAL_ID,
                CredentialDescriptor::public_key(credential_id.to_vec()).to_value(),
            )
            .insert(param::USER, user.to_value())
            .build();
        self.mgmt_request(sub::UPDATE_USER_INFORMATION, Some(sub_params), true)?;
        Ok(())
    }
}

fn parse_rp_entry(body: &Value) -> Result<RpEntry> {
    let rp = body
        .map_get(reply::RP)
        .and_then(RelyingParty::from_value)
        .ok_or(Error::RxInvalidCbor)?;
    let rp_id_hash = body
        .map_get(reply::RP_ID_HASH)
        .and_then(Value::as_bytes)
        .ok_or(Error::RxInvalidCbor)?
        .to_vec();
    Ok(RpEntry { rp, rp_id_hash })
}

fn parse_credential_entry(body: &Value) -> Result<CredentialEntry> {
    let user = body
        .map_get(reply::USER)
        .and_then(User::from_value)
        .ok_or(Error::RxInvalidCbor)?;
    let credential_id = body
        .map_get(reply::CREDENTIAL_ID)
        .and_then(CredentialDescriptor::from_value)
        .ok_or(Error::RxInvalidCbor)?
        .id;
    let public_key = body
        .map_get(reply::PUBLIC_KEY)
        .and_then(CoseKey::from_value)
        .ok_or(Error::RxInvalidCbor)?;
    let cred_protect = body.map_get(reply::CRED_PROTECT).and_then(Value::as_unsigned);
    let large_blob_key = body
        .map_get(reply::LARGE_BLOB_KEY)
        .and_then(Value::as_bytes)
        .map(<[u8]>::to_vec);

    Ok(CredentialEntry {
        user,
        credential_id,
        public_key,
        cred_protect,
        large_blob_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use openfido_ctap::cbor::MapBuilder;

    #[test]
    fn parse_rp_entry_fields() {
        let body = MapBuilder::new()
            .insert(reply::RP, RelyingParty::new("example.com").to_value())
            .insert(reply::RP_ID_HASH, vec![0xAA; 32])
            .insert(reply::TOTAL_RPS, 2u64)
            .build();
        let entry = parse_rp_entry(&body).unwrap();
        assert_eq!(entry.rp.id, "example.com");
        assert_eq!(entry.rp_id_hash, vec![0xAA; 32]);
    }

    #[test]
    fn parse_credential_entry_fields() {
        let key = MapBuilder::new()
            .insert(1, 2i64)
            .insert(3, -7i64)
            .insert(-1, 1i64)
            .insert(-2, vec![0u8; 32])
            .insert(-3, vec![0u8; 32])
            .build();
        let body = MapBuilder::new()
            .insert(reply::USER, User::new(vec![1, 2]).to_value())
            .insert(
                reply::CREDENTIAL_ID,
                CredentialDescriptor::public_key(vec![3, 4]).to_value(),
            )
            .insert(reply::PUBLIC_KEY, key)
            .insert(reply::TOTAL_CREDENTIALS, 1u64)
            .insert(reply::CRED_PROTECT, 2u64)
            .build();
        let entry = parse_credential_entry(&body).unwrap();
        assert_eq!(entry.credential_id, [3, 4]);
        assert_eq!(entry.user.id, [1, 2]);
        assert_eq!(entry.cred_protect, Some(2));
        assert!(entry.large_blob_key.is_none());
    }

    #[test]
    fn malformed_entries_rejected() {
        let body = MapBuilder::new().insert(reply::TOTAL_RPS, 1u64).build();
        assert!(parse_rp_entry(&body).is_err());
        assert!(parse_credential_entry(&body).is_err());
    }
}
