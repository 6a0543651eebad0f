//! makeCredential workflow
//!
//! Builds the request map, acquires a pinUvAuthToken when the credential
//! is PIN/UV protected, and decodes the attestation object the
//! authenticator returns. Attestation replies are security-critical and
//! parsed strictly; chain verification against a trust root stays with
//! the caller.

use log::debug;

use openfido_ctap::cbor::{MapBuilder, Value};
use openfido_ctap::{
    Attestation, CredentialDescriptor, CtapCommand, PublicKeyCredentialParameters, RelyingParty,
    User,
};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::pin::Permissions;

/// makeCredential request map keys.
mod keys {
    pub const CLIENT_DATA_HASH: i64 = 0x01;
    pub const RP: i64 = 0x02;
    pub const USER: i64 = 0x03;
    pub const PUB_KEY_CRED_PARAMS: i64 = 0x04;
    pub const EXCLUDE_LIST: i64 = 0x05;
    pub const EXTENSIONS: i64 = 0x06;
    pub const OPTIONS: i64 = 0x07;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x08;
    pub const PIN_UV_AUTH_PROTOCOL: i64 = 0x09;
    pub const ENTERPRISE_ATTESTATION: i64 = 0x0a;
}

/// A makeCredential request under construction.
#[derive(Debug)]
pub struct MakeCredentialRequest {
    client_data_hash: [u8; 32],
    rp: RelyingParty,
    user: User,
    algorithms: Vec<PublicKeyCredentialParameters>,
    exclude_list: Vec<CredentialDescriptor>,
    resident_key: Option<bool>,
    uv: Option<bool>,
    pin: Option<String>,
    timeout_ms: Option<i32>,
    cred_protect: Option<u8>,
    hmac_secret: bool,
    cred_blob: Option<Vec<u8>>,
    min_pin_length: bool,
    large_blob_key: bool,
    enterprise_attestation: Option<u64>,
}

impl MakeCredentialRequest {
    pub fn new(client_data_hash: [u8; 32], rp: RelyingParty, user: User) -> Self {
        Self {
            client_data_hash,
            rp,
            user,
            algorithms: vec![PublicKeyCredentialParameters::ES256],
            exclude_list: Vec::new(),
            resident_key: None,
            uv: None,
            pin: None,
            timeout_ms: None,
            cred_protect: None,
            hmac_secret: false,
            cred_blob: None,
            min_pin_length: false,
            large_blob_key: false,
            enterprise_attestation: None,
        }
    }

    /// Accepted COSE algorithms in preference order; replaces the ES256
    /// default.
    pub fn with_algorithms(mut self, algorithms: Vec<PublicKeyCredentialParameters>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Fail with `CredExcluded` if the authenticator already holds one of
    /// these credentials for the RP.
    pub fn exclude_credential(mut self, id: Vec<u8>) -> Self {
        self.exclude_list.push(CredentialDescriptor::public_key(id));
        self
    }

    /// Ask for a discoverable (resident) credential.
    pub fn with_resident_key(mut self, rk: bool) -> Self {
        self.resident_key = Some(rk);
        self
    }

    pub fn with_user_verification(mut self, uv: bool) -> Self {
        self.uv = Some(uv);
        self
    }

    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: i32) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// credProtect policy: 1 userVerificationOptional, 2 ...WithCredentialIDList,
    /// 3 userVerificationRequired.
    pub fn with_cred_protect(mut self, policy: u8) -> Self {
        self.cred_protect = Some(policy);
        self
    }

    /// Enable the hmac-secret extension for later assertions.
    pub fn with_hmac_secret(mut self) -> Self {
        self.hmac_secret = true;
        self
    }

    /// Store an opaque credBlob with the credential.
    pub fn with_cred_blob(mut self, blob: Vec<u8>) -> Self {
        self.cred_blob = Some(blob);
        self
    }

    /// Ask the authenticator to report its minimum PIN length to the RP.
    pub fn with_min_pin_length(mut self) -> Self {
        self.min_pin_length = true;
        self
    }

    /// Generate a largeBlobKey for this credential.
    pub fn with_large_blob_key(mut self) -> Self {
        self.large_blob_key = true;
        self
    }

    /// Request enterprise attestation (1 = vendor-facilitated,
    /// 2 = platform-managed).
    pub fn with_enterprise_attestation(mut self, level: u64) -> Self {
        self.enterprise_attestation = Some(level);
        self
    }
}

impl Device {
    /// Run the makeCredential workflow and decode the attestation object.
    pub fn make_credential(&mut self, request: MakeCredentialRequest) -> Result<Attestation> {
        if request.algorithms.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let timeout = request.timeout_ms.unwrap_or(self.timeout());

        let wants_uv = request.uv == Some(true) || request.pin.is_some();
        if wants_uv {
            self.ensure_token(
                Permissions::MAKE_CREDENTIAL,
                Some(&request.rp.id),
                request.pin.as_deref(),
            )?;
        }

        let mut builder = MapBuilder::new()
            .insert(keys::CLIENT_DATA_HASH, request.client_data_hash.to_vec())
            .insert(keys::RP, request.rp.to_value())
            .insert(keys::USER, request.user.to_value());

        let params: Vec<Value> = request
            .algorithms
            .iter()
            .map(PublicKeyCredentialParameters::to_value)
            .collect();
        builder = builder.insert(keys::PUB_KEY_CRED_PARAMS, Value::Array(params));

        if !request.exclude_list.is_empty() {
            let list: Vec<Value> = request
                .exclude_list
                .iter()
                .map(CredentialDescriptor::to_value)
                .collect();
            builder = builder.insert(keys::EXCLUDE_LIST, Value::Array(list));
        }

        let mut extensions = Vec::new();
        if let Some(policy) = request.cred_protect {
            extensions.push((Value::from("credProtect"), Value::Unsigned(policy.into())));
        }
        if let Some(blob) = &request.cred_blob {
            extensions.push((Value::from("credBlob"), Value::from(blob.clone())));
        }
        if request.hmac_secret {
            extensions.push((Value::from("hmac-secret"), Value::Bool(true)));
        }
        if request.large_blob_key {
            extensions.push((Value::from("largeBlobKey"), Value::Bool(true)));
        }
        if request.min_pin_length {
            extensions.push((Value::from("minPinLength"), Value::Bool(true)));
        }
        if !extensions.is_empty() {
            builder = builder.insert(keys::EXTENSIONS, Value::Map(extensions));
        }

        let mut options = Vec::new();
        if let Some(rk) = request.resident_key {
            options.push((Value::from("rk"), Value::Bool(rk)));
        }
        if let Some(uv) = request.uv {
            if !wants_uv || self.cached_token().is_none() {
                options.push((Value::from("uv"), Value::Bool(uv)));
            }
        }
        if !options.is_empty() {
            builder = builder.insert(keys::OPTIONS, Value::Map(options));
        }

        if wants_uv {
            if let Some(token) = self.cached_token() {
                let param = token.authenticate(&request.client_data_hash);
                builder = builder
                    .insert(keys::PIN_UV_AUTH_PARAM, param)
                    .insert(
                        keys::PIN_UV_AUTH_PROTOCOL,
                        token.protocol().number() as u64,
                    );
            }
        }

        builder = builder.insert_opt(keys::ENTERPRISE_ATTESTATION, request.enterprise_attestation);

        let params = builder.build();
        let body = self.cbor_transaction_raw(CtapCommand::MakeCredential, Some(&params), timeout)?;
        if body.is_empty() {
            return Err(Error::RxNotCbor);
        }

        let attestation = Attestation::parse(&body).map_err(|e| {
            debug!("attestation: {e}");
            match e {
                openfido_ctap::AttestationError::Cbor(_) => Error::RxInvalidCbor,
                _ => Error::RxInvalidLen,
            }
        })?;
        debug!(
            "makeCredential: fmt={} credential {} bytes",
            attestation.statement.format(),
            attestation
                .auth_data
                .attested_credential
                .as_ref()
                .map(|c| c.credential_id.len())
                .unwrap_or(0)
        );
        Ok(attestation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_es256() {
        let request = MakeCredentialRequest::new(
            [0; 32],
            RelyingParty::new("example.com"),
            User::new(vec![1]),
        );
        assert_eq!(request.algorithms, [PublicKeyCredentialParameters::ES256]);
        assert!(request.exclude_list.is_empty());
    }

    #[test]
    fn empty_algorithm_list_is_caller_error() {
        let mut dev = Device::new();
        let request = MakeCredentialRequest::new(
            [0; 32],
            RelyingParty::new("example.com"),
            User::new(vec![1]),
        )
        .with_algorithms(Vec::new());
        assert_eq!(dev.make_credential(request), Err(Error::InvalidArgument));
    }
}
