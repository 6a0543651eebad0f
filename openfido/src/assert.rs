//! getAssertion workflow
//!
//! Builds the request map, acquires a pinUvAuthToken when user
//! verification is wanted, iterates getNextAssertion for multi-credential
//! replies, and verifies what comes back: the rpIdHash, the UP/UV flags
//! the caller asked for, and the signature when the caller supplied the
//! credential's public key.

use log::debug;
use sha2::{Digest, Sha256};

use openfido_ctap::cbor::{MapBuilder, Value};
use openfido_ctap::{AuthenticatorData, CoseKey, CredentialDescriptor, CtapCommand, User};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::pin::{Encapsulation, Permissions, PinUvAuthProtocol, SharedSecret};

/// getAssertion request map keys.
mod keys {
    pub const RP_ID: i64 = 0x01;
    pub const CLIENT_DATA_HASH: i64 = 0x02;
    pub const ALLOW_LIST: i64 = 0x03;
    pub const EXTENSIONS: i64 = 0x04;
    pub const OPTIONS: i64 = 0x05;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x06;
    pub const PIN_UV_AUTH_PROTOCOL: i64 = 0x07;
}

/// getAssertion reply map keys.
mod reply {
    pub const CREDENTIAL: i64 = 0x01;
    pub const AUTH_DATA: i64 = 0x02;
    pub const SIGNATURE: i64 = 0x03;
    pub const USER: i64 = 0x04;
    pub const NUMBER_OF_CREDENTIALS: i64 = 0x05;
    pub const LARGE_BLOB_KEY: i64 = 0x07;
}

/// hmac-secret salts: one or two 32-byte values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmacSecretSalts {
    pub salt1: [u8; 32],
    pub salt2: Option<[u8; 32]>,
}

/// A getAssertion request under construction.
#[derive(Debug)]
pub struct GetAssertionRequest {
    rp_id: String,
    client_data_hash: [u8; 32],
    allow_list: Vec<CredentialDescriptor>,
    up: Option<bool>,
    uv: Option<bool>,
    pin: Option<String>,
    timeout_ms: Option<i32>,
    hmac_salts: Option<HmacSecretSalts>,
    large_blob_key: bool,
    verify_keys: Vec<(Vec<u8>, CoseKey)>,
}

impl GetAssertionRequest {
    pub fn new(rp_id: impl Into<String>, client_data_hash: [u8; 32]) -> Self {
        Self {
            rp_id: rp_id.into(),
            client_data_hash,
            allow_list: Vec::new(),
            up: None,
            uv: None,
            pin: None,
            timeout_ms: None,
            hmac_salts: None,
            large_blob_key: false,
            verify_keys: Vec::new(),
        }
    }

    /// Restrict the assertion to a known credential.
    pub fn allow_credential(mut self, id: Vec<u8>) -> Self {
        self.allow_list.push(CredentialDescriptor::public_key(id));
        self
    }

    pub fn with_user_presence(mut self, up: bool) -> Self {
        self.up = Some(up);
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

    /// Request the hmac-secret extension with one or two salts.
    pub fn with_hmac_secret(mut self, salt1: [u8; 32], salt2: Option<[u8; 32]>) -> Self {
        self.hmac_salts = Some(HmacSecretSalts { salt1, salt2 });
        self
    }

    /// Ask for the credential's largeBlobKey alongside the assertion.
    pub fn with_large_blob_key(mut self) -> Self {
        self.large_blob_key = true;
        self
    }

    /// Provide the credential's public key; the matching assertion's
    /// signature is then verified before it is returned.
    pub fn with_public_key(mut self, credential_id: Vec<u8>, key: CoseKey) -> Self {
        self.verify_keys.push((credential_id, key));
        self
    }
}

/// One verified assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub credential_id: Vec<u8>,
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
    pub signature: Vec<u8>,
    pub user: Option<User>,
    pub large_blob_key: Option<Vec<u8>>,
    /// Decrypted hmac-secret output (32 or 64 bytes) when requested
    pub hmac_secret: Option<Vec<u8>>,
}

impl Device {
    /// Run the getAssertion workflow. Returns every assertion the
    /// authenticator announces, in order; `getNextAssertion` follow-ups
    /// are issued back to back on the same channel, as required.
    pub fn get_assertion(&mut self, request: GetAssertionRequest) -> Result<Vec<Assertion>> {
        let timeout = request.timeout_ms.unwrap_or(self.timeout());

        let wants_uv = request.uv == Some(true) || request.pin.is_some();
        if wants_uv {
            self.ensure_token(
                Permissions::GET_ASSERTION,
                Some(&request.rp_id),
                request.pin.as_deref(),
            )?;
        }

        // hmac-secret runs its own key agreement; the output comes back
        // encrypted under this secret, not the token's.
        let hmac_encapsulation = match &request.hmac_salts {
            Some(salts) => {
                let protocol = self.pin_protocol().unwrap_or(PinUvAuthProtocol::V1);
                let encapsulation = Encapsulation::new(self, protocol)?;
                let ext = hmac_secret_input(&encapsulation, salts)?;
                Some((encapsulation, ext))
            }
            None => None,
        };

        let mut builder = MapBuilder::new()
            .insert(keys::RP_ID, request.rp_id.as_str())
            .insert(keys::CLIENT_DATA_HASH, request.client_data_hash.to_vec());

        if !request.allow_list.is_empty() {
            let list: Vec<Value> = request
                .allow_list
                .iter()
                .map(CredentialDescriptor::to_value)
                .collect();
            builder = builder.insert(keys::ALLOW_LIST, Value::Array(list));
        }

        let mut extensions = Vec::new();
        if let Some((_, ext)) = &hmac_encapsulation {
            extensions.push((Value::from("hmac-secret"), ext.clone()));
        }
        if request.large_blob_key {
            extensions.push((Value::from("largeBlobKey"), Value::Bool(true)));
        }
        if !extensions.is_empty() {
            builder = builder.insert(keys::EXTENSIONS, Value::Map(extensions));
        }

        // The uv option is superseded by pinUvAuthParam; send it only when
        // no token backs the request.
        let mut options = Vec::new();
        if let Some(up) = request.up {
            options.push((Value::from("up"), Value::Bool(up)));
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

        let params = builder.build();
        let body = self
            .cbor_transaction(CtapCommand::GetAssertion, Some(&params), timeout)?
            .ok_or(Error::RxNotCbor)?;

        let first = parse_assertion(&body, &request.allow_list)?;
        let count = body
            .map_get(reply::NUMBER_OF_CREDENTIALS)
            .and_then(Value::as_unsigned)
            .unwrap_or(1);
        debug!("getAssertion: {count} credential(s)");

        let mut assertions = Vec::with_capacity(count as usize);
        assertions.push(first);

        // Remaining assertions follow immediately, with no intervening
        // command on this channel.
        for _ in 1..count {
            let body = self
                .cbor_transaction(CtapCommand::GetNextAssertion, None, timeout)?
                .ok_or(Error::RxNotCbor)?;
            assertions.push(parse_assertion(&body, &request.allow_list)?);
        }

        let expect_uv = wants_uv;
        let expect_up = request.up.unwrap_or(true);
        for assertion in &mut assertions {
            check_assertion(assertion, &request, expect_up, expect_uv)?;

            if let Some((encapsulation, _)) = &hmac_encapsulation {
                decrypt_hmac_secret(assertion, &encapsulation.secret)?;
            }
        }

        Ok(assertions)
    }
}

/// Build the hmac-secret extension input map.
fn hmac_secret_input(
    encapsulation: &Encapsulation,
    salts: &HmacSecretSalts,
) -> Result<Value> {
    let mut salt_bytes = salts.salt1.to_vec();
    if let Some(salt2) = &salts.salt2 {
        salt_bytes.extend_from_slice(salt2);
    }

    let salt_enc = encapsulation.secret.encrypt(&salt_bytes)?;
    let salt_auth = encapsulation.secret.authenticate(&salt_enc);

    let mut builder = MapBuilder::new()
        .insert(0x01, encapsulation.platform_key.value().clone())
        .insert(0x02, salt_enc)
        .insert(0x03, salt_auth);
    if encapsulation.secret.protocol() == PinUvAuthProtocol::V2 {
        builder = builder.insert(0x04, 2u64);
    }
    Ok(builder.build())
}

fn parse_assertion(body: &Value, allow_list: &[CredentialDescriptor]) -> Result<Assertion> {
    let credential_id = match body.map_get(reply::CREDENTIAL) {
        Some(cred) => {
            CredentialDescriptor::from_value(cred)
                .ok_or(Error::RxInvalidCbor)?
                .id
        }
        // The credential may be omitted when the allow list named
        // exactly one
        None if allow_list.len() == 1 => allow_list[0].id.clone(),
        None => return Err(Error::RxInvalidCbor),
    };

    let auth_data_raw = body
        .map_get(reply::AUTH_DATA)
        .and_then(Value::as_bytes)
        .ok_or(Error::RxInvalidCbor)?
        .to_vec();
    let auth_data = AuthenticatorData::parse(&auth_data_raw).map_err(|_| Error::RxInvalidCbor)?;

    let signature = body
        .map_get(reply::SIGNATURE)
        .and_then(Value::as_bytes)
        .ok_or(Error::RxInvalidCbor)?
        .to_vec();

    let user = body.map_get(reply::USER).and_then(User::from_value);
    let large_blob_key = body
        .map_get(reply::LARGE_BLOB_KEY)
        .and_then(Value::as_bytes)
        .map(<[u8]>::to_vec);

    Ok(Assertion {
        credential_id,
        auth_data_raw,
        auth_data,
        signature,
        user,
        large_blob_key,
        hmac_secret: None,
    })
}

/// Structural checks plus signature verification when a key is known.
fn check_assertion(
    assertion: &Assertion,
    request: &GetAssertionRequest,
    expect_up: bool,
    expect_uv: bool,
) -> Result<()> {
    let rp_id_hash: [u8; 32] = Sha256::digest(request.rp_id.as_bytes()).into();
    if assertion.auth_data.rp_id_hash != rp_id_hash {
        return Err(Error::RxInvalidSig);
    }
    if expect_up && !assertion.auth_data.user_present() {
        return Err(Error::RxInvalidSig);
    }
    if expect_uv && !assertion.auth_data.user_verified() {
        return Err(Error::RxInvalidSig);
    }

    let key = request
        .verify_keys
        .iter()
        .find(|(id, _)| *id == assertion.credential_id)
        .map(|(_, key)| key);
    let Some(key) = key else {
        // No key supplied for this credential; the caller verifies
        return Ok(());
    };

    let mut message = assertion.auth_data_raw.clone();
    message.extend_from_slice(&request.client_data_hash);

    let point = key.p256_point().ok_or(Error::UnsupportedAlgorithm)?;
    openfido_crypto::verify::verify(key.alg, &point, &message, &assertion.signature)?;
    Ok(())
}

/// Replace the encrypted hmac-secret output with its plaintext.
fn decrypt_hmac_secret(assertion: &mut Assertion, secret: &SharedSecret) -> Result<()> {
    let Some(extensions) = &assertion.auth_data.extensions else {
        return Ok(());
    };
    let Some(output) = extensions.map_get_text("hmac-secret").and_then(Value::as_bytes) else {
        return Ok(());
    };

    let plain = secret.decrypt(output).map_err(|_| Error::RxInvalidCbor)?;
    if plain.len() != 32 && plain.len() != 64 {
        return Err(Error::RxInvalidLen);
    }
    assertion.hmac_secret = Some(plain);
    Ok(())
}
