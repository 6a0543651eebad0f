//! PIN/UV authentication engine
//!
//! Implements the authenticatorClientPIN (0x06) surface: key agreement
//! with the authenticator, token acquisition under a permission set, PIN
//! set/change, and retry counters. Acquired tokens are cached on the
//! session; [`crate::device::Device`] drops the cache whenever the
//! authenticator signals staleness.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#authenticatorClientPIN>

use std::ops::BitOr;

use log::debug;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use openfido_crypto::pin_protocol::{v1, v2};
use openfido_crypto::PlatformKeyAgreement;
use openfido_ctap::cbor::{MapBuilder, Value};
use openfido_ctap::{CoseKey, CtapCommand};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::token::PinToken;

/// Negotiated pinUvAuth protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinUvAuthProtocol {
    V1 = 1,
    V2 = 2,
}

impl PinUvAuthProtocol {
    pub fn from_number(n: u64) -> Option<Self> {
        match n {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        self as u8
    }
}

/// Token permission bits for getPinUvAuthToken*WithPermissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u8);

impl Permissions {
    pub const MAKE_CREDENTIAL: Permissions = Permissions(0x01);
    pub const GET_ASSERTION: Permissions = Permissions(0x02);
    pub const CREDENTIAL_MANAGEMENT: Permissions = Permissions(0x04);
    pub const BIO_ENROLLMENT: Permissions = Permissions(0x08);
    pub const LARGE_BLOB_WRITE: Permissions = Permissions(0x10);
    pub const AUTHENTICATOR_CONFIG: Permissions = Permissions(0x20);

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

/// clientPIN sub-command bytes.
mod sub {
    pub const GET_PIN_RETRIES: u8 = 0x01;
    pub const GET_KEY_AGREEMENT: u8 = 0x02;
    pub const SET_PIN: u8 = 0x03;
    pub const CHANGE_PIN: u8 = 0x04;
    pub const GET_PIN_TOKEN: u8 = 0x05;
    pub const GET_TOKEN_USING_UV: u8 = 0x06;
    pub const GET_UV_RETRIES: u8 = 0x07;
    pub const GET_TOKEN_USING_PIN: u8 = 0x09;
}

/// clientPIN request map keys.
mod keys {
    pub const PROTOCOL: i64 = 0x01;
    pub const SUBCOMMAND: i64 = 0x02;
    pub const KEY_AGREEMENT: i64 = 0x03;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x04;
    pub const NEW_PIN_ENC: i64 = 0x05;
    pub const PIN_HASH_ENC: i64 = 0x06;
    pub const PERMISSIONS: i64 = 0x09;
    pub const RP_ID: i64 = 0x0a;
}

/// clientPIN reply map keys.
mod reply {
    pub const KEY_AGREEMENT: i64 = 0x01;
    pub const PIN_UV_AUTH_TOKEN: i64 = 0x02;
    pub const PIN_RETRIES: i64 = 0x03;
    pub const POWER_CYCLE_STATE: i64 = 0x04;
    pub const UV_RETRIES: i64 = 0x05;
}

/// Session secret shared with the authenticator for one encapsulation.
pub(crate) enum SharedSecret {
    V1([u8; 32]),
    V2([u8; 64]),
}

impl SharedSecret {
    pub(crate) fn protocol(&self) -> PinUvAuthProtocol {
        match self {
            SharedSecret::V1(_) => PinUvAuthProtocol::V1,
            SharedSecret::V2(_) => PinUvAuthProtocol::V2,
        }
    }

    pub(crate) fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self {
            SharedSecret::V1(key) => Ok(v1::encrypt(key, plaintext)?),
            SharedSecret::V2(secret) => Ok(v2::encrypt(secret, plaintext)?),
        }
    }

    pub(crate) fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        match self {
            SharedSecret::V1(key) => Ok(v1::decrypt(key, ciphertext)?),
            SharedSecret::V2(secret) => Ok(v2::decrypt(secret, ciphertext)?),
        }
    }

    pub(crate) fn authenticate(&self, data: &[u8]) -> Vec<u8> {
        match self {
            SharedSecret::V1(key) => v1::authenticate(key, data).to_vec(),
            SharedSecret::V2(secret) => v2::authenticate_with_secret(secret, data).to_vec(),
        }
    }
}

/// One platform/authenticator key agreement: the platform's COSE key (sent
/// with every authenticated sub-command) plus the derived session secret.
pub(crate) struct Encapsulation {
    pub(crate) platform_key: CoseKey,
    pub(crate) secret: SharedSecret,
}

impl Encapsulation {
    /// Run getKeyAgreement and derive the session secret under `protocol`.
    pub(crate) fn new(dev: &mut Device, protocol: PinUvAuthProtocol) -> Result<Self> {
        let keypair = PlatformKeyAgreement::generate();
        let (x, y) = keypair.public_coordinates();
        let platform_key = CoseKey::ecdh_p256(x, y);

        let params = MapBuilder::new()
            .insert(keys::PROTOCOL, protocol.number() as u64)
            .insert(keys::SUBCOMMAND, sub::GET_KEY_AGREEMENT as u64)
            .build();
        let timeout = dev.timeout();
        let body = dev
            .cbor_transaction(CtapCommand::ClientPin, Some(&params), timeout)?
            .ok_or(Error::RxNotCbor)?;

        let peer = body
            .map_get(reply::KEY_AGREEMENT)
            .and_then(CoseKey::from_value)
            .ok_or(Error::RxInvalidCbor)?;
        let peer_point = peer.p256_point().ok_or(Error::RxInvalidCbor)?;

        let ecdh_x = keypair
            .shared_point_x(&peer_point)
            .map_err(|_| Error::RxInvalidCbor)?;

        let secret = match protocol {
            PinUvAuthProtocol::V1 => SharedSecret::V1(v1::kdf(&ecdh_x)),
            PinUvAuthProtocol::V2 => SharedSecret::V2(v2::kdf(&ecdh_x)),
        };

        Ok(Self {
            platform_key,
            secret,
        })
    }
}

/// `LEFT(SHA-256(pin), 16)` as CTAP computes it.
fn pin_hash(pin: &str) -> [u8; 16] {
    let digest = Sha256::digest(pin.as_bytes());
    digest[..16].try_into().unwrap()
}

/// Validate and zero-pad a new PIN to the fixed 64-byte block.
fn pad_pin(pin: &str) -> Result<Zeroizing<[u8; 64]>> {
    if pin.chars().count() < 4 || pin.len() > 63 {
        return Err(Error::InvalidArgument);
    }
    let mut padded = Zeroizing::new([0u8; 64]);
    padded[..pin.len()].copy_from_slice(pin.as_bytes());
    Ok(padded)
}

impl Device {
    /// Protocol to use with this authenticator, preferring 2.
    pub(crate) fn pin_protocol(&mut self) -> Result<PinUvAuthProtocol> {
        let number = self
            .get_info()?
            .preferred_pin_protocol()
            .ok_or(Error::UnsupportedOption)?;
        PinUvAuthProtocol::from_number(number).ok_or(Error::UnsupportedOption)
    }

    /// Remaining PIN attempts, and whether a power cycle is required
    /// before more are allowed.
    pub fn get_pin_retries(&mut self) -> Result<(u64, bool)> {
        let params = MapBuilder::new()
            .insert(keys::SUBCOMMAND, sub::GET_PIN_RETRIES as u64)
            .build();
        let timeout = self.timeout();
        let body = self
            .cbor_transaction(CtapCommand::ClientPin, Some(&params), timeout)?
            .ok_or(Error::RxNotCbor)?;

        let retries = body
            .map_get(reply::PIN_RETRIES)
            .and_then(Value::as_unsigned)
            .ok_or(Error::RxInvalidCbor)?;
        let power_cycle = body
            .map_get(reply::POWER_CYCLE_STATE)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok((retries, power_cycle))
    }

    /// Remaining built-in user-verification attempts.
    pub fn get_uv_retries(&mut self) -> Result<u64> {
        let params = MapBuilder::new()
            .insert(keys::SUBCOMMAND, sub::GET_UV_RETRIES as u64)
            .build();
        let timeout = self.timeout();
        let body = self
            .cbor_transaction(CtapCommand::ClientPin, Some(&params), timeout)?
            .ok_or(Error::RxNotCbor)?;

        body.map_get(reply::UV_RETRIES)
            .and_then(Value::as_unsigned)
            .ok_or(Error::RxInvalidCbor)
    }

    /// Set the first PIN on an authenticator that has none.
    pub fn set_pin(&mut self, new_pin: &str) -> Result<()> {
        let padded = pad_pin(new_pin)?;
        let protocol = self.pin_protocol()?;
        let encapsulation = Encapsulation::new(self, protocol)?;

        let new_pin_enc = encapsulation.secret.encrypt(&padded[..])?;
        let auth = encapsulation.secret.authenticate(&new_pin_enc);

        let params = MapBuilder::new()
            .insert(keys::PROTOCOL, protocol.number() as u64)
            .insert(keys::SUBCOMMAND, sub::SET_PIN as u64)
            .insert(keys::KEY_AGREEMENT, encapsulation.platform_key.value().clone())
            .insert(keys::PIN_UV_AUTH_PARAM, auth)
            .insert(keys::NEW_PIN_ENC, new_pin_enc)
            .build();
        let timeout = self.timeout();
        self.cbor_transaction(CtapCommand::ClientPin, Some(&params), timeout)?;

        self.drop_token();
        Ok(())
    }

    /// Change the PIN. The authenticator checks `current_pin` against its
    /// stored hash before accepting the new one.
    pub fn change_pin(&mut self, current_pin: &str, new_pin: &str) -> Result<()> {
        let padded = pad_pin(new_pin)?;
        let protocol = self.pin_protocol()?;
        let encapsulation = Encapsulation::new(self, protocol)?;

        let new_pin_enc = encapsulation.secret.encrypt(&padded[..])?;
        let pin_hash_enc = encapsulation.secret.encrypt(&pin_hash(current_pin))?;

        let mut authed = new_pin_enc.clone();
        authed.extend_from_slice(&pin_hash_enc);
        let auth = encapsulation.secret.authenticate(&authed);

        let params = MapBuilder::new()
            .insert(keys::PROTOCOL, protocol.number() as u64)
            .insert(keys::SUBCOMMAND, sub::CHANGE_PIN as u64)
            .insert(keys::KEY_AGREEMENT, encapsulation.platform_key.value().clone())
            .insert(keys::PIN_UV_AUTH_PARAM, auth)
            .insert(keys::NEW_PIN_ENC, new_pin_enc)
            .insert(keys::PIN_HASH_ENC, pin_hash_enc)
            .build();
        let timeout = self.timeout();
        self.cbor_transaction(CtapCommand::ClientPin, Some(&params), timeout)?;

        self.drop_token();
        Ok(())
    }

    /// Legacy getPinToken (sub-command 0x05), protocol 1 only. Superseded
    /// by [`Device::get_token_with_pin`].
    pub fn get_pin_token(&mut self, pin: &str) -> Result<()> {
        let encapsulation = Encapsulation::new(self, PinUvAuthProtocol::V1)?;
        let pin_hash_enc = encapsulation.secret.encrypt(&pin_hash(pin))?;

        let params = MapBuilder::new()
            .insert(keys::PROTOCOL, 1u64)
            .insert(keys::SUBCOMMAND, sub::GET_PIN_TOKEN as u64)
            .insert(keys::KEY_AGREEMENT, encapsulation.platform_key.value().clone())
            .insert(keys::PIN_HASH_ENC, pin_hash_enc)
            .build();

        self.finish_token_request(&params, &encapsulation)
    }

    /// Acquire a pinUvAuthToken by PIN, scoped to `permissions` and
    /// optionally bound to an rpId. The token is cached on the session.
    pub fn get_token_with_pin(
        &mut self,
        pin: &str,
        permissions: Permissions,
        rp_id: Option<&str>,
    ) -> Result<()> {
        let protocol = self.pin_protocol()?;
        let encapsulation = Encapsulation::new(self, protocol)?;
        let pin_hash_enc = encapsulation.secret.encrypt(&pin_hash(pin))?;

        let params = MapBuilder::new()
            .insert(keys::PROTOCOL, protocol.number() as u64)
            .insert(keys::SUBCOMMAND, sub::GET_TOKEN_USING_PIN as u64)
            .insert(keys::KEY_AGREEMENT, encapsulation.platform_key.value().clone())
            .insert(keys::PIN_HASH_ENC, pin_hash_enc)
            .insert(keys::PERMISSIONS, permissions.bits() as u64)
            .insert_opt(keys::RP_ID, rp_id)
            .build();

        self.finish_token_request(&params, &encapsulation)
    }

    /// Acquire a pinUvAuthToken by built-in user verification (biometric
    /// or on-device gesture). The token is cached on the session.
    pub fn get_token_with_uv(
        &mut self,
        permissions: Permissions,
        rp_id: Option<&str>,
    ) -> Result<()> {
        let protocol = self.pin_protocol()?;
        let encapsulation = Encapsulation::new(self, protocol)?;

        let params = MapBuilder::new()
            .insert(keys::PROTOCOL, protocol.number() as u64)
            .insert(keys::SUBCOMMAND, sub::GET_TOKEN_USING_UV as u64)
            .insert(keys::KEY_AGREEMENT, encapsulation.platform_key.value().clone())
            .insert(keys::PERMISSIONS, permissions.bits() as u64)
            .insert_opt(keys::RP_ID, rp_id)
            .build();

        self.finish_token_request(&params, &encapsulation)
    }

    fn finish_token_request(
        &mut self,
        params: &Value,
        encapsulation: &Encapsulation,
    ) -> Result<()> {
        let timeout = self.timeout();
        let body = self
            .cbor_transaction(CtapCommand::ClientPin, Some(params), timeout)?
            .ok_or(Error::RxNotCbor)?;

        let token_enc = body
            .map_get(reply::PIN_UV_AUTH_TOKEN)
            .and_then(Value::as_bytes)
            .ok_or(Error::RxInvalidCbor)?;

        let token = encapsulation
            .secret
            .decrypt(token_enc)
            .map_err(|_| Error::RxInvalidCbor)?;
        debug!("pinUvAuthToken acquired ({} bytes)", token.len());

        self.cache_token(PinToken::new(token, encapsulation.secret.protocol()));
        Ok(())
    }

    /// Token for a workflow: the cached one if present, otherwise acquired
    /// with `pin` (preferred) or built-in UV.
    pub(crate) fn ensure_token(
        &mut self,
        permissions: Permissions,
        rp_id: Option<&str>,
        pin: Option<&str>,
    ) -> Result<()> {
        if self.cached_token().is_some() {
            return Ok(());
        }
        match pin {
            Some(pin) => self.get_token_with_pin(pin, permissions, rp_id),
            None => self.get_token_with_uv(permissions, rp_id),
        }
    }
}
