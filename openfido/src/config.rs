//! authenticatorConfig
//!
//! Two authenticated toggles: alwaysUv and the minimum PIN length policy.
//! The MAC preimage is `0xff*32 || 0x0d || subCommand || subCommandParams`.

use openfido_ctap::cbor::{self, MapBuilder, Value};
use openfido_ctap::CtapCommand;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::pin::Permissions;

/// config sub-command bytes.
mod sub {
    pub const TOGGLE_ALWAYS_UV: u8 = 0x02;
    pub const SET_MIN_PIN_LENGTH: u8 = 0x03;
}

/// Request map keys.
mod keys {
    pub const SUBCOMMAND: i64 = 0x01;
    pub const SUBCOMMAND_PARAMS: i64 = 0x02;
    pub const PROTOCOL: i64 = 0x03;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x04;
}

/// setMinPINLength parameter keys.
mod param {
    pub const NEW_MIN_PIN_LENGTH: i64 = 0x01;
    pub const FORCE_CHANGE_PIN: i64 = 0x03;
}

impl Device {
    fn config_request(&mut self, sub_command: u8, sub_params: Option<Value>) -> Result<()> {
        let token = self.cached_token().ok_or(Error::PinRequired)?;

        let mut message = vec![0xff; 32];
        message.push(0x0d);
        message.push(sub_command);
        if let Some(params) = &sub_params {
            message.extend_from_slice(&cbor::encode(params));
        }
        let auth = token.authenticate(&message);
        let protocol = token.protocol().number();

        let mut builder = MapBuilder::new().insert(keys::SUBCOMMAND, sub_command as u64);
        if let Some(params) = sub_params {
            builder = builder.insert(keys::SUBCOMMAND_PARAMS, params);
        }
        let params = builder
            .insert(keys::PROTOCOL, protocol as u64)
            .insert(keys::PIN_UV_AUTH_PARAM, auth)
            .build();

        let timeout = self.timeout();
        self.cbor_transaction(CtapCommand::Config, Some(&params), timeout)?;
        Ok(())
    }

    /// Flip the alwaysUv switch.
    pub fn toggle_always_uv(&mut self, pin: Option<&str>) -> Result<()> {
        self.ensure_token(Permissions::AUTHENTICATOR_CONFIG, None, pin)?;
        self.config_request(sub::TOGGLE_ALWAYS_UV, None)
    }

    /// Raise the minimum PIN length, optionally forcing a PIN change on
    /// next use.
    pub fn set_min_pin_length(
        &mut self,
        length: u64,
        force_change: bool,
        pin: Option<&str>,
    ) -> Result<()> {
        self.ensure_token(Permissions::AUTHENTICATOR_CONFIG, None, pin)?;

        let mut builder = MapBuilder::new().insert(param::NEW_MIN_PIN_LENGTH, length);
        if force_change {
            builder = builder.insert(param::FORCE_CHANGE_PIN, true);
        }
        self.config_request(sub::SET_MIN_PIN_LENGTH, Some(builder.build()))
    }
}
