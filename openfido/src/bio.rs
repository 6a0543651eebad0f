//! Biometric enrollment
//!
//! Drives the fingerprint enrollment loop (`enrollBegin`, then
//! `enrollCaptureNextSample` until no samples remain), plus template
//! enumeration, renaming, and removal. All sub-commands except the capture
//! loop's own continuations are authenticated with a pinUvAuthToken
//! holding the `be` permission.
//!
//! Authenticators that only implement the prototype command (FIDO_2_1_PRE)
//! are driven through code 0x40 automatically.

use log::debug;

use openfido_ctap::cbor::{self, MapBuilder, Value};
use openfido_ctap::{CtapCommand, StatusCode};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::pin::Permissions;

/// The only modality CTAP 2.1 defines.
const MODALITY_FINGERPRINT: u8 = 0x01;

/// bioEnrollment sub-command bytes.
mod sub {
    pub const ENROLL_BEGIN: u8 = 0x01;
    pub const ENROLL_CAPTURE_NEXT: u8 = 0x02;
    pub const CANCEL_CURRENT_ENROLLMENT: u8 = 0x03;
    pub const ENUMERATE_ENROLLMENTS: u8 = 0x04;
    pub const SET_FRIENDLY_NAME: u8 = 0x05;
    pub const REMOVE_ENROLLMENT: u8 = 0x06;
}

/// Request map keys.
mod keys {
    pub const MODALITY: i64 = 0x01;
    pub const SUBCOMMAND: i64 = 0x02;
    pub const SUBCOMMAND_PARAMS: i64 = 0x03;
    pub const PROTOCOL: i64 = 0x04;
    pub const PIN_UV_AUTH_PARAM: i64 = 0x05;
}

/// Sub-command parameter keys.
mod param {
    pub const TEMPLATE_ID: i64 = 0x01;
    pub const FRIENDLY_NAME: i64 = 0x02;
    pub const TIMEOUT_MS: i64 = 0x03;
}

/// Reply map keys.
mod reply {
    pub const TEMPLATE_ID: i64 = 0x04;
    pub const LAST_SAMPLE_STATUS: i64 = 0x05;
    pub const REMAINING_SAMPLES: i64 = 0x06;
    pub const TEMPLATE_INFOS: i64 = 0x07;
}

/// Template info map keys (inside templateInfos entries).
mod template {
    pub const ID: i64 = 0x01;
    pub const FRIENDLY_NAME: i64 = 0x02;
}

/// Outcome of one capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollSampleStatus {
    Good,
    TooHigh,
    TooLow,
    TooFast,
    TooSlow,
    PoorQuality,
    TooShort,
    MergeFailure,
    AlreadyExists,
    NoUserActivity,
    NoUserPresenceTransition,
    Other(u8),
}

impl EnrollSampleStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Good,
            0x01 => Self::TooHigh,
            0x02 => Self::TooLow,
            0x05 => Self::TooFast,
            0x06 => Self::TooSlow,
            0x07 => Self::PoorQuality,
            0x09 => Self::TooShort,
            0x0a => Self::MergeFailure,
            0x0b => Self::AlreadyExists,
            0x0d => Self::NoUserActivity,
            0x0e => Self::NoUserPresenceTransition,
            other => Self::Other(other),
        }
    }
}

/// State after `enrollBegin` or a capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollSample {
    pub template_id: Vec<u8>,
    pub status: EnrollSampleStatus,
    /// Samples still needed; zero means the template is complete
    pub remaining_samples: u64,
}

/// One enrolled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateInfo {
    pub id: Vec<u8>,
    pub friendly_name: Option<String>,
}

impl Device {
    fn bio_command(&mut self) -> Result<CtapCommand> {
        Ok(if self.get_info()?.prefers_prototype_commands() {
            CtapCommand::BioEnrollmentPre
        } else {
            CtapCommand::BioEnrollment
        })
    }

    /// Authenticated bioEnrollment request: `pinUvAuthParam` covers
    /// `modality || subCommand || subCommandParams`.
    fn bio_request(
        &mut self,
        sub_command: u8,
        sub_params: Option<Value>,
    ) -> Result<Option<Value>> {
        let cmd = self.bio_command()?;
        let token = self.cached_token().ok_or(Error::PinRequired)?;

        let mut message = vec![MODALITY_FINGERPRINT, sub_command];
        if let Some(params) = &sub_params {
            message.extend_from_slice(&cbor::encode(params));
        }
        let auth = token.authenticate(&message);
        let protocol = token.protocol().number();

        let mut builder = MapBuilder::new()
            .insert(keys::MODALITY, MODALITY_FINGERPRINT as u64)
            .insert(keys::SUBCOMMAND, sub_command as u64);
        if let Some(params) = sub_params {
            builder = builder.insert(keys::SUBCOMMAND_PARAMS, params);
        }
        let params = builder
            .insert(keys::PROTOCOL, protocol as u64)
            .insert(keys::PIN_UV_AUTH_PARAM, auth)
            .build();

        let timeout = self.timeout();
        self.cbor_transaction(cmd, Some(&params), timeout)
    }

    /// Start enrolling a new fingerprint template.
    pub fn bio_enroll_begin(
        &mut self,
        timeout_ms: Option<u64>,
        pin: Option<&str>,
    ) -> Result<EnrollSample> {
        self.ensure_token(Permissions::BIO_ENROLLMENT, None, pin)?;

        let sub_params = timeout_ms.map(|t| {
            MapBuilder::new().insert(param::TIMEOUT_MS, t).build()
        });
        let body = self
            .bio_request(sub::ENROLL_BEGIN, sub_params)?
            .ok_or(Error::RxNotCbor)?;

        let template_id = body
            .map_get(reply::TEMPLATE_ID)
            .and_then(Value::as_bytes)
            .ok_or(Error::RxInvalidCbor)?
            .to_vec();
        let sample = parse_sample(&body, template_id)?;
        debug!(
            "bio enroll begin: {} sample(s) remaining",
            sample.remaining_samples
        );
        Ok(sample)
    }

    /// Capture the next sample for a template started by
    /// [`Device::bio_enroll_begin`]. Iterate until `remaining_samples`
    /// reaches zero, retrying on non-`Good` statuses.
    pub fn bio_enroll_next(
        &mut self,
        template_id: &[u8],
        timeout_ms: Option<u64>,
    ) -> Result<EnrollSample> {
        let mut builder =
            MapBuilder::new().insert(param::TEMPLATE_ID, template_id.to_vec());
        if let Some(t) = timeout_ms {
            builder = builder.insert(param::TIMEOUT_MS, t);
        }

        let body = self
            .bio_request(sub::ENROLL_CAPTURE_NEXT, Some(builder.build()))?
            .ok_or(Error::RxNotCbor)?;
        parse_sample(&body, template_id.to_vec())
    }

    /// Abort an in-progress enrollment.
    pub fn bio_enroll_cancel(&mut self) -> Result<()> {
        let cmd = self.bio_command()?;
        let params = MapBuilder::new()
            .insert(keys::MODALITY, MODALITY_FINGERPRINT as u64)
            .insert(keys::SUBCOMMAND, sub::CANCEL_CURRENT_ENROLLMENT as u64)
            .build();
        let timeout = self.timeout();
        self.cbor_transaction(cmd, Some(&params), timeout)?;
        Ok(())
    }

    /// List enrolled templates.
    pub fn bio_enumerate(&mut self, pin: Option<&str>) -> Result<Vec<TemplateInfo>> {
        self.ensure_token(Permissions::BIO_ENROLLMENT, None, pin)?;

        let body = match self.bio_request(sub::ENUMERATE_ENROLLMENTS, None) {
            Ok(body) => body.ok_or(Error::RxNotCbor)?,
            // Devices report an empty template store as invalidParameter
            Err(Error::Device(StatusCode::InvalidParameter)) | Err(Error::NoCredentials) => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };

        let infos = body
            .map_get(reply::TEMPLATE_INFOS)
            .and_then(Value::as_array)
            .ok_or(Error::RxInvalidCbor)?;

        infos
            .iter()
            .map(|info| {
                Ok(TemplateInfo {
                    id: info
                        .map_get(template::ID)
                        .and_then(Value::as_bytes)
                        .ok_or(Error::RxInvalidCbor)?
                        .to_vec(),
                    friendly_name: info
                        .map_get(template::FRIENDLY_NAME)
                        .and_then(Value::as_text)
                        .map(str::to_string),
                })
            })
            .collect()
    }

    /// Rename an enrolled template.
    pub fn bio_set_friendly_name(
        &mut self,
        template_id: &[u8],
        name: &str,
        pin: Option<&str>,
    ) -> Result<()> {
        self.ensure_token(Permissions::BIO_ENROLLMENT, None, pin)?;

        let sub_params = MapBuilder::new()
            .insert(param::TEMPLATE_ID, template_id.to_vec())
            .insert(param::FRIENDLY_NAME, name)
            .build();
        self.bio_request(sub::SET_FRIENDLY_NAME, Some(sub_params))?;
        Ok(())
    }

    /// Delete an enrolled template.
    pub fn bio_remove_enrollment(
        &mut self,
        template_id: &[u8],
        pin: Option<&str>,
    ) -> Result<()> {
        self.ensure_token(Permissions::BIO_ENROLLMENT, None, pin)?;

        let sub_params = MapBuilder::new()
            .insert(param::TEMPLATE_ID, template_id.to_vec())
            .build();
        self.bio_request(sub::REMOVE_ENROLLMENT, Some(sub_params))?;
        Ok(())
    }
}

fn parse_sample(body: &Value, template_id: Vec<u8>) -> Result<EnrollSample> {
    let status = body
        .map_get(reply::LAST_SAMPLE_STATUS)
        .and_then(Value::as_unsigned)
        .ok_or(Error::RxInvalidCbor)?;
    let remaining = body
        .map_get(reply::REMAINING_SAMPLES)
        .and_then(Value::as_unsigned)
        .ok_or(Error::RxInvalidCbor)?;

    Ok(EnrollSample {
        template_id,
        status: EnrollSampleStatus::from_u8(status as u8),
        remaining_samples: remaining,
    })
}
