//! CTAP2 status bytes
//!
//! Every CTAP2 reply starts with one of these bytes; anything other than
//! `Ok` means the authenticator refused or failed the command.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#error-responses>

use std::fmt;

/// Authenticator status byte.
///
/// Unknown bytes are preserved in `Other` so the raw value can still be
/// reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    InvalidCommand,
    InvalidParameter,
    InvalidLength,
    InvalidSeq,
    Timeout,
    ChannelBusy,
    LockRequired,
    InvalidChannel,
    CborUnexpectedType,
    InvalidCbor,
    MissingParameter,
    LimitExceeded,
    UnsupportedExtension,
    FpDatabaseFull,
    LargeBlobStorageFull,
    CredentialExcluded,
    Processing,
    InvalidCredential,
    UserActionPending,
    OperationPending,
    NoOperations,
    UnsupportedAlgorithm,
    OperationDenied,
    KeyStoreFull,
    UnsupportedOption,
    InvalidOption,
    KeepaliveCancel,
    NoCredentials,
    UserActionTimeout,
    NotAllowed,
    PinInvalid,
    PinBlocked,
    PinAuthInvalid,
    PinAuthBlocked,
    PinNotSet,
    PinRequired,
    PinPolicyViolation,
    PinTokenExpired,
    RequestTooLarge,
    ActionTimeout,
    UpRequired,
    UvBlocked,
    IntegrityFailure,
    InvalidSubcommand,
    UvInvalid,
    UnauthorizedPermission,
    Other(u8),
}

impl StatusCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Ok,
            0x01 => Self::InvalidCommand,
            0x02 => Self::InvalidParameter,
            0x03 => Self::InvalidLength,
            0x04 => Self::InvalidSeq,
            0x05 => Self::Timeout,
            0x06 => Self::ChannelBusy,
            0x0a => Self::LockRequired,
            0x0b => Self::InvalidChannel,
            0x11 => Self::CborUnexpectedType,
            0x12 => Self::InvalidCbor,
            0x14 => Self::MissingParameter,
            0x15 => Self::LimitExceeded,
            0x16 => Self::UnsupportedExtension,
            0x17 => Self::FpDatabaseFull,
            0x18 => Self::LargeBlobStorageFull,
            0x19 => Self::CredentialExcluded,
            0x21 => Self::Processing,
            0x22 => Self::InvalidCredential,
            0x23 => Self::UserActionPending,
            0x24 => Self::OperationPending,
            0x25 => Self::NoOperations,
            0x26 => Self::UnsupportedAlgorithm,
            0x27 => Self::OperationDenied,
            0x28 => Self::KeyStoreFull,
            0x2b => Self::UnsupportedOption,
            0x2c => Self::InvalidOption,
            0x2d => Self::KeepaliveCancel,
            0x2e => Self::NoCredentials,
            0x2f => Self::UserActionTimeout,
            0x30 => Self::NotAllowed,
            0x31 => Self::PinInvalid,
            0x32 => Self::PinBlocked,
            0x33 => Self::PinAuthInvalid,
            0x34 => Self::PinAuthBlocked,
            0x35 => Self::PinNotSet,
            0x36 => Self::PinRequired,
            0x37 => Self::PinPolicyViolation,
            0x38 => Self::PinTokenExpired,
            0x39 => Self::RequestTooLarge,
            0x3a => Self::ActionTimeout,
            0x3b => Self::UpRequired,
            0x3c => Self::UvBlocked,
            0x3d => Self::IntegrityFailure,
            0x3e => Self::InvalidSubcommand,
            0x3f => Self::UvInvalid,
            0x40 => Self::UnauthorizedPermission,
            other => Self::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::InvalidCommand => 0x01,
            Self::InvalidParameter => 0x02,
            Self::InvalidLength => 0x03,
            Self::InvalidSeq => 0x04,
            Self::Timeout => 0x05,
            Self::ChannelBusy => 0x06,
            Self::LockRequired => 0x0a,
            Self::InvalidChannel => 0x0b,
            Self::CborUnexpectedType => 0x11,
            Self::InvalidCbor => 0x12,
            Self::MissingParameter => 0x14,
            Self::LimitExceeded => 0x15,
            Self::UnsupportedExtension => 0x16,
            Self::FpDatabaseFull => 0x17,
            Self::LargeBlobStorageFull => 0x18,
            Self::CredentialExcluded => 0x19,
            Self::Processing => 0x21,
            Self::InvalidCredential => 0x22,
            Self::UserActionPending => 0x23,
            Self::OperationPending => 0x24,
            Self::NoOperations => 0x25,
            Self::UnsupportedAlgorithm => 0x26,
            Self::OperationDenied => 0x27,
            Self::KeyStoreFull => 0x28,
            Self::UnsupportedOption => 0x2b,
            Self::InvalidOption => 0x2c,
            Self::KeepaliveCancel => 0x2d,
            Self::NoCredentials => 0x2e,
            Self::UserActionTimeout => 0x2f,
            Self::NotAllowed => 0x30,
            Self::PinInvalid => 0x31,
            Self::PinBlocked => 0x32,
            Self::PinAuthInvalid => 0x33,
            Self::PinAuthBlocked => 0x34,
            Self::PinNotSet => 0x35,
            Self::PinRequired => 0x36,
            Self::PinPolicyViolation => 0x37,
            Self::PinTokenExpired => 0x38,
            Self::RequestTooLarge => 0x39,
            Self::ActionTimeout => 0x3a,
            Self::UpRequired => 0x3b,
            Self::UvBlocked => 0x3c,
            Self::IntegrityFailure => 0x3d,
            Self::InvalidSubcommand => 0x3e,
            Self::UvInvalid => 0x3f,
            Self::UnauthorizedPermission => 0x40,
            Self::Other(v) => v,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(v) => write!(f, "unknown status 0x{v:02x}"),
            other => write!(f, "CTAP2 status 0x{:02x}", other.to_u8()),
        }
    }
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        status.to_u8()
    }
}
