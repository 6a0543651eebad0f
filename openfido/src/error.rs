//! Client error taxonomy
//!
//! Authenticator refusals map 1:1 onto dedicated kinds where the client
//! acts on them (PIN state, credential state); everything else is surfaced
//! verbatim as [`Error::Device`]. Transport failures distinguish the send
//! path (`Tx`) from the receive path (`Rx` and its refinements).

use std::fmt;

use openfido_ctap::{CborError, StatusCode};

/// Errors surfaced by every client operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Caller misuse detected at the API boundary; nothing was sent
    InvalidArgument,

    /// Operation requires a different session state (open vs. closed)
    InvalidState,

    /// Authenticator addressed a different channel, or rejected ours
    InvalidChannel,

    /// Failed to write to the device
    Tx,

    /// Failed to read from the device, or the reply violated framing
    Rx,

    /// Reply carried no CBOR body where one was required
    RxNotCbor,

    /// Reply body was not decodable CBOR
    RxInvalidCbor,

    /// Reply length contradicted its framing or fixed-size fields
    RxInvalidLen,

    /// Assertion signature failed verification
    RxInvalidSig,

    /// Deadline expired before the reply completed
    Timeout,

    /// Authenticator reported the operation was cancelled
    UserCanceled,

    /// A command is already in flight on this session
    Busy,

    /// Library-internal failure (rng, unexpected state)
    Internal,

    /// Device did not complete the CTAPHID INIT handshake
    NotFidoDevice,

    NotAllowed,
    PinRequired,
    PinInvalid,
    PinBlocked,
    PinAuthBlocked,
    PinAuthInvalid,
    UvBlocked,
    UvInvalid,
    ActionTimeout,
    UnsupportedAlgorithm,
    UnsupportedOption,
    CredExcluded,
    NoCredentials,
    KeyStoreFull,
    OperationDenied,
    LargeBlobStorageFull,

    /// Any other authenticator status, verbatim
    Device(StatusCode),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::InvalidState => write!(f, "invalid session state"),
            Error::InvalidChannel => write!(f, "invalid channel"),
            Error::Tx => write!(f, "transmit failed"),
            Error::Rx => write!(f, "receive failed"),
            Error::RxNotCbor => write!(f, "reply is not CBOR"),
            Error::RxInvalidCbor => write!(f, "reply contains invalid CBOR"),
            Error::RxInvalidLen => write!(f, "reply has invalid length"),
            Error::RxInvalidSig => write!(f, "signature verification failed"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::UserCanceled => write!(f, "operation cancelled"),
            Error::Busy => write!(f, "session busy"),
            Error::Internal => write!(f, "internal error"),
            Error::NotFidoDevice => write!(f, "not a FIDO device"),
            Error::NotAllowed => write!(f, "operation not allowed"),
            Error::PinRequired => write!(f, "PIN required"),
            Error::PinInvalid => write!(f, "PIN invalid"),
            Error::PinBlocked => write!(f, "PIN blocked"),
            Error::PinAuthBlocked => write!(f, "PIN auth blocked until power cycle"),
            Error::PinAuthInvalid => write!(f, "PIN auth invalid"),
            Error::UvBlocked => write!(f, "user verification blocked"),
            Error::UvInvalid => write!(f, "user verification failed"),
            Error::ActionTimeout => write!(f, "user action timed out"),
            Error::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Error::UnsupportedOption => write!(f, "unsupported option"),
            Error::CredExcluded => write!(f, "credential excluded"),
            Error::NoCredentials => write!(f, "no credentials"),
            Error::KeyStoreFull => write!(f, "key store full"),
            Error::OperationDenied => write!(f, "operation denied"),
            Error::LargeBlobStorageFull => write!(f, "large blob storage full"),
            Error::Device(status) => write!(f, "authenticator error: {status}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<StatusCode> for Error {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::ChannelBusy => Error::Busy,
            StatusCode::InvalidChannel => Error::InvalidChannel,
            StatusCode::KeepaliveCancel => Error::UserCanceled,
            StatusCode::UserActionTimeout | StatusCode::ActionTimeout => Error::ActionTimeout,
            StatusCode::NotAllowed => Error::NotAllowed,
            StatusCode::PinRequired => Error::PinRequired,
            StatusCode::PinInvalid => Error::PinInvalid,
            StatusCode::PinBlocked => Error::PinBlocked,
            StatusCode::PinAuthBlocked => Error::PinAuthBlocked,
            StatusCode::PinAuthInvalid => Error::PinAuthInvalid,
            StatusCode::UvBlocked => Error::UvBlocked,
            StatusCode::UvInvalid => Error::UvInvalid,
            StatusCode::UnsupportedAlgorithm => Error::UnsupportedAlgorithm,
            StatusCode::UnsupportedOption | StatusCode::InvalidOption => {
                Error::UnsupportedOption
            }
            StatusCode::CredentialExcluded => Error::CredExcluded,
            StatusCode::NoCredentials => Error::NoCredentials,
            StatusCode::KeyStoreFull | StatusCode::FpDatabaseFull => Error::KeyStoreFull,
            StatusCode::OperationDenied => Error::OperationDenied,
            StatusCode::LargeBlobStorageFull => Error::LargeBlobStorageFull,
            other => Error::Device(other),
        }
    }
}

impl From<CborError> for Error {
    fn from(_: CborError) -> Self {
        Error::RxInvalidCbor
    }
}

impl From<openfido_crypto::CryptoError> for Error {
    fn from(err: openfido_crypto::CryptoError) -> Self {
        use openfido_crypto::CryptoError;
        match err {
            CryptoError::InvalidSignature => Error::RxInvalidSig,
            CryptoError::UnsupportedAlgorithm(_) => Error::UnsupportedAlgorithm,
            CryptoError::InvalidPublicKey => Error::InvalidArgument,
            CryptoError::DecryptionFailed | CryptoError::EncryptionFailed => Error::Internal,
        }
    }
}

/// Result type for all client operations
pub type Result<T> = std::result::Result<T, Error>;
