//! Transport layer error types

use std::fmt;

/// Transport layer result type
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame is not a valid INIT or CONT packet
    InvalidFrame,

    /// Frame carries an unknown command byte
    InvalidCommand,

    /// Continuation sequence number skipped or repeated
    InvalidSequence,

    /// Declared payload length exceeds the protocol maximum
    MessageTooLarge,

    /// Reassembly ended before the declared length arrived
    Incomplete,

    /// Device not found during enumeration or open
    DeviceNotFound,

    /// Underlying HID read/write failed
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidFrame => write!(f, "invalid CTAPHID frame"),
            Error::InvalidCommand => write!(f, "unknown CTAPHID command"),
            Error::InvalidSequence => write!(f, "invalid continuation sequence"),
            Error::MessageTooLarge => write!(f, "message exceeds CTAPHID maximum"),
            Error::Incomplete => write!(f, "message reassembly incomplete"),
            Error::DeviceNotFound => write!(f, "device not found"),
            Error::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
