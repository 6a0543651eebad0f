//! CTAPHID transport layer
//!
//! - Frame-level protocol: fragmentation and reassembly over fixed-size
//!   HID reports ([`ctaphid`])
//! - Capability traits every backend supplies ([`io`])
//! - USB HID backend via hidapi ([`hid`])
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#usb>

pub mod ctaphid;
pub mod error;
pub mod hid;
pub mod io;

pub use ctaphid::{Assembler, Cmd, Frame, Message, BROADCAST_CID, MAX_MESSAGE_SIZE, REPORT_SIZE};
pub use error::{Error, Result};
pub use hid::HidBackend;
pub use io::{Backend, DeviceInfo, DeviceIo};
