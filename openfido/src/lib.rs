//! Client-side FIDO2/CTAP2 library
//!
//! Discovers hardware authenticators, negotiates CTAPHID sessions, and
//! drives the webauthn operations (makeCredential, getAssertion) plus the
//! management surface: clientPIN, credential management, biometric
//! enrollment, large blobs, reset, selection, and config.
//!
//! # Example
//!
//! ```no_run
//! use openfido::{init, manifest, Device, Flags};
//!
//! # fn main() -> openfido::Result<()> {
//! init(Flags::NONE);
//!
//! let devices = manifest::manifest(16)?;
//! let mut dev = Device::new_with_info(devices[0].clone());
//! dev.open_with_info()?;
//!
//! let info = dev.get_info()?;
//! println!("versions: {:?}", info.versions);
//! dev.close();
//! # Ok(())
//! # }
//! ```

pub mod assert;
pub mod bio;
pub mod blob;
pub mod config;
pub mod cred;
pub mod device;
pub mod error;
pub mod manifest;
pub mod mgmt;
pub mod pin;
pub mod token;

use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};

pub use assert::{Assertion, GetAssertionRequest};
pub use cred::MakeCredentialRequest;
pub use device::Device;
pub use error::{Error, Result};
pub use pin::{Permissions, PinUvAuthProtocol};

pub use openfido_ctap::{
    Attestation, AttestationStatement, AuthenticatorData, AuthenticatorInfo, CoseKey,
    CredentialDescriptor, PublicKeyCredentialParameters, RelyingParty, StatusCode, User,
};
pub use openfido_transport::{Backend, DeviceInfo, DeviceIo};

/// Library initialisation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Flags = Flags(0);

    /// Enable log output (also enabled by the `FIDO_DEBUG` environment
    /// variable)
    pub const DEBUG: Flags = Flags(1);

    /// Discover devices through hidapi (the default backend)
    pub const USE_HIDAPI: Flags = Flags(2);

    /// Discover NFC readers. No backend ships yet; register one with
    /// [`manifest::register_provider`].
    pub const USE_NFC: Flags = Flags(4);

    /// Proxy through Windows Hello. No backend ships yet.
    pub const USE_WINHELLO: Flags = Flags(8);

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialise the library: set up logging and register the platform
/// transport provider. Idempotent.
pub fn init(flags: Flags) {
    if flags.contains(Flags::DEBUG) || std::env::var_os("FIDO_DEBUG").is_some() {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("debug"),
        )
        .try_init();
    }

    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    manifest::register_hid_backend();

    if flags.contains(Flags::USE_NFC) || flags.contains(Flags::USE_WINHELLO) {
        log::warn!("requested transport has no built-in backend; register one explicitly");
    }
}

/// Flush the provider registry. A later [`init`] starts fresh.
pub fn teardown() {
    manifest::clear();
    INITIALIZED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn flags_compose() {
        let flags = Flags::DEBUG | Flags::USE_HIDAPI;
        assert!(flags.contains(Flags::DEBUG));
        assert!(flags.contains(Flags::USE_HIDAPI));
        assert!(!Flags::NONE.contains(Flags::DEBUG));
    }

    #[test]
    #[serial]
    fn init_is_idempotent() {
        teardown();
        init(Flags::NONE);
        init(Flags::NONE);
        // Registry is intact and teardown flushes it
        teardown();
        assert!(manifest::manifest(16).unwrap().is_empty());
    }
}
