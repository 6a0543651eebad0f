//! Cached pinUvAuthToken
//!
//! The token is an authenticator secret valid for one power cycle. It
//! lives in locked, zeroed-on-drop memory and never appears in debug
//! output. The session drops it on close, on PIN changes, on reset, and
//! whenever the authenticator signals it is stale.

use secstr::SecVec;

use crate::pin::PinUvAuthProtocol;

/// A decrypted pinUvAuthToken bound to the protocol that produced it.
pub struct PinToken {
    secret: SecVec<u8>,
    protocol: PinUvAuthProtocol,
}

impl PinToken {
    pub(crate) fn new(secret: Vec<u8>, protocol: PinUvAuthProtocol) -> Self {
        Self {
            secret: SecVec::new(secret),
            protocol,
        }
    }

    pub fn protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }

    /// Compute a pinUvAuthParam over `data`: 16 bytes under protocol 1,
    /// 32 under protocol 2.
    pub fn authenticate(&self, data: &[u8]) -> Vec<u8> {
        use openfido_crypto::pin_protocol::{v1, v2};

        let key = self.secret.unsecure();
        match self.protocol {
            PinUvAuthProtocol::V1 => v1::authenticate(key, data).to_vec(),
            PinUvAuthProtocol::V2 => v2::authenticate(key, data).to_vec(),
        }
    }
}

impl std::fmt::Debug for PinToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinToken")
            .field("protocol", &self.protocol)
            .field("secret", &"<redacted>")
            .finish()
    }
}
