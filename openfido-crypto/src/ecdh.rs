//! P-256 key agreement for the PIN/UV protocols
//!
//! The platform generates an ephemeral P-256 key pair per encapsulation,
//! sends its coordinates as a COSE_Key, and both sides derive their session
//! keys from the x-coordinate of the ECDH result.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#sctn-pin-protocol>

use p256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use rand::rngs::OsRng;

use crate::error::{CryptoError, Result};

/// Platform-side ephemeral key agreement key.
pub struct PlatformKeyAgreement {
    secret: SecretKey,
    public: PublicKey,
}

impl PlatformKeyAgreement {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Uncompressed coordinates for the COSE_Key sent to the authenticator.
    pub fn public_coordinates(&self) -> ([u8; 32], [u8; 32]) {
        let point = self.public.to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(point.x().expect("uncompressed point has x"));
        y.copy_from_slice(point.y().expect("uncompressed point has y"));
        (x, y)
    }

    /// ECDH with the authenticator's key-agreement key, returning the raw
    /// x-coordinate. The per-protocol KDFs run on top of this.
    ///
    /// `peer` is an uncompressed SEC1 point (`0x04 || x || y`).
    pub fn shared_point_x(&self, peer: &[u8]) -> Result<[u8; 32]> {
        let peer_key =
            PublicKey::from_sec1_bytes(peer).map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared =
            p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer_key.as_affine());

        let mut x = [0u8; 32];
        x.copy_from_slice(shared.raw_secret_bytes());
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let platform = PlatformKeyAgreement::generate();
        let authenticator = PlatformKeyAgreement::generate();

        let (ax, ay) = authenticator.public_coordinates();
        let mut peer = vec![0x04];
        peer.extend_from_slice(&ax);
        peer.extend_from_slice(&ay);

        let (px, py) = platform.public_coordinates();
        let mut platform_point = vec![0x04];
        platform_point.extend_from_slice(&px);
        platform_point.extend_from_slice(&py);

        assert_eq!(
            platform.shared_point_x(&peer).unwrap(),
            authenticator.shared_point_x(&platform_point).unwrap()
        );
    }

    #[test]
    fn fresh_keys_differ() {
        let a = PlatformKeyAgreement::generate();
        let b = PlatformKeyAgreement::generate();
        assert_ne!(a.public_coordinates().0, b.public_coordinates().0);
    }

    #[test]
    fn rejects_garbage_peer_key() {
        let platform = PlatformKeyAgreement::generate();
        assert!(platform.shared_point_x(&[0u8; 65]).is_err());
        assert!(platform.shared_point_x(&[0u8; 32]).is_err());
    }
}
