//! Entities shared between requests and replies
//!
//! Relying party and user entities travel as text-keyed CBOR maps inside
//! makeCredential requests and come back from credential management and
//! assertion replies.

use crate::cbor::{MapBuilder, Value};

/// The only credential type CTAP2 defines.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialType {
    #[default]
    PublicKey,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::PublicKey => "public-key",
        }
    }
}

/// Relying party entity (`rp` parameter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    pub id: String,
    pub name: Option<String>,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn to_value(&self) -> Value {
        let mut entries = vec![(Value::from("id"), Value::from(self.id.as_str()))];
        if let Some(name) = &self.name {
            entries.push((Value::from("name"), Value::from(name.as_str())));
        }
        Value::Map(entries)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            id: value.map_get_text("id")?.as_text()?.to_string(),
            name: value
                .map_get_text("name")
                .and_then(Value::as_text)
                .map(str::to_string),
        })
    }
}

/// User entity (`user` parameter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Vec<u8>,
    pub name: Option<String>,
    pub display_name: Option<String>,
}

impl User {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            name: None,
            display_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn to_value(&self) -> Value {
        let mut entries = vec![(Value::from("id"), Value::from(self.id.clone()))];
        if let Some(name) = &self.name {
            entries.push((Value::from("name"), Value::from(name.as_str())));
        }
        if let Some(display_name) = &self.display_name {
            entries.push((
                Value::from("displayName"),
                Value::from(display_name.as_str()),
            ));
        }
        Value::Map(entries)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            id: value.map_get_text("id")?.as_bytes()?.to_vec(),
            name: value
                .map_get_text("name")
                .and_then(Value::as_text)
                .map(str::to_string),
            display_name: value
                .map_get_text("displayName")
                .and_then(Value::as_text)
                .map(str::to_string),
        })
    }
}

/// Reference to an existing credential, used in allow and exclude lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialDescriptor {
    pub id: Vec<u8>,
    pub credential_type: CredentialType,
}

impl CredentialDescriptor {
    pub fn public_key(id: Vec<u8>) -> Self {
        Self {
            id,
            credential_type: CredentialType::PublicKey,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            (Value::from("id"), Value::from(self.id.clone())),
            (
                Value::from("type"),
                Value::from(self.credential_type.as_str()),
            ),
        ])
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        if value.map_get_text("type")?.as_text()? != "public-key" {
            return None;
        }
        Some(Self::public_key(
            value.map_get_text("id")?.as_bytes()?.to_vec(),
        ))
    }
}

/// One `pubKeyCredParams` entry: a COSE algorithm the caller accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyCredentialParameters {
    pub alg: i64,
}

impl PublicKeyCredentialParameters {
    /// ES256, the algorithm every CTAP2 authenticator supports.
    pub const ES256: Self = Self { alg: -7 };

    /// EdDSA over Ed25519.
    pub const EDDSA: Self = Self { alg: -8 };

    /// RS256, seen on Windows Hello keys.
    pub const RS256: Self = Self { alg: -257 };

    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            (Value::from("alg"), Value::integer(self.alg)),
            (Value::from("type"), Value::from("public-key")),
        ])
    }
}

/// COSE key parameters the PIN protocols and assertion verification need.
///
/// Only EC2/P-256 keys are fully materialized; the raw map stays available
/// through [`CoseKey::value`] for callers handling other key types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub kty: i64,
    pub alg: i64,
    raw: Value,
}

impl CoseKey {
    /// COSE map labels.
    const KTY: i64 = 1;
    const ALG: i64 = 3;
    const CRV: i64 = -1;
    const X: i64 = -2;
    const Y: i64 = -3;

    /// Build the key-agreement COSE map the PIN protocols send: EC2 /
    /// ECDH-ES+HKDF-256 / P-256 with the given coordinates.
    pub fn ecdh_p256(x: [u8; 32], y: [u8; 32]) -> Self {
        let raw = MapBuilder::new()
            .insert(Self::KTY, 2i64)
            .insert(Self::ALG, -25i64)
            .insert(Self::CRV, 1i64)
            .insert(Self::X, x.to_vec())
            .insert(Self::Y, y.to_vec())
            .build();
        Self {
            kty: 2,
            alg: -25,
            raw,
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            kty: value.map_get(Self::KTY)?.as_integer()?,
            alg: value.map_get(Self::ALG)?.as_integer()?,
            raw: value.clone(),
        })
    }

    pub fn value(&self) -> &Value {
        &self.raw
    }

    /// Uncompressed SEC1 point (`0x04 || x || y`) for EC2/P-256 keys.
    pub fn p256_point(&self) -> Option<Vec<u8>> {
        if self.kty != 2 {
            return None;
        }
        let x = self.raw.map_get(Self::X)?.as_bytes()?;
        let y = self.raw.map_get(Self::Y)?.as_bytes()?;
        if x.len() != 32 || y.len() != 32 {
            return None;
        }
        let mut point = Vec::with_capacity(65);
        point.push(0x04);
        point.extend_from_slice(x);
        point.extend_from_slice(y);
        Some(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor;

    #[test]
    fn rp_round_trip() {
        let rp = RelyingParty::new("example.com").with_name("Example Corp");
        let restored = RelyingParty::from_value(&rp.to_value()).unwrap();
        assert_eq!(restored, rp);
    }

    #[test]
    fn user_without_optional_fields() {
        let user = User::new(vec![1, 2, 3]);
        let value = user.to_value();
        assert!(value.map_get_text("name").is_none());
        assert_eq!(User::from_value(&value).unwrap(), user);
    }

    #[test]
    fn descriptor_rejects_unknown_type() {
        let value = Value::Map(vec![
            (Value::from("id"), Value::from(vec![9u8])),
            (Value::from("type"), Value::from("fido-u2f")),
        ]);
        assert!(CredentialDescriptor::from_value(&value).is_none());
    }

    #[test]
    fn ecdh_key_agreement_map_layout() {
        let key = CoseKey::ecdh_p256([0x11; 32], [0x22; 32]);
        let bytes = cbor::encode(key.value());
        // kty(1) then alg(3) then crv(-1), x(-2), y(-3): positive labels
        // sort ahead of negative ones in canonical order.
        assert_eq!(bytes[0], 0xa5);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[2], 0x02);
        assert_eq!(bytes[3], 0x03);

        let point = key.p256_point().unwrap();
        assert_eq!(point.len(), 65);
        assert_eq!(point[0], 0x04);
        assert_eq!(&point[1..33], &[0x11; 32]);
    }

    #[test]
    fn cose_key_from_reply() {
        let value = MapBuilder::new()
            .insert(1, 2i64)
            .insert(3, -7i64)
            .insert(-1, 1i64)
            .insert(-2, vec![0xAAu8; 32])
            .insert(-3, vec![0xBBu8; 32])
            .build();
        let key = CoseKey::from_value(&value).unwrap();
        assert_eq!(key.kty, 2);
        assert_eq!(key.alg, -7);
        assert!(key.p256_point().is_some());
    }
}
