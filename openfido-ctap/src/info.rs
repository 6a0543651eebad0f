//! authenticatorGetInfo reply
//!
//! The session fetches this once after the INIT handshake and consults it
//! for protocol selection, large-blob sizing, and feature gating.

use crate::cbor::Value;

/// Decoded authenticatorGetInfo (0x04) reply.
///
/// Fields the library does not consult are still exposed so callers can
/// inspect them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthenticatorInfo {
    pub versions: Vec<String>,
    pub extensions: Vec<String>,
    pub aaguid: [u8; 16],
    /// Option name to state, e.g. `clientPin`, `rk`, `uv`, `bioEnroll`,
    /// `credMgmt`, `largeBlobs`, `alwaysUv`
    pub options: Vec<(String, bool)>,
    pub max_msg_size: Option<u64>,
    pub pin_uv_auth_protocols: Vec<u64>,
    pub max_credential_count_in_list: Option<u64>,
    pub max_credential_id_length: Option<u64>,
    pub transports: Vec<String>,
    /// COSE algorithm identifiers in the authenticator's preference order
    pub algorithms: Vec<i64>,
    pub max_serialized_large_blob_array: Option<u64>,
    pub max_cred_blob_length: Option<u64>,
    pub remaining_discoverable_credentials: Option<u64>,
}

impl AuthenticatorInfo {
    pub fn from_value(value: &Value) -> Option<Self> {
        let mut info = Self::default();

        let versions = value.map_get(0x01)?.as_array()?;
        info.versions = text_list(versions);

        if let Some(ext) = value.map_get(0x02).and_then(Value::as_array) {
            info.extensions = text_list(ext);
        }

        let aaguid = value.map_get(0x03)?.as_bytes()?;
        if aaguid.len() != 16 {
            return None;
        }
        info.aaguid.copy_from_slice(aaguid);

        if let Some(options) = value.map_get(0x04).and_then(Value::as_map) {
            for (k, v) in options {
                if let (Some(name), Some(state)) = (k.as_text(), v.as_bool()) {
                    info.options.push((name.to_string(), state));
                }
            }
        }

        info.max_msg_size = value.map_get(0x05).and_then(Value::as_unsigned);

        if let Some(protocols) = value.map_get(0x06).and_then(Value::as_array) {
            info.pin_uv_auth_protocols =
                protocols.iter().filter_map(Value::as_unsigned).collect();
        }

        info.max_credential_count_in_list = value.map_get(0x07).and_then(Value::as_unsigned);
        info.max_credential_id_length = value.map_get(0x08).and_then(Value::as_unsigned);

        if let Some(transports) = value.map_get(0x09).and_then(Value::as_array) {
            info.transports = text_list(transports);
        }

        if let Some(algorithms) = value.map_get(0x0a).and_then(Value::as_array) {
            info.algorithms = algorithms
                .iter()
                .filter_map(|entry| entry.map_get_text("alg"))
                .filter_map(Value::as_integer)
                .collect();
        }

        info.max_serialized_large_blob_array =
            value.map_get(0x0b).and_then(Value::as_unsigned);
        info.max_cred_blob_length = value.map_get(0x0f).and_then(Value::as_unsigned);
        info.remaining_discoverable_credentials =
            value.map_get(0x14).and_then(Value::as_unsigned);

        Some(info)
    }

    pub fn supports_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    pub fn option(&self, name: &str) -> Option<bool> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, state)| *state)
    }

    /// Highest mutually understood pinUvAuth protocol, preferring 2.
    pub fn preferred_pin_protocol(&self) -> Option<u64> {
        if self.pin_uv_auth_protocols.contains(&2) {
            Some(2)
        } else if self.pin_uv_auth_protocols.contains(&1) {
            Some(1)
        } else {
            None
        }
    }

    /// Whether management commands must use the 0x40/0x41 prototype codes.
    pub fn prefers_prototype_commands(&self) -> bool {
        self.supports_version("FIDO_2_1_PRE") && !self.supports_version("FIDO_2_1")
    }
}

fn text_list(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(Value::as_text)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor::MapBuilder;

    fn sample_info() -> Value {
        MapBuilder::new()
            .insert(
                0x01,
                Value::Array(vec![Value::from("FIDO_2_0"), Value::from("FIDO_2_1")]),
            )
            .insert(0x02, Value::Array(vec![Value::from("hmac-secret")]))
            .insert(0x03, vec![0x42u8; 16])
            .insert(
                0x04,
                Value::Map(vec![
                    (Value::from("rk"), Value::Bool(true)),
                    (Value::from("clientPin"), Value::Bool(false)),
                ]),
            )
            .insert(0x05, 2048u64)
            .insert(
                0x06,
                Value::Array(vec![Value::Unsigned(2), Value::Unsigned(1)]),
            )
            .insert(0x0b, 1024u64)
            .build()
    }

    #[test]
    fn decodes_core_fields() {
        let info = AuthenticatorInfo::from_value(&sample_info()).unwrap();
        assert!(info.supports_version("FIDO_2_1"));
        assert_eq!(info.aaguid, [0x42; 16]);
        assert_eq!(info.option("rk"), Some(true));
        assert_eq!(info.option("clientPin"), Some(false));
        assert_eq!(info.option("uv"), None);
        assert_eq!(info.max_msg_size, Some(2048));
        assert_eq!(info.max_serialized_large_blob_array, Some(1024));
    }

    #[test]
    fn prefers_protocol_two() {
        let info = AuthenticatorInfo::from_value(&sample_info()).unwrap();
        assert_eq!(info.preferred_pin_protocol(), Some(2));
    }

    #[test]
    fn prototype_commands_only_for_pre_devices() {
        let pre = MapBuilder::new()
            .insert(0x01, Value::Array(vec![Value::from("FIDO_2_1_PRE")]))
            .insert(0x03, vec![0u8; 16])
            .build();
        let info = AuthenticatorInfo::from_value(&pre).unwrap();
        assert!(info.prefers_prototype_commands());

        let full = AuthenticatorInfo::from_value(&sample_info()).unwrap();
        assert!(!full.prefers_prototype_commands());
    }

    #[test]
    fn missing_versions_is_invalid() {
        let bad = MapBuilder::new().insert(0x03, vec![0u8; 16]).build();
        assert!(AuthenticatorInfo::from_value(&bad).is_none());
    }
}
