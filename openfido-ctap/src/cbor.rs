//! Canonical CBOR subset used on the CTAP2 wire
//!
//! CTAP2 messages use the CTAP2 canonical CBOR encoding form: definite
//! lengths only, shortest possible integer heads, and map keys sorted by the
//! byte-lexicographic order of their encoded form. Floats and tags never
//! appear on this layer.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#ctap2-canonical-cbor-encoding-form>
//!
//! Encoding is always canonical. Decoding comes in two flavours:
//!
//! - [`decode`] is lenient about integer head sizes and key order, because
//!   some deployed authenticators emit non-canonical replies.
//! - [`decode_strict`] rejects non-canonical input and is used for
//!   security-critical objects (attestation objects, COSE keys embedded in
//!   authenticator data).
//!
//! Both flavours reject duplicate map keys, indefinite lengths, floats,
//! tags, and nesting deeper than [`MAX_DEPTH`].

use std::fmt;

/// Containers may nest at most this deep. CTAP2 request and response maps
/// never exceed four levels.
pub const MAX_DEPTH: usize = 4;

/// Decode failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CborError {
    /// Input ended before the value did
    Truncated,

    /// Major type or simple value outside the CTAP2 subset (float, tag,
    /// indefinite length, unassigned simple value)
    BadType,

    /// Strict mode only: oversized integer head or misordered map keys
    NonCanonical,

    /// Map contains the same key twice
    DuplicateKey,

    /// Containers nested deeper than [`MAX_DEPTH`]
    DepthExceeded,
}

impl fmt::Display for CborError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CborError::Truncated => write!(f, "truncated CBOR input"),
            CborError::BadType => write!(f, "CBOR type outside the CTAP2 subset"),
            CborError::NonCanonical => write!(f, "non-canonical CBOR encoding"),
            CborError::DuplicateKey => write!(f, "duplicate map key"),
            CborError::DepthExceeded => write!(f, "CBOR nesting too deep"),
        }
    }
}

impl std::error::Error for CborError {}

pub type Result<T> = std::result::Result<T, CborError>;

/// A CTAP2 wire value.
///
/// Integers are split at zero: `Unsigned` carries 0..=2^64-1 (major type 0)
/// and `Negative` carries -2^63..=-1 (major type 1). The split keeps the
/// full unsigned range representable without losing the distinction the wire
/// makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Unsigned(u64),
    Negative(i64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Bool(bool),
    Null,
}

impl Value {
    /// Build an integer value with the correct variant for its sign.
    pub fn integer(v: i64) -> Value {
        if v >= 0 {
            Value::Unsigned(v as u64)
        } else {
            Value::Negative(v)
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Value::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view covering both variants. `None` for unsigned values above
    /// `i64::MAX`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Unsigned(v) => i64::try_from(*v).ok(),
            Value::Negative(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Look up an integer key in a map value.
    pub fn map_get(&self, key: i64) -> Option<&Value> {
        let wanted = Value::integer(key);
        self.as_map()?
            .iter()
            .find(|(k, _)| *k == wanted)
            .map(|(_, v)| v)
    }

    /// Look up a text key in a map value.
    pub fn map_get_text(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::Unsigned(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.into())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Value {
        Value::Bytes(v.to_vec())
    }
}

// ---------------------------------------------------------------- encoding

fn write_head(out: &mut Vec<u8>, major: u8, arg: u64) {
    let m = major << 5;
    if arg < 24 {
        out.push(m | arg as u8);
    } else if arg <= 0xff {
        out.push(m | 24);
        out.push(arg as u8);
    } else if arg <= 0xffff {
        out.push(m | 25);
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= 0xffff_ffff {
        out.push(m | 26);
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(m | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Unsigned(v) => write_head(out, 0, *v),
        Value::Negative(v) => write_head(out, 1, !(*v) as u64),
        Value::Bytes(b) => {
            write_head(out, 2, b.len() as u64);
            out.extend_from_slice(b);
        }
        Value::Text(t) => {
            write_head(out, 3, t.len() as u64);
            out.extend_from_slice(t.as_bytes());
        }
        Value::Array(items) => {
            write_head(out, 4, items.len() as u64);
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(entries) => {
            // Canonical form sorts entries by the encoded key bytes,
            // regardless of insertion order.
            let mut encoded: Vec<(Vec<u8>, &Value)> = entries
                .iter()
                .map(|(k, v)| (encode(k), v))
                .collect();
            encoded.sort_by(|a, b| a.0.cmp(&b.0));

            write_head(out, 5, encoded.len() as u64);
            for (key_bytes, v) in encoded {
                out.extend_from_slice(&key_bytes);
                encode_into(v, out);
            }
        }
        Value::Bool(false) => out.push(0xf4),
        Value::Bool(true) => out.push(0xf5),
        Value::Null => out.push(0xf6),
    }
}

/// Encode a value in the CTAP2 canonical form.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

// ---------------------------------------------------------------- decoding

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    strict: bool,
}

impl<'a> Decoder<'a> {
    fn byte(&mut self) -> Result<u8> {
        let b = *self.input.get(self.pos).ok_or(CborError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(CborError::Truncated)?;
        if end > self.input.len() {
            return Err(CborError::Truncated);
        }
        let s = &self.input[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    /// Read a head, returning `(major, argument)`.
    fn head(&mut self) -> Result<(u8, u64)> {
        let initial = self.byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        let arg = match info {
            0..=23 => u64::from(info),
            // Extended major-7 heads are floats or multi-byte simple
            // values, none of which exist in the subset
            24..=27 if major == 7 => return Err(CborError::BadType),
            24 => {
                let v = u64::from(self.byte()?);
                if self.strict && v < 24 {
                    return Err(CborError::NonCanonical);
                }
                v
            }
            25 => {
                let v = u64::from(u16::from_be_bytes(self.take(2)?.try_into().unwrap()));
                if self.strict && v <= 0xff {
                    return Err(CborError::NonCanonical);
                }
                v
            }
            26 => {
                let v = u64::from(u32::from_be_bytes(self.take(4)?.try_into().unwrap()));
                if self.strict && v <= 0xffff {
                    return Err(CborError::NonCanonical);
                }
                v
            }
            27 => {
                let v = u64::from_be_bytes(self.take(8)?.try_into().unwrap());
                if self.strict && v <= 0xffff_ffff {
                    return Err(CborError::NonCanonical);
                }
                v
            }
            // 28-30 reserved, 31 indefinite; neither is in the subset
            _ => return Err(CborError::BadType),
        };

        Ok((major, arg))
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        let (major, arg) = self.head()?;

        match major {
            0 => Ok(Value::Unsigned(arg)),
            1 => {
                // Argument n encodes -1 - n; anything past i64::MIN is out
                // of the supported integer range.
                if arg > i64::MAX as u64 {
                    return Err(CborError::BadType);
                }
                Ok(Value::Negative(-1 - arg as i64))
            }
            2 => {
                let len = usize::try_from(arg).map_err(|_| CborError::Truncated)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            3 => {
                let len = usize::try_from(arg).map_err(|_| CborError::Truncated)?;
                let raw = self.take(len)?;
                let text = std::str::from_utf8(raw).map_err(|_| CborError::BadType)?;
                Ok(Value::Text(text.into()))
            }
            4 => {
                if depth >= MAX_DEPTH {
                    return Err(CborError::DepthExceeded);
                }
                let len = usize::try_from(arg).map_err(|_| CborError::Truncated)?;
                if len > self.input.len() - self.pos {
                    // Every element takes at least one byte; bail before
                    // reserving absurd capacities from hostile lengths.
                    return Err(CborError::Truncated);
                }
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.value(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            5 => {
                if depth >= MAX_DEPTH {
                    return Err(CborError::DepthExceeded);
                }
                let len = usize::try_from(arg).map_err(|_| CborError::Truncated)?;
                if len > (self.input.len() - self.pos) / 2 {
                    return Err(CborError::Truncated);
                }
                let mut entries: Vec<(Value, Value)> = Vec::with_capacity(len);
                let mut prev_key_end = 0usize;
                let mut prev_key_start = 0usize;
                for i in 0..len {
                    let key_start = self.pos;
                    let key = self.value(depth + 1)?;
                    let key_end = self.pos;

                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(CborError::DuplicateKey);
                    }
                    if self.strict && i > 0 {
                        let prev = &self.input[prev_key_start..prev_key_end];
                        let this = &self.input[key_start..key_end];
                        if this <= prev {
                            return Err(CborError::NonCanonical);
                        }
                    }
                    prev_key_start = key_start;
                    prev_key_end = key_end;

                    let value = self.value(depth + 1)?;
                    entries.push((key, value));
                }
                Ok(Value::Map(entries))
            }
            7 => match arg {
                20 => Ok(Value::Bool(false)),
                21 => Ok(Value::Bool(true)),
                22 => Ok(Value::Null),
                _ => Err(CborError::BadType),
            },
            // major 6 (tags) is outside the subset
            _ => Err(CborError::BadType),
        }
    }
}

fn decode_with(data: &[u8], strict: bool) -> Result<(Value, usize)> {
    let mut d = Decoder {
        input: data,
        pos: 0,
        strict,
    };
    let v = d.value(0)?;
    Ok((v, d.pos))
}

/// Decode one value, leniently, returning it and the number of bytes
/// consumed. Trailing bytes are left for the caller.
pub fn decode(data: &[u8]) -> Result<(Value, usize)> {
    decode_with(data, false)
}

/// Decode one value, rejecting non-canonical encodings.
pub fn decode_strict(data: &[u8]) -> Result<(Value, usize)> {
    decode_with(data, true)
}

// ------------------------------------------------------------- map builder

/// Builder for the integer-keyed parameter maps CTAP2 commands use.
///
/// Keys are sorted at encode time, so insertion order does not matter.
#[derive(Default)]
pub struct MapBuilder {
    entries: Vec<(Value, Value)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an integer-keyed entry.
    pub fn insert(mut self, key: i64, value: impl Into<Value>) -> Self {
        self.entries.push((Value::integer(key), value.into()));
        self
    }

    /// Insert only when the value is present.
    pub fn insert_opt(self, key: i64, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.insert(key, v),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> Value {
        Value::Map(self.entries)
    }

    /// Build and encode in one step.
    pub fn encode(self) -> Vec<u8> {
        encode(&self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let bytes = encode(&v);
        let (decoded, used) = decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, v);
        // Canonical output must also survive strict decoding.
        let (strict, _) = decode_strict(&bytes).unwrap();
        assert_eq!(strict, v);
    }

    #[test]
    fn integer_heads_are_shortest() {
        assert_eq!(encode(&Value::Unsigned(0)), [0x00]);
        assert_eq!(encode(&Value::Unsigned(23)), [0x17]);
        assert_eq!(encode(&Value::Unsigned(24)), [0x18, 24]);
        assert_eq!(encode(&Value::Unsigned(255)), [0x18, 255]);
        assert_eq!(encode(&Value::Unsigned(256)), [0x19, 1, 0]);
        assert_eq!(encode(&Value::Unsigned(65536)), [0x1a, 0, 1, 0, 0]);
        assert_eq!(encode(&Value::Negative(-1)), [0x20]);
        assert_eq!(encode(&Value::Negative(-25)), [0x38, 24]);
    }

    #[test]
    fn negative_extremes() {
        roundtrip(Value::Negative(i64::MIN));
        roundtrip(Value::Unsigned(u64::MAX));

        // -2^64 is representable in CBOR but not in this subset
        let mut too_negative = vec![0x3b];
        too_negative.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(decode(&too_negative), Err(CborError::BadType));
    }

    #[test]
    fn map_keys_sorted_by_encoded_bytes() {
        // {3: h'', 1: 2, 2: "fido"} encodes with keys in order 1, 2, 3
        let v = MapBuilder::new()
            .insert(3, Vec::<u8>::new())
            .insert(1, 2u64)
            .insert(2, "fido")
            .build();
        assert_eq!(
            encode(&v),
            [0xa3, 0x01, 0x02, 0x02, 0x64, 0x66, 0x69, 0x64, 0x6f, 0x03, 0x40]
        );
    }

    #[test]
    fn unsigned_sorts_before_negative() {
        // 0x00.. < 0x20.. in encoded order, so positive keys lead
        let v = Value::Map(vec![
            (Value::Negative(-1), Value::Bool(true)),
            (Value::Unsigned(10), Value::Bool(false)),
        ]);
        let bytes = encode(&v);
        assert_eq!(bytes, [0xa2, 0x0a, 0xf4, 0x20, 0xf5]);
    }

    #[test]
    fn roundtrips() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bytes(vec![0u8; 300]));
        roundtrip(Value::Text("pinUvAuthParam".into()));
        roundtrip(Value::Array(vec![
            Value::Unsigned(1),
            Value::Text("public-key".into()),
        ]));
        roundtrip(
            MapBuilder::new()
                .insert(1, "example.com")
                .insert(2, vec![0xAAu8; 32])
                .insert(-7, 1u64)
                .build(),
        );
    }

    #[test]
    fn lenient_accepts_oversized_heads_strict_rejects() {
        // 1 encoded as 0x18 0x01 instead of 0x01
        let oversized = [0x18, 0x01];
        assert_eq!(decode(&oversized).unwrap().0, Value::Unsigned(1));
        assert_eq!(decode_strict(&oversized), Err(CborError::NonCanonical));
    }

    #[test]
    fn lenient_accepts_misordered_keys_strict_rejects() {
        // {2: 0, 1: 0}
        let misordered = [0xa2, 0x02, 0x00, 0x01, 0x00];
        assert!(decode(&misordered).is_ok());
        assert_eq!(decode_strict(&misordered), Err(CborError::NonCanonical));
    }

    #[test]
    fn duplicate_keys_rejected_in_both_modes() {
        let dup = [0xa2, 0x01, 0x00, 0x01, 0x00];
        assert_eq!(decode(&dup), Err(CborError::DuplicateKey));
        assert_eq!(decode_strict(&dup), Err(CborError::DuplicateKey));

        // Same key via different encodings still collides leniently
        let dup_mixed = [0xa2, 0x01, 0x00, 0x18, 0x01, 0x00];
        assert_eq!(decode(&dup_mixed), Err(CborError::DuplicateKey));
    }

    #[test]
    fn depth_cap() {
        // Four nested arrays are the limit
        let ok = [0x81, 0x81, 0x81, 0x80];
        assert!(decode(&ok).is_ok());
        let too_deep = [0x81, 0x81, 0x81, 0x81, 0x80];
        assert_eq!(decode(&too_deep), Err(CborError::DepthExceeded));
    }

    #[test]
    fn rejects_floats_tags_indefinite() {
        assert_eq!(decode(&[0xfb, 0, 0, 0, 0, 0, 0, 0, 0]), Err(CborError::BadType));
        assert_eq!(decode(&[0xc0, 0x00]), Err(CborError::BadType));
        assert_eq!(decode(&[0x9f, 0xff]), Err(CborError::BadType));
        assert_eq!(decode(&[0x5f]), Err(CborError::BadType));
    }

    #[test]
    fn truncation() {
        assert_eq!(decode(&[]), Err(CborError::Truncated));
        assert_eq!(decode(&[0x19, 0x01]), Err(CborError::Truncated));
        assert_eq!(decode(&[0x44, 0x01, 0x02]), Err(CborError::Truncated));
        assert_eq!(decode(&[0xa1, 0x01]), Err(CborError::Truncated));
        // Hostile length must fail before allocation
        let mut huge = vec![0x5b];
        huge.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(decode(&huge), Err(CborError::Truncated));
    }

    #[test]
    fn invalid_utf8_text() {
        assert_eq!(decode(&[0x62, 0xff, 0xfe]), Err(CborError::BadType));
    }

    #[test]
    fn consumed_length_reported() {
        let mut bytes = encode(&Value::Unsigned(500));
        let value_len = bytes.len();
        bytes.extend_from_slice(&[0xde, 0xad]);
        let (v, used) = decode(&bytes).unwrap();
        assert_eq!(v, Value::Unsigned(500));
        assert_eq!(used, value_len);
    }
}
