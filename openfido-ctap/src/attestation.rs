//! Attestation object decoding
//!
//! A makeCredential reply is a map `{1: fmt, 2: authData, 3: attStmt,
//! 4?: epAtt, 5?: largeBlobKey}`. The statement shape is validated per
//! format; verifying the signature chain against a trust root stays with
//! the caller, who gets the decoded statement and the raw authData bytes.

use std::fmt;

use crate::authdata::{AuthDataError, AuthenticatorData};
use crate::cbor::{self, CborError, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    /// Reply body is not valid canonical CBOR
    Cbor(CborError),

    /// Required map entry absent or of the wrong type
    MissingField(&'static str),

    /// Format string is not one this library knows
    UnknownFormat(String),

    /// Statement does not match its format's required shape
    BadStatement(&'static str),

    /// Embedded authenticator data failed to parse
    AuthData(AuthDataError),

    /// makeCredential reply without attested credential data
    NoCredential,
}

impl fmt::Display for AttestationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttestationError::Cbor(e) => write!(f, "attestation object: {e}"),
            AttestationError::MissingField(name) => {
                write!(f, "attestation object missing {name}")
            }
            AttestationError::UnknownFormat(fmt_name) => {
                write!(f, "unknown attestation format {fmt_name:?}")
            }
            AttestationError::BadStatement(what) => {
                write!(f, "malformed attestation statement: {what}")
            }
            AttestationError::AuthData(e) => write!(f, "{e}"),
            AttestationError::NoCredential => {
                write!(f, "attestation carries no attested credential")
            }
        }
    }
}

impl std::error::Error for AttestationError {}

impl From<AuthDataError> for AttestationError {
    fn from(e: AuthDataError) -> Self {
        AttestationError::AuthData(e)
    }
}

type Result<T> = std::result::Result<T, AttestationError>;

/// Decoded attestation statement, one variant per format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatement {
    /// `packed`: self or CA attestation
    Packed {
        alg: i64,
        sig: Vec<u8>,
        x5c: Vec<Vec<u8>>,
    },

    /// `fido-u2f`: legacy U2F batch attestation
    FidoU2f { sig: Vec<u8>, x5c: Vec<Vec<u8>> },

    /// `tpm`: TPM 2.0 attestation
    Tpm {
        alg: i64,
        sig: Vec<u8>,
        x5c: Vec<Vec<u8>>,
        ver: String,
        cert_info: Vec<u8>,
        pub_area: Vec<u8>,
    },

    /// `none`: authenticator declined to attest
    None,

    /// `apple`: Apple anonymous attestation
    Apple { x5c: Vec<Vec<u8>> },
}

impl AttestationStatement {
    /// Format identifier as it appeared on the wire.
    pub fn format(&self) -> &'static str {
        match self {
            AttestationStatement::Packed { .. } => "packed",
            AttestationStatement::FidoU2f { .. } => "fido-u2f",
            AttestationStatement::Tpm { .. } => "tpm",
            AttestationStatement::None => "none",
            AttestationStatement::Apple { .. } => "apple",
        }
    }

    /// Leaf-first certificate chain; empty for self attestation and `none`.
    pub fn certificates(&self) -> &[Vec<u8>] {
        match self {
            AttestationStatement::Packed { x5c, .. }
            | AttestationStatement::FidoU2f { x5c, .. }
            | AttestationStatement::Tpm { x5c, .. }
            | AttestationStatement::Apple { x5c } => x5c,
            AttestationStatement::None => &[],
        }
    }
}

/// A decoded makeCredential reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    /// Raw authData bytes, needed verbatim for signature verification
    pub auth_data_raw: Vec<u8>,
    pub auth_data: AuthenticatorData,
    pub statement: AttestationStatement,
    /// Enterprise attestation was returned
    pub enterprise: bool,
    pub large_blob_key: Option<Vec<u8>>,
}

impl Attestation {
    /// Decode a makeCredential reply body. The object is security-critical,
    /// so it must be canonical.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let (value, used) = cbor::decode_strict(body).map_err(AttestationError::Cbor)?;
        if used != body.len() {
            return Err(AttestationError::Cbor(CborError::NonCanonical));
        }

        let fmt_name = value
            .map_get(1)
            .and_then(Value::as_text)
            .ok_or(AttestationError::MissingField("fmt"))?;
        let auth_data_raw = value
            .map_get(2)
            .and_then(Value::as_bytes)
            .ok_or(AttestationError::MissingField("authData"))?
            .to_vec();
        let stmt = value
            .map_get(3)
            .ok_or(AttestationError::MissingField("attStmt"))?;

        let auth_data = AuthenticatorData::parse(&auth_data_raw)?;
        if auth_data.attested_credential.is_none() {
            return Err(AttestationError::NoCredential);
        }

        let statement = parse_statement(fmt_name, stmt)?;

        let enterprise = value
            .map_get(4)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let large_blob_key = value
            .map_get(5)
            .and_then(Value::as_bytes)
            .map(<[u8]>::to_vec);

        Ok(Self {
            auth_data_raw,
            auth_data,
            statement,
            enterprise,
            large_blob_key,
        })
    }
}

fn stmt_bytes(stmt: &Value, key: &str) -> Option<Vec<u8>> {
    stmt.map_get_text(key).and_then(Value::as_bytes).map(<[u8]>::to_vec)
}

fn stmt_x5c(stmt: &Value) -> Result<Vec<Vec<u8>>> {
    let Some(list) = stmt.map_get_text("x5c") else {
        return Ok(Vec::new());
    };
    let items = list
        .as_array()
        .ok_or(AttestationError::BadStatement("x5c is not an array"))?;
    items
        .iter()
        .map(|cert| {
            cert.as_bytes()
                .map(<[u8]>::to_vec)
                .ok_or(AttestationError::BadStatement("x5c entry is not bytes"))
        })
        .collect()
}

fn parse_statement(fmt_name: &str, stmt: &Value) -> Result<AttestationStatement> {
    match fmt_name {
        "packed" => {
            let alg = stmt
                .map_get_text("alg")
                .and_then(Value::as_integer)
                .ok_or(AttestationError::BadStatement("packed without alg"))?;
            let sig = stmt_bytes(stmt, "sig")
                .ok_or(AttestationError::BadStatement("packed without sig"))?;
            Ok(AttestationStatement::Packed {
                alg,
                sig,
                x5c: stmt_x5c(stmt)?,
            })
        }
        "fido-u2f" => {
            let sig = stmt_bytes(stmt, "sig")
                .ok_or(AttestationError::BadStatement("fido-u2f without sig"))?;
            let x5c = stmt_x5c(stmt)?;
            // U2F batch attestation always carries exactly one certificate
            if x5c.len() != 1 {
                return Err(AttestationError::BadStatement(
                    "fido-u2f needs exactly one certificate",
                ));
            }
            Ok(AttestationStatement::FidoU2f { sig, x5c })
        }
        "tpm" => {
            let alg = stmt
                .map_get_text("alg")
                .and_then(Value::as_integer)
                .ok_or(AttestationError::BadStatement("tpm without alg"))?;
            let sig = stmt_bytes(stmt, "sig")
                .ok_or(AttestationError::BadStatement("tpm without sig"))?;
            let ver = stmt
                .map_get_text("ver")
                .and_then(Value::as_text)
                .ok_or(AttestationError::BadStatement("tpm without ver"))?
                .to_string();
            let cert_info = stmt_bytes(stmt, "certInfo")
                .ok_or(AttestationError::BadStatement("tpm without certInfo"))?;
            let pub_area = stmt_bytes(stmt, "pubArea")
                .ok_or(AttestationError::BadStatement("tpm without pubArea"))?;
            let x5c = stmt_x5c(stmt)?;
            if x5c.is_empty() {
                return Err(AttestationError::BadStatement("tpm without x5c"));
            }
            Ok(AttestationStatement::Tpm {
                alg,
                sig,
                x5c,
                ver,
                cert_info,
                pub_area,
            })
        }
        "none" => {
            let empty = stmt.as_map().map(|m| m.is_empty()).unwrap_or(false);
            if !empty {
                return Err(AttestationError::BadStatement("none must be empty"));
            }
            Ok(AttestationStatement::None)
        }
        "apple" => {
            let x5c = stmt_x5c(stmt)?;
            if x5c.is_empty() {
                return Err(AttestationError::BadStatement("apple without x5c"));
            }
            Ok(AttestationStatement::Apple { x5c })
        }
        other => Err(AttestationError::UnknownFormat(other.to_string())),
    }
}
