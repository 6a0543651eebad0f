//! CTAP2 wire types
//!
//! Everything that crosses the authenticator boundary as bytes lives here:
//! the canonical CBOR subset, status and command bytes, the entity maps,
//! and the parsers for authenticator data, attestation objects, and
//! authenticatorGetInfo replies.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html>

pub mod attestation;
pub mod authdata;
pub mod cbor;
pub mod command;
pub mod info;
pub mod status;
pub mod types;

pub use attestation::{Attestation, AttestationError, AttestationStatement};
pub use authdata::{AttestedCredentialData, AuthenticatorData};
pub use cbor::{CborError, MapBuilder, Value};
pub use command::CtapCommand;
pub use info::AuthenticatorInfo;
pub use status::StatusCode;
pub use types::{
    CoseKey, CredentialDescriptor, CredentialType, PublicKeyCredentialParameters, RelyingParty,
    User,
};
