//! # idstamp in-toto types
//!
//! Minimal crate providing the in-toto statement and envelope wire types used by
//! `idstamp`.
//!
//! This crate is designed to be lightweight so that tools producing attestation
//! statements (build systems, scanners, SBOM generators) can construct them
//! without pulling in HTTP clients or cryptographic dependencies.
//!
//! ## Example
//!
//! ```rust
//! use idstamp_intoto::*;
//!
//! let statement = StatementBuilder::new("https://slsa.dev/provenance/v0.2")
//!     .add_subject("app.wasm", "sha256", "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
//!     .predicate(serde_json::json!({ "builder": { "id": "ci" } }))
//!     .build();
//!
//! assert_eq!(statement.statement_type, STATEMENT_TYPE_V01);
//! assert_eq!(statement.subject.len(), 1);
//! ```
//!
//! ## Envelope Layout
//!
//! An [`Envelope`] carries exactly two signatures. Position 0 is the
//! identity proof (an OIDC token bound to the payload digest), position 1 is the
//! RFC 3161 timestamp response over the same payload. The predicate type is
//! carried out-of-band and is never serialized.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Constants
// ============================================================================

/// Payload type of every envelope produced by idstamp
pub const PAYLOAD_TYPE_IN_TOTO: &str = "application/vnd.in-toto+json";

/// `_type` value of an in-toto v0.1 statement
pub const STATEMENT_TYPE_V01: &str = "https://in-toto.io/Statement/v0.1";

/// Index of the identity proof inside [`Envelope::signatures`]
pub const IDENTITY_SIGNATURE_INDEX: usize = 0;

/// Index of the timestamp proof inside [`Envelope::signatures`]
pub const TIMESTAMP_SIGNATURE_INDEX: usize = 1;

/// Number of signatures a complete envelope carries
pub const ENVELOPE_SIGNATURE_COUNT: usize = 2;

// ============================================================================
// Statement
// ============================================================================

/// An artifact the statement is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Artifact name or path
    pub name: String,

    /// Digests keyed by algorithm name (e.g. `sha256`)
    pub digest: BTreeMap<String, String>,
}

/// in-toto attestation statement
///
/// The predicate is treated as an opaque JSON value; idstamp never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Statement type URI
    #[serde(rename = "_type")]
    pub statement_type: String,

    /// Artifacts covered by this statement
    pub subject: Vec<Subject>,

    /// Predicate type URI
    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    /// Opaque predicate body
    #[serde(default)]
    pub predicate: serde_json::Value,
}

impl Statement {
    /// Parse a statement from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Serialize to (non-canonical) pretty JSON
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Builder for creating a [`Statement`]
pub struct StatementBuilder {
    predicate_type: String,
    subject: Vec<Subject>,
    predicate: serde_json::Value,
}

impl StatementBuilder {
    pub fn new(predicate_type: impl Into<String>) -> Self {
        Self {
            predicate_type: predicate_type.into(),
            subject: Vec::new(),
            predicate: serde_json::Value::Null,
        }
    }

    pub fn add_subject(
        mut self,
        name: impl Into<String>,
        algorithm: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        let mut digests = BTreeMap::new();
        digests.insert(algorithm.into(), digest.into());
        self.subject.push(Subject {
            name: name.into(),
            digest: digests,
        });
        self
    }

    pub fn predicate(mut self, predicate: serde_json::Value) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn build(self) -> Statement {
        Statement {
            statement_type: STATEMENT_TYPE_V01.to_string(),
            subject: self.subject,
            predicate_type: self.predicate_type,
            predicate: self.predicate,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A single base64-encoded signature entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Base64 (standard alphabet, padded) signature bytes
    pub sig: String,
}

/// Attestation envelope as exchanged with verifiers
///
/// `signatures` is positional: see [`IDENTITY_SIGNATURE_INDEX`] and
/// [`TIMESTAMP_SIGNATURE_INDEX`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "payloadType")]
    pub payload_type: String,

    /// Base64 of the canonical statement bytes
    pub payload: String,

    pub signatures: Vec<Signature>,

    /// Predicate type of the enclosed statement, carried out-of-band
    #[serde(skip)]
    pub predicate_type: String,
}

impl Envelope {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON. The out-of-band predicate type is left empty.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The identity proof entry, if present
    pub fn identity_signature(&self) -> Option<&Signature> {
        self.signatures.get(IDENTITY_SIGNATURE_INDEX)
    }

    /// The timestamp proof entry, if present
    pub fn timestamp_signature(&self) -> Option<&Signature> {
        self.signatures.get(TIMESTAMP_SIGNATURE_INDEX)
    }
}
