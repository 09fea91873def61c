//! Identity-bound, timestamped in-toto attestations.
//!
//! A statement is signed by requesting an OIDC identity token whose audience
//! is the SHA-256 of the statement's canonical bytes, and by timestamping the
//! same bytes with an RFC 3161 authority. The envelope carries both proofs, so
//! a verifier holding only the identity provider's published keys can check
//! who vouched for the statement and when.

// `AttestationSigner::sign_statements()` and `EnvelopeVerifier::verify()` are the entry points most callers need.

#![forbid(unsafe_code)]

mod canonical;
mod error;

/// Audit logging for signing and verification
///
/// Structured `tracing` events with correlation ids, separate from
/// operational logs.
pub mod audit;

/// Dual-evidence envelope signing and verification
pub mod attest;

/// Signer and verifier configuration with environment overrides
pub mod config;

/// OIDC identity tokens, key resolution and validation
pub mod identity;

/// Time sources for token validation
pub mod time;

/// RFC 3161 timestamp requests and structural verification
pub mod timestamp;

/// Blocking HTTP transport with cooperative cancellation
pub mod transport;

pub use attest::{
    AttestationSigner, EnvelopeVerifier, IdentityProof, IssuerBatchResult, SignedEvidence,
    VerifiedEnvelope,
};
pub use canonical::{canonicalize, payload_digest_hex, sha256};
pub use config::AttestationConfig;
pub use error::{ErrorKind, IdStampError};
pub use identity::{GitHubActionsProvider, IdentityProvider, ProviderRegistry};
pub use timestamp::{TimestampAuthority, TimestampClient, TimestampProof, VerifiedTimestamp};
pub use transport::{CancellationToken, HttpClient};

pub use idstamp_intoto as intoto;

pub mod reexports {
    pub use {log, thiserror};
}
