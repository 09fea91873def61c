//! Dual-evidence attestation envelopes
//!
//! An envelope carries the canonical statement bytes and two proofs over
//! them: an identity token whose audience is the payload digest, and an RFC
//! 3161 timestamp of the same digest.

mod evidence;
mod signer;
mod verifier;

pub use evidence::{IdentityProof, SignedEvidence};
pub use signer::{AttestationSigner, IssuerBatchResult};
pub use verifier::{EnvelopeVerifier, VerifiedEnvelope};
