/// Coarse classification of an [`IdStampError`].
///
/// Lets callers tell "this envelope is malformed" from "this envelope failed a
/// trust check" from "infrastructure was unreachable".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failures, non-success statuses, unreachable services, cancellation
    Infrastructure,
    /// Structurally invalid responses, tokens, proofs or envelopes
    Malformed,
    /// Verification-time trust failures. Always terminal.
    TrustFailure,
    /// Programmer or configuration errors
    Usage,
}

/// The idstamp error type.
#[derive(Debug, thiserror::Error)]
pub enum IdStampError {
    // Infrastructure
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {status} ({reason}) from {url}")]
    UnexpectedStatus {
        status: u16,
        reason: String,
        url: String,
    },

    #[error("OIDC discovery document unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("JSON Web Key Set unavailable: {0}")]
    KeySetUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    // Malformed input or response
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Malformed OIDC discovery document: {0}")]
    DiscoveryMalformed(String),

    #[error("Key decode error: {0}")]
    KeyDecodeError(String),

    #[error("Malformed identity token: {0}")]
    MalformedToken(String),

    #[error("Timestamp response unparseable: {0}")]
    ProofUnparseable(String),

    #[error("Invalid timestamp proof structure: {0}")]
    InvalidProofStructure(String),

    #[error("Timestamp request rejected by authority (status {status}): {reason}")]
    TimestampRejected { status: u8, reason: String },

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Canonicalization error: {0}")]
    Canonicalization(String),

    // Trust failures
    #[error("Key not found: no key with id '{0}' in key set")]
    KeyNotFound(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid token signature: {0}")]
    InvalidSignature(String),

    #[error("Audience mismatch: expected '{expected}', got '{actual}'")]
    AudienceMismatch { expected: String, actual: String },

    #[error("Token expired at {expired_at} (verification time {verified_at})")]
    TokenExpired { expired_at: i64, verified_at: i64 },

    #[error("Token not valid before {not_before} (verification time {verified_at})")]
    TokenNotYetValid { not_before: i64, verified_at: i64 },

    #[error("Token has no issuer claim")]
    MissingIssuer,

    #[error("Issuer mismatch: key belongs to '{expected}', token claims '{actual}'")]
    IssuerMismatch { expected: String, actual: String },

    #[error("Digest mismatch: timestamp covers {timestamped}, identity proof covers {signed}")]
    DigestMismatch { timestamped: String, signed: String },

    #[error("Timestamp nonce mismatch")]
    NonceMismatch,

    #[error("Predicate type mismatch: envelope declares '{declared}', statement carries '{signed}'")]
    PredicateTypeMismatch { declared: String, signed: String },

    // Usage
    #[error("Invalid audience binding: {0}")]
    InvalidBinding(String),

    #[error("No identity provider registered for issuer '{0}'")]
    UnknownProvider(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvironment(String),

    #[error("Usage error: {0}")]
    UsageError(&'static str),
}

impl IdStampError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        use IdStampError::*;
        match self {
            Transport(_)
            | UnexpectedStatus { .. }
            | DiscoveryUnavailable(_)
            | KeySetUnavailable(_)
            | Cancelled
            | Io(_) => ErrorKind::Infrastructure,

            MalformedResponse(_)
            | DiscoveryMalformed(_)
            | KeyDecodeError(_)
            | MalformedToken(_)
            | ProofUnparseable(_)
            | InvalidProofStructure(_)
            | TimestampRejected { .. }
            | InvalidEnvelope(_)
            | Canonicalization(_) => ErrorKind::Malformed,

            KeyNotFound(_)
            | UnsupportedAlgorithm(_)
            | InvalidSignature(_)
            | AudienceMismatch { .. }
            | TokenExpired { .. }
            | TokenNotYetValid { .. }
            | MissingIssuer
            | IssuerMismatch { .. }
            | DigestMismatch { .. }
            | NonceMismatch
            | PredicateTypeMismatch { .. } => ErrorKind::TrustFailure,

            InvalidBinding(_) | UnknownProvider(_) | MissingEnvironment(_) | UsageError(_) => {
                ErrorKind::Usage
            }
        }
    }

    /// Short stable name of the variant, used in audit events
    pub fn type_name(&self) -> &'static str {
        use IdStampError::*;
        match self {
            Transport(_) => "transport",
            UnexpectedStatus { .. } => "unexpected_status",
            DiscoveryUnavailable(_) => "discovery_unavailable",
            KeySetUnavailable(_) => "key_set_unavailable",
            Cancelled => "cancelled",
            Io(_) => "io",
            MalformedResponse(_) => "malformed_response",
            DiscoveryMalformed(_) => "discovery_malformed",
            KeyDecodeError(_) => "key_decode_error",
            MalformedToken(_) => "malformed_token",
            ProofUnparseable(_) => "proof_unparseable",
            InvalidProofStructure(_) => "invalid_proof_structure",
            TimestampRejected { .. } => "timestamp_rejected",
            InvalidEnvelope(_) => "invalid_envelope",
            Canonicalization(_) => "canonicalization",
            KeyNotFound(_) => "key_not_found",
            UnsupportedAlgorithm(_) => "unsupported_algorithm",
            InvalidSignature(_) => "invalid_signature",
            AudienceMismatch { .. } => "audience_mismatch",
            TokenExpired { .. } => "token_expired",
            TokenNotYetValid { .. } => "token_not_yet_valid",
            MissingIssuer => "missing_issuer",
            IssuerMismatch { .. } => "issuer_mismatch",
            DigestMismatch { .. } => "digest_mismatch",
            NonceMismatch => "nonce_mismatch",
            PredicateTypeMismatch { .. } => "predicate_type_mismatch",
            InvalidBinding(_) => "invalid_binding",
            UnknownProvider(_) => "unknown_provider",
            MissingEnvironment(_) => "missing_environment",
            UsageError(_) => "usage_error",
        }
    }

    /// Whether this error is a verification-time trust failure
    pub fn is_trust_failure(&self) -> bool {
        self.kind() == ErrorKind::TrustFailure
    }
}
