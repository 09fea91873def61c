//! Audit logging for attestation signing and verification.
//!
//! Audit events are emitted through `tracing` under the `idstamp::audit`
//! target, separately from the operational `log` output, so they can be routed
//! to their own sink (typically JSON on stderr or an append-only file).
//!
//! # Usage
//!
//! ```rust,ignore
//! use idstamp::audit::{self, AuditConfig, LogDestination};
//!
//! audit::init(AuditConfig {
//!     destination: LogDestination::File("audit.jsonl".into()),
//!     ..AuditConfig::default()
//! })?;
//! ```
//!
//! # Event Types
//!
//! - `signing.attempt` - Statement signing started
//! - `signing.success` - Envelope produced
//! - `signing.failure` - Signing failed
//! - `verification.attempt` - Envelope verification started
//! - `verification.success` - Envelope accepted
//! - `verification.failure` - Envelope rejected
//!
//! # JSON Output Example
//!
//! ```json
//! {
//!   "timestamp": "2026-01-04T20:00:00Z",
//!   "level": "INFO",
//!   "target": "idstamp::audit",
//!   "event_type": "signing.success",
//!   "correlation_id": "3f2b0c1e-...",
//!   "payload_digest": "sha256:e3b0c442...",
//!   "issuer": "https://token.actions.githubusercontent.com",
//!   "timestamp_serial": "04a1..."
//! }
//! ```

use crate::error::IdStampError;
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

/// Tracing target of every audit event
pub const AUDIT_TARGET: &str = "idstamp::audit";

static AUDIT_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Audit log configuration
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Enable audit logging (default: true)
    pub enabled: bool,
    pub destination: LogDestination,
    /// Use JSON format (default: true)
    pub json_format: bool,
    /// Log level filter (default: "idstamp::audit=info")
    pub filter: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: LogDestination::Stderr,
            json_format: true,
            filter: format!("{}=info", AUDIT_TARGET),
        }
    }
}

/// Audit log destination
#[derive(Debug, Clone, Default)]
pub enum LogDestination {
    Stdout,
    #[default]
    Stderr,
    /// Append to a file
    File(String),
}

/// Initialize the audit subscriber.
///
/// Only the first call has an effect. Fails if the audit file cannot be opened.
pub fn init(config: AuditConfig) -> Result<(), IdStampError> {
    if AUDIT_INITIALIZED.get().is_some() {
        return Ok(());
    }

    if !config.enabled {
        let _ = AUDIT_INITIALIZED.set(true);
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.destination {
        LogDestination::Stdout => install(filter, config.json_format, std::io::stdout),
        LogDestination::Stderr => install(filter, config.json_format, std::io::stderr),
        LogDestination::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            install(filter, config.json_format, std::sync::Mutex::new(file))
        }
    }

    let _ = AUDIT_INITIALIZED.set(true);
    Ok(())
}

fn install<W>(filter: EnvFilter, json: bool, writer: W)
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    // A subscriber installed by the embedding application wins
    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::NONE)
                    .with_writer(writer),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(writer))
            .try_init()
    };

    if let Err(e) = result {
        log::debug!("Audit subscriber not installed: {}", e);
    }
}

/// Redact an email address for PII protection.
///
/// Transforms "user@example.com" into "us***@example.com"
pub fn redact_email(email: &str) -> String {
    if let Some(at_pos) = email.find('@') {
        let local = &email[..at_pos];
        let domain = &email[at_pos..];
        let visible: String = local.chars().take(2).collect();
        format!("{}***{}", visible, domain)
    } else {
        "***".to_string()
    }
}

/// Redact an identity for audit output.
///
/// Email addresses keep their domain; workload subjects such as
/// `repo:octo/app:ref:refs/heads/main` are not personal data and pass through
/// after token-like words are stripped.
pub fn redact_identity(identity: &str) -> String {
    if identity.contains('@') {
        redact_email(identity)
    } else {
        sanitize_error_message(identity)
    }
}

/// Generate a new correlation ID for tracking related audit events.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn identity_display(identity: Option<&str>) -> String {
    identity
        .map(redact_identity)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Log a signing attempt event.
pub fn log_signing_attempt(correlation_id: &str, payload_digest: &str, issuer: &str) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "signing.attempt",
        correlation_id = correlation_id,
        payload_digest = payload_digest,
        issuer = issuer,
        "Statement signing initiated"
    );
}

/// Log a successful signing event.
pub fn log_signing_success(
    correlation_id: &str,
    payload_digest: &str,
    issuer: &str,
    identity: Option<&str>,
    timestamp_serial: &str,
) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "signing.success",
        correlation_id = correlation_id,
        payload_digest = payload_digest,
        issuer = issuer,
        identity = %identity_display(identity),
        timestamp_serial = timestamp_serial,
        "Statement signed"
    );
}

/// Log a failed signing event.
pub fn log_signing_failure(
    correlation_id: &str,
    payload_digest: &str,
    issuer: &str,
    error: &IdStampError,
) {
    let safe_message = sanitize_error_message(&error.to_string());

    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = "signing.failure",
        correlation_id = correlation_id,
        payload_digest = payload_digest,
        issuer = issuer,
        error_type = error.type_name(),
        error_message = %safe_message,
        "Statement signing failed"
    );
}

/// Log a verification attempt event.
pub fn log_verification_attempt(correlation_id: &str, payload_digest: &str) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "verification.attempt",
        correlation_id = correlation_id,
        payload_digest = payload_digest,
        "Envelope verification initiated"
    );
}

/// Log a successful verification event.
pub fn log_verification_success(
    correlation_id: &str,
    payload_digest: &str,
    issuer: &str,
    identity: Option<&str>,
    generated_at: i64,
) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "verification.success",
        correlation_id = correlation_id,
        payload_digest = payload_digest,
        issuer = issuer,
        identity = %identity_display(identity),
        generated_at = %crate::time::format_rfc3339(generated_at),
        "Envelope verified"
    );
}

/// Log a failed verification event.
pub fn log_verification_failure(correlation_id: &str, payload_digest: &str, error: &IdStampError) {
    let safe_message = sanitize_error_message(&error.to_string());

    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = "verification.failure",
        correlation_id = correlation_id,
        payload_digest = payload_digest,
        error_type = error.type_name(),
        error_kind = ?error.kind(),
        error_message = %safe_message,
        "Envelope rejected"
    );
}

/// Strip token-like words and bound the length of messages bound for the
/// audit log.
fn sanitize_error_message(message: &str) -> String {
    let sanitized = message
        .split_whitespace()
        .map(|word| {
            if word.len() > 40
                && word
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
            {
                "[REDACTED]"
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if sanitized.chars().count() > 500 {
        let truncated: String = sanitized.chars().take(497).collect();
        format!("{}...", truncated)
    } else {
        sanitized
    }
}
