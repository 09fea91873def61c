use super::evidence::{decode_base64, SignedEvidence};
use crate::audit;
use crate::canonical::payload_digest_hex;
use crate::config::AttestationConfig;
use crate::error::IdStampError;
use crate::identity::{IdentityToken, ProviderRegistry, TokenValidator, ValidatedClaims};
use crate::time::FixedTimeSource;
use crate::timestamp::{verify_timestamp_for_payload, VerifiedTimestamp};
use idstamp_intoto::{Envelope, Statement, PAYLOAD_TYPE_IN_TOTO};

/// An envelope that passed every check
#[derive(Debug, Clone)]
pub struct VerifiedEnvelope {
    pub statement: Statement,
    pub claims: ValidatedClaims,
    pub timestamp: VerifiedTimestamp,
    /// Lowercase hex SHA-256 of the payload
    pub payload_digest: String,
}

/// Verifies dual-evidence envelopes
pub struct EnvelopeVerifier {
    registry: ProviderRegistry,
    validator: TokenValidator,
}

impl EnvelopeVerifier {
    pub fn new(registry: ProviderRegistry, validator: TokenValidator) -> Self {
        Self {
            registry,
            validator,
        }
    }

    pub fn from_config(registry: ProviderRegistry, config: &AttestationConfig) -> Self {
        Self::new(registry, config.token_validator())
    }

    /// Verify `envelope`
    ///
    /// The identity token is validated at the generation time attested by the
    /// timestamp authority: it must have been valid when the payload was
    /// timestamped, not necessarily now.
    pub fn verify(&self, envelope: &Envelope) -> Result<VerifiedEnvelope, IdStampError> {
        let correlation_id = audit::new_correlation_id();
        let payload = decode_base64(&envelope.payload, "payload");
        let digest = payload
            .as_deref()
            .map(payload_digest_hex)
            .unwrap_or_else(|_| "unknown".to_string());
        audit::log_verification_attempt(&correlation_id, &format!("sha256:{}", digest));

        let result = payload.and_then(|payload| self.verify_payload(envelope, &payload, &digest));
        match &result {
            Ok(verified) => audit::log_verification_success(
                &correlation_id,
                &format!("sha256:{}", digest),
                verified.claims.issuer(),
                verified.claims.subject(),
                verified.timestamp.generated_at,
            ),
            Err(e) => audit::log_verification_failure(
                &correlation_id,
                &format!("sha256:{}", digest),
                e,
            ),
        }
        result
    }

    fn verify_payload(
        &self,
        envelope: &Envelope,
        payload: &[u8],
        digest: &str,
    ) -> Result<VerifiedEnvelope, IdStampError> {
        if envelope.payload_type != PAYLOAD_TYPE_IN_TOTO {
            return Err(IdStampError::InvalidEnvelope(format!(
                "unexpected payload type '{}'",
                envelope.payload_type
            )));
        }

        let evidence = SignedEvidence::from_signatures(&envelope.signatures)?;

        let statement = Statement::from_json(payload)
            .map_err(|e| IdStampError::InvalidEnvelope(format!("payload is not a statement: {}", e)))?;

        if !envelope.predicate_type.is_empty() && envelope.predicate_type != statement.predicate_type
        {
            return Err(IdStampError::PredicateTypeMismatch {
                declared: envelope.predicate_type.clone(),
                signed: statement.predicate_type.clone(),
            });
        }

        let timestamp = verify_timestamp_for_payload(&evidence.timestamp_proof, payload)?;

        let token = IdentityToken::parse(&evidence.identity_proof.id_token)?;
        // Reject disallowed algorithms before any key is fetched
        self.validator.check_algorithm(&token)?;

        let issuer = match token.issuer() {
            Some(iss) if !iss.is_empty() => iss,
            _ => return Err(IdStampError::MissingIssuer),
        };
        let provider = self.registry.get(issuer)?;

        let key_id = token.key_id().ok_or_else(|| {
            IdStampError::MalformedToken("token header has no key id".to_string())
        })?;
        let key = provider.verification_key(key_id)?;

        let generated_at = u64::try_from(timestamp.generated_at).map_err(|_| {
            IdStampError::InvalidProofStructure(format!(
                "generation time {} precedes the Unix epoch",
                timestamp.generated_at
            ))
        })?;
        let claims = self.validator.validate_with_time(
            &token,
            &key,
            digest,
            &FixedTimeSource::from_unix_secs(generated_at),
        )?;

        log::info!(
            "Envelope verified: issuer {}, timestamped {}",
            claims.issuer(),
            crate::time::format_rfc3339(timestamp.generated_at)
        );

        Ok(VerifiedEnvelope {
            statement,
            claims,
            timestamp,
            payload_digest: digest.to_string(),
        })
    }
}
