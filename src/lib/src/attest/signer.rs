use super::evidence::{IdentityProof, SignedEvidence};
use crate::audit;
use crate::canonical::{canonicalize, payload_digest_hex, sha256};
use crate::config::AttestationConfig;
use crate::error::IdStampError;
use crate::identity::{IdentityProvider, ProviderRegistry};
use crate::timestamp::{verify_timestamp, TimestampAuthority};
use crate::transport::CancellationToken;
use idstamp_intoto::{Envelope, Statement};
use std::sync::Arc;

/// Result of signing one issuer's statements
#[derive(Debug)]
pub struct IssuerBatchResult {
    pub issuer: String,
    pub result: Result<Vec<Envelope>, IdStampError>,
}

/// Produces dual-evidence envelopes: an audience-bound identity token and an
/// RFC 3161 timestamp, both over the canonical statement bytes
pub struct AttestationSigner {
    registry: ProviderRegistry,
    tsa: Arc<dyn TimestampAuthority>,
    cancel: CancellationToken,
}

impl AttestationSigner {
    pub fn new(registry: ProviderRegistry, tsa: Arc<dyn TimestampAuthority>) -> Self {
        Self {
            registry,
            tsa,
            cancel: CancellationToken::new(),
        }
    }

    /// Signer using the configured timestamp authority
    ///
    /// `cancel` is shared with the timestamp client and checked between
    /// statements; providers should be built with the same token.
    pub fn from_config(
        registry: ProviderRegistry,
        config: &AttestationConfig,
        cancel: CancellationToken,
    ) -> Self {
        let tsa = config.timestamp_client(config.http_client(cancel.clone()));
        Self {
            registry,
            tsa: Arc::new(tsa),
            cancel,
        }
    }

    /// Observe `cancel` between statements
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Sign `statements` with the provider registered for `issuer`
    ///
    /// Statements are processed in order. The first failure aborts the call and
    /// no envelopes are returned.
    pub fn sign_statements(
        &self,
        statements: &[Statement],
        issuer: &str,
    ) -> Result<Vec<Envelope>, IdStampError> {
        let provider = self.registry.get(issuer)?;
        log::info!(
            "Signing {} statement(s) with {} ({})",
            statements.len(),
            provider.name(),
            provider.issuer()
        );

        statements
            .iter()
            .map(|statement| self.sign_statement(statement, provider.as_ref()))
            .collect()
    }

    /// Sign statements bound to possibly different issuers, all or nothing
    ///
    /// Every issuer is resolved before the first statement is signed, so an
    /// unknown issuer fails without contacting any provider. Any later failure
    /// aborts the whole call.
    pub fn sign_batch(&self, items: &[(String, Statement)]) -> Result<Vec<Envelope>, IdStampError> {
        let providers = items
            .iter()
            .map(|(issuer, _)| self.registry.get(issuer))
            .collect::<Result<Vec<_>, _>>()?;

        items
            .iter()
            .zip(providers)
            .map(|((_, statement), provider)| self.sign_statement(statement, provider.as_ref()))
            .collect()
    }

    /// Sign each issuer's statements independently
    ///
    /// One result per issuer, in input order. A failure for one issuer, such
    /// as [`IdStampError::UnknownProvider`], leaves the others unaffected.
    pub fn sign_statements_per_issuer(
        &self,
        batches: &[(String, Vec<Statement>)],
    ) -> Vec<IssuerBatchResult> {
        batches
            .iter()
            .map(|(issuer, statements)| {
                let result = self.sign_statements(statements, issuer);
                if let Err(e) = &result {
                    log::warn!("Signing for {} failed: {}", issuer, e);
                }
                IssuerBatchResult {
                    issuer: issuer.clone(),
                    result,
                }
            })
            .collect()
    }

    /// Sign one statement with `provider`
    pub fn sign_statement(
        &self,
        statement: &Statement,
        provider: &dyn IdentityProvider,
    ) -> Result<Envelope, IdStampError> {
        self.cancel.check()?;

        let payload = canonicalize(statement)?;
        let digest = payload_digest_hex(&payload);
        let correlation_id = audit::new_correlation_id();
        audit::log_signing_attempt(&correlation_id, &format!("sha256:{}", digest), provider.issuer());

        match self.sign_payload(&payload, &digest, &statement.predicate_type, provider) {
            Ok((envelope, subject, serial)) => {
                audit::log_signing_success(
                    &correlation_id,
                    &format!("sha256:{}", digest),
                    provider.issuer(),
                    subject.as_deref(),
                    &serial,
                );
                Ok(envelope)
            }
            Err(e) => {
                audit::log_signing_failure(
                    &correlation_id,
                    &format!("sha256:{}", digest),
                    provider.issuer(),
                    &e,
                );
                Err(e)
            }
        }
    }

    fn sign_payload(
        &self,
        payload: &[u8],
        digest: &str,
        predicate_type: &str,
        provider: &dyn IdentityProvider,
    ) -> Result<(Envelope, Option<String>, String), IdStampError> {
        // The audience is the payload digest: this is what binds the token to
        // these exact bytes
        let token = provider.identity_token(digest)?;
        token.ensure_audience(digest)?;
        log::debug!("Identity token issued by {:?}", token.issuer());

        let proof = self.tsa.create_timestamp(payload)?;
        let expected = sha256(payload);
        if proof.digest() != expected.as_slice() {
            return Err(IdStampError::DigestMismatch {
                timestamped: hex::encode(proof.digest()),
                signed: hex::encode(expected),
            });
        }
        let verified = verify_timestamp(&proof)?;

        let evidence = SignedEvidence {
            identity_proof: IdentityProof::new(token.raw()),
            timestamp_proof: proof.into_der(),
        };
        let envelope = evidence.into_envelope(payload, predicate_type)?;

        Ok((envelope, token.claims().sub.clone(), verified.serial_number))
    }
}
