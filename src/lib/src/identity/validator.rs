use super::jwks::{PublicSigningKey, ResolvedSigningKey};
use super::token::{IdentityToken, TokenClaims};
use crate::error::IdStampError;
use crate::time::{SystemTimeSource, TimeSource};
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::Signature as EcSignature;
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::signature::Verifier as _;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;

/// JWS algorithms this crate can verify
///
/// `none` is deliberately absent: it cannot be named, so it cannot be allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsAlgorithm {
    RS256,
    ES256,
}

impl JwsAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            JwsAlgorithm::RS256 => "RS256",
            JwsAlgorithm::ES256 => "ES256",
        }
    }
}

impl FromStr for JwsAlgorithm {
    type Err = IdStampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(JwsAlgorithm::RS256),
            "ES256" => Ok(JwsAlgorithm::ES256),
            other => Err(IdStampError::UnsupportedAlgorithm(format!(
                "'{}' is not a supported JWS algorithm",
                other
            ))),
        }
    }
}

impl std::fmt::Display for JwsAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of a token that passed every check in [`TokenValidator::validate`]
///
/// Only the validator can construct this type, so holding one means the
/// signature, audience, validity window and issuer were all checked.
#[derive(Debug, Clone)]
pub struct ValidatedClaims {
    claims: TokenClaims,
    issuer: String,
    audience: String,
    key_id: String,
    algorithm: JwsAlgorithm,
    verified_at: i64,
}

impl ValidatedClaims {
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.sub.as_deref()
    }

    pub fn expires_at(&self) -> i64 {
        self.claims.exp
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.claims.iat
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn algorithm(&self) -> JwsAlgorithm {
        self.algorithm
    }

    /// Unix time the token was validated at
    pub fn verified_at(&self) -> i64 {
        self.verified_at
    }

    /// A provider-specific claim such as `repository` or `workflow`
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.extra.get(name)
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }
}

/// Verifies identity tokens against a resolved key
#[derive(Debug, Clone)]
pub struct TokenValidator {
    allowed: Vec<JwsAlgorithm>,
    leeway: Duration,
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self {
            allowed: vec![JwsAlgorithm::RS256],
            leeway: Duration::ZERO,
        }
    }
}

impl TokenValidator {
    /// Validator accepting exactly `allowed`
    pub fn new(allowed: Vec<JwsAlgorithm>) -> Self {
        Self {
            allowed,
            leeway: Duration::ZERO,
        }
    }

    /// Tolerate clock skew of up to `leeway` on `exp` and `nbf`
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn allowed_algorithms(&self) -> &[JwsAlgorithm] {
        &self.allowed
    }

    /// The token's algorithm, if it is on the allow-list
    pub fn check_algorithm(&self, token: &IdentityToken) -> Result<JwsAlgorithm, IdStampError> {
        let alg: JwsAlgorithm = token.header().alg.parse()?;
        if !self.allowed.contains(&alg) {
            return Err(IdStampError::UnsupportedAlgorithm(format!(
                "'{}' is not in the allowed algorithm list",
                alg
            )));
        }
        Ok(alg)
    }

    /// Validate against the local clock
    pub fn validate(
        &self,
        token: &IdentityToken,
        key: &ResolvedSigningKey,
        expected_audience: &str,
    ) -> Result<ValidatedClaims, IdStampError> {
        self.validate_with_time(token, key, expected_audience, &SystemTimeSource)
    }

    /// Validate with the validity window checked at `time`
    ///
    /// Checks run in order: algorithm, key binding, signature, audience,
    /// validity window, issuer. The first failure is returned.
    pub fn validate_with_time(
        &self,
        token: &IdentityToken,
        key: &ResolvedSigningKey,
        expected_audience: &str,
        time: &dyn TimeSource,
    ) -> Result<ValidatedClaims, IdStampError> {
        let algorithm = self.check_algorithm(token)?;

        match token.key_id() {
            Some(kid) if kid == key.key_id => {}
            Some(kid) => return Err(IdStampError::KeyNotFound(kid.to_string())),
            None => {
                return Err(IdStampError::MalformedToken(
                    "token header has no key id".to_string(),
                ));
            }
        }

        if let Some(key_alg) = &key.algorithm {
            if key_alg != algorithm.as_str() {
                return Err(IdStampError::UnsupportedAlgorithm(format!(
                    "token uses {} but key '{}' is restricted to {}",
                    algorithm, key.key_id, key_alg
                )));
            }
        }

        verify_signature(algorithm, token, &key.key)?;

        let claims = token.claims();
        let audience = match &claims.aud {
            Some(aud) if aud.matches_exactly(expected_audience) => expected_audience.to_string(),
            Some(aud) => {
                return Err(IdStampError::AudienceMismatch {
                    expected: expected_audience.to_string(),
                    actual: aud.to_string(),
                });
            }
            None => {
                return Err(IdStampError::AudienceMismatch {
                    expected: expected_audience.to_string(),
                    actual: String::new(),
                });
            }
        };

        let now = time.now_unix()?;
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);
        if now >= claims.exp.saturating_add(leeway) {
            return Err(IdStampError::TokenExpired {
                expired_at: claims.exp,
                verified_at: now,
            });
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now.saturating_add(leeway) {
                return Err(IdStampError::TokenNotYetValid {
                    not_before: nbf,
                    verified_at: now,
                });
            }
        }

        let issuer = match claims.iss.as_deref() {
            Some(iss) if !iss.is_empty() => iss,
            _ => return Err(IdStampError::MissingIssuer),
        };
        if issuer.trim_end_matches('/') != key.issuer.trim_end_matches('/') {
            return Err(IdStampError::IssuerMismatch {
                expected: key.issuer.clone(),
                actual: issuer.to_string(),
            });
        }

        Ok(ValidatedClaims {
            claims: claims.clone(),
            issuer: issuer.to_string(),
            audience,
            key_id: key.key_id.clone(),
            algorithm,
            verified_at: now,
        })
    }
}

fn verify_signature(
    algorithm: JwsAlgorithm,
    token: &IdentityToken,
    key: &PublicSigningKey,
) -> Result<(), IdStampError> {
    let message = token.signing_input().as_bytes();
    match (algorithm, key) {
        (JwsAlgorithm::RS256, PublicSigningKey::Rsa(public)) => {
            let verifier = RsaVerifyingKey::<Sha256>::new(public.clone());
            let signature = RsaSignature::try_from(token.signature())
                .map_err(|e| IdStampError::InvalidSignature(format!("{}", e)))?;
            verifier
                .verify(message, &signature)
                .map_err(|_| IdStampError::InvalidSignature("RS256 verification failed".to_string()))
        }
        (JwsAlgorithm::ES256, PublicSigningKey::EcP256(public)) => {
            // JWS carries the raw r||s form, not DER
            let signature = EcSignature::from_slice(token.signature())
                .map_err(|e| IdStampError::InvalidSignature(format!("{}", e)))?;
            public
                .verify(message, &signature)
                .map_err(|_| IdStampError::InvalidSignature("ES256 verification failed".to_string()))
        }
        (algorithm, key) => Err(IdStampError::UnsupportedAlgorithm(format!(
            "{} cannot be verified with an {} key",
            algorithm,
            key.key_type()
        ))),
    }
}
