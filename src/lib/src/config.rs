//! Signer and verifier configuration

use crate::identity::{JwsAlgorithm, TokenValidator};
use crate::timestamp::{TimestampClient, DEFAULT_TSA_URL};
use crate::transport::{CancellationToken, HttpClient, DEFAULT_HTTP_TIMEOUT};
use std::time::Duration;

/// Overrides the timestamp authority URL
pub const ENV_TSA_URL: &str = "IDSTAMP_TSA_URL";
/// Overrides the per-request HTTP timeout, in seconds
pub const ENV_HTTP_TIMEOUT_SECS: &str = "IDSTAMP_HTTP_TIMEOUT_SECS";
/// Enables the key-set cache with the given TTL, in seconds
pub const ENV_KEY_CACHE_SECS: &str = "IDSTAMP_KEY_CACHE_SECS";

/// Configuration shared by [`AttestationSigner`](crate::AttestationSigner)
/// and [`EnvelopeVerifier`](crate::EnvelopeVerifier)
#[derive(Debug, Clone)]
pub struct AttestationConfig {
    /// RFC 3161 timestamp authority endpoint
    pub tsa_url: String,
    /// Deadline applied to every HTTP request
    pub http_timeout: Duration,
    /// JWS algorithms accepted on identity tokens
    pub allowed_algorithms: Vec<JwsAlgorithm>,
    /// Key-set cache lifetime. `None` re-fetches on every verification.
    pub key_cache_ttl: Option<Duration>,
    /// Clock skew tolerated on `exp` and `nbf`
    pub expiry_leeway: Duration,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            tsa_url: DEFAULT_TSA_URL.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            allowed_algorithms: vec![JwsAlgorithm::RS256],
            key_cache_ttl: None,
            expiry_leeway: Duration::ZERO,
        }
    }
}

impl AttestationConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `IDSTAMP_*` overrides. Unparseable values are ignored with a
    /// warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_TSA_URL) {
            if !url.is_empty() {
                log::info!("Using timestamp authority from {}: {}", ENV_TSA_URL, url);
                self.tsa_url = url;
            }
        }
        if let Some(secs) = env_secs(ENV_HTTP_TIMEOUT_SECS) {
            self.http_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs(ENV_KEY_CACHE_SECS) {
            self.key_cache_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        self
    }

    /// HTTP client honouring the configured timeout
    pub fn http_client(&self, cancel: CancellationToken) -> HttpClient {
        HttpClient::new(self.http_timeout).with_cancellation(cancel)
    }

    pub fn timestamp_client(&self, http: HttpClient) -> TimestampClient {
        TimestampClient::new(http, self.tsa_url.clone())
    }

    pub fn token_validator(&self) -> TokenValidator {
        TokenValidator::new(self.allowed_algorithms.clone()).with_leeway(self.expiry_leeway)
    }
}

fn env_secs(var: &str) -> Option<u64> {
    let value = std::env::var(var).ok()?;
    match value.trim().parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(_) => {
            log::warn!("Ignoring {}={:?}: not a whole number of seconds", var, value);
            None
        }
    }
}
