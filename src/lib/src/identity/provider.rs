use super::client::{AudienceBindingRequest, IdTokenClient};
use super::jwks::{discovery_url_for_issuer, KeyResolver, ResolvedSigningKey};
use super::token::IdentityToken;
use crate::error::IdStampError;
use crate::transport::HttpClient;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Issuer of GitHub Actions identity tokens
pub const GITHUB_ACTIONS_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Environment variable holding the GitHub Actions token request URL
pub const ENV_REQUEST_URL: &str = "ACTIONS_ID_TOKEN_REQUEST_URL";

/// Environment variable holding the GitHub Actions token request bearer
pub const ENV_REQUEST_TOKEN: &str = "ACTIONS_ID_TOKEN_REQUEST_TOKEN";

/// An identity provider able to issue audience-bound tokens and publish the
/// keys that verify them
pub trait IdentityProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Issuer URL, as it appears in the `iss` claim
    fn issuer(&self) -> &str;

    /// Obtain a token whose audience is `audience`
    fn identity_token(&self, audience: &str) -> Result<IdentityToken, IdStampError>;

    /// Resolve the verification key with `key_id`
    fn verification_key(&self, key_id: &str) -> Result<ResolvedSigningKey, IdStampError>;
}

#[derive(Clone)]
struct TokenRequestCredentials {
    url: String,
    bearer: String,
}

/// GitHub Actions OIDC provider
///
/// Verification only needs the issuer. Issuing tokens additionally needs the
/// request URL and bearer that the runner injects into the job environment;
/// without them [`IdentityProvider::identity_token`] fails with
/// [`IdStampError::MissingEnvironment`].
pub struct GitHubActionsProvider {
    issuer: String,
    credentials: Option<TokenRequestCredentials>,
    tokens: IdTokenClient,
    keys: KeyResolver,
}

impl GitHubActionsProvider {
    /// A provider that can verify but not issue tokens
    pub fn new(http: HttpClient) -> Self {
        Self {
            issuer: GITHUB_ACTIONS_ISSUER.to_string(),
            credentials: None,
            tokens: IdTokenClient::new(http.clone()),
            keys: KeyResolver::new(http),
        }
    }

    /// A provider configured from the runner environment
    ///
    /// Missing variables are not an error here; they surface when a token is
    /// requested.
    pub fn from_env(http: HttpClient) -> Self {
        let provider = Self::new(http);
        match (env::var(ENV_REQUEST_URL), env::var(ENV_REQUEST_TOKEN)) {
            (Ok(url), Ok(bearer)) => provider.with_token_request(url, bearer),
            _ => {
                log::debug!("GitHub Actions token request environment not present");
                provider
            }
        }
    }

    /// Credentials for the token endpoint
    pub fn with_token_request(mut self, url: impl Into<String>, bearer: impl Into<String>) -> Self {
        self.credentials = Some(TokenRequestCredentials {
            url: url.into(),
            bearer: bearer.into(),
        });
        self
    }

    /// Override the issuer, e.g. for GitHub Enterprise Server
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Cache fetched key sets for `ttl`
    pub fn with_key_cache(mut self, ttl: Duration) -> Self {
        self.keys = self.keys.with_cache_ttl(ttl);
        self
    }

    pub fn can_issue_tokens(&self) -> bool {
        self.credentials.is_some()
    }
}

impl IdentityProvider for GitHubActionsProvider {
    fn name(&self) -> &str {
        "GitHub Actions"
    }

    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn identity_token(&self, audience: &str) -> Result<IdentityToken, IdStampError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            IdStampError::MissingEnvironment(format!("{} / {}", ENV_REQUEST_URL, ENV_REQUEST_TOKEN))
        })?;
        let request = AudienceBindingRequest::new(&credentials.url, audience, &credentials.bearer)?;
        self.tokens.request_token(&request)
    }

    fn verification_key(&self, key_id: &str) -> Result<ResolvedSigningKey, IdStampError> {
        self.keys
            .resolve_key(&discovery_url_for_issuer(&self.issuer), key_id)
    }
}

/// Explicit issuer → provider mapping
///
/// Owned by the caller and passed to signers and verifiers; there is no
/// process-wide registry.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

fn issuer_key(issuer: &str) -> String {
    issuer.trim_end_matches('/').to_string()
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the GitHub Actions provider configured from the
    /// environment
    pub fn from_env(http: HttpClient) -> Self {
        Self::new().with_provider(GitHubActionsProvider::from_env(http))
    }

    /// Register `provider` under its issuer, returning any provider it replaced
    pub fn register(
        &mut self,
        provider: Arc<dyn IdentityProvider>,
    ) -> Option<Arc<dyn IdentityProvider>> {
        log::debug!("Registering {} provider for {}", provider.name(), provider.issuer());
        self.providers.insert(issuer_key(provider.issuer()), provider)
    }

    pub fn with_provider(mut self, provider: impl IdentityProvider + 'static) -> Self {
        self.register(Arc::new(provider));
        self
    }

    /// Provider for `issuer`, or [`IdStampError::UnknownProvider`]
    pub fn get(&self, issuer: &str) -> Result<Arc<dyn IdentityProvider>, IdStampError> {
        self.providers
            .get(&issuer_key(issuer))
            .cloned()
            .ok_or_else(|| IdStampError::UnknownProvider(issuer.to_string()))
    }

    pub fn issuers(&self) -> Vec<&str> {
        let mut issuers: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        issuers.sort_unstable();
        issuers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
