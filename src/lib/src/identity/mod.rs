//! OIDC identity: token retrieval, key resolution and validation
//!
//! An identity token is requested with its audience set to the digest of the
//! payload being attested, which binds the token to that payload. Verifiers
//! resolve the issuer's key through OIDC discovery and check the token with
//! [`TokenValidator`].

mod client;
mod jwks;
mod provider;
mod token;
mod validator;

pub use client::{AudienceBindingRequest, IdTokenClient};
pub use jwks::{
    discovery_url_for_issuer, Jwk, KeyResolver, PublicSigningKey, ResolvedSigningKey,
    DISCOVERY_PATH,
};
pub use provider::{
    GitHubActionsProvider, IdentityProvider, ProviderRegistry, ENV_REQUEST_TOKEN, ENV_REQUEST_URL,
    GITHUB_ACTIONS_ISSUER,
};
pub use token::{Audience, IdentityToken, JwtHeader, TokenClaims};
pub use validator::{JwsAlgorithm, TokenValidator, ValidatedClaims};
