use super::token::IdentityToken;
use crate::error::IdStampError;
use crate::transport::HttpClient;
use serde::Deserialize;
use url::Url;

/// A request for an identity token whose audience is bound to a payload digest
///
/// The audience must be non-empty: an unbound token would be valid for any
/// payload.
#[derive(Clone)]
pub struct AudienceBindingRequest {
    endpoint: String,
    audience: String,
    bearer: String,
}

impl std::fmt::Debug for AudienceBindingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudienceBindingRequest")
            .field("endpoint", &self.endpoint)
            .field("audience", &self.audience)
            .field("bearer", &"[REDACTED]")
            .finish()
    }
}

impl AudienceBindingRequest {
    pub fn new(
        endpoint: impl Into<String>,
        audience: impl Into<String>,
        bearer: impl Into<String>,
    ) -> Result<Self, IdStampError> {
        let audience = audience.into();
        if audience.is_empty() {
            return Err(IdStampError::InvalidBinding(
                "audience must not be empty".to_string(),
            ));
        }
        let bearer = bearer.into();
        if bearer.is_empty() {
            return Err(IdStampError::InvalidBinding(
                "bearer credential must not be empty".to_string(),
            ));
        }
        Ok(Self {
            endpoint: endpoint.into(),
            audience,
            bearer,
        })
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The endpoint with its `audience` query parameter set to the bound value
    ///
    /// Other query parameters (e.g. `api-version`) are kept; an existing
    /// `audience` is replaced.
    pub fn token_url(&self) -> Result<String, IdStampError> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            IdStampError::InvalidBinding(format!("invalid token endpoint '{}': {}", self.endpoint, e))
        })?;

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "audience")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("audience", &self.audience);

        Ok(url.to_string())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    value: String,
}

/// Retrieves audience-bound identity tokens from a provider's token endpoint
#[derive(Clone, Default)]
pub struct IdTokenClient {
    http: HttpClient,
}

impl IdTokenClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// GET the token endpoint and decode the returned token
    ///
    /// The response must be JSON carrying the token in its `value` field. The
    /// token is not validated here, but its audience must echo the request.
    pub fn request_token(
        &self,
        request: &AudienceBindingRequest,
    ) -> Result<IdentityToken, IdStampError> {
        let url = request.token_url()?;
        log::debug!("Requesting identity token for audience {}", request.audience());

        let body = self
            .http
            .get(&url, Some(&request.bearer))?
            .into_ok_body(request.endpoint())?;

        let response: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            IdStampError::MalformedResponse(format!("token endpoint response: {}", e))
        })?;

        let token = IdentityToken::parse(&response.value)?;
        token.ensure_audience(request.audience())?;
        Ok(token)
    }
}
