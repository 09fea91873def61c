use crate::error::IdStampError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

/// JOSE header of a compact JWS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtHeader {
    /// Signing algorithm as advertised by the token. Untrusted until checked
    /// against the validator's allow-list.
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// The `aud` claim, which may be a single string or an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// Exact match: a single value equal to `expected`, or an array whose only
    /// member is `expected`. An array with additional audiences does not match.
    pub fn matches_exactly(&self, expected: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == expected,
            Audience::Multiple(auds) => auds.len() == 1 && auds[0] == expected,
        }
    }

    /// The single audience value, if there is exactly one
    pub fn single(&self) -> Option<&str> {
        match self {
            Audience::Single(aud) => Some(aud),
            Audience::Multiple(auds) if auds.len() == 1 => Some(&auds[0]),
            Audience::Multiple(_) => None,
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::Single(aud) => write!(f, "{}", aud),
            Audience::Multiple(auds) => write!(f, "[{}]", auds.join(", ")),
        }
    }
}

/// Registered claims of an identity token, plus any provider-specific claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Provider-specific claims (`repository`, `workflow`, `ref`, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An identity token as retrieved from a provider
///
/// Parsing only decodes the header and claims; nothing here is trusted until
/// [`TokenValidator`](super::TokenValidator) turns it into
/// [`ValidatedClaims`](super::ValidatedClaims).
#[derive(Debug, Clone)]
pub struct IdentityToken {
    raw: String,
    header: JwtHeader,
    claims: TokenClaims,
    signature: Vec<u8>,
}

impl IdentityToken {
    /// Decode a compact JWS (`header.claims.signature`)
    ///
    /// An empty signature segment is accepted here so that unsigned tokens
    /// reach the validator and are rejected for their algorithm.
    pub fn parse(raw: &str) -> Result<Self, IdStampError> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 3 {
            return Err(IdStampError::MalformedToken(format!(
                "expected 3 dot-separated segments, found {}",
                parts.len()
            )));
        }

        let header_bytes = decode_segment(parts[0], "header")?;
        let header: JwtHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| IdStampError::MalformedToken(format!("invalid header: {}", e)))?;

        let claims_bytes = decode_segment(parts[1], "claims")?;
        let claims: TokenClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|e| IdStampError::MalformedToken(format!("invalid claims: {}", e)))?;

        let signature = decode_segment(parts[2], "signature")?;

        Ok(Self {
            raw: raw.to_string(),
            header,
            claims,
            signature,
        })
    }

    /// The compact serialization as received
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &JwtHeader {
        &self.header
    }

    /// Unverified claims
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claims.iss.as_deref()
    }

    pub fn audience(&self) -> Option<&Audience> {
        self.claims.aud.as_ref()
    }

    /// The bytes covered by the signature: `header.claims`
    pub fn signing_input(&self) -> &str {
        match self.raw.rfind('.') {
            Some(pos) => &self.raw[..pos],
            None => &self.raw,
        }
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Check the audience requested by the caller against the returned token
    ///
    /// This is the key-binding check performed right after retrieval. It does
    /// not verify the signature.
    pub fn ensure_audience(&self, expected: &str) -> Result<(), IdStampError> {
        match &self.claims.aud {
            Some(aud) if aud.matches_exactly(expected) => Ok(()),
            Some(aud) => Err(IdStampError::AudienceMismatch {
                expected: expected.to_string(),
                actual: aud.to_string(),
            }),
            None => Err(IdStampError::AudienceMismatch {
                expected: expected.to_string(),
                actual: String::new(),
            }),
        }
    }
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>, IdStampError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| IdStampError::MalformedToken(format!("invalid base64url in {}: {}", what, e)))
}
