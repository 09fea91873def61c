use crate::error::IdStampError;
use crate::transport::HttpClient;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::ecdsa::VerifyingKey as P256VerifyingKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Path of the OIDC discovery document relative to the issuer
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Discovery URL for an issuer
pub fn discovery_url_for_issuer(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), DISCOVERY_PATH)
}

/// A single JSON Web Key (RFC 7517)
///
/// Only the members needed for RSA and EC P-256 verification keys are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// JWK for an RSA public key
    pub fn from_rsa(kid: impl Into<String>, key: &RsaPublicKey) -> Self {
        Self {
            kty: "RSA".to_string(),
            kid: Some(kid.into()),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(URL_SAFE_NO_PAD.encode(key.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(key.e().to_bytes_be())),
            crv: None,
            x: None,
            y: None,
        }
    }

    /// JWK for an EC P-256 public key
    pub fn from_p256(kid: impl Into<String>, key: &P256VerifyingKey) -> Self {
        let point = key.as_affine().to_encoded_point(false);
        Self {
            kty: "EC".to_string(),
            kid: Some(kid.into()),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: point.x().map(|x| URL_SAFE_NO_PAD.encode(x)),
            y: point.y().map(|y| URL_SAFE_NO_PAD.encode(y)),
        }
    }

    /// Decode the key material
    pub fn to_public_key(&self) -> Result<PublicSigningKey, IdStampError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = decode_member(self.n.as_deref(), "n")?;
                let e = decode_member(self.e.as_deref(), "e")?;
                let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
                    .map_err(|e| IdStampError::KeyDecodeError(format!("invalid RSA key: {}", e)))?;
                Ok(PublicSigningKey::Rsa(key))
            }
            "EC" => {
                match self.crv.as_deref() {
                    Some("P-256") => {}
                    other => {
                        return Err(IdStampError::KeyDecodeError(format!(
                            "unsupported EC curve: {}",
                            other.unwrap_or("<missing>")
                        )));
                    }
                }
                let x = decode_member(self.x.as_deref(), "x")?;
                let y = decode_member(self.y.as_deref(), "y")?;
                if x.len() != 32 || y.len() != 32 {
                    return Err(IdStampError::KeyDecodeError(format!(
                        "P-256 coordinates must be 32 bytes, got x={} y={}",
                        x.len(),
                        y.len()
                    )));
                }

                let mut sec1 = Vec::with_capacity(65);
                sec1.push(0x04);
                sec1.extend_from_slice(&x);
                sec1.extend_from_slice(&y);
                let key = P256VerifyingKey::from_sec1_bytes(&sec1)
                    .map_err(|e| IdStampError::KeyDecodeError(format!("invalid P-256 point: {}", e)))?;
                Ok(PublicSigningKey::EcP256(key))
            }
            other => Err(IdStampError::KeyDecodeError(format!(
                "unsupported key type: {}",
                other
            ))),
        }
    }
}

fn decode_member(value: Option<&str>, name: &str) -> Result<Vec<u8>, IdStampError> {
    let value = value
        .ok_or_else(|| IdStampError::KeyDecodeError(format!("missing '{}' member", name)))?;
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| IdStampError::KeyDecodeError(format!("invalid base64url in '{}': {}", name, e)))
}

/// Decoded verification key material
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicSigningKey {
    Rsa(RsaPublicKey),
    EcP256(P256VerifyingKey),
}

impl PublicSigningKey {
    pub fn key_type(&self) -> &'static str {
        match self {
            PublicSigningKey::Rsa(_) => "RSA",
            PublicSigningKey::EcP256(_) => "EC P-256",
        }
    }
}

/// A verification key, scoped to the issuer that published it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSigningKey {
    pub key_id: String,
    pub issuer: String,
    /// Algorithm the key is restricted to, when its JWK declares one
    pub algorithm: Option<String>,
    pub key: PublicSigningKey,
}

/// Key set as fetched from `jwks_uri`, kept as raw entries so one odd key
/// does not poison lookups of the others
#[derive(Debug)]
struct KeySetDocument {
    issuer: String,
    keys: Vec<serde_json::Value>,
}

impl KeySetDocument {
    fn find(&self, key_id: &str) -> Result<Option<ResolvedSigningKey>, IdStampError> {
        let entry = self
            .keys
            .iter()
            .find(|k| k.get("kid").and_then(|v| v.as_str()) == Some(key_id));

        let Some(entry) = entry else {
            return Ok(None);
        };

        let jwk: Jwk = serde_json::from_value(entry.clone())
            .map_err(|e| IdStampError::KeyDecodeError(format!("key '{}': {}", key_id, e)))?;

        Ok(Some(ResolvedSigningKey {
            key_id: key_id.to_string(),
            issuer: self.issuer.clone(),
            algorithm: jwk.alg.clone(),
            key: jwk.to_public_key()?,
        }))
    }
}

struct CachedKeySet {
    fetched_at: Instant,
    document: Arc<KeySetDocument>,
}

/// Resolves verification keys via OIDC discovery
///
/// Without a cache every resolution fetches the discovery document and the key
/// set. With a TTL cache a lookup miss evicts the cached set and refetches once
/// so that key rotation is picked up immediately.
pub struct KeyResolver {
    http: HttpClient,
    cache_ttl: Option<Duration>,
    cache: RwLock<HashMap<String, CachedKeySet>>,
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::new(HttpClient::default())
    }
}

impl KeyResolver {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            cache_ttl: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cache fetched key sets for `ttl`
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Find the key with `key_id` in the key set advertised by `discovery_url`
    pub fn resolve_key(
        &self,
        discovery_url: &str,
        key_id: &str,
    ) -> Result<ResolvedSigningKey, IdStampError> {
        if let Some(document) = self.cached(discovery_url) {
            if let Some(key) = document.find(key_id)? {
                log::debug!("Key {} resolved from cache", key_id);
                return Ok(key);
            }
            log::debug!("Key {} not in cached key set, refetching", key_id);
            self.evict(discovery_url);
        }

        let document = Arc::new(self.fetch_key_set(discovery_url)?);
        let resolved = document.find(key_id)?;

        if self.cache_ttl.is_some() {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(
                discovery_url.to_string(),
                CachedKeySet {
                    fetched_at: Instant::now(),
                    document,
                },
            );
        }

        resolved.ok_or_else(|| IdStampError::KeyNotFound(key_id.to_string()))
    }

    /// Drop every cached key set
    pub fn clear_cache(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn cached(&self, discovery_url: &str) -> Option<Arc<KeySetDocument>> {
        let ttl = self.cache_ttl?;
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache
            .get(discovery_url)
            .filter(|entry| entry.fetched_at.elapsed() < ttl)
            .map(|entry| Arc::clone(&entry.document))
    }

    fn evict(&self, discovery_url: &str) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(discovery_url);
    }

    fn fetch_key_set(&self, discovery_url: &str) -> Result<KeySetDocument, IdStampError> {
        let body = self
            .http
            .get(discovery_url, None)
            .and_then(|r| r.into_ok_body(discovery_url))
            .map_err(|e| match e {
                IdStampError::Cancelled => e,
                other => IdStampError::DiscoveryUnavailable(other.to_string()),
            })?;

        let discovery: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| IdStampError::DiscoveryMalformed(format!("not JSON: {}", e)))?;

        let jwks_uri = discovery
            .get("jwks_uri")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                IdStampError::DiscoveryMalformed("missing or non-string 'jwks_uri'".to_string())
            })?;

        let issuer = discovery
            .get("issuer")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| {
                discovery_url
                    .strip_suffix(DISCOVERY_PATH)
                    .unwrap_or(discovery_url)
                    .to_string()
            });

        log::debug!("Fetching key set for {} from {}", issuer, jwks_uri);

        let body = self
            .http
            .get(jwks_uri, None)
            .and_then(|r| r.into_ok_body(jwks_uri))
            .map_err(|e| match e {
                IdStampError::Cancelled => e,
                other => IdStampError::KeySetUnavailable(other.to_string()),
            })?;

        #[derive(Deserialize)]
        struct RawKeySet {
            keys: Vec<serde_json::Value>,
        }

        let set: RawKeySet = serde_json::from_slice(&body)
            .map_err(|e| IdStampError::MalformedResponse(format!("key set: {}", e)))?;

        Ok(KeySetDocument {
            issuer,
            keys: set.keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::elliptic_curve::rand_core::OsRng;

    #[test]
    fn test_discovery_url_for_issuer() {
        assert_eq!(
            discovery_url_for_issuer("https://token.actions.githubusercontent.com"),
            "https://token.actions.githubusercontent.com/.well-known/openid-configuration"
        );
        assert_eq!(
            discovery_url_for_issuer("https://issuer.example/"),
            "https://issuer.example/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_p256_jwk_roundtrip() {
        let signing = p256::ecdsa::SigningKey::random(&mut OsRng);
        let verifying = *signing.verifying_key();
        let jwk = Jwk::from_p256("ec-1", &verifying);

        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
        match jwk.to_public_key().unwrap() {
            PublicSigningKey::EcP256(key) => assert_eq!(key, verifying),
            other => panic!("expected P-256 key, got {}", other.key_type()),
        }
    }

    #[test]
    fn test_rsa_jwk_roundtrip() {
        let private = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = private.to_public_key();
        let jwk = Jwk::from_rsa("rsa-1", &public);

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.to_public_key().unwrap(), PublicSigningKey::Rsa(public));
    }

    #[test]
    fn test_ec_coordinates_must_be_32_bytes() {
        let jwk = Jwk {
            kty: "EC".to_string(),
            kid: Some("short".to_string()),
            alg: None,
            key_use: None,
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: Some(URL_SAFE_NO_PAD.encode([1u8; 31])),
            y: Some(URL_SAFE_NO_PAD.encode([1u8; 32])),
        };
        assert!(matches!(
            jwk.to_public_key(),
            Err(IdStampError::KeyDecodeError(_))
        ));
    }

    #[test]
    fn test_unsupported_key_types() {
        let okp: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "OKP", "crv": "Ed25519", "x": "AAAA"
        }))
        .unwrap();
        assert!(matches!(
            okp.to_public_key(),
            Err(IdStampError::KeyDecodeError(_))
        ));

        let p384: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "EC", "crv": "P-384", "x": "AAAA", "y": "AAAA"
        }))
        .unwrap();
        assert!(matches!(
            p384.to_public_key(),
            Err(IdStampError::KeyDecodeError(_))
        ));
    }

    #[test]
    fn test_rsa_missing_modulus() {
        let jwk: Jwk = serde_json::from_value(serde_json::json!({"kty": "RSA", "e": "AQAB"})).unwrap();
        assert!(matches!(
            jwk.to_public_key(),
            Err(IdStampError::KeyDecodeError(_))
        ));
    }

    #[test]
    fn test_key_set_lookup_by_kid() {
        let signing = p256::ecdsa::SigningKey::random(&mut OsRng);
        let jwk = Jwk::from_p256("wanted", signing.verifying_key());
        let document = KeySetDocument {
            issuer: "https://issuer.example".to_string(),
            keys: vec![
                serde_json::json!({"kty": "weird", "kid": "other"}),
                serde_json::to_value(&jwk).unwrap(),
            ],
        };

        let resolved = document.find("wanted").unwrap().unwrap();
        assert_eq!(resolved.key_id, "wanted");
        assert_eq!(resolved.issuer, "https://issuer.example");
        assert_eq!(resolved.algorithm.as_deref(), Some("ES256"));

        assert!(document.find("missing").unwrap().is_none());
        assert!(document.find("other").is_err());
    }

    #[test]
    fn test_cancelled_resolution_stays_cancelled() {
        let cancel = crate::transport::CancellationToken::new();
        cancel.cancel();
        let resolver = KeyResolver::new(HttpClient::default().with_cancellation(cancel));

        let result = resolver.resolve_key("http://127.0.0.1:9/.well-known/openid-configuration", "k");
        assert!(matches!(result, Err(IdStampError::Cancelled)));
    }
}
