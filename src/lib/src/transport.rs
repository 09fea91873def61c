//! Blocking HTTP transport shared by every network-facing component
//!
//! Every request is a suspension point: the cancellation token is checked
//! before the request is issued, and the agent carries a global deadline so a
//! hung identity provider or timestamp authority cannot stall a batch forever.

use crate::error::IdStampError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default per-request deadline
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Cooperative cancellation signal
///
/// Clones share the same flag. Cancellation is observed before each network
/// call; a request already in flight runs until it completes or times out.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every operation sharing this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`IdStampError::Cancelled`] if cancellation was requested
    pub fn check(&self) -> Result<(), IdStampError> {
        if self.is_cancelled() {
            return Err(IdStampError::Cancelled);
        }
        Ok(())
    }
}

/// A fully-read HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Return the body if the status is 200, otherwise `UnexpectedStatus`
    pub fn into_ok_body(self, url: &str) -> Result<Vec<u8>, IdStampError> {
        if self.status != 200 {
            return Err(IdStampError::UnexpectedStatus {
                status: self.status,
                reason: status_reason(self.status),
                url: url.to_string(),
            });
        }
        Ok(self.body)
    }
}

/// Canonical reason phrase for a status code
pub fn status_reason(status: u16) -> String {
    ureq::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
        .to_string()
}

/// HTTP client used by the token client, key resolver and timestamp client
///
/// Cheap to clone; clones share the connection pool and cancellation token.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
    cancel: CancellationToken,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

impl HttpClient {
    /// Create a client whose requests fail after `timeout`
    pub fn new(timeout: Duration) -> Self {
        // Return a Response for every status code so callers can map
        // non-200 statuses to typed errors themselves
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token observed before every request
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// GET `url`, optionally with a bearer credential
    pub fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpResponse, IdStampError> {
        self.cancel.check()?;
        log::debug!("GET {}", url);

        let mut request = self.agent.get(url).header("Accept", "application/json");
        if let Some(token) = bearer {
            request = request.header("Authorization", &format!("Bearer {}", token));
        }

        let response = request
            .call()
            .map_err(|e| IdStampError::Transport(format!("GET {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .read_to_vec()
            .map_err(|e| IdStampError::Transport(format!("Failed to read response body: {}", e)))?;

        log::debug!("GET {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse { status, body })
    }

    /// POST `body` to `url` with the given content type
    pub fn post(
        &self,
        url: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpResponse, IdStampError> {
        self.cancel.check()?;
        log::debug!("POST {} ({} bytes, {})", url, body.len(), content_type);

        let response = self
            .agent
            .post(url)
            .header("Content-Type", content_type)
            .send(body)
            .map_err(|e| IdStampError::Transport(format!("POST {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .read_to_vec()
            .map_err(|e| IdStampError::Transport(format!("Failed to read response body: {}", e)))?;

        log::debug!("POST {} -> {} ({} bytes)", url, status, body.len());
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(IdStampError::Cancelled)));
    }

    #[test]
    fn test_cancelled_client_makes_no_request() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = HttpClient::default().with_cancellation(cancel);

        // The port is never contacted: cancellation is checked first
        let result = client.get("http://127.0.0.1:9/never", None);
        assert!(matches!(result, Err(IdStampError::Cancelled)));

        let result = client.post("http://127.0.0.1:9/never", "application/octet-stream", b"x");
        assert!(matches!(result, Err(IdStampError::Cancelled)));
    }

    #[test]
    fn test_into_ok_body() {
        let ok = HttpResponse {
            status: 200,
            body: b"hello".to_vec(),
        };
        assert_eq!(ok.into_ok_body("http://x").unwrap(), b"hello");

        let not_found = HttpResponse {
            status: 404,
            body: Vec::new(),
        };
        match not_found.into_ok_body("http://x") {
            Err(IdStampError::UnexpectedStatus { status, reason, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(reason, "Not Found");
            }
            other => panic!("expected UnexpectedStatus, got {:?}", other),
        }
    }

    #[test]
    fn test_status_reason_unknown() {
        assert_eq!(status_reason(599), "Unknown Status");
        assert_eq!(status_reason(503), "Service Unavailable");
    }
}
