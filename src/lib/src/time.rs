//! Time sources for token validation
//!
//! Token expiry is checked against a *verification time*. For a freshly
//! retrieved token that is the local clock; for an envelope verified later it
//! is the generation time attested by the timestamp authority. Abstracting the
//! clock keeps both paths, and tests, on the same validation code.

use crate::error::IdStampError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Time source abstraction for pluggable clocks
pub trait TimeSource: Send + Sync {
    /// Get the current time from this source.
    fn now(&self) -> Result<SystemTime, IdStampError>;

    /// Get current time as Unix timestamp (seconds since epoch).
    fn now_unix(&self) -> Result<i64, IdStampError> {
        Ok(unix_secs(self.now()?))
    }
}

/// System time source using `std::time::SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Result<SystemTime, IdStampError> {
        Ok(SystemTime::now())
    }
}

/// Fixed time source
///
/// Returns a predetermined timestamp, useful for:
/// - Verifying a token at the time a timestamp authority attested
/// - Unit testing with reproducible time
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    timestamp: SystemTime,
}

impl FixedTimeSource {
    /// Create from a Unix timestamp (seconds since 1970-01-01 00:00:00 UTC).
    pub fn from_unix_secs(secs: u64) -> Self {
        Self {
            timestamp: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    pub fn from_system_time(timestamp: SystemTime) -> Self {
        Self { timestamp }
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Result<SystemTime, IdStampError> {
        Ok(self.timestamp)
    }
}

/// Seconds since the Unix epoch; times before the epoch are negative
pub fn unix_secs(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Format a Unix timestamp as RFC 3339
pub fn format_rfc3339(unix: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("@{}", unix))
}
