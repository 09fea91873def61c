//! Fuzz target for compact JWS parsing
//!
//! Identity tokens arrive from token endpoints and from envelopes under
//! verification, so `IdentityToken::parse()` sees attacker-controlled text:
//! - Segment counts other than three
//! - Invalid base64url and non-JSON segments
//! - Headers with unknown or missing algorithms
//! - Claims of unexpected JSON types

#![no_main]

use idstamp::identity::{IdentityToken, TokenValidator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(token) = IdentityToken::parse(text) {
        let _ = token.ensure_audience("fuzz");
        let _ = TokenValidator::default().check_algorithm(&token);
        let _ = token.signing_input();
        let _ = token.signature();
    }
});
