//! Fuzz target for RFC 3161 response verification
//!
//! `verify_timestamp_for_payload()` decodes a DER TimeStampResp and walks the
//! CMS SignedData inside it. Concerns:
//! - Truncated or over-long DER lengths
//! - Unexpected tags in optional fields
//! - Malformed GeneralizedTime values
//! - Empty signer sets and missing attributes

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = idstamp::timestamp::verify_timestamp_for_payload(data, b"fuzz payload");
});
