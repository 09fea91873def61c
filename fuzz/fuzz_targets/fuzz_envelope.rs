//! Fuzz target for envelope decoding
//!
//! Exercises the JSON envelope, the positional signature array and the
//! identity proof object without any network access.

#![no_main]

use idstamp::intoto::{Envelope, Statement};
use idstamp::SignedEvidence;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Statement::from_json(data);

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(envelope) = Envelope::from_json(text) {
        if let Ok(evidence) = SignedEvidence::from_signatures(&envelope.signatures) {
            let _ = idstamp::identity::IdentityToken::parse(&evidence.identity_proof.id_token);
            let _ = evidence.into_envelope(b"payload", "https://example.com/predicate");
        }
    }
});
