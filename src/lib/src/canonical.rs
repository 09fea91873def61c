//! Canonical statement bytes and their digest
//!
//! Both the identity proof and the timestamp proof are computed over the bytes
//! produced here, so equal logical content must always serialize identically:
//! keys sorted, no insignificant whitespace (RFC 8785 style).

use crate::error::IdStampError;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize any value to canonical JSON bytes
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>, IdStampError> {
    let value = serde_json::to_value(value)
        .map_err(|e| IdStampError::Canonicalization(format!("Failed to convert to JSON: {}", e)))?;

    let canonical = canonical_json::to_string(&value)
        .map_err(|e| IdStampError::Canonicalization(format!("{}", e)))?;

    Ok(canonical.into_bytes())
}

/// SHA-256 over `bytes`
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Lowercase hex SHA-256 over `bytes`
///
/// This is the audience value that binds an identity token to a payload.
pub fn payload_digest_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use idstamp_intoto::StatementBuilder;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_keys_sorted_and_compact() {
        let value = serde_json::json!({"b": 1, "a": {"d": [1, 2], "c": "x"}});
        let bytes = canonicalize(&value).unwrap();
        assert_eq!(bytes, br#"{"a":{"c":"x","d":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_statement_canonical_form() {
        let statement = StatementBuilder::new("https://example.com/predicate")
            .add_subject("a.txt", "sha256", "00ff")
            .predicate(serde_json::json!({"z": true, "a": null}))
            .build();

        let bytes = canonicalize(&statement).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with(r#"{"_type":"https://in-toto.io/Statement/v0.1","predicate":{"a":null,"z":true}"#));
        assert!(!text.contains(' '));
    }

    #[test]
    fn test_digest_hex() {
        // SHA-256 of the empty string
        assert_eq!(
            payload_digest_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    proptest! {
        #[test]
        fn prop_canonical_form_ignores_insertion_order(
            entries in proptest::collection::vec(("[a-z]{1,8}", any::<i64>()), 0..16)
        ) {
            // Later duplicates win in both collections, so the logical content is equal
            let inserted: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::json!(v)))
                .collect();
            let sorted: BTreeMap<String, i64> = entries.iter().cloned().collect();

            let left = canonicalize(&inserted).unwrap();
            let right = canonicalize(&sorted).unwrap();
            prop_assert_eq!(&left, &right);

            let reparsed: serde_json::Value = serde_json::from_slice(&left).unwrap();
            prop_assert_eq!(canonicalize(&reparsed).unwrap(), left);
        }
    }
}
