use crate::canonical::canonicalize;
use crate::error::IdStampError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use idstamp_intoto::{
    Envelope, Signature, ENVELOPE_SIGNATURE_COUNT, IDENTITY_SIGNATURE_INDEX, PAYLOAD_TYPE_IN_TOTO,
    TIMESTAMP_SIGNATURE_INDEX,
};
use serde::{Deserialize, Serialize};

/// Identity proof carried in signature entry 0: `{"idToken":"<compact JWS>"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProof {
    #[serde(rename = "idToken")]
    pub id_token: String,
}

impl IdentityProof {
    pub fn new(id_token: impl Into<String>) -> Self {
        Self {
            id_token: id_token.into(),
        }
    }

    /// Canonical JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, IdStampError> {
        canonicalize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdStampError> {
        serde_json::from_slice(bytes)
            .map_err(|e| IdStampError::InvalidEnvelope(format!("identity proof: {}", e)))
    }
}

/// Both proofs over one payload, named rather than positional
///
/// Only [`to_signatures`](Self::to_signatures) and
/// [`from_signatures`](Self::from_signatures) know the array order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEvidence {
    pub identity_proof: IdentityProof,
    /// DER `TimeStampResp`
    pub timestamp_proof: Vec<u8>,
}

impl SignedEvidence {
    /// Flatten into the positional signature array
    pub fn to_signatures(&self) -> Result<Vec<Signature>, IdStampError> {
        let mut signatures = vec![
            Signature { sig: String::new() };
            ENVELOPE_SIGNATURE_COUNT
        ];
        signatures[IDENTITY_SIGNATURE_INDEX].sig = STANDARD.encode(self.identity_proof.to_bytes()?);
        signatures[TIMESTAMP_SIGNATURE_INDEX].sig = STANDARD.encode(&self.timestamp_proof);
        Ok(signatures)
    }

    /// Recover the named proofs from a positional signature array
    pub fn from_signatures(signatures: &[Signature]) -> Result<Self, IdStampError> {
        if signatures.len() != ENVELOPE_SIGNATURE_COUNT {
            return Err(IdStampError::InvalidEnvelope(format!(
                "expected {} signatures, found {}",
                ENVELOPE_SIGNATURE_COUNT,
                signatures.len()
            )));
        }

        let identity = decode_base64(&signatures[IDENTITY_SIGNATURE_INDEX].sig, "identity signature")?;
        let timestamp_proof =
            decode_base64(&signatures[TIMESTAMP_SIGNATURE_INDEX].sig, "timestamp signature")?;

        Ok(Self {
            identity_proof: IdentityProof::from_bytes(&identity)?,
            timestamp_proof,
        })
    }

    /// Assemble the envelope for `payload`
    pub fn into_envelope(
        self,
        payload: &[u8],
        predicate_type: impl Into<String>,
    ) -> Result<Envelope, IdStampError> {
        Ok(Envelope {
            payload_type: PAYLOAD_TYPE_IN_TOTO.to_string(),
            payload: STANDARD.encode(payload),
            signatures: self.to_signatures()?,
            predicate_type: predicate_type.into(),
        })
    }
}

pub(crate) fn decode_base64(value: &str, what: &str) -> Result<Vec<u8>, IdStampError> {
    STANDARD
        .decode(value)
        .map_err(|e| IdStampError::InvalidEnvelope(format!("{} is not valid base64: {}", what, e)))
}
