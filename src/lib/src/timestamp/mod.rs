//! RFC 3161 timestamping
//!
//! The client submits a SHA-256 digest of the payload to a timestamp
//! authority. Verification is structural: the response must be a granted
//! `TimeStampResp` carrying a CMS `SignedData` over a `TSTInfo` whose message
//! imprint matches the payload. Trust in the authority's certificate chain is
//! out of scope.

pub mod asn1;

use crate::canonical::sha256;
use crate::error::IdStampError;
use crate::transport::HttpClient;
use asn1::{
    uint_to_u64, MessageImprint, TimeStampReq, TimeStampResp, TstInfo, ID_CT_TSTINFO,
    ID_MESSAGE_DIGEST, ID_SHA256, ID_SHA384, ID_SHA512, ID_SIGNED_DATA, PKI_STATUS_GRANTED,
    PKI_STATUS_GRANTED_WITH_MODS,
};
use cms::signed_data::{SignedData, SignerInfo};
use der::asn1::{Any, ObjectIdentifier, OctetString, Uint};
use der::{Decode, Encode, Tag, Tagged};
use sha2::{Digest, Sha384, Sha512};
use spki::AlgorithmIdentifierOwned;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Public timestamp authority used when none is configured
pub const DEFAULT_TSA_URL: &str = "https://freetsa.org/tsr";

pub const TIMESTAMP_QUERY_CONTENT_TYPE: &str = "application/timestamp-query";

/// Hash algorithm of the message imprint
///
/// Fixed by the protocol rather than chosen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
}

impl HashAlgorithm {
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            HashAlgorithm::Sha256 => ID_SHA256,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => sha256(bytes).to_vec(),
        }
    }
}

/// A serialized `TimeStampResp` together with the digest it must cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampProof {
    der: Vec<u8>,
    digest: Vec<u8>,
    hash_algorithm: HashAlgorithm,
    nonce: Option<u64>,
}

impl TimestampProof {
    /// A proof expected to cover `payload`
    ///
    /// Used by verifiers, who do not know the nonce of the original request.
    pub fn for_payload(der: Vec<u8>, payload: &[u8]) -> Self {
        let hash_algorithm = HashAlgorithm::Sha256;
        Self {
            der,
            digest: hash_algorithm.digest(payload),
            hash_algorithm,
            nonce: None,
        }
    }

    /// The DER `TimeStampResp`
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    pub fn into_der(self) -> Vec<u8> {
        self.der
    }

    /// Digest the proof must cover
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// Nonce of the request that produced this proof, when known
    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }
}

/// Facts established by [`verify_timestamp`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTimestamp {
    /// Unix time the authority attests the digest existed at
    pub generated_at: i64,
    pub digest: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    /// Serial number, hex encoded
    pub serial_number: String,
    pub policy: String,
    pub nonce: Option<u64>,
    pub signer_count: usize,
    pub certificate_count: usize,
}

impl VerifiedTimestamp {
    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

/// Issues timestamp proofs over payloads
pub trait TimestampAuthority: Send + Sync {
    /// Timestamp SHA-256(`payload`)
    fn create_timestamp(&self, payload: &[u8]) -> Result<TimestampProof, IdStampError>;

    /// Authority URL, for logging
    fn url(&self) -> &str;
}

/// RFC 3161 client over HTTP
#[derive(Clone)]
pub struct TimestampClient {
    http: HttpClient,
    url: String,
}

impl TimestampClient {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

impl TimestampAuthority for TimestampClient {
    fn create_timestamp(&self, payload: &[u8]) -> Result<TimestampProof, IdStampError> {
        let hash_algorithm = HashAlgorithm::Sha256;
        let digest = hash_algorithm.digest(payload);
        let nonce = random_nonce()?;
        let request = build_request(&digest, nonce)?;

        log::debug!(
            "Requesting timestamp for {} from {}",
            hex::encode(&digest),
            self.url
        );

        let body = self
            .http
            .post(&self.url, TIMESTAMP_QUERY_CONTENT_TYPE, &request)?
            .into_ok_body(&self.url)?;

        // Fail early on anything that is not a granted response
        let response = TimeStampResp::from_der(&body)
            .map_err(|e| IdStampError::ProofUnparseable(format!("TimeStampResp: {}", e)))?;
        granted_token(&response, IdStampError::ProofUnparseable)?;

        let proof = TimestampProof {
            der: body,
            digest,
            hash_algorithm,
            nonce: Some(nonce),
        };

        let verified = verify_timestamp(&proof)?;
        log::info!(
            "Timestamp granted: serial {} at {}",
            verified.serial_number,
            crate::time::format_rfc3339(verified.generated_at)
        );
        Ok(proof)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

fn random_nonce() -> Result<u64, IdStampError> {
    getrandom::u64().map_err(|e| {
        IdStampError::Io(std::io::Error::other(format!(
            "failed to generate timestamp nonce: {}",
            e
        )))
    })
}

/// DER `TimeStampReq` for `digest` (SHA-256) with certificate inclusion
/// requested
pub fn build_request(digest: &[u8], nonce: u64) -> Result<Vec<u8>, IdStampError> {
    let encode_err =
        |e: der::Error| IdStampError::InvalidProofStructure(format!("timestamp request: {}", e));

    let request = TimeStampReq {
        version: 1,
        message_imprint: MessageImprint {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: ID_SHA256,
                parameters: None,
            },
            hashed_message: OctetString::new(digest.to_vec()).map_err(encode_err)?,
        },
        req_policy: None,
        nonce: Some(Uint::new(&nonce.to_be_bytes()).map_err(encode_err)?),
        cert_req: true,
        extensions: None,
    };

    request.to_der().map_err(encode_err)
}

/// Rejected statuses fail with `TimestampRejected`; a granted response without
/// a token fails with `malformed`
fn granted_token(
    response: &TimeStampResp,
    malformed: fn(String) -> IdStampError,
) -> Result<&cms::content_info::ContentInfo, IdStampError> {
    let status = response.status.status;
    if status != PKI_STATUS_GRANTED && status != PKI_STATUS_GRANTED_WITH_MODS {
        let reason = response
            .status
            .status_string
            .as_ref()
            .map(|s| s.join("; "))
            .unwrap_or_else(|| "no status text".to_string());
        return Err(IdStampError::TimestampRejected { status, reason });
    }

    response
        .time_stamp_token
        .as_ref()
        .ok_or_else(|| malformed("granted response carries no token".to_string()))
}

fn structure_err(what: &str) -> impl Fn(der::Error) -> IdStampError + '_ {
    move |e| IdStampError::InvalidProofStructure(format!("{}: {}", what, e))
}

/// Decoded timestamp token, before any digest comparison
struct DecodedToken {
    signed_data: SignedData,
    tst: TstInfo,
}

/// Decode a granted response down to its TSTInfo, checking the CMS structure
/// and every signer's `messageDigest`
fn decode_token(der: &[u8]) -> Result<DecodedToken, IdStampError> {
    let response = TimeStampResp::from_der(der).map_err(structure_err("TimeStampResp"))?;
    let token = granted_token(&response, IdStampError::InvalidProofStructure)?;

    if token.content_type != ID_SIGNED_DATA {
        return Err(IdStampError::InvalidProofStructure(format!(
            "token content type {} is not signedData",
            token.content_type
        )));
    }

    let content = token.content.to_der().map_err(structure_err("token content"))?;
    let signed_data = SignedData::from_der(&content).map_err(structure_err("SignedData"))?;

    let encap = &signed_data.encap_content_info;
    if encap.econtent_type != ID_CT_TSTINFO {
        return Err(IdStampError::InvalidProofStructure(format!(
            "encapsulated content type {} is not id-ct-TSTInfo",
            encap.econtent_type
        )));
    }
    let econtent = encap.econtent.as_ref().ok_or_else(|| {
        IdStampError::InvalidProofStructure("SignedData has no encapsulated TSTInfo".to_string())
    })?;
    let econtent = econtent.to_der().map_err(structure_err("eContent"))?;
    let tst_der = OctetString::from_der(&econtent).map_err(structure_err("eContent"))?;
    let tst = TstInfo::from_der(tst_der.as_bytes()).map_err(structure_err("TSTInfo"))?;

    if signed_data.signer_infos.0.is_empty() {
        return Err(IdStampError::InvalidProofStructure(
            "SignedData has no signers".to_string(),
        ));
    }
    for signer in signed_data.signer_infos.0.iter() {
        check_message_digest(signer, tst_der.as_bytes())?;
    }

    Ok(DecodedToken { signed_data, tst })
}

fn summarize(
    decoded: &DecodedToken,
    hash_algorithm: HashAlgorithm,
) -> Result<VerifiedTimestamp, IdStampError> {
    let tst = &decoded.tst;
    Ok(VerifiedTimestamp {
        generated_at: parse_generalized_time(&tst.gen_time)?.unix_timestamp(),
        digest: tst.message_imprint.hashed_message.as_bytes().to_vec(),
        hash_algorithm,
        serial_number: hex::encode(tst.serial_number.as_bytes()),
        policy: tst.policy.to_string(),
        nonce: tst.nonce.as_ref().and_then(uint_to_u64),
        signer_count: decoded.signed_data.signer_infos.0.len(),
        certificate_count: decoded
            .signed_data
            .certificates
            .as_ref()
            .map(|c| c.0.len())
            .unwrap_or(0),
    })
}

fn check_imprint_algorithm(tst: &TstInfo, expected: HashAlgorithm) -> Result<(), IdStampError> {
    if tst.message_imprint.hash_algorithm.oid != expected.oid() {
        return Err(IdStampError::InvalidProofStructure(format!(
            "message imprint uses {}, expected {}",
            tst.message_imprint.hash_algorithm.oid,
            expected.name()
        )));
    }
    Ok(())
}

/// Verify the structure of `proof` and that it covers `proof.digest()`
///
/// Checks, in order: granted status, SignedData over id-ct-TSTInfo, at least
/// one signer, signed `messageDigest` attributes, SHA-256 message imprint,
/// digest, nonce (when the proof carries the request nonce).
pub fn verify_timestamp(proof: &TimestampProof) -> Result<VerifiedTimestamp, IdStampError> {
    let decoded = decode_token(proof.as_der())?;
    check_imprint_algorithm(&decoded.tst, proof.hash_algorithm())?;

    let embedded = decoded.tst.message_imprint.hashed_message.as_bytes();
    if embedded != proof.digest() {
        return Err(IdStampError::DigestMismatch {
            timestamped: hex::encode(embedded),
            signed: hex::encode(proof.digest()),
        });
    }

    let verified = summarize(&decoded, proof.hash_algorithm())?;
    if let Some(expected) = proof.nonce() {
        if verified.nonce != Some(expected) {
            return Err(IdStampError::NonceMismatch);
        }
    }
    Ok(verified)
}

/// Structurally check a stored proof without knowing the payload it covers
///
/// The returned digest is whatever the authority embedded; callers that hold
/// the payload should use [`verify_timestamp_for_payload`] instead.
pub fn inspect_timestamp(der: &[u8]) -> Result<VerifiedTimestamp, IdStampError> {
    let decoded = decode_token(der)?;
    check_imprint_algorithm(&decoded.tst, HashAlgorithm::Sha256)?;
    summarize(&decoded, HashAlgorithm::Sha256)
}

/// Verify `proof_der` as a timestamp over `payload`
pub fn verify_timestamp_for_payload(
    proof_der: &[u8],
    payload: &[u8],
) -> Result<VerifiedTimestamp, IdStampError> {
    verify_timestamp(&TimestampProof::for_payload(proof_der.to_vec(), payload))
}

fn check_message_digest(signer: &SignerInfo, tst_der: &[u8]) -> Result<(), IdStampError> {
    let Some(attrs) = &signer.signed_attrs else {
        return Ok(());
    };

    let attr = attrs
        .iter()
        .find(|a| a.oid == ID_MESSAGE_DIGEST)
        .ok_or_else(|| {
            IdStampError::InvalidProofStructure(
                "signed attributes lack messageDigest".to_string(),
            )
        })?;

    let value: &Any = attr.values.iter().next().ok_or_else(|| {
        IdStampError::InvalidProofStructure("messageDigest attribute is empty".to_string())
    })?;
    let value = value.to_der().map_err(structure_err("messageDigest"))?;
    let signed_digest = OctetString::from_der(&value).map_err(structure_err("messageDigest"))?;

    let oid = signer.digest_alg.oid;
    let actual = if oid == ID_SHA256 {
        sha256(tst_der).to_vec()
    } else if oid == ID_SHA384 {
        Sha384::digest(tst_der).to_vec()
    } else if oid == ID_SHA512 {
        Sha512::digest(tst_der).to_vec()
    } else {
        return Err(IdStampError::InvalidProofStructure(format!(
            "unsupported signer digest algorithm {}",
            oid
        )));
    };

    if signed_digest.as_bytes() != actual.as_slice() {
        return Err(IdStampError::InvalidProofStructure(
            "messageDigest does not match TSTInfo".to_string(),
        ));
    }
    Ok(())
}

/// Parse a GeneralizedTime, accepting fractional seconds
fn parse_generalized_time(value: &Any) -> Result<OffsetDateTime, IdStampError> {
    let invalid =
        |msg: String| IdStampError::InvalidProofStructure(format!("genTime: {}", msg));

    if value.tag() != Tag::GeneralizedTime {
        return Err(invalid(format!("unexpected tag {}", value.tag())));
    }

    let text = std::str::from_utf8(value.value()).map_err(|e| invalid(e.to_string()))?;
    let text = text
        .strip_suffix('Z')
        .ok_or_else(|| invalid(format!("'{}' is not UTC", text)))?;

    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };

    let format = format_description!("[year][month][day][hour][minute][second]");
    let mut time = PrimitiveDateTime::parse(whole, &format)
        .map_err(|e| invalid(e.to_string()))?
        .assume_utc();

    if let Some(fraction) = fraction {
        if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(format!("bad fractional seconds '{}'", fraction)));
        }
        let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
        let nanos: i64 = digits.parse().map_err(|_| invalid(fraction.to_string()))?;
        time += time::Duration::nanoseconds(nanos);
    }

    Ok(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asn1::PkiStatusInfo;

    fn gen_time(text: &str) -> Any {
        Any::new(Tag::GeneralizedTime, text.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn test_parse_generalized_time() {
        let t = parse_generalized_time(&gen_time("20240101000000Z")).unwrap();
        assert_eq!(t.unix_timestamp(), 1_704_067_200);

        let t = parse_generalized_time(&gen_time("20240101000000.25Z")).unwrap();
        assert_eq!(t.unix_timestamp(), 1_704_067_200);
        assert_eq!(t.millisecond(), 250);
    }

    #[test]
    fn test_parse_generalized_time_rejects_garbage() {
        assert!(parse_generalized_time(&gen_time("20240101000000")).is_err());
        assert!(parse_generalized_time(&gen_time("20240101000000.Z")).is_err());
        assert!(parse_generalized_time(&gen_time("2024010100Z")).is_err());

        let utc_time = Any::new(Tag::UtcTime, b"240101000000Z".to_vec()).unwrap();
        assert!(matches!(
            parse_generalized_time(&utc_time),
            Err(IdStampError::InvalidProofStructure(_))
        ));
    }

    #[test]
    fn test_build_request() {
        let digest = sha256(b"payload");
        let der = build_request(&digest, 7).unwrap();
        let request = TimeStampReq::from_der(&der).unwrap();

        assert_eq!(request.version, 1);
        assert!(request.cert_req);
        assert_eq!(request.message_imprint.hash_algorithm.oid, ID_SHA256);
        assert!(request.message_imprint.hash_algorithm.parameters.is_none());
        assert_eq!(request.message_imprint.hashed_message.as_bytes(), &digest);
        assert_eq!(uint_to_u64(request.nonce.as_ref().unwrap()), Some(7));
    }

    #[test]
    fn test_garbage_is_invalid_structure() {
        let proof = TimestampProof::for_payload(b"not der".to_vec(), b"payload");
        assert!(matches!(
            verify_timestamp(&proof),
            Err(IdStampError::InvalidProofStructure(_))
        ));
    }

    #[test]
    fn test_rejected_status() {
        let response = TimeStampResp {
            status: PkiStatusInfo {
                status: 2,
                status_string: Some(vec!["unsupported algorithm".to_string()]),
                fail_info: None,
            },
            time_stamp_token: None,
        };
        let proof = TimestampProof::for_payload(response.to_der().unwrap(), b"payload");

        match verify_timestamp(&proof) {
            Err(IdStampError::TimestampRejected { status, reason }) => {
                assert_eq!(status, 2);
                assert_eq!(reason, "unsupported algorithm");
            }
            other => panic!("expected TimestampRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_granted_without_token() {
        let response = TimeStampResp {
            status: PkiStatusInfo {
                status: 0,
                status_string: None,
                fail_info: None,
            },
            time_stamp_token: None,
        };
        let proof = TimestampProof::for_payload(response.to_der().unwrap(), b"payload");
        assert!(matches!(
            verify_timestamp(&proof),
            Err(IdStampError::InvalidProofStructure(_))
        ));
    }

    #[test]
    fn test_cancelled_client_makes_no_request() {
        let cancel = crate::transport::CancellationToken::new();
        cancel.cancel();
        let client = TimestampClient::new(
            HttpClient::default().with_cancellation(cancel),
            "http://127.0.0.1:9/tsr",
        );
        assert!(matches!(
            client.create_timestamp(b"payload"),
            Err(IdStampError::Cancelled)
        ));
    }

    #[test]
    fn test_proof_for_payload() {
        let proof = TimestampProof::for_payload(vec![1, 2, 3], b"");
        assert_eq!(
            hex::encode(proof.digest()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(proof.hash_algorithm(), HashAlgorithm::Sha256);
        assert_eq!(proof.nonce(), None);
        assert_eq!(proof.as_der(), &[1, 2, 3]);
    }
}
