//! Shared fixtures for integration tests
//!
//! `FixtureServer` is a minimal HTTP/1.1 server on a loopback port. Routes are
//! matched on the request path; every response closes the connection.
//! `TestIssuer` mints identity tokens and publishes the matching key set, and
//! `TsaOptions` drives a fake RFC 3161 authority.

#![allow(dead_code)]

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{Any, Int, ObjectIdentifier, OctetString, SetOfVec, Uint};
use der::{Decode, Encode, Tag};
use idstamp::identity::{GitHubActionsProvider, Jwk};
use idstamp::timestamp::asn1::{
    PkiStatusInfo, TimeStampReq, TimeStampResp, TstInfo, ID_CT_TSTINFO, ID_MESSAGE_DIGEST,
    ID_SHA256, ID_SIGNED_DATA,
};
use idstamp::{HttpClient, ProviderRegistry};
use p256::ecdsa::SigningKey as EcSigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::SubjectKeyIdentifier;

pub const TEST_BEARER: &str = "test-bearer-credential";

// ============================================================================
// HTTP fixture server
// ============================================================================

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(value).unwrap(),
        }
    }

    pub fn bytes(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            body,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: b"fixture error".to_vec(),
        }
    }
}

pub type Handler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

pub struct FixtureServer {
    addr: SocketAddr,
    routes: Arc<Mutex<HashMap<String, Handler>>>,
    hits: Arc<Mutex<Vec<String>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FixtureServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<Mutex<HashMap<String, Handler>>> = Arc::default();
        let hits: Arc<Mutex<Vec<String>>> = Arc::default();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let routes = Arc::clone(&routes);
            let hits = Arc::clone(&hits);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Ok(stream) = stream {
                        serve(stream, &routes, &hits);
                    }
                }
            })
        };

        Self {
            addr,
            routes,
            hits,
            shutdown,
            handle: Some(handle),
        }
    }

    /// `http://127.0.0.1:<port>`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn route<F>(&self, path: &str, handler: F)
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::new(handler));
    }

    /// Number of requests served for `path`
    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().iter().filter(|p| *p == path).count()
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock accept()
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(
    stream: TcpStream,
    routes: &Mutex<HashMap<String, Handler>>,
    hits: &Mutex<Vec<String>>,
) {
    let Some(request) = read_request(&stream) else {
        return;
    };
    hits.lock().unwrap().push(request.path.clone());

    let handler = routes.lock().unwrap().get(&request.path).cloned();
    let response = match handler {
        Some(handler) => handler(&request),
        None => Response::status(404),
    };

    let mut stream = stream;
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason(response.status),
        response.content_type,
        response.body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&response.body);
    let _ = stream.flush();
}

fn read_request(stream: &TcpStream) -> Option<Request> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target, String::new()),
    };

    Some(Request {
        method,
        path,
        query,
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Fixture",
    }
}

// ============================================================================
// Identity provider fixture
// ============================================================================

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[derive(Clone)]
pub enum IssuerKey {
    Rsa(rsa::RsaPrivateKey),
    Ec(EcSigningKey),
}

/// An OIDC issuer whose signing key lives in the test
#[derive(Clone)]
pub struct TestIssuer {
    pub issuer: String,
    pub kid: String,
    pub key: IssuerKey,
}

impl TestIssuer {
    /// RS256 issuer, the scheme GitHub Actions uses
    pub fn rsa(issuer: &str, kid: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            kid: kid.to_string(),
            key: IssuerKey::Rsa(rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap()),
        }
    }

    pub fn ec(issuer: &str, kid: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            kid: kid.to_string(),
            key: IssuerKey::Ec(EcSigningKey::random(&mut OsRng)),
        }
    }

    pub fn alg(&self) -> &'static str {
        match self.key {
            IssuerKey::Rsa(_) => "RS256",
            IssuerKey::Ec(_) => "ES256",
        }
    }

    pub fn jwk(&self) -> Jwk {
        match &self.key {
            IssuerKey::Rsa(private) => Jwk::from_rsa(&self.kid, &private.to_public_key()),
            IssuerKey::Ec(signing) => Jwk::from_p256(&self.kid, signing.verifying_key()),
        }
    }

    /// Standard claims for `audience`, valid for five minutes from now
    pub fn claims(&self, audience: &str) -> serde_json::Value {
        let now = now_unix();
        serde_json::json!({
            "iss": self.issuer,
            "sub": "repo:octo-org/app:ref:refs/heads/main",
            "aud": audience,
            "exp": now + 300,
            "iat": now,
            "nbf": now - 5,
            "repository": "octo-org/app",
            "workflow": "release"
        })
    }

    pub fn mint(&self, claims: &serde_json::Value) -> String {
        self.mint_with_header(
            &serde_json::json!({"alg": self.alg(), "kid": self.kid, "typ": "JWT"}),
            claims,
        )
    }

    pub fn mint_with_header(&self, header: &serde_json::Value, claims: &serde_json::Value) -> String {
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).unwrap()),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap())
        );

        let signature = match &self.key {
            IssuerKey::Rsa(private) => {
                use rsa::signature::{SignatureEncoding, Signer};
                let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new(private.clone());
                signer.sign(input.as_bytes()).to_vec()
            }
            IssuerKey::Ec(signing) => {
                use p256::ecdsa::signature::Signer;
                let signature: p256::ecdsa::Signature = signing.sign(input.as_bytes());
                signature.to_bytes().to_vec()
            }
        };

        format!("{}.{}", input, URL_SAFE_NO_PAD.encode(signature))
    }

    /// Unsigned token with `alg: none`
    pub fn mint_unsigned(&self, claims: &serde_json::Value) -> String {
        format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&serde_json::json!({"alg": "none", "kid": self.kid})).unwrap()),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap())
        )
    }
}

/// Serve discovery and key set documents with `server` as the issuer
///
/// Calling it again replaces the published keys.
pub fn install_discovery(server: &FixtureServer, keys: Vec<Jwk>) {
    let issuer = server.base_url();
    let jwks_uri = server.url("/jwks");
    server.route("/.well-known/openid-configuration", move |_| {
        Response::json(&serde_json::json!({
            "issuer": issuer,
            "jwks_uri": jwks_uri,
            "subject_types_supported": ["public", "pairwise"],
            "id_token_signing_alg_values_supported": ["RS256"]
        }))
    });

    let keys = Arc::new(Mutex::new(keys));
    server.route("/jwks", move |_| {
        Response::json(&serde_json::json!({ "keys": *keys.lock().unwrap() }))
    });
}

/// Serve a GitHub-style token endpoint that mints tokens for the requested
/// audience, requiring [`TEST_BEARER`]
pub fn install_token_endpoint(server: &FixtureServer, issuer: TestIssuer) {
    server.route("/token", move |request| {
        let expected = format!("Bearer {}", TEST_BEARER);
        if request.header("authorization") != Some(expected.as_str()) {
            return Response::status(401);
        }
        let Some(audience) = request.query_param("audience") else {
            return Response::status(400);
        };
        let token = issuer.mint(&issuer.claims(&audience));
        Response::json(&serde_json::json!({"count": 1, "value": token}))
    });
}

/// GitHub Actions provider pointed at the fixture server
pub fn github_provider(server: &FixtureServer) -> GitHubActionsProvider {
    GitHubActionsProvider::new(HttpClient::default())
        .with_issuer(server.base_url())
        .with_token_request(server.url("/token?api-version=2.0"), TEST_BEARER)
}

/// A complete identity provider on its own server
pub struct ProviderFixture {
    pub server: FixtureServer,
    pub issuer: TestIssuer,
}

impl ProviderFixture {
    pub fn rsa() -> Self {
        let server = FixtureServer::start();
        let issuer = TestIssuer::rsa(&server.base_url(), "rsa-key-1");
        install_discovery(&server, vec![issuer.jwk()]);
        install_token_endpoint(&server, issuer.clone());
        Self { server, issuer }
    }

    pub fn ec() -> Self {
        let server = FixtureServer::start();
        let issuer = TestIssuer::ec(&server.base_url(), "ec-key-1");
        install_discovery(&server, vec![issuer.jwk()]);
        install_token_endpoint(&server, issuer.clone());
        Self { server, issuer }
    }

    pub fn issuer_url(&self) -> String {
        self.server.base_url()
    }

    pub fn provider(&self) -> GitHubActionsProvider {
        github_provider(&self.server)
    }

    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::new().with_provider(self.provider())
    }
}

// ============================================================================
// Timestamp authority fixture
// ============================================================================

#[derive(Debug, Clone)]
pub struct TsaOptions {
    /// PKIStatus; anything above 1 produces a rejection without a token
    pub status: u8,
    /// GeneralizedTime text; `None` uses the current time
    pub gen_time: Option<String>,
    pub tamper_nonce: bool,
    pub tamper_digest: bool,
    pub tamper_message_digest: bool,
}

impl Default for TsaOptions {
    fn default() -> Self {
        Self {
            status: 0,
            gen_time: None,
            tamper_nonce: false,
            tamper_digest: false,
            tamper_message_digest: false,
        }
    }
}

pub fn generalized_time(unix: i64) -> String {
    let format = time::macros::format_description!("[year][month][day][hour][minute][second]Z");
    time::OffsetDateTime::from_unix_timestamp(unix)
        .unwrap()
        .format(&format)
        .unwrap()
}

/// DER `TimeStampResp` answering `request_der`
pub fn timestamp_response(request_der: &[u8], options: &TsaOptions) -> Vec<u8> {
    if options.status > 1 {
        return TimeStampResp {
            status: PkiStatusInfo {
                status: options.status,
                status_string: Some(vec!["request rejected by fixture".to_string()]),
                fail_info: None,
            },
            time_stamp_token: None,
        }
        .to_der()
        .unwrap();
    }

    let request = TimeStampReq::from_der(request_der).unwrap();

    let mut message_imprint = request.message_imprint.clone();
    if options.tamper_digest {
        message_imprint.hashed_message = OctetString::new(vec![0u8; 32]).unwrap();
    }
    let nonce = if options.tamper_nonce {
        Some(Uint::new(&[0x09, 0x09, 0x09]).unwrap())
    } else {
        request.nonce.clone()
    };
    let gen_time = options
        .gen_time
        .clone()
        .unwrap_or_else(|| generalized_time(now_unix()));

    let tst = TstInfo {
        version: 1,
        policy: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.6449.2.1.1"),
        message_imprint,
        serial_number: Int::new(&[0x04, 0xa1, 0x7f]).unwrap(),
        gen_time: Any::new(Tag::GeneralizedTime, gen_time.into_bytes()).unwrap(),
        accuracy: None,
        ordering: false,
        nonce,
        tsa: None,
        extensions: None,
    };
    let tst_der = tst.to_der().unwrap();

    let mut message_digest = Sha256::digest(&tst_der).to_vec();
    if options.tamper_message_digest {
        message_digest[0] ^= 0xff;
    }

    let sha256 = AlgorithmIdentifierOwned {
        oid: ID_SHA256,
        parameters: None,
    };
    let signed_attrs = SetOfVec::try_from(vec![Attribute {
        oid: ID_MESSAGE_DIGEST,
        values: SetOfVec::try_from(vec![
            Any::encode_from(&OctetString::new(message_digest).unwrap()).unwrap(),
        ])
        .unwrap(),
    }])
    .unwrap();

    let signer = SignerInfo {
        version: CmsVersion::V3,
        sid: SignerIdentifier::SubjectKeyIdentifier(SubjectKeyIdentifier(
            OctetString::new(vec![0x07; 20]).unwrap(),
        )),
        digest_alg: sha256.clone(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: AlgorithmIdentifierOwned {
            oid: ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2"),
            parameters: None,
        },
        signature: OctetString::new(vec![0u8; 64]).unwrap(),
        unsigned_attrs: None,
    };

    let signed_data = SignedData {
        version: CmsVersion::V3,
        digest_algorithms: SetOfVec::try_from(vec![sha256]).unwrap(),
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: ID_CT_TSTINFO,
            econtent: Some(Any::encode_from(&OctetString::new(tst_der).unwrap()).unwrap()),
        },
        certificates: None,
        crls: None,
        signer_infos: SignerInfos(SetOfVec::try_from(vec![signer]).unwrap()),
    };

    TimeStampResp {
        status: PkiStatusInfo {
            status: options.status,
            status_string: None,
            fail_info: None,
        },
        time_stamp_token: Some(ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data).unwrap(),
        }),
    }
    .to_der()
    .unwrap()
}

/// Serve a timestamp authority at `/tsr`
pub fn install_tsa(server: &FixtureServer, options: TsaOptions) {
    server.route("/tsr", move |request| {
        if request.method != "POST"
            || request.header("content-type") != Some("application/timestamp-query")
        {
            return Response::status(400);
        }
        Response::bytes(
            "application/timestamp-reply",
            timestamp_response(&request.body, &options),
        )
    });
}

/// A timestamp authority on its own server
pub struct TsaFixture {
    pub server: FixtureServer,
}

impl TsaFixture {
    pub fn start(options: TsaOptions) -> Self {
        let server = FixtureServer::start();
        install_tsa(&server, options);
        Self { server }
    }

    pub fn url(&self) -> String {
        self.server.url("/tsr")
    }

    pub fn client(&self) -> idstamp::TimestampClient {
        idstamp::TimestampClient::new(HttpClient::default(), self.url())
    }
}
