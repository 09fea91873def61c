use idstamp::audit::{self, AuditConfig, LogDestination};
use idstamp::identity::{GitHubActionsProvider, IdentityToken, JwsAlgorithm, GITHUB_ACTIONS_ISSUER};
use idstamp::intoto::{Envelope, Statement};
use idstamp::timestamp::{inspect_timestamp, verify_timestamp_for_payload, VerifiedTimestamp};
use idstamp::{
    payload_digest_hex, AttestationConfig, AttestationSigner, CancellationToken, EnvelopeVerifier,
    IdStampError, ProviderRegistry, SignedEvidence, TimestampAuthority,
};

use idstamp::reexports::log;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{crate_description, crate_name, crate_version, Arg, ArgAction, ArgMatches, Command};
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::sync::Arc;

/// Helper function to create a file with parent directories
fn create_file_with_dirs(path: impl AsRef<Path>) -> Result<File, IdStampError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>, IdStampError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| {
        IdStampError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read '{}': {}", path.display(), e),
        ))
    })
}

/// Envelopes are stored one JSON object per line
fn read_envelopes(path: &str) -> Result<Vec<Envelope>, IdStampError> {
    let content = read_file(path)?;
    let content = String::from_utf8(content)
        .map_err(|_| IdStampError::InvalidEnvelope(format!("'{}' is not UTF-8", path)))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            Envelope::from_json(line)
                .map_err(|e| IdStampError::InvalidEnvelope(format!("{}: {}", path, e)))
        })
        .collect()
}

fn input_arg() -> Arg {
    Arg::new("in")
        .value_name("input_file")
        .long("input-file")
        .short('i')
        .required(true)
        .help("Input file")
}

fn output_arg() -> Arg {
    Arg::new("out")
        .value_name("output_file")
        .long("output-file")
        .short('o')
        .required(true)
        .help("Output file")
}

fn tsa_arg() -> Arg {
    Arg::new("tsa_url")
        .long("tsa-url")
        .value_name("url")
        .help("RFC 3161 timestamp authority (default: $IDSTAMP_TSA_URL or freetsa.org)")
}

fn config_from(matches: &ArgMatches) -> AttestationConfig {
    let mut config = AttestationConfig::from_env();
    if let Some(url) = matches.get_one::<String>("tsa_url") {
        config.tsa_url = url.clone();
    }
    config
}

/// One GitHub-style provider per issuer, with the runner's token request
/// credentials when they are present
fn registry_for(issuers: &[String], config: &AttestationConfig) -> ProviderRegistry {
    let http = config.http_client(CancellationToken::new());
    let mut registry = ProviderRegistry::new();
    for issuer in issuers {
        let mut provider = GitHubActionsProvider::from_env(http.clone()).with_issuer(issuer);
        if let Some(ttl) = config.key_cache_ttl {
            provider = provider.with_key_cache(ttl);
        }
        registry.register(Arc::new(provider));
    }
    registry
}

fn issuers_from(matches: &ArgMatches) -> Vec<String> {
    matches
        .get_many::<String>("issuer")
        .map(|values| values.cloned().collect())
        .unwrap_or_else(|| vec![GITHUB_ACTIONS_ISSUER.to_string()])
}

fn start() -> Result<(), IdStampError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .arg(
            Arg::new("audit")
                .long("audit")
                .action(ArgAction::SetTrue)
                .help("Enable structured audit logging (JSON to stderr)"),
        )
        .arg(
            Arg::new("audit-file")
                .long("audit-file")
                .value_name("FILE")
                .help("Write audit logs to FILE instead of stderr"),
        )
        .subcommand(
            Command::new("sign")
                .about("Sign in-toto statements with an OIDC identity and a timestamp")
                .arg(input_arg().action(ArgAction::Append).help(
                    "Statement JSON file (repeat to sign several in one all-or-nothing batch)",
                ))
                .arg(output_arg().help("Envelope output file, one envelope per line"))
                .arg(
                    Arg::new("issuer")
                        .long("issuer")
                        .value_name("url")
                        .help("OIDC issuer to obtain the identity token from")
                        .default_value(GITHUB_ACTIONS_ISSUER),
                )
                .arg(tsa_arg()),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify attestation envelopes")
                .arg(input_arg().help("Envelope file, one envelope per line"))
                .arg(
                    Arg::new("issuer")
                        .long("issuer")
                        .value_name("url")
                        .action(ArgAction::Append)
                        .help("Trusted OIDC issuer (repeatable, default: GitHub Actions)"),
                )
                .arg(
                    Arg::new("predicate_type")
                        .long("predicate-type")
                        .value_name("uri")
                        .help("Require this predicate type"),
                )
                .arg(
                    Arg::new("algorithm")
                        .long("algorithm")
                        .value_name("alg")
                        .action(ArgAction::Append)
                        .help("Accepted token signing algorithm (repeatable, default: RS256)"),
                ),
        )
        .subcommand(
            Command::new("timestamp")
                .about("Obtain an RFC 3161 timestamp response for a file")
                .arg(input_arg())
                .arg(output_arg().help("DER TimeStampResp output file"))
                .arg(tsa_arg()),
        )
        .subcommand(
            Command::new("inspect")
                .about("Print the contents of envelopes or a timestamp response without verifying the identity")
                .arg(input_arg().help("Envelope file (one envelope per line) or DER timestamp response")),
        )
        .get_matches();

    let debug = matches.get_flag("debug");
    let audit_enabled = matches.get_flag("audit");
    let audit_file = matches.get_one::<String>("audit-file").map(|s| s.as_str());

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if audit_enabled || audit_file.is_some() {
        let destination = match audit_file {
            Some(path) => LogDestination::File(path.to_string()),
            None => LogDestination::Stderr,
        };
        audit::init(AuditConfig {
            enabled: true,
            destination,
            json_format: true,
            filter: format!("{}=info", audit::AUDIT_TARGET),
        })?;
    }

    if let Some(matches) = matches.subcommand_matches("sign") {
        let input_files: Vec<&String> = matches
            .get_many::<String>("in")
            .ok_or(IdStampError::UsageError("Missing input file"))?
            .collect();
        let output_file = matches
            .get_one::<String>("out")
            .ok_or(IdStampError::UsageError("Missing output file"))?;
        let issuer = matches
            .get_one::<String>("issuer")
            .ok_or(IdStampError::UsageError("Missing issuer"))?;

        let statements = input_files
            .iter()
            .map(|path| {
                Statement::from_json(&read_file(path)?).map_err(|e| {
                    IdStampError::InvalidEnvelope(format!("{} is not a statement: {}", path, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = config_from(matches);
        let registry = registry_for(std::slice::from_ref(issuer), &config);
        let signer = AttestationSigner::from_config(registry, &config, CancellationToken::new());
        let envelopes = signer.sign_statements(&statements, issuer)?;

        let mut out = create_file_with_dirs(output_file)?;
        for envelope in &envelopes {
            let json = envelope
                .to_json()
                .map_err(|e| IdStampError::InvalidEnvelope(e.to_string()))?;
            writeln!(out, "{}", json)?;
        }
        println!(
            "✓ {} statement(s) signed, envelopes written to [{}]",
            envelopes.len(),
            output_file
        );
    } else if let Some(matches) = matches.subcommand_matches("verify") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(IdStampError::UsageError("Missing input file"))?;
        let predicate_type = matches.get_one::<String>("predicate_type");

        let mut config = AttestationConfig::from_env();
        if let Some(algorithms) = matches.get_many::<String>("algorithm") {
            config.allowed_algorithms = algorithms
                .map(|alg| alg.parse::<JwsAlgorithm>())
                .collect::<Result<Vec<_>, _>>()?;
        }
        let registry = registry_for(&issuers_from(matches), &config);
        let verifier = EnvelopeVerifier::from_config(registry, &config);

        let envelopes = read_envelopes(input_file)?;
        if envelopes.is_empty() {
            return Err(IdStampError::UsageError("No envelopes in input file"));
        }
        for mut envelope in envelopes {
            if let Some(predicate_type) = predicate_type {
                envelope.predicate_type = predicate_type.clone();
            }
            let verified = verifier.verify(&envelope)?;
            println!("✓ Attestation is valid");
            println!("  Predicate: {}", verified.statement.predicate_type);
            for subject in &verified.statement.subject {
                println!("  Subject: {}", subject.name);
            }
            println!("  Issuer: {}", verified.claims.issuer());
            if let Some(subject) = verified.claims.subject() {
                println!("  Identity: {}", subject);
            }
            println!(
                "  Timestamped: {}",
                idstamp::time::format_rfc3339(verified.timestamp.generated_at)
            );
        }
    } else if let Some(matches) = matches.subcommand_matches("timestamp") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(IdStampError::UsageError("Missing input file"))?;
        let output_file = matches
            .get_one::<String>("out")
            .ok_or(IdStampError::UsageError("Missing output file"))?;

        let config = config_from(matches);
        let client = config.timestamp_client(config.http_client(CancellationToken::new()));
        let payload = read_file(input_file)?;
        let proof = client.create_timestamp(&payload)?;
        create_file_with_dirs(output_file)?.write_all(proof.as_der())?;

        let verified = verify_timestamp_for_payload(proof.as_der(), &payload)?;
        println!("✓ Timestamp saved to [{}]", output_file);
        println!("  Authority: {}", client.url());
        println!("  Serial: {}", verified.serial_number);
        println!(
            "  Generated: {}",
            idstamp::time::format_rfc3339(verified.generated_at)
        );
    } else if let Some(matches) = matches.subcommand_matches("inspect") {
        let input_file = matches
            .get_one::<String>("in")
            .ok_or(IdStampError::UsageError("Missing input file"))?;
        let content = read_file(input_file)?;
        // A DER TimeStampResp starts with a SEQUENCE tag, never with JSON
        if content.first() == Some(&0x30) {
            print_timestamp("", &inspect_timestamp(&content)?);
        } else {
            for (index, envelope) in read_envelopes(input_file)?.iter().enumerate() {
                inspect(index, envelope)?;
            }
        }
    } else {
        return Err(IdStampError::UsageError("No subcommand specified"));
    }
    Ok(())
}

fn inspect(index: usize, envelope: &Envelope) -> Result<(), IdStampError> {
    let payload = STANDARD
        .decode(&envelope.payload)
        .map_err(|e| IdStampError::InvalidEnvelope(format!("payload: {}", e)))?;
    let statement = Statement::from_json(&payload)
        .map_err(|e| IdStampError::InvalidEnvelope(format!("payload: {}", e)))?;
    let evidence = SignedEvidence::from_signatures(&envelope.signatures)?;
    let token = IdentityToken::parse(&evidence.identity_proof.id_token)?;

    println!("Envelope #{}", index);
    println!("  Payload type: {}", envelope.payload_type);
    println!("  Payload digest: sha256:{}", payload_digest_hex(&payload));
    println!("  Predicate: {}", statement.predicate_type);
    for subject in &statement.subject {
        let digests: Vec<String> = subject
            .digest
            .iter()
            .map(|(alg, digest)| format!("{}:{}", alg, digest))
            .collect();
        println!("  Subject: {} ({})", subject.name, digests.join(", "));
    }

    println!("  Identity token (unverified):");
    println!("    Algorithm: {}", token.header().alg);
    println!("    Key id: {}", token.key_id().unwrap_or("-"));
    println!("    Issuer: {}", token.issuer().unwrap_or("-"));
    println!(
        "    Subject: {}",
        token.claims().sub.as_deref().unwrap_or("-")
    );
    if let Some(audience) = token.audience() {
        println!("    Audience: {}", audience);
    }
    println!(
        "    Expires: {}",
        idstamp::time::format_rfc3339(token.claims().exp)
    );

    match verify_timestamp_for_payload(&evidence.timestamp_proof, &payload) {
        Ok(timestamp) => {
            println!("  Timestamp:");
            print_timestamp("    ", &timestamp);
        }
        Err(e) => println!("  Timestamp: invalid ({})", e),
    }
    Ok(())
}

fn print_timestamp(indent: &str, timestamp: &VerifiedTimestamp) {
    println!(
        "{}Digest: {}:{}",
        indent,
        timestamp.hash_algorithm.name(),
        timestamp.digest_hex()
    );
    println!("{}Serial: {}", indent, timestamp.serial_number);
    println!("{}Policy: {}", indent, timestamp.policy);
    println!(
        "{}Generated: {}",
        indent,
        idstamp::time::format_rfc3339(timestamp.generated_at)
    );
    if let Some(nonce) = timestamp.nonce {
        println!("{}Nonce: {:#x}", indent, nonce);
    }
    println!("{}Signers: {}", indent, timestamp.signer_count);
    println!("{}Certificates: {}", indent, timestamp.certificate_count);
}

fn main() -> Result<(), IdStampError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
