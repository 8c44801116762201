// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! STOA Key Store CLI
//!
//! Maintenance commands for the gateway key store. The store password is
//! read from `KEYSTORE_PASSWORD`, never from the command line.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use secrecy::SecretString;

use stoa_auth_gateway::keystore::{KeyAlias, KeyStore, PublicKey};

const HELP: &str = r#"
STOA Key Store CLI

USAGE:
    stoa-keytool [OPTIONS] <COMMAND>

COMMANDS:
    list                              List aliases and entry types
    rotate <alias>                    Replace a secret with fresh material
    generate-keypair <alias>          Generate an Ed25519 key pair
    import-cert <alias> <file>        Import an X.509 certificate (DER or PEM)
    export-public <alias>             Print the public key of a key pair or certificate
    remove <alias>                    Delete an entry

OPTIONS:
    -k, --keystore <FILE>    Key store path (default: $KEYSTORE_PATH or keystore.sagks)
    -h, --help               Print help information
    -V, --version            Print version information

ENVIRONMENT:
    KEYSTORE_PASSWORD        Key store password (required)

EXAMPLES:
    # Register a service account for signed requests
    stoa-keytool generate-keypair billing-service

    # Trust a partner's certificate
    stoa-keytool -k /var/lib/stoa/keystore.sagks import-cert partner partner.pem
"#;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (keystore, rest) = split_keystore_arg(&args);

    let Some(command) = rest.first() else {
        eprintln!("{}", HELP);
        return ExitCode::FAILURE;
    };

    let result = match command.as_str() {
        "-h" | "--help" | "help" => {
            println!("{}", HELP);
            return ExitCode::SUCCESS;
        }
        "-V" | "--version" | "version" => {
            println!("stoa-keytool {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        "list" => open(keystore).and_then(|store| run_list(&store)),
        "rotate" => with_alias(&rest[1..]).and_then(|alias| run_rotate(&open(keystore)?, alias)),
        "generate-keypair" => {
            with_alias(&rest[1..]).and_then(|alias| run_generate(&open(keystore)?, alias))
        }
        "import-cert" => run_import(keystore, &rest[1..]),
        "export-public" => {
            with_alias(&rest[1..]).and_then(|alias| run_export(&open(keystore)?, alias))
        }
        "remove" => with_alias(&rest[1..]).and_then(|alias| run_remove(&open(keystore)?, alias)),
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            eprintln!("{}", HELP);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Pull `-k/--keystore <FILE>` out of the arguments.
fn split_keystore_arg(args: &[String]) -> (Option<PathBuf>, Vec<String>) {
    let mut keystore = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "-k" || arg == "--keystore" {
            keystore = iter.next().map(PathBuf::from);
        } else {
            rest.push(arg.clone());
        }
    }
    (keystore, rest)
}

fn with_alias(args: &[String]) -> Result<KeyAlias> {
    match args.first() {
        Some(alias) if !alias.is_empty() => Ok(KeyAlias::new(alias.clone())),
        _ => bail!("an alias is required"),
    }
}

fn open(keystore: Option<PathBuf>) -> Result<KeyStore> {
    let path = keystore
        .or_else(|| std::env::var_os("KEYSTORE_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("keystore.sagks"));
    let password = std::env::var("KEYSTORE_PASSWORD")
        .map(SecretString::new)
        .context("KEYSTORE_PASSWORD must be set")?;
    KeyStore::open(&path, &password).with_context(|| format!("opening {}", path.display()))
}

fn run_list(store: &KeyStore) -> Result<()> {
    for (alias, kind) in store.aliases() {
        println!("{:<32} {}", alias, kind);
    }
    Ok(())
}

fn run_rotate(store: &KeyStore, alias: KeyAlias) -> Result<()> {
    store.rotate_secret(&alias)?;
    println!("rotated {}; tokens signed with the previous secret no longer validate", alias);
    Ok(())
}

fn run_generate(store: &KeyStore, alias: KeyAlias) -> Result<()> {
    let public = store.generate_key_pair(alias.clone())?;
    println!("generated {}", alias);
    println!("{}", render_public(&public)?);
    Ok(())
}

fn run_import(keystore: Option<PathBuf>, args: &[String]) -> Result<()> {
    let alias = with_alias(args)?;
    let Some(file) = args.get(1) else {
        bail!("a certificate file is required");
    };
    let bytes = fs::read(file).with_context(|| format!("reading {}", file))?;
    let der = certificate_der(&bytes)?;

    let store = open(keystore)?;
    store.import_certificate(alias.clone(), der)?;
    println!("imported certificate as {}", alias);
    Ok(())
}

fn run_export(store: &KeyStore, alias: KeyAlias) -> Result<()> {
    println!("{}", render_public(&store.public_key(&alias)?)?);
    Ok(())
}

fn run_remove(store: &KeyStore, alias: KeyAlias) -> Result<()> {
    store.remove(&alias)?;
    println!("removed {}", alias);
    Ok(())
}

/// Ed25519 keys as raw base64url, RSA keys as SPKI PEM.
fn render_public(key: &PublicKey) -> Result<String> {
    match key {
        PublicKey::Ed25519(key) => Ok(URL_SAFE_NO_PAD.encode(key.to_bytes())),
        PublicKey::Rsa(key) => key
            .to_public_key_pem(LineEnding::LF)
            .context("encoding RSA public key"),
    }
}

/// DER bytes from a DER file or the first PEM `CERTIFICATE` block.
fn certificate_der(bytes: &[u8]) -> Result<Vec<u8>> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Ok(bytes.to_vec());
    };
    let Some(start) = text.find("-----BEGIN CERTIFICATE-----") else {
        return Ok(bytes.to_vec());
    };
    let body = &text[start + "-----BEGIN CERTIFICATE-----".len()..];
    let Some(end) = body.find("-----END CERTIFICATE-----") else {
        bail!("unterminated PEM certificate");
    };
    let b64: String = body[..end].chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(b64).context("PEM certificate is not valid base64")
}
