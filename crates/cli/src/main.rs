//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use vault_core::error::ModelError;
use vault_core::{
    load, save, AttributeValue, CompositeArtifact, Config, Ed25519Signer, Ed25519Verifier,
    FileKeyring,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Signed composite-artifact container tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save a JSON document as a signed artifact archive.
    Save(SaveCmd),
    /// Load and print a signed artifact archive.
    Load(LoadCmd),
    /// Inspect the trusted keyring.
    #[command(subcommand)]
    Keys(KeysCmd),
}

#[derive(Args, Debug)]
struct SaveCmd {
    #[arg(long = "in", value_name = "PATH")]
    input: PathBuf,
    #[arg(long = "out", value_name = "PATH")]
    output: PathBuf,
    #[arg(long)]
    signing_key: PathBuf,
    #[arg(long)]
    passphrase: String,
    #[arg(long, default_value_t = true)]
    compress: bool,
}

#[derive(Args, Debug)]
struct LoadCmd {
    #[arg(long = "in", value_name = "PATH")]
    input: PathBuf,
    #[arg(long)]
    keys_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    allow_expired: bool,
}

#[derive(Subcommand, Debug)]
enum KeysCmd {
    /// Generate a fresh Ed25519 signing key and matching trusted-key entry.
    Generate {
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, default_value = "ultimate")]
        trust: String,
    },
    /// Exit non-zero (and print the offending fingerprints) if any trusted
    /// key expires within the given window.
    Expiring {
        #[arg(long)]
        keys_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 30)]
        days_before_warning: i64,
    },
}

/// A generic single-attribute artifact: wraps one JSON document as its
/// whole persisted state. This is what the CLI round-trips; applications
/// embedding `vault-core` as a library are expected to implement
/// `CompositeArtifact` on their own richer types instead.
struct JsonDocument(serde_json::Value);

impl CompositeArtifact for JsonDocument {
    fn artifact_name() -> &'static str {
        "json-document"
    }

    fn attribute_codecs() -> BTreeMap<String, (String, String)> {
        let mut map = BTreeMap::new();
        map.insert(
            "document".to_string(),
            ("generic-object".to_string(), "document".to_string()),
        );
        map
    }

    fn attribute_value(&self, attribute: &str) -> Result<AttributeValue, ModelError> {
        match attribute {
            "document" => Ok(AttributeValue::Object(self.0.clone())),
            other => Err(ModelError::MissingAttribute(other.to_string())),
        }
    }

    fn from_attribute_values(
        mut values: BTreeMap<String, AttributeValue>,
    ) -> Result<Self, ModelError> {
        match values.remove("document") {
            Some(AttributeValue::Object(value)) => Ok(JsonDocument(value)),
            _ => Err(ModelError::MissingAttribute("document".to_string())),
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Save(cmd) => cmd_save(cmd),
        Commands::Load(cmd) => cmd_load(cmd),
        Commands::Keys(cmd) => cmd_keys(cmd),
    }
}

fn cmd_save(cmd: SaveCmd) -> Result<()> {
    let text = fs::read_to_string(&cmd.input)
        .with_context(|| format!("reading {}", cmd.input.display()))?;
    let document: serde_json::Value =
        serde_json::from_str(&text).context("input is not valid JSON")?;
    let artifact = JsonDocument(document);

    let key_bytes = fs::read(&cmd.signing_key)
        .with_context(|| format!("reading signing key {}", cmd.signing_key.display()))?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("signing key file must be exactly 32 bytes"))?;
    let signing_key = SigningKey::from_bytes(&key_bytes);

    let mut signer = Ed25519Signer::new();
    let fingerprint = signer.add_key(signing_key, &cmd.passphrase);

    let file = fs::File::create(&cmd.output)
        .with_context(|| format!("creating {}", cmd.output.display()))?;
    save(
        artifact,
        &signer,
        &fingerprint,
        &cmd.passphrase,
        std::io::BufWriter::new(file),
        cmd.compress,
    )
    .context("save failed")?;

    println!("saved {} (signed by {fingerprint})", cmd.output.display());
    Ok(())
}

fn cmd_load(cmd: LoadCmd) -> Result<()> {
    let config = Config {
        trusted_keys_dir: cmd
            .keys_dir
            .clone()
            .unwrap_or_else(|| Config::default().trusted_keys_dir),
        allow_expired_signing_key: cmd.allow_expired,
        ..Config::default()
    };
    let keyring =
        FileKeyring::load(&config.trusted_keys_dir).context("loading trusted keyring")?;
    let verifier = Ed25519Verifier;

    let file = fs::File::open(&cmd.input).with_context(|| format!("opening {}", cmd.input.display()))?;
    let artifact: JsonDocument = load(
        std::io::BufReader::new(file),
        &verifier,
        &keyring,
        config.allow_expired_signing_key,
    )
    .context("load failed")?;

    println!("{}", serde_json::to_string_pretty(&artifact.0)?);
    Ok(())
}

fn cmd_keys(cmd: KeysCmd) -> Result<()> {
    match cmd {
        KeysCmd::Generate { out_dir, trust } => {
            fs::create_dir_all(&out_dir)
                .with_context(|| format!("creating {}", out_dir.display()))?;
            let signing_key = SigningKey::generate(&mut OsRng);
            let fingerprint = vault_core::signer::fingerprint_of(&signing_key.verifying_key());

            fs::write(
                out_dir.join(format!("{fingerprint}.key")),
                signing_key.to_bytes(),
            )?;
            fs::write(
                out_dir.join(format!("{fingerprint}.pub")),
                signing_key.verifying_key().to_bytes(),
            )?;
            fs::write(
                out_dir.join(format!("{fingerprint}.meta.json")),
                serde_json::to_vec_pretty(&serde_json::json!({ "trust": trust }))?,
            )?;

            println!("generated key {fingerprint} in {}", out_dir.display());
            Ok(())
        }
        KeysCmd::Expiring {
            keys_dir,
            days_before_warning,
        } => {
            let dir = keys_dir.unwrap_or_else(|| Config::default().trusted_keys_dir);
            let keyring = FileKeyring::load(&dir).context("loading trusted keyring")?;
            let count = keyring.count_expiring_within(days_before_warning);
            if count == 0 {
                println!("no trusted keys expire within {days_before_warning} days");
                Ok(())
            } else {
                eprintln!("{count} trusted key(s) expire within {days_before_warning} days");
                process::exit(1);
            }
        }
    }
}
