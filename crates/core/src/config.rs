//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! Runtime configuration: an optional TOML file, overridable by
//! environment variables, falling back to documented defaults.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_TRUSTED_KEYS_DIR: &str = "VAULT_TRUSTED_KEYS_DIR";
const ENV_ALLOW_EXPIRED: &str = "VAULT_ALLOW_EXPIRED_SIGNING_KEY";
const ENV_COMPRESS: &str = "VAULT_COMPRESS_ARCHIVE";

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    trusted_keys_dir: Option<PathBuf>,
    allow_expired_signing_key: Option<bool>,
    compress_archive: Option<bool>,
    hmac_algorithm: Option<String>,
    format_version: Option<u32>,
}

/// Effective configuration for a save/load pipeline run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory `FileKeyring::load` reads trusted public keys from.
    pub trusted_keys_dir: PathBuf,
    /// Whether `load` accepts a signature from an expired key instead of
    /// failing with `ExpiredKeyError`.
    pub allow_expired_signing_key: bool,
    /// Whether `save` gzips the tar archive.
    pub compress_archive: bool,
    /// Name of the keyed-hash algorithm entries are tagged with. Only
    /// `vault_protocols::HMAC_ALGORITHM` is currently implemented; this
    /// field exists so a config file naming anything else fails loudly
    /// rather than silently saving with a different algorithm than intended.
    pub hmac_algorithm: String,
    /// Manifest wire-format version. Only `vault_protocols::FORMAT_VERSION`
    /// is currently implemented, for the same reason as `hmac_algorithm`.
    pub format_version: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trusted_keys_dir: PathBuf::from("./trusted_keys"),
            allow_expired_signing_key: false,
            compress_archive: true,
            hmac_algorithm: vault_protocols::HMAC_ALGORITHM.to_string(),
            format_version: vault_protocols::FORMAT_VERSION,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment variable
    /// overrides, then fall back to `Config::default()` for anything still
    /// unset. A missing `path` is not an error — it just means every field
    /// comes from the environment or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let raw = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| ConfigError::Invalid(format!("reading {}: {e}", path.display())))?;
                toml::from_str(&text).map_err(|e| ConfigError::Invalid(e.to_string()))?
            }
            _ => RawConfig::default(),
        };

        if let Some(algorithm) = &raw.hmac_algorithm {
            if algorithm != vault_protocols::HMAC_ALGORITHM {
                return Err(ConfigError::Invalid(format!(
                    "unsupported hmac_algorithm {algorithm}, only {} is implemented",
                    vault_protocols::HMAC_ALGORITHM
                )));
            }
        }
        if let Some(version) = raw.format_version {
            if version != vault_protocols::FORMAT_VERSION {
                return Err(ConfigError::Invalid(format!(
                    "unsupported format_version {version}, only {} is implemented",
                    vault_protocols::FORMAT_VERSION
                )));
            }
        }

        let defaults = Config::default();
        let mut config = Config {
            trusted_keys_dir: raw.trusted_keys_dir.unwrap_or(defaults.trusted_keys_dir),
            allow_expired_signing_key: raw
                .allow_expired_signing_key
                .unwrap_or(defaults.allow_expired_signing_key),
            compress_archive: raw.compress_archive.unwrap_or(defaults.compress_archive),
            hmac_algorithm: raw.hmac_algorithm.unwrap_or(defaults.hmac_algorithm),
            format_version: raw.format_version.unwrap_or(defaults.format_version),
        };

        if let Ok(dir) = std::env::var(ENV_TRUSTED_KEYS_DIR) {
            config.trusted_keys_dir = PathBuf::from(dir);
        }
        if let Ok(flag) = std::env::var(ENV_ALLOW_EXPIRED) {
            config.allow_expired_signing_key = parse_bool_env(&flag, ENV_ALLOW_EXPIRED)?;
        }
        if let Ok(flag) = std::env::var(ENV_COMPRESS) {
            config.compress_archive = parse_bool_env(&flag, ENV_COMPRESS)?;
        }

        Ok(config)
    }
}

fn parse_bool_env(value: &str, var: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{var} must be a boolean, got {other}"
        ))),
    }
}
