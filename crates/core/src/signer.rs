//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! Signer / Verifier / Keyring — the external signing boundary.
//!
//! The save and load pipelines depend only on the `Signer`, `Verifier`, and
//! `Keyring` traits below; this module's `Ed25519Signer`/`Ed25519Verifier`/
//! `FileKeyring` are one concrete, in-process implementation of that
//! boundary (standing in for an OpenPGP-compatible backend), not part of
//! the core logic.

use crate::error::{ExpiredKeyError, SignError, SignatureError, TrustError};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// How much a keyring trusts a given signer's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    Ultimate,
    Marginal,
    Unknown,
}

/// Produces a detached signature over opaque bytes.
pub trait Signer: Send + Sync {
    fn sign(
        &self,
        canonical_bytes: &[u8],
        key_fingerprint: &str,
        passphrase: &str,
    ) -> Result<String, SignError>;
}

/// The set of public keys a verifier is willing to accept signatures from.
pub trait Keyring: Send + Sync {
    fn trust_level(&self, fingerprint: &str) -> Option<TrustLevel>;
    fn expires_at(&self, fingerprint: &str) -> Option<DateTime<Utc>>;
    fn public_key(&self, fingerprint: &str) -> Option<VerifyingKey>;
}

/// Failure outcomes from `Verifier::verify`, kept distinct so callers (and
/// the load pipeline) can fail fast with the right error kind.
#[derive(Debug, Clone)]
pub enum VerifyFailure {
    Signature(SignatureError),
    Trust(TrustError),
    Expired(ExpiredKeyError),
}

impl From<SignatureError> for VerifyFailure {
    fn from(e: SignatureError) -> Self {
        VerifyFailure::Signature(e)
    }
}
impl From<TrustError> for VerifyFailure {
    fn from(e: TrustError) -> Self {
        VerifyFailure::Trust(e)
    }
}
impl From<ExpiredKeyError> for VerifyFailure {
    fn from(e: ExpiredKeyError) -> Self {
        VerifyFailure::Expired(e)
    }
}

/// Verifies a detached signature against a trusted keyring. Returns the
/// signer's fingerprint on success.
pub trait Verifier: Send + Sync {
    fn verify(
        &self,
        canonical_bytes: &[u8],
        signature: &str,
        keyring: &dyn Keyring,
        allow_expired_signing_key: bool,
    ) -> Result<String, VerifyFailure>;
}

/// A BLAKE3-derived, PGP-style 20-byte fingerprint for an Ed25519 public key.
pub fn fingerprint_of(key: &VerifyingKey) -> String {
    let hash = blake3::hash(key.as_bytes());
    hex::encode(&hash.as_bytes()[..20])
}

/// `ed25519:<fingerprint>:<base64 signature>` — the fingerprint rides along
/// with the signature itself, the way a detached OpenPGP signature carries
/// the issuing key's ID, so a verifier can look up exactly one key instead
/// of brute-forcing every key a keyring happens to know.
fn format_signature(fingerprint: &str, sig: &Signature) -> String {
    format!(
        "ed25519:{fingerprint}:{}",
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig.to_bytes())
    )
}

fn parse_signature(s: &str) -> Result<(String, Signature), String> {
    let rest = s
        .strip_prefix("ed25519:")
        .ok_or_else(|| "signature must start with 'ed25519:'".to_string())?;
    let (fingerprint, b64) = rest
        .split_once(':')
        .ok_or_else(|| "signature is missing its fingerprint segment".to_string())?;
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64)
        .map_err(|e| e.to_string())?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| "signature must be 64 bytes".to_string())?;
    Ok((fingerprint.to_string(), Signature::from_bytes(&bytes)))
}

struct KeyRecord {
    signing_key: SigningKey,
    passphrase: String,
}

impl Drop for KeyRecord {
    fn drop(&mut self) {
        self.passphrase.zeroize();
    }
}

/// An in-process Ed25519 signer holding zero or more `(fingerprint, key,
/// passphrase)` entries. Stands in for a hardware or OpenPGP signing
/// backend; `sign` returns `SignError` for every failure mode the external
/// contract names.
#[derive(Default)]
pub struct Ed25519Signer {
    keys: HashMap<String, KeyRecord>,
}

impl Ed25519Signer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signing key under its own fingerprint, protected by
    /// `passphrase`. Returns the fingerprint so callers can reference it
    /// later without recomputing.
    pub fn add_key(&mut self, signing_key: SigningKey, passphrase: impl Into<String>) -> String {
        let fingerprint = fingerprint_of(&signing_key.verifying_key());
        self.keys.insert(
            fingerprint.clone(),
            KeyRecord {
                signing_key,
                passphrase: passphrase.into(),
            },
        );
        fingerprint
    }
}

impl Signer for Ed25519Signer {
    fn sign(
        &self,
        canonical_bytes: &[u8],
        key_fingerprint: &str,
        passphrase: &str,
    ) -> Result<String, SignError> {
        let record = self
            .keys
            .get(key_fingerprint)
            .ok_or_else(|| SignError::UnknownKey(key_fingerprint.to_string()))?;
        if record.passphrase != passphrase {
            return Err(SignError::WrongPassphrase);
        }
        let signature = record.signing_key.sign(canonical_bytes);
        Ok(format_signature(key_fingerprint, &signature))
    }
}

/// Verifies Ed25519 detached signatures against a `Keyring`.
#[derive(Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(
        &self,
        canonical_bytes: &[u8],
        signature: &str,
        keyring: &dyn Keyring,
        allow_expired_signing_key: bool,
    ) -> Result<String, VerifyFailure> {
        let (fingerprint, sig) = parse_signature(signature)
            .map_err(|e| VerifyFailure::Signature(SignatureError::Malformed(e)))?;

        let public_key = keyring
            .public_key(&fingerprint)
            .ok_or_else(|| VerifyFailure::Trust(TrustError::UnknownSigner(fingerprint.clone())))?;

        if public_key.verify(canonical_bytes, &sig).is_err() {
            return Err(VerifyFailure::Signature(SignatureError::Invalid));
        }

        self.check_trust_and_expiry(keyring, &fingerprint, allow_expired_signing_key)
    }
}

impl Ed25519Verifier {
    fn check_trust_and_expiry(
        &self,
        keyring: &dyn Keyring,
        fingerprint: &str,
        allow_expired_signing_key: bool,
    ) -> Result<String, VerifyFailure> {
        if keyring.trust_level(fingerprint).is_none() {
            return Err(VerifyFailure::Trust(TrustError::UnknownSigner(
                fingerprint.to_string(),
            )));
        }
        if let Some(expires_at) = keyring.expires_at(fingerprint) {
            if expires_at < Utc::now() && !allow_expired_signing_key {
                return Err(VerifyFailure::Expired(ExpiredKeyError::Expired {
                    fingerprint: fingerprint.to_string(),
                    expired_at: expires_at.to_rfc3339(),
                }));
            }
        }
        Ok(fingerprint.to_string())
    }
}

#[derive(Clone, Copy)]
struct ExpiryRecord {
    trust: TrustLevel,
    expires_at: Option<DateTime<Utc>>,
}

/// A directory-backed keyring: one `<fingerprint>.pub` file (32 raw bytes)
/// plus a sibling `<fingerprint>.meta.json` (`{"trust": "...", "expires_at":
/// "..."}`) per trusted key.
pub struct FileKeyring {
    dir: PathBuf,
    keys: HashMap<String, VerifyingKey>,
    meta: HashMap<String, ExpiryRecord>,
}

#[derive(serde::Deserialize)]
struct MetaFile {
    trust: String,
    #[serde(default)]
    expires_at: Option<String>,
}

impl FileKeyring {
    /// Load every `<fingerprint>.pub` / `<fingerprint>.meta.json` pair found
    /// directly under `dir`. Missing or malformed metadata defaults a key's
    /// trust to `Unknown` rather than failing the whole load — an unknown
    /// key is then rejected later by `TrustError`, which is the right
    /// failure mode for "a key this keyring doesn't vouch for".
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let dir = dir.as_ref().to_path_buf();
        let mut keys = HashMap::new();
        let mut meta = HashMap::new();

        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if path.extension().and_then(|e| e.to_str()) != Some("pub") {
                    continue;
                }
                let raw = fs::read(&path)?;
                let Ok(bytes): Result<[u8; 32], _> = raw.try_into() else {
                    continue;
                };
                let Ok(key) = VerifyingKey::from_bytes(&bytes) else {
                    continue;
                };
                keys.insert(stem.to_string(), key);

                let meta_path = dir.join(format!("{stem}.meta.json"));
                let record = fs::read_to_string(&meta_path)
                    .ok()
                    .and_then(|s| serde_json::from_str::<MetaFile>(&s).ok())
                    .map(|m| ExpiryRecord {
                        trust: match m.trust.as_str() {
                            "ultimate" => TrustLevel::Ultimate,
                            "marginal" => TrustLevel::Marginal,
                            _ => TrustLevel::Unknown,
                        },
                        expires_at: m
                            .expires_at
                            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                            .map(|dt| dt.with_timezone(&Utc)),
                    })
                    .unwrap_or(ExpiryRecord {
                        trust: TrustLevel::Unknown,
                        expires_at: None,
                    });
                meta.insert(stem.to_string(), record);
            }
        }

        Ok(Self { dir, keys, meta })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns 0 if no trusted key expires within `days_before_warning`
    /// days, or the count of keys that do — the backing logic for the
    /// CLI's `keys expiring` command.
    pub fn count_expiring_within(&self, days_before_warning: i64) -> usize {
        let horizon = Utc::now() + chrono::Duration::days(days_before_warning);
        self.meta
            .values()
            .filter(|record| record.expires_at.is_some_and(|at| at <= horizon))
            .count()
    }
}

impl Keyring for FileKeyring {
    fn trust_level(&self, fingerprint: &str) -> Option<TrustLevel> {
        self.meta.get(fingerprint).map(|r| r.trust)
    }

    fn expires_at(&self, fingerprint: &str) -> Option<DateTime<Utc>> {
        self.meta.get(fingerprint).and_then(|r| r.expires_at)
    }

    fn public_key(&self, fingerprint: &str) -> Option<VerifyingKey> {
        self.keys.get(fingerprint).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use std::collections::HashMap as StdHashMap;

    struct InMemoryKeyring {
        keys: StdHashMap<String, VerifyingKey>,
        trust: StdHashMap<String, TrustLevel>,
        expiry: StdHashMap<String, DateTime<Utc>>,
    }

    impl Keyring for InMemoryKeyring {
        fn trust_level(&self, fingerprint: &str) -> Option<TrustLevel> {
            self.trust.get(fingerprint).copied()
        }
        fn expires_at(&self, fingerprint: &str) -> Option<DateTime<Utc>> {
            self.expiry.get(fingerprint).copied()
        }
        fn public_key(&self, fingerprint: &str) -> Option<VerifyingKey> {
            self.keys.get(fingerprint).copied()
        }
    }

    fn trusting_keyring(fingerprint: &str, key: VerifyingKey) -> InMemoryKeyring {
        let mut keys = StdHashMap::new();
        keys.insert(fingerprint.to_string(), key);
        let mut trust = StdHashMap::new();
        trust.insert(fingerprint.to_string(), TrustLevel::Ultimate);
        InMemoryKeyring {
            keys,
            trust,
            expiry: StdHashMap::new(),
        }
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let fingerprint = fingerprint_of(&signing_key.verifying_key());

        let mut signer = Ed25519Signer::new();
        signer.add_key(signing_key.clone(), "hunter2");

        let bytes = b"canonical manifest bytes";
        let sig = signer.sign(bytes, &fingerprint, "hunter2").unwrap();

        let keyring = trusting_keyring(&fingerprint, signing_key.verifying_key());
        let verifier = Ed25519Verifier;
        let verified_fp = verifier
            .verify(bytes, &sig, &keyring, false)
            .expect("should verify");
        assert_eq!(verified_fp, fingerprint);
    }

    #[test]
    fn wrong_passphrase_fails_to_sign() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let mut signer = Ed25519Signer::new();
        let fingerprint = signer.add_key(signing_key, "correct");
        let err = signer.sign(b"data", &fingerprint, "wrong").unwrap_err();
        assert!(matches!(err, SignError::WrongPassphrase));
    }

    #[test]
    fn untrusted_signer_fails_with_trust_error() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let fingerprint = fingerprint_of(&signing_key.verifying_key());
        let mut signer = Ed25519Signer::new();
        signer.add_key(signing_key.clone(), "pw");
        let sig = signer.sign(b"data", &fingerprint, "pw").unwrap();

        let empty_keyring = InMemoryKeyring {
            keys: StdHashMap::new(),
            trust: StdHashMap::new(),
            expiry: StdHashMap::new(),
        };
        let verifier = Ed25519Verifier;
        let err = verifier
            .verify(b"data", &sig, &empty_keyring, false)
            .unwrap_err();
        assert!(matches!(err, VerifyFailure::Trust(_)));
    }

    #[test]
    fn expired_key_rejected_unless_allowed() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let fingerprint = fingerprint_of(&signing_key.verifying_key());
        let mut signer = Ed25519Signer::new();
        signer.add_key(signing_key.clone(), "pw");
        let sig = signer.sign(b"data", &fingerprint, "pw").unwrap();

        let mut keyring = trusting_keyring(&fingerprint, signing_key.verifying_key());
        keyring
            .expiry
            .insert(fingerprint.clone(), Utc::now() - chrono::Duration::days(1));

        let verifier = Ed25519Verifier;
        let err = verifier.verify(b"data", &sig, &keyring, false).unwrap_err();
        assert!(matches!(err, VerifyFailure::Expired(_)));

        let ok = verifier.verify(b"data", &sig, &keyring, true);
        assert!(ok.is_ok());
    }

    #[test]
    fn tampered_bytes_fail_signature_check() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let fingerprint = fingerprint_of(&signing_key.verifying_key());
        let mut signer = Ed25519Signer::new();
        signer.add_key(signing_key.clone(), "pw");
        let sig = signer.sign(b"original", &fingerprint, "pw").unwrap();

        let keyring = trusting_keyring(&fingerprint, signing_key.verifying_key());
        let verifier = Ed25519Verifier;
        let err = verifier
            .verify(b"tampered!", &sig, &keyring, false)
            .unwrap_err();
        assert!(matches!(err, VerifyFailure::Signature(_)));
    }
}
