//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! Unified error hierarchy for the composite-artifact pipeline.
//!
//! Each failure family from the threat model gets its own leaf type so
//! callers can match narrowly (`Err(VaultError::Integrity(_))`) or broadly
//! (`Err(VaultError::Integrity(_) | VaultError::Trust(_))`).

use thiserror::Error;

/// Top-level error type returned by every public `vault-core` entry point.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("signing failed: {0}")]
    Sign(#[from] SignError),

    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("signer not trusted: {0}")]
    Trust(#[from] TrustError),

    #[error("signing key expired: {0}")]
    ExpiredKey(#[from] ExpiredKeyError),

    #[error("manifest error: {0}")]
    Manifest(#[from] vault_protocols::ManifestFormatError),

    #[error("integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("codec decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("stream state error: {0}")]
    State(#[from] StateError),

    #[error("validation callback rejected artifact: {0}")]
    Validation(#[from] ValidationError),

    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry or configuration misuse — a caller bug, not a runtime condition.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("codec name already registered: {0}")]
    DuplicateCodec(String),

    #[error("codec registry is frozen and cannot be mutated after first use")]
    RegistryFrozen,

    #[error("unknown hmac algorithm: {0}")]
    UnknownHmacAlgorithm(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The artifact's declared attribute map disagrees with its live attributes.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("attribute declared but not present on artifact: {0}")]
    MissingAttribute(String),

    #[error("duplicate entry name in attribute map: {0}")]
    DuplicateEntryName(String),

    #[error("codec not found in registry: {0}")]
    UnknownCodec(String),
}

#[derive(Error, Debug, Clone)]
pub enum SignError {
    #[error("unknown signing key: {0}")]
    UnknownKey(String),
    #[error("incorrect passphrase")]
    WrongPassphrase,
    #[error("signing key expired")]
    KeyExpired,
}

#[derive(Error, Debug, Clone)]
pub enum SignatureError {
    #[error("signature does not verify against the manifest bytes")]
    Invalid,
    #[error("malformed signature encoding: {0}")]
    Malformed(String),
    #[error("manifest is missing a signature")]
    Missing,
}

#[derive(Error, Debug, Clone)]
pub enum TrustError {
    #[error("signer fingerprint {0} is not present in the trusted keyring")]
    UnknownSigner(String),
}

#[derive(Error, Debug, Clone)]
pub enum ExpiredKeyError {
    #[error("signing key {fingerprint} expired at {expired_at}")]
    Expired {
        fingerprint: String,
        expired_at: String,
    },
}

/// Any hash mismatch, missing entry, extra entry, or sentinel disagreement.
#[derive(Error, Debug, Clone)]
pub enum IntegrityError {
    #[error("tag mismatch for entry {0}")]
    TagMismatch(String),
    #[error("entry present in archive but not declared in manifest: {0}")]
    UndeclaredEntry(String),
    #[error("entry declared in manifest but missing from archive: {0}")]
    MissingEntry(String),
    #[error("sentinel for attribute {attribute} does not match its manifest entry")]
    SentinelMismatch { attribute: String },
    #[error("attribute {0} was declared in the manifest but is not a sentinel in the skeleton")]
    NotASentinel(String),
}

#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("codec {codec} failed to decode entry {entry}: {reason}")]
    Failed {
        codec: String,
        entry: String,
        reason: String,
    },
    #[error("trailing bytes after decoding entry {0}")]
    TrailingBytes(String),
}

/// `VerifiableStream` misuse: writing after finalize, or reading before it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot write to a finalized stream")]
    WriteAfterFinalize,
    #[error("cannot read from a stream before it is finalized")]
    ReadBeforeFinalize,
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("validation callback rejected the artifact: {0}")]
    Rejected(String),
}
