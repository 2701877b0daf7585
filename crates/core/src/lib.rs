//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! Streaming integrity and signature pipeline for signed composite-artifact
//! containers.
//!
//! A composite artifact is decomposed into per-attribute byte blobs, each
//! tagged by a keyed hash ([`stream::VerifiableStream`]) under a fresh
//! per-save key. A signed manifest ([`vault_protocols::Manifest`]) names
//! every entry and its tag; [`save::save`] builds and signs it, [`load::load`]
//! verifies the signature and every tag before any attribute codec runs.
//!
//! Modules:
//! - [`error`] — the unified error hierarchy every public entry point returns.
//! - [`stream`] — `VerifiableStream`, the authenticated write/read buffer.
//! - [`codec`] — the codec registry and built-in attribute codecs.
//! - [`model`] — `CompositeArtifact`, `Sentinel`, and skeleton (de)construction.
//! - [`signer`] — the `Signer`/`Verifier`/`Keyring` boundary and its default impls.
//! - [`manifest`] — bridges `vault_protocols::Manifest` to the signing boundary.
//! - [`archive`] — the tar-based (optionally gzip) archive container.
//! - [`save`] / [`load`] — the two pipelines.
//! - [`config`] — runtime configuration (TOML + environment overrides).

pub mod archive;
pub mod codec;
pub mod config;
pub mod error;
pub mod load;
pub mod manifest;
pub mod model;
pub mod save;
pub mod signer;
pub mod stream;

pub use codec::{AttributeValue, Codec, CodecRegistry};
pub use config::Config;
pub use error::VaultError;
pub use load::load;
pub use model::{CompositeArtifact, Sentinel};
pub use save::save;
pub use signer::{
    Ed25519Signer, Ed25519Verifier, FileKeyring, Keyring, Signer, TrustLevel, Verifier,
};
pub use stream::{Tag, VerifiableStream};

pub use vault_protocols::{EntryRecord, Manifest, FORMAT_VERSION, HMAC_ALGORITHM};
