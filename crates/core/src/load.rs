//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! The load pipeline: signature verification, entry-hash verification,
//! skeleton decode, attribute binding, post-load hook, then the mandatory
//! validation callback — strictly in that order. No codec other than the
//! generic-object skeleton codec ever touches bytes that haven't already
//! been authenticated.

use std::collections::BTreeMap;
use std::io::Read;

use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::archive::{self, ArchiveContents};
use crate::codec::{global_registry, AttributeValue};
use crate::error::{IntegrityError, VaultError};
use crate::manifest::{decode_hmac_key, verify_manifest_signature};
use crate::model::{parse_skeleton_value, CompositeArtifact};
use crate::signer::{Keyring, Verifier};
use crate::stream::VerifiableStream;
use vault_protocols::Manifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Idle,
    SigVerified,
    EntriesVerified,
    SkeletonDecoded,
    Bound,
    Hooked,
    Validated,
}

impl LoadState {
    fn advance(self, to: LoadState) -> LoadState {
        debug!(from = ?self, to = ?to, "load pipeline transition");
        to
    }

    fn abort(self, reason: &str) {
        warn!(from = ?self, reason, "load pipeline aborted");
    }
}

/// Load an artifact of type `A` from `source`, verifying signature and
/// entry integrity before any attribute codec runs.
pub fn load<A: CompositeArtifact>(
    source: impl Read,
    verifier: &dyn Verifier,
    keyring: &dyn Keyring,
    allow_expired_signing_key: bool,
) -> Result<A, VaultError> {
    let mut state = LoadState::Idle;

    let ArchiveContents {
        manifest_bytes,
        signature_bytes,
        entries: mut archive_entries,
    } = archive::read_archive(source)?;

    let mut manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(vault_protocols::ManifestFormatError::from)?;
    let signature = String::from_utf8(signature_bytes).map_err(|_| {
        VaultError::Manifest(vault_protocols::ManifestFormatError::InvalidField(
            "manifest.sig is not valid UTF-8".to_string(),
        ))
    })?;
    manifest.signature = Some(signature);

    if let Err(e) = verify_manifest_signature(&manifest, verifier, keyring, allow_expired_signing_key)
    {
        state.abort("signature verification failed");
        return Err(e);
    }
    state = state.advance(LoadState::SigVerified);

    manifest.validate_structure()?;
    if manifest.format_version != vault_protocols::FORMAT_VERSION {
        state.abort("unsupported format_version");
        return Err(VaultError::Manifest(
            vault_protocols::ManifestFormatError::InvalidField(format!(
                "unsupported format_version {}",
                manifest.format_version
            )),
        ));
    }

    let hmac_key = decode_hmac_key(&manifest)?;

    let mut decoded_tags: BTreeMap<String, Vec<u8>> = BTreeMap::new();

    for entry in &manifest.entries {
        let bytes = archive_entries.remove(&entry.name).ok_or_else(|| {
            state.abort("entry declared in manifest but missing from archive");
            IntegrityError::MissingEntry(entry.name.clone())
        })?;

        let mut stream = VerifiableStream::new(&hmac_key);
        stream.write(&bytes)?;
        stream.finalize();

        let expected_tag = hex::decode(&entry.tag).map_err(|_| {
            IntegrityError::TagMismatch(entry.name.clone())
        })?;
        let expected_tag: [u8; 32] = expected_tag.try_into().map_err(|_| {
            IntegrityError::TagMismatch(entry.name.clone())
        })?;
        let matches = stream.verify_against(&expected_tag)?;
        if !matches {
            state.abort("entry tag mismatch");
            return Err(IntegrityError::TagMismatch(entry.name.clone()).into());
        }

        decoded_tags.insert(entry.name.clone(), bytes);
    }

    if !archive_entries.is_empty() {
        let stray: Vec<_> = archive_entries.keys().cloned().collect();
        state.abort("entries present in archive but not declared in manifest");
        return Err(IntegrityError::UndeclaredEntry(stray.join(", ")).into());
    }
    state = state.advance(LoadState::EntriesVerified);

    let skeleton_bytes = decoded_tags
        .get(&manifest.skeleton_entry)
        .ok_or_else(|| IntegrityError::MissingEntry(manifest.skeleton_entry.clone()))?;

    let registry = global_registry();
    let skeleton_codec = registry.get("generic-object").ok_or_else(|| {
        IntegrityError::NotASentinel("generic-object codec not registered".to_string())
    })?;
    let skeleton_value = match skeleton_codec.deserialize(&manifest.skeleton_entry, skeleton_bytes)? {
        AttributeValue::Object(value) => value,
        _ => {
            return Err(
                IntegrityError::NotASentinel("skeleton entry did not decode to an object".to_string())
                    .into(),
            )
        }
    };

    let (artifact_name, sentinels) = parse_skeleton_value(&skeleton_value).ok_or_else(|| {
        IntegrityError::NotASentinel("skeleton value is not a well-formed sentinel map".to_string())
    })?;
    if artifact_name != manifest.artifact_name || artifact_name != A::artifact_name() {
        state.abort("artifact name mismatch between manifest, skeleton and type");
        return Err(IntegrityError::SentinelMismatch {
            attribute: artifact_name,
        }
        .into());
    }
    state = state.advance(LoadState::SkeletonDecoded);

    // Cross-check every declared attribute entry against its sentinel.
    for entry in manifest.entries.iter().filter(|e| e.attribute.is_some()) {
        let attribute = entry.attribute.as_ref().expect("filtered above");
        let sentinel = sentinels
            .get(attribute)
            .ok_or_else(|| IntegrityError::NotASentinel(attribute.clone()))?;
        let codec_matches: bool = sentinel.codec.as_bytes().ct_eq(entry.codec.as_bytes()).into();
        let entry_matches: bool = sentinel.entry.as_bytes().ct_eq(entry.name.as_bytes()).into();
        let consistent = sentinel.attribute == *attribute && codec_matches && entry_matches;
        if !consistent {
            state.abort("sentinel does not match its manifest entry");
            return Err(IntegrityError::SentinelMismatch {
                attribute: attribute.clone(),
            }
            .into());
        }
    }
    if sentinels.len() != manifest.entries.iter().filter(|e| e.attribute.is_some()).count() {
        state.abort("sentinel count does not match declared attribute count");
        return Err(IntegrityError::SentinelMismatch {
            attribute: "<count mismatch>".to_string(),
        }
        .into());
    }

    let mut values: BTreeMap<String, AttributeValue> = BTreeMap::new();
    for (attribute, sentinel) in &sentinels {
        let codec = registry
            .get(&sentinel.codec)
            .ok_or_else(|| IntegrityError::NotASentinel(sentinel.codec.clone()))?;
        let bytes = decoded_tags
            .get(&sentinel.entry)
            .ok_or_else(|| IntegrityError::MissingEntry(sentinel.entry.clone()))?;
        let value = codec.deserialize(&sentinel.entry, bytes)?;
        values.insert(attribute.clone(), value);
    }
    state = state.advance(LoadState::Bound);

    let mut artifact = A::from_attribute_values(values)?;

    artifact.post_load_hook()?;
    state = state.advance(LoadState::Hooked);

    artifact.validate()?;
    state.advance(LoadState::Validated);

    Ok(artifact)
}
