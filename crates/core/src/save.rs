//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! The save pipeline: attribute serialization, skeleton construction,
//! signing, and archiving, as one `IDLE -> ... -> DONE`/`ABORTED` state
//! machine instrumented with `tracing` so the ordering is observable, not
//! just true by inspection.

use std::collections::BTreeMap;
use std::io::Write;

use rand::RngCore;
use tracing::{debug, instrument, warn};
use zeroize::Zeroize;

use crate::archive;
use crate::codec::{global_registry, AttributeValue};
use crate::error::{ModelError, VaultError};
use crate::manifest::{build_manifest, sign_manifest};
use crate::model::{build_skeleton_value, CompositeArtifact, Sentinel};
use crate::signer::Signer;
use crate::stream::VerifiableStream;
use vault_protocols::EntryRecord;

const SKELETON_ENTRY_NAME: &str = "skeleton";
const GENERIC_OBJECT_CODEC: &str = "generic-object";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveState {
    Idle,
    Serializing,
    Skeleton,
    Signing,
    Archiving,
    Done,
    Aborted,
}

impl SaveState {
    fn advance(self, to: SaveState) -> SaveState {
        debug!(from = ?self, to = ?to, "save pipeline transition");
        to
    }

    fn abort(self, reason: &str) -> SaveState {
        warn!(from = ?self, reason, "save pipeline aborted");
        SaveState::Aborted
    }
}

/// Save `artifact` by consuming it, writing a signed archive to `sink`.
///
/// The artifact is taken by value: this is the resolved answer to whether
/// a save should render the in-memory original unusable (it does, via an
/// ordinary Rust move) or leave a structural copy behind (callers `clone()`
/// beforehand if they need that).
#[instrument(skip(artifact, signer, passphrase, sink))]
pub fn save<A: CompositeArtifact>(
    artifact: A,
    signer: &dyn Signer,
    key_fingerprint: &str,
    passphrase: &str,
    sink: impl Write,
    compress: bool,
) -> Result<(), VaultError> {
    let mut state = SaveState::Idle;

    let codecs = A::attribute_codecs();
    state = state.advance(SaveState::Serializing);

    let registry = global_registry();
    let mut hmac_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut hmac_key);

    let mut blobs: Vec<(String, Vec<u8>)> = Vec::new();
    let mut entries: Vec<EntryRecord> = Vec::new();
    let mut sentinels: BTreeMap<String, Sentinel> = BTreeMap::new();

    for (attribute, (codec_name, entry_name)) in &codecs {
        let outcome = (|| -> Result<(), VaultError> {
            let codec = registry
                .get(codec_name)
                .ok_or_else(|| ModelError::UnknownCodec(codec_name.clone()))?;
            let value = artifact.attribute_value(attribute)?;
            let mut stream = VerifiableStream::new(&hmac_key);
            codec.serialize(&value, &mut stream)?;
            let tag = stream.finalize();
            let bytes = stream.read_all()?;

            entries.push(EntryRecord {
                name: entry_name.clone(),
                codec: codec_name.clone(),
                attribute: Some(attribute.clone()),
                tag: hex::encode(tag),
            });
            sentinels.insert(
                attribute.clone(),
                Sentinel {
                    attribute: attribute.clone(),
                    codec: codec_name.clone(),
                    entry: entry_name.clone(),
                },
            );
            blobs.push((entry_name.clone(), bytes));
            Ok(())
        })();

        if let Err(e) = outcome {
            hmac_key.zeroize();
            state.abort("attribute serialization failed");
            return Err(e);
        }
    }

    state = state.advance(SaveState::Skeleton);

    let skeleton_outcome = (|| -> Result<(String, Vec<u8>, String), VaultError> {
        let codec = registry
            .get(GENERIC_OBJECT_CODEC)
            .ok_or_else(|| ModelError::UnknownCodec(GENERIC_OBJECT_CODEC.to_string()))?;
        let skeleton_value = build_skeleton_value(A::artifact_name(), &sentinels);
        let mut stream = VerifiableStream::new(&hmac_key);
        codec.serialize(&AttributeValue::Object(skeleton_value), &mut stream)?;
        let tag = stream.finalize();
        let bytes = stream.read_all()?;
        Ok((SKELETON_ENTRY_NAME.to_string(), bytes, hex::encode(tag)))
    })();

    let (skeleton_name, skeleton_bytes, skeleton_tag) = match skeleton_outcome {
        Ok(v) => v,
        Err(e) => {
            hmac_key.zeroize();
            state.abort("skeleton serialization failed");
            return Err(e);
        }
    };

    entries.insert(
        0,
        EntryRecord {
            name: skeleton_name.clone(),
            codec: GENERIC_OBJECT_CODEC.to_string(),
            attribute: None,
            tag: skeleton_tag,
        },
    );
    blobs.insert(0, (skeleton_name.clone(), skeleton_bytes));

    state = state.advance(SaveState::Signing);

    let manifest = build_manifest(
        A::artifact_name(),
        &skeleton_name,
        &hmac_key,
        entries,
        chrono::Utc::now(),
    );

    if let Err(e) = manifest.validate_structure() {
        hmac_key.zeroize();
        state.abort("manifest structure invalid before signing");
        return Err(VaultError::Manifest(e));
    }

    let signed = match sign_manifest(manifest, signer, key_fingerprint, passphrase) {
        Ok(m) => m,
        Err(e) => {
            hmac_key.zeroize();
            state.abort("signing failed");
            return Err(e);
        }
    };

    state = state.advance(SaveState::Archiving);

    // The signature travels in its own archive entry, not embedded in the
    // manifest blob, so the stored manifest carries no signature field.
    let mut unsigned_for_storage = signed.clone();
    unsigned_for_storage.signature = None;
    let manifest_bytes = serde_json::to_vec(&unsigned_for_storage)
        .map_err(vault_protocols::ManifestFormatError::from)?;

    let signature_bytes = signed
        .signature
        .as_ref()
        .expect("sign_manifest always populates signature")
        .as_bytes()
        .to_vec();

    let write_result = archive::write_archive(sink, &manifest_bytes, &signature_bytes, &blobs, compress);

    hmac_key.zeroize();

    match write_result {
        Ok(()) => {
            state.advance(SaveState::Done);
            Ok(())
        }
        Err(e) => {
            state.abort("archive write failed");
            Err(VaultError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{fingerprint_of, Ed25519Signer};
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    struct Tiny {
        value: serde_json::Value,
    }

    impl CompositeArtifact for Tiny {
        fn artifact_name() -> &'static str {
            "tiny"
        }
        fn attribute_codecs() -> BTreeMap<String, (String, String)> {
            let mut m = BTreeMap::new();
            m.insert(
                "payload".to_string(),
                ("generic-object".to_string(), "payload.bin".to_string()),
            );
            m
        }
        fn attribute_value(&self, attribute: &str) -> Result<AttributeValue, ModelError> {
            match attribute {
                "payload" => Ok(AttributeValue::Object(self.value.clone())),
                other => Err(ModelError::MissingAttribute(other.to_string())),
            }
        }
        fn from_attribute_values(
            mut values: BTreeMap<String, AttributeValue>,
        ) -> Result<Self, ModelError> {
            match values.remove("payload") {
                Some(AttributeValue::Object(value)) => Ok(Tiny { value }),
                _ => Err(ModelError::MissingAttribute("payload".to_string())),
            }
        }
        fn validate(&self) -> Result<(), ModelError> {
            Ok(())
        }
    }

    #[test]
    fn save_produces_a_readable_archive() {
        let artifact = Tiny {
            value: serde_json::json!({"k": "v"}),
        };
        let signing_key = SigningKey::generate(&mut OsRng);
        let fingerprint = fingerprint_of(&signing_key.verifying_key());
        let mut signer = Ed25519Signer::new();
        signer.add_key(signing_key, "pw");

        let mut buf = Vec::new();
        save(artifact, &signer, &fingerprint, "pw", &mut buf, false).unwrap();

        let contents = archive::read_archive(std::io::Cursor::new(buf)).unwrap();
        assert!(contents.entries.contains_key("payload.bin"));
        assert!(!contents.manifest_bytes.is_empty());
        assert!(!contents.signature_bytes.is_empty());
    }
}
