//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! Bridges `vault_protocols::Manifest` (the plain wire type) to the live
//! signing boundary: building a manifest from entry tags, producing its
//! canonical signing bytes, and checking a signature against a keyring.

use crate::error::{SignatureError, VaultError};
use crate::signer::{Keyring, Signer, VerifyFailure, Verifier};
use vault_protocols::{EntryRecord, Manifest, HMAC_ALGORITHM, FORMAT_VERSION};

/// Assemble an unsigned manifest from its entries. `hmac_key` is the
/// per-save random key used to key every entry's `VerifiableStream`; it is
/// stored hex-encoded so the manifest is itself plain JSON.
pub fn build_manifest(
    artifact_name: &str,
    skeleton_entry: &str,
    hmac_key: &[u8; 32],
    entries: Vec<EntryRecord>,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Manifest {
    Manifest {
        format_version: FORMAT_VERSION,
        artifact_name: artifact_name.to_string(),
        skeleton_entry: skeleton_entry.to_string(),
        hmac_key: hex::encode(hmac_key),
        hmac_algorithm: HMAC_ALGORITHM.to_string(),
        entries,
        created_at: created_at.to_rfc3339(),
        signature: None,
    }
}

/// Decode the manifest's hex-encoded HMAC key back into raw bytes.
pub fn decode_hmac_key(manifest: &Manifest) -> Result<[u8; 32], VaultError> {
    let bytes = hex::decode(&manifest.hmac_key)
        .map_err(|e| VaultError::Manifest(vault_protocols::ManifestFormatError::InvalidField(e.to_string())))?;
    bytes
        .try_into()
        .map_err(|_| VaultError::Manifest(vault_protocols::ManifestFormatError::InvalidField(
            "hmac_key must be 32 bytes".to_string(),
        )))
}

/// Sign a manifest's canonical bytes (excluding any existing signature) and
/// return the manifest with `signature` populated.
pub fn sign_manifest(
    manifest: Manifest,
    signer: &dyn Signer,
    key_fingerprint: &str,
    passphrase: &str,
) -> Result<Manifest, VaultError> {
    let canonical = manifest.to_canonical_bytes(false)?;
    let signature = signer.sign(&canonical, key_fingerprint, passphrase)?;
    Ok(manifest.with_signature(signature))
}

/// Verify a manifest's signature against a keyring. Returns the verified
/// signer's fingerprint. This is always the first check the load pipeline
/// performs — no entry hash or skeleton byte is trusted before this
/// returns `Ok`.
pub fn verify_manifest_signature(
    manifest: &Manifest,
    verifier: &dyn Verifier,
    keyring: &dyn Keyring,
    allow_expired_signing_key: bool,
) -> Result<String, VaultError> {
    let signature = manifest
        .signature
        .as_deref()
        .ok_or(SignatureError::Missing)?;
    let canonical = manifest.to_canonical_bytes(false)?;
    verifier
        .verify(&canonical, signature, keyring, allow_expired_signing_key)
        .map_err(|failure| match failure {
            VerifyFailure::Signature(e) => VaultError::Signature(e),
            VerifyFailure::Trust(e) => VaultError::Trust(e),
            VerifyFailure::Expired(e) => VaultError::ExpiredKey(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{fingerprint_of, Ed25519Signer, Ed25519Verifier, TrustLevel};
    use ed25519_dalek::{SigningKey, VerifyingKey};
    use rand_core::OsRng;
    use std::collections::HashMap;

    struct TestKeyring {
        keys: HashMap<String, VerifyingKey>,
        trust: HashMap<String, TrustLevel>,
    }

    impl Keyring for TestKeyring {
        fn trust_level(&self, fingerprint: &str) -> Option<TrustLevel> {
            self.trust.get(fingerprint).copied()
        }
        fn expires_at(&self, _fingerprint: &str) -> Option<chrono::DateTime<chrono::Utc>> {
            None
        }
        fn public_key(&self, fingerprint: &str) -> Option<VerifyingKey> {
            self.keys.get(fingerprint).copied()
        }
    }

    #[test]
    fn build_sign_and_verify_round_trip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let fingerprint = fingerprint_of(&signing_key.verifying_key());
        let mut signer = Ed25519Signer::new();
        signer.add_key(signing_key.clone(), "pw");

        let manifest = build_manifest(
            "my-artifact",
            "skeleton",
            &[3u8; 32],
            vec![EntryRecord {
                name: "skeleton".to_string(),
                codec: "generic-object".to_string(),
                attribute: None,
                tag: "ab".repeat(32),
            }],
            chrono::Utc::now(),
        );
        let signed = sign_manifest(manifest, &signer, &fingerprint, "pw").unwrap();
        assert!(signed.signature.is_some());

        let mut keys = HashMap::new();
        keys.insert(fingerprint.clone(), signing_key.verifying_key());
        let mut trust = HashMap::new();
        trust.insert(fingerprint.clone(), TrustLevel::Ultimate);
        let keyring = TestKeyring { keys, trust };

        let verifier = Ed25519Verifier;
        let verified_fp = verify_manifest_signature(&signed, &verifier, &keyring, false).unwrap();
        assert_eq!(verified_fp, fingerprint);
    }

    #[test]
    fn missing_signature_is_rejected() {
        let manifest = build_manifest("a", "skeleton", &[1u8; 32], vec![], chrono::Utc::now());
        let keyring = TestKeyring {
            keys: HashMap::new(),
            trust: HashMap::new(),
        };
        let verifier = Ed25519Verifier;
        let err = verify_manifest_signature(&manifest, &verifier, &keyring, false).unwrap_err();
        assert!(matches!(err, VaultError::Signature(SignatureError::Missing)));
    }

    #[test]
    fn hmac_key_round_trips_through_hex() {
        let key = [42u8; 32];
        let manifest = build_manifest("a", "skeleton", &key, vec![], chrono::Utc::now());
        assert_eq!(decode_hmac_key(&manifest).unwrap(), key);
    }
}
