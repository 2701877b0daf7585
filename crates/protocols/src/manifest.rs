//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

use serde::{Deserialize, Serialize};

pub use crate::error::ManifestFormatError;

/// Wire format version this crate speaks. Incompatible manifests refuse to load.
pub const FORMAT_VERSION: u32 = 1;

/// Name of the keyed hash used to tag entries.
pub const HMAC_ALGORITHM: &str = "blake3-keyed-256";

/// One authenticated blob in the archive.
///
/// `attribute` is `None` exactly for the skeleton entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EntryRecord {
    pub name: String,
    pub codec: String,
    pub attribute: Option<String>,
    /// Hex-encoded 32-byte keyed-hash tag.
    pub tag: String,
}

/// Canonical, signable description of a saved composite artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub format_version: u32,
    pub artifact_name: String,
    pub skeleton_entry: String,
    /// Hex-encoded HMAC key. Confidentiality is not relied upon; see the crate's threat-model notes.
    pub hmac_key: String,
    pub hmac_algorithm: String,
    pub entries: Vec<EntryRecord>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Manifest {
    /// Byte-stable encoding used for both signing and verification.
    ///
    /// Round-trips through `serde_json::Value` (backed by a `BTreeMap` in this
    /// crate's default feature set) so object keys always come out sorted,
    /// without hand-rolling a field-by-field string builder.
    pub fn to_canonical_bytes(
        &self,
        include_signature: bool,
    ) -> Result<Vec<u8>, ManifestFormatError> {
        let mut manifest = self.clone();
        if !include_signature {
            manifest.signature = None;
        }
        manifest.entries.sort_by(|a, b| a.name.cmp(&b.name));

        let value = serde_json::to_value(&manifest)?;
        Ok(serde_json::to_vec(&value)?)
    }

    pub fn with_signature(mut self, signature: String) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Every field-level invariant from the manifest's build contract, checked
    /// independently of the signer/verifier and of entry-hash comparison.
    pub fn validate_structure(&self) -> Result<(), ManifestFormatError> {
        let mut seen_names = std::collections::HashSet::new();
        let mut seen_attributes = std::collections::HashSet::new();
        let mut skeleton_count = 0usize;

        for entry in &self.entries {
            if !seen_names.insert(entry.name.as_str()) {
                return Err(ManifestFormatError::InvalidField(format!(
                    "duplicate entry name: {}",
                    entry.name
                )));
            }
            match &entry.attribute {
                None => {
                    skeleton_count += 1;
                    if entry.name != self.skeleton_entry {
                        return Err(ManifestFormatError::InvalidField(format!(
                            "null-attribute entry {} does not match skeleton_entry {}",
                            entry.name, self.skeleton_entry
                        )));
                    }
                }
                Some(attr) => {
                    if !seen_attributes.insert(attr.as_str()) {
                        return Err(ManifestFormatError::InvalidField(format!(
                            "duplicate attribute name: {attr}"
                        )));
                    }
                }
            }
        }

        if skeleton_count != 1 {
            return Err(ManifestFormatError::InvalidField(format!(
                "expected exactly one skeleton entry, found {skeleton_count}"
            )));
        }

        Ok(())
    }
}
