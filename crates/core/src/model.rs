//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! `CompositeArtifact` — the trait application types implement to become
//! saveable/loadable, and the `Sentinel` type the skeleton uses to point at
//! bound attributes.

use crate::codec::AttributeValue;
use crate::error::ModelError;
use std::collections::BTreeMap;

/// Where one attribute's bytes live: which codec encoded them and what
/// entry name they were stored under. The skeleton carries one sentinel per
/// declared attribute in place of the attribute's live value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    pub attribute: String,
    pub codec: String,
    pub entry: String,
}

const SENTINEL_MARKER: &str = "__sentinel__";

impl Sentinel {
    fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            SENTINEL_MARKER: true,
            "attribute": self.attribute,
            "codec": self.codec,
            "entry": self.entry,
        })
    }

    fn from_value(attribute: &str, value: &serde_json::Value) -> Option<Sentinel> {
        let obj = value.as_object()?;
        if obj.get(SENTINEL_MARKER) != Some(&serde_json::Value::Bool(true)) {
            return None;
        }
        Some(Sentinel {
            attribute: attribute.to_string(),
            codec: obj.get("codec")?.as_str()?.to_string(),
            entry: obj.get("entry")?.as_str()?.to_string(),
        })
    }
}

/// Build the skeleton's JSON body: the artifact's stable name plus one
/// sentinel per declared attribute, keyed by attribute name. This is the
/// only shape the generic-object codec ever encodes for a skeleton entry —
/// the save/load pipelines build and parse it generically, without asking
/// the `CompositeArtifact` impl to do its own sentinel bookkeeping.
pub fn build_skeleton_value(
    artifact_name: &str,
    sentinels: &std::collections::BTreeMap<String, Sentinel>,
) -> serde_json::Value {
    let attributes: serde_json::Map<String, serde_json::Value> = sentinels
        .iter()
        .map(|(attr, sentinel)| (attr.clone(), sentinel.to_value()))
        .collect();
    serde_json::json!({
        "artifact_name": artifact_name,
        "attributes": serde_json::Value::Object(attributes),
    })
}

/// Inverse of `build_skeleton_value`. Any attribute value that is not a
/// well-formed sentinel, or any declared attribute missing from the
/// skeleton, is an integrity failure — callers should map a `None` result
/// per attribute to `IntegrityError::NotASentinel`.
pub fn parse_skeleton_value(
    value: &serde_json::Value,
) -> Option<(String, std::collections::BTreeMap<String, Sentinel>)> {
    let obj = value.as_object()?;
    let artifact_name = obj.get("artifact_name")?.as_str()?.to_string();
    let attributes = obj.get("attributes")?.as_object()?;
    let mut sentinels = std::collections::BTreeMap::new();
    for (attr, v) in attributes {
        let sentinel = Sentinel::from_value(attr, v)?;
        sentinels.insert(attr.clone(), sentinel);
    }
    Some((artifact_name, sentinels))
}

/// Types that can be decomposed into a signed, verifiable container.
///
/// Implementors declare a stable name (used as the manifest's
/// `artifact_name`) and an attribute map naming which codec should encode
/// each attribute. `vault-core` owns serialization via the codec registry;
/// this trait only owns *which* attributes exist and *how* to read them
/// back out of an `AttributeValue`.
pub trait CompositeArtifact: Sized {
    /// A name stable across versions of the artifact's schema, written into
    /// the manifest and checked again on load.
    fn artifact_name() -> &'static str;

    /// `attribute name -> (codec name, entry name)` for every attribute this
    /// artifact wants persisted. The entry name is the archive member name
    /// the attribute's bytes are stored under; it need not match the
    /// attribute name, and implementors are responsible for choosing entry
    /// names that don't collide with each other or with the skeleton entry.
    fn attribute_codecs() -> BTreeMap<String, (String, String)>;

    /// Produce the live value for one declared attribute, to be handed to
    /// its codec for encoding. Called once per attribute during save.
    fn attribute_value(&self, attribute: &str) -> Result<AttributeValue, ModelError>;

    /// Rebuild a full artifact from its decoded attribute values. Called
    /// once during load, after every entry's integrity tag and the
    /// skeleton have already been verified.
    fn from_attribute_values(
        values: BTreeMap<String, AttributeValue>,
    ) -> Result<Self, ModelError>;

    /// Optional post-load hook run after `from_attribute_values` succeeds,
    /// before the mandatory validation callback. Default is a no-op; use
    /// it for derived/cached fields that shouldn't be part of the signed
    /// payload.
    fn post_load_hook(&mut self) -> Result<(), ModelError> {
        Ok(())
    }

    /// Mandatory validation run as the last load step. Implementors that
    /// have nothing to check should still return `Ok(())` explicitly — the
    /// load pipeline always calls this, it is not optional to implement.
    fn validate(&self) -> Result<(), ModelError>;
}
