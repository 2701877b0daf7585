//
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//

//! Codec registry: a process-scoped, freeze-on-first-use `{name -> codec}`
//! map. Codecs are ordinary, swappable implementations of a narrow
//! stream-in/stream-out interface — none of them is privileged by the core
//! pipeline, including the one used to decode the skeleton.

use crate::error::{ConfigError, DecodeError};
use crate::stream::VerifiableStream;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// The value types the built-in codecs know how to move in and out of a
/// `VerifiableStream`. A real deployment would extend this with its own
/// variants (or its own `Codec` impls keyed to an external value type) —
/// the core pipeline never matches on this enum itself.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Schema-free structured data. Used for the skeleton itself.
    Object(serde_json::Value),
    /// A dense numeric array plus its shape.
    Tensor { shape: Vec<usize>, data: Vec<f32> },
    /// A row-oriented table.
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
    /// Small structured text, e.g. an embedded ground-truth probe set.
    Text(serde_json::Value),
}

/// A named stream-in/stream-out pair for one kind of attribute value.
///
/// `deserialize` must consume the entire stream; trailing bytes indicate a
/// corrupt entry and must fail with `DecodeError::TrailingBytes`, never be
/// silently ignored.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn serialize(
        &self,
        value: &AttributeValue,
        sink: &mut VerifiableStream,
    ) -> Result<(), DecodeError>;
    fn deserialize(&self, entry_name: &str, bytes: &[u8]) -> Result<AttributeValue, DecodeError>;
}

struct GenericObjectCodec;

impl Codec for GenericObjectCodec {
    fn name(&self) -> &'static str {
        "generic-object"
    }

    fn serialize(
        &self,
        value: &AttributeValue,
        sink: &mut VerifiableStream,
    ) -> Result<(), DecodeError> {
        let AttributeValue::Object(json) = value else {
            return Err(fail(self.name(), "<sink>", "expected Object value"));
        };
        let bytes = serde_json::to_vec(json)
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
        sink.write(&bytes)
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))
    }

    fn deserialize(&self, entry_name: &str, bytes: &[u8]) -> Result<AttributeValue, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| fail(self.name(), entry_name, &e.to_string()))?;
        Ok(AttributeValue::Object(value))
    }
}

struct TensorCodec;

impl Codec for TensorCodec {
    fn name(&self) -> &'static str {
        "tensor"
    }

    fn serialize(
        &self,
        value: &AttributeValue,
        sink: &mut VerifiableStream,
    ) -> Result<(), DecodeError> {
        let AttributeValue::Tensor { shape, data } = value else {
            return Err(fail(self.name(), "<sink>", "expected Tensor value"));
        };
        let bytes = bincode::serialize(&(shape, data))
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
        sink.write(&bytes)
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))
    }

    fn deserialize(&self, entry_name: &str, bytes: &[u8]) -> Result<AttributeValue, DecodeError> {
        let (shape, data): (Vec<usize>, Vec<f32>) = bincode::deserialize(bytes)
            .map_err(|e| fail(self.name(), entry_name, &e.to_string()))?;
        let consumed = bincode::serialized_size(&(shape.clone(), data.clone()))
            .map_err(|e| fail(self.name(), entry_name, &e.to_string()))?;
        if consumed != bytes.len() as u64 {
            return Err(DecodeError::TrailingBytes(entry_name.to_string()));
        }
        Ok(AttributeValue::Tensor { shape, data })
    }
}

struct TabularCodec;

impl Codec for TabularCodec {
    fn name(&self) -> &'static str {
        "tabular"
    }

    fn serialize(
        &self,
        value: &AttributeValue,
        sink: &mut VerifiableStream,
    ) -> Result<(), DecodeError> {
        let AttributeValue::Table { columns, rows } = value else {
            return Err(fail(self.name(), "<sink>", "expected Table value"));
        };
        let header = serde_json::to_vec(columns)
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
        sink.write(&header)
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
        sink.write(b"\n")
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
        for row in rows {
            let line = serde_json::to_vec(row)
                .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
            sink.write(&line)
                .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
            sink.write(b"\n")
                .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
        }
        Ok(())
    }

    fn deserialize(&self, entry_name: &str, bytes: &[u8]) -> Result<AttributeValue, DecodeError> {
        if bytes.last() != Some(&b'\n') && !bytes.is_empty() {
            return Err(DecodeError::TrailingBytes(entry_name.to_string()));
        }
        let mut lines = bytes.split(|&b| b == b'\n');
        let header_line = lines
            .next()
            .ok_or_else(|| fail(self.name(), entry_name, "missing column header"))?;
        let columns: Vec<String> = serde_json::from_slice(header_line)
            .map_err(|e| fail(self.name(), entry_name, &e.to_string()))?;

        let mut rows = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue; // trailing split artifact after the final newline
            }
            let row: Vec<serde_json::Value> = serde_json::from_slice(line)
                .map_err(|e| fail(self.name(), entry_name, &e.to_string()))?;
            rows.push(row);
        }
        Ok(AttributeValue::Table { columns, rows })
    }
}

struct TextStructuredCodec;

impl Codec for TextStructuredCodec {
    fn name(&self) -> &'static str {
        "text-structured"
    }

    fn serialize(
        &self,
        value: &AttributeValue,
        sink: &mut VerifiableStream,
    ) -> Result<(), DecodeError> {
        let AttributeValue::Text(json) = value else {
            return Err(fail(self.name(), "<sink>", "expected Text value"));
        };
        let bytes = serde_json::to_vec_pretty(json)
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))?;
        sink.write(&bytes)
            .map_err(|e| fail(self.name(), "<sink>", &e.to_string()))
    }

    fn deserialize(&self, entry_name: &str, bytes: &[u8]) -> Result<AttributeValue, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| fail(self.name(), entry_name, &e.to_string()))?;
        Ok(AttributeValue::Text(value))
    }
}

fn fail(codec: &str, entry: &str, reason: &str) -> DecodeError {
    DecodeError::Failed {
        codec: codec.to_string(),
        entry: entry.to_string(),
        reason: reason.to_string(),
    }
}

/// A process-scoped `{name -> codec}` map.
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// An empty registry, for callers who want full control over what gets
    /// registered (e.g. tests that only need one codec).
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// The reference registry: `generic-object`, `tensor`, `tabular`,
    /// `text-structured`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry
            .register(Arc::new(GenericObjectCodec))
            .expect("builtin codec names are fixed and registered once");
        registry
            .register(Arc::new(TensorCodec))
            .expect("builtin codec names are fixed and registered once");
        registry
            .register(Arc::new(TabularCodec))
            .expect("builtin codec names are fixed and registered once");
        registry
            .register(Arc::new(TextStructuredCodec))
            .expect("builtin codec names are fixed and registered once");
        registry
    }

    /// Register a codec. Duplicate names fail fast rather than silently
    /// shadowing an existing entry.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Result<(), ConfigError> {
        let name = codec.name().to_string();
        if self.codecs.contains_key(&name) {
            return Err(ConfigError::DuplicateCodec(name));
        }
        self.codecs.insert(name, codec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<CodecRegistry>> = OnceLock::new();

/// Install a custom registry before first use. Returns `ConfigError` if a
/// registry (custom or default) has already been installed — the registry
/// is frozen on first use, by design, to avoid process-wide mutable-state
/// hazards once a save or load is in flight.
pub fn install_registry(registry: CodecRegistry) -> Result<(), ConfigError> {
    GLOBAL_REGISTRY
        .set(Arc::new(registry))
        .map_err(|_| ConfigError::RegistryFrozen)
}

/// The process-wide codec registry, lazily defaulted to the built-ins on
/// first access if no custom registry was installed.
pub fn global_registry() -> Arc<CodecRegistry> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(CodecRegistry::with_builtins()))
        .clone()
}
