//! Payload encoding and indexed field extraction.
//!
//! Objects persist as JSON text in the `value` column. The resource
//! version is never stored inside the payload (it is the row id); it is
//! stripped before writing and re-attached on every read.
use crate::{error::Result, table::TableDefinition};
use minka_core::{fields, DynamicObject};
use serde_json::Value;

/// Serialize an object for persistence.
///
/// Returns both the stored text and the parsed form (used for field
/// extraction and selector evaluation) to avoid re-parsing.
pub(crate) fn encode(obj: &DynamicObject) -> Result<(String, Value)> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("resourceVersion");
    }
    let text = serde_json::to_string(&value)?;
    Ok((text, value))
}

/// Deserialize a stored payload and bind `id` as its resource version
pub(crate) fn decode(text: &str, id: i64) -> Result<DynamicObject> {
    let mut obj: DynamicObject = serde_json::from_str(text)?;
    obj.metadata.resource_version = Some(id.to_string());
    Ok(obj)
}

/// Like [`decode`], for payloads already parsed (by selector evaluation)
pub(crate) fn decode_value(value: Value, id: i64) -> Result<DynamicObject> {
    let mut obj: DynamicObject = serde_json::from_value(value)?;
    obj.metadata.resource_version = Some(id.to_string());
    Ok(obj)
}

/// Materialize the declared indexed fields from a serialized payload, in
/// declaration order
pub(crate) fn extract_fields(value: &Value, def: &TableDefinition) -> Vec<Option<String>> {
    def.indexed_fields
        .iter()
        .map(|path| fields::extract(value, path))
        .collect()
}

/// The payload with the `status` subtree and server-owned metadata
/// removed; two revisions with equal projections carry the same desired
/// state
pub(crate) fn desired_state(value: &Value) -> Value {
    let mut projected = value.clone();
    if let Some(obj) = projected.as_object_mut() {
        obj.remove("status");
        obj.remove("metadata");
    }
    projected
}

/// Overlay only the `status` subtree of `incoming` onto `stored`,
/// leaving spec and metadata untouched
pub(crate) fn merge_status(stored: &Value, incoming: &Value) -> Value {
    let mut merged = stored.clone();
    if let Some(obj) = merged.as_object_mut() {
        match incoming.get("status") {
            Some(status) => {
                obj.insert("status".to_string(), status.clone());
            }
            None => {
                obj.remove("status");
            }
        }
    }
    merged
}
