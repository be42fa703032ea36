//! Metadata structs persisted with every object.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type information that is flattened into every stored object
#[derive(Deserialize, Serialize, Clone, Default, Debug, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    /// The version of the API
    pub api_version: String,

    /// The name of the API
    pub kind: String,
}

impl TypeMeta {
    /// Construct a `TypeMeta` from an apiVersion and kind pair
    pub fn new(api_version: &str, kind: &str) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }
}

/// Metadata all persisted objects carry.
///
/// The storage engine owns `uid`, `resource_version`, `generation`,
/// `creation_timestamp` and `deletion_timestamp`; callers own the rest.
#[derive(Deserialize, Serialize, Clone, Default, Debug, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Name must be unique within a namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Optional prefix used by the server to generate a unique name when
    /// `name` is not provided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,

    /// The space within which each name must be unique.
    ///
    /// Empty for cluster-scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Unique in time and space value for this object.
    ///
    /// Set on creation, preserved across updates, reset on re-creation
    /// after a delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// An opaque value representing the internal version of this object.
    ///
    /// Clients must pass it back unmodified for optimistic concurrency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Sequence number representing a specific generation of the desired
    /// state; bumped only on non-status changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    /// Server time when this object was created (RFC 3339, UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Server time when a delete was accepted; present only on the payload
    /// of a deletion tombstone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Map of string keys and values used to organize and select objects
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Unstructured key value map stored with the object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Metadata returned with object lists
#[derive(Deserialize, Serialize, Clone, Default, Debug, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// The snapshot revision the list was served at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Opaque pagination token; present when the server has more results
    #[serde(rename = "continue", default, skip_serializing_if = "Option::is_none")]
    pub continue_: Option<String>,

    /// Number of items remaining after this page, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_item_count: Option<i64>,
}

#[cfg(test)]
mod test {
    use super::ObjectMeta;

    #[test]
    fn empty_meta_serializes_to_empty_object() {
        let meta = ObjectMeta::default();
        assert_eq!(serde_json::to_string(&meta).unwrap(), "{}");
    }

    #[test]
    fn meta_roundtrip() {
        let meta = ObjectMeta {
            name: Some("w1".into()),
            namespace: Some("default".into()),
            resource_version: Some("42".into()),
            labels: [("app".to_string(), "demo".to_string())].into(),
            ..ObjectMeta::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["resourceVersion"], "42");
        let back: ObjectMeta = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
