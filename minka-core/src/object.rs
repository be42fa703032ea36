//! Dynamic object and object list wrappers.
use crate::{
    metadata::{ListMeta, ObjectMeta, TypeMeta},
    resource::ApiResource,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dynamic representation of a stored object.
///
/// The storage engine treats payloads as opaque: everything that is not
/// type or object metadata round-trips through [`DynamicObject::data`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DynamicObject {
    /// The type fields, not always present
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,

    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// All other keys (`spec`, `status`, …)
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl DynamicObject {
    /// Create a named object for a resource, with no payload
    #[must_use]
    pub fn new(name: &str, resource: &ApiResource) -> Self {
        Self {
            types: Some(TypeMeta {
                api_version: resource.api_version(),
                kind: resource.kind.clone(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach a payload
    #[must_use]
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Attach a namespace
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    /// The object name, or an empty string when unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The owning namespace, or an empty string for cluster-scoped objects
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    /// The server-assigned unique id, if the object has been persisted
    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    /// The revision this object was read at, if it has been persisted
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// The object's labels
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }
}

/// A generic object list, as returned by list queries.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectList<T>
where
    T: Clone,
{
    /// The type fields of the list itself
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,

    /// List metadata; carries the snapshot revision and continue token
    #[serde(default)]
    pub metadata: ListMeta,

    /// The objects in this page
    #[serde(bound(deserialize = "Vec<T>: Deserialize<'de>"))]
    pub items: Vec<T>,
}

impl<T: Clone> ObjectList<T> {
    /// Iterate over the elements of this list
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> IntoIterator for ObjectList<T> {
    type IntoIter = std::vec::IntoIter<Self::Item>;
    type Item = T;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T: Clone> IntoIterator for &'a ObjectList<T> {
    type IntoIter = std::slice::Iter<'a, T>;
    type Item = &'a T;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod test {
    use super::DynamicObject;
    use crate::resource::ApiResource;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn payload_roundtrip() {
        let widgets = ApiResource::namespaced("example.com", "v1", "Widget", "widgets");
        let obj = DynamicObject::new("w1", &widgets)
            .within("default")
            .data(json!({"spec": {"color": "blue"}}));
        let val = serde_json::to_value(&obj).unwrap();
        assert_json_eq!(
            val,
            json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": {"name": "w1", "namespace": "default"},
                "spec": {"color": "blue"}
            })
        );
        let back: DynamicObject = serde_json::from_value(val).unwrap();
        assert_eq!(back, obj);
    }

    #[test]
    fn accessors_default_to_empty() {
        let obj = DynamicObject {
            types: None,
            metadata: Default::default(),
            data: serde_json::Value::Null,
        };
        assert_eq!(obj.name(), "");
        assert_eq!(obj.namespace(), "");
        assert!(obj.resource_version().is_none());
    }
}
