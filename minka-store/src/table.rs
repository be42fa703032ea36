//! Per-resource table descriptors shared by store, watchers and compactor.
use crate::{hub::Hub, templates::Templates};
use minka_core::ApiResource;
use tokio_util::sync::CancellationToken;

/// Declares how one resource kind is stored.
///
/// Indexed fields are dotted JSON paths into the serialized object; each
/// declared path gets a `field_*` column materialized on every write and is
/// eligible for SQL predicate push-down. Label keys are declared via
/// `metadata.labels.<key>` paths.
#[derive(Clone, Debug)]
pub struct TableDefinition {
    /// The kind this table stores
    pub resource: ApiResource,
    /// Dotted paths declared indexable
    pub indexed_fields: Vec<String>,
}

impl TableDefinition {
    /// Describe a table for a resource with no indexed fields
    pub fn new(resource: ApiResource) -> Self {
        Self {
            resource,
            indexed_fields: Vec::new(),
        }
    }

    /// Declare an additional indexable field path
    #[must_use]
    pub fn index_field(mut self, path: &str) -> Self {
        self.indexed_fields.push(path.to_string());
        self
    }

    /// The SQL table name for this kind, derived from plural and group
    pub fn table_name(&self) -> String {
        if self.resource.group.is_empty() {
            sanitize(&self.resource.plural)
        } else {
            sanitize(&format!("{}_{}", self.resource.plural, self.resource.group))
        }
    }

    /// Column names for the declared indexed fields, in declaration order
    pub(crate) fn field_columns(&self) -> Vec<String> {
        self.indexed_fields.iter().map(|p| column_for_path(p)).collect()
    }

    /// The `field_*` column backing a path, if the path is declared
    pub(crate) fn column_for(&self, path: &str) -> Option<String> {
        self.indexed_fields
            .iter()
            .any(|p| p == path)
            .then(|| column_for_path(path))
    }
}

/// The indexed column name for a dotted path
pub(crate) fn column_for_path(path: &str) -> String {
    format!("field_{}", sanitize(path))
}

/// Lowercase and replace everything outside `[a-z0-9_]` so the result is a
/// safe unquoted identifier fragment
fn sanitize(raw: &str) -> String {
    raw.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Shared runtime state for one opened table.
///
/// Handed out as an `Arc` so the revision store, watch sessions and the
/// compactor coordinate through the same notifier and templates without
/// pointing at each other.
#[derive(Debug)]
pub(crate) struct TableState {
    pub(crate) def: TableDefinition,
    pub(crate) templates: Templates,
    pub(crate) hub: Hub,
    /// Cancelled on destroy; stops the compactor and live watch sessions
    pub(crate) shutdown: CancellationToken,
}

#[cfg(test)]
mod test {
    use super::{column_for_path, TableDefinition};
    use minka_core::ApiResource;

    #[test]
    fn table_names_are_safe_identifiers() {
        let widgets = TableDefinition::new(ApiResource::namespaced(
            "example.com",
            "v1",
            "Widget",
            "widgets",
        ));
        assert_eq!(widgets.table_name(), "widgets_example_com");

        let pods = TableDefinition::new(ApiResource::namespaced("", "v1", "Pod", "pods"));
        assert_eq!(pods.table_name(), "pods");
    }

    #[test]
    fn field_columns_follow_declaration_order() {
        let def = TableDefinition::new(ApiResource::namespaced("example.com", "v1", "Widget", "widgets"))
            .index_field("status.phase")
            .index_field("metadata.labels.app");
        assert_eq!(
            def.field_columns(),
            vec!["field_status_phase", "field_metadata_labels_app"]
        );
        assert_eq!(def.column_for("status.phase").as_deref(), Some("field_status_phase"));
        assert_eq!(def.column_for("spec.color"), None);
        assert_eq!(column_for_path("metadata.labels.app"), "field_metadata_labels_app");
    }
}
