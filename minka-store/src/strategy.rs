//! The REST-framework-shaped layer over the revision store.
//!
//! A [`ResourceStore`] pairs a [`Store`] with a per-kind [`Strategy`]
//! (preparation and validation hooks) and a [`TableConvertor`] for
//! human-readable list output. The REST layer talks only to this type.
use crate::{
    error::{Error, Result},
    store::Store,
    watch::WatchStream,
};
use minka_core::{
    ApiResource, DeleteOptions, DynamicObject, ListOptions, ObjectList,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-kind preparation and validation hooks.
///
/// All methods default to no-ops; [`DefaultStrategy`] layers the usual
/// status-subresource behavior on top.
pub trait Strategy: Send + Sync + 'static {
    /// Mutate an incoming object before its first revision is written
    fn prepare_for_create(&self, _obj: &mut DynamicObject) {}

    /// Mutate an incoming object before a spec write, with the stored
    /// object in hand
    fn prepare_for_update(&self, _new: &mut DynamicObject, _old: &DynamicObject) {}

    /// Validate an object about to be created
    fn validate_create(&self, _obj: &DynamicObject) -> Result<()> {
        Ok(())
    }

    /// Validate an update against the stored object
    fn validate_update(&self, _new: &DynamicObject, _old: &DynamicObject) -> Result<()> {
        Ok(())
    }

    /// Validate that the stored object may be deleted
    fn validate_delete(&self, _obj: &DynamicObject) -> Result<()> {
        Ok(())
    }
}

/// Treats `status` as a server-owned subresource: cleared on create,
/// preserved across spec writes (status changes go through the status
/// endpoint).
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultStrategy;

impl Strategy for DefaultStrategy {
    fn prepare_for_create(&self, obj: &mut DynamicObject) {
        reset_status(obj);
    }

    fn prepare_for_update(&self, new: &mut DynamicObject, old: &DynamicObject) {
        carry_status(new, old);
    }
}

/// Remove the `status` subtree from an object's payload
pub fn reset_status(obj: &mut DynamicObject) {
    if let Some(map) = obj.data.as_object_mut() {
        map.remove("status");
    }
}

/// Overwrite an object's `status` subtree with the stored object's
pub fn carry_status(new: &mut DynamicObject, old: &DynamicObject) {
    let status = old.data.get("status").cloned();
    match (new.data.as_object_mut(), status) {
        (Some(map), Some(status)) => {
            map.insert("status".into(), status);
        }
        (Some(map), None) => {
            map.remove("status");
        }
        (None, Some(status)) => {
            new.data = serde_json::json!({ "status": status });
        }
        (None, None) => {}
    }
}

/// Validate an object name as a DNS-1123 subdomain
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Invalid("metadata.name is required".into()));
    }
    if name.len() > 253 {
        return Err(Error::Invalid(format!(
            "metadata.name {name:?} exceeds 253 characters"
        )));
    }
    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    };
    if !name.split('.').all(valid_label) {
        return Err(Error::Invalid(format!(
            "metadata.name {name:?} is not a valid DNS subdomain"
        )));
    }
    Ok(())
}

fn generated_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &suffix[..5])
}

/// A column of the human-readable table form
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableColumn {
    /// Column header
    pub name: String,
    /// Value type, e.g. `string` or `date`
    #[serde(rename = "type")]
    pub kind: String,
}

/// One rendered row of the human-readable table form
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableRow {
    /// Cell values, one per column
    pub cells: Vec<String>,
}

/// The human-readable form of a list response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectTable {
    /// Column definitions
    pub columns: Vec<TableColumn>,
    /// One row per object
    pub rows: Vec<TableRow>,
}

/// Renders objects into table rows for human-readable get/list responses
pub trait TableConvertor: Send + Sync {
    /// The columns this convertor produces
    fn columns(&self) -> Vec<TableColumn>;
    /// Render one object into cells matching [`TableConvertor::columns`]
    fn row(&self, obj: &DynamicObject) -> TableRow;
}

/// Name and creation time, the columns every kind has
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultTableConvertor;

impl TableConvertor for DefaultTableConvertor {
    fn columns(&self) -> Vec<TableColumn> {
        vec![
            TableColumn {
                name: "Name".into(),
                kind: "string".into(),
            },
            TableColumn {
                name: "Created".into(),
                kind: "date".into(),
            },
        ]
    }

    fn row(&self, obj: &DynamicObject) -> TableRow {
        let created = obj
            .metadata
            .creation_timestamp
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();
        TableRow {
            cells: vec![obj.name().to_string(), created],
        }
    }
}

/// The storage contract offered to the REST framework for one kind
pub struct ResourceStore<S = DefaultStrategy> {
    store: Store,
    strategy: S,
    convertor: Box<dyn TableConvertor>,
}

impl<S: Strategy> ResourceStore<S> {
    /// Wrap a store with a strategy and the default table convertor
    pub fn new(store: Store, strategy: S) -> Self {
        Self {
            store,
            strategy,
            convertor: Box::new(DefaultTableConvertor),
        }
    }

    /// Replace the table convertor
    #[must_use]
    pub fn with_table_convertor(mut self, convertor: Box<dyn TableConvertor>) -> Self {
        self.convertor = convertor;
        self
    }

    /// Type information for the served kind
    pub fn api_resource(&self) -> &ApiResource {
        self.store.resource()
    }

    /// Create a new object.
    ///
    /// Checks the object's type fields, resolves `generateName`, validates
    /// the name, runs the strategy's create hooks, then persists the first
    /// revision.
    pub async fn create(&self, mut obj: DynamicObject) -> Result<DynamicObject> {
        self.check_type(&obj)?;
        if obj.name().is_empty() {
            if let Some(prefix) = obj.metadata.generate_name.clone() {
                obj.metadata.name = Some(generated_name(&prefix));
            }
        }
        validate_name(obj.name())?;
        self.strategy.prepare_for_create(&mut obj);
        self.strategy.validate_create(&obj)?;
        self.store.create(obj).await
    }

    /// Fetch the current revision of an object
    pub async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject> {
        self.store.get(namespace, name).await
    }

    /// List objects; namespaced kinds listed without a namespace span all
    /// namespaces
    pub async fn list(&self, namespace: &str, opts: &ListOptions) -> Result<ObjectList<DynamicObject>> {
        self.store.list(namespace, &self.project(namespace, opts)).await
    }

    /// Update the spec of an object through the strategy's update hooks
    pub async fn update(&self, mut obj: DynamicObject) -> Result<DynamicObject> {
        self.check_type(&obj)?;
        let old = self.store.get(obj.namespace(), obj.name()).await?;
        self.strategy.prepare_for_update(&mut obj, &old);
        self.strategy.validate_update(&obj, &old)?;
        self.store.update(obj).await
    }

    /// Update only the status subtree of an object
    pub async fn update_status(&self, obj: DynamicObject) -> Result<DynamicObject> {
        self.check_type(&obj)?;
        let old = self.store.get(obj.namespace(), obj.name()).await?;
        self.strategy.validate_update(&obj, &old)?;
        self.store.update_status(obj).await
    }

    /// Delete an object, returning its pre-delete revision
    pub async fn delete(
        &self,
        namespace: &str,
        name: &str,
        opts: &DeleteOptions,
    ) -> Result<DynamicObject> {
        let old = self.store.get(namespace, name).await?;
        self.strategy.validate_delete(&old)?;
        self.store.delete(namespace, name, opts).await
    }

    /// Stream changes; see [`Store::watch`]
    pub async fn watch(&self, namespace: &str, opts: ListOptions) -> Result<WatchStream> {
        let opts = self.project(namespace, &opts);
        self.store.watch(namespace, opts).await
    }

    /// Stop this kind's background tasks and live watch streams
    pub fn destroy(&self) {
        self.store.shutdown();
    }

    /// Render a list into its human-readable table form
    pub fn table(&self, list: &ObjectList<DynamicObject>) -> ObjectTable {
        ObjectTable {
            columns: self.convertor.columns(),
            rows: list.iter().map(|obj| self.convertor.row(obj)).collect(),
        }
    }

    fn project(&self, namespace: &str, opts: &ListOptions) -> ListOptions {
        let mut opts = opts.clone();
        if self.api_resource().is_namespaced() && namespace.is_empty() {
            opts.recursive = true;
        }
        opts
    }

    /// Reject writes whose type fields address a different resource.
    ///
    /// Untyped payloads pass; the stored object keeps whatever the caller
    /// sent.
    fn check_type(&self, obj: &DynamicObject) -> Result<()> {
        let Some(types) = &obj.types else {
            return Ok(());
        };
        let resource = self.api_resource();
        let accepted = resource
            .accepts(types)
            .map_err(|e| Error::Invalid(e.to_string()))?;
        if !accepted {
            return Err(Error::Invalid(format!(
                "object is a {} {}, this endpoint serves {} {}",
                types.api_version,
                types.kind,
                resource.api_version(),
                resource.kind
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{carry_status, reset_status, validate_name, DefaultTableConvertor, TableConvertor};
    use minka_core::DynamicObject;
    use serde_json::json;

    fn obj(data: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "metadata": {"name": "w1", "namespace": "default"},
        }))
        .map(|mut o: DynamicObject| {
            o.data = data;
            o
        })
        .unwrap()
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("w1").is_ok());
        assert!(validate_name("widget.example.com").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("Widget").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name(&"x".repeat(254)).is_err());
        assert!(validate_name("has space").is_err());
    }

    #[test]
    fn status_reset_and_carry() {
        let mut incoming = obj(json!({"spec": {"color": "red"}, "status": {"phase": "Guessed"}}));
        reset_status(&mut incoming);
        assert!(incoming.data.get("status").is_none());

        let stored = obj(json!({"spec": {"color": "blue"}, "status": {"phase": "Running"}}));
        let mut update = obj(json!({"spec": {"color": "red"}, "status": {"phase": "Forged"}}));
        carry_status(&mut update, &stored);
        assert_eq!(update.data["status"]["phase"], "Running");
        assert_eq!(update.data["spec"]["color"], "red");
    }

    #[test]
    fn default_table_rendering() {
        let convertor = DefaultTableConvertor;
        let columns = convertor.columns();
        assert_eq!(columns[0].name, "Name");
        let row = convertor.row(&obj(json!({})));
        assert_eq!(row.cells[0], "w1");
        assert_eq!(row.cells[1], "");
    }
}
