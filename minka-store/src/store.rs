//! The log-structured revision store for one resource kind.
//!
//! Every mutation of an object becomes an immutable row; the row id is the
//! object's resource version. Writes run in a single transaction that
//! re-reads the key's newest revision, inserts the new row, and commits;
//! the unique index on `previous_id` makes concurrent writers collide so
//! the loser observes a conflict. The watch hub is signalled only after a
//! successful commit.
use crate::{
    codec,
    error::{Error, Result},
    factory::FactoryConfig,
    revision::Revision,
    table::TableState,
    templates::{redact, InsertRow, Predicates, Sql},
    watch::{self, WatchStart, WatchStream},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use minka_core::{
    labels::Expression, params::VersionMatch, DeleteOptions, DynamicObject, FieldSelector,
    ListMeta, ListOptions, ObjectList, Selector, TypeMeta,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{any::AnyRow, Any, AnyPool, Executor, Row};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, trace};
use uuid::Uuid;

/// Storage handle for one resource kind.
///
/// Cheap to clone; all clones share the table state and connection pool.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: AnyPool,
    pub(crate) table: Arc<TableState>,
    pub(crate) config: Arc<FactoryConfig>,
}

impl Store {
    pub(crate) fn new(pool: AnyPool, table: Arc<TableState>, config: Arc<FactoryConfig>) -> Self {
        Self { pool, table, config }
    }

    /// The resource this store persists
    pub fn resource(&self) -> &minka_core::ApiResource {
        &self.table.def.resource
    }

    fn plural(&self) -> &str {
        &self.table.def.resource.plural
    }

    /// Stop this table's background tasks (compactor and watch sessions)
    pub fn shutdown(&self) {
        self.table.shutdown.cancel();
    }

    fn check_scope(&self, namespace: &str) -> Result<()> {
        let resource = &self.table.def.resource;
        if resource.is_namespaced() && namespace.is_empty() {
            return Err(Error::Invalid(format!(
                "a namespace is required for namespaced kind {}",
                resource.kind
            )));
        }
        if !resource.is_namespaced() && !namespace.is_empty() {
            return Err(Error::Invalid(format!(
                "kind {} is cluster-scoped and cannot be namespaced",
                resource.kind
            )));
        }
        Ok(())
    }

    // --- writes ---

    /// Persist the first revision of a new object.
    ///
    /// Assigns a fresh uid when absent, stamps the creation timestamp, and
    /// fails `AlreadyExists` when a live current revision holds the key.
    pub async fn create(&self, mut obj: DynamicObject) -> Result<DynamicObject> {
        let name = obj.name().to_string();
        if name.is_empty() {
            return Err(Error::Invalid("metadata.name is required".into()));
        }
        if obj.resource_version().is_some_and(|rv| !rv.is_empty()) {
            return Err(Error::Invalid(
                "resourceVersion must be empty on create".into(),
            ));
        }
        self.check_scope(obj.namespace())?;
        let namespace = obj.namespace().to_string();

        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(Uuid::new_v4().to_string());
        }
        if obj.metadata.creation_timestamp.is_none() {
            obj.metadata.creation_timestamp = Some(Utc::now());
        }
        obj.metadata.generation.get_or_insert(1);
        obj.metadata.deletion_timestamp = None;
        let uid = obj.metadata.uid.clone().unwrap_or_default();

        let (text, value) = codec::encode(&obj)?;
        let fields = codec::extract_fields(&value, &self.table.def);

        let mut tx = self.pool.begin().await?;
        let latest = self.latest(&mut *tx, &namespace, &name, true).await?;
        if latest.as_ref().is_some_and(|r| !r.is_tombstone()) {
            return Err(Error::AlreadyExists {
                kind: self.plural().into(),
                name,
            });
        }
        let sql = self.table.templates.insert_if_absent(InsertRow {
            name: name.clone(),
            namespace: namespace.clone(),
            uid,
            previous_id: None,
            created: Some(1),
            deleted: 0,
            value: text.clone(),
            fields,
        });
        // zero rows means another create won the race after our read
        let Some(row) = fetch_optional(&mut *tx, &sql).await? else {
            return Err(Error::AlreadyExists {
                kind: self.plural().into(),
                name,
            });
        };
        let id: i64 = row.try_get("id").map_err(Error::Database)?;
        tx.commit().await?;
        self.table.hub.broadcast();
        debug!(table = %self.table.def.table_name(), %name, %namespace, id, "created");
        codec::decode(&text, id)
    }

    /// Replace the current revision of an object, checked against its
    /// claimed resource version
    pub async fn update(&self, obj: DynamicObject) -> Result<DynamicObject> {
        self.write_next(obj, false).await
    }

    /// Like [`Store::update`] but only the `status` subtree of the payload
    /// is taken from the caller; spec and metadata stay as stored
    pub async fn update_status(&self, obj: DynamicObject) -> Result<DynamicObject> {
        self.write_next(obj, true).await
    }

    async fn write_next(&self, mut obj: DynamicObject, status_only: bool) -> Result<DynamicObject> {
        let name = obj.name().to_string();
        if name.is_empty() {
            return Err(Error::Invalid("metadata.name is required".into()));
        }
        self.check_scope(obj.namespace())?;
        let namespace = obj.namespace().to_string();
        let claimed = parse_resource_version(obj.resource_version())?;

        let mut tx = self.pool.begin().await?;
        let latest = self.latest(&mut *tx, &namespace, &name, true).await?;
        let Some(current) = latest.filter(|r| !r.is_tombstone()) else {
            return Err(Error::NotFound {
                kind: self.plural().into(),
                name,
            });
        };
        if current.id != claimed {
            return Err(Error::Conflict(format!(
                "resourceVersion {claimed} does not match current revision {}",
                current.id
            )));
        }

        let stored = current.parse()?;
        let (text, value) = if status_only {
            let incoming = serde_json::to_value(&obj)?;
            let merged = codec::merge_status(&stored, &incoming);
            (serde_json::to_string(&merged)?, merged)
        } else {
            let old = codec::decode(&current.value, current.id)?;
            obj.metadata.uid = Some(current.uid.clone());
            obj.metadata.creation_timestamp = old.metadata.creation_timestamp;
            obj.metadata.deletion_timestamp = None;
            let generation = old.metadata.generation.unwrap_or(1);
            obj.metadata.generation = Some(generation);
            let (_, provisional) = codec::encode(&obj)?;
            if codec::desired_state(&provisional) != codec::desired_state(&stored) {
                obj.metadata.generation = Some(generation + 1);
            }
            codec::encode(&obj)?
        };
        let fields = codec::extract_fields(&value, &self.table.def);

        let sql = self.table.templates.insert(InsertRow {
            name: name.clone(),
            namespace: namespace.clone(),
            uid: current.uid.clone(),
            previous_id: Some(current.id),
            created: None,
            deleted: 0,
            value: text.clone(),
            fields,
        });
        let id = self.insert_next(&mut tx, &sql, current.id).await?;
        tx.commit().await?;
        self.table.hub.broadcast();
        debug!(table = %self.table.def.table_name(), %name, %namespace, id, status_only, "updated");
        codec::decode(&text, id)
    }

    /// Write a deletion tombstone for the current revision and return the
    /// pre-delete object
    pub async fn delete(
        &self,
        namespace: &str,
        name: &str,
        opts: &DeleteOptions,
    ) -> Result<DynamicObject> {
        self.check_scope(namespace)?;
        let mut tx = self.pool.begin().await?;
        let latest = self.latest(&mut *tx, namespace, name, true).await?;
        let Some(current) = latest.filter(|r| !r.is_tombstone()) else {
            return Err(Error::NotFound {
                kind: self.plural().into(),
                name: name.into(),
            });
        };
        if let Some(preconditions) = &opts.preconditions {
            if let Some(rv) = preconditions
                .resource_version
                .as_deref()
                .filter(|rv| !rv.is_empty())
            {
                let claimed = parse_resource_version(Some(rv))?;
                if current.id != claimed {
                    return Err(Error::Conflict(format!(
                        "resourceVersion {claimed} does not match current revision {}",
                        current.id
                    )));
                }
            }
            if let Some(uid) = &preconditions.uid {
                if uid != &current.uid {
                    return Err(Error::Conflict(format!(
                        "uid {uid} does not match object uid {}",
                        current.uid
                    )));
                }
            }
        }

        let prior = codec::decode(&current.value, current.id)?;
        let mut tombstone = prior.clone();
        tombstone.metadata.deletion_timestamp = Some(Utc::now());
        let (text, value) = codec::encode(&tombstone)?;
        let fields = codec::extract_fields(&value, &self.table.def);

        let sql = self.table.templates.insert(InsertRow {
            name: name.into(),
            namespace: namespace.into(),
            uid: current.uid.clone(),
            previous_id: Some(current.id),
            created: None,
            deleted: 1,
            value: text,
            fields,
        });
        let id = self.insert_next(&mut tx, &sql, current.id).await?;
        tx.commit().await?;
        self.table.hub.broadcast();
        debug!(table = %self.table.def.table_name(), %name, %namespace, id, "deleted");
        Ok(prior)
    }

    /// Execute a successor insert, mapping a `previous_id` unique
    /// violation to the conflict the losing writer should observe
    async fn insert_next(
        &self,
        tx: &mut sqlx::Transaction<'_, Any>,
        sql: &Sql,
        previous: i64,
    ) -> Result<i64> {
        trace!(sql = %redact(&sql.text), "executing");
        match sql.query().fetch_one(&mut **tx).await {
            Ok(row) => row.try_get("id").map_err(Error::Database),
            Err(err) if Error::is_unique_violation(&err) => Err(Error::Conflict(format!(
                "revision {previous} was concurrently superseded"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    // --- reads ---

    /// The current live revision for a key, or `NotFound`.
    ///
    /// Tombstones are never returned.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject> {
        self.check_scope(namespace)?;
        let sql = self.table.templates.latest(namespace, name, false);
        let row = fetch_optional(&self.pool, &sql).await?;
        match row.map(|r| Revision::from_row(&r)).transpose()? {
            Some(rev) if !rev.is_tombstone() => rev.object(),
            _ => Err(Error::NotFound {
                kind: self.plural().into(),
                name: name.into(),
            }),
        }
    }

    /// List current live revisions at a consistent snapshot.
    ///
    /// See [`ListOptions`] for snapshot anchoring, selectors and paging.
    pub async fn list(
        &self,
        namespace: &str,
        opts: &ListOptions,
    ) -> Result<ObjectList<DynamicObject>> {
        opts.validate()?;
        let filter = Filter::parse(namespace, opts)?;
        let predicates = filter.predicates(&self.table);

        let mut after: Option<(String, String)> = None;
        let snapshot = if let Some(token) = &opts.continue_token {
            let token = ContinueToken::decode(token)?;
            if token.resource_version <= self.watermark().await? {
                return Err(Error::Expired(token.resource_version));
            }
            after = Some((token.namespace, token.name));
            token.resource_version
        } else if opts.wants_latest() {
            self.snapshot_id().await?
        } else {
            let requested = parse_resource_version(opts.resource_version.as_deref())?;
            let latest = self.snapshot_id().await?;
            if latest < requested {
                return Err(Error::Timeout(format!(
                    "resource version {requested} has not been committed yet"
                )));
            }
            match opts.version_match {
                Some(VersionMatch::Exact) => {
                    if requested <= self.watermark().await? {
                        return Err(Error::Expired(requested));
                    }
                    requested
                }
                _ => latest,
            }
        };

        let mut items = Vec::new();
        let mut continue_token = None;
        match opts.limit {
            Some(limit) if limit > 0 => {
                let limit = limit as usize;
                let after = after.as_ref().map(|(ns, n)| (ns.as_str(), n.as_str()));
                let rows = self
                    .current_page(snapshot, &predicates, after, limit as i64 + 1)
                    .await?;
                let has_more = rows.len() > limit;
                let page = &rows[..rows.len().min(limit)];
                for rev in page {
                    let value = rev.parse()?;
                    if filter.matches(&value) {
                        items.push(codec::decode_value(value, rev.id)?);
                    }
                }
                if has_more {
                    if let Some(last) = page.last() {
                        continue_token = Some(
                            ContinueToken {
                                resource_version: snapshot,
                                namespace: last.namespace.clone(),
                                name: last.name.clone(),
                            }
                            .encode()?,
                        );
                    }
                }
            }
            _ => {
                let batch = self.config.watch_batch as i64;
                loop {
                    let after_ref = after.as_ref().map(|(ns, n)| (ns.as_str(), n.as_str()));
                    let rows = self
                        .current_page(snapshot, &predicates, after_ref, batch)
                        .await?;
                    let exhausted = (rows.len() as i64) < batch;
                    for rev in &rows {
                        let value = rev.parse()?;
                        if filter.matches(&value) {
                            items.push(codec::decode_value(value, rev.id)?);
                        }
                    }
                    if exhausted {
                        break;
                    }
                    after = rows.last().map(|r| (r.namespace.clone(), r.name.clone()));
                }
            }
        }

        let resource = &self.table.def.resource;
        Ok(ObjectList {
            types: Some(TypeMeta {
                api_version: resource.api_version(),
                kind: format!("{}List", resource.kind),
            }),
            metadata: ListMeta {
                resource_version: Some(snapshot.to_string()),
                continue_: continue_token,
                remaining_item_count: None,
            },
            items,
        })
    }

    /// Stream changes for this kind.
    ///
    /// With an empty (or `"0"`) resource version the stream opens with the
    /// current state as `ADDED` events; an explicit resource version resumes
    /// strictly after it, failing `Expired` when it predates the watermark.
    pub async fn watch(&self, namespace: &str, opts: ListOptions) -> Result<WatchStream> {
        opts.validate()?;
        let filter = Filter::parse(namespace, &opts)?;
        let start = if opts.wants_latest() {
            WatchStart::Snapshot
        } else {
            let requested = parse_resource_version(opts.resource_version.as_deref())?;
            if requested < self.watermark().await? {
                return Err(Error::Expired(requested));
            }
            WatchStart::Cursor(requested)
        };
        Ok(watch::spawn(self.clone(), filter, opts, start))
    }

    // --- internals shared with watch sessions and the compactor ---

    pub(crate) async fn latest<'a, E>(
        &self,
        executor: E,
        namespace: &str,
        name: &str,
        lock: bool,
    ) -> Result<Option<Revision>>
    where
        E: Executor<'a, Database = Any>,
    {
        let sql = self.table.templates.latest(namespace, name, lock);
        let row = fetch_optional(executor, &sql).await?;
        row.map(|r| Revision::from_row(&r)).transpose()
    }

    /// The highest assigned revision id; the snapshot anchor for fresh
    /// lists and watches
    pub(crate) async fn snapshot_id(&self) -> Result<i64> {
        let sql = self.table.templates.max_id();
        let row = sql.query().fetch_one(&self.pool).await.map_err(Error::from)?;
        row.try_get("id").map_err(Error::Database)
    }

    /// Run one compaction cycle immediately, returning the published
    /// watermark.
    ///
    /// The periodic background task does exactly this on its interval;
    /// this entry point exists for admin surfaces and tests.
    pub async fn compact(&self) -> Result<i64> {
        crate::compact::compact_once(&self.pool, &self.table).await
    }

    /// The compaction watermark for this table (0 when never compacted)
    pub async fn watermark(&self) -> Result<i64> {
        let sql = self.table.templates.watermark_get();
        let row = fetch_optional(&self.pool, &sql).await?;
        match row {
            Some(row) => row.try_get("id").map_err(Error::Database),
            None => Ok(0),
        }
    }

    pub(crate) async fn current_page(
        &self,
        snapshot: i64,
        predicates: &Predicates,
        after: Option<(&str, &str)>,
        limit: i64,
    ) -> Result<Vec<Revision>> {
        let sql = self
            .table
            .templates
            .select_current(snapshot, predicates, after, limit);
        let rows = fetch_all(&self.pool, &sql).await?;
        rows.iter().map(Revision::from_row).collect()
    }

    /// Revisions committed strictly after `cursor`, in id order
    pub(crate) async fn since(
        &self,
        cursor: i64,
        predicates: &Predicates,
        limit: i64,
    ) -> Result<Vec<Revision>> {
        let sql = self.table.templates.select_since(cursor, predicates, limit);
        let rows = fetch_all(&self.pool, &sql).await?;
        rows.iter().map(Revision::from_row).collect()
    }
}

fn parse_resource_version(rv: Option<&str>) -> Result<i64> {
    let rv = rv
        .filter(|rv| !rv.is_empty())
        .ok_or_else(|| Error::Invalid("resourceVersion is required".into()))?;
    rv.parse::<i64>()
        .map_err(|_| Error::Invalid(format!("resourceVersion {rv:?} is not numeric")))
}

pub(crate) async fn fetch_optional<'a, E>(executor: E, sql: &Sql) -> Result<Option<AnyRow>>
where
    E: Executor<'a, Database = Any>,
{
    trace!(sql = %redact(&sql.text), "executing");
    sql.query().fetch_optional(executor).await.map_err(Error::from)
}

pub(crate) async fn fetch_all<'a, E>(executor: E, sql: &Sql) -> Result<Vec<AnyRow>>
where
    E: Executor<'a, Database = Any>,
{
    trace!(sql = %redact(&sql.text), "executing");
    sql.query().fetch_all(executor).await.map_err(Error::from)
}

/// The fully parsed selector set of a list or watch call
#[derive(Clone, Debug)]
pub(crate) struct Filter {
    /// SQL namespace restriction; `None` spans namespaces
    namespace: Option<String>,
    labels: Selector,
    fields: FieldSelector,
}

impl Filter {
    pub(crate) fn parse(namespace: &str, opts: &ListOptions) -> Result<Self> {
        let labels: Selector = opts
            .label_selector
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|e: minka_core::labels::ParseExpressionError| Error::Invalid(e.to_string()))?;
        let fields: FieldSelector = opts
            .field_selector
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|e: minka_core::fields::ParseFieldError| Error::Invalid(e.to_string()))?;
        let namespace = if !namespace.is_empty() {
            Some(namespace.to_string())
        } else if opts.recursive {
            None
        } else {
            Some(String::new())
        };
        Ok(Self {
            namespace,
            labels,
            fields,
        })
    }

    /// Compile the indexed subset of the selectors into SQL predicates.
    ///
    /// Push-down is an optimization only; [`Filter::matches`] re-evaluates
    /// the full selector set in-process.
    pub(crate) fn predicates(&self, table: &TableState) -> Predicates {
        let def = &table.def;
        let mut fields = Vec::new();
        for req in self.fields.iter() {
            if req.operator == minka_core::fields::FieldOperator::Equal {
                if let Some(column) = def.column_for(&req.path) {
                    fields.push((column, req.value.clone()));
                }
            }
        }
        for expr in self.labels.iter() {
            if let Expression::Equal(key, value) = expr {
                if let Some(column) = def.column_for(&format!("metadata.labels.{key}")) {
                    fields.push((column, value.clone()));
                }
            }
        }
        Predicates {
            namespace: self.namespace.clone(),
            fields,
        }
    }

    /// Evaluate every selector against a serialized payload
    pub(crate) fn matches(&self, value: &Value) -> bool {
        if !self.fields.matches(value) {
            return false;
        }
        if self.labels.selects_all() {
            return true;
        }
        let labels: BTreeMap<String, String> = value
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(|l| serde_json::from_value(l.clone()).ok())
            .unwrap_or_default();
        self.labels.matches(&labels)
    }
}

/// The opaque pagination cursor: the page's snapshot plus the last key
/// returned, so successive pages form one consistent cut
#[derive(Debug, Serialize, Deserialize)]
struct ContinueToken {
    #[serde(rename = "rv")]
    resource_version: i64,
    #[serde(rename = "ns")]
    namespace: String,
    name: String,
}

impl ContinueToken {
    fn encode(&self) -> Result<String> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    fn decode(token: &str) -> Result<Self> {
        let raw = BASE64
            .decode(token)
            .map_err(|_| Error::Invalid("malformed continue token".into()))?;
        serde_json::from_slice(&raw).map_err(|_| Error::Invalid("malformed continue token".into()))
    }
}

#[cfg(test)]
mod test {
    use super::{parse_resource_version, ContinueToken, Filter};
    use crate::error::Error;
    use minka_core::ListOptions;
    use serde_json::json;

    #[test]
    fn continue_token_roundtrip() {
        let token = ContinueToken {
            resource_version: 42,
            namespace: "default".into(),
            name: "w199".into(),
        };
        let encoded = token.encode().unwrap();
        let decoded = ContinueToken::decode(&encoded).unwrap();
        assert_eq!(decoded.resource_version, 42);
        assert_eq!(decoded.name, "w199");
        assert!(matches!(
            ContinueToken::decode("not base64!").unwrap_err(),
            Error::Invalid(_)
        ));
    }

    #[test]
    fn resource_version_parsing() {
        assert_eq!(parse_resource_version(Some("42")).unwrap(), 42);
        assert!(parse_resource_version(Some("")).is_err());
        assert!(parse_resource_version(None).is_err());
        assert!(parse_resource_version(Some("abc")).is_err());
    }

    #[test]
    fn filter_namespace_projection() {
        let filter = Filter::parse("default", &ListOptions::default()).unwrap();
        assert_eq!(filter.namespace.as_deref(), Some("default"));

        // empty namespace without recursive pins to the cluster scope
        let filter = Filter::parse("", &ListOptions::default()).unwrap();
        assert_eq!(filter.namespace.as_deref(), Some(""));

        let filter = Filter::parse("", &ListOptions::default().recursive()).unwrap();
        assert_eq!(filter.namespace, None);
    }

    #[test]
    fn filter_matches_labels_and_fields() {
        let opts = ListOptions::default()
            .labels("app=web")
            .fields("status.phase=Running");
        let filter = Filter::parse("", &opts).unwrap();
        let matching = json!({
            "metadata": {"labels": {"app": "web"}},
            "status": {"phase": "Running"}
        });
        let wrong_label = json!({
            "metadata": {"labels": {"app": "db"}},
            "status": {"phase": "Running"}
        });
        assert!(filter.matches(&matching));
        assert!(!filter.matches(&wrong_label));
    }
}
