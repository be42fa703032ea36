//! The row model of the revision log.
use crate::error::Result;
use minka_core::{DynamicObject, WatchEvent};
use sqlx::{any::AnyRow, Row};

/// One immutable row of a resource table: a single mutation of one object.
#[derive(Clone, Debug)]
pub(crate) struct Revision {
    /// Monotonic revision id; doubles as the object's resource version
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) uid: String,
    /// Id of the revision this one superseded; `None` for creates
    pub(crate) previous_id: Option<i64>,
    /// `Some(1)` on the first revision of a chain
    pub(crate) created: Option<i64>,
    /// Non-zero on deletion tombstones
    pub(crate) deleted: i64,
    /// The serialized object payload as of this revision
    pub(crate) value: String,
}

impl Revision {
    /// Decode a row produced by any statement selecting the revision columns
    pub(crate) fn from_row(row: &AnyRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            namespace: row.try_get("namespace")?,
            uid: row.try_get("uid")?,
            previous_id: row.try_get("previous_id")?,
            created: row.try_get("created")?,
            deleted: row.try_get("deleted")?,
            value: row.try_get("value")?,
        })
    }

    pub(crate) fn is_tombstone(&self) -> bool {
        self.deleted != 0
    }

    pub(crate) fn is_create(&self) -> bool {
        self.created == Some(1)
    }

    /// Parse the stored payload
    pub(crate) fn parse(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.value)?)
    }

    /// Hydrate the stored payload with this revision's id bound as the
    /// object's resource version
    pub(crate) fn object(&self) -> Result<DynamicObject> {
        crate::codec::decode(&self.value, self.id)
    }

    /// Classify this revision into its watch event type, consuming its
    /// already-parsed payload
    pub(crate) fn event(&self, value: serde_json::Value) -> Result<WatchEvent<DynamicObject>> {
        let object = crate::codec::decode_value(value, self.id)?;
        Ok(if self.is_tombstone() {
            WatchEvent::Deleted(object)
        } else if self.is_create() {
            WatchEvent::Added(object)
        } else {
            WatchEvent::Modified(object)
        })
    }
}

#[cfg(test)]
mod test {
    use super::Revision;
    use minka_core::WatchEvent;

    fn revision(created: Option<i64>, deleted: i64) -> Revision {
        Revision {
            id: 7,
            name: "w1".into(),
            namespace: "default".into(),
            uid: "u-1".into(),
            previous_id: created.is_none().then_some(6),
            created,
            deleted,
            value: r#"{"metadata":{"name":"w1","namespace":"default"}}"#.into(),
        }
    }

    fn event_of(rev: Revision) -> WatchEvent<minka_core::DynamicObject> {
        let value = rev.parse().unwrap();
        rev.event(value).unwrap()
    }

    #[test]
    fn classification() {
        assert!(matches!(event_of(revision(Some(1), 0)), WatchEvent::Added(_)));
        assert!(matches!(event_of(revision(None, 0)), WatchEvent::Modified(_)));
        assert!(matches!(event_of(revision(None, 1)), WatchEvent::Deleted(_)));
    }

    #[test]
    fn object_binds_resource_version() {
        let obj = revision(Some(1), 0).object().unwrap();
        assert_eq!(obj.resource_version(), Some("7"));
        assert_eq!(obj.name(), "w1");
    }
}
