//! Types for the watch api.
//!
//! A watch is an ordered stream of these events; within one table the
//! stream is strictly increasing in resource version.
use crate::error::ErrorResponse;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Debug};

/// Annotation set on the bookmark that terminates the initial snapshot of
/// a list-watch session
pub const INITIAL_EVENTS_END_ANNOTATION: &str = "minka.dev/initial-events-end";

/// An event returned from a watch query
#[derive(Deserialize, Serialize, Clone)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent<K> {
    /// An object was added
    Added(K),
    /// An object was modified
    Modified(K),
    /// An object was deleted; the payload is the object as of deletion
    Deleted(K),
    /// A progress marker carrying only a resource version
    Bookmark(Bookmark),
    /// The watch failed; terminal
    Error(ErrorResponse),
}

impl<K> Debug for WatchEvent<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self {
            WatchEvent::Added(_) => write!(f, "Added event"),
            WatchEvent::Modified(_) => write!(f, "Modified event"),
            WatchEvent::Deleted(_) => write!(f, "Deleted event"),
            WatchEvent::Bookmark(_) => write!(f, "Bookmark event"),
            WatchEvent::Error(e) => write!(f, "Error event: {e:?}"),
        }
    }
}

/// Slimmed down object for [`WatchEvent::Bookmark`].
///
/// Can only be relied upon to have metadata with a resource version.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bookmark {
    /// Basically empty metadata
    pub metadata: BookmarkMeta,
}

/// Slimmed down metadata for [`WatchEvent::Bookmark`]
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkMeta {
    /// The revision the watch has caught up to
    pub resource_version: String,

    /// Bookmark annotations; see [`INITIAL_EVENTS_END_ANNOTATION`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Bookmark {
    /// A plain progress bookmark at a revision
    pub fn at(resource_version: i64) -> Self {
        Self {
            metadata: BookmarkMeta {
                resource_version: resource_version.to_string(),
                annotations: BTreeMap::new(),
            },
        }
    }

    /// The bookmark terminating the initial snapshot of a list-watch
    pub fn initial_events_end(resource_version: i64) -> Self {
        let mut bookmark = Self::at(resource_version);
        bookmark
            .metadata
            .annotations
            .insert(INITIAL_EVENTS_END_ANNOTATION.into(), "true".into());
        bookmark
    }

    /// Whether this bookmark marks the end of the initial snapshot
    pub fn is_initial_events_end(&self) -> bool {
        self.metadata
            .annotations
            .get(INITIAL_EVENTS_END_ANNOTATION)
            .is_some_and(|v| v == "true")
    }
}

#[cfg(test)]
mod test {
    use super::{Bookmark, WatchEvent};
    use serde_json::json;

    #[test]
    fn event_wire_form() {
        let ev: WatchEvent<serde_json::Value> = WatchEvent::Added(json!({"metadata": {"name": "w1"}}));
        let val = serde_json::to_value(&ev).unwrap();
        assert_eq!(val["type"], "ADDED");
        assert_eq!(val["object"]["metadata"]["name"], "w1");
    }

    #[test]
    fn bookmark_annotations() {
        let plain = Bookmark::at(7);
        assert!(!plain.is_initial_events_end());
        assert_eq!(plain.metadata.resource_version, "7");

        let end = Bookmark::initial_events_end(7);
        assert!(end.is_initial_events_end());
        let val = serde_json::to_value(&end).unwrap();
        assert_eq!(val["metadata"]["annotations"]["minka.dev/initial-events-end"], "true");
    }

    #[test]
    fn bookmark_event_roundtrip() {
        let ev: WatchEvent<serde_json::Value> = WatchEvent::Bookmark(Bookmark::at(42));
        let text = serde_json::to_string(&ev).unwrap();
        let back: WatchEvent<serde_json::Value> = serde_json::from_str(&text).unwrap();
        match back {
            WatchEvent::Bookmark(b) => assert_eq!(b.metadata.resource_version, "42"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
