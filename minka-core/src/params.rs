//! Request options for list, watch and delete calls.
use crate::error::Error;
use serde::{Deserialize, Serialize};

/// How a requested resource version constrains a list snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum VersionMatch {
    /// Serve any state at least as fresh as the requested version
    NotOlderThan,
    /// Serve the state exactly as of the requested version
    Exact,
}

/// Common query options used in list and watch calls on collections
#[derive(Clone, Debug)]
pub struct ListOptions {
    /// A selector to restrict the returned objects by their labels.
    ///
    /// Defaults to everything if `None`.
    pub label_selector: Option<String>,

    /// A selector to restrict the returned objects by their fields.
    ///
    /// Defaults to everything if `None`.
    pub field_selector: Option<String>,

    /// Snapshot anchor: `None` or `"0"` means the latest committed state,
    /// anything else is an explicit revision
    pub resource_version: Option<String>,

    /// How `resource_version` constrains the snapshot
    pub version_match: Option<VersionMatch>,

    /// Limit the number of results per page.
    ///
    /// When more results exist the response carries a continue token.
    pub limit: Option<u32>,

    /// Opaque token from a previous page
    pub continue_token: Option<String>,

    /// Enables watch events with type `BOOKMARK`
    pub bookmarks: bool,

    /// Request the initial snapshot as `ADDED` events followed by a
    /// bookmark annotated as the end of initial events
    pub send_initial_events: bool,

    /// Emit periodic progress bookmarks during long quiet stretches
    pub progress_notify: bool,

    /// List across namespaces when the requested namespace is empty
    pub recursive: bool,

    /// Deadline in seconds for a watch session, regardless of activity.
    ///
    /// Unset means the session runs until the caller drops the stream.
    pub timeout: Option<u32>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            // bookmarks are backwards compatible and cheap to serve
            bookmarks: true,

            label_selector: None,
            field_selector: None,
            resource_version: None,
            version_match: None,
            limit: None,
            continue_token: None,
            send_initial_events: false,
            progress_notify: false,
            recursive: false,
            timeout: None,
        }
    }
}

impl ListOptions {
    /// Check the options for internal consistency
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(to) = &self.timeout {
            if *to >= 295 {
                return Err(Error::Validation("ListOptions::timeout must be < 295s".into()));
            }
        }
        if self.continue_token.is_some() && self.resource_version.is_some() {
            return Err(Error::Validation(
                "continue token and resourceVersion are mutually exclusive".into(),
            ));
        }
        if self.version_match == Some(VersionMatch::Exact) {
            match self.resource_version.as_deref() {
                None | Some("") | Some("0") => {
                    return Err(Error::Validation(
                        "resourceVersionMatch=Exact requires an explicit resourceVersion".into(),
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether the resource version requests the latest committed state
    pub fn wants_latest(&self) -> bool {
        matches!(self.resource_version.as_deref(), None | Some("") | Some("0"))
    }
}

/// Builder interface to [`ListOptions`]
impl ListOptions {
    /// Restrict the returned objects by their labels
    #[must_use]
    pub fn labels(mut self, label_selector: &str) -> Self {
        self.label_selector = Some(label_selector.to_string());
        self
    }

    /// Restrict the returned objects by their fields
    #[must_use]
    pub fn fields(mut self, field_selector: &str) -> Self {
        self.field_selector = Some(field_selector.to_string());
        self
    }

    /// Anchor the snapshot at a resource version
    #[must_use]
    pub fn at(mut self, resource_version: &str) -> Self {
        self.resource_version = Some(resource_version.to_string());
        self
    }

    /// Set how the resource version constrains the snapshot
    #[must_use]
    pub fn matching(mut self, version_match: VersionMatch) -> Self {
        self.version_match = Some(version_match);
        self
    }

    /// Set a result limit per page
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Continue a paginated list from a previous page's token
    #[must_use]
    pub fn continue_token(mut self, token: &str) -> Self {
        self.continue_token = Some(token.to_string());
        self
    }

    /// Disable watch bookmarks
    #[must_use]
    pub fn disable_bookmarks(mut self) -> Self {
        self.bookmarks = false;
        self
    }

    /// Request the initial snapshot as `ADDED` events plus terminator
    /// bookmark
    #[must_use]
    pub fn send_initial_events(mut self) -> Self {
        self.send_initial_events = true;
        self
    }

    /// Emit periodic progress bookmarks on quiet watches
    #[must_use]
    pub fn progress_notify(mut self) -> Self {
        self.progress_notify = true;
        self
    }

    /// List across namespaces when the requested namespace is empty
    #[must_use]
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Bound the watch session duration
    #[must_use]
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }
}

/// Conditions that must hold before a delete is carried out
#[derive(Default, Clone, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    /// The revision the caller believes is current
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// The uid the caller believes owns the key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Options for delete calls
#[derive(Default, Clone, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    /// Conditions that must be fulfilled before the tombstone is written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<Preconditions>,
}

impl DeleteOptions {
    /// Require the current revision to match before deleting
    #[must_use]
    pub fn at_version(resource_version: &str) -> Self {
        Self {
            preconditions: Some(Preconditions {
                resource_version: Some(resource_version.to_string()),
                uid: None,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ListOptions, VersionMatch};

    #[test]
    fn defaults_allow_bookmarks() {
        let opts = ListOptions::default();
        assert!(opts.bookmarks);
        assert!(opts.wants_latest());
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn exact_requires_explicit_version() {
        let opts = ListOptions::default().matching(VersionMatch::Exact);
        assert!(opts.validate().is_err());
        let opts = ListOptions::default().at("0").matching(VersionMatch::Exact);
        assert!(opts.validate().is_err());
        let opts = ListOptions::default().at("42").matching(VersionMatch::Exact);
        assert!(opts.validate().is_ok());
        assert!(!opts.wants_latest());
    }

    #[test]
    fn continue_excludes_resource_version() {
        let opts = ListOptions::default().at("42").continue_token("abc");
        assert!(opts.validate().is_err());
    }

    #[test]
    fn watch_timeout_bounds() {
        assert!(ListOptions::default().timeout(290).validate().is_ok());
        assert!(ListOptions::default().timeout(295).validate().is_err());
    }
}
