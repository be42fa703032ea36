//! Shared types for the minka object store.
//!
//! This crate contains the client-less half of minka: the dynamic object
//! model, list/watch options, label and field selectors, watch event wire
//! types, and the status-shaped error responses the storage engine hands to
//! a REST layer. Nothing in here talks to a database.

pub mod error;
pub use error::{Error, ErrorResponse};

pub mod fields;
pub use fields::FieldSelector;

pub mod labels;
pub use labels::Selector;

pub mod metadata;
pub use metadata::{ListMeta, ObjectMeta, TypeMeta};

pub mod object;
pub use object::{DynamicObject, ObjectList};

pub mod params;
pub use params::{DeleteOptions, ListOptions, Preconditions, VersionMatch};

pub mod resource;
pub use resource::{ApiResource, Scope};

pub mod watch;
pub use watch::WatchEvent;

/// Convenient alias for `Result` with the crate error
pub type Result<T, E = Error> = std::result::Result<T, E>;
