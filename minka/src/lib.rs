//! Kubernetes-style versioned object storage over SQL.
//!
//! minka persists namespaced, versioned objects as an immutable revision
//! log in a relational database and streams change notifications to
//! long-lived watchers, with optimistic concurrency, field-indexed list
//! queries, opaque pagination, and background compaction. PostgreSQL is
//! the production target; SQLite covers development and tests.
//!
//! # Example
//!
//! Open a database, register a kind, and exercise the storage contract:
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use minka::core::{ApiResource, DynamicObject, ListOptions};
//! use minka::store::{Factory, ResourceStore, DefaultStrategy, TableDefinition};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), minka::store::Error> {
//!     let factory = Factory::open("sqlite://:memory:").await?;
//!
//!     let widgets = ApiResource::namespaced("example.com", "v1", "Widget", "widgets");
//!     let def = TableDefinition::new(widgets.clone()).index_field("status.phase");
//!     let store = ResourceStore::new(factory.store(def).await?, DefaultStrategy);
//!
//!     let obj = DynamicObject::new("w1", &widgets)
//!         .within("default")
//!         .data(serde_json::json!({"spec": {"color": "blue"}}));
//!     let created = store.create(obj).await?;
//!     println!("created at revision {:?}", created.resource_version());
//!
//!     let mut events = store.watch("default", ListOptions::default()).await?;
//!     while let Some(event) = events.next().await {
//!         println!("{event:?}");
//!     }
//!     factory.destroy().await;
//!     Ok(())
//! }
//! ```

/// Client-less shared types: objects, metadata, options, selectors,
/// watch events and status-shaped errors
pub use minka_core as core;

/// The storage engine: factory, revision store, watch, compaction and the
/// strategy adapter
#[cfg(feature = "store")]
pub use minka_store as store;

pub use minka_core::{ApiResource, DynamicObject, ErrorResponse, ListOptions, ObjectList, WatchEvent};

#[cfg(feature = "store")]
pub use minka_store::{Factory, ResourceStore, Store, TableDefinition};
