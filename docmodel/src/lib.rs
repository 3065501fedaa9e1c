//! Main docmodel crate: typed entity models and repositories over document stores.
//!
//! This crate is the primary entry point for users of docmodel. It re-exports the core
//! modules, the `Entity` derive macro and, behind the default `memory` feature, the
//! in-memory backend.
//!
//! # Features
//!
//! - **Variant schemas** - Each field declares how it is read, created, patched and sent
//!   over the wire, so store-assigned ids and server timestamps never leak into requests
//! - **Backend-neutral special types** - Timestamps, geo points and references convert to
//!   whatever the backend uses natively
//! - **Typed repositories** - CRUD, queries and live streams for one entity in one
//!   collection, each operation traced with `tracing`
//! - **Composable queries** - Filters, composites, ordering, cursors and limits
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
//! #[serde(rename_all = "camelCase")]
//! pub struct Post {
//!     #[field(field::generated(schema::id()))]
//!     pub id: Id<Post>,
//!     #[field(schema::string())]
//!     pub title: String,
//!     #[field(field::date_time_insert())]
//!     pub created_at: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> ModelResult<()> {
//!     let store = DocumentStore::from_builder(InMemoryStore::builder()).await?;
//!     let posts = store.repository::<Post>(RepositoryOptions::new("posts"))?;
//!
//!     let id = posts.add(&serde_json::json!({ "title": "Hello" })).await?;
//!     let post = posts.get(&id).await?;
//!
//!     let recent = posts
//!         .query(Query::order_by_desc("createdAt").add_limit(10))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Dynamic Dispatch
//!
//! [`DocumentStore::into_dyn`](store::DocumentStore::into_dyn) erases the backend type, for
//! code that picks its backend at runtime.
//!
//! ```ignore
//! let store: DynDocumentStore = DocumentStore::new(InMemoryStore::new()).into_dyn();
//! let posts = store.repository::<Post>(RepositoryOptions::new("posts"))?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing (requires the `memory`
//!   feature, on by default)

#[allow(unused_extern_crates)]
extern crate self as docmodel;

pub mod prelude;

pub use docmodel_core::{
    backend, codec, converter, entity, error, field, geo_point, id, query, reference,
    repository, schema, snapshot, store, stream, timestamp, value,
};
pub use docmodel_core::fields;
pub use docmodel_core::{
    repository::{Repository, RepositoryOptions},
    store::{DocumentStore, DynDocumentStore},
};
pub use docmodel_macros::Entity;

// Re-export serde_json, the application-side value type of every schema
pub use serde_json;

/// In-memory storage backend implementations.
///
/// This module is only available when the `memory` feature is enabled.
#[cfg(feature = "memory")]
pub mod memory {
    pub use docmodel_memory::{
        InMemoryStore, InMemoryStoreBuilder, MemoryGeoPoint, MemoryReference,
        MemoryServerTimestamp, MemoryTimestamp, native::native_as,
    };
}
