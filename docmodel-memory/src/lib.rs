//! In-memory document store backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It is meant for tests, development and anything else that wants the full repository
//! behavior without a database.
//!
//! # Features
//!
//! - **Native special types** - Timestamps, geo points and references are stored as the
//!   store's own types, so codecs are exercised the way a real backend exercises them
//! - **Server timestamps** - Stamped from the store clock, which the builder can fix
//! - **Full query support** - Filters, composites, ordering, cursors and both limits
//! - **Live listeners** - Document and query subscriptions fed by every write
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{DocumentStore, RepositoryOptions, memory::InMemoryStore};
//!
//! let store = DocumentStore::from_builder(InMemoryStore::builder()).await?;
//! let posts = store.repository::<Post>(RepositoryOptions::new("posts"))?;
//!
//! let id = posts.add(&serde_json::json!({ "title": "Hello" })).await?;
//! let post = posts.get(&id).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod evaluator;
pub mod native;
pub mod store;

pub use native::{MemoryGeoPoint, MemoryReference, MemoryServerTimestamp, MemoryTimestamp};
pub use store::{InMemoryStore, InMemoryStoreBuilder};
