//! A backend-agnostic entity modeling and repository layer for document databases.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Raw values** ([`value`]) - The data exchanged with a backend, special types included
//! - **Special types** ([`timestamp`], [`geo_point`], [`reference`]) - Backend-neutral forms
//! - **Backend capability** ([`backend`], [`converter`]) - The seam every store implements
//! - **Codecs** ([`codec`]) - Conversions between native special types and application JSON
//! - **Schemas and fields** ([`schema`], [`field`]) - Per-variant field descriptors
//! - **Entities** ([`entity`], [`id`]) - Entity definitions, typed entities and branded ids
//! - **Queries** ([`query`]) - Backend-neutral filter, order, limit and cursor constraints
//! - **Repositories** ([`repository`], [`store`]) - Typed CRUD, query and stream operations
//! - **Subscriptions** ([`stream`]) - Cancellable live listeners
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel_core::{entity::EntityDefinition, field, schema};
//!
//! let post = EntityDefinition::builder("Post")
//!     .field("id", field::generated(schema::id()))
//!     .field("title", schema::string())
//!     .field("createdAt", field::date_time_insert())
//!     .build()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod codec;
pub mod converter;
pub mod entity;
pub mod error;
pub mod field;
pub mod geo_point;
pub mod id;
pub mod query;
pub mod reference;
pub mod repository;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod timestamp;
pub mod value;
