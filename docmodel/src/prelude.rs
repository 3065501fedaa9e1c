//! Convenient re-exports of commonly used types from docmodel.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - Entity traits, the derive macro and branded ids
//! - The `field`, `schema` and `codec` modules used in `#[field(...)]` attributes
//! - Stores, repositories and backend traits
//! - Query construction
//! - Values, special types and error types

pub use docmodel_core::{
    backend::{SetOptions, SnapshotOptions, StoreBackend, StoreBackendBuilder},
    codec,
    entity::{Entity, EntityDefinition, EntityExt},
    error::{ModelError, ModelResult, ParseError, StoreError},
    field::{self, Field, Variant},
    fields,
    geo_point::GeoPoint,
    id::Id,
    query::{Direction, Query, QueryConstraint, WhereOp},
    reference::Reference,
    repository::{Repository, RepositoryOptions},
    schema::{self, Schema, SchemaRef},
    snapshot::Snapshot,
    store::{DocumentStore, DynDocumentStore},
    timestamp::Timestamp,
    value::{Fields, Json, Value},
};
pub use docmodel_macros::Entity;
