//! The document store capability every backend implements.
//!
//! This is the only seam between the modeling layer and a concrete store. A backend provides
//! point reads and writes, one-shot queries, and two live subscriptions. Through its
//! [`NativeConverter`] supertrait it also provides the conversions between neutral special
//! types and its own native ones.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The capability itself
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Paths
//!
//! Document paths are `/`-delimited with an even number of segments (`users/alice`).
//! Collection paths have an odd number (`users`, `users/alice/posts`).
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::{backend::{StoreBackend, SnapshotOptions}, fields};
//!
//! let created = backend.add("posts", fields! { "title" => "Hello" }).await?;
//! let snapshot = backend.get(created.path(), SnapshotOptions::default()).await?;
//! assert!(snapshot.is_some());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    converter::NativeConverter,
    error::ModelResult,
    query::QueryConstraint,
    reference::Reference,
    snapshot::Snapshot,
    stream::Subscription,
    value::Fields,
};

/// How server timestamps that are not yet committed are reported on reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerTimestampBehavior {
    /// Report a local estimate based on the client clock.
    #[default]
    Estimate,
    /// Report the last committed value.
    Previous,
    /// Report `null` until the write is committed.
    None,
}

/// Options for reads and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotOptions {
    pub server_timestamps: ServerTimestampBehavior,
}

impl SnapshotOptions {
    pub fn with_server_timestamps(server_timestamps: ServerTimestampBehavior) -> Self {
        Self { server_timestamps }
    }
}

/// Options for [`StoreBackend::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetOptions {
    /// Merge the data into an existing document instead of replacing it.
    pub merge: bool,
}

impl SetOptions {
    pub fn merge() -> Self {
        Self { merge: true }
    }
}

/// Abstract interface for document store backends.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and support concurrent access from multiple async
/// tasks.
///
/// # Error Handling
///
/// Backend failures are reported as [`ModelError::Store`](crate::error::ModelError::Store)
/// with the backend's error code. An unrecognized failure still carries a best-effort
/// code, see [`StoreError::from_error`](crate::error::StoreError::from_error). Defects may
/// be reported as [`ModelError::Unknown`](crate::error::ModelError::Unknown). No retries
/// happen above this trait.
#[async_trait]
pub trait StoreBackend: NativeConverter + Debug {
    /// Reads the document at `path`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when no document exists at `path`. That is not an error.
    async fn get(&self, path: &str, options: SnapshotOptions) -> ModelResult<Option<Snapshot>>;

    /// Creates a document with a store-assigned id in the collection at `collection_path`.
    ///
    /// # Returns
    ///
    /// The reference to the new document.
    async fn add(&self, collection_path: &str, data: Fields) -> ModelResult<Reference>;

    /// Writes the document at `path`, replacing it unless `options.merge` is set.
    async fn set(&self, path: &str, data: Fields, options: SetOptions) -> ModelResult<()>;

    /// Updates some fields of the existing document at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the document does not exist.
    async fn update(&self, path: &str, data: Fields) -> ModelResult<()>;

    /// Deletes the document at `path`. Deleting a missing document succeeds.
    async fn remove(&self, path: &str) -> ModelResult<()>;

    /// Runs a one-shot query over the collection at `collection_path`.
    ///
    /// # Errors
    ///
    /// Fails when the constraints cannot be compiled, e.g. a non-filter constraint inside a
    /// composite.
    async fn query(
        &self,
        collection_path: &str,
        constraints: Vec<QueryConstraint>,
    ) -> ModelResult<Vec<Snapshot>>;

    /// Subscribes to the document at `path`.
    ///
    /// The subscription emits the current state when it opens and then once per change.
    fn stream_doc(&self, path: &str, options: SnapshotOptions) -> Subscription<Option<Snapshot>>;

    /// Subscribes to the result set of a query.
    fn stream_query(
        &self,
        collection_path: &str,
        constraints: Vec<QueryConstraint>,
        options: SnapshotOptions,
    ) -> Subscription<Vec<Snapshot>>;
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend + ?Sized,
{
    async fn get(&self, path: &str, options: SnapshotOptions) -> ModelResult<Option<Snapshot>> {
        (**self).get(path, options).await
    }

    async fn add(&self, collection_path: &str, data: Fields) -> ModelResult<Reference> {
        (**self).add(collection_path, data).await
    }

    async fn set(&self, path: &str, data: Fields, options: SetOptions) -> ModelResult<()> {
        (**self).set(path, data, options).await
    }

    async fn update(&self, path: &str, data: Fields) -> ModelResult<()> {
        (**self).update(path, data).await
    }

    async fn remove(&self, path: &str) -> ModelResult<()> {
        (**self).remove(path).await
    }

    async fn query(
        &self,
        collection_path: &str,
        constraints: Vec<QueryConstraint>,
    ) -> ModelResult<Vec<Snapshot>> {
        (**self).query(collection_path, constraints).await
    }

    fn stream_doc(&self, path: &str, options: SnapshotOptions) -> Subscription<Option<Snapshot>> {
        (**self).stream_doc(path, options)
    }

    fn stream_query(
        &self,
        collection_path: &str,
        constraints: Vec<QueryConstraint>,
        options: SnapshotOptions,
    ) -> Subscription<Vec<Snapshot>> {
        (**self).stream_query(collection_path, constraints, options)
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    async fn get(&self, path: &str, options: SnapshotOptions) -> ModelResult<Option<Snapshot>> {
        (**self).get(path, options).await
    }

    async fn add(&self, collection_path: &str, data: Fields) -> ModelResult<Reference> {
        (**self).add(collection_path, data).await
    }

    async fn set(&self, path: &str, data: Fields, options: SetOptions) -> ModelResult<()> {
        (**self).set(path, data, options).await
    }

    async fn update(&self, path: &str, data: Fields) -> ModelResult<()> {
        (**self).update(path, data).await
    }

    async fn remove(&self, path: &str) -> ModelResult<()> {
        (**self).remove(path).await
    }

    async fn query(
        &self,
        collection_path: &str,
        constraints: Vec<QueryConstraint>,
    ) -> ModelResult<Vec<Snapshot>> {
        (**self).query(collection_path, constraints).await
    }

    fn stream_doc(&self, path: &str, options: SnapshotOptions) -> Subscription<Option<Snapshot>> {
        (**self).stream_doc(path, options)
    }

    fn stream_query(
        &self,
        collection_path: &str,
        constraints: Vec<QueryConstraint>,
        options: SnapshotOptions,
    ) -> Subscription<Vec<Snapshot>> {
        (**self).stream_query(collection_path, constraints, options)
    }
}

/// Factory trait for creating configured backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> ModelResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_options_default_to_estimate() {
        assert_eq!(
            SnapshotOptions::default().server_timestamps,
            ServerTimestampBehavior::Estimate
        );
    }

    #[test]
    fn options_deserialize_from_config() {
        let options: SnapshotOptions =
            serde_json::from_value(serde_json::json!({ "serverTimestamps": "previous" })).unwrap();
        assert_eq!(options.server_timestamps, ServerTimestampBehavior::Previous);

        let options: SnapshotOptions = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(options, SnapshotOptions::default());

        let set: SetOptions = serde_json::from_value(serde_json::json!({ "merge": true })).unwrap();
        assert_eq!(set, SetOptions::merge());
    }
}
