//! The entry point that hands out repositories over one backend.
//!
//! [`DocumentStore`] owns a backend and builds a [`Repository`] per entity. The backend is
//! cloned into each repository, so backends are expected to be cheap handles over shared
//! state. [`DocumentStore::into_dyn`] erases the backend type for code that picks its
//! backend at runtime.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let store = DocumentStore::new(backend);
//! let posts = store.repository::<Post>(RepositoryOptions::new("posts"))?;
//!
//! let store = store.into_dyn();
//! let authors = store.repository::<Author>(RepositoryOptions::new("authors"))?;
//! ```

use std::sync::Arc;

use crate::{
    backend::{StoreBackend, StoreBackendBuilder},
    entity::Entity,
    error::ModelResult,
    repository::{Repository, RepositoryOptions},
};

/// A document store bound to a backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug, Clone)]
pub struct DocumentStore<B> {
    backend: B,
}

/// A document store over a type-erased backend.
pub type DynDocumentStore = DocumentStore<Arc<dyn StoreBackend>>;

impl<B> DocumentStore<B>
where
    B: StoreBackend + Clone + 'static,
{
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Builds the backend with `builder` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns the builder's error if the backend cannot be configured.
    pub async fn from_builder<T>(builder: T) -> ModelResult<Self>
    where
        T: StoreBackendBuilder<Backend = B>,
    {
        Ok(Self::new(builder.build().await?))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates the repository for entity `E`.
    ///
    /// # Errors
    ///
    /// Fails when `options` do not fit the entity, see [`Repository::new`].
    pub fn repository<E: Entity>(&self, options: RepositoryOptions) -> ModelResult<Repository<E, B>> {
        Repository::new(self.backend.clone(), options)
    }

    /// Erases the backend type.
    pub fn into_dyn(self) -> DynDocumentStore {
        DocumentStore {
            backend: Arc::new(self.backend) as Arc<dyn StoreBackend>,
        }
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}

impl<B> From<B> for DocumentStore<B>
where
    B: StoreBackend + Clone + 'static,
{
    fn from(backend: B) -> Self {
        Self::new(backend)
    }
}
