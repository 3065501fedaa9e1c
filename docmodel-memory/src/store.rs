//! In-memory storage implementation of the document store capability.
//!
//! Documents live in a single ordered map from document path to stored fields behind an
//! async-aware read-write lock. Every write commits while holding the write lock and
//! notifies the live listeners before releasing it, so listeners observe writes in commit
//! order and never miss one between their initial snapshot and their registration.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use mea::rwlock::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use docmodel_core::{
    backend::{SetOptions, SnapshotOptions, StoreBackend, StoreBackendBuilder},
    error::{ModelError, ModelResult, StoreError},
    query::QueryConstraint,
    reference::{Reference, validate_collection_path},
    snapshot::{Snapshot, to_native_fields},
    stream::{ListenerRegistration, Subscription, SubscriptionSink},
    timestamp::Timestamp,
    value::{Fields, Value},
};

use crate::{
    evaluator::QueryPlan,
    native::{MemoryServerTimestamp, MemoryTimestamp, native_as},
};

type DocumentMap = BTreeMap<String, Fields>;
type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

const DEFAULT_ID_LENGTH: usize = 20;
const MAX_ID_LENGTH: usize = 32;

enum Listener {
    Document {
        reference: Reference,
        sink: SubscriptionSink<Option<Snapshot>>,
    },
    Query {
        collection_path: String,
        plan: QueryPlan,
        sink: SubscriptionSink<Vec<Snapshot>>,
    },
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<u64, Listener>,
}

/// Thread-safe in-memory document store.
///
/// `InMemoryStore` is cloneable and every clone shares the same documents and listeners,
/// so it can be handed to any number of repositories and tasks.
///
/// Special values are stored as the store's own native types (see [`crate::native`]).
/// Server timestamp markers are replaced with the store clock when a write commits, so a
/// read never observes a pending server timestamp and [`SnapshotOptions`] have no effect.
///
/// Queries scan the documents of the addressed collection. There is no indexing.
///
/// # Example
///
/// ```ignore
/// use docmodel::{backend::StoreBackend, fields, memory::InMemoryStore};
///
/// let store = InMemoryStore::new();
/// let created = store.add("posts", fields! { "title" => "Hello" }).await?;
/// let snapshot = store.get(created.path(), Default::default()).await?;
/// assert!(snapshot.is_some());
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    documents: Arc<RwLock<DocumentMap>>,
    listeners: Arc<Mutex<Listeners>>,
    clock: Option<Clock>,
    id_length: usize,
}

impl InMemoryStore {
    /// Creates an empty store with the system clock and 20-character ids.
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(DocumentMap::new())),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            clock: None,
            id_length: DEFAULT_ID_LENGTH,
        }
    }

    /// Creates a builder for a store with a custom clock, id length or initial documents.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// The number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().entries.len()
    }

    /// The paths of all stored documents, in order.
    pub async fn document_paths(&self) -> Vec<String> {
        self.documents.read().await.keys().cloned().collect()
    }

    fn now(&self) -> Timestamp {
        match &self.clock {
            Some(clock) => clock(),
            None => Timestamp::now(),
        }
    }

    fn generate_id(&self) -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(self.id_length);
        id
    }

    /// Converts caller data to stored form: natives, with server timestamps stamped.
    fn prepare(&self, data: &Fields) -> Fields {
        let now = MemoryTimestamp::from(self.now());
        to_native_fields(data, self)
            .into_iter()
            .map(|(key, value)| (key, stamp(value, now)))
            .collect()
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, listener: Listener) -> ListenerRegistration {
        let id = {
            let mut listeners = self.lock_listeners();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.insert(id, listener);
            id
        };
        debug!(listener = id, "listener registered");

        let listeners = self.listeners.clone();
        ListenerRegistration::new(move || {
            let removed = listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .remove(&id)
                .is_some();
            debug!(listener = id, removed, "listener released");
        })
    }

    /// Pushes the state after a write to `reference` to every listener it affects. Called
    /// with the write lock held.
    fn notify(&self, documents: &DocumentMap, reference: &Reference) {
        let mut listeners = self.lock_listeners();
        listeners.entries.retain(|id, listener| match listener {
            Listener::Document {
                reference: watched,
                sink,
            } => {
                if watched.path() != reference.path() {
                    return true;
                }
                sink.next(Snapshot::pack(
                    watched.clone(),
                    documents.get(watched.path()).cloned(),
                ))
            }
            Listener::Query {
                collection_path,
                plan,
                sink,
            } => {
                if collection_path.as_str() != reference.collection_path() {
                    return true;
                }
                match plan.execute(collection(documents, collection_path.as_str()), self) {
                    Ok(snapshots) => sink.next(snapshots),
                    Err(err) => {
                        warn!(listener = *id, error = %err, "query listener failed");
                        sink.error(err);
                        false
                    }
                }
            }
        });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("id_length", &self.id_length)
            .field("custom_clock", &self.clock.is_some())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

fn invalid_argument(message: impl fmt::Display) -> ModelError {
    ModelError::Store(StoreError::new(
        "invalid-argument",
        "InvalidArgument",
        message.to_string(),
    ))
}

fn not_found(path: &str) -> ModelError {
    ModelError::Store(StoreError::new(
        "not-found",
        "NotFound",
        format!("No document to update: {path}"),
    ))
}

fn document_reference(path: &str) -> ModelResult<Reference> {
    Reference::from_path(path).map_err(invalid_argument)
}

fn collection_reference(path: &str) -> ModelResult<()> {
    validate_collection_path(path).map_err(invalid_argument)
}

/// The documents directly inside the collection at `collection_path`.
fn collection<'a>(
    documents: &'a DocumentMap,
    collection_path: &'a str,
) -> impl Iterator<Item = (&'a String, &'a Fields)> + 'a {
    documents.iter().filter(move |(path, _)| {
        path.rsplit_once('/')
            .is_some_and(|(parent, _)| parent == collection_path)
    })
}

/// Replaces every server timestamp marker in `value` with `now`.
fn stamp(value: Value, now: MemoryTimestamp) -> Value {
    match value {
        value if native_as::<MemoryServerTimestamp>(&value).is_some() => now.into(),
        Value::Array(items) => Value::Array(items.into_iter().map(|item| stamp(item, now)).collect()),
        Value::Map(fields) => Value::Map(
            fields
                .into_iter()
                .map(|(key, value)| (key, stamp(value, now)))
                .collect(),
        ),
        other => other,
    }
}

/// Merges `incoming` into `existing`, recursing where both sides hold a map.
fn merge_fields(existing: &mut Fields, incoming: Fields) {
    for (key, value) in incoming {
        match value {
            Value::Map(next) => match existing.get_mut(&key) {
                Some(Value::Map(current)) => merge_fields(current, next),
                _ => {
                    existing.insert(key, Value::Map(next));
                }
            },
            value => {
                existing.insert(key, value);
            }
        }
    }
}

fn validate_field_path(path: &str) -> ModelResult<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(invalid_argument(format!("Invalid field path: \"{path}\"")));
    }
    Ok(())
}

/// Writes `value` at a dotted field path, creating or replacing intermediate maps.
fn set_field_path(fields: &mut Fields, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            fields.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = fields
                .entry(head.to_string())
                .or_insert_with(|| Value::Map(Fields::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(Fields::new());
            }
            if let Value::Map(inner) = entry {
                set_field_path(inner, rest, value);
            }
        }
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn get(&self, path: &str, _options: SnapshotOptions) -> ModelResult<Option<Snapshot>> {
        let reference = document_reference(path)?;
        let documents = self.documents.read().await;
        let data = documents.get(reference.path()).cloned();
        Ok(Snapshot::pack(reference, data))
    }

    async fn add(&self, collection_path: &str, data: Fields) -> ModelResult<Reference> {
        collection_reference(collection_path)?;
        let data = self.prepare(&data);

        let mut documents = self.documents.write().await;
        let reference = loop {
            let reference =
                Reference::new(collection_path, &self.generate_id()).map_err(invalid_argument)?;
            if !documents.contains_key(reference.path()) {
                break reference;
            }
        };
        documents.insert(reference.path().to_string(), data);
        debug!(path = %reference, "document added");

        self.notify(&documents, &reference);
        Ok(reference)
    }

    async fn set(&self, path: &str, data: Fields, options: SetOptions) -> ModelResult<()> {
        let reference = document_reference(path)?;
        let data = self.prepare(&data);

        let mut documents = self.documents.write().await;
        if options.merge
            && let Some(existing) = documents.get_mut(reference.path())
        {
            merge_fields(existing, data);
        } else {
            documents.insert(reference.path().to_string(), data);
        }
        debug!(path = %reference, merge = options.merge, "document set");

        self.notify(&documents, &reference);
        Ok(())
    }

    async fn update(&self, path: &str, data: Fields) -> ModelResult<()> {
        let reference = document_reference(path)?;
        data.keys().try_for_each(|key| validate_field_path(key))?;
        let data = self.prepare(&data);

        let mut documents = self.documents.write().await;
        let existing = documents
            .get_mut(reference.path())
            .ok_or_else(|| not_found(reference.path()))?;
        for (key, value) in data {
            set_field_path(existing, &key, value);
        }
        debug!(path = %reference, "document updated");

        self.notify(&documents, &reference);
        Ok(())
    }

    async fn remove(&self, path: &str) -> ModelResult<()> {
        let reference = document_reference(path)?;

        let mut documents = self.documents.write().await;
        if documents.remove(reference.path()).is_some() {
            debug!(path = %reference, "document removed");
            self.notify(&documents, &reference);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection_path: &str,
        constraints: Vec<QueryConstraint>,
    ) -> ModelResult<Vec<Snapshot>> {
        collection_reference(collection_path)?;
        let plan = QueryPlan::compile(&constraints, self)?;

        let documents = self.documents.read().await;
        plan.execute(collection(&documents, collection_path), self)
    }

    fn stream_doc(&self, path: &str, _options: SnapshotOptions) -> Subscription<Option<Snapshot>> {
        let reference = match document_reference(path) {
            Ok(reference) => reference,
            Err(err) => return Subscription::failed(err),
        };

        let store = self.clone();
        Subscription::new(move |sink: SubscriptionSink<Option<Snapshot>>| async move {
            let documents = store.documents.read().await;
            sink.next(Snapshot::pack(
                reference.clone(),
                documents.get(reference.path()).cloned(),
            ));
            let registration = store.register(Listener::Document { reference, sink });
            drop(documents);
            Ok(registration)
        })
    }

    fn stream_query(
        &self,
        collection_path: &str,
        constraints: Vec<QueryConstraint>,
        _options: SnapshotOptions,
    ) -> Subscription<Vec<Snapshot>> {
        let plan = collection_reference(collection_path)
            .and_then(|()| QueryPlan::compile(&constraints, self));
        let plan = match plan {
            Ok(plan) => plan,
            Err(err) => {
                warn!(collection = collection_path, error = %err, "query listener rejected");
                return Subscription::failed(err);
            }
        };

        let store = self.clone();
        let collection_path = collection_path.to_string();
        Subscription::new(move |sink: SubscriptionSink<Vec<Snapshot>>| async move {
            let documents = store.documents.read().await;
            sink.next(plan.execute(collection(&documents, &collection_path), &store)?);
            let registration = store.register(Listener::Query {
                collection_path,
                plan,
                sink,
            });
            drop(documents);
            Ok(registration)
        })
    }
}

/// Builder for configured [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmodel::{backend::StoreBackendBuilder, fields, memory::InMemoryStore, timestamp::Timestamp};
///
/// let store = InMemoryStore::builder()
///     .fixed_clock(Timestamp::from_millis(1_705_315_800_123))
///     .id_length(8)
///     .document("posts/welcome", fields! { "title" => "Welcome" })
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    clock: Option<Clock>,
    id_length: Option<usize>,
    documents: Vec<(String, Fields)>,
}

impl InMemoryStoreBuilder {
    /// Stamps server timestamps with `clock` instead of the system time.
    pub fn clock(mut self, clock: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn fixed_clock(self, at: Timestamp) -> Self {
        self.clock(move || at)
    }

    /// Length of the ids generated by `add`, between 1 and 32.
    pub fn id_length(mut self, id_length: usize) -> Self {
        self.id_length = Some(id_length);
        self
    }

    /// Seeds the store with a document. Values go through the same conversion as writes.
    pub fn document(mut self, path: impl Into<String>, data: Fields) -> Self {
        self.documents.push((path.into(), data));
        self
    }
}

impl fmt::Debug for InMemoryStoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStoreBuilder")
            .field("clock", &self.clock.is_some())
            .field("id_length", &self.id_length)
            .field("documents", &self.documents.len())
            .finish()
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> ModelResult<Self::Backend> {
        let id_length = self.id_length.unwrap_or(DEFAULT_ID_LENGTH);
        if !(1..=MAX_ID_LENGTH).contains(&id_length) {
            return Err(invalid_argument(format!(
                "Generated id length must be between 1 and {MAX_ID_LENGTH}, got {id_length}"
            )));
        }

        let store = InMemoryStore {
            clock: self.clock,
            id_length,
            ..InMemoryStore::new()
        };

        {
            let mut documents = store.documents.write().await;
            for (path, data) in self.documents {
                let reference = document_reference(&path)?;
                documents.insert(reference.path().to_string(), store.prepare(&data));
            }
        }

        Ok(store)
    }
}
