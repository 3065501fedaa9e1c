//! Typed CRUD, query and stream operations for one entity in one collection.
//!
//! A [`Repository`] encodes each request with the entity's variant schema, calls the
//! backend, and decodes what comes back with the `get` variant. Stored documents do not
//! carry their own id: it is injected from the snapshot reference into the configured id
//! field before decoding.
//!
//! Every operation runs inside a `docmodel.repository` span whose `otel.name` is
//! `{span_prefix}.{operation}` and whose `request` field holds the request payload.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let posts = store.repository::<Post>(RepositoryOptions::new("posts"))?;
//! let id = posts.add(&json!({ "title": "Hello" })).await?;
//! let post = posts.get(&id).await?;
//! ```

use std::{fmt, marker::PhantomData};

use futures::{
    Stream, StreamExt,
    stream::{self, BoxStream},
};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span};

use crate::{
    backend::{SnapshotOptions, StoreBackend},
    entity::{Entity, EntityExt},
    error::{ModelError, ModelResult, ParseError},
    field::Variant,
    id::Id,
    query::Query,
    reference::validate_collection_path,
    schema::json_type_name,
    snapshot::Snapshot,
    value::{Json, Value},
};

fn default_id_field() -> String {
    "id".to_string()
}

/// Where a repository stores its entity and how it reports its operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryOptions {
    pub collection_path: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Defaults to the collection path.
    #[serde(default)]
    pub span_prefix: Option<String>,
}

impl RepositoryOptions {
    pub fn new(collection_path: impl Into<String>) -> Self {
        Self {
            collection_path: collection_path.into(),
            id_field: default_id_field(),
            span_prefix: None,
        }
    }

    pub fn builder(collection_path: impl Into<String>) -> RepositoryOptionsBuilder {
        RepositoryOptionsBuilder {
            options: Self::new(collection_path),
        }
    }

    pub fn span_prefix(&self) -> &str {
        self.span_prefix.as_deref().unwrap_or(&self.collection_path)
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryOptionsBuilder {
    options: RepositoryOptions,
}

impl RepositoryOptionsBuilder {
    pub fn id_field(mut self, id_field: impl Into<String>) -> Self {
        self.options.id_field = id_field.into();
        self
    }

    pub fn span_prefix(mut self, span_prefix: impl Into<String>) -> Self {
        self.options.span_prefix = Some(span_prefix.into());
        self
    }

    pub fn build(self) -> RepositoryOptions {
        self.options
    }
}

/// The typed operations for entity `E` over backend `B`.
pub struct Repository<E, B> {
    backend: B,
    options: RepositoryOptions,
    _entity: PhantomData<fn() -> E>,
}

impl<E, B> Repository<E, B>
where
    E: Entity,
    B: StoreBackend + Clone + 'static,
{
    /// # Errors
    ///
    /// Fails with [`ModelError::Definition`] when the id field is not part of the entity,
    /// or with a parse error when the collection path does not address a collection.
    pub fn new(backend: B, options: RepositoryOptions) -> ModelResult<Self> {
        validate_collection_path(&options.collection_path)?;
        let definition = E::definition();
        if definition.field(&options.id_field).is_none() {
            return Err(ModelError::Definition(format!(
                "Id field \"{}\" is not a field of {}",
                options.id_field,
                definition.name()
            )));
        }

        Ok(Self {
            backend,
            options,
            _entity: PhantomData,
        })
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates a document from `data`, encoded with the `add` variant.
    ///
    /// # Returns
    ///
    /// The id the backend assigned.
    pub async fn add<T: Serialize + ?Sized>(&self, data: &T) -> ModelResult<Id<E>> {
        let request = serde_json::to_value(data)?;
        let span = self.span("add", &request);

        async {
            let mut fields = E::definition().encode(Variant::Add, &request, &self.backend)?;
            fields.shift_remove(&self.options.id_field);
            let reference = self
                .backend
                .add(&self.options.collection_path, fields)
                .await?;
            Id::new(reference.id())
        }
        .instrument(span)
        .await
    }

    /// Patches the document `id` with the fields present in `patch`.
    ///
    /// Fields missing from `patch` are left untouched, fields stamped by the store on
    /// update are stamped.
    pub async fn update<T: Serialize + ?Sized>(&self, id: &Id<E>, patch: &T) -> ModelResult<()> {
        let mut request = serde_json::to_value(patch)?;
        match &mut request {
            Json::Object(object) => {
                object.insert(self.options.id_field.clone(), Json::String(id.to_string()));
            }
            other => return Err(ParseError::type_mismatch("object", json_type_name(other)).into()),
        }
        let span = self.span("update", &request);

        async {
            let mut fields = E::definition().encode(Variant::Update, &request, &self.backend)?;
            fields.shift_remove(&self.options.id_field);
            self.backend.update(&self.doc_path(id), fields).await
        }
        .instrument(span)
        .await
    }

    /// Reads the document `id`. A missing document is `Ok(None)`.
    pub async fn get_by_id(&self, id: &Id<E>) -> ModelResult<Option<E>> {
        let span = self.span("getById", id);

        async {
            self.backend
                .get(&self.doc_path(id), SnapshotOptions::default())
                .await?
                .map(|snapshot| self.decode(&snapshot))
                .transpose()
        }
        .instrument(span)
        .await
    }

    /// Reads the document `id`, failing with [`ModelError::NoSuchElement`] when it is
    /// missing.
    pub async fn get(&self, id: &Id<E>) -> ModelResult<E> {
        let span = self.span("get", id);

        async {
            let snapshot = self
                .backend
                .get(&self.doc_path(id), SnapshotOptions::default())
                .await?
                .ok_or_else(|| self.no_such_element(id))?;
            self.decode(&snapshot)
        }
        .instrument(span)
        .await
    }

    pub async fn delete(&self, id: &Id<E>) -> ModelResult<()> {
        let span = self.span("delete", id);
        self.backend
            .remove(&self.doc_path(id))
            .instrument(span)
            .await
    }

    pub async fn query(&self, query: Query) -> ModelResult<Vec<E>> {
        let span = self.span("query", &payload(&query));
        self.run_query(query).instrument(span).await
    }

    /// The first entity matching `query`, or `None`. A `limit(1)` is appended.
    pub async fn find_one(&self, query: Query) -> ModelResult<Option<E>> {
        let query = query.add_limit(1);
        let span = self.span("findOne", &payload(&query));

        async { Ok(self.run_query(query).await?.into_iter().next()) }
            .instrument(span)
            .await
    }

    /// The first entity matching `query`, failing with [`ModelError::NoSuchElement`] when
    /// there is none. A `limit(1)` is appended.
    pub async fn single(&self, query: Query) -> ModelResult<E> {
        let query = query.add_limit(1);
        let request = payload(&query);
        let span = self.span("single", &request);

        async {
            self.run_query(query).await?.into_iter().next().ok_or_else(|| {
                ModelError::NoSuchElement(format!(
                    "No {} matches {request}",
                    E::definition().name()
                ))
            })
        }
        .instrument(span)
        .await
    }

    /// Subscribes to the document `id`: its current state, then one item per change.
    ///
    /// The stream ends after the first error.
    pub fn get_by_id_stream(&self, id: &Id<E>) -> BoxStream<'static, ModelResult<Option<E>>> {
        let span = self.span("getByIdStream", id);
        let subscription = self
            .backend
            .stream_doc(&self.doc_path(id), SnapshotOptions::default());
        let backend = self.backend.clone();
        let id_field = self.options.id_field.clone();

        until_first_error(subscription.map(move |item| {
            let _entered = span.enter();
            item.and_then(|snapshot| {
                snapshot
                    .map(|snapshot| decode_snapshot::<E>(&backend, &id_field, &snapshot))
                    .transpose()
            })
        }))
        .boxed()
    }

    /// Subscribes to the result set of `query`: the current results, then the full
    /// results again on every change.
    ///
    /// The stream ends after the first error.
    pub fn query_stream(&self, query: Query) -> BoxStream<'static, ModelResult<Vec<E>>> {
        let span = self.span("queryStream", &payload(&query));
        let subscription = self.backend.stream_query(
            &self.options.collection_path,
            query.into_constraints(),
            SnapshotOptions::default(),
        );
        let backend = self.backend.clone();
        let id_field = self.options.id_field.clone();

        until_first_error(subscription.map(move |item| {
            let _entered = span.enter();
            item.and_then(|snapshots| {
                snapshots
                    .iter()
                    .map(|snapshot| decode_snapshot::<E>(&backend, &id_field, snapshot))
                    .collect()
            })
        }))
        .boxed()
    }

    async fn run_query(&self, query: Query) -> ModelResult<Vec<E>> {
        self.backend
            .query(&self.options.collection_path, query.into_constraints())
            .await?
            .iter()
            .map(|snapshot| self.decode(snapshot))
            .collect()
    }

    fn decode(&self, snapshot: &Snapshot) -> ModelResult<E> {
        decode_snapshot::<E>(&self.backend, &self.options.id_field, snapshot)
    }

    fn doc_path(&self, id: &Id<E>) -> String {
        format!("{}/{id}", self.options.collection_path)
    }

    fn no_such_element(&self, id: &Id<E>) -> ModelError {
        ModelError::NoSuchElement(format!(
            "{} \"{}\" does not exist",
            E::definition().name(),
            self.doc_path(id)
        ))
    }

    fn span(&self, operation: &str, request: &dyn fmt::Display) -> Span {
        tracing::info_span!(
            "docmodel.repository",
            otel.name = %format!("{}.{operation}", self.options.span_prefix()),
            request = %request,
        )
    }
}

impl<E, B: Clone> Clone for Repository<E, B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            options: self.options.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E, B: fmt::Debug> fmt::Debug for Repository<E, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("backend", &self.backend)
            .field("options", &self.options)
            .finish()
    }
}

fn decode_snapshot<E: Entity>(
    backend: &impl StoreBackend,
    id_field: &str,
    snapshot: &Snapshot,
) -> ModelResult<E> {
    let mut data = snapshot.data.clone();
    data.insert(id_field.to_string(), Value::String(snapshot.id().to_string()));
    E::from_fields(&data, backend)
}

fn payload(value: &impl Serialize) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("<unserializable: {err}>"))
}

/// Ends `stream` right after the first error it yields, dropping it there so its
/// listener is released.
fn until_first_error<T, S>(stream: S) -> impl Stream<Item = ModelResult<T>>
where
    T: Send + 'static,
    S: Stream<Item = ModelResult<T>> + Send + 'static,
{
    stream::unfold(Some(stream.boxed()), |state| async move {
        let mut stream = state?;
        let item = stream.next().await?;
        let rest = if item.is_err() { None } else { Some(stream) };
        Some((item, rest))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, LazyLock, Mutex, PoisonError};

    use async_trait::async_trait;
    use serde_json::json;
    use tracing::{
        Subscriber,
        field::{Field as TraceField, Visit},
        span::{Attributes, Id as SpanId},
    };
    use tracing_subscriber::{
        Layer,
        layer::{Context, SubscriberExt},
    };

    use super::*;
    use crate::{
        backend::SetOptions,
        converter::NativeConverter,
        entity::EntityDefinition,
        error::StoreError,
        field, fields,
        query::{QueryConstraint, WhereOp},
        reference::Reference,
        schema,
        stream::{ListenerRegistration, Subscription},
        value::Fields,
    };

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: Id<Post>,
        title: String,
    }

    impl Entity for Post {
        fn definition() -> &'static EntityDefinition {
            static DEFINITION: LazyLock<EntityDefinition> = LazyLock::new(|| {
                EntityDefinition::builder("Post")
                    .field("id", field::generated(schema::id()))
                    .field("title", schema::string())
                    .build()
                    .unwrap()
            });
            &DEFINITION
        }
    }

    #[derive(Debug, Default)]
    struct Calls {
        adds: Vec<(String, Fields)>,
        updates: Vec<(String, Fields)>,
        queries: Vec<Vec<QueryConstraint>>,
    }

    /// Serves canned snapshots, records writes, and optionally fails every call.
    #[derive(Debug, Clone, Default)]
    struct StubBackend {
        documents: Arc<Vec<Snapshot>>,
        calls: Arc<Mutex<Calls>>,
        failure: Option<StoreError>,
    }

    impl StubBackend {
        fn with_documents(documents: Vec<Snapshot>) -> Self {
            Self {
                documents: Arc::new(documents),
                ..Default::default()
            }
        }

        fn failing(code: &str) -> Self {
            Self {
                failure: Some(StoreError::new(code, "FirebaseError", "Missing or insufficient permissions.")),
                ..Default::default()
            }
        }

        fn check(&self) -> ModelResult<()> {
            match &self.failure {
                Some(err) => Err(err.clone().into()),
                None => Ok(()),
            }
        }

        fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl NativeConverter for StubBackend {}

    #[async_trait]
    impl StoreBackend for StubBackend {
        async fn get(&self, path: &str, _: SnapshotOptions) -> ModelResult<Option<Snapshot>> {
            self.check()?;
            Ok(self.documents.iter().find(|doc| doc.path() == path).cloned())
        }

        async fn add(&self, collection_path: &str, data: Fields) -> ModelResult<Reference> {
            self.check()?;
            self.calls().adds.push((collection_path.to_string(), data));
            Ok(Reference::new(collection_path, "generated")?)
        }

        async fn set(&self, _: &str, _: Fields, _: SetOptions) -> ModelResult<()> {
            self.check()
        }

        async fn update(&self, path: &str, data: Fields) -> ModelResult<()> {
            self.check()?;
            self.calls().updates.push((path.to_string(), data));
            Ok(())
        }

        async fn remove(&self, _: &str) -> ModelResult<()> {
            self.check()
        }

        async fn query(&self, _: &str, constraints: Vec<QueryConstraint>) -> ModelResult<Vec<Snapshot>> {
            self.check()?;
            self.calls().queries.push(constraints);
            Ok(self.documents.to_vec())
        }

        fn stream_doc(&self, path: &str, _: SnapshotOptions) -> Subscription<Option<Snapshot>> {
            let current = self.documents.iter().find(|doc| doc.path() == path).cloned();
            Subscription::new(move |sink| async move {
                sink.next(current);
                sink.error(StoreError::new("unavailable", "FirebaseError", "offline").into());
                sink.next(None);
                Ok(ListenerRegistration::noop())
            })
        }

        fn stream_query(
            &self,
            _: &str,
            _: Vec<QueryConstraint>,
            _: SnapshotOptions,
        ) -> Subscription<Vec<Snapshot>> {
            let documents = self.documents.to_vec();
            Subscription::new(move |sink| async move {
                sink.next(documents);
                Ok(ListenerRegistration::noop())
            })
        }
    }

    fn snapshot(path: &str, data: Fields) -> Snapshot {
        Snapshot::new(Reference::from_path(path).unwrap(), data)
    }

    fn posts(backend: StubBackend) -> Repository<Post, StubBackend> {
        Repository::new(backend, RepositoryOptions::new("posts")).unwrap()
    }

    fn id(value: &str) -> Id<Post> {
        Id::new(value).unwrap()
    }

    #[test]
    fn options_default_and_deserialize() {
        let options = RepositoryOptions::new("posts");
        assert_eq!(options.id_field, "id");
        assert_eq!(options.span_prefix(), "posts");

        let options: RepositoryOptions = serde_json::from_value(json!({
            "collectionPath": "users/u1/posts",
            "spanPrefix": "UserPosts",
        }))
        .unwrap();
        assert_eq!(options.id_field, "id");
        assert_eq!(options.span_prefix(), "UserPosts");

        let built = RepositoryOptions::builder("posts").id_field("slug").span_prefix("Posts").build();
        assert_eq!(built.id_field, "slug");
        assert_eq!(built.span_prefix(), "Posts");
    }

    #[test]
    fn rejects_unknown_id_fields_and_document_paths() {
        let unknown = Repository::<Post, _>::new(
            StubBackend::default(),
            RepositoryOptions::builder("posts").id_field("slug").build(),
        );
        assert!(matches!(unknown, Err(ModelError::Definition(_))));

        let document_path = Repository::<Post, _>::new(StubBackend::default(), RepositoryOptions::new("posts/p1"));
        assert!(matches!(document_path, Err(ModelError::Parse(_))));
    }

    #[tokio::test]
    async fn get_by_id_injects_the_snapshot_id() {
        let backend = StubBackend::with_documents(vec![snapshot("posts/p1", fields! { "title" => "Hello" })]);
        let repository = posts(backend);

        let post = repository.get_by_id(&id("p1")).await.unwrap();
        assert_eq!(
            post,
            Some(Post {
                id: id("p1"),
                title: "Hello".into()
            })
        );
    }

    #[tokio::test]
    async fn missing_documents_are_absent_not_errors() {
        let repository = posts(StubBackend::default());
        assert_eq!(repository.get_by_id(&id("p1")).await.unwrap(), None);

        let err = repository.get(&id("p1")).await.unwrap_err();
        assert!(matches!(err, ModelError::NoSuchElement(_)));
    }

    #[tokio::test]
    async fn store_failures_keep_their_code() {
        let repository = posts(StubBackend::failing("permission-denied"));
        let err = repository.get_by_id(&id("p1")).await.unwrap_err();
        assert_eq!(err.store_code(), Some("permission-denied"));
    }

    #[tokio::test]
    async fn add_drops_generated_fields_and_returns_the_new_id() {
        let backend = StubBackend::default();
        let repository = posts(backend.clone());

        let id = repository
            .add(&json!({ "id": "mine", "title": "Hello", "extra": true }))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "generated");

        let calls = backend.calls();
        assert_eq!(calls.adds, vec![("posts".to_string(), fields! { "title" => "Hello" })]);
    }

    #[tokio::test]
    async fn update_strips_the_id_and_sends_the_patch() {
        let backend = StubBackend::default();
        let repository = posts(backend.clone());

        repository.update(&id("p1"), &json!({ "title": "New" })).await.unwrap();
        repository.update(&id("p2"), &json!({})).await.unwrap();

        let calls = backend.calls();
        assert_eq!(
            calls.updates,
            vec![
                ("posts/p1".to_string(), fields! { "title" => "New" }),
                ("posts/p2".to_string(), Fields::new()),
            ]
        );
    }

    #[tokio::test]
    async fn update_rejects_non_object_patches() {
        let repository = posts(StubBackend::default());
        let err = repository.update(&id("p1"), &json!("title")).await.unwrap_err();
        assert!(matches!(err, ModelError::Parse(_)));
    }

    #[tokio::test]
    async fn find_one_appends_a_limit() {
        let backend = StubBackend::with_documents(vec![
            snapshot("posts/p1", fields! { "title" => "A" }),
            snapshot("posts/p2", fields! { "title" => "B" }),
        ]);
        let repository = posts(backend.clone());

        let query = Query::where_("title", WhereOp::Eq, "A");
        let post = repository.find_one(query.clone()).await.unwrap().unwrap();
        assert_eq!(post.id, id("p1"));

        let sent = backend.calls().queries.pop().unwrap();
        assert_eq!(sent, query.add_limit(1).into_constraints());
    }

    #[tokio::test]
    async fn single_fails_without_results() {
        let repository = posts(StubBackend::default());
        let err = repository.single(Query::limit(5)).await.unwrap_err();
        assert!(matches!(err, ModelError::NoSuchElement(_)));
    }

    #[tokio::test]
    async fn undecodable_documents_are_parse_errors() {
        let backend = StubBackend::with_documents(vec![snapshot("posts/p1", fields! { "title" => 42 })]);
        let err = posts(backend).query(Query::new()).await.unwrap_err();
        match err {
            ModelError::Parse(err) => assert_eq!(err.path, vec!["title".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn streams_end_after_the_first_error() {
        let backend = StubBackend::with_documents(vec![snapshot("posts/p1", fields! { "title" => "A" })]);
        let repository = posts(backend);

        let items = repository.get_by_id_stream(&id("p1")).collect::<Vec<_>>().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].as_ref().unwrap().is_some());
        assert_eq!(items[1].as_ref().unwrap_err().store_code(), Some("unavailable"));

        let results = repository.query_stream(Query::new()).next().await.unwrap().unwrap();
        assert_eq!(results.len(), 1);
    }

    #[derive(Clone, Default)]
    struct SpanNames(Arc<Mutex<Vec<String>>>);

    struct OtelName<'a>(&'a mut Vec<String>);

    impl Visit for OtelName<'_> {
        fn record_debug(&mut self, field: &TraceField, value: &dyn fmt::Debug) {
            if field.name() == "otel.name" {
                self.0.push(format!("{value:?}"));
            }
        }
    }

    impl<S: Subscriber> Layer<S> for SpanNames {
        fn on_new_span(&self, attrs: &Attributes<'_>, _: &SpanId, _: Context<'_, S>) {
            let mut names = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            attrs.record(&mut OtelName(&mut names));
        }
    }

    #[tokio::test]
    async fn operations_are_named_after_the_span_prefix() {
        let names = SpanNames::default();
        let subscriber = tracing_subscriber::registry().with(names.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let backend = StubBackend::with_documents(vec![snapshot("posts/p1", fields! { "title" => "A" })]);
        let repository = Repository::<Post, _>::new(
            backend,
            RepositoryOptions::builder("posts").span_prefix("PostRepository").build(),
        )
        .unwrap();

        repository.add(&json!({ "title": "B" })).await.unwrap();
        repository.get_by_id(&id("p1")).await.unwrap();
        repository.delete(&id("p1")).await.unwrap();
        repository.query(Query::new()).await.unwrap();

        assert_eq!(
            *names.0.lock().unwrap(),
            vec![
                "PostRepository.add",
                "PostRepository.getById",
                "PostRepository.delete",
                "PostRepository.query",
            ]
        );
    }
}
