mod common;

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use common::{Post, new_post, ticking_store};
use docmodel::prelude::*;
use futures::StreamExt;
use serde_json::json;
use tracing::{
    Event, Subscriber,
    field::{Field as TraceField, Visit},
    span::{Attributes, Id as SpanId},
};
use tracing_subscriber::{
    Layer,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
};

/// What one repository span carried.
#[derive(Debug, Clone, Default)]
struct SpanRecord {
    name: String,
    request: String,
}

/// Records repository spans, and the messages of events emitted inside them.
#[derive(Clone, Default)]
struct Recorder {
    spans: Arc<Mutex<Vec<SpanRecord>>>,
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl Recorder {
    fn names(&self) -> Vec<String> {
        let spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
        spans.iter().map(|span| span.name.clone()).collect()
    }

    fn requests(&self) -> Vec<String> {
        let spans = self.spans.lock().unwrap_or_else(PoisonError::into_inner);
        spans.iter().map(|span| span.request.clone()).collect()
    }

    fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

struct SpanFields<'a>(&'a mut SpanRecord);

impl Visit for SpanFields<'_> {
    fn record_debug(&mut self, field: &TraceField, value: &dyn fmt::Debug) {
        match field.name() {
            "otel.name" => self.0.name = format!("{value:?}"),
            "request" => self.0.request = format!("{value:?}"),
            _ => {}
        }
    }
}

struct Message<'a>(&'a mut String);

impl Visit for Message<'_> {
    fn record_debug(&mut self, field: &TraceField, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{value:?}");
        }
    }
}

impl<S> Layer<S> for Recorder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &SpanId, ctx: Context<'_, S>) {
        let mut record = SpanRecord::default();
        attrs.record(&mut SpanFields(&mut record));
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(record.clone());
        }
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.event_span(event) else {
            return;
        };
        let Some(name) = span.extensions().get::<SpanRecord>().map(|record| record.name.clone())
        else {
            return;
        };
        let mut message = String::new();
        event.record(&mut Message(&mut message));
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, message));
    }
}

#[tokio::test]
async fn every_operation_runs_in_a_named_span() {
    let recorder = Recorder::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder.clone()));

    let store = ticking_store().await;
    let posts = store
        .repository::<Post>(
            RepositoryOptions::builder("posts")
                .span_prefix("PostRepository")
                .build(),
        )
        .unwrap();

    let id = posts.add(&new_post("Hello", 1, "alice")).await.unwrap();
    posts.update(&id, &json!({ "views": 2 })).await.unwrap();
    posts.get_by_id(&id).await.unwrap();
    posts.get(&id).await.unwrap();
    posts.query(Query::new()).await.unwrap();
    posts.find_one(Query::new()).await.unwrap();
    posts.single(Query::new()).await.unwrap();
    posts.get_by_id_stream(&id).next().await.unwrap().unwrap();
    posts.query_stream(Query::new()).next().await.unwrap().unwrap();
    posts.delete(&id).await.unwrap();

    assert_eq!(
        recorder.names(),
        [
            "PostRepository.add",
            "PostRepository.update",
            "PostRepository.getById",
            "PostRepository.get",
            "PostRepository.query",
            "PostRepository.findOne",
            "PostRepository.single",
            "PostRepository.getByIdStream",
            "PostRepository.queryStream",
            "PostRepository.delete",
        ]
    );
}

#[tokio::test]
async fn spans_carry_the_request_and_the_store_events() {
    let recorder = Recorder::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder.clone()));

    let store = ticking_store().await;
    let posts = store
        .repository::<Post>(RepositoryOptions::new("posts"))
        .unwrap();

    let id = posts.add(&new_post("Hello", 1, "alice")).await.unwrap();
    posts.find_one(Query::order_by("views")).await.unwrap();
    posts.delete(&id).await.unwrap();

    let requests = recorder.requests();
    assert!(requests[0].contains("\"title\":\"Hello\""), "{}", requests[0]);
    assert!(requests[1].contains("OrderBy"), "{}", requests[1]);
    assert!(requests[1].contains("\"Limit\""), "{}", requests[1]);
    assert_eq!(requests[2], id.to_string());

    let events = recorder.events();
    assert!(events.contains(&("posts.add".to_string(), "document added".to_string())));
    assert!(events.contains(&("posts.delete".to_string(), "document removed".to_string())));
}
