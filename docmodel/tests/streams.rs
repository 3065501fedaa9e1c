mod common;

use common::{new_post, posts, ticking_store};
use docmodel::prelude::*;
use futures::StreamExt;
use serde_json::json;

#[tokio::test]
async fn document_stream_follows_the_document_until_it_is_deleted() {
    let store = ticking_store().await;
    let posts = posts(&store);
    let id = posts.add(&new_post("Hello", 1, "alice")).await.unwrap();

    let mut stream = posts.get_by_id_stream(&id);
    let initial = stream.next().await.unwrap().unwrap().unwrap();
    assert_eq!(initial.title, "Hello");
    assert_eq!(store.backend().listener_count(), 1);

    posts.update(&id, &json!({ "title": "Hello again" })).await.unwrap();
    let updated = stream.next().await.unwrap().unwrap().unwrap();
    assert_eq!(updated.title, "Hello again");
    assert_eq!(updated.updated_at, "2024-01-15T10:50:01.123Z");

    posts.delete(&id).await.unwrap();
    assert!(stream.next().await.unwrap().unwrap().is_none());

    drop(stream);
    assert_eq!(store.backend().listener_count(), 0);
}

#[tokio::test]
async fn document_stream_starts_with_the_absent_state() {
    let store = ticking_store().await;
    let posts = posts(&store);
    let id = Id::new("later").unwrap();

    let mut stream = posts.get_by_id_stream(&id);
    assert!(stream.next().await.unwrap().unwrap().is_none());
}

#[tokio::test]
async fn writes_to_other_documents_are_not_delivered() {
    let store = ticking_store().await;
    let posts = posts(&store);
    let watched = posts.add(&new_post("Watched", 1, "alice")).await.unwrap();

    let mut stream = posts.get_by_id_stream(&watched);
    stream.next().await.unwrap().unwrap();

    let other = posts.add(&new_post("Other", 1, "bob")).await.unwrap();
    posts.update(&other, &json!({ "views": 5 })).await.unwrap();
    posts.update(&watched, &json!({ "views": 2 })).await.unwrap();

    let next = stream.next().await.unwrap().unwrap().unwrap();
    assert_eq!(next.title, "Watched");
    assert_eq!(next.views, 2);
}

#[tokio::test]
async fn query_stream_emits_the_full_results_after_each_write() {
    let store = ticking_store().await;
    let posts = posts(&store);
    posts.add(&new_post("Popular", 50, "alice")).await.unwrap();

    let mut stream = posts.query_stream(
        Query::where_("views", WhereOp::Gte, 10).add_order_by_desc("views"),
    );
    let initial = stream.next().await.unwrap().unwrap();
    assert_eq!(initial.len(), 1);

    posts.add(&new_post("Quiet", 2, "bob")).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().len(), 1);

    posts.add(&new_post("Famous", 90, "carol")).await.unwrap();
    let titles: Vec<_> = stream
        .next()
        .await
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|post| post.title)
        .collect();
    assert_eq!(titles, ["Famous", "Popular"]);
}

#[tokio::test]
async fn invalid_query_stream_fails_once_and_ends() {
    let store = ticking_store().await;
    let posts = posts(&store);

    let mut stream = posts.query_stream(Query::limit_to_last(1));
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.store_code(), Some("invalid-argument"));
    assert!(stream.next().await.is_none());
    assert_eq!(store.backend().listener_count(), 0);
}

#[tokio::test]
async fn undecodable_documents_end_the_stream_and_release_the_listener() {
    let store = ticking_store().await;
    let posts = posts(&store);
    store
        .backend()
        .set("posts/broken", fields! { "title" => 7 }, SetOptions::default())
        .await
        .unwrap();

    let mut stream = posts.get_by_id_stream(&Id::new("broken").unwrap());
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, ModelError::Parse(_)), "{err}");
    assert!(stream.next().await.is_none());
    assert_eq!(store.backend().listener_count(), 0);
}
