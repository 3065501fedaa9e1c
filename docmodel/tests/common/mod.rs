#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use docmodel::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// 2024-01-15T10:50:00.123Z
pub const EPOCH_MILLIS: i64 = 1_705_315_800_123;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[field(field::generated(schema::id()))]
    pub id: Id<Post>,
    #[field(schema::string())]
    pub title: String,
    #[field(schema::integer())]
    pub views: i64,
    #[field(field::reference("authors"))]
    pub author: String,
    #[field(field::optional(schema::array(schema::string())))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[field(field::sensitive(schema::string()))]
    pub review_notes: String,
    #[field(field::date_time_insert())]
    pub created_at: String,
    #[field(field::date_time_update())]
    pub updated_at: String,
}

/// A store whose clock starts at [`EPOCH_MILLIS`] and moves one second per write.
pub async fn ticking_store() -> DocumentStore<InMemoryStore> {
    let now = Arc::new(AtomicI64::new(EPOCH_MILLIS));
    let builder = InMemoryStore::builder()
        .clock(move || Timestamp::from_millis(now.fetch_add(1_000, Ordering::SeqCst)));
    DocumentStore::from_builder(builder)
        .await
        .expect("in-memory store builds")
}

pub fn posts(store: &DocumentStore<InMemoryStore>) -> Repository<Post, InMemoryStore> {
    store
        .repository::<Post>(RepositoryOptions::new("posts"))
        .expect("posts repository")
}

pub fn new_post(title: &str, views: i64, author: &str) -> serde_json::Value {
    json!({
        "title": title,
        "views": views,
        "author": author,
        "reviewNotes": "",
    })
}
