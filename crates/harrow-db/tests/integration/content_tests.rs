use harrow_core::models::{Comment, ContentItem};
use harrow_core::traits::ItemSink;
use harrow_db::ContentRepository;
use serde_json::json;

use crate::integration::common::setup_test_db;

fn comment(id: &str, text: &str) -> Comment {
    Comment {
        platform: "xhs".into(),
        item_id: "n1".into(),
        comment_id: id.into(),
        payload: json!({ "text": text }),
    }
}

#[tokio::test]
async fn save_item_upserts_payload() {
    let (pool, _container) = setup_test_db().await;
    let repo = ContentRepository::new(pool);

    let first = ContentItem::new("xhs", "n1", json!({ "title": "v1" }));
    repo.save_item(&first).await.unwrap();
    let stored = repo.get_item("xhs", "n1").await.unwrap().unwrap();
    assert_eq!(stored.content_hash, first.content_hash);

    let second = ContentItem::new("xhs", "n1", json!({ "title": "v2" }));
    repo.save_item(&second).await.unwrap();
    let updated = repo.get_item("xhs", "n1").await.unwrap().unwrap();
    assert_eq!(updated.payload["title"], "v2");
    assert_eq!(updated.content_hash, second.content_hash);
    assert_eq!(updated.first_seen_at, stored.first_seen_at);
}

#[tokio::test]
async fn unchanged_item_keeps_updated_at() {
    let (pool, _container) = setup_test_db().await;
    let repo = ContentRepository::new(pool);

    let item = ContentItem::new("xhs", "n1", json!({ "title": "same" }));
    repo.save_item(&item).await.unwrap();
    let before = repo.get_item("xhs", "n1").await.unwrap().unwrap();
    repo.save_item(&item).await.unwrap();
    let after = repo.get_item("xhs", "n1").await.unwrap().unwrap();

    assert_eq!(before.updated_at, after.updated_at);
}

#[tokio::test]
async fn save_comments_dedups_by_comment_id() {
    let (pool, _container) = setup_test_db().await;
    let repo = ContentRepository::new(pool);

    repo.save_comments(&[comment("c1", "a"), comment("c2", "b")])
        .await
        .unwrap();
    repo.save_comments(&[comment("c2", "b edited")]).await.unwrap();
    repo.save_comments(&[]).await.unwrap();

    assert_eq!(repo.comment_count("xhs", "n1").await.unwrap(), 2);
    assert!(repo.get_item("xhs", "missing").await.unwrap().is_none());
}
