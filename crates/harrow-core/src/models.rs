use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One page of a listing endpoint (search results, creator posts, feed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingPage {
    pub item_ids: Vec<String>,
    /// Server-issued continuation token for the next page.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// A fetched top-level content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub platform: String,
    pub item_id: String,
    pub payload: serde_json::Value,
    /// SHA-256 of the payload (for change detection across runs)
    pub content_hash: String,
}

impl ContentItem {
    pub fn new(
        platform: impl Into<String>,
        item_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let content_hash = compute_hash(&payload.to_string());
        Self {
            platform: platform.into(),
            item_id: item_id.into(),
            payload,
            content_hash,
        }
    }
}

/// A fetched sub-item (comment or reply) belonging to a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub platform: String,
    pub item_id: String,
    pub comment_id: String,
    pub payload: serde_json::Value,
}

/// One page of comments for a content item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommentPage {
    pub comments: Vec<Comment>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
