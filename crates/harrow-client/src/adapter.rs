//! A [`PlatformAdapter`] configured from data instead of code.
//!
//! Platforms whose APIs are plain JSON over HTTP can be described by an
//! [`ApiDescriptor`]: one endpoint template per operation plus the JSON
//! pointers (RFC 6901) that locate ids, cursors and payloads in responses.
//!
//! ```json
//! {
//!   "platform": "demo",
//!   "base_url": "https://api.demo.test",
//!   "search":   { "path": "/search", "params": { "q": "{keyword}", "page": "{page}" },
//!                 "cursor_param": "cursor", "navigation": true },
//!   "detail":   { "path": "/items/{item_id}" },
//!   "comments": { "path": "/items/{item_id}/comments", "cursor_param": "after" },
//!   "listing":  { "items": "/data/items", "id": "/id",
//!                 "cursor": "/data/next", "has_more": "/data/more" },
//!   "item":     { "payload": "/data" },
//!   "comment_list": { "items": "/data/comments", "id": "/cid", "cursor": "/data/next" }
//! }
//! ```
//!
//! Placeholders: `{keyword}`, `{page}`, `{creator_id}`, `{item_id}`.

use std::collections::BTreeMap;
use std::path::Path;

use harrow_core::error::AppError;
use harrow_core::models::{Comment, CommentPage, ContentItem, ListingPage};
use harrow_core::request::{ApiRequest, ApiResponse, HttpMethod};
use harrow_core::traits::PlatformAdapter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One endpoint template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    /// Path appended to `base_url`; placeholders are percent-encoded.
    pub path: String,
    /// Query params (GET) or JSON body fields (POST); placeholders are raw.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Param carrying the continuation cursor, when the endpoint pages.
    #[serde(default)]
    pub cursor_param: Option<String>,
    /// Whether this request is a page fetch whose URL becomes the next Referer.
    #[serde(default)]
    pub navigation: bool,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

/// Where a paged list lives in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListFormat {
    /// Pointer to the array of entries.
    pub items: String,
    /// Pointer to the id within one entry; empty means the entry itself.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub cursor: Option<String>,
    /// Pointer to a boolean; when absent, "more" means a cursor was returned.
    #[serde(default)]
    pub has_more: Option<String>,
}

/// Where the item payload lives in a detail response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemFormat {
    /// Pointer to the payload; empty means the whole body.
    #[serde(default)]
    pub payload: String,
}

/// Declarative description of a platform API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDescriptor {
    pub platform: String,
    pub base_url: String,
    #[serde(default)]
    pub search: Option<Endpoint>,
    #[serde(default)]
    pub creator: Option<Endpoint>,
    #[serde(default)]
    pub feed: Option<Endpoint>,
    #[serde(default)]
    pub detail: Option<Endpoint>,
    #[serde(default)]
    pub comments: Option<Endpoint>,
    pub listing: ListFormat,
    #[serde(default)]
    pub item: ItemFormat,
    #[serde(default)]
    pub comment_list: Option<ListFormat>,
}

impl ApiDescriptor {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid API descriptor: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Cannot read API descriptor {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

/// [`PlatformAdapter`] driven by an [`ApiDescriptor`].
#[derive(Debug, Clone)]
pub struct JsonApiAdapter {
    descriptor: ApiDescriptor,
}

impl JsonApiAdapter {
    pub fn new(descriptor: ApiDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &ApiDescriptor {
        &self.descriptor
    }

    fn endpoint<'a>(
        &self,
        endpoint: &'a Option<Endpoint>,
        name: &str,
    ) -> Result<&'a Endpoint, AppError> {
        endpoint.as_ref().ok_or_else(|| {
            AppError::ConfigError(format!(
                "Platform '{}' has no {name} endpoint",
                self.descriptor.platform
            ))
        })
    }

    fn build(
        &self,
        endpoint: &Endpoint,
        vars: &[(&str, &str)],
        cursor: Option<&str>,
    ) -> ApiRequest {
        let path = fill(&endpoint.path, vars, encode_segment);
        let url = format!("{}{}", self.descriptor.base_url.trim_end_matches('/'), path);

        let mut request = match endpoint.method {
            HttpMethod::Get => ApiRequest::get(url),
            HttpMethod::Post => ApiRequest::post(url),
        };
        for (key, template) in &endpoint.params {
            request = request.with_param(key, fill(template, vars, str::to_string));
        }
        if let (Some(param), Some(cursor)) = (&endpoint.cursor_param, cursor) {
            request = request.with_param(param, cursor);
        }
        for (name, value) in &endpoint.headers {
            request = request.with_header(name, value);
        }
        if endpoint.navigation {
            request = request.as_navigation();
        }
        request
    }

    fn body(&self, response: &ApiResponse) -> Result<Value, AppError> {
        response.json()
    }
}

fn fill(template: &str, vars: &[(&str, &str)], encode: impl Fn(&str) -> String) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), &encode(value))
    })
}

fn encode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Resolve a pointer; the empty pointer is the value itself.
fn at<'a>(value: &'a Value, pointer: &str) -> Option<&'a Value> {
    value.pointer(pointer).filter(|v| !v.is_null())
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

struct ParsedList {
    entries: Vec<(String, Value)>,
    next_cursor: Option<String>,
    has_more: bool,
}

fn parse_list(body: &Value, format: &ListFormat, url: &str) -> Result<ParsedList, AppError> {
    let entries = match at(body, &format.items) {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|entry| {
                let id = at(entry, &format.id).and_then(as_id)?;
                Some((id, entry.clone()))
            })
            .collect(),
        Some(_) => {
            return Err(AppError::Decode(format!(
                "{} in response from {url} is not an array",
                format.items
            )));
        }
    };

    let next_cursor = format
        .cursor
        .as_deref()
        .and_then(|p| at(body, p))
        .and_then(as_id);
    let has_more = match format.has_more.as_deref() {
        Some(pointer) => at(body, pointer).and_then(Value::as_bool).unwrap_or(false),
        None => next_cursor.is_some(),
    };

    Ok(ParsedList {
        entries,
        next_cursor,
        has_more,
    })
}

impl PlatformAdapter for JsonApiAdapter {
    fn platform(&self) -> &str {
        &self.descriptor.platform
    }

    fn search_request(
        &self,
        keyword: &str,
        page: u32,
        cursor: Option<&str>,
    ) -> Result<ApiRequest, AppError> {
        let endpoint = self.endpoint(&self.descriptor.search, "search")?;
        let page = page.to_string();
        Ok(self.build(endpoint, &[("keyword", keyword), ("page", &page)], cursor))
    }

    fn creator_request(&self, creator_id: &str, cursor: Option<&str>) -> Result<ApiRequest, AppError> {
        let endpoint = self.endpoint(&self.descriptor.creator, "creator")?;
        Ok(self.build(endpoint, &[("creator_id", creator_id)], cursor))
    }

    fn feed_request(&self, cursor: Option<&str>) -> Result<ApiRequest, AppError> {
        let endpoint = self.endpoint(&self.descriptor.feed, "feed")?;
        Ok(self.build(endpoint, &[], cursor))
    }

    fn detail_request(&self, item_id: &str) -> Result<ApiRequest, AppError> {
        let endpoint = self.endpoint(&self.descriptor.detail, "detail")?;
        Ok(self.build(endpoint, &[("item_id", item_id)], None))
    }

    fn comments_request(&self, item_id: &str, cursor: Option<&str>) -> Result<ApiRequest, AppError> {
        let endpoint = self.endpoint(&self.descriptor.comments, "comments")?;
        Ok(self.build(endpoint, &[("item_id", item_id)], cursor))
    }

    fn parse_listing(&self, response: &ApiResponse) -> Result<ListingPage, AppError> {
        let body = self.body(response)?;
        let list = parse_list(&body, &self.descriptor.listing, &response.url)?;
        Ok(ListingPage {
            item_ids: list.entries.into_iter().map(|(id, _)| id).collect(),
            next_cursor: list.next_cursor,
            has_more: list.has_more,
        })
    }

    fn parse_item(&self, item_id: &str, response: &ApiResponse) -> Result<ContentItem, AppError> {
        let body = self.body(response)?;
        let payload = at(&body, &self.descriptor.item.payload)
            .cloned()
            .ok_or_else(|| AppError::UnknownItem(item_id.to_string()))?;
        Ok(ContentItem::new(&self.descriptor.platform, item_id, payload))
    }

    fn parse_comments(&self, item_id: &str, response: &ApiResponse) -> Result<CommentPage, AppError> {
        let format = self.descriptor.comment_list.as_ref().ok_or_else(|| {
            AppError::ConfigError(format!(
                "Platform '{}' has no comment_list format",
                self.descriptor.platform
            ))
        })?;
        let body = self.body(response)?;
        let list = parse_list(&body, format, &response.url)?;
        let comments = list
            .entries
            .into_iter()
            .map(|(comment_id, payload)| Comment {
                platform: self.descriptor.platform.clone(),
                item_id: item_id.to_string(),
                comment_id,
                payload,
            })
            .collect();
        Ok(CommentPage {
            comments,
            next_cursor: list.next_cursor,
            has_more: list.has_more,
        })
    }
}
