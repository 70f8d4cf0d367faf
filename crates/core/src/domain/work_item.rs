// Work Item Domain Model and wire format

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Catalog row identifier
pub type ProductId = i64;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// One image reference of a catalog row, as discovered by the producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ProductId,
    pub image_url: String,
}

impl WorkItem {
    pub fn new(id: ProductId, image_url: impl Into<String>) -> Self {
        Self {
            id,
            image_url: image_url.into(),
        }
    }
}

/// Decoded form of a delivery, as seen by a consumer.
///
/// `product_id` is `None` only for legacy plain-text messages, which carry
/// nothing but the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    pub product_id: Option<ProductId>,
    pub image_url: String,
}

impl From<WorkItem> for ImageTask {
    fn from(item: WorkItem) -> Self {
        Self {
            product_id: Some(item.id),
            image_url: item.image_url,
        }
    }
}

/// Message body encoding used by the producer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `{"id":..,"image_url":".."}`
    #[default]
    Json,
    /// Raw UTF-8 URL, no product id
    PlainText,
}

impl WireFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::Json => CONTENT_TYPE_JSON,
            WireFormat::PlainText => CONTENT_TYPE_TEXT,
        }
    }

    /// Serialize a work item into a message body
    pub fn encode(&self, item: &WorkItem) -> Result<Vec<u8>> {
        match self {
            WireFormat::Json => serde_json::to_vec(item)
                .map_err(|e| DomainError::MalformedBody(e.to_string())),
            WireFormat::PlainText => Ok(item.image_url.as_bytes().to_vec()),
        }
    }
}

/// Decode a delivery body into a task.
///
/// Dispatches on the content type (parameters such as `; charset=utf-8` are
/// ignored). Without a content type, a body starting with `{` is read as JSON
/// and anything else as a plain URL.
pub fn decode_task(content_type: Option<&str>, body: &[u8]) -> Result<ImageTask> {
    let media_type = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty());

    let task = match media_type.as_deref() {
        Some(CONTENT_TYPE_JSON) => decode_json(body)?,
        Some(CONTENT_TYPE_TEXT) => decode_text(body)?,
        Some(other) => return Err(DomainError::UnsupportedContentType(other.to_string())),
        None => {
            let looks_like_json = body
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .is_some_and(|b| *b == b'{');
            if looks_like_json {
                decode_json(body)?
            } else {
                decode_text(body)?
            }
        }
    };

    validate_image_url(&task.image_url)?;
    Ok(task)
}

fn decode_json(body: &[u8]) -> Result<ImageTask> {
    let item: WorkItem =
        serde_json::from_slice(body).map_err(|e| DomainError::MalformedBody(e.to_string()))?;
    Ok(ImageTask {
        product_id: Some(item.id),
        image_url: item.image_url.trim().to_string(),
    })
}

fn decode_text(body: &[u8]) -> Result<ImageTask> {
    let url = std::str::from_utf8(body)
        .map_err(|e| DomainError::MalformedBody(format!("body is not UTF-8: {}", e)))?;
    Ok(ImageTask {
        product_id: None,
        image_url: url.trim().to_string(),
    })
}

/// Only absolute http(s) URLs are fetchable
pub fn validate_image_url(url: &str) -> Result<()> {
    let lower = url.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));

    match rest {
        Some(host_and_path) if !host_and_path.is_empty() && !url.contains(char::is_whitespace) => {
            Ok(())
        }
        _ => Err(DomainError::InvalidImageUrl(url.to_string())),
    }
}
