// Compressed Image Domain Model

use super::error::{DomainError, Result};
use super::work_item::{ImageTask, ProductId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed JPEG quality used by the pipeline (0-100, lower = smaller)
pub const DEFAULT_QUALITY: u8 = 50;

/// Hex characters of the URL digest kept in a result key
const URL_DIGEST_LEN: usize = 16;

/// JPEG quality level, validated to 1..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u8) -> Result<Self> {
        if (1..=100).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DomainError::InvalidQuality(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(DEFAULT_QUALITY)
    }
}

impl TryFrom<u8> for Quality {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> Self {
        q.0
    }
}

/// Output of the transcoder for one source image
#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub source_url: String,
    pub bytes: Vec<u8>,
    pub quality: Quality,
    pub width: u32,
    pub height: u32,
}

/// Storage key of a compressed result.
///
/// Unique per (product, url) so concurrent workers never overwrite each
/// other's output: `product-{id}-{digest}`, or `url-{digest}` when the product
/// is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey(String);

impl ResultKey {
    pub fn for_task(task: &ImageTask) -> Self {
        let digest = url_digest(&task.image_url);
        match task.product_id {
            Some(id) => Self(format!("product-{}-{}", id, digest)),
            None => Self(format!("url-{}", digest)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn url_digest(url: &str) -> String {
    let hash = Sha256::digest(url.as_bytes());
    let mut hex = hex::encode(hash);
    hex.truncate(URL_DIGEST_LEN);
    hex
}

/// Completion marker written after a result has been persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResultRecord {
    pub product_id: ProductId,
    pub image_url: String,
    pub result_key: String,
    pub location: String,
    pub byte_len: i64,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    pub processed_at: i64, // epoch ms
}

impl ImageResultRecord {
    pub fn new(
        product_id: ProductId,
        key: &ResultKey,
        location: impl Into<String>,
        image: &CompressedImage,
        processed_at: i64,
    ) -> Self {
        Self {
            product_id,
            image_url: image.source_url.clone(),
            result_key: key.as_str().to_string(),
            location: location.into(),
            byte_len: image.bytes.len() as i64,
            quality: image.quality.value(),
            width: image.width,
            height: image.height,
            processed_at,
        }
    }
}
