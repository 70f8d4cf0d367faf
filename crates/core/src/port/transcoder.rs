// Image Transcoder Port
// Abstraction over fetch + decode + re-encode of one source image

use crate::domain::{CompressedImage, PipelineStage, Quality};
use async_trait::async_trait;
use thiserror::Error;

/// Transcode errors, one family per stage
#[derive(Error, Debug, Clone)]
pub enum TranscodeError {
    #[error("Fetch failed for {url}: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Image at {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Encode failed: {0}")]
    Encode(String),
}

impl TranscodeError {
    /// Transport errors, timeouts, 408, 429 and 5xx may succeed on redelivery.
    /// Everything else is a property of the image itself.
    pub fn is_transient(&self) -> bool {
        match self {
            TranscodeError::Fetch { status: None, .. } => true,
            TranscodeError::Fetch {
                status: Some(code), ..
            } => *code == 408 || *code == 429 || *code >= 500,
            TranscodeError::TooLarge { .. }
            | TranscodeError::Decode(_)
            | TranscodeError::Encode(_) => false,
        }
    }

    /// Stage the error was raised in
    pub fn stage(&self) -> PipelineStage {
        match self {
            TranscodeError::Fetch { .. } | TranscodeError::TooLarge { .. } => {
                PipelineStage::Fetching
            }
            TranscodeError::Decode(_) => PipelineStage::Decoding,
            TranscodeError::Encode(_) => PipelineStage::Encoding,
        }
    }
}

/// Image Transcoder trait
///
/// Implementations:
/// - HttpImageTranscoder: reqwest fetch + `image` crate JPEG re-encode
#[async_trait]
pub trait ImageTranscoder: Send + Sync {
    /// Fetch the image at `url` and re-encode it at [`ImageTranscoder::quality`]
    ///
    /// # Errors
    /// - TranscodeError::Fetch on non-2xx response or transport error
    /// - TranscodeError::TooLarge if the body exceeds the size cap
    /// - TranscodeError::Decode on unknown format or corrupt stream
    /// - TranscodeError::Encode on encoder fault
    async fn transcode(&self, url: &str) -> Result<CompressedImage, TranscodeError>;

    /// Quality level applied to every output
    fn quality(&self) -> Quality;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock transcoder behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Return a fake image of the given dimensions
        Success { width: u32, height: u32 },
        /// Fail with the given error
        Fail(TranscodeError),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed
        Slow(Duration),
    }

    /// Mock transcoder: per-URL behaviors with a default fallback
    pub struct MockTranscoder {
        default: MockBehavior,
        per_url: Mutex<HashMap<String, MockBehavior>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockTranscoder {
        pub fn new(default: MockBehavior) -> Self {
            Self {
                default,
                per_url: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success {
                width: 4,
                height: 3,
            })
        }

        pub fn with_url(self, url: impl Into<String>, behavior: MockBehavior) -> Self {
            self.per_url.lock().unwrap().insert(url.into(), behavior);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageTranscoder for MockTranscoder {
        async fn transcode(&self, url: &str) -> Result<CompressedImage, TranscodeError> {
            self.calls.lock().unwrap().push(url.to_string());

            let behavior = self
                .per_url
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or_else(|| self.default.clone());

            let image = |width: u32, height: u32| CompressedImage {
                source_url: url.to_string(),
                bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
                quality: self.quality(),
                width,
                height,
            };

            match behavior {
                MockBehavior::Success { width, height } => Ok(image(width, height)),
                MockBehavior::Fail(err) => Err(err),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(image(4, 3))
                }
            }
        }

        fn quality(&self) -> Quality {
            Quality::default()
        }
    }
}
