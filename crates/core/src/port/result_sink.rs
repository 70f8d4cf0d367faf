// Result Sink Port
// Boundary to storage of compressed images (local disk, object store, ...)

use crate::domain::{CompressedImage, ResultKey};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Store `image` under `key` and return its location.
    ///
    /// Writing the same key twice replaces the previous content.
    async fn write(&self, key: &ResultKey, image: &CompressedImage) -> Result<String>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// One captured write
    #[derive(Debug, Clone)]
    pub struct RecordedWrite {
        pub key: String,
        pub source_url: String,
        pub byte_len: usize,
    }

    /// In-memory sink that records every write
    #[derive(Default)]
    pub struct RecordingSink {
        writes: Mutex<Vec<RecordedWrite>>,
        failing: AtomicBool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make subsequent writes fail with a persist error
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn writes(&self) -> Vec<RecordedWrite> {
            self.writes.lock().unwrap().clone()
        }

        pub fn write_count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn write(&self, key: &ResultKey, image: &CompressedImage) -> Result<String> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::Persist(format!("sink unavailable for {}", key)));
            }

            self.writes.lock().unwrap().push(RecordedWrite {
                key: key.as_str().to_string(),
                source_url: image.source_url.clone(),
                byte_len: image.bytes.len(),
            });
            Ok(format!("memory://{}", key))
        }
    }
}
