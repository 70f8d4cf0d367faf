// Filesystem ResultSink: <output_dir>/<key>.jpg

use async_trait::async_trait;
use imgpipe_core::domain::{CompressedImage, ResultKey};
use imgpipe_core::error::{AppError, Result};
use imgpipe_core::port::ResultSink;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FsResultSink {
    output_dir: PathBuf,
}

impl FsResultSink {
    /// Create the output directory if needed
    pub async fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
            AppError::Persist(format!(
                "Failed to create output directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path_for(&self, key: &ResultKey) -> PathBuf {
        self.output_dir.join(format!("{}.jpg", key))
    }
}

#[async_trait]
impl ResultSink for FsResultSink {
    /// Write to a temp file in the same directory, then rename over the
    /// final path. Readers never see a partial file; the same key written
    /// twice keeps the last complete write.
    async fn write(&self, key: &ResultKey, image: &CompressedImage) -> Result<String> {
        let final_path = self.path_for(key);
        let tmp_path = self
            .output_dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));

        let persist_err = |action: &str, path: &Path, e: std::io::Error| {
            AppError::Persist(format!("Failed to {} {}: {}", action, path.display(), e))
        };

        if let Err(e) = tokio::fs::write(&tmp_path, &image.bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(persist_err("write", &tmp_path, e));
        }

        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(persist_err("rename into", &final_path, e));
        }

        debug!(
            result_key = %key,
            path = %final_path.display(),
            bytes = image.bytes.len(),
            "Result written"
        );
        Ok(final_path.display().to_string())
    }
}
