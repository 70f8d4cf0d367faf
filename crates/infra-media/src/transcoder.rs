// ImageTranscoder over HTTP fetch + JPEG re-encode

use crate::codec::transcode_bytes;
use crate::fetcher::HttpImageFetcher;
use async_trait::async_trait;
use imgpipe_core::domain::{CompressedImage, Quality};
use imgpipe_core::port::{ImageTranscoder, TranscodeError};

pub struct HttpImageTranscoder {
    fetcher: HttpImageFetcher,
    quality: Quality,
}

impl HttpImageTranscoder {
    pub fn new(fetcher: HttpImageFetcher, quality: Quality) -> Self {
        Self { fetcher, quality }
    }
}

#[async_trait]
impl ImageTranscoder for HttpImageTranscoder {
    async fn transcode(&self, url: &str) -> Result<CompressedImage, TranscodeError> {
        let bytes = self.fetcher.fetch(url).await?;

        // Decode + encode are CPU-bound
        let quality = self.quality;
        let encoded = tokio::task::spawn_blocking(move || transcode_bytes(&bytes, quality))
            .await
            .map_err(|e| TranscodeError::Decode(format!("codec task failed: {}", e)))??;

        Ok(CompressedImage {
            source_url: url.to_string(),
            bytes: encoded.bytes,
            quality,
            width: encoded.width,
            height: encoded.height,
        })
    }

    fn quality(&self) -> Quality {
        self.quality
    }
}
