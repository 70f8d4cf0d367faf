// HTTP fetch with an explicit timeout and a body size cap

use imgpipe_core::error::{AppError, Result};
use imgpipe_core::port::TranscodeError;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Whole request, connect through last body byte
    pub timeout: Duration,
    pub max_bytes: u64,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

pub struct HttpImageFetcher {
    client: Client,
    limits: FetchLimits,
}

impl HttpImageFetcher {
    pub fn new(limits: FetchLimits) -> Result<Self> {
        let client = Client::builder()
            .timeout(limits.timeout)
            .user_agent(concat!("imgpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, limits })
    }

    /// GET `url` and return the body.
    ///
    /// The size cap is enforced on the declared length and again while
    /// streaming, so a lying or missing Content-Length cannot bypass it.
    pub async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, TranscodeError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscodeError::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: format!("HTTP {}", status),
            });
        }

        let too_large = || TranscodeError::TooLarge {
            url: url.to_string(),
            limit: self.limits.max_bytes,
        };

        if let Some(len) = response.content_length() {
            if len > self.limits.max_bytes {
                return Err(too_large());
            }
        }

        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(url, e))? {
            if (body.len() + chunk.len()) as u64 > self.limits.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, bytes = body.len(), "Image fetched");
        Ok(body)
    }
}

fn fetch_error(url: &str, e: reqwest::Error) -> TranscodeError {
    let message = if e.is_timeout() {
        format!("timed out: {}", e)
    } else {
        e.to_string()
    };
    TranscodeError::Fetch {
        url: url.to_string(),
        status: e.status().map(|s| s.as_u16()),
        message,
    }
}
