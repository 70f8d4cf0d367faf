// imgpipe Infrastructure - Media Adapter
// Implements: ImageTranscoder (reqwest + image), ResultSink (filesystem)

mod codec;
mod fetcher;
mod sink;
mod transcoder;

pub use codec::{transcode_bytes, EncodedJpeg};
pub use fetcher::{FetchLimits, HttpImageFetcher};
pub use sink::FsResultSink;
pub use transcoder::HttpImageTranscoder;
