// Decode any supported format, re-encode as JPEG

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GenericImageView};
use imgpipe_core::domain::Quality;
use imgpipe_core::port::TranscodeError;
use tracing::debug;

/// JPEG output of [`transcode_bytes`]
#[derive(Debug, Clone)]
pub struct EncodedJpeg {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode `bytes` (format guessed from content) and re-encode as JPEG.
///
/// CPU-bound: call from `spawn_blocking` in async code. Output is
/// deterministic for a given input and encoder version. Alpha is dropped,
/// dimensions are preserved.
pub fn transcode_bytes(bytes: &[u8], quality: Quality) -> Result<EncodedJpeg, TranscodeError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| TranscodeError::Decode(format!("Failed to decode image: {}", e)))?;

    let (width, height) = img.dimensions();

    // Convert to RGB8 for JPEG encoding (JPEG doesn't support transparency)
    let rgb_img = img.to_rgb8();

    let mut out = Vec::with_capacity(bytes.len() / 2);
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.value());
        encoder
            .encode(rgb_img.as_raw(), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| TranscodeError::Encode(format!("Failed to encode JPEG: {}", e)))?;
    }

    debug!(
        width,
        height,
        input_bytes = bytes.len(),
        output_bytes = out.len(),
        quality = quality.value(),
        "Image transcoded"
    );

    Ok(EncodedJpeg {
        bytes: out,
        width,
        height,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, Rgba};
    use std::io::Cursor;

    /// Gradient with some noise so JPEG quality makes a visible size difference
    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let noise = ((x * 31 + y * 17) ^ (x * y)) % 64;
            Rgb([
                ((x * 255) / width.max(1)) as u8,
                ((y * 255) / height.max(1)) as u8,
                (noise * 4) as u8,
            ])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_output_is_jpeg_with_same_dimensions() {
        let encoded = transcode_bytes(&sample_png(64, 48), Quality::default()).unwrap();

        assert_eq!((encoded.width, encoded.height), (64, 48));
        assert_eq!(image::guess_format(&encoded.bytes).unwrap(), ImageFormat::Jpeg);

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let png = sample_png(128, 128);
        let q50 = transcode_bytes(&png, Quality::new(50).unwrap()).unwrap();
        let q95 = transcode_bytes(&png, Quality::new(95).unwrap()).unwrap();

        assert!(
            q50.bytes.len() < q95.bytes.len(),
            "q50={} q95={}",
            q50.bytes.len(),
            q95.bytes.len()
        );
    }

    #[test]
    fn test_is_deterministic() {
        let png = sample_png(32, 32);
        let a = transcode_bytes(&png, Quality::default()).unwrap();
        let b = transcode_bytes(&png, Quality::default()).unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_alpha_channel_is_dropped() {
        let img = ImageBuffer::from_pixel(8, 8, Rgba([10u8, 20, 30, 128]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();

        let encoded = transcode_bytes(buf.get_ref(), Quality::default()).unwrap();
        assert_eq!((encoded.width, encoded.height), (8, 8));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result = transcode_bytes(b"<html>not an image</html>", Quality::default());
        assert!(matches!(result, Err(TranscodeError::Decode(_))));
    }

    #[test]
    fn test_truncated_image_is_decode_error() {
        let png = sample_png(64, 64);
        let result = transcode_bytes(&png[..png.len() / 2], Quality::default());
        assert!(matches!(result, Err(TranscodeError::Decode(_))));
    }
}
