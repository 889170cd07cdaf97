//! JPEG encode/decode boundary
//!
//! Both directions are CPU-bound and are expected to run on the worker pool,
//! never directly on the async runtime.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use thiserror::Error;

use crate::frame::Frame;

/// Default JPEG quality
pub const DEFAULT_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("empty frame ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("JPEG quality must be between 1 and 100, got {0}")]
    Quality(u8),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}

/// Compresses an RGB8 frame to JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Bytes, CodecError> {
    if quality == 0 || quality > 100 {
        return Err(CodecError::Quality(quality));
    }

    if frame.width() == 0 || frame.height() == 0 {
        return Err(CodecError::EmptyFrame {
            width: frame.width(),
            height: frame.height(),
        });
    }

    let expected = frame.expected_len();
    if frame.data().len() != expected {
        return Err(CodecError::BufferSize {
            width: frame.width(),
            height: frame.height(),
            expected,
            actual: frame.data().len(),
        });
    }

    // JPEG output is typically well under a tenth of the raw size
    let mut buffer = Vec::with_capacity(expected / 8);
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.write_image(
        frame.data(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;

    Ok(Bytes::from(buffer))
}

/// Decompresses a JPEG into an RGB8 frame with sequence number 0.
pub fn decode_jpeg(jpeg: &[u8]) -> Result<Frame, CodecError> {
    let image = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();

    Ok(Frame::new(width, height, 0, rgb.into_raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x * 255 / width) as u8);
                data.push((y * 255 / height) as u8);
                data.push(128);
            }
        }
        Frame::new(width, height, 1, data)
    }

    #[test]
    fn test_encode_produces_jpeg_markers() {
        let jpeg = encode_jpeg(&gradient(64, 48), DEFAULT_QUALITY).unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "missing SOI");
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9], "missing EOI");
    }

    #[test]
    fn test_roundtrip_preserves_dimensions() {
        // Odd sizes exercise partial MCUs
        let frame = gradient(33, 17);
        let jpeg = encode_jpeg(&frame, DEFAULT_QUALITY).unwrap();
        let decoded = decode_jpeg(&jpeg).unwrap();

        assert_eq!(decoded.width(), 33);
        assert_eq!(decoded.height(), 17);
        assert_eq!(decoded.data().len(), frame.data().len());
    }

    #[test]
    fn test_short_buffer_rejected() {
        let frame = Frame::new(16, 16, 0, vec![0; 10]);

        assert_matches!(
            encode_jpeg(&frame, DEFAULT_QUALITY),
            Err(CodecError::BufferSize { expected: 768, actual: 10, .. })
        );
    }

    #[test]
    fn test_empty_frame_rejected() {
        let frame = Frame::new(0, 16, 0, Vec::new());
        assert_matches!(encode_jpeg(&frame, 90), Err(CodecError::EmptyFrame { .. }));
    }

    #[test]
    fn test_invalid_quality() {
        assert_matches!(encode_jpeg(&gradient(8, 8), 0), Err(CodecError::Quality(0)));
        assert_matches!(encode_jpeg(&gradient(8, 8), 101), Err(CodecError::Quality(101)));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert_matches!(decode_jpeg(b"not a jpeg"), Err(CodecError::Image(_)));
    }
}
