//! `multipart/x-mixed-replace` framing for the MJPEG stream
//!
//! Each part on the wire:
//!
//! ```text
//! --jpegboundary\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```
//!
//! The stream is unbounded, so no closing `--jpegboundary--` is ever sent.

use bytes::{Buf, Bytes, BytesMut};

/// Boundary token separating parts
pub const BOUNDARY: &str = "jpegboundary";

/// `Content-Type` of the stream response
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=jpegboundary";

/// Frames one JPEG as a complete multipart part
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );

    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("expected boundary line, found {0:?}")]
    MissingBoundary(String),

    #[error("malformed part header: {0}")]
    Header(String),
}

/// Incremental decoder for a multipart body arriving in arbitrary chunks
#[derive(Debug, Default)]
pub struct PartDecoder {
    buffer: BytesMut,
}

impl PartDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete part body, or `Ok(None)` if more input is
    /// needed.
    pub fn next_part(&mut self) -> Result<Option<Bytes>, MultipartError> {
        // Tolerate the CRLF terminating the previous part being split off
        while self.buffer.starts_with(b"\r\n") {
            self.buffer.advance(2);
        }

        let Some(headers_end) = find(&self.buffer, b"\r\n\r\n") else {
            return Ok(None);
        };

        let head = String::from_utf8_lossy(&self.buffer[..headers_end]).into_owned();
        let mut lines = head.split("\r\n");

        let boundary = lines.next().unwrap_or_default();
        if boundary.strip_prefix("--") != Some(BOUNDARY) {
            return Err(MultipartError::MissingBoundary(boundary.to_string()));
        }

        let mut length = None;
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| MultipartError::Header(line.to_string()))?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| MultipartError::Header(line.to_string()))?;
                length = Some(parsed);
            }
        }

        let body_start = headers_end + 4;
        let body_len = match length {
            Some(len) => {
                if self.buffer.len() < body_start + len {
                    return Ok(None);
                }
                len
            }
            // Without a length the body runs up to the next boundary line
            None => {
                let delimiter = format!("\r\n--{}", BOUNDARY);
                match find(&self.buffer[body_start..], delimiter.as_bytes()) {
                    Some(len) => len,
                    None => return Ok(None),
                }
            }
        };

        self.buffer.advance(body_start);
        Ok(Some(self.buffer.split_to(body_len).freeze()))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_layout_is_exact() {
        let part = encode_part(&[0xFF, 0xD8, 0xFF, 0xD9]);

        let mut expected = b"--jpegboundary\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n".to_vec();
        expected.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(&part[..], &expected[..]);
    }

    #[test]
    fn test_content_type_matches_boundary() {
        assert_eq!(CONTENT_TYPE, format!("multipart/x-mixed-replace;boundary={}", BOUNDARY));
    }

    #[test]
    fn test_decoder_handles_byte_at_a_time() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_part(b"first"));
        wire.extend_from_slice(&encode_part(b"second\r\n--jpegboundary"));

        let mut decoder = PartDecoder::new();
        let mut parts = Vec::new();
        for byte in wire {
            decoder.push(&[byte]);
            while let Some(part) = decoder.next_part().unwrap() {
                parts.push(part);
            }
        }

        assert_eq!(parts, vec![Bytes::from("first"), Bytes::from("second\r\n--jpegboundary")]);
    }

    #[test]
    fn test_decoder_without_content_length() {
        let mut decoder = PartDecoder::new();
        decoder.push(b"--jpegboundary\r\nContent-Type: image/jpeg\r\n\r\nabc\r\n--jpegboundary\r\n");

        assert_eq!(decoder.next_part().unwrap(), Some(Bytes::from("abc")));
        assert_eq!(decoder.next_part().unwrap(), None);
    }

    #[test]
    fn test_decoder_rejects_foreign_boundary() {
        let mut decoder = PartDecoder::new();
        decoder.push(b"--other\r\nContent-Type: image/jpeg\r\n\r\n");

        assert_eq!(
            decoder.next_part(),
            Err(MultipartError::MissingBoundary("--other".to_string()))
        );
    }
}
