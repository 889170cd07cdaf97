//! Raw frames and compressed artifacts moving through the pipeline

use bytes::Bytes;

/// Number of interleaved colour channels in a raw frame (RGB8)
pub const CHANNELS: usize = 3;

/// One captured bitmap prior to compression.
///
/// Pixels are row-major, interleaved RGB, 8 bits per channel. A frame is
/// owned by exactly one pipeline stage at a time and is never mutated after
/// capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    sequence: u64,
    data: Vec<u8>,
}

impl Frame {
    /// Wraps an RGB8 buffer.
    ///
    /// The buffer length is not checked here; the codec rejects frames whose
    /// buffer does not match `width * height * 3`.
    pub fn new(width: u32, height: u32, sequence: u64, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            sequence,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Capture sequence number, monotonically increasing per source
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Byte length a well-formed frame of these dimensions must have
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// One JPEG-encoded frame ready for network delivery.
///
/// Cloning shares the underlying buffer, so fan-out to several clients is
/// zero-copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    sequence: u64,
    jpeg: Bytes,
}

impl Artifact {
    pub fn new(sequence: u64, jpeg: Bytes) -> Self {
        Self { sequence, jpeg }
    }

    /// Sequence number of the frame this artifact was encoded from
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn jpeg(&self) -> &Bytes {
        &self.jpeg
    }

    pub fn into_jpeg(self) -> Bytes {
        self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}
