//! Synthetic capture source producing moving colour bars

use std::thread;
use std::time::{Duration, Instant};

use super::{CaptureError, CaptureSource};
use crate::frame::{Frame, CHANNELS};

/// SMPTE-style bar colours (RGB)
const BARS: [[u8; 3]; 7] = [
    [192, 192, 192],
    [192, 192, 0],
    [0, 192, 192],
    [0, 192, 0],
    [192, 0, 192],
    [192, 0, 0],
    [0, 0, 192],
];

/// Generates colour bars that scroll one column per frame, paced at `fps`.
///
/// Stands in for a camera when no device is available.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    interval: Duration,
    next_deadline: Option<Instant>,
    offset: u32,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_secs(1) / fps.max(1),
            next_deadline: None,
            offset: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let width = self.width as usize;
        let bar_width = (width / BARS.len()).max(1);

        let mut row = Vec::with_capacity(width * CHANNELS);
        for x in 0..width {
            let shifted = (x + self.offset as usize) % width;
            let bar = (shifted / bar_width).min(BARS.len() - 1);
            row.extend_from_slice(&BARS[bar]);
        }

        row.repeat(self.height as usize)
    }

    /// Sleeps until the next frame is due, like a live device would block
    fn pace(&mut self) {
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }

        // Don't accumulate debt if the consumer fell behind
        self.next_deadline = Some(deadline.max(now) + self.interval);
    }
}

impl CaptureSource for TestPatternSource {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.pace();

        let data = self.render();
        self.offset = (self.offset + 1) % self.width.max(1);

        Ok(Frame::new(self.width, self.height, 0, data))
    }

    fn describe(&self) -> String {
        format!(
            "test pattern {}x{} @ {:?}/frame",
            self.width, self.height, self.interval
        )
    }
}
