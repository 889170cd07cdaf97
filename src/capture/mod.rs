//! Frame capture stage
//!
//! A [`CaptureSource`] is pulled on its own OS thread so device reads never
//! compete with the async runtime or the encoder workers. Every successful
//! frame is numbered and put into the frame channel; transient failures are
//! retried after a short backoff and never surface downstream.

#[cfg(feature = "gstreamer")]
mod gst;
mod platform;
mod test_pattern;

#[cfg(feature = "gstreamer")]
pub use gst::GstCamera;
pub use platform::{
    default_device_path, detect_platform, pipeline_description, CaptureGeometry, PlatformInfo,
};
pub use test_pattern::TestPatternSource;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::channel::{BoundedChannel, PutOutcome};
use crate::config::CameraConfig;
use crate::frame::Frame;
use crate::stats::PipelineStats;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// No frame ready yet; the caller should retry
    #[error("no frame available: {0}")]
    Transient(String),

    #[error("capture device error: {0}")]
    Device(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("capture backend not available: {0}")]
    Unsupported(String),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[cfg(feature = "gstreamer")]
    #[error("GStreamer error: {0}")]
    Gst(#[from] gstreamer::glib::Error),

    #[cfg(feature = "gstreamer")]
    #[error("GStreamer bool error: {0}")]
    GstBool(#[from] gstreamer::glib::BoolError),
}

impl CaptureError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Transient(_))
    }
}

/// Pull-based frame producer.
///
/// Each call performs exactly one device read. Implementations block for at
/// most roughly one frame interval.
pub trait CaptureSource: Send {
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Opens the source selected by `config`.
///
/// Device capture needs the `gstreamer` feature; the test pattern is always
/// available.
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn CaptureSource>, CaptureError> {
    if config.test_pattern {
        return Ok(Box::new(TestPatternSource::new(
            config.width,
            config.height,
            config.fps,
        )));
    }

    open_device(config)
}

#[cfg(feature = "gstreamer")]
fn open_device(config: &CameraConfig) -> Result<Box<dyn CaptureSource>, CaptureError> {
    Ok(Box::new(GstCamera::open(config)?))
}

#[cfg(not(feature = "gstreamer"))]
fn open_device(config: &CameraConfig) -> Result<Box<dyn CaptureSource>, CaptureError> {
    Err(CaptureError::Unsupported(format!(
        "camera {} requested but built without the `gstreamer` feature; use --test-pattern",
        config.index
    )))
}

/// Handle to a running capture thread
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Starts pulling frames from `source` into `frames`.
    ///
    /// When the loop ends (stop requested or fatal device error) the frame
    /// channel is closed so downstream stages wind down.
    pub fn spawn(
        mut source: Box<dyn CaptureSource>,
        frames: Arc<BoundedChannel<Frame>>,
        stats: Arc<PipelineStats>,
        backoff: Duration,
    ) -> Result<Self, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let is_running = Arc::clone(&running);

        info!(source = %source.describe(), "Starting capture");

        let thread = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                let mut sequence = 0u64;

                while is_running.load(Ordering::Relaxed) {
                    match source.next_frame() {
                        Ok(frame) => {
                            sequence += 1;
                            PipelineStats::incr(&stats.frames_captured);

                            match frames.put(frame.with_sequence(sequence)) {
                                PutOutcome::Stored => {}
                                PutOutcome::Evicted(old) => {
                                    debug!(sequence = %old.sequence(), "Frame evicted before encode");
                                }
                                PutOutcome::Closed(_) => break,
                            }
                        }
                        Err(e) if e.is_transient() => {
                            PipelineStats::incr(&stats.capture_failures);
                            debug!(error = %e, "Transient capture failure");
                            thread::sleep(backoff);
                        }
                        Err(e) => {
                            error!(error = %e, "Capture failed");
                            break;
                        }
                    }
                }

                is_running.store(false, Ordering::Relaxed);
                frames.close();
                info!(frames = %sequence, "Capture stopped");
            })?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Checks if the capture loop is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Requests the loop to stop and waits for the thread to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
