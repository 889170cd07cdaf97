//! GStreamer device capture
//!
//! Frames are pulled synchronously from an `appsink` configured to hold a
//! single RGB buffer and drop older ones.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, info};

use super::platform::{default_device_path, detect_platform, pipeline_description, CaptureGeometry};
use super::{CaptureError, CaptureSource};
use crate::config::CameraConfig;
use crate::frame::{Frame, CHANNELS};

/// Upper bound on one device read so a stop request is noticed promptly
const PULL_TIMEOUT_MS: u64 = 100;

/// Camera opened through a platform-specific GStreamer pipeline
pub struct GstCamera {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    device: String,
}

impl GstCamera {
    /// Builds and starts the capture pipeline for `config`
    pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        gst::init()?;

        let platform = detect_platform();
        let device = config
            .device
            .clone()
            .unwrap_or_else(|| default_device_path(platform, config.index));

        let description = pipeline_description(
            platform,
            &CaptureGeometry {
                device: &device,
                width: config.width,
                height: config.height,
                fps: config.fps,
                flip_method: config.flip_method.as_deref(),
            },
        );
        debug!(pipeline = %description, "Creating GStreamer pipeline");

        let pipeline = gst::parse::launch(&description)?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Pipeline("Not a pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CaptureError::Pipeline("No appsink found".to_string()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Pipeline("Not an appsink".to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::Device(format!("{}: {:?}", device, e)))?;

        info!(
            device = %device,
            platform = ?platform,
            resolution = %format!("{}x{}", config.width, config.height),
            fps = %config.fps,
            "Camera opened"
        );

        Ok(Self {
            pipeline,
            appsink,
            device,
        })
    }
}

impl CaptureSource for GstCamera {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        let sample = match self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        {
            Some(sample) => sample,
            None if self.appsink.is_eos() => {
                return Err(CaptureError::Device(format!("{}: end of stream", self.device)))
            }
            None => return Err(CaptureError::Transient("no sample within timeout".into())),
        };

        let (width, height) = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .and_then(|s| Some((s.get::<i32>("width").ok()?, s.get::<i32>("height").ok()?)))
            .ok_or_else(|| CaptureError::Transient("sample without size caps".into()))?;
        let (width, height) = (width as usize, height as usize);

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::Transient("sample had no buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::Transient("unable to map buffer".into()))?;
        let data = map.as_slice();

        // RGB rows are padded to a 4-byte stride by videoconvert
        let row = width * CHANNELS;
        let stride = if height > 0 { data.len() / height } else { 0 };
        if stride < row {
            return Err(CaptureError::Transient(format!(
                "short buffer: {} bytes for {}x{}",
                data.len(),
                width,
                height
            )));
        }

        let pixels = if stride == row {
            data[..row * height].to_vec()
        } else {
            data.chunks_exact(stride)
                .take(height)
                .flat_map(|line| &line[..row])
                .copied()
                .collect()
        };

        Ok(Frame::new(width as u32, height as u32, 0, pixels))
    }

    fn describe(&self) -> String {
        format!("gstreamer {}", self.device)
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
