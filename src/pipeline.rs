//! Owns the two hand-off channels and the stages between them
//!
//! ```text
//! CaptureSource ─▶ frames ─▶ EncoderPool ─▶ artifacts ─▶ delivery server
//!   (thread)      (bounded)   (rayon)        (bounded)      (tokio)
//! ```
//!
//! Channels are created here and handed to each stage as `Arc` handles.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::{CaptureError, CaptureHandle, CaptureSource};
use crate::channel::BoundedChannel;
use crate::config::PipelineConfig;
use crate::encoder::EncoderPool;
use crate::frame::{Artifact, Frame};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::worker::{PoolError, WorkerPool};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("capture: {0}")]
    Capture(#[from] CaptureError),

    #[error("worker pool: {0}")]
    Pool(#[from] PoolError),
}

/// Running capture → encode pipeline
pub struct Pipeline {
    frames: Arc<BoundedChannel<Frame>>,
    artifacts: Arc<BoundedChannel<Artifact>>,
    stats: Arc<PipelineStats>,
    capture: Option<CaptureHandle>,
    encoder: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Starts capture on its own thread and the encode loop on the runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        source: Box<dyn CaptureSource>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let workers = WorkerPool::new("encoder", config.encoder_threads)?;
        Self::start_with_pool(source, config, workers)
    }

    /// Like [`start`](Self::start) but reuses an existing worker pool
    pub fn start_with_pool(
        source: Box<dyn CaptureSource>,
        config: &PipelineConfig,
        workers: WorkerPool,
    ) -> Result<Self, PipelineError> {
        let frames = Arc::new(BoundedChannel::new(config.channel_capacity));
        let artifacts = Arc::new(BoundedChannel::new(config.channel_capacity));
        let stats = Arc::new(PipelineStats::new());

        info!(
            capacity = %config.channel_capacity,
            quality = %config.jpeg_quality,
            "Starting pipeline"
        );

        let encoder = EncoderPool::new(workers, config.jpeg_quality);
        let encoder = tokio::spawn(encoder.run(
            Arc::clone(&frames),
            Arc::clone(&artifacts),
            Arc::clone(&stats),
        ));

        let capture = CaptureHandle::spawn(
            source,
            Arc::clone(&frames),
            Arc::clone(&stats),
            config.capture_backoff(),
        )
        .inspect_err(|_| frames.close())?;

        Ok(Self {
            frames,
            artifacts,
            stats,
            capture: Some(capture),
            encoder: Some(encoder),
        })
    }

    /// Handle to the channel the delivery server reads from
    pub fn artifacts(&self) -> Arc<BoundedChannel<Artifact>> {
        Arc::clone(&self.artifacts)
    }

    pub fn frames(&self) -> Arc<BoundedChannel<Frame>> {
        Arc::clone(&self.frames)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Gets a point-in-time statistics snapshot
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.frames.stats(), self.artifacts.stats())
    }

    /// Checks if the capture thread is still producing frames
    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().is_some_and(CaptureHandle::is_running)
    }

    /// Resolves when the encoder loop has exited, which happens once capture
    /// stops and the frame channel drains.
    pub async fn finished(&mut self) {
        if let Some(encoder) = self.encoder.as_mut() {
            if let Err(e) = encoder.await {
                warn!(error = %e, "Encoder task failed");
            }
            self.encoder = None;
        }
    }

    /// Stops capture, lets the encoder drain, and closes the artifact channel
    pub async fn shutdown(mut self) {
        info!("Stopping pipeline");

        if let Some(mut capture) = self.capture.take() {
            // Joining the capture thread blocks for up to one device read
            let _ = tokio::task::spawn_blocking(move || capture.stop()).await;
        }

        // Capture closed the frame channel; the encoder drains and exits
        self.finished().await;
        self.artifacts.close();

        let stats = self.stats_snapshot();
        info!(
            captured = %stats.frames_captured,
            encoded = %stats.frames_encoded,
            encode_failures = %stats.encode_failures,
            "Pipeline stopped"
        );
    }
}
