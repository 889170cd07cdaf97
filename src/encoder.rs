//! Encode stage: frame channel → worker pool → artifact channel

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channel::{BoundedChannel, PutOutcome};
use crate::codec::{self, CodecError};
use crate::frame::{Artifact, Frame};
use crate::stats::PipelineStats;
use crate::worker::{PoolError, WorkerPool};

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// JPEG compression offloaded to the shared worker pool
#[derive(Debug, Clone)]
pub struct EncoderPool {
    workers: WorkerPool,
    quality: u8,
}

impl EncoderPool {
    pub fn new(workers: WorkerPool, quality: u8) -> Self {
        Self { workers, quality }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compresses one frame off the async runtime
    pub async fn encode(&self, frame: Frame) -> Result<Artifact, EncodeError> {
        let quality = self.quality;
        let sequence = frame.sequence();

        let jpeg = self
            .workers
            .run(move || codec::encode_jpeg(&frame, quality))
            .await??;

        Ok(Artifact::new(sequence, jpeg))
    }

    /// Runs the encode loop until the frame channel is closed and drained.
    ///
    /// A failed frame is dropped and the loop moves on to the next one. The
    /// artifact channel is closed on exit.
    pub async fn run(
        self,
        frames: Arc<BoundedChannel<Frame>>,
        artifacts: Arc<BoundedChannel<Artifact>>,
        stats: Arc<PipelineStats>,
    ) {
        info!(quality = %self.quality, workers = %self.workers.threads(), "Encoder started");

        while let Some(frame) = frames.take().await {
            let sequence = frame.sequence();

            match self.encode(frame).await {
                Ok(artifact) => {
                    PipelineStats::incr(&stats.frames_encoded);
                    match artifacts.put(artifact) {
                        PutOutcome::Stored => {}
                        PutOutcome::Evicted(old) => {
                            debug!(sequence = %old.sequence(), "Artifact evicted before delivery");
                        }
                        PutOutcome::Closed(_) => break,
                    }
                }
                Err(e) => {
                    PipelineStats::incr(&stats.encode_failures);
                    warn!(sequence = %sequence, error = %e, "Dropping frame after encode failure");
                }
            }
        }

        artifacts.close();
        info!("Encoder stopped");
    }
}
