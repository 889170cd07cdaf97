//! Pipeline statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::channel::ChannelStats;

/// Lock-free counters shared by every pipeline stage
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    pub capture_failures: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub encode_failures: AtomicU64,
    pub snapshots_served: AtomicU64,
    pub snapshot_timeouts: AtomicU64,
    pub parts_streamed: AtomicU64,
    pub bytes_served: AtomicU64,
    pub stream_clients: AtomicUsize,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of the counters
    pub fn snapshot(&self, frames: ChannelStats, artifacts: ChannelStats) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            snapshots_served: self.snapshots_served.load(Ordering::Relaxed),
            snapshot_timeouts: self.snapshot_timeouts.load(Ordering::Relaxed),
            parts_streamed: self.parts_streamed.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            stream_clients: self.stream_clients.load(Ordering::Relaxed),
            frame_channel: frames,
            artifact_channel: artifacts,
        }
    }
}

/// Serializable copy of [`PipelineStats`] plus channel state
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub frames_encoded: u64,
    pub encode_failures: u64,
    pub snapshots_served: u64,
    pub snapshot_timeouts: u64,
    pub parts_streamed: u64,
    pub bytes_served: u64,
    pub stream_clients: usize,
    pub frame_channel: ChannelStats,
    pub artifact_channel: ChannelStats,
}

impl StatsSnapshot {
    /// Calculates capture frame rate based on delta
    pub fn capture_fps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let delta = self.frames_captured.saturating_sub(previous.frames_captured);
        delta as f64 / elapsed_secs
    }

    /// Calculates encode frame rate based on delta
    pub fn encode_fps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let delta = self.frames_encoded.saturating_sub(previous.frames_encoded);
        delta as f64 / elapsed_secs
    }

    /// Calculates outgoing bitrate in kbps based on delta
    pub fn bitrate_kbps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let delta = self.bytes_served.saturating_sub(previous.bytes_served);
        (delta as f64 * 8.0) / elapsed_secs / 1000.0
    }

    /// Fraction of captured frames that never became an artifact
    pub fn frame_drop_rate(&self) -> f64 {
        if self.frames_captured == 0 {
            return 0.0;
        }

        let dropped = self.frame_channel.evictions + self.encode_failures;
        dropped as f64 / self.frames_captured as f64
    }
}
