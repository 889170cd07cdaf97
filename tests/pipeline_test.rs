//! Capture → encode → deliver, end to end with synthetic sources

use mjpeg_streamer::capture::{CaptureError, CaptureSource, TestPatternSource};
use mjpeg_streamer::client::{ClientError, FetchLoop, HeadlessDisplay};
use mjpeg_streamer::codec::decode_jpeg;
use mjpeg_streamer::config::{DeliveryConfig, DeliveryMode, PipelineConfig};
use mjpeg_streamer::pipeline::Pipeline;
use mjpeg_streamer::server::{run_server, AppState};
use mjpeg_streamer::worker::WorkerPool;
use mjpeg_streamer::{BoundedChannel, Frame, PipelineStats};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn config(capacity: usize) -> PipelineConfig {
    PipelineConfig {
        channel_capacity: capacity,
        encoder_threads: 2,
        ..Default::default()
    }
}

/// Yields the given frames once, then reports the device gone
struct Script(VecDeque<Frame>);

impl CaptureSource for Script {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        self.0
            .pop_front()
            .ok_or_else(|| CaptureError::Device("script finished".into()))
    }

    fn describe(&self) -> String {
        "script".into()
    }
}

fn gray(width: u32, height: u32) -> Frame {
    Frame::new(width, height, 0, vec![128; (width * height * 3) as usize])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pattern_reaches_artifact_channel() {
    let source = Box::new(TestPatternSource::new(64, 48, 60));
    let pipeline = Pipeline::start(source, &config(3)).unwrap();
    let artifacts = pipeline.artifacts();

    let artifact = timeout(WAIT, artifacts.take()).await.unwrap().unwrap();
    let frame = decode_jpeg(artifact.jpeg()).unwrap();

    assert_eq!((frame.width(), frame.height()), (64, 48));
    assert!(artifact.sequence() >= 1);

    pipeline.shutdown().await;
    assert!(artifacts.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_codec_failure_does_not_block_next_frame() {
    let frames = VecDeque::from(vec![
        // Buffer too short for its dimensions
        Frame::new(16, 16, 0, vec![0; 10]),
        gray(16, 16),
        gray(16, 16),
    ]);
    let mut pipeline = Pipeline::start(Box::new(Script(frames)), &config(8)).unwrap();
    let artifacts = pipeline.artifacts();

    // Fatal end of script closes frames, then the encoder closes artifacts
    timeout(WAIT, pipeline.finished()).await.unwrap();

    let sequences: Vec<u64> = artifacts.snapshot().iter().map(|a| a.sequence()).collect();
    assert_eq!(sequences, vec![2, 3]);

    let stats = pipeline.stats_snapshot();
    assert_eq!(stats.encode_failures, 1);
    assert_eq!(stats.frames_encoded, 2);

    pipeline.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_viewer_fetches_snapshots_and_stream() {
    let source = Box::new(TestPatternSource::new(32, 24, 60));
    let pipeline = Pipeline::start(source, &config(3)).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = AppState::from_pipeline(&pipeline, &DeliveryConfig::default());
    let server = tokio::spawn(run_server(listener, state, async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }));

    let workers = WorkerPool::new("viewer-test", 1).unwrap();
    let mut fetch = FetchLoop::new(&base, workers.clone());
    let mut display = HeadlessDisplay::new(Some(3));
    let summary = timeout(WAIT, fetch.run_snapshots(&mut display))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.decode_failures, 0);

    let mut fetch = FetchLoop::new(&base, workers);
    let mut display = HeadlessDisplay::new(Some(2));
    let summary = timeout(WAIT, fetch.run_stream(&mut display))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.frames, 2);

    pipeline.shutdown().await;
    server.abort();
}

#[tokio::test]
async fn test_viewer_stops_on_unavailable_snapshot() {
    // Nothing is ever encoded, so /capture times out with 503
    let artifacts = Arc::new(BoundedChannel::new(3));
    let delivery = DeliveryConfig {
        mode: DeliveryMode::Compete,
        snapshot_timeout_ms: 30,
    };
    let state = AppState::new(Arc::clone(&artifacts), Arc::new(PipelineStats::new()), &delivery);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(run_server(listener, state, std::future::pending()));

    let mut fetch = FetchLoop::new(&base, WorkerPool::new("viewer-test", 1).unwrap());
    let mut display = HeadlessDisplay::default();
    let err = timeout(WAIT, fetch.run_snapshots(&mut display))
        .await
        .unwrap()
        .unwrap_err();

    assert!(
        matches!(err, ClientError::Status { status: 503, .. }),
        "unexpected error: {}",
        err
    );
    assert_eq!(display.shown(), 0);

    server.abort();
}
