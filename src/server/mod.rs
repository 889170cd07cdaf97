//! HTTP delivery of encoded artifacts
//!
//! Routes:
//! - `GET /` plain-text liveness greeting
//! - `GET /capture` one JPEG snapshot
//! - `GET /mjpeg` unbounded `multipart/x-mixed-replace` stream
//! - `GET /health` and `GET /api/stats` JSON status

pub mod fanout;
pub mod multipart;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::channel::{BoundedChannel, TakeTimeout};
use crate::config::{DeliveryConfig, DeliveryMode};
use crate::frame::{Artifact, Frame};
use crate::pipeline::Pipeline;
use crate::stats::{PipelineStats, StatsSnapshot};
use fanout::{ArtifactDistributor, ArtifactReceiver};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ServerError {
    #[error("no frame available within {0:?}")]
    SnapshotTimeout(Duration),

    #[error("pipeline stopped")]
    Closed,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
    }
}

/// Where the routes get their artifacts from
#[derive(Clone)]
pub enum ArtifactSource {
    /// Every consumer takes destructively from the shared channel
    Compete(Arc<BoundedChannel<Artifact>>),
    /// Every consumer gets its own copy of each artifact
    Broadcast(Arc<ArtifactDistributor>),
}

impl ArtifactSource {
    /// Builds the source for `mode`.
    ///
    /// In broadcast mode this spawns the distributor pump, so it must be
    /// called from within a tokio runtime.
    pub fn new(artifacts: Arc<BoundedChannel<Artifact>>, mode: DeliveryMode) -> Self {
        match mode {
            DeliveryMode::Compete => Self::Compete(artifacts),
            DeliveryMode::Broadcast => {
                let distributor = Arc::new(ArtifactDistributor::new(artifacts.capacity()));
                distributor.spawn_pump(artifacts);
                Self::Broadcast(distributor)
            }
        }
    }

    /// Waits for the next artifact, at most `timeout` if one is given
    pub async fn next(&self, timeout: Option<Duration>) -> Result<Artifact, ServerError> {
        let artifact = match self {
            Self::Compete(channel) => match timeout {
                Some(limit) => channel
                    .take_timeout(limit)
                    .await
                    .map_err(|TakeTimeout(limit)| ServerError::SnapshotTimeout(limit))?,
                None => channel.take().await,
            },
            Self::Broadcast(distributor) => {
                let mut rx = distributor.subscribe().ok_or(ServerError::Closed)?;
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, rx.recv())
                        .await
                        .map_err(|_| ServerError::SnapshotTimeout(limit))?,
                    None => rx.recv().await,
                }
            }
        };

        artifact.ok_or(ServerError::Closed)
    }

    fn feed(&self) -> Result<Feed, ServerError> {
        match self {
            Self::Compete(channel) => Ok(Feed::Compete(Arc::clone(channel))),
            Self::Broadcast(distributor) => distributor
                .subscribe()
                .map(Feed::Broadcast)
                .ok_or(ServerError::Closed),
        }
    }
}

/// Per-connection artifact supply for the stream route
enum Feed {
    Compete(Arc<BoundedChannel<Artifact>>),
    Broadcast(ArtifactReceiver),
}

impl Feed {
    async fn next(&mut self) -> Option<Artifact> {
        match self {
            Self::Compete(channel) => channel.take().await,
            Self::Broadcast(rx) => rx.recv().await,
        }
    }
}

/// One connected stream client; dropped by the transport on disconnect
struct StreamClient {
    feed: Feed,
    stats: Arc<PipelineStats>,
}

impl StreamClient {
    fn new(feed: Feed, stats: Arc<PipelineStats>) -> Self {
        let clients = stats.stream_clients.fetch_add(1, Ordering::Relaxed) + 1;
        info!(clients = %clients, "Stream client connected");
        Self { feed, stats }
    }

    async fn next_part(&mut self) -> Option<Bytes> {
        let artifact = self.feed.next().await?;
        let part = multipart::encode_part(artifact.jpeg());

        PipelineStats::incr(&self.stats.parts_streamed);
        self.stats
            .bytes_served
            .fetch_add(part.len() as u64, Ordering::Relaxed);
        debug!(sequence = %artifact.sequence(), "Streamed part");

        Some(part)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        let clients = self.stats.stream_clients.fetch_sub(1, Ordering::Relaxed) - 1;
        info!(clients = %clients, "Stream client disconnected");
    }
}

/// Web server state
#[derive(Clone)]
pub struct AppState {
    source: ArtifactSource,
    artifacts: Arc<BoundedChannel<Artifact>>,
    frames: Option<Arc<BoundedChannel<Frame>>>,
    stats: Arc<PipelineStats>,
    snapshot_timeout: Option<Duration>,
}

impl AppState {
    /// Must be called from within a tokio runtime in broadcast mode
    pub fn new(
        artifacts: Arc<BoundedChannel<Artifact>>,
        stats: Arc<PipelineStats>,
        delivery: &DeliveryConfig,
    ) -> Self {
        Self {
            source: ArtifactSource::new(Arc::clone(&artifacts), delivery.mode),
            artifacts,
            frames: None,
            stats,
            snapshot_timeout: delivery.snapshot_timeout(),
        }
    }

    /// Serves the artifacts of a running pipeline
    pub fn from_pipeline(pipeline: &Pipeline, delivery: &DeliveryConfig) -> Self {
        Self::new(pipeline.artifacts(), pipeline.stats(), delivery)
            .with_frames(pipeline.frames())
    }

    /// Includes the frame channel in `/api/stats`
    pub fn with_frames(mut self, frames: Arc<BoundedChannel<Frame>>) -> Self {
        self.frames = Some(frames);
        self
    }

    fn stats_snapshot(&self) -> StatsSnapshot {
        let frames = self
            .frames
            .as_ref()
            .map(|frames| frames.stats())
            .unwrap_or_default();
        self.stats.snapshot(frames, self.artifacts.stats())
    }
}

/// Builds the delivery router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(hello_handler))
        .route("/capture", get(capture_handler))
        .route("/mjpeg", get(mjpeg_handler))
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until `shutdown` resolves and every open response has finished.
///
/// Stream responses finish once the artifact channel is closed.
pub async fn run_server<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Starting web server on http://{}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn hello_handler() -> &'static str {
    "Hello, world!"
}

/// Snapshot handler: one destructive take per request
async fn capture_handler(State(state): State<AppState>) -> Result<Response, ServerError> {
    let artifact = match state.source.next(state.snapshot_timeout).await {
        Ok(artifact) => artifact,
        Err(e) => {
            if matches!(e, ServerError::SnapshotTimeout(_)) {
                PipelineStats::incr(&state.stats.snapshot_timeouts);
            }
            warn!(error = %e, "Snapshot unavailable");
            return Err(e);
        }
    };

    PipelineStats::incr(&state.stats.snapshots_served);
    state
        .stats
        .bytes_served
        .fetch_add(artifact.len() as u64, Ordering::Relaxed);
    debug!(sequence = %artifact.sequence(), bytes = %artifact.len(), "Serving snapshot");

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, NO_CACHE),
        ],
        artifact.into_jpeg(),
    )
        .into_response())
}

/// Stream handler: one multipart part per artifact until disconnect
async fn mjpeg_handler(State(state): State<AppState>) -> Result<Response, ServerError> {
    let client = StreamClient::new(state.source.feed()?, Arc::clone(&state.stats));

    let parts = stream::unfold(client, |mut client| async move {
        let part = client.next_part().await?;
        Some((Ok::<_, Infallible>(part), client))
    });

    Ok((
        [
            (header::CONTENT_TYPE, multipart::CONTENT_TYPE),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(parts),
    )
        .into_response())
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.artifacts.is_closed() {
        "stopped"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats_snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use futures_util::StreamExt;
    use tower::ServiceExt;

    fn artifact(seq: u64) -> Artifact {
        Artifact::new(seq, Bytes::from(vec![0xFF, 0xD8, seq as u8, 0xFF, 0xD9]))
    }

    fn state(artifacts: &Arc<BoundedChannel<Artifact>>, timeout_ms: u64) -> AppState {
        let delivery = DeliveryConfig {
            mode: DeliveryMode::Compete,
            snapshot_timeout_ms: timeout_ms,
        };
        AppState::new(Arc::clone(artifacts), Arc::new(PipelineStats::new()), &delivery)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_hello() {
        let artifacts = Arc::new(BoundedChannel::new(3));
        let response = router(state(&artifacts, 100)).oneshot(get("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, "Hello, world!");
    }

    #[tokio::test]
    async fn test_capture_takes_oldest() {
        let artifacts = Arc::new(BoundedChannel::new(3));
        artifacts.put(artifact(1));
        artifacts.put(artifact(2));

        let response = router(state(&artifacts, 100))
            .oneshot(get("/capture"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(body_bytes(response).await, artifact(1).into_jpeg());
        assert_eq!(artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_times_out() {
        let artifacts = Arc::new(BoundedChannel::new(3));
        let state = state(&artifacts, 20);
        let stats = Arc::clone(&state.stats);

        let response = router(state).oneshot(get("/capture")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(stats.snapshot_timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_capture_on_closed_channel() {
        let artifacts = Arc::new(BoundedChannel::new(3));
        artifacts.close();

        // Unbounded wait still returns once the channel is closed
        let response = router(state(&artifacts, 0))
            .oneshot(get("/capture"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_mjpeg_streams_parts() {
        let artifacts = Arc::new(BoundedChannel::new(3));
        artifacts.put(artifact(7));

        let response = router(state(&artifacts, 100))
            .oneshot(get("/mjpeg"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace;boundary=jpegboundary"
        );

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first, multipart::encode_part(artifact(7).jpeg()));

        artifacts.close();
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_client_count() {
        let artifacts = Arc::new(BoundedChannel::new(3));
        let state = state(&artifacts, 100);
        let stats = Arc::clone(&state.stats);

        let response = router(state).oneshot(get("/mjpeg")).await.unwrap();
        assert_eq!(stats.stream_clients.load(Ordering::Relaxed), 1);

        drop(response);
        assert_eq!(stats.stream_clients.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_broadcast_snapshot_waits_for_next_publish() {
        let artifacts = Arc::new(BoundedChannel::new(3));
        let source = ArtifactSource::new(Arc::clone(&artifacts), DeliveryMode::Broadcast);

        let waiter = {
            let source = source.clone();
            tokio::spawn(async move { source.next(Some(Duration::from_secs(5))).await })
        };
        // Let the waiter subscribe before publishing
        while matches!(&source, ArtifactSource::Broadcast(d) if d.subscriber_count() == 0) {
            tokio::task::yield_now().await;
        }
        artifacts.put(artifact(3));

        assert_eq!(waiter.await.unwrap().unwrap().sequence(), 3);
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let artifacts = Arc::new(BoundedChannel::new(3));
        let app = router(state(&artifacts, 100));

        let health = app.clone().oneshot(get("/health")).await.unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body_bytes(health).await).unwrap();
        assert_eq!(health["status"], "ok");

        let stats = app.oneshot(get("/api/stats")).await.unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&body_bytes(stats).await).unwrap();
        assert_eq!(stats["artifact_channel"]["capacity"], 3);
    }
}
