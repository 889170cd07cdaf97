//! Camera snapshot and MJPEG streaming server
//!
//! Frames flow through two bounded, overwrite-oldest channels:
//! - a capture thread fills the frame channel
//! - a rayon worker pool compresses frames to JPEG into the artifact channel
//! - an axum server answers `/capture` with one JPEG and `/mjpeg` with a
//!   `multipart/x-mixed-replace` stream
//!
//! Producers never block on slow consumers: a full channel evicts its
//! oldest item.
//!
//! # Example
//!
//! ```no_run
//! use mjpeg_streamer::capture::TestPatternSource;
//! use mjpeg_streamer::config::Config;
//! use mjpeg_streamer::pipeline::Pipeline;
//! use mjpeg_streamer::server::{run_server, AppState};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let source = Box::new(TestPatternSource::new(640, 480, 30));
//! let pipeline = Pipeline::start(source, &config.pipeline)?;
//!
//! let state = AppState::from_pipeline(&pipeline, &config.delivery);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! run_server(listener, state, std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod encoder;
pub mod frame;
pub mod pipeline;
pub mod server;
pub mod stats;
pub mod worker;

// Re-exports for convenience
pub use channel::{BoundedChannel, ChannelStats, PutOutcome};
pub use config::{Config, DeliveryMode};
pub use frame::{Artifact, Frame};
pub use pipeline::Pipeline;
pub use stats::{PipelineStats, StatsSnapshot};
