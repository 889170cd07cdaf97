//! Camera snapshot and MJPEG streaming server

// Use jemalloc for better memory management (optional feature)
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use mjpeg_streamer::capture;
use mjpeg_streamer::config::Config;
use mjpeg_streamer::pipeline::Pipeline;
use mjpeg_streamer::server::{self, AppState};
use mjpeg_streamer::{Artifact, BoundedChannel, Frame, PipelineStats, StatsSnapshot};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mjpeg-streamer")]
#[command(about = "Serves camera snapshots and an MJPEG stream over HTTP")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listen address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve a synthetic test pattern instead of a camera
    #[arg(long)]
    test_pattern: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("MJPEG streamer starting");

    let config = load_config(&cli)?;
    info!(
        camera = %config.camera.index,
        resolution = %format!("{}x{}", config.camera.width, config.camera.height),
        mode = ?config.delivery.mode,
        "Configuration loaded"
    );

    let source = capture::open_source(&config.camera).context("Failed to open capture source")?;
    info!(source = %source.describe(), "Capture source ready");

    let mut pipeline =
        Pipeline::start(source, &config.pipeline).context("Failed to start pipeline")?;

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let state = AppState::from_pipeline(&pipeline, &config.delivery);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(server::run_server(listener, state, async {
        let _ = shutdown_rx.await;
    }));

    let stats_task = (config.pipeline.stats_interval_seconds > 0).then(|| {
        tokio::spawn(log_stats(
            pipeline.stats(),
            pipeline.frames(),
            pipeline.artifacts(),
            Duration::from_secs(config.pipeline.stats_interval_seconds),
        ))
    });

    info!("Streaming started, press Ctrl+C to stop");
    wait_for_stop(tokio::signal::ctrl_c(), &mut pipeline).await;

    if let Some(task) = stats_task {
        task.abort();
    }

    // Closing the artifact channel ends every open stream response
    pipeline.shutdown().await;
    let _ = shutdown_tx.send(());

    server
        .await
        .context("Server task failed")?
        .context("Server error")?;

    info!("Stopped");
    Ok(())
}

/// Resolves on `signal` or when capture ends.
///
/// A failed signal listener is logged and treated as a stop request so the
/// ordered teardown still runs.
async fn wait_for_stop<S>(signal: S, pipeline: &mut Pipeline)
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        res = signal => {
            match res {
                Ok(()) => info!("Shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
            }
        }
        _ = pipeline.finished() => {
            warn!("Capture ended, shutting down");
        }
    }
}

/// Reads the config file if present and applies CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if Path::new(&cli.config).exists() {
        info!(config_path = %cli.config, "Loading configuration");
        Config::load(&cli.config)
            .with_context(|| format!("Failed to load configuration from {}", cli.config))?
    } else {
        warn!(config_path = %cli.config, "Config file not found, using defaults");
        Config::default()
    };

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.test_pattern {
        config.camera.test_pattern = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn log_stats(
    stats: Arc<PipelineStats>,
    frames: Arc<BoundedChannel<Frame>>,
    artifacts: Arc<BoundedChannel<Artifact>>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    let mut previous = StatsSnapshot::default();
    let mut last = Instant::now();

    loop {
        ticker.tick().await;

        let current = stats.snapshot(frames.stats(), artifacts.stats());
        let elapsed = last.elapsed().as_secs_f64();

        info!(
            captured = %current.frames_captured,
            capture_fps = %format!("{:.1}", current.capture_fps(&previous, elapsed)),
            encode_fps = %format!("{:.1}", current.encode_fps(&previous, elapsed)),
            kbps = %format!("{:.0}", current.bitrate_kbps(&previous, elapsed)),
            drop_rate = %format!("{:.3}", current.frame_drop_rate()),
            clients = %current.stream_clients,
            "Stats"
        );

        previous = current;
        last = Instant::now();
    }
}
