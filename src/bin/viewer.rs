//! Fetches frames from a running streamer and displays them

use anyhow::{Context, Result};
use clap::Parser;
use mjpeg_streamer::client::{Display, FetchLoop, FetchSummary, HeadlessDisplay};
use mjpeg_streamer::worker::WorkerPool;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "viewer")]
#[command(about = "Displays frames served by mjpeg-streamer")]
#[command(version)]
struct Cli {
    /// Server root URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Read the multipart stream instead of polling snapshots
    #[arg(long)]
    mjpeg: bool,

    /// Log frames instead of opening a window
    #[arg(long)]
    headless: bool,

    /// Quit after this many frames
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// Decoder threads (0 = one per CPU)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let workers = WorkerPool::new("decoder", cli.threads).context("Failed to start decoder pool")?;
    let mut fetch = FetchLoop::new(&cli.url, workers);

    let summary = if cli.headless {
        run(&cli, &mut fetch, &mut HeadlessDisplay::new(cli.frames)).await?
    } else {
        run_windowed(&cli, &mut fetch).await?
    };

    info!(
        frames = %summary.frames,
        decode_failures = %summary.decode_failures,
        "Viewer stopped"
    );
    Ok(())
}

async fn run<D: Display>(cli: &Cli, fetch: &mut FetchLoop, display: &mut D) -> Result<FetchSummary> {
    let summary = if cli.mjpeg {
        fetch.run_stream(display).await
    } else {
        fetch.run_snapshots(display).await
    };

    summary.with_context(|| format!("Fetching from {} failed", cli.url))
}

#[cfg(feature = "window")]
async fn run_windowed(cli: &Cli, fetch: &mut FetchLoop) -> Result<FetchSummary> {
    let mut display = mjpeg_streamer::client::WindowDisplay::new("MJPEG Viewer - q/ESC to exit");
    run(cli, fetch, &mut display).await
}

#[cfg(not(feature = "window"))]
async fn run_windowed(cli: &Cli, fetch: &mut FetchLoop) -> Result<FetchSummary> {
    info!("Built without the `window` feature, logging frames instead");
    run(cli, fetch, &mut HeadlessDisplay::new(cli.frames)).await
}
