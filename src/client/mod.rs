//! Client fetch loop: pull JPEGs from the delivery server, decode them on
//! the worker pool and hand the bitmaps to a display surface.

#[cfg(feature = "window")]
mod window;

#[cfg(feature = "window")]
pub use window::WindowDisplay;

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError};
use crate::frame::Frame;
use crate::server::multipart::{MultipartError, PartDecoder};
use crate::worker::{PoolError, WorkerPool};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("HTTP transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream framing: {0}")]
    Stream(#[from] MultipartError),

    #[error("worker pool: {0}")]
    Pool(#[from] PoolError),

    #[error("display: {0}")]
    Display(String),
}

/// What the fetch loop should do after a frame was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayControl {
    Continue,
    Quit,
}

/// Surface that decoded frames are presented on
pub trait Display {
    fn show(&mut self, frame: &Frame) -> Result<DisplayControl, ClientError>;
}

/// Display that only logs, optionally quitting after a number of frames
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    max_frames: Option<u64>,
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new(max_frames: Option<u64>) -> Self {
        Self {
            max_frames,
            shown: 0,
        }
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl Display for HeadlessDisplay {
    fn show(&mut self, frame: &Frame) -> Result<DisplayControl, ClientError> {
        self.shown += 1;
        info!(
            frame = %self.shown,
            resolution = %format!("{}x{}", frame.width(), frame.height()),
            "Frame received"
        );

        match self.max_frames {
            Some(max) if self.shown >= max => Ok(DisplayControl::Quit),
            _ => Ok(DisplayControl::Continue),
        }
    }
}

/// Totals reported when a fetch loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub frames: u64,
    pub decode_failures: u64,
}

/// Fetches frames from one delivery server
pub struct FetchLoop {
    http: reqwest::Client,
    base_url: String,
    workers: WorkerPool,
    summary: FetchSummary,
}

impl FetchLoop {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8080`
    pub fn new(base_url: &str, workers: WorkerPool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            workers,
            summary: FetchSummary::default(),
        }
    }

    /// Repeatedly requests `/capture` until the display quits.
    ///
    /// A non-200 answer or a transport failure ends the loop with an error.
    pub async fn run_snapshots<D: Display>(
        &mut self,
        display: &mut D,
    ) -> Result<FetchSummary, ClientError> {
        let url = format!("{}/capture", self.base_url);
        info!(url = %url, "Fetching snapshots");

        loop {
            let response = self.http.get(&url).send().await?;
            check_status(&url, &response)?;
            let jpeg = response.bytes().await?;

            if self.present(jpeg, display).await? == DisplayControl::Quit {
                return Ok(self.summary);
            }
        }
    }

    /// Reads `/mjpeg` until the display quits or the server ends the stream
    pub async fn run_stream<D: Display>(
        &mut self,
        display: &mut D,
    ) -> Result<FetchSummary, ClientError> {
        let url = format!("{}/mjpeg", self.base_url);
        info!(url = %url, "Opening stream");

        let response = self.http.get(&url).send().await?;
        check_status(&url, &response)?;

        let mut body = response.bytes_stream();
        let mut decoder = PartDecoder::new();

        while let Some(chunk) = body.next().await {
            decoder.push(&chunk?);

            while let Some(part) = decoder.next_part()? {
                if self.present(part, display).await? == DisplayControl::Quit {
                    return Ok(self.summary);
                }
            }
        }

        info!("Server closed the stream");
        Ok(self.summary)
    }

    pub fn summary(&self) -> FetchSummary {
        self.summary
    }

    /// Decodes off the runtime and shows the result; a bad image is skipped
    async fn present<D: Display>(
        &mut self,
        jpeg: Bytes,
        display: &mut D,
    ) -> Result<DisplayControl, ClientError> {
        let decoded: Result<Frame, CodecError> =
            self.workers.run(move || codec::decode_jpeg(&jpeg)).await?;

        match decoded {
            Ok(frame) => {
                self.summary.frames += 1;
                let frame = frame.with_sequence(self.summary.frames);
                debug!(sequence = %frame.sequence(), "Decoded frame");
                display.show(&frame)
            }
            Err(e) => {
                self.summary.decode_failures += 1;
                warn!(error = %e, "Skipping undecodable image");
                Ok(DisplayControl::Continue)
            }
        }
    }
}

fn check_status(url: &str, response: &reqwest::Response) -> Result<(), ClientError> {
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(ClientError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_quits_after_max() {
        let frame = Frame::new(2, 2, 1, vec![0; 12]);
        let mut display = HeadlessDisplay::new(Some(2));

        assert_eq!(display.show(&frame).unwrap(), DisplayControl::Continue);
        assert_eq!(display.show(&frame).unwrap(), DisplayControl::Quit);
        assert_eq!(display.shown(), 2);
    }

    #[test]
    fn test_headless_unbounded() {
        let frame = Frame::new(2, 2, 1, vec![0; 12]);
        let mut display = HeadlessDisplay::default();

        for _ in 0..100 {
            assert_eq!(display.show(&frame).unwrap(), DisplayControl::Continue);
        }
    }

    #[tokio::test]
    async fn test_decode_failure_is_skipped() {
        let workers = WorkerPool::new("client-test", 1).unwrap();
        let mut fetch = FetchLoop::new("http://127.0.0.1:1/", workers);
        let mut display = HeadlessDisplay::new(Some(1));

        let control = fetch.present(Bytes::from_static(b"not a jpeg"), &mut display).await.unwrap();

        assert_eq!(control, DisplayControl::Continue);
        assert_eq!(fetch.summary().decode_failures, 1);
        assert_eq!(display.shown(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let workers = WorkerPool::new("client-test", 1).unwrap();
        // Nothing listens on port 1
        let mut fetch = FetchLoop::new("http://127.0.0.1:1", workers);

        let err = fetch
            .run_snapshots(&mut HeadlessDisplay::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Http(_)));
    }
}
