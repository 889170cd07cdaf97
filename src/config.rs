//! Configuration management for the streaming server

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::channel::DEFAULT_CAPACITY;
use crate::codec::DEFAULT_QUALITY;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera index used to derive the platform default device path
    #[serde(default)]
    pub index: usize,

    /// Explicit device path; overrides `index`
    /// - macOS: "0" for first webcam, "1" for second, etc.
    /// - Linux: "/dev/video0"
    #[serde(default)]
    pub device: Option<String>,

    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Flip method (optional)
    /// - "vertical-flip"
    /// - "horizontal-flip"
    /// - "rotate-180"
    /// - "rotate-90"
    /// - "rotate-270"
    #[serde(default)]
    pub flip_method: Option<String>,

    /// Use the built-in colour bar generator instead of a device
    #[serde(default)]
    pub test_pattern: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            device: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            flip_method: None,
            test_pattern: false,
        }
    }
}

/// Frame pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of both the frame and the artifact channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,

    /// Encoder worker threads (0 = one per CPU)
    #[serde(default)]
    pub encoder_threads: usize,

    /// Sleep after a transient capture failure (milliseconds)
    #[serde(default = "default_capture_backoff_ms")]
    pub capture_backoff_ms: u64,

    /// Statistics reporting interval (seconds, 0 = disabled)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            jpeg_quality: default_quality(),
            encoder_threads: 0,
            capture_backoff_ms: default_capture_backoff_ms(),
            stats_interval_seconds: default_stats_interval(),
        }
    }
}

impl PipelineConfig {
    pub fn capture_backoff(&self) -> Duration {
        Duration::from_millis(self.capture_backoff_ms)
    }
}

/// How HTTP consumers share the artifact channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Every read is destructive; concurrent consumers race for artifacts
    #[default]
    Compete,

    /// Every consumer sees every artifact published after it connected
    Broadcast,
}

/// Delivery server behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryMode,

    /// Maximum wait for an artifact on `/capture` before answering 503
    /// (milliseconds, 0 = wait indefinitely)
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn snapshot_timeout(&self) -> Option<Duration> {
        match self.snapshot_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    30
}
fn default_channel_capacity() -> usize {
    DEFAULT_CAPACITY
}
fn default_quality() -> u8 {
    DEFAULT_QUALITY
}
fn default_capture_backoff_ms() -> u64 {
    5
}
fn default_stats_interval() -> u64 {
    10
}
fn default_snapshot_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pipeline = &self.pipeline;

        if pipeline.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.channel_capacity must be > 0".to_string(),
            ));
        }

        if pipeline.jpeg_quality == 0 || pipeline.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "pipeline.jpeg_quality must be between 1 and 100, got {}",
                pipeline.jpeg_quality
            )));
        }

        let cam = &self.camera;
        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid(
                "camera: width and height must be > 0".to_string(),
            ));
        }

        if cam.fps == 0 || cam.fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "camera: FPS must be between 1 and 120, got {}",
                cam.fps
            )));
        }

        if self.server.host.is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".to_string()));
        }

        Ok(())
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
