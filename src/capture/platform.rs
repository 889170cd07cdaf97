//! Platform detection for camera sources

use std::env;

/// Platform information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformInfo {
    /// macOS (Darwin)
    MacOS,

    /// Raspberry Pi (detected via /proc/device-tree)
    RaspberryPi,

    /// Generic Linux
    Linux,
}

/// Detects current platform
pub fn detect_platform() -> PlatformInfo {
    match env::consts::OS {
        "macos" => PlatformInfo::MacOS,
        "linux" if is_raspberry_pi() => PlatformInfo::RaspberryPi,
        _ => PlatformInfo::Linux,
    }
}

/// Checks if running on Raspberry Pi
fn is_raspberry_pi() -> bool {
    std::path::Path::new("/proc/device-tree/model").exists()
        || std::path::Path::new("/sys/firmware/devicetree/base/model").exists()
}

/// Gets platform-specific camera device path for `camera_index`
pub fn default_device_path(platform: PlatformInfo, camera_index: usize) -> String {
    match platform {
        PlatformInfo::MacOS => camera_index.to_string(),
        PlatformInfo::RaspberryPi => match camera_index {
            0 => "/base/axi/pcie@1000120000/rp1/i2c@88000/imx219@10".to_string(),
            1 => "/base/axi/pcie@1000120000/rp1/i2c@80000/imx219@10".to_string(),
            _ => format!("/dev/video{}", camera_index),
        },
        PlatformInfo::Linux => format!("/dev/video{}", camera_index),
    }
}

/// Raw capture geometry requested from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureGeometry<'a> {
    pub device: &'a str,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub flip_method: Option<&'a str>,
}

/// Builds a GStreamer launch line that delivers packed RGB frames to an
/// appsink named `sink`.
///
/// The appsink keeps a single buffer and drops older ones so a stalled
/// reader never backs up the device.
pub fn pipeline_description(platform: PlatformInfo, geometry: &CaptureGeometry<'_>) -> String {
    let source = match platform {
        PlatformInfo::MacOS => format!("avfvideosrc device-index={}", geometry.device),
        PlatformInfo::RaspberryPi => {
            format!("libcamerasrc camera-name=\"{}\"", geometry.device)
        }
        PlatformInfo::Linux => format!("v4l2src device={}", geometry.device),
    };

    let mut pipeline = format!(
        "{} ! video/x-raw,width={},height={},framerate={}/1 ! videoconvert",
        source, geometry.width, geometry.height, geometry.fps
    );

    if let Some(flip) = geometry.flip_method.and_then(flip_element) {
        pipeline.push_str(flip);
    }

    pipeline.push_str(
        " ! video/x-raw,format=RGB ! appsink name=sink max-buffers=1 drop=true sync=false",
    );

    pipeline
}

/// Gets GStreamer flip element for a configured flip method
fn flip_element(method: &str) -> Option<&'static str> {
    match method {
        "vertical-flip" => Some(" ! videoflip video-direction=5"),
        "horizontal-flip" => Some(" ! videoflip video-direction=4"),
        "rotate-180" => Some(" ! videoflip video-direction=2"),
        "rotate-90" => Some(" ! videoflip video-direction=1"),
        "rotate-270" => Some(" ! videoflip video-direction=3"),
        "none" => None,
        _ => {
            tracing::warn!(method = %method, "Unknown flip method");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(device: &str) -> CaptureGeometry<'_> {
        CaptureGeometry {
            device,
            width: 640,
            height: 480,
            fps: 30,
            flip_method: None,
        }
    }

    #[test]
    fn test_detect_platform() {
        let platform = detect_platform();
        assert!(matches!(
            platform,
            PlatformInfo::MacOS | PlatformInfo::Linux | PlatformInfo::RaspberryPi
        ));
    }

    #[test]
    fn test_default_device_path() {
        assert_eq!(default_device_path(PlatformInfo::MacOS, 0), "0");
        assert_eq!(default_device_path(PlatformInfo::Linux, 0), "/dev/video0");
        assert_eq!(default_device_path(PlatformInfo::Linux, 1), "/dev/video1");
        assert_eq!(
            default_device_path(PlatformInfo::RaspberryPi, 0),
            "/base/axi/pcie@1000120000/rp1/i2c@88000/imx219@10"
        );
    }

    #[test]
    fn test_linux_pipeline() {
        let desc = pipeline_description(PlatformInfo::Linux, &geometry("/dev/video0"));

        assert!(desc.starts_with("v4l2src device=/dev/video0 ! "));
        assert!(desc.contains("width=640,height=480,framerate=30/1"));
        assert!(desc.ends_with("appsink name=sink max-buffers=1 drop=true sync=false"));
        assert!(desc.contains("format=RGB"));
    }

    #[test]
    fn test_flip_inserted_before_rgb_caps() {
        let mut geo = geometry("0");
        geo.flip_method = Some("rotate-180");
        let desc = pipeline_description(PlatformInfo::MacOS, &geo);

        let flip = desc.find("videoflip video-direction=2").unwrap();
        let caps = desc.find("format=RGB").unwrap();
        assert!(desc.starts_with("avfvideosrc device-index=0"));
        assert!(flip < caps);
    }

    #[test]
    fn test_unknown_flip_ignored() {
        let mut geo = geometry("/dev/video0");
        geo.flip_method = Some("sideways");
        let desc = pipeline_description(PlatformInfo::Linux, &geo);

        assert!(!desc.contains("videoflip"));
    }
}
