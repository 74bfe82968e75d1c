use std::fmt;
use std::path::Path;
use std::time::Duration;
use log::warn;
use serde::Deserialize;
use crate::config::ConverterConfig;
use crate::tools::ToolRunner;

/// Pixel dimensions of a video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is larger than `other`
    pub fn exceeds(&self, other: &Resolution) -> bool {
        self.width > other.width || self.height > other.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The subset of `ffprobe -of json` output we ask for
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl FFProbeData {
    /// Resolution of the first video stream, if it reported both dimensions
    pub fn resolution(&self) -> Option<Resolution> {
        let stream = self.streams.first()?;
        match (stream.width, stream.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some(Resolution { width, height }),
            _ => None,
        }
    }
}

/// ffprobe arguments selecting width/height of the first video stream as JSON
pub fn probe_args(file_path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-show_entries".to_string(),
        "stream=width,height".to_string(),
        "-of".to_string(),
        "json".to_string(),
        file_path.to_string_lossy().to_string(),
    ]
}

/// Parse ffprobe JSON into a resolution
pub fn parse_resolution(json: &str) -> Option<Resolution> {
    serde_json::from_str::<FFProbeData>(json).ok()?.resolution()
}

/// Ask ffprobe for the pixel dimensions of a file's first video stream.
///
/// Any failure (tool error, timeout, non-zero exit, bad JSON, no video stream)
/// yields `None`; the caller treats that as "cannot tell, try again next run".
pub async fn probe_resolution(runner: &dyn ToolRunner, cfg: &ConverterConfig, file_path: &Path) -> Option<Resolution> {
    let timeout = Duration::from_secs(cfg.probe_timeout_secs);
    let output = match runner.run(&cfg.ffprobe_bin, &probe_args(file_path), timeout).await {
        Ok(output) => output,
        Err(e) => {
            warn!("Could not get resolution for {}: {}", file_path.display(), e);
            return None;
        }
    };

    if !output.success() {
        warn!(
            "ffprobe failed (exit code {:?}) for {}: {}",
            output.exit_code,
            file_path.display(),
            output.stderr.trim()
        );
        return None;
    }

    let resolution = parse_resolution(&output.stdout);
    if resolution.is_none() {
        warn!("No video resolution reported for {}", file_path.display());
    }
    resolution
}
