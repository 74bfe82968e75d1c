use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::ffprobe::Resolution;

/// Every converted file ends up at exactly this size
pub const TARGET_RESOLUTION: Resolution = Resolution { width: 176, height: 144 };

/// Container extension of converted output
pub const TARGET_EXTENSION: &str = "3gp";

/// Video container extensions considered for conversion (lower-case)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpeg", "mpg", "3gp", "ts", "vob",
];

/// Filename prefix of in-progress encoder output
pub const TEMP_PREFIX: &str = "temp_";

/// Output smaller than this is treated as a broken encode
pub const MIN_OUTPUT_BYTES: u64 = 1024;

const STATE_FILE_NAME: &str = "conversion_state.json";

/// Configuration for a conversion run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// JSON file holding per-file conversion status
    pub state_file: PathBuf,
    /// Maximum number of encoder processes running at once
    pub workers: usize,
    /// Keep source files after a successful conversion
    pub keep_originals: bool,
    /// Only list what would be converted
    pub dry_run: bool,
    /// Timeout for a single ffprobe call
    pub probe_timeout_secs: u64,
    /// Timeout for a single ffmpeg encode
    pub encode_timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ConverterConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            state_file: default_state_file(),
            workers: 2,
            keep_originals: false,
            dry_run: false,
            probe_timeout_secs: 10,
            encode_timeout_secs: 300,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        if config.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }

        Ok(config)
    }
}

/// State file lives next to the executable so every folder shares one history
pub fn default_state_file() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(STATE_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(STATE_FILE_NAME))
}
