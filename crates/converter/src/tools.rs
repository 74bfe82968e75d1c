use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use crate::config::ConverterConfig;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured result of an external tool invocation that ran to completion
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Reasons an external tool could not produce a [`ToolOutput`]
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error("failed to run {}: {source}", .program.display())]
    Io {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} timed out after {secs} seconds", .program.display())]
    TimedOut { program: PathBuf, secs: u64 },
}

/// Capability to run an external program (ffmpeg, ffprobe).
///
/// Production code uses [`SystemRunner`]; tests swap in fakes so the pipeline
/// can be exercised without real binaries.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as real subprocesses
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ToolRunner for SystemRunner {
    async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<ToolOutput, ToolError> {
        debug!("Executing: {} {}", program.display(), args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(program.to_path_buf())
            } else {
                ToolError::Io { program: program.to_path_buf(), source }
            }
        })?;

        // Drain both pipes while waiting so a chatty encoder never blocks on a full pipe
        let stdout_handle = tokio::spawn(read_lossy(child.stdout.take()));
        let stderr_handle = tokio::spawn(read_lossy(child.stderr.take()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => result.map_err(|source| ToolError::Io { program: program.to_path_buf(), source })?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill {} after timeout: {}", program.display(), e);
                }
                return Err(ToolError::TimedOut {
                    program: program.to_path_buf(),
                    secs: timeout.as_secs(),
                });
            }
        };

        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        debug!(
            "{} exit code: {:?}, stdout length: {}, stderr length: {}",
            program.display(),
            status.code(),
            stdout.len(),
            stderr.len()
        );

        Ok(ToolOutput { exit_code: status.code(), stdout, stderr })
    }
}

async fn read_lossy<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        // Partial output is still useful for diagnostics
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Parse the first line of `ffmpeg -version`.
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> 6.1.1
    pub fn parse(banner: &str) -> Option<Self> {
        let token = banner
            .split_whitespace()
            .skip_while(|s| *s != "version")
            .nth(1)?;
        let token = token.trim_start_matches('n');

        let mut parts = token.split('.').map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });

        let major = parts.next()??;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(FFmpegVersion { major, minor, patch })
    }
}

/// Make sure ffmpeg and ffprobe can be executed before touching any file.
/// Returns the first line of the ffmpeg version banner.
pub async fn check_tools(runner: &dyn ToolRunner, cfg: &ConverterConfig) -> Result<String> {
    let version_arg = vec!["-version".to_string()];

    let ffmpeg = runner
        .run(&cfg.ffmpeg_bin, &version_arg, VERSION_CHECK_TIMEOUT)
        .await
        .map_err(|e| anyhow!("FFmpeg is not available ({}). Please install FFmpeg: https://ffmpeg.org/download.html", e))?;
    if !ffmpeg.success() {
        return Err(anyhow!(
            "FFmpeg at {} failed its version check (exit code {:?})",
            cfg.ffmpeg_bin.display(),
            ffmpeg.exit_code
        ));
    }

    let ffprobe = runner
        .run(&cfg.ffprobe_bin, &version_arg, VERSION_CHECK_TIMEOUT)
        .await
        .map_err(|e| anyhow!("FFprobe is not available ({})", e))?;
    if !ffprobe.success() {
        return Err(anyhow!(
            "FFprobe at {} failed its version check (exit code {:?})",
            cfg.ffprobe_bin.display(),
            ffprobe.exit_code
        ));
    }

    let banner = ffmpeg.stdout.lines().next().unwrap_or("ffmpeg").trim().to_string();
    match FFmpegVersion::parse(&banner) {
        Some(v) => debug!("Detected FFmpeg {}.{}.{}", v.major, v.minor, v.patch),
        None => debug!("Could not parse FFmpeg version from: {}", banner),
    }
    info!("✓ Found {}", banner);

    Ok(banner)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VersionRunner {
        ffmpeg: Option<i32>,
        ffprobe: Option<i32>,
    }

    #[async_trait]
    impl ToolRunner for VersionRunner {
        async fn run(&self, program: &Path, _args: &[String], _timeout: Duration) -> Result<ToolOutput, ToolError> {
            let code = if program.ends_with("ffmpeg") { self.ffmpeg } else { self.ffprobe };
            match code {
                Some(code) => Ok(ToolOutput {
                    exit_code: Some(code),
                    stdout: "ffmpeg version 7.1.2 Copyright (c) 2000-2025\nbuilt with gcc".to_string(),
                    stderr: String::new(),
                }),
                None => Err(ToolError::NotFound(program.to_path_buf())),
            }
        }
    }

    #[test]
    fn test_version_parsing() {
        let v1 = FFmpegVersion::parse("ffmpeg version 8.0").unwrap();
        assert_eq!(v1, FFmpegVersion { major: 8, minor: 0, patch: 0 });

        let v2 = FFmpegVersion::parse("ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023").unwrap();
        assert_eq!(v2, FFmpegVersion { major: 6, minor: 1, patch: 1 });

        let v3 = FFmpegVersion::parse("ffmpeg version n7.1 Copyright").unwrap();
        assert_eq!(v3, FFmpegVersion { major: 7, minor: 1, patch: 0 });

        assert!(FFmpegVersion::parse("ffmpeg version N-112233-gdeadbeef").is_none());
        assert!(FFmpegVersion::parse("").is_none());
    }

    #[tokio::test]
    async fn test_check_tools_ok() {
        let runner = VersionRunner { ffmpeg: Some(0), ffprobe: Some(0) };
        let banner = check_tools(&runner, &ConverterConfig::default()).await.unwrap();
        assert_eq!(banner, "ffmpeg version 7.1.2 Copyright (c) 2000-2025");
    }

    #[tokio::test]
    async fn test_check_tools_missing_ffmpeg() {
        let runner = VersionRunner { ffmpeg: None, ffprobe: Some(0) };
        let err = check_tools(&runner, &ConverterConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("FFmpeg is not available"));
    }

    #[tokio::test]
    async fn test_check_tools_broken_ffprobe() {
        let runner = VersionRunner { ffmpeg: Some(0), ffprobe: Some(1) };
        let err = check_tools(&runner, &ConverterConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("FFprobe"));
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary() {
        let err = SystemRunner
            .run(Path::new("/nonexistent/to3gp-no-such-tool"), &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let args = vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()];
        let output = SystemRunner.run(Path::new("sh"), &args, Duration::from_secs(5)).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_timeout() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = SystemRunner.run(Path::new("sh"), &args, Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }
}
