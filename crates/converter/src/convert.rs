use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};
use thiserror::Error;
use crate::config::{ConverterConfig, MIN_OUTPUT_BYTES, TARGET_EXTENSION, TEMP_PREFIX};
use crate::ffmpeg::build_encode_args;
use crate::scan::Candidate;
use crate::state::{ConversionStatus, StateStore};
use crate::tools::{ToolError, ToolRunner};

/// Why a single conversion failed
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("FFmpeg failed with exit code {0}")]
    NonZeroExit(i32),

    #[error("Output file not created")]
    OutputMissing,

    #[error("Output file too small ({0} bytes)")]
    OutputTooSmall(u64),

    #[error("worker crashed: {0}")]
    Crashed(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConvertError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConvertError::Io { context: context.into(), source }
    }
}

/// A finished conversion
#[derive(Debug, Clone)]
pub struct ConversionSuccess {
    pub source: PathBuf,
    pub output: PathBuf,
    pub original_bytes: u64,
    pub output_bytes: u64,
    pub savings_percent: f64,
    pub elapsed: Duration,
    pub original_kept: bool,
}

impl fmt::Display for ConversionSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "✓ {} ({} → {}, saved {:.1}%, {:.1}s",
            display_name(&self.source),
            format_size(self.original_bytes, DECIMAL),
            format_size(self.output_bytes, DECIMAL),
            self.savings_percent,
            self.elapsed.as_secs_f64()
        )?;
        if self.original_kept {
            write!(f, ", original kept")?;
        }
        write!(f, ")")
    }
}

/// A conversion that did not produce a usable output
#[derive(Debug)]
pub struct ConversionFailure {
    pub path: PathBuf,
    pub error: ConvertError,
}

impl fmt::Display for ConversionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "✗ {}: {}", display_name(&self.path), self.error)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// In-progress output in the same directory as the source.
///
/// The source extension is kept in the name so `clip.mp4` and `clip.avi`
/// converting at the same time never share a temp file.
pub fn temp_output_path(source: &Path) -> PathBuf {
    let stem = source.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{}{}.{}.{}", TEMP_PREFIX, stem, ext.to_string_lossy(), TARGET_EXTENSION),
        None => format!("{}{}.{}", TEMP_PREFIX, stem, TARGET_EXTENSION),
    };
    source.with_file_name(name)
}

/// Final output: same directory and stem, target extension
pub fn final_output_path(source: &Path) -> PathBuf {
    source.with_extension(TARGET_EXTENSION)
}

/// Whether two existing paths name the same file on disk.
///
/// `Big.3GP` and `Big.3gp` are one file on a case-insensitive filesystem and
/// two on a case-sensitive one.
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    if let (Ok(a), Ok(b)) = (fs::canonicalize(a), fs::canonicalize(b)) {
        if a == b {
            return true;
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(a), Ok(b)) = (fs::metadata(a), fs::metadata(b)) {
            return a.dev() == b.dev() && a.ino() == b.ino();
        }
    }
    false
}

/// Another worker may have removed the file first
fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Percentage of the original size saved by the conversion (negative if it grew)
pub fn savings_percent(original_bytes: u64, output_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 0.0;
    }
    (original_bytes as f64 - output_bytes as f64) / original_bytes as f64 * 100.0
}

/// Converts one file at a time; cheap to share between concurrent workers.
pub struct Converter {
    runner: Arc<dyn ToolRunner>,
    cfg: ConverterConfig,
    state: Arc<StateStore>,
}

impl Converter {
    pub fn new(runner: Arc<dyn ToolRunner>, cfg: ConverterConfig, state: Arc<StateStore>) -> Self {
        Self { runner, cfg, state }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.cfg
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Convert one candidate and record the outcome in the state store.
    ///
    /// On failure the source is left untouched and the temp output removed.
    pub async fn convert(&self, candidate: &Candidate) -> Result<ConversionSuccess, ConversionFailure> {
        let temp_output = temp_output_path(&candidate.path);

        match self.try_convert(candidate, &temp_output).await {
            Ok(success) => {
                self.state.set(&candidate.path, ConversionStatus::Converted);
                Ok(success)
            }
            Err(error) => {
                if temp_output.exists() {
                    if let Err(e) = fs::remove_file(&temp_output) {
                        warn!("Failed to remove temp file {}: {}", temp_output.display(), e);
                    }
                }
                self.state.set(&candidate.path, ConversionStatus::Failed);
                Err(ConversionFailure { path: candidate.path.clone(), error })
            }
        }
    }

    async fn try_convert(&self, candidate: &Candidate, temp_output: &Path) -> Result<ConversionSuccess, ConvertError> {
        let source = &candidate.path;
        let final_output = final_output_path(source);
        let started = Instant::now();

        let original_bytes = fs::metadata(source)
            .map_err(|e| ConvertError::io(format!("Failed to stat {}", source.display()), e))?
            .len();

        debug!(
            "Converting {} ({}) -> {}",
            source.display(),
            candidate.resolution,
            final_output.display()
        );

        let args = build_encode_args(source, temp_output);
        let timeout = Duration::from_secs(self.cfg.encode_timeout_secs);
        let output = self.runner.run(&self.cfg.ffmpeg_bin, &args, timeout).await?;

        if !output.success() {
            let tail: Vec<&str> = output.stderr.lines().rev().take(5).collect();
            debug!(
                "ffmpeg stderr for {}:\n{}",
                source.display(),
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            );
            return Err(ConvertError::NonZeroExit(output.exit_code.unwrap_or(-1)));
        }

        let output_bytes = match fs::metadata(temp_output) {
            Ok(meta) => meta.len(),
            Err(_) => return Err(ConvertError::OutputMissing),
        };
        if output_bytes < MIN_OUTPUT_BYTES {
            return Err(ConvertError::OutputTooSmall(output_bytes));
        }

        // A large .3gp source converts onto its own name; the rename replaces it
        let replaces_source = final_output.exists() && same_file(&final_output, source);

        if !replaces_source {
            remove_if_present(&final_output)
                .map_err(|e| ConvertError::io(format!("Failed to remove existing {}", final_output.display()), e))?;
        }
        fs::rename(temp_output, &final_output)
            .map_err(|e| ConvertError::io(format!("Failed to move output to {}", final_output.display()), e))?;

        let output_bytes = fs::metadata(&final_output).map(|m| m.len()).unwrap_or(output_bytes);
        let savings = savings_percent(original_bytes, output_bytes);

        let original_kept = if replaces_source {
            false
        } else if self.cfg.keep_originals {
            true
        } else {
            match fs::remove_file(source) {
                Ok(()) => false,
                Err(e) => {
                    warn!("Converted {} but could not delete the original: {}", source.display(), e);
                    true
                }
            }
        };

        info!("Converted {} -> {}", source.display(), final_output.display());

        Ok(ConversionSuccess {
            source: source.clone(),
            output: final_output,
            original_bytes,
            output_bytes,
            savings_percent: savings,
            elapsed: started.elapsed(),
            original_kept,
        })
    }
}
