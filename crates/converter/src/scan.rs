use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use log::{debug, info, warn};
use crate::config::{ConverterConfig, TARGET_EXTENSION, TARGET_RESOLUTION, TEMP_PREFIX, VIDEO_EXTENSIONS};
use crate::ffprobe::{probe_resolution, Resolution};
use crate::state::{ConversionStatus, StateStore};
use crate::tools::ToolRunner;

/// A file that needs converting, with its probed resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub resolution: Resolution,
}

/// What to do with a probed file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Already target size in the target container
    SkipAlreadyTarget,
    /// Larger than the target in at least one dimension
    Downscale,
    /// Target size, wrong container
    Reformat,
    /// Smaller than the target; upscaling is never done
    SkipAlreadySmall,
}

impl Plan {
    pub fn is_queued(&self) -> bool {
        matches!(self, Plan::Downscale | Plan::Reformat)
    }
}

/// Decide what to do with a file of the given resolution
pub fn classify(resolution: Resolution, path: &Path) -> Plan {
    let at_target = resolution == TARGET_RESOLUTION;
    if at_target && has_target_extension(path) {
        Plan::SkipAlreadyTarget
    } else if resolution.exceeds(&TARGET_RESOLUTION) {
        Plan::Downscale
    } else if at_target {
        Plan::Reformat
    } else {
        Plan::SkipAlreadySmall
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(|s| s.to_lowercase())
}

fn has_target_extension(path: &Path) -> bool {
    lowercase_extension(path).as_deref() == Some(TARGET_EXTENSION)
}

/// Supported video extension and not one of our own in-progress outputs
pub fn is_video_candidate(path: &Path) -> bool {
    let is_temp = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEMP_PREFIX))
        .unwrap_or(false);
    if is_temp {
        return false;
    }

    match lowercase_extension(path) {
        Some(ext) => VIDEO_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Result of a scan pass
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Files to convert, in walk order
    pub candidates: Vec<Candidate>,
    /// Video files seen (after extension/temp filtering)
    pub files_seen: usize,
    /// Recorded as converted by an earlier run; not probed
    pub already_converted: usize,
    /// Marked skipped during this pass
    pub skipped: usize,
    /// ffprobe could not tell; left unrecorded for the next run
    pub probe_failed: usize,
}

/// Walk `root` and work out which files need converting.
///
/// Runs sequentially, one probe at a time, before any conversion starts.
/// Skip decisions are written to `state` as they are made.
pub async fn scan(runner: &dyn ToolRunner, cfg: &ConverterConfig, state: &StateStore, root: &Path) -> ScanOutcome {
    info!("📁 Scanning: {}", root.display());

    let mut outcome = ScanOutcome::default();
    let walker = WalkDir::new(root).follow_links(false);
    for entry in walker.into_iter() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_video_candidate(path) {
            continue;
        }
        outcome.files_seen += 1;

        if state.get(path) == Some(ConversionStatus::Converted) {
            debug!("Already converted: {}", path.display());
            outcome.already_converted += 1;
            continue;
        }

        let resolution = match probe_resolution(runner, cfg, path).await {
            Some(r) => r,
            None => {
                warn!("⚠️  SKIP (no video stream): {}", file_name(path));
                outcome.probe_failed += 1;
                continue;
            }
        };

        let plan = classify(resolution, path);
        match plan {
            Plan::SkipAlreadyTarget => {
                info!("⊘ SKIP (already {} {}): {}", TARGET_EXTENSION.to_uppercase(), TARGET_RESOLUTION, file_name(path));
            }
            Plan::SkipAlreadySmall => {
                info!("⊘ SKIP (already small): {} ({})", file_name(path), resolution);
            }
            Plan::Downscale => {
                info!("✓ QUEUE: {} ({})", file_name(path), resolution);
            }
            Plan::Reformat => {
                info!(
                    "✓ QUEUE (format conversion): {} ({}) → {}",
                    file_name(path),
                    resolution,
                    TARGET_EXTENSION.to_uppercase()
                );
            }
        }

        if plan.is_queued() {
            outcome.candidates.push(Candidate { path: path.to_path_buf(), resolution });
        } else {
            state.set(path, ConversionStatus::Skipped);
            outcome.skipped += 1;
        }
    }

    state.save();

    info!(
        "Scan complete: {} video files, {} queued, {} already converted, {} skipped, {} unprobeable",
        outcome.files_seen,
        outcome.candidates.len(),
        outcome.already_converted,
        outcome.skipped,
        outcome.probe_failed
    );
    outcome
}
