use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use crate::config::TARGET_RESOLUTION;
use crate::convert::{ConversionFailure, ConversionSuccess, ConvertError, Converter};
use crate::scan::Candidate;
use crate::state::ConversionStatus;

/// Outcome of a whole run
#[derive(Debug)]
pub struct RunSummary {
    pub total: usize,
    pub dry_run: bool,
    pub conversions: Vec<ConversionSuccess>,
    pub failures: Vec<ConversionFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.conversions.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Wall-clock time divided by files handled
    pub fn average_per_file(&self) -> Option<Duration> {
        let handled = self.succeeded() + self.failed();
        if handled == 0 {
            return None;
        }
        Some(self.elapsed / handled as u32)
    }

    fn idle(total: usize, dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            total,
            dry_run,
            conversions: Vec::new(),
            failures: Vec::new(),
            started_at,
            finished_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }
}

/// One line per queued file: `name (WxH) → (176x144)`
pub fn preview(worklist: &[Candidate]) -> Vec<String> {
    worklist
        .iter()
        .map(|c| format!("{} ({}) → ({})", c.path.display(), c.resolution, TARGET_RESOLUTION))
        .collect()
}

/// Convert every candidate with at most `workers` encodes in flight.
///
/// Results are reported in completion order. A failed or crashed worker is
/// recorded and the batch carries on.
pub async fn run_worklist(converter: Arc<Converter>, worklist: Vec<Candidate>, workers: usize) -> RunSummary {
    let started_at = Utc::now();
    let total = worklist.len();

    if total == 0 {
        info!("✓ Nothing to convert. All files processed or skipped.");
        return RunSummary::idle(0, converter.config().dry_run, started_at);
    }

    info!("📊 Found {} file(s) to convert", total);

    if converter.config().dry_run {
        info!("[DRY RUN] Files that would be converted:");
        for line in preview(&worklist) {
            info!("  • {}", line);
        }
        return RunSummary::idle(total, true, started_at);
    }

    let workers = workers.max(1);
    info!("🚀 Starting conversion with {} concurrent jobs...", workers);

    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    let mut task_paths = HashMap::new();

    for candidate in worklist {
        let converter = Arc::clone(&converter);
        let semaphore = Arc::clone(&semaphore);
        let path = candidate.path.clone();
        let handle = tasks.spawn(async move {
            // The semaphore is never closed, so a permit is always granted
            let _permit = semaphore.acquire_owned().await.ok();
            converter.convert(&candidate).await
        });
        task_paths.insert(handle.id(), path);
    }

    let mut conversions = Vec::new();
    let mut failures = Vec::new();
    let mut done = 0;

    while let Some(joined) = tasks.join_next_with_id().await {
        done += 1;
        match joined {
            Ok((_, Ok(success))) => {
                info!("[{}/{}] {}", done, total, success);
                conversions.push(success);
            }
            Ok((_, Err(failure))) => {
                warn!("[{}/{}] {}", done, total, failure);
                failures.push(failure);
            }
            Err(join_error) => {
                let path = task_paths.remove(&join_error.id()).unwrap_or_default();
                if !path.as_os_str().is_empty() {
                    converter.state().set(&path, ConversionStatus::Failed);
                }
                let failure = ConversionFailure {
                    path,
                    error: ConvertError::Crashed(join_error.to_string()),
                };
                warn!("[{}/{}] {}", done, total, failure);
                failures.push(failure);
            }
        }
    }

    let summary = RunSummary {
        total,
        dry_run: false,
        conversions,
        failures,
        started_at,
        finished_at: Utc::now(),
        elapsed: started.elapsed(),
    };

    info!(
        "Run finished: {} converted, {} failed in {:.1}s",
        summary.succeeded(),
        summary.failed(),
        summary.elapsed.as_secs_f64()
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterConfig;
    use crate::ffprobe::Resolution;
    use crate::state::StateStore;
    use crate::tools::{ToolError, ToolOutput, ToolRunner};
    use async_trait::async_trait;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake encoder that tracks how many encodes run at once
    #[derive(Default)]
    struct CountingEncoder {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ToolRunner for CountingEncoder {
        async fn run(&self, _program: &Path, args: &[String], _timeout: Duration) -> Result<ToolOutput, ToolError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let input = &args[1];
            let code = if input.ends_with("bad.mp4") { 1 } else { 0 };
            if code == 0 {
                fs::write(args.last().unwrap(), vec![b'x'; 2048]).unwrap();
            }
            Ok(ToolOutput { exit_code: Some(code), stdout: String::new(), stderr: String::new() })
        }
    }

    /// Fake encoder that panics on `boom.mp4`
    struct PanickingEncoder;

    #[async_trait]
    impl ToolRunner for PanickingEncoder {
        async fn run(&self, _program: &Path, args: &[String], _timeout: Duration) -> Result<ToolOutput, ToolError> {
            if args[1].ends_with("boom.mp4") {
                panic!("encoder blew up");
            }
            fs::write(args.last().unwrap(), vec![b'x'; 2048]).unwrap();
            Ok(ToolOutput { exit_code: Some(0), stdout: String::new(), stderr: String::new() })
        }
    }

    fn setup(runner: Arc<dyn ToolRunner>, dry_run: bool, names: &[&str]) -> (tempfile::TempDir, Arc<Converter>, Vec<Candidate>) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConverterConfig {
            state_file: dir.path().join("state.json"),
            dry_run,
            ..Default::default()
        };
        let state = Arc::new(StateStore::load(&cfg.state_file));
        let worklist = names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, vec![0u8; 8192]).unwrap();
                Candidate { path, resolution: Resolution::new(320, 240) }
            })
            .collect();
        (dir, Arc::new(Converter::new(runner, cfg, state)), worklist)
    }

    #[tokio::test]
    async fn test_empty_worklist() {
        let (_dir, converter, _) = setup(Arc::new(CountingEncoder::default()), false, &[]);
        let summary = run_worklist(converter, Vec::new(), 2).await;
        assert_eq!(summary.total, 0);
        assert_eq!(summary.average_per_file(), None);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let encoder = Arc::new(CountingEncoder::default());
        let names = ["a.mp4", "b.mp4", "c.mp4", "d.mp4", "e.mp4", "f.mp4"];
        let (_dir, converter, worklist) = setup(encoder.clone(), false, &names);

        let summary = run_worklist(converter, worklist, 2).await;

        assert_eq!(summary.succeeded(), 6);
        assert_eq!(summary.failed(), 0);
        assert!(encoder.peak.load(Ordering::SeqCst) <= 2);
        assert!(summary.average_per_file().is_some());
        assert!(summary.started_at <= summary.finished_at);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let names = ["good1.mp4", "bad.mp4", "good2.mp4"];
        let (dir, converter, worklist) = setup(Arc::new(CountingEncoder::default()), false, &names);

        let summary = run_worklist(converter.clone(), worklist, 1).await;

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures[0].path, dir.path().join("bad.mp4"));
        assert_eq!(converter.state().get(&dir.path().join("bad.mp4")), Some(ConversionStatus::Failed));
        assert_eq!(converter.state().get(&dir.path().join("good1.mp4")), Some(ConversionStatus::Converted));
    }

    #[tokio::test]
    async fn test_panicked_worker_is_recorded_as_failure() {
        let (dir, converter, worklist) = setup(Arc::new(PanickingEncoder), false, &["boom.mp4", "fine.mp4"]);
        let boom = dir.path().join("boom.mp4");

        let summary = run_worklist(converter.clone(), worklist, 2).await;

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures[0].path, boom);
        assert!(matches!(summary.failures[0].error, ConvertError::Crashed(_)));
        assert!(boom.exists());
        assert_eq!(converter.state().get(&boom), Some(ConversionStatus::Failed));
        assert_eq!(converter.state().get(&dir.path().join("fine.mp4")), Some(ConversionStatus::Converted));
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let encoder = Arc::new(CountingEncoder::default());
        let (dir, converter, worklist) = setup(encoder.clone(), true, &["a.mp4", "b.avi"]);

        let summary = run_worklist(converter.clone(), worklist, 2).await;

        assert!(summary.dry_run);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded() + summary.failed(), 0);
        assert_eq!(encoder.peak.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("a.mp4").exists());
        assert!(converter.state().is_empty());
    }

    #[test]
    fn test_preview_lines() {
        let worklist = vec![Candidate {
            path: PathBuf::from("/v/clip.mp4"),
            resolution: Resolution::new(640, 480),
        }];
        assert_eq!(preview(&worklist), vec!["/v/clip.mp4 (640x480) → (176x144)".to_string()]);
    }
}
