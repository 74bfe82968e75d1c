use anyhow::{bail, Context, Result};
use clap::Parser;
use converter::{
    check_tools, run_worklist, scan, Converter, ConverterConfig, RunSummary, ScanOutcome, StateStore,
    SystemRunner, ToolRunner, TARGET_RESOLUTION,
};
use log::{debug, info};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Batch-convert videos to 176x144 3GP, resuming where the last run stopped
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Examples:
  to3gp                         # prompt for a folder
  to3gp -f ~/Videos             # convert a specific folder
  to3gp -f ~/Videos -w 4        # use 4 concurrent jobs
  to3gp -f ~/Videos --dry-run   # preview without converting
  to3gp -f ~/Videos -k          # keep original files")]
struct Args {
    /// Folder containing videos (prompted for if not given)
    #[arg(short, long)]
    folder: Option<PathBuf>,

    /// Max concurrent conversions [default: 2]
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    workers: Option<u16>,

    /// Keep original files after conversion
    #[arg(short, long)]
    keep_originals: bool,

    /// Preview files without converting
    #[arg(short, long)]
    dry_run: bool,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to keep per-file conversion state
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Command-line flags win over the config file
    fn apply(&self, cfg: &mut ConverterConfig) {
        if let Some(workers) = self.workers {
            cfg.workers = usize::from(workers);
        }
        if self.keep_originals {
            cfg.keep_originals = true;
        }
        if self.dry_run {
            cfg.dry_run = true;
        }
        if let Some(state_file) = &self.state_file {
            cfg.state_file = state_file.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = ConverterConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut cfg);

    debug!("Configuration: {:?}", cfg);

    let runner: Arc<dyn ToolRunner> = Arc::new(SystemRunner);
    check_tools(runner.as_ref(), &cfg).await?;

    let folder = match &args.folder {
        Some(folder) => folder.clone(),
        None => prompt_for_folder()?,
    };
    let folder = resolve_folder(&folder)?;

    let state = Arc::new(StateStore::load(&cfg.state_file));
    info!("State file: {} ({} entries)", state.path().display(), state.len());

    let outcome = scan(runner.as_ref(), &cfg, &state, &folder).await;
    print_scan_report(&outcome);

    let workers = cfg.workers;
    let converter = Arc::new(Converter::new(runner, cfg, state));
    let summary = run_worklist(converter, outcome.candidates, workers).await;
    print_summary(&summary);

    Ok(())
}

/// Ask for the folder on the terminal
fn prompt_for_folder() -> Result<PathBuf> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        bail!("No folder specified. Usage: to3gp --folder <FOLDER>");
    }

    print!("Folder containing videos: ");
    io::stdout().flush().context("Failed to write prompt")?;

    let mut line = String::new();
    stdin.lock().read_line(&mut line).context("Failed to read folder from terminal")?;

    let answer = line.trim().trim_matches('"');
    if answer.is_empty() {
        bail!("No folder selected");
    }
    Ok(PathBuf::from(answer))
}

fn resolve_folder(folder: &Path) -> Result<PathBuf> {
    if !folder.is_dir() {
        bail!("Folder not found: {}", folder.display());
    }
    folder
        .canonicalize()
        .with_context(|| format!("Failed to resolve folder: {}", folder.display()))
}

fn print_scan_report(outcome: &ScanOutcome) {
    if outcome.already_converted > 0 {
        println!("✓ Already converted: {}", outcome.already_converted);
    }
    let skipped = outcome.skipped + outcome.probe_failed;
    if skipped > 0 {
        println!("⊘ Skipped: {}", skipped);
    }
    if !outcome.candidates.is_empty() {
        println!("📊 Queued: {} (target {})", outcome.candidates.len(), TARGET_RESOLUTION);
    }
}

fn print_summary(summary: &RunSummary) {
    if summary.total == 0 || summary.dry_run {
        return;
    }

    let rule = "=".repeat(60);
    println!("\n{}", rule);
    println!("📊 SUMMARY");
    println!("{}", rule);
    println!("✓ Converted: {}", summary.succeeded());
    if summary.failed() > 0 {
        println!("✗ Failed: {}", summary.failed());
        for failure in &summary.failures {
            println!("    {}", failure);
        }
    }
    let saved: u64 = summary
        .conversions
        .iter()
        .map(|c| c.original_bytes.saturating_sub(c.output_bytes))
        .sum();
    if saved > 0 {
        println!("💾 Space saved: {}", humansize::format_size(saved, humansize::DECIMAL));
    }
    println!("⏱️  Total Time: {:.1}s", summary.elapsed.as_secs_f64());
    if let Some(avg) = summary.average_per_file() {
        println!("⚡ Avg Time: {:.1}s per file", avg.as_secs_f64());
    }
    println!("🕒 Started: {}", local_time(&summary.started_at));
    println!("🕒 Finished: {}", local_time(&summary.finished_at));
    println!("{}", rule);
}

fn local_time(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
