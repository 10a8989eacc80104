//! backupctl - Command-line interface for the backup engine.
//!
//! Thin front end over the engine: every subcommand prints a JSON document
//! on stdout and logs on stderr.
//!
//! Exit codes: 0 when everything checked out, 1 when a check failed
//! (mismatch, corruption, non-compliance, partial backup), 2 on errors.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clap::{ArgAction, Parser, Subcommand};
use engine::{
    checksums::{manifest_digest, render_manifest},
    compliance::recommendations,
    fs_ops::relative_key,
    BackupCopy, BackupJob, ChecksumAlgorithm, ChecksumEngine, ComplianceEvaluator, CopyEngine,
    EngineConfig, EngineError, ExecutionStatus, FileIntegrityValidator, ProgressCallback,
    RecordedError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// backupctl - Backup integrity toolkit
#[derive(Parser, Debug)]
#[command(name = "backupctl")]
#[command(version = "0.1.0")]
#[command(about = "Hash, copy, verify and audit backups")]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors and hide the progress bar
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Hash files in parallel
    Hash {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Checksum algorithm (sha256, sha512, blake2b, blake2s, blake3, md5)
        #[arg(long, value_name = "ALGORITHM")]
        algorithm: Option<String>,

        /// Worker threads (defaults to the number of CPUs)
        #[arg(long, value_name = "N")]
        workers: Option<usize>,
    },

    /// Build a checksum manifest for a directory
    HashDir {
        dir: PathBuf,

        /// Glob matched against file names
        #[arg(long, default_value = "*")]
        pattern: String,

        /// Only hash direct children
        #[arg(long)]
        no_recursive: bool,

        #[arg(long, value_name = "ALGORITHM")]
        algorithm: Option<String>,

        /// Also write the rendered manifest to this file
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Copy a file or directory with an inline checksum
    Copy {
        src: PathBuf,
        dst: PathBuf,

        #[arg(long, value_name = "ALGORITHM")]
        algorithm: Option<String>,
    },

    /// Validate a copy against its original
    Verify {
        src: PathBuf,
        dst: PathBuf,

        #[arg(long, value_name = "ALGORITHM")]
        algorithm: Option<String>,
    },

    /// Check a file against an expected checksum
    Detect {
        file: PathBuf,
        expected: String,

        #[arg(long, value_name = "ALGORITHM")]
        algorithm: Option<String>,
    },

    /// Execute a backup job described in a JSON file
    Run {
        #[arg(value_name = "JOB_JSON")]
        job: PathBuf,
    },

    /// Evaluate a copy inventory (JSON) against the 3-2-1-1-0 rule
    Comply {
        #[arg(value_name = "INVENTORY_JSON")]
        inventory: PathBuf,
    },
}

/// Result of a successful command run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Passed,
    CheckFailed,
}

impl Outcome {
    fn exit_code(self) -> i32 {
        match self {
            Outcome::Passed => 0,
            Outcome::CheckFailed => 1,
        }
    }

    fn from_passed(passed: bool) -> Self {
        if passed {
            Outcome::Passed
        } else {
            Outcome::CheckFailed
        }
    }
}

/// Stderr progress bar for copies
struct CliProgress {
    start_time: Instant,
    last_update: Mutex<Option<Instant>>,
}

impl CliProgress {
    fn new() -> Self {
        CliProgress {
            start_time: Instant::now(),
            last_update: Mutex::new(None),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn progress_bar(percent: u32) -> String {
        let filled = (percent.min(100) / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    fn finish(&self) {
        eprintln!();
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));
    }
}

impl ProgressCallback for CliProgress {
    fn on_progress(&self, bytes_copied: u64, total_bytes: u64) {
        let done = bytes_copied >= total_bytes;
        if let Ok(mut last) = self.last_update.lock() {
            // At most one redraw per 200ms, plus the final one
            if !done && last.is_some_and(|t| t.elapsed() < Duration::from_millis(200)) {
                return;
            }
            *last = Some(Instant::now());
        }

        let total = total_bytes.max(1);
        let percent = (bytes_copied as f64 / total as f64 * 100.0) as u32;
        eprint!(
            "\rProgress: {} | {}/{}",
            Self::progress_bar(percent),
            Self::format_bytes(bytes_copied),
            Self::format_bytes(total_bytes)
        );
        let _ = io::stderr().flush();
    }
}

#[derive(Serialize)]
struct HashEntry {
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RecordedError>,
}

#[derive(Serialize)]
struct DetectReport<'a> {
    path: &'a Path,
    algorithm: ChecksumAlgorithm,
    expected: &'a str,
    corrupted: bool,
}

/// Copies to evaluate: a bare array, or an object naming the job.
#[derive(Deserialize)]
#[serde(untagged)]
enum Inventory {
    Job {
        job_id: Option<Uuid>,
        copies: Vec<BackupCopy>,
    },
    Copies(Vec<BackupCopy>),
}

impl Inventory {
    fn into_parts(self) -> (Uuid, Vec<BackupCopy>) {
        let (job_id, copies) = match self {
            Inventory::Job { job_id, copies } => (job_id, copies),
            Inventory::Copies(copies) => (None, copies),
        };
        let job_id = job_id
            .or_else(|| copies.first().map(|c| c.job_id))
            .unwrap_or_else(Uuid::nil);
        (job_id, copies)
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        })
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Parse arguments, run the command and exit with its status
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let stdout = io::stdout();
    let exit_code = match run_cli(&cli, &mut stdout.lock()) {
        Ok(outcome) => outcome.exit_code(),
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli, out: &mut dyn Write) -> Result<Outcome, String> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    debug!(?config, "configuration loaded");

    match &cli.command {
        Command::Hash {
            paths,
            algorithm,
            workers,
        } => {
            let algorithm = parse_algorithm(algorithm.as_deref(), &config)?;
            let checksums = ChecksumEngine::from_policy(&config.checksum);
            let results = checksums.hash_files_parallel(paths, algorithm, *workers);

            let mut failed = false;
            let entries: Vec<HashEntry> = paths
                .iter()
                .map(|path| match results.get(path) {
                    Some(Ok(value)) => HashEntry {
                        path: path.clone(),
                        checksum: Some(value.hex().to_string()),
                        error: None,
                    },
                    Some(Err(e)) => {
                        failed = true;
                        HashEntry {
                            path: path.clone(),
                            checksum: None,
                            error: Some(RecordedError::from(e)),
                        }
                    }
                    None => {
                        failed = true;
                        HashEntry {
                            path: path.clone(),
                            checksum: None,
                            error: None,
                        }
                    }
                })
                .collect();

            emit(
                out,
                &serde_json::json!({
                    "algorithm": algorithm,
                    "files": entries,
                    "statistics": checksums.statistics(),
                }),
            )?;
            Ok(Outcome::from_passed(!failed))
        }

        Command::HashDir {
            dir,
            pattern,
            no_recursive,
            algorithm,
            output,
        } => {
            let algorithm = parse_algorithm(algorithm.as_deref(), &config)?;
            let checksums = ChecksumEngine::from_policy(&config.checksum);
            let hashed = checksums
                .hash_directory(dir, pattern, !no_recursive, algorithm, None)
                .map_err(|e| e.to_string())?;

            let manifest: BTreeMap<String, String> = hashed
                .iter()
                .map(|(path, value)| {
                    let relative = path.strip_prefix(dir).unwrap_or(path);
                    (relative_key(relative), value.hex().to_string())
                })
                .collect();

            if let Some(output) = output {
                fs::write(output, render_manifest(&manifest, algorithm))
                    .map_err(|e| format!("Cannot write manifest {}: {}", output.display(), e))?;
                info!(path = %output.display(), files = manifest.len(), "manifest written");
            }

            let stats = checksums.statistics();
            emit(
                out,
                &serde_json::json!({
                    "directory": dir,
                    "algorithm": algorithm,
                    "manifest_digest": manifest_digest(&manifest, algorithm),
                    "files": manifest,
                    "errors": stats.errors,
                }),
            )?;
            Ok(Outcome::from_passed(stats.errors == 0))
        }

        Command::Copy { src, dst, algorithm } => {
            let algorithm = parse_algorithm(algorithm.as_deref(), &config)?;
            let engine = CopyEngine::from_policy(&config.copy).with_checksum_algorithm(algorithm);
            let progress = CliProgress::new();
            let progress_ref: Option<&dyn ProgressCallback> =
                if cli.quiet { None } else { Some(&progress) };

            if src.is_dir() {
                let tree = engine.copy_tree(src, dst, progress_ref).map_err(|e| e.to_string())?;
                if !cli.quiet {
                    progress.finish();
                }
                emit(out, &tree)?;
            } else {
                let file = engine.copy_file(src, dst, progress_ref).map_err(|e| e.to_string())?;
                if !cli.quiet {
                    progress.finish();
                }
                emit(out, &file)?;
            }
            Ok(Outcome::Passed)
        }

        Command::Verify { src, dst, algorithm } => {
            let algorithm = parse_algorithm(algorithm.as_deref(), &config)?;
            let validator = FileIntegrityValidator::new(
                Arc::new(ChecksumEngine::from_policy(&config.checksum)),
                config.validation.clone(),
            );
            let validation = validator.verify_file(src, dst, algorithm);
            emit(out, &validation)?;
            Ok(Outcome::from_passed(validation.is_success()))
        }

        Command::Detect {
            file,
            expected,
            algorithm,
        } => {
            let algorithm = parse_algorithm(algorithm.as_deref(), &config)?;
            let validator = FileIntegrityValidator::new(
                Arc::new(ChecksumEngine::from_policy(&config.checksum)),
                config.validation.clone(),
            );
            let corrupted = validator.detect_corruption(file, expected, algorithm);
            emit(
                out,
                &DetectReport {
                    path: file,
                    algorithm,
                    expected,
                    corrupted,
                },
            )?;
            Ok(Outcome::from_passed(!corrupted))
        }

        Command::Run { job } => {
            let job: BackupJob = read_json(job)?;
            let engine = CopyEngine::from_policy(&config.copy)
                .with_checksum_algorithm(config.checksum.algorithm);

            match engine.execute_backup(&job) {
                Ok(result) => {
                    emit(out, &result)?;
                    Ok(Outcome::from_passed(result.status == ExecutionStatus::Success))
                }
                Err(EngineError::BackupFailed { job_id, errors }) => {
                    let details: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
                    Err(format!(
                        "Backup failed for job {}: {}",
                        job_id,
                        details.join("; ")
                    ))
                }
                Err(e) => Err(e.to_string()),
            }
        }

        Command::Comply { inventory } => {
            let (job_id, copies) = read_json::<Inventory>(inventory)?.into_parts();
            let snapshot =
                ComplianceEvaluator::new(config.compliance.clone()).evaluate(job_id, &copies);
            let recommendations = recommendations(&snapshot);
            emit(
                out,
                &serde_json::json!({
                    "snapshot": snapshot,
                    "recommendations": recommendations,
                }),
            )?;
            Ok(Outcome::from_passed(snapshot.compliant))
        }
    }
}

fn parse_algorithm(name: Option<&str>, config: &EngineConfig) -> Result<ChecksumAlgorithm, String> {
    match name {
        Some(name) => name.parse::<ChecksumAlgorithm>().map_err(|e| {
            let supported: Vec<String> = ChecksumAlgorithm::supported()
                .iter()
                .map(|a| a.to_string())
                .collect();
            format!("{} (supported: {})", e, supported.join(", "))
        }),
        None => Ok(config.checksum.algorithm),
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid JSON in {}: {}", path.display(), e))
}

fn emit<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<(), String> {
    serde_json::to_writer_pretty(&mut *out, value).map_err(|e| e.to_string())?;
    writeln!(out).map_err(|e| e.to_string())
}
