//! Copy engine and backup execution.
//!
//! This module provides the physical duplication layer:
//! - Streaming file copies with an inline checksum, capacity pre-check,
//!   retries and cooperative cancellation
//! - Directory tree copies identified by a checksum manifest
//! - Backup execution: one copy per job destination, with per-destination
//!   error isolation
//!
//! A failure on one destination is recorded in the [`ExecutionResult`] and
//! never stops the remaining destinations.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checksums::{self, create_hasher, ChecksumAlgorithm, ChecksumValue};
use crate::config::{
    CopyPolicy, DEFAULT_CAPACITY_MARGIN, DEFAULT_COPY_BUFFER_SIZE, DEFAULT_RETRY_DELAYS_SECS,
};
use crate::error::{EngineError, RecordedError, VerificationKind};
use crate::fs_ops;
use crate::model::{
    BackupCopy, BackupJob, CopyStatus, CopyVerification, Destination, ExecutionStatus,
};
use crate::progress::{OffsetProgress, ProgressCallback};
use crate::repository::Repository;
use crate::storage::{LocalStorageProvider, StorageProvider};

/// Wait schedule between copy attempts.
///
/// The number of attempts equals the number of delays; the delay at index
/// `i` is slept after attempt `i` fails, except after the last attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from_secs(&DEFAULT_RETRY_DELAYS_SECS)
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        RetryPolicy { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        RetryPolicy::new(secs.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    /// `attempts` tries with no wait in between.
    pub fn immediate(attempts: usize) -> Self {
        RetryPolicy::new(vec![Duration::ZERO; attempts])
    }

    /// Total attempts (at least one).
    pub fn attempts(&self) -> usize {
        self.delays.len().max(1)
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Cooperative cancellation flag checked between copy chunks.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Queries the free space available for a destination directory.
pub type SpaceProbe = Arc<dyn Fn(&Path) -> Result<u64, EngineError> + Send + Sync>;

/// Result of a single file copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyResult {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes_copied: u64,
    /// Digest of exactly the bytes written
    pub checksum: ChecksumValue,
    pub duration_seconds: f64,
}

/// Result of a directory tree copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeCopyResult {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub files_copied: usize,
    pub bytes_copied: u64,
    /// Relative path -> hex digest
    pub file_checksums: BTreeMap<String, String>,
    /// SHA-256 of the rendered manifest
    pub manifest_digest: String,
    pub duration_seconds: f64,
}

/// A destination that did not receive its copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationFailure {
    pub destination: PathBuf,
    pub error: RecordedError,
}

/// Outcome of executing a backup job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_bytes: u64,
    pub copies_created: Vec<BackupCopy>,
    pub errors: Vec<DestinationFailure>,
}

/// Configuration exposed by [`CopyEngine::engine_stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyEngineStats {
    pub buffer_size: usize,
    pub max_attempts: usize,
    pub retry_delays_secs: Vec<f64>,
    pub capacity_margin: f64,
    pub checksum_algorithm: ChecksumAlgorithm,
}

/// Builds the storage provider for a destination.
pub type ProviderResolver<'a> =
    &'a dyn Fn(&Destination) -> Result<Box<dyn StorageProvider>, EngineError>;

enum AttemptFailure {
    Cancelled,
    Io(io::Error),
}

/// Streaming copier with checksum, capacity check and retries.
#[derive(Clone)]
pub struct CopyEngine {
    buffer_size: usize,
    retry: RetryPolicy,
    capacity_margin: f64,
    algorithm: ChecksumAlgorithm,
    space_probe: SpaceProbe,
}

impl fmt::Debug for CopyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyEngine")
            .field("buffer_size", &self.buffer_size)
            .field("retry", &self.retry)
            .field("capacity_margin", &self.capacity_margin)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl Default for CopyEngine {
    fn default() -> Self {
        CopyEngine {
            buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            retry: RetryPolicy::default(),
            capacity_margin: DEFAULT_CAPACITY_MARGIN,
            algorithm: ChecksumAlgorithm::Sha256,
            space_probe: Arc::new(fs_ops::available_space),
        }
    }
}

impl CopyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine configured from the `[copy]` policy.
    pub fn from_policy(policy: &CopyPolicy) -> Self {
        CopyEngine {
            buffer_size: policy.buffer_size.max(1),
            retry: RetryPolicy::from_secs(&policy.retry_delays_secs),
            capacity_margin: policy.capacity_margin,
            ..Self::default()
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_capacity_margin(mut self, margin: f64) -> Self {
        self.capacity_margin = margin;
        self
    }

    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Replace the free-space query (defaults to the filesystem statistics).
    pub fn with_space_probe(mut self, probe: SpaceProbe) -> Self {
        self.space_probe = probe;
        self
    }

    pub fn checksum_algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Current buffer, retry and margin settings.
    pub fn engine_stats(&self) -> CopyEngineStats {
        CopyEngineStats {
            buffer_size: self.buffer_size,
            max_attempts: self.retry.attempts(),
            retry_delays_secs: self.retry.delays().iter().map(|d| d.as_secs_f64()).collect(),
            capacity_margin: self.capacity_margin,
            checksum_algorithm: self.algorithm,
        }
    }

    /// Copy one file, computing its checksum on the fly.
    ///
    /// # Arguments
    /// * `source` - Regular file to copy
    /// * `destination` - Target file path; missing parents are created
    /// * `progress` - Called with `(bytes_copied, total_bytes)` after every chunk
    ///
    /// # Errors
    /// `SourceNotFound` / `NotAFile` for a bad source, `InsufficientStorage`
    /// before any byte is written, `CopyFailed` once every attempt failed.
    pub fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<CopyResult, EngineError> {
        self.copy_file_inner(source, destination, progress, None, true)
    }

    /// [`copy_file`](Self::copy_file) that stops with `Cancelled` once `cancel` is set.
    ///
    /// A cancelled copy removes its partial destination and is not retried.
    pub fn copy_file_cancellable(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<CopyResult, EngineError> {
        self.copy_file_inner(source, destination, progress, Some(cancel), true)
    }

    fn copy_file_inner(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressCallback>,
        cancel: Option<&CancellationToken>,
        check_capacity: bool,
    ) -> Result<CopyResult, EngineError> {
        let metadata = match fs::metadata(source) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::SourceNotFound {
                    path: source.to_path_buf(),
                })
            }
            Err(e) => return Err(EngineError::io(source, e)),
        };
        if metadata.is_dir() {
            return Err(EngineError::NotAFile {
                path: source.to_path_buf(),
            });
        }
        let total = metadata.len();

        fs_ops::ensure_parent_dir_exists(destination)?;
        if check_capacity {
            self.check_capacity(destination.parent().unwrap_or(destination), total)?;
        }

        debug!(
            source = %source.display(),
            destination = %destination.display(),
            bytes = total,
            "starting copy"
        );

        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            match self.copy_attempt(source, destination, total, progress, cancel) {
                Ok((checksum, bytes_copied)) => {
                    if let Ok(mtime) = metadata.modified() {
                        fs_ops::preserve_mtime(destination, mtime);
                    }
                    let duration_seconds = started.elapsed().as_secs_f64();
                    info!(
                        source = %source.display(),
                        destination = %destination.display(),
                        bytes = bytes_copied,
                        duration_seconds,
                        checksum = checksum.hex(),
                        "copy completed"
                    );
                    return Ok(CopyResult {
                        source: source.to_path_buf(),
                        destination: destination.to_path_buf(),
                        bytes_copied,
                        checksum,
                        duration_seconds,
                    });
                }
                Err(AttemptFailure::Cancelled) => {
                    let _ = fs::remove_file(destination);
                    warn!(destination = %destination.display(), "copy cancelled");
                    return Err(EngineError::Cancelled {
                        path: destination.to_path_buf(),
                    });
                }
                Err(AttemptFailure::Io(e)) => {
                    warn!(
                        source = %source.display(),
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "copy attempt failed"
                    );
                    if attempt + 1 >= attempts {
                        if destination.is_file() {
                            let _ = fs::remove_file(destination);
                        }
                        error!(
                            source = %source.display(),
                            destination = %destination.display(),
                            "copy failed, retries exhausted"
                        );
                        return Err(EngineError::CopyFailed {
                            source_path: source.to_path_buf(),
                            destination: destination.to_path_buf(),
                            attempts,
                            source: e,
                        });
                    }
                    if let Some(delay) = self.retry.delays().get(attempt) {
                        std::thread::sleep(*delay);
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn copy_attempt(
        &self,
        source: &Path,
        destination: &Path,
        total: u64,
        progress: Option<&dyn ProgressCallback>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(ChecksumValue, u64), AttemptFailure> {
        let mut src = File::open(source).map_err(AttemptFailure::Io)?;
        let mut dst = File::create(destination).map_err(AttemptFailure::Io)?;

        let capacity = self.buffer_size.min(total.max(1).min(usize::MAX as u64) as usize);
        let mut buffer = vec![0u8; capacity.max(1)];
        let mut hasher = create_hasher(self.algorithm);
        let mut bytes_copied = 0u64;

        loop {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(AttemptFailure::Cancelled);
            }
            let n = match src.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(AttemptFailure::Io(e)),
            };
            dst.write_all(&buffer[..n]).map_err(AttemptFailure::Io)?;
            hasher.update(&buffer[..n]);
            bytes_copied += n as u64;

            if let Some(cb) = progress {
                cb.on_progress(bytes_copied, total);
            }
        }

        dst.sync_all().map_err(AttemptFailure::Io)?;
        Ok((hasher.finalize(), bytes_copied))
    }

    /// Fail with `InsufficientStorage` unless `dir` has room for `bytes` plus margin.
    fn check_capacity(&self, dir: &Path, bytes: u64) -> Result<(), EngineError> {
        // Margin in basis points keeps 100 B * 1.10 at exactly 110 B
        let margin_bp = (self.capacity_margin.max(0.0) * 10_000.0).round() as u128;
        let required = (bytes as u128 * margin_bp).div_ceil(10_000).min(u64::MAX as u128) as u64;
        let available = (self.space_probe)(dir)?;
        if available < required {
            warn!(path = %dir.display(), required, available, "insufficient storage");
            return Err(EngineError::InsufficientStorage {
                required,
                available,
                path: dir.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Copy every file under `source_dir` into `destination_dir`.
    ///
    /// Capacity is checked once against the whole tree. The first failing
    /// file aborts the copy.
    pub fn copy_tree(
        &self,
        source_dir: &Path,
        destination_dir: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<TreeCopyResult, EngineError> {
        self.copy_tree_inner(source_dir, destination_dir, progress, None)
    }

    /// [`copy_tree`](Self::copy_tree) with cooperative cancellation.
    pub fn copy_tree_cancellable(
        &self,
        source_dir: &Path,
        destination_dir: &Path,
        progress: Option<&dyn ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<TreeCopyResult, EngineError> {
        self.copy_tree_inner(source_dir, destination_dir, progress, Some(cancel))
    }

    fn copy_tree_inner(
        &self,
        source_dir: &Path,
        destination_dir: &Path,
        progress: Option<&dyn ProgressCallback>,
        cancel: Option<&CancellationToken>,
    ) -> Result<TreeCopyResult, EngineError> {
        let started = Instant::now();
        let entries = fs_ops::enumerate_tree(source_dir).map_err(|e| match e {
            EngineError::FileNotFound { path } => EngineError::SourceNotFound { path },
            other => other,
        })?;
        let total: u64 = entries.iter().map(|e| e.size).sum();

        fs_ops::ensure_dir_exists(destination_dir)?;
        self.check_capacity(destination_dir, total)?;

        info!(
            source = %source_dir.display(),
            destination = %destination_dir.display(),
            files = entries.len(),
            bytes = total,
            "starting tree copy"
        );

        let mut file_checksums = BTreeMap::new();
        let mut bytes_copied = 0u64;
        for entry in &entries {
            let target = destination_dir.join(&entry.relative_path);
            let result = match progress {
                Some(inner) => {
                    let offset = OffsetProgress {
                        inner,
                        offset: bytes_copied,
                        total,
                    };
                    self.copy_file_inner(&entry.path, &target, Some(&offset), cancel, false)?
                }
                None => self.copy_file_inner(&entry.path, &target, None, cancel, false)?,
            };
            bytes_copied += result.bytes_copied;
            file_checksums.insert(entry.key(), result.checksum.hex().to_string());
        }

        let manifest_digest = checksums::manifest_digest(&file_checksums, self.algorithm);
        Ok(TreeCopyResult {
            source: source_dir.to_path_buf(),
            destination: destination_dir.to_path_buf(),
            files_copied: entries.len(),
            bytes_copied,
            file_checksums,
            manifest_digest,
            duration_seconds: started.elapsed().as_secs_f64(),
        })
    }

    /// Check that `copy` still matches `original`.
    ///
    /// # Errors
    /// `VerificationFailed` with kind `file_exists`, `size_mismatch` or
    /// `checksum_mismatch`; `Io` if a file cannot be read.
    pub fn verify_copy(&self, original: &Path, copy: &Path) -> Result<(), EngineError> {
        for path in [original, copy] {
            if !path.is_file() {
                return Err(EngineError::VerificationFailed {
                    kind: VerificationKind::FileExists,
                    reason: format!("{} does not exist", path.display()),
                });
            }
        }

        let original_size = fs::metadata(original).map_err(|e| EngineError::io(original, e))?.len();
        let copy_size = fs::metadata(copy).map_err(|e| EngineError::io(copy, e))?.len();
        if original_size != copy_size {
            return Err(EngineError::VerificationFailed {
                kind: VerificationKind::SizeMismatch,
                reason: format!("original {} bytes, copy {} bytes", original_size, copy_size),
            });
        }

        let expected = checksums::hash_file(original, self.algorithm, 0)?;
        let actual = checksums::hash_file(copy, self.algorithm, 0)?;
        if expected != actual {
            return Err(EngineError::VerificationFailed {
                kind: VerificationKind::ChecksumMismatch,
                reason: format!("expected {}, got {}", expected.hex(), actual.hex()),
            });
        }

        debug!(original = %original.display(), copy = %copy.display(), "copy verified");
        Ok(())
    }

    /// Execute a job against local storage providers rooted at each destination.
    pub fn execute_backup(&self, job: &BackupJob) -> Result<ExecutionResult, EngineError> {
        let resolver = |dest: &Destination| -> Result<Box<dyn StorageProvider>, EngineError> {
            Ok(Box::new(LocalStorageProvider::for_destination(dest, self.clone())))
        };
        self.execute_backup_with(job, &resolver)
    }

    /// Execute a job, resolving each destination to a provider with `resolver`.
    ///
    /// Destinations are processed in order. A file source lands at
    /// `<dest>/<file name>`, a directory source at `<dest>/<dir name>/...`.
    ///
    /// # Errors
    /// `InvalidJob` for an inactive job or one without destinations,
    /// `SourceNotFound` for a missing source, `BackupFailed` when no
    /// destination succeeded.
    pub fn execute_backup_with(
        &self,
        job: &BackupJob,
        resolver: ProviderResolver<'_>,
    ) -> Result<ExecutionResult, EngineError> {
        if !job.is_active {
            return Err(EngineError::InvalidJob {
                job_id: job.id,
                reason: "job is not active".to_string(),
            });
        }
        if job.destinations.is_empty() {
            return Err(EngineError::InvalidJob {
                job_id: job.id,
                reason: "job has no destinations".to_string(),
            });
        }
        let source_meta = fs::metadata(&job.source_path).map_err(|_| EngineError::SourceNotFound {
            path: job.source_path.clone(),
        })?;
        let name = job.source_path.file_name().ok_or_else(|| EngineError::InvalidJob {
            job_id: job.id,
            reason: format!("source {:?} has no final component", job.source_path),
        })?;
        let relative = Path::new(name);

        let start_time = Utc::now();
        let started = Instant::now();
        info!(
            job_id = %job.id,
            job = %job.name,
            destinations = job.destinations.len(),
            "starting backup"
        );

        let mut copies_created = Vec::new();
        let mut errors = Vec::new();
        let mut total_bytes = 0u64;

        for dest in &job.destinations {
            match self.copy_to_destination(job, dest, relative, source_meta.is_dir(), resolver) {
                Ok(copy) => {
                    total_bytes += copy.size_bytes;
                    copies_created.push(copy);
                }
                Err(e) => {
                    error!(
                        job_id = %job.id,
                        destination = %dest.path.display(),
                        error = %e,
                        "destination failed"
                    );
                    errors.push(DestinationFailure {
                        destination: dest.path.clone(),
                        error: RecordedError::from(&e),
                    });
                }
            }
        }

        if copies_created.is_empty() {
            return Err(EngineError::BackupFailed {
                job_id: job.id,
                errors: errors.into_iter().map(|f| f.error).collect(),
            });
        }

        let status = if errors.is_empty() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Partial
        };
        let duration_seconds = started.elapsed().as_secs_f64();
        info!(
            job_id = %job.id,
            ?status,
            copies = copies_created.len(),
            failures = errors.len(),
            total_bytes,
            duration_seconds,
            "backup finished"
        );

        Ok(ExecutionResult {
            job_id: job.id,
            status,
            start_time,
            end_time: Utc::now(),
            duration_seconds,
            total_bytes,
            copies_created,
            errors,
        })
    }

    fn copy_to_destination(
        &self,
        job: &BackupJob,
        dest: &Destination,
        relative: &Path,
        source_is_dir: bool,
        resolver: ProviderResolver<'_>,
    ) -> Result<BackupCopy, EngineError> {
        let provider = resolver(dest)?;
        provider.connect()?;

        let storage_path = provider.resolve_path(relative);
        let (checksum, file_checksums, size_bytes) = if source_is_dir {
            let tree = provider.copy_directory(&job.source_path, relative, None)?;
            (tree.manifest_digest, tree.file_checksums, tree.bytes_copied)
        } else {
            let file = provider.copy_file(&job.source_path, relative, None)?;
            (file.checksum.hex().to_string(), BTreeMap::new(), file.bytes_copied)
        };

        Ok(BackupCopy {
            id: Uuid::new_v4(),
            job_id: job.id,
            role: dest.role,
            media_type: dest.media_type,
            location: dest.location,
            storage_path,
            checksum,
            file_checksums,
            size_bytes,
            is_immutable: dest.is_immutable || provider.is_immutable(),
            status: CopyStatus::Success,
            verification_status: CopyVerification::Unverified,
            last_backup_at: Utc::now(),
            retired_at: None,
        })
    }

    /// Load a job, execute it, and record its copies and status.
    ///
    /// # Errors
    /// `JobNotFound` for an unknown id, otherwise as
    /// [`execute_backup`](Self::execute_backup). A failed execution still
    /// annotates the job.
    pub fn execute_job(
        &self,
        repository: &dyn Repository,
        job_id: Uuid,
    ) -> Result<ExecutionResult, EngineError> {
        let job = repository.job(job_id)?;
        match self.execute_backup(&job) {
            Ok(result) => {
                for copy in &result.copies_created {
                    repository.upsert_copy(copy.clone())?;
                }
                repository.update_job_status(job_id, result.status)?;
                Ok(result)
            }
            Err(e) => {
                if matches!(
                    e,
                    EngineError::BackupFailed { .. } | EngineError::SourceNotFound { .. }
                ) {
                    repository.update_job_status(job_id, ExecutionStatus::Failed)?;
                }
                Err(e)
            }
        }
    }
}
