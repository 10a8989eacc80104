//! Error types for the backup engine.
//!
//! `EngineError` is the single error type returned by engine operations.
//! Each variant carries typed detail (paths, byte counts, the violated
//! dimensions) so callers can build remediation without parsing messages.
//!
//! Per-file and per-destination failures inside batch operations are not
//! returned as `EngineError`; they are recorded as [`RecordedError`] inside
//! the result objects so one failure never hides the others.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::compliance::ComplianceSnapshot;

/// Which verification step failed in [`EngineError::VerificationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    /// Original or copy is missing
    FileExists,
    /// Sizes differ
    SizeMismatch,
    /// Digests differ
    ChecksumMismatch,
}

impl std::fmt::Display for VerificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileExists => write!(f, "file_exists"),
            Self::SizeMismatch => write!(f, "size_mismatch"),
            Self::ChecksumMismatch => write!(f, "checksum_mismatch"),
        }
    }
}

/// Errors raised by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Copy source does not exist
    #[error("source not found: {path:?}")]
    SourceNotFound { path: PathBuf },

    /// A file required by the operation does not exist
    #[error("file not found: {path:?}")]
    FileNotFound { path: PathBuf },

    /// Path exists but is not a regular file
    #[error("not a file: {path:?}")]
    NotAFile { path: PathBuf },

    /// Path exists but is not a directory
    #[error("not a directory: {path:?}")]
    NotADirectory { path: PathBuf },

    /// Read/write failure, including permission denial
    #[error("I/O failure on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Unknown checksum algorithm identifier
    #[error("unsupported checksum algorithm: {name}")]
    UnsupportedAlgorithm { name: String },

    /// Destination lacks the required free space (source size plus margin)
    #[error("insufficient storage at {path:?}: required {required} bytes, available {available} bytes")]
    InsufficientStorage {
        required: u64,
        available: u64,
        path: PathBuf,
    },

    /// Every copy attempt failed; carries the last underlying error
    #[error("copy failed after {attempts} attempt(s): {source_path:?} -> {destination:?}: {source}")]
    CopyFailed {
        source_path: PathBuf,
        destination: PathBuf,
        attempts: usize,
        #[source]
        source: io::Error,
    },

    /// Copy interrupted by its cancellation token
    #[error("copy cancelled: {path:?}")]
    Cancelled { path: PathBuf },

    /// A verification step (existence, size, checksum) did not hold
    #[error("verification failed ({kind}): {reason}")]
    VerificationFailed { kind: VerificationKind, reason: String },

    /// 3-2-1-1-0 evaluation failed; carries the full per-dimension breakdown
    #[error("3-2-1-1-0 rule violation for job {job_id}")]
    RuleViolation {
        job_id: Uuid,
        snapshot: Box<ComplianceSnapshot>,
    },

    /// Referenced job id does not exist
    #[error("backup job not found: {job_id}")]
    JobNotFound { job_id: Uuid },

    /// Referenced copy id does not exist
    #[error("backup copy not found: {copy_id}")]
    CopyNotFound { copy_id: Uuid },

    /// Referenced verification schedule does not exist
    #[error("verification schedule not found: {schedule_id}")]
    ScheduleNotFound { schedule_id: Uuid },

    /// Source and target lists differ in length
    #[error("file count mismatch: {sources} source files, {targets} target files")]
    CountMismatch { sources: usize, targets: usize },

    /// No destination of a backup execution succeeded
    #[error("backup failed for job {job_id}: no destination succeeded")]
    BackupFailed {
        job_id: Uuid,
        errors: Vec<RecordedError>,
    },

    /// Job cannot be executed as configured
    #[error("invalid job {job_id}: {reason}")]
    InvalidJob { job_id: Uuid, reason: String },

    /// Failed to create a directory
    #[error("failed to create directory {path:?}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to enumerate a directory
    #[error("failed to enumerate {path:?}: {source}")]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Storage provider is not reachable or not connected
    #[error("storage provider {provider} unavailable: {reason}")]
    StorageUnavailable { provider: String, reason: String },

    /// Configuration could not be read or parsed
    #[error("invalid configuration {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },
}

impl EngineError {
    /// Stable snake_case tag for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound { .. } => "source_not_found",
            Self::FileNotFound { .. } => "file_not_found",
            Self::NotAFile { .. } => "not_a_file",
            Self::NotADirectory { .. } => "not_a_directory",
            Self::Io { .. } => "io_failure",
            Self::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            Self::InsufficientStorage { .. } => "insufficient_storage",
            Self::CopyFailed { .. } => "copy_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::RuleViolation { .. } => "rule_violation",
            Self::JobNotFound { .. } => "job_not_found",
            Self::CopyNotFound { .. } => "copy_not_found",
            Self::ScheduleNotFound { .. } => "schedule_not_found",
            Self::CountMismatch { .. } => "count_mismatch",
            Self::BackupFailed { .. } => "backup_failed",
            Self::InvalidJob { .. } => "invalid_job",
            Self::DirectoryCreationFailed { .. } => "directory_creation_failed",
            Self::EnumerationFailed { .. } => "enumeration_failed",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::Config { .. } => "config",
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. }
            | Self::CopyFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::EnumerationFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// The path this error is about, when it has one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::SourceNotFound { path }
            | Self::FileNotFound { path }
            | Self::NotAFile { path }
            | Self::NotADirectory { path }
            | Self::Io { path, .. }
            | Self::InsufficientStorage { path, .. }
            | Self::Cancelled { path }
            | Self::DirectoryCreationFailed { path, .. }
            | Self::EnumerationFailed { path, .. }
            | Self::Config { path, .. } => Some(path.as_path()),
            Self::CopyFailed { destination, .. } => Some(destination.as_path()),
            _ => None,
        }
    }

    /// Wrap an `io::Error` for `path`, mapping not-found to [`EngineError::FileNotFound`].
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            EngineError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            EngineError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Serializable record of a failure inside a batch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
    /// Error kind tag (see [`EngineError::kind`])
    pub kind: String,
    /// Human-readable description
    pub message: String,
    /// Path involved, if any
    pub path: Option<PathBuf>,
}

impl From<&EngineError> for RecordedError {
    fn from(err: &EngineError) -> Self {
        RecordedError {
            kind: err.kind().to_string(),
            message: err.to_string(),
            path: err.path().map(|p| p.to_path_buf()),
        }
    }
}
