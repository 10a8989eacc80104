//! File integrity validation.
//!
//! Compares a copy against its original (existence, size, checksum, then
//! optional metadata) and detects corruption against a recorded digest.
//! Results are returned as data; only argument errors are raised.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::checksums::{ChecksumAlgorithm, ChecksumEngine};
use crate::config::ValidationPolicy;
use crate::error::EngineError;

/// Outcome of validating one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Success,
    /// Unexpected error while validating
    Failed,
    ChecksumMismatch,
    FileNotFound,
    SizeMismatch,
    MetadataMismatch,
}

/// Metadata comparison detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataCheck {
    pub source_size: Option<u64>,
    pub target_size: Option<u64>,
    /// Absolute modification-time difference
    pub mtime_diff_seconds: Option<f64>,
    pub source_permissions: Option<String>,
    pub target_permissions: Option<String>,
    /// Advisory findings that do not fail validation
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

/// Detail of one file validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileValidation {
    pub source: PathBuf,
    pub target: PathBuf,
    pub status: ValidationStatus,
    pub algorithm: ChecksumAlgorithm,
    pub source_size: Option<u64>,
    pub target_size: Option<u64>,
    pub source_checksum: Option<String>,
    pub target_checksum: Option<String>,
    pub metadata: Option<MetadataCheck>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl FileValidation {
    fn new(source: &Path, target: &Path, algorithm: ChecksumAlgorithm) -> Self {
        FileValidation {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            status: ValidationStatus::Failed,
            algorithm,
            source_size: None,
            target_size: None,
            source_checksum: None,
            target_checksum: None,
            metadata: None,
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ValidationStatus::Success
    }
}

/// Report over a list of source/target pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupValidationReport {
    pub total_files: usize,
    pub successful: usize,
    /// Mismatches (size, checksum, metadata)
    pub failed: usize,
    /// Missing files and unexpected errors
    pub errors: usize,
    pub success_rate: f64,
    pub algorithm: ChecksumAlgorithm,
    pub files: Vec<FileValidation>,
}

/// Snapshot of the validator's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatistics {
    pub total_validations: u64,
    pub successful: u64,
    pub failed: u64,
    pub errors: u64,
    pub last_validation: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub error_rate: f64,
}

/// Validates copies against originals and recorded digests.
#[derive(Debug)]
pub struct FileIntegrityValidator {
    checksums: Arc<ChecksumEngine>,
    policy: ValidationPolicy,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    errors: AtomicU64,
    last_validation: Mutex<Option<DateTime<Utc>>>,
}

impl Default for FileIntegrityValidator {
    fn default() -> Self {
        Self::new(Arc::new(ChecksumEngine::default()), ValidationPolicy::default())
    }
}

impl FileIntegrityValidator {
    pub fn new(checksums: Arc<ChecksumEngine>, policy: ValidationPolicy) -> Self {
        FileIntegrityValidator {
            checksums,
            policy,
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_validation: Mutex::new(None),
        }
    }

    /// The checksum engine used for digests.
    pub fn checksums(&self) -> &Arc<ChecksumEngine> {
        &self.checksums
    }

    /// Validate `target` as a copy of `source`.
    ///
    /// Checks run in order and stop at the first failure: existence, size,
    /// checksum, then metadata when enabled.
    pub fn verify_file(
        &self,
        source: &Path,
        target: &Path,
        algorithm: ChecksumAlgorithm,
    ) -> FileValidation {
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_validation.lock() {
            *last = Some(Utc::now());
        }

        let mut detail = FileValidation::new(source, target, algorithm);
        match self.run_checks(&mut detail) {
            Ok(status) => {
                detail.status = status;
                if status == ValidationStatus::Success {
                    self.successful.fetch_add(1, Ordering::Relaxed);
                    debug!(source = %source.display(), "verification successful");
                } else {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        source = %source.display(),
                        target = %target.display(),
                        ?status,
                        error = detail.error.as_deref().unwrap_or(""),
                        "verification did not pass"
                    );
                }
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                error!(source = %source.display(), error = %e, "error verifying file");
                detail.status = ValidationStatus::Failed;
                detail.error = Some(e.to_string());
            }
        }
        detail
    }

    fn run_checks(&self, detail: &mut FileValidation) -> Result<ValidationStatus, EngineError> {
        let source = detail.source.clone();
        let target = detail.target.clone();

        if !source.exists() {
            detail.error = Some("Source file not found".to_string());
            return Ok(ValidationStatus::FileNotFound);
        }
        if !target.exists() {
            detail.error = Some("Target file not found".to_string());
            return Ok(ValidationStatus::FileNotFound);
        }

        let source_size = fs::metadata(&source).map_err(|e| EngineError::io(&source, e))?.len();
        let target_size = fs::metadata(&target).map_err(|e| EngineError::io(&target, e))?.len();
        detail.source_size = Some(source_size);
        detail.target_size = Some(target_size);
        if source_size != target_size {
            detail.error = Some(format!("Size mismatch: {} != {}", source_size, target_size));
            return Ok(ValidationStatus::SizeMismatch);
        }

        let source_checksum = self.checksums.hash_file(&source, detail.algorithm)?;
        let target_checksum = self.checksums.hash_file(&target, detail.algorithm)?;
        let matches = source_checksum == target_checksum;
        detail.source_checksum = Some(source_checksum.hex().to_string());
        detail.target_checksum = Some(target_checksum.hex().to_string());
        if !matches {
            detail.error = Some("Checksum mismatch".to_string());
            return Ok(ValidationStatus::ChecksumMismatch);
        }

        if self.policy.verify_metadata {
            let (status, metadata) = self.verify_metadata(&source, &target);
            let error = metadata.error.clone();
            detail.metadata = Some(metadata);
            if status != ValidationStatus::Success {
                detail.error = error;
                return Ok(ValidationStatus::MetadataMismatch);
            }
        }

        Ok(ValidationStatus::Success)
    }

    /// Compare size, modification time and (optionally) permissions.
    ///
    /// Only a size difference fails; mtime drift beyond the tolerance and
    /// permission differences are recorded as warnings.
    pub fn verify_metadata(
        &self,
        source: &Path,
        target: &Path,
    ) -> (ValidationStatus, MetadataCheck) {
        let mut check = MetadataCheck::default();

        let (source_meta, target_meta) = match (fs::metadata(source), fs::metadata(target)) {
            (Ok(s), Ok(t)) => (s, t),
            (Err(e), _) | (_, Err(e)) => {
                check.error = Some(e.to_string());
                return (ValidationStatus::Failed, check);
            }
        };

        check.source_size = Some(source_meta.len());
        check.target_size = Some(target_meta.len());
        if source_meta.len() != target_meta.len() {
            check.error = Some("Size mismatch".to_string());
            return (ValidationStatus::SizeMismatch, check);
        }

        if let (Ok(s), Ok(t)) = (source_meta.modified(), target_meta.modified()) {
            let diff = mtime_difference(s, t);
            check.mtime_diff_seconds = Some(diff);
            if diff > self.policy.mtime_tolerance_secs {
                check
                    .warnings
                    .push(format!("Modification time differs by {:.2}s", diff));
            }
        }

        if self.policy.verify_permissions {
            let source_mode = permission_string(&source_meta.permissions());
            let target_mode = permission_string(&target_meta.permissions());
            if source_mode != target_mode {
                check.warnings.push(format!(
                    "Permission mismatch: {} != {}",
                    source_mode, target_mode
                ));
            }
            check.source_permissions = Some(source_mode);
            check.target_permissions = Some(target_mode);
        }

        (ValidationStatus::Success, check)
    }

    /// Validate pairs of files positionally.
    ///
    /// # Errors
    /// `CountMismatch` if the lists differ in length; nothing is checked then.
    pub fn verify_backup(
        &self,
        sources: &[PathBuf],
        targets: &[PathBuf],
        algorithm: ChecksumAlgorithm,
    ) -> Result<BackupValidationReport, EngineError> {
        if sources.len() != targets.len() {
            return Err(EngineError::CountMismatch {
                sources: sources.len(),
                targets: targets.len(),
            });
        }

        info!(files = sources.len(), %algorithm, "verifying backup");

        let mut report = BackupValidationReport {
            total_files: sources.len(),
            successful: 0,
            failed: 0,
            errors: 0,
            success_rate: 0.0,
            algorithm,
            files: Vec::with_capacity(sources.len()),
        };

        for (source, target) in sources.iter().zip(targets) {
            let detail = self.verify_file(source, target, algorithm);
            match detail.status {
                ValidationStatus::Success => report.successful += 1,
                ValidationStatus::FileNotFound | ValidationStatus::Failed => report.errors += 1,
                _ => report.failed += 1,
            }
            report.files.push(detail);
        }

        report.success_rate = percentage(report.successful, report.total_files);
        info!(
            successful = report.successful,
            total = report.total_files,
            success_rate = report.success_rate,
            "backup verification complete"
        );
        Ok(report)
    }

    /// True if `path` no longer matches `expected`, or cannot be hashed.
    pub fn detect_corruption(
        &self,
        path: &Path,
        expected: &str,
        algorithm: ChecksumAlgorithm,
    ) -> bool {
        match self.checksums.hash_file(path, algorithm) {
            Ok(actual) => {
                let corrupted = !actual.matches(expected);
                if corrupted {
                    warn!(
                        path = %path.display(),
                        expected,
                        actual = actual.hex(),
                        "corruption detected"
                    );
                }
                corrupted
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "corruption check failed, assuming corrupted"
                );
                true
            }
        }
    }

    /// [`detect_corruption`](Self::detect_corruption) over many files in parallel.
    pub fn batch_detect_corruption(
        &self,
        expected: &BTreeMap<PathBuf, String>,
        algorithm: ChecksumAlgorithm,
        max_workers: Option<usize>,
    ) -> BTreeMap<PathBuf, bool> {
        let paths: Vec<PathBuf> = expected.keys().cloned().collect();
        let digests = self.checksums.hash_files_parallel(&paths, algorithm, max_workers);

        let results: BTreeMap<PathBuf, bool> = expected
            .iter()
            .map(|(path, want)| {
                let corrupted = match digests.get(path) {
                    Some(Ok(actual)) => !actual.matches(want),
                    _ => true,
                };
                (path.clone(), corrupted)
            })
            .collect();

        let corrupted = results.values().filter(|c| **c).count();
        if corrupted > 0 {
            warn!(corrupted, total = results.len(), "batch corruption check found problems");
        }
        results
    }

    /// Current counters and derived rates.
    pub fn statistics(&self) -> ValidationStatistics {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let last_validation = self.last_validation.lock().ok().and_then(|g| *g);

        ValidationStatistics {
            total_validations: total,
            successful,
            failed,
            errors,
            last_validation,
            success_rate: percentage(successful as usize, total as usize),
            failure_rate: percentage(failed as usize, total as usize),
            error_rate: percentage(errors as usize, total as usize),
        }
    }

    pub fn reset_statistics(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        if let Ok(mut last) = self.last_validation.lock() {
            *last = None;
        }
    }
}

/// `part / total * 100`, 0 for an empty total.
pub(crate) fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn mtime_difference(a: SystemTime, b: SystemTime) -> f64 {
    match a.duration_since(b) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => e.duration().as_secs_f64(),
    }
}

#[cfg(unix)]
fn permission_string(permissions: &fs::Permissions) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:o}", permissions.mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_string(permissions: &fs::Permissions) -> String {
    if permissions.readonly() {
        "readonly".to_string()
    } else {
        "readwrite".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_pair(dir: &Path, source: &[u8], target: &[u8]) -> (PathBuf, PathBuf) {
        let src = dir.join("source.txt");
        let dst = dir.join("target.txt");
        fs::write(&src, source).expect("Failed to write source");
        fs::write(&dst, target).expect("Failed to write target");
        (src, dst)
    }

    #[test]
    fn test_identical_files_pass() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (src, dst) = setup_pair(temp_dir.path(), b"identical content", b"identical content");

        let validator = FileIntegrityValidator::default();
        let result = validator.verify_file(&src, &dst, ChecksumAlgorithm::Sha256);

        assert_eq!(result.status, ValidationStatus::Success);
        assert_eq!(result.source_checksum, result.target_checksum);
        assert!(result.metadata.is_some());
    }

    #[test]
    fn test_size_mismatch_checked_before_hashing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (src, dst) = setup_pair(temp_dir.path(), b"short", b"much longer content");

        let validator = FileIntegrityValidator::default();
        let result = validator.verify_file(&src, &dst, ChecksumAlgorithm::Sha256);

        assert_eq!(result.status, ValidationStatus::SizeMismatch);
        assert!(result.source_checksum.is_none());
        assert_eq!(validator.checksums().statistics().files_hashed, 0);
    }

    #[test]
    fn test_same_size_different_content() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (src, dst) = setup_pair(temp_dir.path(), b"aaaa", b"aaab");

        let validator = FileIntegrityValidator::default();
        let result = validator.verify_file(&src, &dst, ChecksumAlgorithm::Blake2b);
        assert_eq!(result.status, ValidationStatus::ChecksumMismatch);
    }

    #[test]
    fn test_missing_target() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (src, _) = setup_pair(temp_dir.path(), b"x", b"x");

        let validator = FileIntegrityValidator::default();
        let result =
            validator.verify_file(&src, &temp_dir.path().join("gone"), ChecksumAlgorithm::Sha256);
        assert_eq!(result.status, ValidationStatus::FileNotFound);
        assert_eq!(validator.statistics().failed, 1);
    }

    #[test]
    fn test_mtime_drift_is_only_a_warning() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (src, dst) = setup_pair(temp_dir.path(), b"same", b"same");
        filetime::set_file_mtime(&src, filetime::FileTime::from_unix_time(1_000_000, 0)).unwrap();
        filetime::set_file_mtime(&dst, filetime::FileTime::from_unix_time(1_000_100, 0)).unwrap();

        let validator = FileIntegrityValidator::default();
        let result = validator.verify_file(&src, &dst, ChecksumAlgorithm::Sha256);

        assert_eq!(result.status, ValidationStatus::Success);
        let metadata = result.metadata.expect("metadata should be checked");
        assert_eq!(metadata.mtime_diff_seconds, Some(100.0));
        assert_eq!(metadata.warnings.len(), 1);
    }

    #[test]
    fn test_verify_backup_counts() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path();
        let good_src = dir.join("good_src");
        let good_dst = dir.join("good_dst");
        let bad_src = dir.join("bad_src");
        let bad_dst = dir.join("bad_dst");
        fs::write(&good_src, b"data").unwrap();
        fs::write(&good_dst, b"data").unwrap();
        fs::write(&bad_src, b"data").unwrap();
        fs::write(&bad_dst, b"datX").unwrap();

        let validator = FileIntegrityValidator::default();
        let report = validator
            .verify_backup(
                &[good_src, bad_src, dir.join("missing_src")],
                &[good_dst, bad_dst, dir.join("missing_dst")],
                ChecksumAlgorithm::Sha256,
            )
            .expect("verify_backup failed");

        assert_eq!(report.total_files, 3);
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, 1);
        assert!((report.success_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_verify_backup_count_mismatch() {
        let validator = FileIntegrityValidator::default();
        let err = validator
            .verify_backup(&[PathBuf::from("a")], &[], ChecksumAlgorithm::Sha256)
            .unwrap_err();
        assert!(matches!(err, EngineError::CountMismatch { sources: 1, targets: 0 }));
        assert_eq!(validator.statistics().total_validations, 0);
    }

    #[test]
    fn test_verify_backup_empty() {
        let validator = FileIntegrityValidator::default();
        let report = validator.verify_backup(&[], &[], ChecksumAlgorithm::Sha256).unwrap();
        assert_eq!(report.success_rate, 0.0);
    }

    #[test]
    fn test_detect_corruption_is_fail_safe() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("hello.txt");
        fs::write(&path, b"hello").unwrap();
        let good = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

        let validator = FileIntegrityValidator::default();
        assert!(!validator.detect_corruption(&path, good, ChecksumAlgorithm::Sha256));
        assert!(validator.detect_corruption(&path, "deadbeef", ChecksumAlgorithm::Sha256));
        assert!(validator.detect_corruption(
            &temp_dir.path().join("missing"),
            good,
            ChecksumAlgorithm::Sha256
        ));
    }

    #[test]
    fn test_batch_detect_corruption() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let ok = temp_dir.path().join("ok");
        let bad = temp_dir.path().join("bad");
        fs::write(&ok, b"hello").unwrap();
        fs::write(&bad, b"tampered").unwrap();
        let hello = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

        let mut expected = BTreeMap::new();
        expected.insert(ok.clone(), hello.to_string());
        expected.insert(bad.clone(), hello.to_string());
        expected.insert(temp_dir.path().join("missing"), hello.to_string());

        let validator = FileIntegrityValidator::default();
        let results =
            validator.batch_detect_corruption(&expected, ChecksumAlgorithm::Sha256, Some(2));
        assert_eq!(results.len(), 3);
        assert!(!results[&ok]);
        assert!(results[&bad]);
        assert!(results[&temp_dir.path().join("missing")]);
    }

    #[test]
    fn test_statistics_rates() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (src, dst) = setup_pair(temp_dir.path(), b"x", b"x");

        let validator = FileIntegrityValidator::default();
        validator.verify_file(&src, &dst, ChecksumAlgorithm::Sha256);
        validator.verify_file(&src, &temp_dir.path().join("none"), ChecksumAlgorithm::Sha256);

        let stats = validator.statistics();
        assert_eq!(stats.total_validations, 2);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.failure_rate, 50.0);
        assert!(stats.last_validation.is_some());

        validator.reset_statistics();
        assert_eq!(validator.statistics().total_validations, 0);
        assert!(validator.statistics().last_validation.is_none());
    }
}
