//! Restore verification campaigns.
//!
//! The orchestrator runs three kinds of test against a job's copies:
//! - **Integrity**: re-hash every copy and compare against recorded digests
//! - **Partial**: restore a sample of files and verify them
//! - **Full restore**: restore the primary copy and verify its files
//!
//! Every test is recorded, including those that could not run (as
//! [`TestResult::Error`]). Completed tests advance the job's schedule.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::checksums::ChecksumAlgorithm;
use crate::config::VerificationPolicy;
use crate::error::EngineError;
use crate::fs_ops::{self, TreeEntry};
use crate::model::{
    BackupCopy, CopyRole, CopyVerification, TestFrequency, TestResult, TestType,
    VerificationSchedule, VerificationTest,
};
use crate::repository::Repository;
use crate::validator::{percentage, FileIntegrityValidator};

/// Counters over the tests run by one orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationStatistics {
    pub total_tests: u64,
    pub successful_tests: u64,
    pub warning_tests: u64,
    /// Failed and errored tests
    pub failed_tests: u64,
    pub success_rate: f64,
    pub last_test: Option<DateTime<Utc>>,
}

/// What a campaign produced before it is recorded.
struct Outcome {
    result: TestResult,
    issues: Vec<String>,
    details: serde_json::Value,
}

/// Per-file tally of one copy's integrity check.
#[derive(Default)]
struct CopyCheck {
    checked: usize,
    valid: usize,
    issues: Vec<String>,
}

impl CopyCheck {
    /// Count one checked file, valid unless it has a problem.
    fn record(&mut self, problem: Option<String>) {
        self.checked += 1;
        match problem {
            Some(issue) => self.issues.push(issue),
            None => self.valid += 1,
        }
    }

    fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.valid == self.checked
    }
}

/// Where restored files are written.
enum RestoreDir {
    /// Removed when dropped
    Scratch(TempDir),
    Target(PathBuf),
}

impl RestoreDir {
    fn path(&self) -> &Path {
        match self {
            RestoreDir::Scratch(dir) => dir.path(),
            RestoreDir::Target(path) => path,
        }
    }

    fn kept_path(&self) -> Option<PathBuf> {
        match self {
            RestoreDir::Scratch(_) => None,
            RestoreDir::Target(path) => Some(path.clone()),
        }
    }
}

/// Runs, records and schedules verification tests.
pub struct VerificationOrchestrator {
    repository: Arc<dyn Repository>,
    validator: Arc<FileIntegrityValidator>,
    algorithm: ChecksumAlgorithm,
    policy: VerificationPolicy,
    total: AtomicU64,
    successful: AtomicU64,
    warnings: AtomicU64,
    failed: AtomicU64,
    last_test: Mutex<Option<DateTime<Utc>>>,
}

impl VerificationOrchestrator {
    /// Orchestrator hashing with the validator's checksum engine algorithm.
    pub fn new(
        repository: Arc<dyn Repository>,
        validator: Arc<FileIntegrityValidator>,
        policy: VerificationPolicy,
    ) -> Self {
        let algorithm = validator.checksums().algorithm();
        VerificationOrchestrator {
            repository,
            validator,
            algorithm,
            policy,
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_test: Mutex::new(None),
        }
    }

    /// Run one test and record it.
    ///
    /// # Arguments
    /// * `restore_target` - Keep restored files here instead of a scratch directory
    /// * `sample_files` - Relative paths to restore in a partial test
    ///
    /// # Errors
    /// Only when the test cannot be recorded. Failures of the test itself
    /// are reported in the returned record.
    pub fn run_test(
        &self,
        job_id: Uuid,
        test_type: TestType,
        initiator: &str,
        restore_target: Option<&Path>,
        sample_files: Option<&[String]>,
    ) -> Result<VerificationTest, EngineError> {
        info!(job_id = %job_id, %test_type, initiator, "verification test started");
        let started = Instant::now();

        let outcome = match self.execute(job_id, test_type, restore_target, sample_files) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id = %job_id, %test_type, error = %e, "verification test could not run");
                Outcome {
                    result: TestResult::Error,
                    issues: vec![e.to_string()],
                    details: json!({ "error_kind": e.kind() }),
                }
            }
        };

        let test = VerificationTest {
            id: Uuid::new_v4(),
            job_id,
            test_type,
            initiator: initiator.to_string(),
            result: outcome.result,
            duration_seconds: started.elapsed().as_secs_f64(),
            issues: outcome.issues,
            details: outcome.details,
            restore_target: restore_target.map(Path::to_path_buf),
            tested_at: Utc::now(),
        };

        self.repository.record_test(test.clone())?;
        self.count(test.result, test.tested_at);
        if test.result != TestResult::Error {
            self.advance_schedule(job_id, test.tested_at.date_naive())?;
        }

        info!(
            job_id = %job_id,
            %test_type,
            result = ?test.result,
            issues = test.issues.len(),
            duration_seconds = test.duration_seconds,
            "verification test recorded"
        );
        Ok(test)
    }

    fn execute(
        &self,
        job_id: Uuid,
        test_type: TestType,
        restore_target: Option<&Path>,
        sample_files: Option<&[String]>,
    ) -> Result<Outcome, EngineError> {
        let job = self.repository.job(job_id)?;
        let copies: Vec<BackupCopy> = self
            .repository
            .copies_for_job(job.id)?
            .into_iter()
            .filter(|c| c.is_active())
            .collect();
        if copies.is_empty() {
            return Err(EngineError::InvalidJob {
                job_id,
                reason: "job has no backup copies".to_string(),
            });
        }

        match test_type {
            TestType::Integrity => self.integrity_test(&copies),
            TestType::Partial => {
                self.partial_test(primary_copy(&copies), restore_target, sample_files)
            }
            TestType::FullRestore => self.full_restore_test(primary_copy(&copies), restore_target),
        }
    }

    fn integrity_test(&self, copies: &[BackupCopy]) -> Result<Outcome, EngineError> {
        let mut issues = Vec::new();
        let mut copies_checked = 0usize;
        let mut copies_valid = 0usize;
        let mut files_checked = 0usize;
        let mut files_valid = 0usize;

        for copy in copies {
            if !copy.storage_path.exists() {
                warn!(
                    copy_id = %copy.id,
                    path = %copy.storage_path.display(),
                    "backup copy missing"
                );
                issues.push(format!(
                    "Copy {} not found at {}",
                    copy.id,
                    copy.storage_path.display()
                ));
                continue;
            }
            copies_checked += 1;

            let check = self.check_copy(copy);
            files_checked += check.checked;
            files_valid += check.valid;
            let status = if check.is_clean() {
                copies_valid += 1;
                CopyVerification::Passed
            } else {
                CopyVerification::Failed
            };
            issues.extend(check.issues);
            self.repository.update_copy_verification(copy.id, status)?;
        }

        let result = if files_checked == 0 || files_valid == 0 {
            TestResult::Failed
        } else if files_valid < files_checked || !issues.is_empty() {
            TestResult::Warning
        } else {
            TestResult::Success
        };

        Ok(Outcome {
            result,
            issues,
            details: json!({
                "copies_total": copies.len(),
                "copies_checked": copies_checked,
                "copies_valid": copies_valid,
                "files_checked": files_checked,
                "files_valid": files_valid,
                "validity_rate": percentage(files_valid, files_checked),
                "success_threshold": TestType::Integrity.success_threshold(),
            }),
        })
    }

    /// Per-file integrity of one existing copy. A file copy counts as one file.
    fn check_copy(&self, copy: &BackupCopy) -> CopyCheck {
        let path = &copy.storage_path;
        let mut check = CopyCheck::default();

        if path.is_file() {
            let problem = if copy.checksum.is_empty() {
                self.validator
                    .checksums()
                    .hash_file(path, self.algorithm)
                    .err()
                    .map(|e| format!("Cannot hash {}: {}", path.display(), e))
            } else if self.validator.detect_corruption(path, &copy.checksum, self.algorithm) {
                Some(format!("Checksum mismatch for copy {} at {}", copy.id, path.display()))
            } else {
                None
            };
            check.record(problem);
            return check;
        }

        if copy.has_manifest() {
            for (key, expected) in &copy.file_checksums {
                let corrupted = self.validator.detect_corruption(
                    &path.join(key.as_str()),
                    expected,
                    self.algorithm,
                );
                check.record(
                    corrupted
                        .then(|| format!("Checksum mismatch for {} in copy {}", key, copy.id)),
                );
            }
            return check;
        }

        match fs_ops::enumerate_tree(path) {
            Ok(entries) => {
                for entry in &entries {
                    let problem = self
                        .validator
                        .checksums()
                        .hash_file(&entry.path, self.algorithm)
                        .err()
                        .map(|e| format!("Cannot hash {}: {}", entry.path.display(), e));
                    check.record(problem);
                }
            }
            Err(e) => check
                .issues
                .push(format!("Cannot enumerate copy {}: {}", copy.id, e)),
        }
        check
    }

    fn partial_test(
        &self,
        copy: &BackupCopy,
        restore_target: Option<&Path>,
        sample_files: Option<&[String]>,
    ) -> Result<Outcome, EngineError> {
        if !copy.storage_path.exists() {
            return Ok(missing_copy(copy));
        }
        let entries = copy_entries(copy)?;
        let mut issues = Vec::new();

        let sample: Vec<TreeEntry> = match sample_files {
            Some(requested) => requested
                .iter()
                .filter_map(|key| {
                    let found = entries.iter().find(|e| &e.key() == key).cloned();
                    if found.is_none() {
                        warn!(file = %key, "sample file not present in backup copy");
                        issues.push(format!("Sample file not found in backup: {}", key));
                    }
                    found
                })
                .collect(),
            None => entries
                .choose_multiple(&mut rand::thread_rng(), self.policy.partial_sample_size)
                .cloned()
                .collect(),
        };

        let restore_dir = self.restore_dir(TestType::Partial, restore_target)?;
        let (passed, failed) =
            self.restore_and_verify(copy, &sample, restore_dir.path(), &mut issues);

        let result = if sample.is_empty() {
            issues.push("No files available to test".to_string());
            TestResult::Failed
        } else if failed == 0 {
            TestResult::Success
        } else if passed > failed {
            TestResult::Warning
        } else {
            TestResult::Failed
        };

        Ok(Outcome {
            result,
            issues,
            details: json!({
                "copy_id": copy.id,
                "files_tested": sample.len(),
                "files_passed": passed,
                "files_failed": failed,
                "pass_rate": percentage(passed, sample.len()),
                "success_threshold": TestType::Partial.success_threshold(),
                "restore_path": restore_dir.kept_path(),
            }),
        })
    }

    fn full_restore_test(
        &self,
        copy: &BackupCopy,
        restore_target: Option<&Path>,
    ) -> Result<Outcome, EngineError> {
        if !copy.storage_path.exists() {
            return Ok(missing_copy(copy));
        }
        let entries = copy_entries(copy)?;
        let restore_dir = self.restore_dir(TestType::FullRestore, restore_target)?;
        let mut issues = Vec::new();

        let (restored, failures) = fs_ops::restore_entries(&entries, restore_dir.path());
        let restore_errors = failures.len();
        for (key, e) in failures {
            issues.push(format!("Restore failed for {}: {}", key, e));
        }

        let cap = self.policy.full_restore_sample_cap;
        if restored.len() > cap {
            info!(restored = restored.len(), cap, "verifying the first files of a large restore");
        }
        let checked = restored.len().min(cap);
        let mut verified = 0usize;
        for (entry, dst) in restored.iter().take(cap) {
            if self.verify_restored(copy, entry, dst, &mut issues) {
                verified += 1;
            }
        }

        let result = if checked > 0 && verified == checked {
            if restore_errors == 0 {
                TestResult::Success
            } else {
                TestResult::Warning
            }
        } else if verified > 0 {
            TestResult::Warning
        } else {
            TestResult::Failed
        };

        Ok(Outcome {
            result,
            issues,
            details: json!({
                "copy_id": copy.id,
                "files_in_copy": entries.len(),
                "files_restored": restored.len(),
                "restore_errors": restore_errors,
                "files_checked": checked,
                "files_verified": verified,
                "verification_rate": percentage(verified, checked),
                "success_threshold": TestType::FullRestore.success_threshold(),
                "restore_path": restore_dir.kept_path(),
            }),
        })
    }

    /// Restore each entry under `restore_root` and verify it; returns (passed, failed).
    fn restore_and_verify(
        &self,
        copy: &BackupCopy,
        entries: &[TreeEntry],
        restore_root: &Path,
        issues: &mut Vec<String>,
    ) -> (usize, usize) {
        let (restored, failures) = fs_ops::restore_entries(entries, restore_root);
        let mut passed = 0;
        let mut failed = failures.len();
        for (key, e) in failures {
            issues.push(format!("Restore failed for {}: {}", key, e));
        }
        for (entry, dst) in &restored {
            if self.verify_restored(copy, entry, dst, issues) {
                passed += 1;
            } else {
                failed += 1;
            }
        }
        (passed, failed)
    }

    /// Compare a restored file with its backup and, when known, its recorded digest.
    fn verify_restored(
        &self,
        copy: &BackupCopy,
        entry: &TreeEntry,
        restored: &Path,
        issues: &mut Vec<String>,
    ) -> bool {
        let validation = self.validator.verify_file(&entry.path, restored, self.algorithm);
        if !validation.is_success() {
            issues.push(format!(
                "Restored file {} failed verification: {:?}",
                entry.key(),
                validation.status
            ));
            return false;
        }

        let expected = if copy.has_manifest() {
            copy.file_checksums.get(&entry.key()).cloned()
        } else if !copy.checksum.is_empty() && copy.storage_path.is_file() {
            Some(copy.checksum.clone())
        } else {
            None
        };
        match (expected, validation.target_checksum) {
            (Some(want), Some(got)) if !want.eq_ignore_ascii_case(&got) => {
                issues.push(format!(
                    "Restored file {} does not match the recorded checksum",
                    entry.key()
                ));
                false
            }
            _ => true,
        }
    }

    fn restore_dir(
        &self,
        test_type: TestType,
        target: Option<&Path>,
    ) -> Result<RestoreDir, EngineError> {
        if let Some(target) = target {
            fs_ops::ensure_dir_exists(target)?;
            return Ok(RestoreDir::Target(target.to_path_buf()));
        }
        let root = &self.policy.scratch_root;
        fs_ops::ensure_dir_exists(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}_", test_type))
            .tempdir_in(root)
            .map_err(|e| EngineError::io(root, e))?;
        Ok(RestoreDir::Scratch(dir))
    }

    /// Plan recurring tests for a job, the first one a full period from today.
    ///
    /// # Errors
    /// `JobNotFound` for an unknown job.
    pub fn schedule(
        &self,
        job_id: Uuid,
        frequency: TestFrequency,
        assigned_to: Option<&str>,
    ) -> Result<VerificationSchedule, EngineError> {
        let job = self.repository.job(job_id)?;
        let schedule = VerificationSchedule {
            id: Uuid::new_v4(),
            job_id: job.id,
            frequency,
            next_test_date: frequency.next_after(Utc::now().date_naive()),
            last_test_date: None,
            assigned_to: assigned_to.map(str::to_string),
            is_active: true,
        };
        self.repository.save_schedule(schedule.clone())?;
        info!(
            job_id = %job_id,
            ?frequency,
            next = %schedule.next_test_date,
            "verification scheduled"
        );
        Ok(schedule)
    }

    /// Active schedules due on or before `today`.
    pub fn overdue_schedules(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<VerificationSchedule>, EngineError> {
        Ok(self
            .repository
            .schedules()?
            .into_iter()
            .filter(|s| s.is_overdue(today))
            .collect())
    }

    /// Recorded tests of a job, oldest first.
    pub fn history(&self, job_id: Uuid) -> Result<Vec<VerificationTest>, EngineError> {
        self.repository.tests_for_job(job_id)
    }

    fn advance_schedule(&self, job_id: Uuid, today: NaiveDate) -> Result<(), EngineError> {
        let active = self
            .repository
            .schedules()?
            .into_iter()
            .find(|s| s.job_id == job_id && s.is_active);
        if let Some(mut schedule) = active {
            schedule.last_test_date = Some(today);
            schedule.next_test_date = schedule.frequency.next_after(today);
            self.repository.update_schedule(schedule)?;
        }
        Ok(())
    }

    fn count(&self, result: TestResult, at: DateTime<Utc>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            TestResult::Success => &self.successful,
            TestResult::Warning => &self.warnings,
            TestResult::Failed | TestResult::Error => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_test.lock() {
            *last = Some(at);
        }
    }

    pub fn statistics(&self) -> VerificationStatistics {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        VerificationStatistics {
            total_tests: total,
            successful_tests: successful,
            warning_tests: self.warnings.load(Ordering::Relaxed),
            failed_tests: self.failed.load(Ordering::Relaxed),
            success_rate: percentage(successful as usize, total as usize),
            last_test: self.last_test.lock().ok().and_then(|g| *g),
        }
    }
}

/// Restore campaigns cannot read a copy whose storage path is gone.
fn missing_copy(copy: &BackupCopy) -> Outcome {
    warn!(copy_id = %copy.id, path = %copy.storage_path.display(), "backup copy missing");
    Outcome {
        result: TestResult::Failed,
        issues: vec![format!(
            "Backup copy not found at {}",
            copy.storage_path.display()
        )],
        details: json!({
            "copy_id": copy.id,
            "files_tested": 0,
            "restore_path": serde_json::Value::Null,
        }),
    }
}

/// The primary copy, or the first copy when none is marked primary.
fn primary_copy(copies: &[BackupCopy]) -> &BackupCopy {
    copies
        .iter()
        .find(|c| c.role == CopyRole::Primary)
        .unwrap_or(&copies[0])
}

/// Files held by a copy: the tree of a directory copy, or the file itself.
fn copy_entries(copy: &BackupCopy) -> Result<Vec<TreeEntry>, EngineError> {
    let path = &copy.storage_path;
    let metadata = std::fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
    if metadata.is_dir() {
        return fs_ops::enumerate_tree(path);
    }
    let name = path.file_name().map(PathBuf::from).ok_or_else(|| EngineError::NotAFile {
        path: path.clone(),
    })?;
    Ok(vec![TreeEntry {
        path: path.clone(),
        relative_path: name,
        size: metadata.len(),
    }])
}
