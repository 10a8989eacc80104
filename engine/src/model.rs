//! Core data model for backup jobs and their copies.
//!
//! This module defines the records the engine reads and writes:
//! - BackupJob / Destination: what to back up and where
//! - BackupCopy: one physical copy produced by an execution
//! - VerificationTest / VerificationSchedule: restore-test history and plans
//! - MediaType, StorageLocation, CopyRole, ...: enums classifying copies

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured backup job.
///
/// The engine only reads jobs, apart from annotating `last_status` after an
/// execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupJob {
    /// Unique identifier for this job
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// File or directory to back up
    pub source_path: PathBuf,

    /// Where copies are written (one copy per destination)
    pub destinations: Vec<Destination>,

    /// How often an external scheduler triggers this job
    #[serde(default)]
    pub schedule: ScheduleClass,

    /// Retention window for old copies
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Inactive jobs are never executed
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Status of the most recent execution
    #[serde(default)]
    pub last_status: Option<ExecutionStatus>,
}

fn default_retention_days() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

impl BackupJob {
    /// Create an active job with no destinations.
    pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        BackupJob {
            id: Uuid::new_v4(),
            name: name.into(),
            source_path: source_path.into(),
            destinations: Vec::new(),
            schedule: ScheduleClass::default(),
            retention_days: default_retention_days(),
            is_active: true,
            last_status: None,
        }
    }

    /// Builder-style helper to append a destination.
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }
}

/// One destination of a job.
///
/// `path` is a directory root: a file source lands at `<path>/<file name>`,
/// a directory source at `<path>/<dir name>/...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub path: PathBuf,
    #[serde(default)]
    pub role: CopyRole,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub location: StorageLocation,
    #[serde(default)]
    pub is_immutable: bool,
}

impl Destination {
    /// Local onsite disk destination with the given role.
    pub fn local(path: impl Into<PathBuf>, role: CopyRole) -> Self {
        Destination {
            path: path.into(),
            role,
            media_type: MediaType::Disk,
            location: StorageLocation::Onsite,
            is_immutable: false,
        }
    }
}

/// Trigger class of a job. The engine never acts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleClass {
    Daily,
    Weekly,
    Monthly,
    #[default]
    Manual,
}

/// Role of a copy within a job's set of copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyRole {
    #[default]
    Primary,
    Secondary,
    Offsite,
    Offline,
}

/// Physical medium holding a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Disk,
    Nas,
    Cloud,
    Tape,
    Immutable,
    ExternalHdd,
    Usb,
    /// Not counted as a distinct media type
    #[default]
    Unknown,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MediaType::Disk => "disk",
            MediaType::Nas => "nas",
            MediaType::Cloud => "cloud",
            MediaType::Tape => "tape",
            MediaType::Immutable => "immutable",
            MediaType::ExternalHdd => "external_hdd",
            MediaType::Usb => "usb",
            MediaType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Where a copy physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLocation {
    #[default]
    Onsite,
    Offsite,
    Offline,
    Cloud,
}

/// Outcome of producing a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    Success,
    Failed,
    Partial,
}

/// Latest verification outcome recorded on a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyVerification {
    #[default]
    Unverified,
    Passed,
    Failed,
}

/// Overall status of a backup execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Every destination succeeded
    Success,
    /// At least one destination failed and at least one succeeded
    Partial,
    /// No destination succeeded
    Failed,
}

/// One physical copy of a job's source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupCopy {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub job_id: Uuid,
    #[serde(default)]
    pub role: CopyRole,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub location: StorageLocation,
    /// File or directory holding the copy
    pub storage_path: PathBuf,
    /// Lowercase hex digest; the manifest digest for directory copies
    #[serde(default)]
    pub checksum: String,
    /// Relative path -> hex digest, only for directory copies
    #[serde(default)]
    pub file_checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub is_immutable: bool,
    pub status: CopyStatus,
    #[serde(default)]
    pub verification_status: CopyVerification,
    pub last_backup_at: DateTime<Utc>,
    /// Set when the copy leaves the active set
    #[serde(default)]
    pub retired_at: Option<DateTime<Utc>>,
}

impl BackupCopy {
    /// Whether the copy counts toward compliance.
    pub fn is_active(&self) -> bool {
        self.retired_at.is_none()
    }

    /// Whether the copy is a directory copy with a per-file manifest.
    pub fn has_manifest(&self) -> bool {
        !self.file_checksums.is_empty()
    }
}

/// Kind of verification campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    FullRestore,
    Partial,
    Integrity,
}

impl TestType {
    /// Pass-rate threshold (percent) attached to the campaign as metadata.
    pub fn success_threshold(&self) -> f64 {
        match self {
            TestType::FullRestore => 95.0,
            TestType::Partial => 90.0,
            TestType::Integrity => 98.0,
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestType::FullRestore => write!(f, "full_restore"),
            TestType::Partial => write!(f, "partial"),
            TestType::Integrity => write!(f, "integrity"),
        }
    }
}

/// Classified outcome of a verification test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Success,
    Warning,
    Failed,
    /// The campaign itself could not run
    Error,
}

/// A recorded verification test. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationTest {
    pub id: Uuid,
    pub job_id: Uuid,
    pub test_type: TestType,
    pub initiator: String,
    pub result: TestResult,
    pub duration_seconds: f64,
    pub issues: Vec<String>,
    /// Per-campaign counters (files checked, verified, rates, ...)
    pub details: serde_json::Value,
    pub restore_target: Option<PathBuf>,
    pub tested_at: DateTime<Utc>,
}

/// Restore-test cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFrequency {
    Monthly,
    Quarterly,
    SemiAnnual,
    Annual,
}

impl TestFrequency {
    /// Days between two scheduled tests.
    pub fn days(&self) -> i64 {
        match self {
            TestFrequency::Monthly => 30,
            TestFrequency::Quarterly => 90,
            TestFrequency::SemiAnnual => 180,
            TestFrequency::Annual => 365,
        }
    }

    /// Date of the next test after `from`.
    pub fn next_after(&self, from: NaiveDate) -> NaiveDate {
        from + Duration::days(self.days())
    }
}

/// Planned restore tests for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSchedule {
    pub id: Uuid,
    pub job_id: Uuid,
    pub frequency: TestFrequency,
    pub next_test_date: NaiveDate,
    pub last_test_date: Option<NaiveDate>,
    pub assigned_to: Option<String>,
    pub is_active: bool,
}

impl VerificationSchedule {
    /// A schedule is overdue once its next test date is reached.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.is_active && self.next_test_date <= today
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_json_defaults() {
        let job: BackupJob = serde_json::from_str(
            r#"{
                "name": "docs",
                "source_path": "/data/docs",
                "destinations": [{ "path": "/mnt/a", "media_type": "nas", "location": "offsite" }]
            }"#,
        )
        .expect("job should deserialize");

        assert!(job.is_active);
        assert_eq!(job.schedule, ScheduleClass::Manual);
        assert_eq!(job.retention_days, 30);
        assert_eq!(job.destinations[0].role, CopyRole::Primary);
        assert_eq!(job.destinations[0].media_type, MediaType::Nas);
        assert_eq!(job.destinations[0].location, StorageLocation::Offsite);
        assert!(!job.destinations[0].is_immutable);
    }

    #[test]
    fn test_enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&MediaType::ExternalHdd).unwrap(),
            "\"external_hdd\""
        );
        assert_eq!(
            serde_json::to_string(&TestFrequency::SemiAnnual).unwrap(),
            "\"semi_annual\""
        );
        assert_eq!(serde_json::to_string(&TestType::FullRestore).unwrap(), "\"full_restore\"");
    }

    #[test]
    fn test_frequency_days() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(
            TestFrequency::Monthly.next_after(today),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
        );
        assert_eq!(TestFrequency::Quarterly.days(), 90);
        assert_eq!(TestFrequency::SemiAnnual.days(), 180);
        assert_eq!(TestFrequency::Annual.days(), 365);
    }

    #[test]
    fn test_schedule_overdue_on_due_date() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut schedule = VerificationSchedule {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            frequency: TestFrequency::Monthly,
            next_test_date: today,
            last_test_date: None,
            assigned_to: None,
            is_active: true,
        };
        assert!(schedule.is_overdue(today));

        schedule.next_test_date = today + Duration::days(1);
        assert!(!schedule.is_overdue(today));

        schedule.next_test_date = today;
        schedule.is_active = false;
        assert!(!schedule.is_overdue(today));
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(TestType::FullRestore.success_threshold(), 95.0);
        assert_eq!(TestType::Partial.success_threshold(), 90.0);
        assert_eq!(TestType::Integrity.success_threshold(), 98.0);
    }
}
