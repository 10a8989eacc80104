//! 3-2-1-1-0 rule evaluation.
//!
//! A job is compliant when its active, successful copies satisfy all five
//! dimensions:
//! - **3** copies or more
//! - **2** distinct media types or more
//! - **1** offsite copy or more
//! - **1** offline or immutable copy or more
//! - **0** copies whose last verification failed
//!
//! Snapshots are derived from copy records on demand and are never a source
//! of truth. Violations are returned as data; [`ComplianceEvaluator::evaluate_strict`]
//! raises them instead.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CompliancePolicy;
use crate::error::EngineError;
use crate::model::{BackupCopy, CopyStatus, CopyVerification, MediaType, StorageLocation};
use crate::repository::Repository;

pub const MIN_COPIES: usize = 3;
pub const MIN_MEDIA_TYPES: usize = 2;
pub const MIN_OFFSITE_COPIES: usize = 1;
pub const MIN_OFFLINE_COPIES: usize = 1;

/// One dimension of the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleDimension {
    MinCopies,
    DifferentMedia,
    OffsiteCopy,
    OfflineCopy,
    ZeroErrors,
}

impl RuleDimension {
    /// Contribution of the dimension to the compliance score.
    pub fn weight(&self) -> f64 {
        match self {
            RuleDimension::MinCopies => 0.25,
            RuleDimension::DifferentMedia => 0.20,
            RuleDimension::OffsiteCopy => 0.20,
            RuleDimension::OfflineCopy => 0.20,
            RuleDimension::ZeroErrors => 0.15,
        }
    }
}

/// A failing dimension with a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub dimension: RuleDimension,
    pub message: String,
}

/// Overall classification of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    /// Compliant, with advisory warnings
    Warning,
    NonCompliant,
}

/// Counts behind the five booleans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceDetails {
    pub total_copies: usize,
    pub media_types: Vec<MediaType>,
    pub media_count: usize,
    pub offsite_copies: usize,
    pub offline_copies: usize,
    pub verification_errors: usize,
}

/// Point-in-time evaluation of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    pub job_id: Uuid,
    pub min_copies: bool,
    pub different_media: bool,
    pub offsite_copy: bool,
    pub offline_copy: bool,
    pub zero_errors: bool,
    pub compliant: bool,
    pub status: ComplianceStatus,
    /// Weighted score in [0, 1]
    pub score: f64,
    pub details: ComplianceDetails,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComplianceSnapshot {
    /// Whether a dimension holds.
    pub fn passes(&self, dimension: RuleDimension) -> bool {
        match dimension {
            RuleDimension::MinCopies => self.min_copies,
            RuleDimension::DifferentMedia => self.different_media,
            RuleDimension::OffsiteCopy => self.offsite_copy,
            RuleDimension::OfflineCopy => self.offline_copy,
            RuleDimension::ZeroErrors => self.zero_errors,
        }
    }
}

/// Compliance across every active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub total_jobs: usize,
    pub compliant_jobs: usize,
    pub non_compliant_jobs: usize,
    /// Compliant jobs that carry warnings (also counted as compliant)
    pub warning_jobs: usize,
    /// Percentage of compliant jobs, rounded to two decimals
    pub compliance_rate: f64,
    pub snapshots: Vec<ComplianceSnapshot>,
    pub checked_at: DateTime<Utc>,
}

const DIMENSIONS: [RuleDimension; 5] = [
    RuleDimension::MinCopies,
    RuleDimension::DifferentMedia,
    RuleDimension::OffsiteCopy,
    RuleDimension::OfflineCopy,
    RuleDimension::ZeroErrors,
];

/// Evaluates copy sets against the 3-2-1-1-0 rule.
#[derive(Debug, Clone, Default)]
pub struct ComplianceEvaluator {
    policy: CompliancePolicy,
}

impl ComplianceEvaluator {
    pub fn new(policy: CompliancePolicy) -> Self {
        ComplianceEvaluator { policy }
    }

    /// Evaluate `copies` as of now.
    pub fn evaluate(&self, job_id: Uuid, copies: &[BackupCopy]) -> ComplianceSnapshot {
        self.evaluate_at(job_id, copies, Utc::now())
    }

    /// Evaluate `copies` as of `now`; only affects offline staleness warnings.
    pub fn evaluate_at(
        &self,
        job_id: Uuid,
        copies: &[BackupCopy],
        now: DateTime<Utc>,
    ) -> ComplianceSnapshot {
        let counted: Vec<&BackupCopy> = copies
            .iter()
            .filter(|c| c.is_active() && c.status == CopyStatus::Success)
            .collect();

        let media: BTreeSet<MediaType> = counted
            .iter()
            .map(|c| c.media_type)
            .filter(|m| *m != MediaType::Unknown)
            .collect();
        let offline: Vec<&&BackupCopy> = counted
            .iter()
            .filter(|c| is_offline_or_immutable(c))
            .collect();

        let details = ComplianceDetails {
            total_copies: counted.len(),
            media_count: media.len(),
            media_types: media.into_iter().collect(),
            offsite_copies: counted
                .iter()
                .filter(|c| c.location == StorageLocation::Offsite)
                .count(),
            offline_copies: offline.len(),
            verification_errors: counted
                .iter()
                .filter(|c| c.verification_status == CopyVerification::Failed)
                .count(),
        };

        let mut warnings = Vec::new();
        for copy in &offline {
            let age_days = (now - copy.last_backup_at).num_days();
            if age_days > self.policy.offline_stale_days {
                warnings.push(format!(
                    "Offline copy '{}' is {} days old (warning threshold: {} days)",
                    copy.storage_path.display(),
                    age_days,
                    self.policy.offline_stale_days
                ));
            }
        }

        let mut snapshot = ComplianceSnapshot {
            job_id,
            min_copies: details.total_copies >= MIN_COPIES,
            different_media: details.media_count >= MIN_MEDIA_TYPES,
            offsite_copy: details.offsite_copies >= MIN_OFFSITE_COPIES,
            offline_copy: details.offline_copies >= MIN_OFFLINE_COPIES,
            zero_errors: details.verification_errors == 0,
            compliant: false,
            status: ComplianceStatus::NonCompliant,
            score: 0.0,
            details,
            violations: Vec::new(),
            warnings,
            checked_at: now,
        };

        snapshot.violations = DIMENSIONS
            .iter()
            .filter(|d| !snapshot.passes(**d))
            .map(|d| Violation {
                dimension: *d,
                message: violation_message(*d, &snapshot.details),
            })
            .collect();
        snapshot.compliant = snapshot.violations.is_empty();
        snapshot.score = score(&snapshot);
        snapshot.status = match (snapshot.compliant, snapshot.warnings.is_empty()) {
            (false, _) => ComplianceStatus::NonCompliant,
            (true, true) => ComplianceStatus::Compliant,
            (true, false) => ComplianceStatus::Warning,
        };

        if snapshot.compliant {
            info!(
                job_id = %job_id,
                score = snapshot.score,
                warnings = snapshot.warnings.len(),
                "3-2-1-1-0 rule satisfied"
            );
        } else {
            warn!(
                job_id = %job_id,
                score = snapshot.score,
                violations = snapshot.violations.len(),
                "3-2-1-1-0 rule violated"
            );
        }
        snapshot
    }

    /// Like [`evaluate`](Self::evaluate), raising `RuleViolation` when not compliant.
    pub fn evaluate_strict(
        &self,
        job_id: Uuid,
        copies: &[BackupCopy],
    ) -> Result<ComplianceSnapshot, EngineError> {
        let snapshot = self.evaluate(job_id, copies);
        if snapshot.compliant {
            Ok(snapshot)
        } else {
            Err(EngineError::RuleViolation {
                job_id,
                snapshot: Box::new(snapshot),
            })
        }
    }

    /// Evaluate a stored job from its copy records.
    pub fn evaluate_job(
        &self,
        repository: &dyn Repository,
        job_id: Uuid,
    ) -> Result<ComplianceSnapshot, EngineError> {
        let job = repository.job(job_id)?;
        let copies = repository.copies_for_job(job.id)?;
        Ok(self.evaluate(job.id, &copies))
    }

    /// Evaluate every active job.
    pub fn evaluate_all(
        &self,
        repository: &dyn Repository,
    ) -> Result<ComplianceSummary, EngineError> {
        let mut snapshots = Vec::new();
        for job in repository.jobs()?.into_iter().filter(|j| j.is_active) {
            let copies = repository.copies_for_job(job.id)?;
            snapshots.push(self.evaluate(job.id, &copies));
        }

        let total_jobs = snapshots.len();
        let compliant_jobs = snapshots.iter().filter(|s| s.compliant).count();
        let warning_jobs = snapshots
            .iter()
            .filter(|s| s.status == ComplianceStatus::Warning)
            .count();
        let rate = if total_jobs == 0 {
            0.0
        } else {
            compliant_jobs as f64 / total_jobs as f64 * 100.0
        };
        let compliance_rate = (rate * 100.0).round() / 100.0;

        info!(compliant_jobs, total_jobs, compliance_rate, "system compliance evaluated");

        Ok(ComplianceSummary {
            total_jobs,
            compliant_jobs,
            non_compliant_jobs: total_jobs - compliant_jobs,
            warning_jobs,
            compliance_rate,
            snapshots,
            checked_at: Utc::now(),
        })
    }
}

fn is_offline_or_immutable(copy: &BackupCopy) -> bool {
    copy.location == StorageLocation::Offline || copy.is_immutable
}

fn violation_message(dimension: RuleDimension, details: &ComplianceDetails) -> String {
    match dimension {
        RuleDimension::MinCopies => format!(
            "Only {} copy/copies found. Minimum {} required.",
            details.total_copies, MIN_COPIES
        ),
        RuleDimension::DifferentMedia => format!(
            "Only {} media type(s) found. Minimum {} required.",
            details.media_count, MIN_MEDIA_TYPES
        ),
        RuleDimension::OffsiteCopy => "No offsite copy found.".to_string(),
        RuleDimension::OfflineCopy => "No offline or immutable copy found.".to_string(),
        RuleDimension::ZeroErrors => format!(
            "{} copy/copies failed verification.",
            details.verification_errors
        ),
    }
}

/// Weighted score of the passing dimensions, in [0, 1].
pub fn score(snapshot: &ComplianceSnapshot) -> f64 {
    DIMENSIONS
        .iter()
        .filter(|d| snapshot.passes(**d))
        .map(|d| d.weight())
        .sum()
}

/// One remediation step per failing dimension.
pub fn recommendations(snapshot: &ComplianceSnapshot) -> Vec<String> {
    let details = &snapshot.details;
    snapshot
        .violations
        .iter()
        .map(|v| match v.dimension {
            RuleDimension::MinCopies => format!(
                "Create {} more backup copy/copies",
                MIN_COPIES.saturating_sub(details.total_copies)
            ),
            RuleDimension::DifferentMedia => format!(
                "Only {} media type(s) in use; back up to a different media type (tape, cloud, ...)",
                details.media_count
            ),
            RuleDimension::OffsiteCopy => {
                "Create a backup copy at an offsite (physically separate) location".to_string()
            }
            RuleDimension::OfflineCopy => {
                "Create a backup copy on offline or immutable storage".to_string()
            }
            RuleDimension::ZeroErrors => format!(
                "Resolve {} verification error(s) and re-run verification",
                details.verification_errors
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupJob, CopyRole};
    use crate::repository::InMemoryRepository;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn copy(media: MediaType, location: StorageLocation) -> BackupCopy {
        BackupCopy {
            id: Uuid::new_v4(),
            job_id: Uuid::nil(),
            role: CopyRole::Primary,
            media_type: media,
            location,
            storage_path: PathBuf::from(format!("/backup/{}", Uuid::new_v4())),
            checksum: "00".to_string(),
            file_checksums: BTreeMap::new(),
            size_bytes: 10,
            is_immutable: false,
            status: CopyStatus::Success,
            verification_status: CopyVerification::Passed,
            last_backup_at: Utc::now(),
            retired_at: None,
        }
    }

    fn compliant_set() -> Vec<BackupCopy> {
        vec![
            copy(MediaType::Disk, StorageLocation::Onsite),
            copy(MediaType::Cloud, StorageLocation::Offsite),
            copy(MediaType::Tape, StorageLocation::Offline),
        ]
    }

    #[test]
    fn test_compliant_set() {
        let snapshot = ComplianceEvaluator::default().evaluate(Uuid::nil(), &compliant_set());
        assert!(snapshot.compliant);
        assert_eq!(snapshot.status, ComplianceStatus::Compliant);
        assert!((snapshot.score - 1.0).abs() < 1e-9);
        assert!(snapshot.violations.is_empty());
        assert!(recommendations(&snapshot).is_empty());
    }

    #[test]
    fn test_two_copies_fail_min_copies_only() {
        let copies = vec![
            copy(MediaType::Disk, StorageLocation::Offsite),
            copy(MediaType::Tape, StorageLocation::Offline),
        ];
        let snapshot = ComplianceEvaluator::default().evaluate(Uuid::nil(), &copies);

        assert!(!snapshot.compliant);
        assert!(!snapshot.min_copies);
        assert!(snapshot.different_media && snapshot.offsite_copy);
        assert!(snapshot.offline_copy && snapshot.zero_errors);
        assert!((snapshot.score - 0.75).abs() < 1e-9);
        assert_eq!(
            recommendations(&snapshot),
            vec!["Create 1 more backup copy/copies".to_string()]
        );
    }

    #[test]
    fn test_single_media_type_fails() {
        let mut copies = vec![
            copy(MediaType::Disk, StorageLocation::Onsite),
            copy(MediaType::Disk, StorageLocation::Offsite),
            copy(MediaType::Disk, StorageLocation::Onsite),
        ];
        copies[2].is_immutable = true;
        let snapshot = ComplianceEvaluator::default().evaluate(Uuid::nil(), &copies);

        assert!(!snapshot.different_media);
        assert!(snapshot.offline_copy, "immutable copy counts as offline");
        assert_eq!(snapshot.violations.len(), 1);
        assert_eq!(snapshot.violations[0].dimension, RuleDimension::DifferentMedia);
    }

    #[test]
    fn test_fourth_copy_on_new_media_flips_media_rule_only() {
        let evaluator = ComplianceEvaluator::default();
        let mut copies = vec![
            copy(MediaType::Disk, StorageLocation::Onsite),
            copy(MediaType::Disk, StorageLocation::Onsite),
            copy(MediaType::Disk, StorageLocation::Onsite),
        ];
        let before = evaluator.evaluate(Uuid::nil(), &copies);
        assert!(before.min_copies);
        assert!(!before.different_media);
        assert!(!before.compliant);

        copies.push(copy(MediaType::Tape, StorageLocation::Onsite));
        let after = evaluator.evaluate(Uuid::nil(), &copies);
        assert!(after.different_media);
        assert_eq!(after.details.media_count, 2);
        assert!(!after.offsite_copy && !after.offline_copy);
        assert!(!after.compliant);
        assert!(after.score > before.score);
    }

    #[test]
    fn test_unknown_media_not_counted() {
        let copies = vec![
            copy(MediaType::Disk, StorageLocation::Onsite),
            copy(MediaType::Unknown, StorageLocation::Offsite),
            copy(MediaType::Unknown, StorageLocation::Offline),
        ];
        let snapshot = ComplianceEvaluator::default().evaluate(Uuid::nil(), &copies);
        assert_eq!(snapshot.details.media_count, 1);
        assert!(!snapshot.different_media);
    }

    #[test]
    fn test_verification_failure_blocks_compliance() {
        let mut copies = compliant_set();
        copies[1].verification_status = CopyVerification::Failed;
        let snapshot = ComplianceEvaluator::default().evaluate(Uuid::nil(), &copies);

        assert!(!snapshot.zero_errors);
        assert!(!snapshot.compliant);
        assert!((snapshot.score - 0.85).abs() < 1e-9);
        assert_eq!(
            recommendations(&snapshot),
            vec!["Resolve 1 verification error(s) and re-run verification".to_string()]
        );
    }

    #[test]
    fn test_retired_and_failed_copies_ignored() {
        let mut copies = compliant_set();
        copies[0].retired_at = Some(Utc::now());
        copies.push(BackupCopy {
            status: CopyStatus::Failed,
            ..copy(MediaType::Usb, StorageLocation::Onsite)
        });
        let snapshot = ComplianceEvaluator::default().evaluate(Uuid::nil(), &copies);
        assert_eq!(snapshot.details.total_copies, 2);
        assert!(!snapshot.min_copies);
    }

    #[test]
    fn test_empty_set_scores_zero_errors_only() {
        let snapshot = ComplianceEvaluator::default().evaluate(Uuid::nil(), &[]);
        assert!(!snapshot.compliant);
        assert!((snapshot.score - 0.15).abs() < 1e-9);
        assert_eq!(recommendations(&snapshot).len(), 4);
    }

    #[test]
    fn test_stale_offline_copy_warns_without_breaking_compliance() {
        let mut copies = compliant_set();
        let now = Utc::now();
        copies[2].last_backup_at = now - Duration::days(8);

        let snapshot = ComplianceEvaluator::default().evaluate_at(Uuid::nil(), &copies, now);
        assert!(snapshot.compliant);
        assert_eq!(snapshot.status, ComplianceStatus::Warning);
        assert_eq!(snapshot.warnings.len(), 1);
        assert!(snapshot.warnings[0].contains("8 days old"));

        copies[2].last_backup_at = now - Duration::days(7);
        let fresh = ComplianceEvaluator::default().evaluate_at(Uuid::nil(), &copies, now);
        assert!(fresh.warnings.is_empty());
    }

    #[test]
    fn test_evaluate_strict_carries_snapshot() {
        let evaluator = ComplianceEvaluator::default();
        assert!(evaluator.evaluate_strict(Uuid::nil(), &compliant_set()).is_ok());

        let err = evaluator.evaluate_strict(Uuid::nil(), &compliant_set()[..1]).unwrap_err();
        match err {
            EngineError::RuleViolation { snapshot, .. } => {
                assert!(!snapshot.min_copies);
                assert_eq!(snapshot.details.total_copies, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_evaluate_all_summary() {
        let good = BackupJob::new("good", "/data/good");
        let bad = BackupJob::new("bad", "/data/bad");
        let mut idle = BackupJob::new("idle", "/data/idle");
        idle.is_active = false;

        let mut copies: Vec<BackupCopy> = compliant_set()
            .into_iter()
            .map(|c| BackupCopy { job_id: good.id, ..c })
            .collect();
        copies.push(BackupCopy {
            job_id: bad.id,
            ..copy(MediaType::Disk, StorageLocation::Onsite)
        });

        let good_id = good.id;
        let repo = InMemoryRepository::with_records(vec![good, bad, idle], copies);
        let evaluator = ComplianceEvaluator::default();

        let summary = evaluator.evaluate_all(&repo).expect("evaluate_all failed");
        assert_eq!(summary.total_jobs, 2);
        assert_eq!(summary.compliant_jobs, 1);
        assert_eq!(summary.non_compliant_jobs, 1);
        assert_eq!(summary.compliance_rate, 50.0);

        assert!(evaluator.evaluate_job(&repo, good_id).unwrap().compliant);
        assert!(matches!(
            evaluator.evaluate_job(&repo, Uuid::new_v4()),
            Err(EngineError::JobNotFound { .. })
        ));
    }
}
