//! Persistence contract for jobs, copies, tests and schedules.
//!
//! The engine reads jobs and writes copy records, test records and schedule
//! updates through [`Repository`]. [`InMemoryRepository`] backs the CLI and
//! the tests; a database-backed implementation lives outside the engine.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{
    BackupCopy, BackupJob, CopyVerification, ExecutionStatus, VerificationSchedule,
    VerificationTest,
};

/// Storage of engine records.
///
/// Verification tests are append-only: there is no update or delete.
/// Copies leave the active set through [`retire_copy`](Self::retire_copy).
pub trait Repository: Send + Sync {
    fn job(&self, job_id: Uuid) -> Result<BackupJob, EngineError>;

    fn jobs(&self) -> Result<Vec<BackupJob>, EngineError>;

    /// Insert or replace a job by id.
    fn save_job(&self, job: BackupJob) -> Result<(), EngineError>;

    fn update_job_status(&self, job_id: Uuid, status: ExecutionStatus) -> Result<(), EngineError>;

    /// Every copy of a job, retired ones included.
    fn copies_for_job(&self, job_id: Uuid) -> Result<Vec<BackupCopy>, EngineError>;

    /// Insert a copy, or update the active copy with the same job and
    /// storage path. Returns the stored record.
    fn upsert_copy(&self, copy: BackupCopy) -> Result<BackupCopy, EngineError>;

    fn update_copy_verification(
        &self,
        copy_id: Uuid,
        status: CopyVerification,
    ) -> Result<(), EngineError>;

    fn retire_copy(&self, copy_id: Uuid) -> Result<(), EngineError>;

    fn record_test(&self, test: VerificationTest) -> Result<(), EngineError>;

    fn tests_for_job(&self, job_id: Uuid) -> Result<Vec<VerificationTest>, EngineError>;

    fn save_schedule(&self, schedule: VerificationSchedule) -> Result<(), EngineError>;

    fn schedules(&self) -> Result<Vec<VerificationSchedule>, EngineError>;

    fn update_schedule(&self, schedule: VerificationSchedule) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct Records {
    jobs: Vec<BackupJob>,
    copies: Vec<BackupCopy>,
    tests: Vec<VerificationTest>,
    schedules: Vec<VerificationSchedule>,
}

/// Thread-safe in-memory repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: RwLock<Records>,
}

fn poisoned() -> EngineError {
    EngineError::StorageUnavailable {
        provider: "in-memory repository".to_string(),
        reason: "lock poisoned by a panicked writer".to_string(),
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository preloaded with jobs and copies, e.g. from a JSON inventory.
    pub fn with_records(jobs: Vec<BackupJob>, copies: Vec<BackupCopy>) -> Self {
        InMemoryRepository {
            records: RwLock::new(Records {
                jobs,
                copies,
                ..Records::default()
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>, EngineError> {
        self.records.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>, EngineError> {
        self.records.write().map_err(|_| poisoned())
    }
}

impl Repository for InMemoryRepository {
    fn job(&self, job_id: Uuid) -> Result<BackupJob, EngineError> {
        self.read()?
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
            .ok_or(EngineError::JobNotFound { job_id })
    }

    fn jobs(&self) -> Result<Vec<BackupJob>, EngineError> {
        Ok(self.read()?.jobs.clone())
    }

    fn save_job(&self, job: BackupJob) -> Result<(), EngineError> {
        let mut records = self.write()?;
        match records.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => records.jobs.push(job),
        }
        Ok(())
    }

    fn update_job_status(&self, job_id: Uuid, status: ExecutionStatus) -> Result<(), EngineError> {
        let mut records = self.write()?;
        let job = records
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(EngineError::JobNotFound { job_id })?;
        job.last_status = Some(status);
        Ok(())
    }

    fn copies_for_job(&self, job_id: Uuid) -> Result<Vec<BackupCopy>, EngineError> {
        Ok(self
            .read()?
            .copies
            .iter()
            .filter(|c| c.job_id == job_id)
            .cloned()
            .collect())
    }

    fn upsert_copy(&self, copy: BackupCopy) -> Result<BackupCopy, EngineError> {
        let mut records = self.write()?;
        let existing = records.copies.iter_mut().find(|c| {
            c.job_id == copy.job_id && c.storage_path == copy.storage_path && c.is_active()
        });

        let stored = match existing {
            Some(existing) => {
                let id = existing.id;
                *existing = BackupCopy { id, ..copy };
                existing.clone()
            }
            None => {
                records.copies.push(copy.clone());
                copy
            }
        };
        debug!(
            copy_id = %stored.id,
            job_id = %stored.job_id,
            path = %stored.storage_path.display(),
            "stored copy record"
        );
        Ok(stored)
    }

    fn update_copy_verification(
        &self,
        copy_id: Uuid,
        status: CopyVerification,
    ) -> Result<(), EngineError> {
        let mut records = self.write()?;
        let copy = records
            .copies
            .iter_mut()
            .find(|c| c.id == copy_id)
            .ok_or(EngineError::CopyNotFound { copy_id })?;
        copy.verification_status = status;
        Ok(())
    }

    fn retire_copy(&self, copy_id: Uuid) -> Result<(), EngineError> {
        let mut records = self.write()?;
        let copy = records
            .copies
            .iter_mut()
            .find(|c| c.id == copy_id)
            .ok_or(EngineError::CopyNotFound { copy_id })?;
        if copy.retired_at.is_none() {
            copy.retired_at = Some(Utc::now());
        }
        Ok(())
    }

    fn record_test(&self, test: VerificationTest) -> Result<(), EngineError> {
        self.write()?.tests.push(test);
        Ok(())
    }

    fn tests_for_job(&self, job_id: Uuid) -> Result<Vec<VerificationTest>, EngineError> {
        Ok(self
            .read()?
            .tests
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    fn save_schedule(&self, schedule: VerificationSchedule) -> Result<(), EngineError> {
        self.write()?.schedules.push(schedule);
        Ok(())
    }

    fn schedules(&self) -> Result<Vec<VerificationSchedule>, EngineError> {
        Ok(self.read()?.schedules.clone())
    }

    fn update_schedule(&self, schedule: VerificationSchedule) -> Result<(), EngineError> {
        let mut records = self.write()?;
        let existing = records
            .schedules
            .iter_mut()
            .find(|s| s.id == schedule.id)
            .ok_or(EngineError::ScheduleNotFound {
                schedule_id: schedule.id,
            })?;
        *existing = schedule;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CopyRole, CopyStatus, MediaType, StorageLocation};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn copy_at(job_id: Uuid, path: &str, checksum: &str) -> BackupCopy {
        BackupCopy {
            id: Uuid::new_v4(),
            job_id,
            role: CopyRole::Primary,
            media_type: MediaType::Disk,
            location: StorageLocation::Onsite,
            storage_path: PathBuf::from(path),
            checksum: checksum.to_string(),
            file_checksums: BTreeMap::new(),
            size_bytes: 1,
            is_immutable: false,
            status: CopyStatus::Success,
            verification_status: CopyVerification::Unverified,
            last_backup_at: Utc::now(),
            retired_at: None,
        }
    }

    #[test]
    fn test_job_lookup_and_status() {
        let repo = InMemoryRepository::new();
        let job = BackupJob::new("docs", "/data");
        let id = job.id;
        repo.save_job(job).unwrap();

        repo.update_job_status(id, ExecutionStatus::Partial).unwrap();
        assert_eq!(repo.job(id).unwrap().last_status, Some(ExecutionStatus::Partial));
        assert_eq!(repo.jobs().unwrap().len(), 1);

        let missing = Uuid::new_v4();
        assert!(matches!(
            repo.job(missing),
            Err(EngineError::JobNotFound { job_id }) if job_id == missing
        ));
    }

    #[test]
    fn test_upsert_keeps_identity_per_path() {
        let repo = InMemoryRepository::new();
        let job_id = Uuid::new_v4();

        let first = repo.upsert_copy(copy_at(job_id, "/a/x", "01")).unwrap();
        let second = repo.upsert_copy(copy_at(job_id, "/a/x", "02")).unwrap();
        repo.upsert_copy(copy_at(job_id, "/b/x", "03")).unwrap();

        assert_eq!(first.id, second.id);
        let copies = repo.copies_for_job(job_id).unwrap();
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].checksum, "02");
    }

    #[test]
    fn test_retired_copy_is_kept_and_not_upserted() {
        let repo = InMemoryRepository::new();
        let job_id = Uuid::new_v4();
        let copy = repo.upsert_copy(copy_at(job_id, "/a/x", "01")).unwrap();

        repo.retire_copy(copy.id).unwrap();
        repo.upsert_copy(copy_at(job_id, "/a/x", "02")).unwrap();

        let copies = repo.copies_for_job(job_id).unwrap();
        assert_eq!(copies.len(), 2);
        assert_eq!(copies.iter().filter(|c| c.is_active()).count(), 1);

        assert!(matches!(repo.retire_copy(Uuid::new_v4()), Err(EngineError::CopyNotFound { .. })));
    }

    #[test]
    fn test_update_copy_verification() {
        let repo = InMemoryRepository::new();
        let copy = repo.upsert_copy(copy_at(Uuid::new_v4(), "/a", "01")).unwrap();
        repo.update_copy_verification(copy.id, CopyVerification::Failed).unwrap();
        assert_eq!(
            repo.copies_for_job(copy.job_id).unwrap()[0].verification_status,
            CopyVerification::Failed
        );
    }
}
