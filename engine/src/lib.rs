//! # BackUP Engine - Backup Integrity Library
//!
//! A headless backup data-integrity core in Rust.
//! Designed as the foundation for multiple front ends (CLI, services, automation).
//!
//! ## Overview
//!
//! The engine copies a job's source to each of its destinations and proves
//! the copies are good. It features:
//! - Streaming checksums (SHA-256, SHA-512, BLAKE2b, BLAKE2s, BLAKE3, MD5)
//!   with parallel batch hashing
//! - File integrity validation and corruption detection
//! - Copies with inline checksums, capacity pre-checks, retries and cancellation
//! - Per-destination error isolation when executing a job
//! - 3-2-1-1-0 compliance evaluation
//! - Restore verification campaigns and their schedules
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{BackupJob, ComplianceEvaluator, CopyEngine, CopyRole, Destination};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let job = BackupJob::new("documents", "/data/documents")
//!     .with_destination(Destination::local("/mnt/backup", CopyRole::Primary));
//!
//! // One copy per destination
//! let result = CopyEngine::new().execute_backup(&job)?;
//! println!("{:?}: {} bytes", result.status, result.total_bytes);
//!
//! // Check the copy set against the 3-2-1-1-0 rule
//! let snapshot = ComplianceEvaluator::default().evaluate(job.id, &result.copies_created);
//! println!("compliant: {} (score {:.2})", snapshot.compliant, snapshot.score);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core records (BackupJob, BackupCopy, VerificationTest, enums)
//! - **error**: Error types and handling
//! - **config**: Engine policies loaded from TOML
//! - **checksums**: Checksum computation and batch hashing
//! - **validator**: File integrity validation
//! - **fs_ops**: Low-level filesystem operations
//! - **progress**: Progress callback trait
//! - **storage**: Storage provider contract and the local provider
//! - **copy**: Copy engine and backup execution
//! - **repository**: Persistence contract and in-memory implementation
//! - **compliance**: 3-2-1-1-0 rule evaluation
//! - **verification**: Restore verification campaigns

pub mod model;
pub mod error;
pub mod config;
pub mod fs_ops;
pub mod progress;
pub mod checksums;
pub mod validator;
pub mod storage;
pub mod copy;
pub mod repository;
pub mod compliance;
pub mod verification;

// Re-export main types and functions
pub use model::{
    BackupCopy, BackupJob, CopyRole, CopyStatus, CopyVerification, Destination, ExecutionStatus,
    MediaType, ScheduleClass, StorageLocation, TestFrequency, TestResult, TestType,
    VerificationSchedule, VerificationTest,
};
pub use error::{EngineError, RecordedError, VerificationKind};
pub use config::EngineConfig;
pub use progress::ProgressCallback;
pub use checksums::{ChecksumAlgorithm, ChecksumEngine, ChecksumValue};
pub use validator::{FileIntegrityValidator, FileValidation, ValidationStatus};
pub use storage::{LocalStorageProvider, StorageProvider, StorageType};
pub use copy::{
    CancellationToken, CopyEngine, CopyResult, ExecutionResult, RetryPolicy, TreeCopyResult,
};
pub use repository::{InMemoryRepository, Repository};
pub use compliance::{recommendations, ComplianceEvaluator, ComplianceSnapshot, ComplianceSummary};
pub use verification::VerificationOrchestrator;
