//! Engine configuration.
//!
//! Every policy constant of the engine lives here with its default value.
//! A TOML file may override any subset of fields:
//!
//! ```toml
//! [copy]
//! buffer_size = 8388608
//! retry_delays_secs = [1, 5, 15]
//! capacity_margin = 1.1
//!
//! [verification]
//! full_restore_sample_cap = 100
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;

/// Default streaming chunk for hashing (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default copy buffer (64 MiB), sized for large backup payloads.
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Default wait before each retry of a failed copy attempt.
pub const DEFAULT_RETRY_DELAYS_SECS: [u64; 3] = [1, 5, 15];

/// Free space required at the destination, as a multiple of the source size.
pub const DEFAULT_CAPACITY_MARGIN: f64 = 1.10;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub copy: CopyPolicy,
    pub checksum: ChecksumPolicy,
    pub validation: ValidationPolicy,
    pub verification: VerificationPolicy,
    pub compliance: CompliancePolicy,
}

/// Copy engine behaviour: buffering, retries, capacity margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyPolicy {
    /// Read/write chunk size in bytes
    pub buffer_size: usize,
    /// Wait (seconds) after attempt N fails; the number of attempts is `len()`
    pub retry_delays_secs: Vec<u64>,
    /// Required free space as a multiple of the source size
    pub capacity_margin: f64,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            retry_delays_secs: DEFAULT_RETRY_DELAYS_SECS.to_vec(),
            capacity_margin: DEFAULT_CAPACITY_MARGIN,
        }
    }
}

impl CopyPolicy {
    /// Retry schedule as durations.
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}

/// Checksum engine defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumPolicy {
    pub algorithm: ChecksumAlgorithm,
    pub chunk_size: usize,
    /// Worker pool size; `None` uses available parallelism
    pub max_workers: Option<usize>,
}

impl Default for ChecksumPolicy {
    fn default() -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: None,
        }
    }
}

/// File validator switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub verify_metadata: bool,
    pub verify_permissions: bool,
    /// Allowed modification-time drift between source and copy
    pub mtime_tolerance_secs: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            verify_metadata: true,
            verify_permissions: false,
            mtime_tolerance_secs: 2.0,
        }
    }
}

/// Verification campaign limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationPolicy {
    /// Files verified after a full restore of a large tree
    pub full_restore_sample_cap: usize,
    /// Random sample size for partial restore tests
    pub partial_sample_size: usize,
    /// Parent of scratch restore directories
    pub scratch_root: PathBuf,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            full_restore_sample_cap: 100,
            partial_sample_size: 10,
            scratch_root: std::env::temp_dir().join("backup_verification_tests"),
        }
    }
}

/// Compliance evaluator thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompliancePolicy {
    /// Offline copies older than this many days produce a warning
    pub offline_stale_days: i64,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            offline_stale_days: 7,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.copy.buffer_size, 64 * 1024 * 1024);
        assert_eq!(config.copy.retry_delays_secs, vec![1, 5, 15]);
        assert!((config.copy.capacity_margin - 1.10).abs() < f64::EPSILON);
        assert_eq!(config.checksum.chunk_size, 65536);
        assert_eq!(config.checksum.algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(config.verification.full_restore_sample_cap, 100);
        assert_eq!(config.verification.partial_sample_size, 10);
        assert_eq!(config.compliance.offline_stale_days, 7);
    }

    #[test]
    fn test_partial_toml_overrides_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [copy]
            retry_delays_secs = [0, 0]

            [checksum]
            algorithm = "blake2b"
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.copy.retry_delays_secs, vec![0, 0]);
        assert_eq!(config.copy.buffer_size, DEFAULT_COPY_BUFFER_SIZE);
        assert_eq!(config.checksum.algorithm, ChecksumAlgorithm::Blake2b);
        assert!(config.validation.verify_metadata);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("[copy\nbuffer_size = ").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = EngineConfig::load(&temp_dir.path().join("missing.toml"));
        assert!(matches!(result, Err(EngineError::Config { .. })));
    }
}
