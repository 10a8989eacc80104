//! Storage provider contract.
//!
//! A provider owns one storage root (a disk path, a share, a bucket) and
//! knows how to put copies there. The copy engine only talks to this trait,
//! so network backends plug in without touching execution logic. Only the
//! local filesystem provider ships with the engine.

mod local;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use local::LocalStorageProvider;

use crate::copy::{CopyResult, TreeCopyResult};
use crate::error::EngineError;
use crate::model::{MediaType, StorageLocation};
use crate::progress::ProgressCallback;

/// Kind of storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    LocalDisk,
    NasSmb,
    NasNfs,
    CloudS3,
    CloudAzure,
    CloudGcp,
    Tape,
    Immutable,
    UsbExternal,
}

impl From<StorageType> for MediaType {
    fn from(storage_type: StorageType) -> Self {
        match storage_type {
            StorageType::LocalDisk => MediaType::Disk,
            StorageType::NasSmb | StorageType::NasNfs => MediaType::Nas,
            StorageType::CloudS3 | StorageType::CloudAzure | StorageType::CloudGcp => {
                MediaType::Cloud
            }
            StorageType::Tape => MediaType::Tape,
            StorageType::Immutable => MediaType::Immutable,
            StorageType::UsbExternal => MediaType::Usb,
        }
    }
}

/// Capacity of a storage root.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
}

impl StorageInfo {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(available_bytes);
        let usage_percent = if total_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / total_bytes as f64 * 100.0
        };
        StorageInfo {
            total_bytes,
            available_bytes,
            used_bytes,
            usage_percent,
        }
    }
}

/// A place copies can be written to.
///
/// Paths given to a provider are relative to its root unless absolute.
pub trait StorageProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    fn storage_type(&self) -> StorageType;

    fn storage_location(&self) -> StorageLocation;

    /// Whether data written here cannot be altered afterwards.
    fn is_immutable(&self) -> bool;

    /// Make the root reachable (mount, authenticate, create). Idempotent.
    fn connect(&self) -> Result<(), EngineError>;

    fn disconnect(&self) -> Result<(), EngineError>;

    /// Absolute location of `path` on this provider.
    fn resolve_path(&self, path: &Path) -> PathBuf;

    /// Copy a local file to `destination` on this provider.
    fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<CopyResult, EngineError>;

    /// Copy a local directory tree to `destination` on this provider.
    fn copy_directory(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<TreeCopyResult, EngineError>;

    /// Delete a file; `Ok(false)` if it did not exist.
    fn delete_file(&self, path: &Path) -> Result<bool, EngineError>;

    fn available_space(&self) -> Result<u64, EngineError>;

    fn storage_info(&self) -> Result<StorageInfo, EngineError>;

    /// Whether the stored file matches `expected_checksum`; `Ok(false)` if missing.
    fn verify_file(&self, path: &Path, expected_checksum: &str) -> Result<bool, EngineError>;

    /// Root-relative paths of files directly under `path` matching `pattern`.
    fn list_files(&self, path: &Path, pattern: &str) -> Result<Vec<PathBuf>, EngineError>;

    fn is_online(&self) -> bool {
        self.storage_location() != StorageLocation::Offline
    }

    fn supports_immutable(&self) -> bool {
        self.is_immutable()
    }

    fn media_type(&self) -> MediaType {
        self.storage_type().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_to_media() {
        assert_eq!(MediaType::from(StorageType::NasNfs), MediaType::Nas);
        assert_eq!(MediaType::from(StorageType::CloudGcp), MediaType::Cloud);
        assert_eq!(MediaType::from(StorageType::UsbExternal), MediaType::Usb);
        assert_eq!(MediaType::from(StorageType::LocalDisk), MediaType::Disk);
    }

    #[test]
    fn test_storage_info_usage() {
        let info = StorageInfo::new(200, 50);
        assert_eq!(info.used_bytes, 150);
        assert_eq!(info.usage_percent, 75.0);
        assert_eq!(StorageInfo::new(0, 0).usage_percent, 0.0);
    }
}
