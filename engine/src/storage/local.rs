//! Local filesystem storage provider.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use super::{StorageInfo, StorageProvider, StorageType};
use crate::checksums;
use crate::copy::{CopyEngine, CopyResult, TreeCopyResult};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{Destination, StorageLocation};
use crate::progress::ProgressCallback;

/// Storage rooted at a local directory (disk, mounted share, removable drive).
#[derive(Debug)]
pub struct LocalStorageProvider {
    provider_id: String,
    base_path: PathBuf,
    storage_type: StorageType,
    location: StorageLocation,
    immutable: bool,
    connected: AtomicBool,
    engine: CopyEngine,
}

impl LocalStorageProvider {
    pub fn new(
        provider_id: impl Into<String>,
        base_path: impl Into<PathBuf>,
        engine: CopyEngine,
    ) -> Self {
        LocalStorageProvider {
            provider_id: provider_id.into(),
            base_path: base_path.into(),
            storage_type: StorageType::LocalDisk,
            location: StorageLocation::Onsite,
            immutable: false,
            connected: AtomicBool::new(false),
            engine,
        }
    }

    /// Provider rooted at a job destination, classified like it.
    pub fn for_destination(destination: &Destination, engine: CopyEngine) -> Self {
        let mut provider = LocalStorageProvider::new(
            format!("local:{}", destination.path.display()),
            &destination.path,
            engine,
        );
        provider.location = destination.location;
        provider.immutable = destination.is_immutable;
        provider
    }

    pub fn with_location(mut self, location: StorageLocation) -> Self {
        self.location = location;
        self
    }

    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    pub fn with_immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl StorageProvider for LocalStorageProvider {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    fn storage_location(&self) -> StorageLocation {
        self.location
    }

    fn is_immutable(&self) -> bool {
        self.immutable
    }

    fn connect(&self) -> Result<(), EngineError> {
        fs_ops::ensure_dir_exists(&self.base_path)?;
        self.connected.store(true, Ordering::SeqCst);
        info!(
            provider = %self.provider_id,
            base = %self.base_path.display(),
            "connected to local storage"
        );
        Ok(())
    }

    fn disconnect(&self) -> Result<(), EngineError> {
        self.connected.store(false, Ordering::SeqCst);
        debug!(provider = %self.provider_id, "disconnected from local storage");
        Ok(())
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<CopyResult, EngineError> {
        self.engine.copy_file(source, &self.resolve_path(destination), progress)
    }

    fn copy_directory(
        &self,
        source: &Path,
        destination: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<TreeCopyResult, EngineError> {
        self.engine.copy_tree(source, &self.resolve_path(destination), progress)
    }

    fn delete_file(&self, path: &Path) -> Result<bool, EngineError> {
        let full = self.resolve_path(path);
        match fs::remove_file(&full) {
            Ok(()) => {
                info!(path = %full.display(), "deleted file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::io(&full, e)),
        }
    }

    fn available_space(&self) -> Result<u64, EngineError> {
        fs_ops::available_space(&self.base_path)
    }

    fn storage_info(&self) -> Result<StorageInfo, EngineError> {
        let total = fs_ops::total_space(&self.base_path)?;
        let available = fs_ops::available_space(&self.base_path)?;
        Ok(StorageInfo::new(total, available))
    }

    fn verify_file(&self, path: &Path, expected_checksum: &str) -> Result<bool, EngineError> {
        let full = self.resolve_path(path);
        if !full.is_file() {
            return Ok(false);
        }
        let actual = checksums::hash_file(&full, self.engine.checksum_algorithm(), 0)?;
        Ok(actual.matches(expected_checksum))
    }

    fn list_files(&self, path: &Path, pattern: &str) -> Result<Vec<PathBuf>, EngineError> {
        let dir = self.resolve_path(path);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let files = fs_ops::list_matching_files(&dir, pattern, false)?;
        Ok(files
            .into_iter()
            .map(|f| f.strip_prefix(&self.base_path).map(Path::to_path_buf).unwrap_or(f))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::RetryPolicy;
    use crate::model::{CopyRole, MediaType};

    fn provider(base: &Path) -> LocalStorageProvider {
        let engine = CopyEngine::new()
            .with_buffer_size(1024)
            .with_retry_policy(RetryPolicy::immediate(1));
        LocalStorageProvider::new("local-test", base, engine)
    }

    #[test]
    fn test_connect_creates_base() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let base = temp_dir.path().join("a").join("b");
        let storage = provider(&base);

        assert!(!storage.is_connected());
        storage.connect().expect("connect failed");
        assert!(base.is_dir());
        assert!(storage.is_connected());
        storage.connect().expect("second connect should be idempotent");

        storage.disconnect().unwrap();
        assert!(!storage.is_connected());
    }

    #[test]
    fn test_copy_verify_list_delete() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("payload.txt");
        fs::write(&src, b"hello").unwrap();
        let storage = provider(&temp_dir.path().join("store"));
        storage.connect().unwrap();

        let result = storage
            .copy_file(&src, Path::new("daily/payload.txt"), None)
            .expect("copy failed");
        assert_eq!(
            result.destination,
            temp_dir.path().join("store").join("daily").join("payload.txt")
        );

        assert!(storage
            .verify_file(Path::new("daily/payload.txt"), result.checksum.hex())
            .unwrap());
        assert!(!storage.verify_file(Path::new("daily/payload.txt"), "bad").unwrap());
        assert!(!storage.verify_file(Path::new("daily/missing.txt"), "bad").unwrap());

        let listed = storage.list_files(Path::new("daily"), "*.txt").unwrap();
        assert_eq!(listed, vec![PathBuf::from("daily").join("payload.txt")]);
        assert!(storage.list_files(Path::new("nowhere"), "*").unwrap().is_empty());

        assert!(storage.delete_file(Path::new("daily/payload.txt")).unwrap());
        assert!(!storage.delete_file(Path::new("daily/payload.txt")).unwrap());
    }

    #[test]
    fn test_space_and_info() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let storage = provider(temp_dir.path());
        let info = storage.storage_info().expect("storage info failed");
        assert!(info.total_bytes >= info.available_bytes);
        assert!(storage.available_space().unwrap() > 0);
    }

    #[test]
    fn test_classification_from_destination() {
        let mut dest = Destination::local("/mnt/vault", CopyRole::Offline);
        dest.location = StorageLocation::Offline;
        dest.is_immutable = true;

        let storage = LocalStorageProvider::for_destination(&dest, CopyEngine::new());
        assert!(!storage.is_online());
        assert!(storage.supports_immutable());
        assert_eq!(storage.media_type(), MediaType::Disk);
        assert_eq!(storage.resolve_path(Path::new("x")), PathBuf::from("/mnt/vault/x"));

        let cloud = storage
            .with_storage_type(StorageType::CloudS3)
            .with_location(StorageLocation::Cloud);
        assert!(cloud.is_online());
        assert_eq!(cloud.media_type(), MediaType::Cloud);
    }
}
