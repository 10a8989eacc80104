//! Checksum computation and verification.
//!
//! This module provides:
//! - Multiple checksum algorithms (SHA-256, SHA-512, BLAKE2b, BLAKE2s, BLAKE3, MD5)
//! - Streaming file-level checksums that never load a whole file
//! - A parallel hashing pool with aggregate statistics (`ChecksumEngine`)
//! - Checksum manifests identifying directory copies

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ChecksumPolicy, DEFAULT_CHUNK_SIZE};
use crate::error::EngineError;
use crate::fs_ops;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// MD5 (legacy, kept for compatibility with old catalogs)
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    #[default]
    Sha256,
    /// SHA-512 (cryptographic, 512-bit)
    Sha512,
    /// BLAKE2b (512-bit)
    Blake2b,
    /// BLAKE2s (256-bit)
    Blake2s,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
            Self::Blake2b => write!(f, "blake2b"),
            Self::Blake2s => write!(f, "blake2s"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "").as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "blake2b" => Ok(Self::Blake2b),
            "blake2s" => Ok(Self::Blake2s),
            "blake3" => Ok(Self::Blake3),
            _ => Err(EngineError::UnsupportedAlgorithm {
                name: s.to_string(),
            }),
        }
    }
}

impl ChecksumAlgorithm {
    /// Every supported algorithm.
    pub fn supported() -> &'static [ChecksumAlgorithm] {
        &[
            Self::Sha256,
            Self::Sha512,
            Self::Blake2b,
            Self::Blake2s,
            Self::Blake3,
            Self::Md5,
        ]
    }

    /// The algorithm new copies should use.
    pub fn recommended() -> Self {
        Self::Sha256
    }

    /// MD5 is accepted but no longer collision resistant.
    pub fn is_recommended(&self) -> bool {
        !matches!(self, Self::Md5)
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    /// Create a new checksum value; the hex string is normalized to lowercase.
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue {
            algorithm,
            hex: hex.to_lowercase(),
        }
    }

    /// Get the algorithm
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Get the hex string representation
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Case-insensitive comparison against an expected hex digest.
    pub fn matches(&self, expected: &str) -> bool {
        self.hex.eq_ignore_ascii_case(expected.trim())
    }

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Trait for incremental checksum computation
pub trait ChecksumHasher: Send {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum value
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

/// Any RustCrypto digest (SHA-2 and BLAKE2 families)
struct DigestHasher<D> {
    algorithm: ChecksumAlgorithm,
    hasher: D,
}

impl<D: sha2::Digest + Send> ChecksumHasher for DigestHasher<D> {
    fn update(&mut self, data: &[u8]) {
        sha2::Digest::update(&mut self.hasher, data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let this = *self;
        let digest = sha2::Digest::finalize(this.hasher);
        let hex = digest.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        ChecksumValue::new(this.algorithm, hex)
    }
}

/// MD5 hasher (backed by md5 crate)
struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = (*self).context.compute();
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", digest))
    }
}

/// BLAKE3 hasher (backed by blake3 crate)
struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(
            ChecksumAlgorithm::Blake3,
            self.hasher.finalize().to_hex().to_string(),
        )
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(DigestHasher {
            algorithm,
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Sha512 => Box::new(DigestHasher {
            algorithm,
            hasher: sha2::Sha512::default(),
        }),
        ChecksumAlgorithm::Blake2b => Box::new(DigestHasher {
            algorithm,
            hasher: blake2::Blake2b512::default(),
        }),
        ChecksumAlgorithm::Blake2s => Box::new(DigestHasher {
            algorithm,
            hasher: blake2::Blake2s256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Checksum of an in-memory buffer.
pub fn hash_bytes(data: &[u8], algorithm: ChecksumAlgorithm) -> ChecksumValue {
    let mut hasher = create_hasher(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the checksum of a file by streaming it in `chunk_size` pieces.
///
/// # Arguments
/// * `path` - Regular file to hash
/// * `algorithm` - Checksum algorithm to use
/// * `chunk_size` - Read size in bytes; 0 means the 64 KiB default
///
/// # Errors
/// `FileNotFound` if the path is missing, `NotAFile` for directories,
/// `Io` for any read failure including permission denial.
pub fn hash_file(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    chunk_size: usize,
) -> Result<ChecksumValue, EngineError> {
    hash_file_counted(path, algorithm, chunk_size).map(|(value, _)| value)
}

/// Like [`hash_file`], also returning the number of bytes read.
fn hash_file_counted(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    chunk_size: usize,
) -> Result<(ChecksumValue, u64), EngineError> {
    let metadata = std::fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
    if metadata.is_dir() {
        return Err(EngineError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let mut file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let mut buffer = vec![0u8; chunk_size];
    let mut hasher = create_hasher(algorithm);
    let mut total = 0u64;

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
                total += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::io(path, e)),
        }
    }

    Ok((hasher.finalize(), total))
}

/// Render a checksum manifest for a directory copy.
///
/// Format: header comments, then "<hex>  <relative_path>" per line, sorted
/// by relative path so the rendering is deterministic.
pub fn render_manifest(
    file_checksums: &BTreeMap<String, String>,
    algorithm: ChecksumAlgorithm,
) -> String {
    let mut result = String::new();

    result.push_str("; Checksum manifest\n");
    result.push_str(&format!("; Algorithm: {}\n", algorithm));
    result.push('\n');

    for (rel_path, hex) in file_checksums {
        result.push_str(&format!("{}  {}\n", hex, rel_path));
    }

    result
}

/// SHA-256 of the rendered manifest; identifies a directory copy.
pub fn manifest_digest(
    file_checksums: &BTreeMap<String, String>,
    algorithm: ChecksumAlgorithm,
) -> String {
    let manifest = render_manifest(file_checksums, algorithm);
    hash_bytes(manifest.as_bytes(), ChecksumAlgorithm::Sha256)
        .hex()
        .to_string()
}

/// Snapshot of the engine's cumulative hashing statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecksumStatistics {
    pub files_hashed: u64,
    pub bytes_processed: u64,
    pub total_time_seconds: f64,
    pub errors: u64,
    /// Throughput over all hashing time, in MB/s
    pub average_speed_mbps: f64,
}

/// Results of a parallel hashing batch, one entry per input path.
pub type BatchChecksums = BTreeMap<PathBuf, Result<ChecksumValue, EngineError>>;

/// Checksum service with a worker pool and statistics.
///
/// Safe to share between threads; counters are atomics.
#[derive(Debug)]
pub struct ChecksumEngine {
    algorithm: ChecksumAlgorithm,
    chunk_size: usize,
    max_workers: Option<usize>,
    files_hashed: AtomicU64,
    bytes_processed: AtomicU64,
    time_nanos: AtomicU64,
    errors: AtomicU64,
}

impl Default for ChecksumEngine {
    fn default() -> Self {
        Self::from_policy(&ChecksumPolicy::default())
    }
}

impl ChecksumEngine {
    /// Engine with the given default algorithm and 64 KiB chunks.
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self::from_policy(&ChecksumPolicy {
            algorithm,
            ..ChecksumPolicy::default()
        })
    }

    /// Engine configured from the `[checksum]` policy.
    pub fn from_policy(policy: &ChecksumPolicy) -> Self {
        ChecksumEngine {
            algorithm: policy.algorithm,
            chunk_size: policy.chunk_size,
            max_workers: policy.max_workers,
            files_hashed: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            time_nanos: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Default algorithm of this engine.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Hash one file, counting it in the statistics.
    pub fn hash_file(
        &self,
        path: &Path,
        algorithm: ChecksumAlgorithm,
    ) -> Result<ChecksumValue, EngineError> {
        let started = Instant::now();
        let result = hash_file_counted(path, algorithm, self.chunk_size);
        self.time_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);

        match result {
            Ok((value, bytes)) => {
                self.files_hashed.fetch_add(1, Ordering::Relaxed);
                self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
                debug!(path = %path.display(), %algorithm, bytes, "hashed file");
                Ok(value)
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Hash many files on a bounded pool of worker threads.
    ///
    /// Every input path gets an entry; a failure on one file never aborts the
    /// batch. `max_workers` falls back to the engine setting, then to the
    /// number of CPUs.
    pub fn hash_files_parallel(
        &self,
        paths: &[PathBuf],
        algorithm: ChecksumAlgorithm,
        max_workers: Option<usize>,
    ) -> BatchChecksums {
        let workers = max_workers
            .or(self.max_workers)
            .unwrap_or_else(num_cpus::get)
            .clamp(1, paths.len().max(1));

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<&Path>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        for path in paths {
            // Receiver is alive until the scope below ends
            let _ = work_tx.send(path.as_path());
        }
        drop(work_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for path in work_rx.iter() {
                        let result = self.hash_file(path, algorithm);
                        if result_tx.send((path.to_path_buf(), result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let results: BatchChecksums = result_rx.iter().collect();
        debug!(files = results.len(), workers, "parallel hashing finished");
        results
    }

    /// Hash every regular file under `dir` whose name matches `pattern`.
    ///
    /// Files that fail to hash are logged and counted in the statistics but
    /// left out of the returned map.
    ///
    /// # Errors
    /// `FileNotFound` if `dir` is missing, `NotADirectory` if it is a file.
    pub fn hash_directory(
        &self,
        dir: &Path,
        pattern: &str,
        recursive: bool,
        algorithm: ChecksumAlgorithm,
        max_workers: Option<usize>,
    ) -> Result<BTreeMap<PathBuf, ChecksumValue>, EngineError> {
        let files = fs_ops::list_matching_files(dir, pattern, recursive)?;
        let results = self.hash_files_parallel(&files, algorithm, max_workers);

        let mut hashed = BTreeMap::new();
        for (path, result) in results {
            match result {
                Ok(value) => {
                    hashed.insert(path, value);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unhashable file"),
            }
        }
        Ok(hashed)
    }

    /// True iff the file's digest equals `expected` (case-insensitive).
    ///
    /// Any error yields false.
    pub fn verify_checksum(
        &self,
        path: &Path,
        expected: &str,
        algorithm: ChecksumAlgorithm,
    ) -> bool {
        match self.hash_file(path, algorithm) {
            Ok(actual) => actual.matches(expected),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "checksum verification could not hash file"
                );
                false
            }
        }
    }

    /// Current statistics.
    pub fn statistics(&self) -> ChecksumStatistics {
        let bytes = self.bytes_processed.load(Ordering::Relaxed);
        let seconds = self.time_nanos.load(Ordering::Relaxed) as f64 / 1e9;
        let average_speed_mbps = if seconds > 0.0 {
            bytes as f64 / (1024.0 * 1024.0) / seconds
        } else {
            0.0
        };

        ChecksumStatistics {
            files_hashed: self.files_hashed.load(Ordering::Relaxed),
            bytes_processed: bytes,
            total_time_seconds: seconds,
            errors: self.errors.load(Ordering::Relaxed),
            average_speed_mbps,
        }
    }

    /// Zero every counter.
    pub fn reset_statistics(&self) {
        self.files_hashed.store(0, Ordering::Relaxed);
        self.bytes_processed.store(0, Ordering::Relaxed);
        self.time_nanos.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_algorithm_display() {
        assert_eq!(ChecksumAlgorithm::Md5.to_string(), "md5");
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(ChecksumAlgorithm::Sha512.to_string(), "sha512");
        assert_eq!(ChecksumAlgorithm::Blake2b.to_string(), "blake2b");
        assert_eq!(ChecksumAlgorithm::Blake2s.to_string(), "blake2s");
        assert_eq!(ChecksumAlgorithm::Blake3.to_string(), "blake3");
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("SHA256".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha256);
        assert_eq!("sha-512".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha512);
        assert_eq!("blake2s".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Blake2s);
        let err = "crc32".parse::<ChecksumAlgorithm>().unwrap_err();
        assert_eq!(err.kind(), "unsupported_algorithm");
    }

    #[test]
    fn test_recommended_algorithms() {
        assert_eq!(ChecksumAlgorithm::recommended(), ChecksumAlgorithm::Sha256);
        assert!(ChecksumAlgorithm::supported().contains(&ChecksumAlgorithm::Md5));
        assert!(!ChecksumAlgorithm::Md5.is_recommended());
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            hash_bytes(b"hello", ChecksumAlgorithm::Md5).hex(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(hash_bytes(b"hello", ChecksumAlgorithm::Sha256).hex(), HELLO_SHA256);
        assert_eq!(
            hash_bytes(b"", ChecksumAlgorithm::Sha256).hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_bytes(b"hello", ChecksumAlgorithm::Sha512).hex().len(), 128);
        assert_eq!(hash_bytes(b"hello", ChecksumAlgorithm::Blake2b).hex().len(), 128);
        assert_eq!(hash_bytes(b"hello", ChecksumAlgorithm::Blake2s).hex().len(), 64);
        assert_eq!(hash_bytes(b"hello", ChecksumAlgorithm::Blake3).hex().len(), 64);
    }

    #[test]
    fn test_checksum_value_display() {
        let cs = ChecksumValue::new(ChecksumAlgorithm::Sha256, "ABC123".to_string());
        assert_eq!(cs.to_string(), "abc123");
        assert_eq!(cs.to_string_with_algo(), "sha256:abc123");
        assert!(cs.matches("AbC123"));
    }

    #[test]
    fn test_hash_file_is_chunk_size_independent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("data.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).expect("Failed to write file");

        let expected = hash_bytes(&content, ChecksumAlgorithm::Sha256);
        for chunk in [0, 1, 7, 4096, 65536, 1 << 20] {
            let actual = hash_file(&path, ChecksumAlgorithm::Sha256, chunk).expect("hash failed");
            assert_eq!(actual, expected, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_hash_empty_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("empty");
        fs::write(&path, b"").expect("Failed to write file");

        let value = hash_file(&path, ChecksumAlgorithm::Sha256, 0).expect("hash failed");
        assert_eq!(value.hex(), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn test_hash_file_errors() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

        let missing = hash_file(&temp_dir.path().join("missing"), ChecksumAlgorithm::Sha256, 0);
        assert!(matches!(missing, Err(EngineError::FileNotFound { .. })));

        let dir = hash_file(temp_dir.path(), ChecksumAlgorithm::Sha256, 0);
        assert!(matches!(dir, Err(EngineError::NotAFile { .. })));
    }

    #[test]
    fn test_parallel_hashing_records_failures() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut paths = Vec::new();
        for i in 0..8 {
            let path = temp_dir.path().join(format!("file{}.txt", i));
            fs::write(&path, format!("content {}", i)).expect("Failed to write file");
            paths.push(path);
        }
        let missing = temp_dir.path().join("missing.txt");
        paths.push(missing.clone());

        let engine = ChecksumEngine::default();
        let results = engine.hash_files_parallel(&paths, ChecksumAlgorithm::Sha256, Some(3));

        assert_eq!(results.len(), 9);
        assert!(matches!(results[&missing], Err(EngineError::FileNotFound { .. })));
        for path in &paths[..8] {
            let expected = hash_file(path, ChecksumAlgorithm::Sha256, 0).unwrap();
            assert_eq!(results[path].as_ref().unwrap(), &expected);
        }

        let stats = engine.statistics();
        assert_eq!(stats.files_hashed, 8);
        assert_eq!(stats.errors, 1);

        engine.reset_statistics();
        assert_eq!(engine.statistics().files_hashed, 0);
        assert_eq!(engine.statistics().bytes_processed, 0);
    }

    #[test]
    fn test_parallel_hashing_empty_input() {
        let engine = ChecksumEngine::default();
        assert!(engine.hash_files_parallel(&[], ChecksumAlgorithm::Sha256, None).is_empty());
    }

    #[test]
    fn test_hash_directory_pattern_and_recursion() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path();
        fs::create_dir(root.join("sub")).expect("Failed to create subdir");
        fs::write(root.join("a.txt"), b"a").expect("Failed to write a");
        fs::write(root.join("b.log"), b"b").expect("Failed to write b");
        fs::write(root.join("sub").join("c.txt"), b"c").expect("Failed to write c");

        let engine = ChecksumEngine::default();

        let flat = engine
            .hash_directory(root, "*.txt", false, ChecksumAlgorithm::Sha256, None)
            .expect("hash_directory failed");
        assert_eq!(flat.len(), 1);
        assert!(flat.contains_key(&root.join("a.txt")));

        let deep = engine
            .hash_directory(root, "*.txt", true, ChecksumAlgorithm::Sha256, None)
            .expect("hash_directory failed");
        assert_eq!(deep.len(), 2);
        assert!(deep.contains_key(&root.join("sub").join("c.txt")));

        let all = engine
            .hash_directory(root, "*", true, ChecksumAlgorithm::Sha256, Some(2))
            .expect("hash_directory failed");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_hash_directory_errors() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, b"x").expect("Failed to write file");

        let engine = ChecksumEngine::default();
        let missing = engine.hash_directory(
            &temp_dir.path().join("nope"),
            "*",
            true,
            ChecksumAlgorithm::Sha256,
            None,
        );
        assert!(matches!(missing, Err(EngineError::FileNotFound { .. })));

        let not_dir = engine.hash_directory(&file, "*", true, ChecksumAlgorithm::Sha256, None);
        assert!(matches!(not_dir, Err(EngineError::NotADirectory { .. })));
    }

    #[test]
    fn test_verify_checksum() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("hello.txt");
        fs::write(&path, b"hello").expect("Failed to write file");

        let engine = ChecksumEngine::default();
        assert!(engine.verify_checksum(
            &path,
            &HELLO_SHA256.to_uppercase(),
            ChecksumAlgorithm::Sha256
        ));
        assert!(!engine.verify_checksum(&path, "00", ChecksumAlgorithm::Sha256));
        assert!(!engine.verify_checksum(
            &temp_dir.path().join("missing"),
            HELLO_SHA256,
            ChecksumAlgorithm::Sha256
        ));
    }

    #[test]
    fn test_manifest_render_and_digest() {
        let mut entries = BTreeMap::new();
        entries.insert("b/file2.txt".to_string(), "def456".to_string());
        entries.insert("file1.txt".to_string(), "abc123".to_string());

        let content = render_manifest(&entries, ChecksumAlgorithm::Sha256);
        assert!(content.contains("abc123  file1.txt"));
        assert!(content.contains("def456  b/file2.txt"));
        assert!(content.contains("Algorithm: sha256"));

        let digest = manifest_digest(&entries, ChecksumAlgorithm::Sha256);
        assert_eq!(digest, manifest_digest(&entries, ChecksumAlgorithm::Sha256));
        entries.insert("c.txt".to_string(), "00".to_string());
        assert_ne!(digest, manifest_digest(&entries, ChecksumAlgorithm::Sha256));
    }
}
