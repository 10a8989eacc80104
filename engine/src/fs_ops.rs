//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Enumerating directory trees and glob-filtered file lists
//! - Copying files with metadata preservation
//! - Creating directories recursively
//! - Querying free space on the filesystem holding a path

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::EngineError;

/// A regular file found under a tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Full path of the file
    pub path: PathBuf,
    /// Path relative to the enumerated root
    pub relative_path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

impl TreeEntry {
    /// Relative path as a `/`-separated manifest key.
    pub fn key(&self) -> String {
        relative_key(&self.relative_path)
    }
}

/// Render a relative path with `/` separators on every platform.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn require_dir(path: &Path) -> Result<(), EngineError> {
    let metadata = fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
    if metadata.is_dir() {
        Ok(())
    } else {
        Err(EngineError::NotADirectory {
            path: path.to_path_buf(),
        })
    }
}

/// Enumerate every regular file under `source`, sorted by relative path.
///
/// # Arguments
/// * `source` - Directory to enumerate
///
/// # Returns
/// Vec<TreeEntry> with all files found (directories are not listed)
///
/// # Errors
/// `FileNotFound` / `NotADirectory` for a bad root, `EnumerationFailed` if
/// any entry below it cannot be read.
pub fn enumerate_tree(source: &Path) -> Result<Vec<TreeEntry>, EngineError> {
    require_dir(source)?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| EngineError::EnumerationFailed {
            path: source.to_path_buf(),
            source: io::Error::from(e),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| EngineError::EnumerationFailed {
            path: entry.path().to_path_buf(),
            source: io::Error::from(e),
        })?;
        let relative_path = entry
            .path()
            .strip_prefix(source)
            .unwrap_or(entry.path())
            .to_path_buf();

        entries.push(TreeEntry {
            path: entry.path().to_path_buf(),
            relative_path,
            size: metadata.len(),
        });
    }

    Ok(entries)
}

/// List regular files under `dir` whose file name matches a glob `pattern`.
///
/// With `recursive` false only direct children are considered. Entries
/// that cannot be read are skipped.
///
/// # Errors
/// `FileNotFound` / `NotADirectory` for a bad root, `EnumerationFailed`
/// for an invalid pattern.
pub fn list_matching_files(
    dir: &Path,
    pattern: &str,
    recursive: bool,
) -> Result<Vec<PathBuf>, EngineError> {
    require_dir(dir)?;
    let matcher = glob::Pattern::new(pattern).map_err(|e| EngineError::EnumerationFailed {
        path: dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
    })?;

    let mut walker = WalkDir::new(dir).min_depth(1).follow_links(false).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let files = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| matcher.matches(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect();

    Ok(files)
}

/// Copy a file from source to destination with metadata preservation.
///
/// Used for restores, where no retry or checksum is needed.
///
/// # Arguments
/// * `src` - Source file path
/// * `dst` - Destination file path
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns EngineError if the copy fails
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::io(src, e))?;
    let src_mtime = src_file.metadata().and_then(|m| m.modified()).ok();

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::io(dst, e))?;
    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| EngineError::io(dst, e))?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        preserve_mtime(dst, mtime);
    }

    Ok(bytes_copied)
}

/// Set `path`'s modification time, ignoring failures.
pub fn preserve_mtime(path: &Path, mtime: std::time::SystemTime) {
    let _ = filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime));
}

/// Restore `entries` into `target`, keeping their relative paths.
///
/// Per-file failures are collected instead of aborting.
///
/// # Returns
/// (restored entries with their target paths, failures keyed by entry key)
pub fn restore_entries<'a>(
    entries: &'a [TreeEntry],
    target: &Path,
) -> (Vec<(&'a TreeEntry, PathBuf)>, Vec<(String, EngineError)>) {
    let mut restored = Vec::with_capacity(entries.len());
    let mut failures = Vec::new();

    for entry in entries {
        let dst = target.join(&entry.relative_path);
        match copy_file_with_metadata(&entry.path, &dst) {
            Ok(_) => restored.push((entry, dst)),
            Err(e) => failures.push((entry.key(), e)),
        }
    }

    (restored, failures)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Arguments
/// * `path` - Path for which the parent directory should be created
///
/// # Errors
/// Returns EngineError if directory creation fails
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        // Skip if parent is empty path (relative root)
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir_exists(parent),
        _ => Ok(()),
    }
}

/// Create `dir` and its ancestors if missing; idempotent.
pub fn ensure_dir_exists(dir: &Path) -> Result<(), EngineError> {
    match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| EngineError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

/// Nearest existing ancestor of `path` (the path itself if it exists).
fn existing_ancestor(path: &Path) -> &Path {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .unwrap_or_else(|| Path::new("."))
}

/// Bytes available to this process on the filesystem that would hold `path`.
///
/// `path` need not exist yet; its nearest existing ancestor is queried.
pub fn available_space(path: &Path) -> Result<u64, EngineError> {
    let probe = existing_ancestor(path);
    fs4::available_space(probe).map_err(|e| EngineError::io(probe, e))
}

/// Total capacity of the filesystem that would hold `path`.
pub fn total_space(path: &Path) -> Result<u64, EngineError> {
    let probe = existing_ancestor(path);
    fs4::total_space(probe).map_err(|e| EngineError::io(probe, e))
}
