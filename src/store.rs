//! Local file store
//!
//! The replicated directory is a flat namespace of regular files. Incoming
//! data is written to a staging area inside the directory first and only
//! renamed into place once it is complete.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

const STAGING_DIR: &str = ".staging";

/// Flat directory of replicated files
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    staging: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) the store rooted at `root`.
    ///
    /// Leftover staging files from a previous run are removed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);

        std::fs::create_dir_all(&root)?;
        if staging.exists() {
            for entry in std::fs::read_dir(&staging)? {
                let entry = entry?;
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!("Failed to clear staging file {}: {}", entry.path().display(), e);
                }
            }
        }
        std::fs::create_dir_all(&staging)?;

        Ok(Self { root, staging })
    }

    /// Directory holding the replicated files
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `filename`, after validating the name
    pub fn path_of(&self, filename: &str) -> Result<PathBuf> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }

    /// Names of all regular files in the store, sorted
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_filename(&name).is_ok() => names.push(name),
                Ok(name) => debug!("Skipping reserved name {:?}", name),
                Err(name) => debug!("Skipping non UTF-8 name {:?}", name),
            }
        }

        names.sort();
        Ok(names)
    }

    /// Whether `filename` exists as a regular file
    pub async fn exists(&self, filename: &str) -> bool {
        match self.path_of(filename) {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Size of `filename` in bytes
    pub async fn file_size(&self, filename: &str) -> Result<u64> {
        let path = self.path_of(filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(Error::FileNotFound(filename.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete `filename`
    pub async fn remove(&self, filename: &str) -> Result<()> {
        let path = self.path_of(filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::FileNotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A fresh, unique staging path for an incoming copy of `filename`
    pub fn staging_path(&self, filename: &str) -> PathBuf {
        self.staging
            .join(format!("{}.{}.part", filename, Uuid::new_v4().simple()))
    }

    /// Move a staged file into place under `filename`, replacing any existing file
    pub async fn commit(&self, staged: &Path, filename: &str) -> Result<PathBuf> {
        let target = self.path_of(filename)?;
        tokio::fs::rename(staged, &target).await?;
        Ok(target)
    }

    /// Move a staged file into place only if `filename` does not exist yet.
    ///
    /// Returns `false` (and leaves the staged file alone) when the name is taken.
    /// Callers hold the filename lock so the check and the rename do not race.
    pub async fn commit_new(&self, staged: &Path, filename: &str) -> Result<bool> {
        let target = self.path_of(filename)?;
        if tokio::fs::try_exists(&target).await? {
            return Ok(false);
        }
        tokio::fs::rename(staged, &target).await?;
        Ok(true)
    }

    /// Remove a staged file, ignoring files that are already gone
    pub async fn discard(&self, staged: &Path) {
        match tokio::fs::remove_file(staged).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to discard staged file {}: {}", staged.display(), e),
        }
    }

    /// Existing conflict copies of `filename` (`<stem>_<timestamp><ext>`)
    pub async fn conflict_copies(&self, filename: &str) -> Result<Vec<String>> {
        let (stem, ext) = split_extension(filename);
        let prefix = format!("{}_", stem);

        Ok(self
            .list_files()
            .await?
            .into_iter()
            .filter(|name| {
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(ext))
                    .map(|ts| !ts.is_empty() && ts.bytes().all(|b| b.is_ascii_digit()))
                    .unwrap_or(false)
            })
            .collect())
    }
}

/// Reject names that would escape the flat namespace or hit reserved entries
pub fn validate_filename(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');

    if invalid {
        return Err(Error::InvalidFilename(name.to_string()));
    }
    Ok(())
}

/// Split `name` into stem and extension (the extension keeps its dot)
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Name under which a conflicting copy of `filename` is kept
pub fn conflict_name(filename: &str, timestamp: i64) -> String {
    let (stem, ext) = split_extension(filename);
    format!("{}_{}{}", stem, timestamp, ext)
}

/// Per-filename async locks.
///
/// Serializes read-modify-write sequences on one filename across the
/// transfer server and both background loops.
#[derive(Debug, Default)]
pub struct FileLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `filename`
    pub async fn lock(&self, filename: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(filename.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of filenames currently tracked
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Diverging versions already kept as conflict copies.
///
/// Keyed by original filename and the digest of the kept version, so a
/// divergence is recorded once even after its copy moves to other nodes.
#[derive(Debug, Default)]
pub struct ConflictLog {
    kept: Mutex<HashSet<(String, String)>>,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the version of `filename` with `digest` was already kept
    pub fn contains(&self, filename: &str, digest: &str) -> bool {
        self.kept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(filename.to_string(), digest.to_string()))
    }

    /// Remember a kept version; returns `false` if it was already known
    pub fn record(&self, filename: &str, digest: &str) -> bool {
        self.kept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((filename.to_string(), digest.to_string()))
    }
}
