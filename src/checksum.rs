//! Checksum cache
//!
//! Memoizes the SHA-256 content digest of files, keyed by path and
//! invalidated whenever the file's modification time changes. The cache is
//! bounded by entry count and entry age.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::trace;

use crate::error::{Error, Result};

/// Cached digest of one file
#[derive(Debug, Clone)]
struct CacheEntry {
    digest: String,
    modified: SystemTime,
    computed_at: Instant,
}

/// Path -> digest cache validated by modification time
pub struct ChecksumCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
    capacity: usize,
    max_age: Option<Duration>,
    chunk_size: usize,
}

impl ChecksumCache {
    /// Create a cache holding at most `capacity` digests
    pub fn new(capacity: usize, max_age: Option<Duration>, chunk_size: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            max_age,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Digest of the file at `path`, recomputed only when it changed
    pub async fn digest_of(&self, path: &Path) -> Result<String> {
        let modified = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::FileNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(digest) = self.lookup(path, modified) {
            trace!("Checksum cache hit for {}", path.display());
            return Ok(digest);
        }

        let digest = compute_digest(path, self.chunk_size).await?;
        self.insert(path.to_path_buf(), digest.clone(), modified);
        Ok(digest)
    }

    /// Drop the cached digest for `path`
    pub fn invalidate(&self, path: &Path) {
        self.lock().remove(path);
    }

    /// Number of cached digests
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.max_age
            .map(|age| now.duration_since(entry.computed_at) > age)
            .unwrap_or(false)
    }

    fn lookup(&self, path: &Path, modified: SystemTime) -> Option<String> {
        let entries = self.lock();
        let entry = entries.get(path)?;
        if entry.modified != modified || self.is_expired(entry, Instant::now()) {
            return None;
        }
        Some(entry.digest.clone())
    }

    fn insert(&self, path: PathBuf, digest: String, modified: SystemTime) {
        let now = Instant::now();
        let mut entries = self.lock();

        if !entries.contains_key(&path) && entries.len() >= self.capacity {
            entries.retain(|_, entry| !self.is_expired(entry, now));

            // Evict the oldest computation if expiry did not make room
            while entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.computed_at)
                    .map(|(p, _)| p.clone());
                match oldest {
                    Some(p) => {
                        entries.remove(&p);
                    }
                    None => break,
                }
            }
        }

        entries.insert(
            path,
            CacheEntry {
                digest,
                modified,
                computed_at: now,
            },
        );
    }
}

/// Stream a file through SHA-256 and return the lowercase hex digest
pub async fn compute_digest(path: &Path, chunk_size: usize) -> Result<String> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::FileNotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Digest of an in-memory buffer, same encoding as [`compute_digest`]
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_with_mtime(path: &Path, data: &[u8], modified: SystemTime) {
        let mut file = File::create(path).unwrap();
        file.write_all(data).unwrap();
        file.set_modified(modified).unwrap();
    }

    #[tokio::test]
    async fn test_digest_matches_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let cache = ChecksumCache::new(16, None, 4);
        let digest = cache.digest_of(&path).await.unwrap();
        assert_eq!(digest, digest_bytes(b"hello world"));
        assert_eq!(digest.len(), 64);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_until_mtime_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        write_with_mtime(&path, b"version one", t0);

        let cache = ChecksumCache::new(16, None, 16384);
        let first = cache.digest_of(&path).await.unwrap();
        let again = cache.digest_of(&path).await.unwrap();
        assert_eq!(first, again);

        // Same mtime: the stale digest is served without reading content
        write_with_mtime(&path, b"version two", t0);
        assert_eq!(cache.digest_of(&path).await.unwrap(), first);

        write_with_mtime(&path, b"version two", t0 + Duration::from_secs(5));
        let changed = cache.digest_of(&path).await.unwrap();
        assert_ne!(changed, first);
        assert_eq!(changed, digest_bytes(b"version two"));
    }

    #[tokio::test]
    async fn test_expired_entry_recomputed_with_same_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aged.bin");
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        write_with_mtime(&path, b"before", t0);

        let cache = ChecksumCache::new(16, Some(Duration::from_millis(50)), 16384);
        let first = cache.digest_of(&path).await.unwrap();
        assert_eq!(first, digest_bytes(b"before"));

        write_with_mtime(&path, b"after", t0);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.digest_of(&path).await.unwrap(), digest_bytes(b"after"));
    }

    #[tokio::test]
    async fn test_missing_file_not_cached() {
        let dir = tempdir().unwrap();
        let cache = ChecksumCache::new(16, None, 16384);

        let err = cache.digest_of(&dir.path().join("missing.txt")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_bound_evicts_oldest() {
        let dir = tempdir().unwrap();
        let cache = ChecksumCache::new(2, None, 16384);

        let mut paths = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("f{}", i));
            std::fs::write(&path, format!("content {}", i)).unwrap();
            cache.digest_of(&path).await.unwrap();
            paths.push(path);
        }

        assert_eq!(cache.len(), 2);
        let entries = cache.lock();
        assert!(!entries.contains_key(&paths[0]));
        assert!(entries.contains_key(&paths[2]));
    }

    #[tokio::test]
    async fn test_invalidate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x");
        std::fs::write(&path, b"x").unwrap();

        let cache = ChecksumCache::new(4, Some(Duration::from_secs(60)), 1024);
        cache.digest_of(&path).await.unwrap();
        cache.invalidate(&path);
        assert!(cache.is_empty());
    }
}
