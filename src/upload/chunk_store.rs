//! Chunk store
//!
//! Staging storage for in-flight chunked uploads. Each upload identifier owns
//! one staging directory under the configured staging root, holding one file
//! per received chunk (`part<N>`, 1-based). A chunk file is either fully
//! present or absent; the HTTP layer writes each chunk in a single request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::PART_PREFIX;
use crate::error::{AppError, Result};
use crate::fsutil;

/// Staging store for upload chunks.
///
/// Operations on the same upload identifier are serialized through a per-id
/// mutex, so a finalize racing a retransmitted chunk observes one or the
/// other, never an interleaving. Distinct identifiers run concurrently.
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<ChunkStoreInner>,
}

struct ChunkStoreInner {
    /// Staging root, threaded in from configuration.
    staging_root: PathBuf,

    /// Per-upload-identifier locks.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChunkStore {
    pub fn new(staging_root: PathBuf) -> Self {
        Self {
            inner: Arc::new(ChunkStoreInner {
                staging_root,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.inner.staging_root
    }

    /// Acquires the serialization lock for `upload_id`.
    pub(crate) async fn lock(&self, upload_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.locks.lock().await;
            locks
                .entry(upload_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drops the lock entry for `upload_id` after its staging state is gone.
    ///
    /// Skipped while another task is queued on the same identifier (the map
    /// entry and the caller's guard account for two `Arc` handles); the last
    /// one out prunes it. Keeps the map from growing one entry per upload
    /// identifier ever seen.
    pub(crate) async fn release(&self, upload_id: &str) {
        let mut locks = self.inner.locks.lock().await;
        if let Some(lock) = locks.get(upload_id) {
            if Arc::strong_count(lock) <= 2 {
                locks.remove(upload_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn has_lock_entry(&self, upload_id: &str) -> bool {
        self.inner.locks.lock().await.contains_key(upload_id)
    }

    /// Staging directory for a (validated) upload identifier.
    pub(crate) fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.inner.staging_root.join(upload_id)
    }

    /// Path of one staged chunk file.
    pub(crate) fn chunk_file(&self, upload_id: &str, index: u64) -> PathBuf {
        self.staging_dir(upload_id)
            .join(format!("{}{}", PART_PREFIX, index))
    }

    /// Writes one chunk, creating the staging directory on first use.
    ///
    /// Arrival order is unconstrained; completion is decided by count, not by
    /// monotonic indices. Writing an index twice truncates and rewrites it
    /// (last writer wins).
    pub async fn write_chunk(&self, upload_id: &str, index: u64, data: &[u8]) -> Result<()> {
        let upload_id = fsutil::sanitize_upload_id(upload_id)?;
        validate_index(index)?;

        let _guard = self.lock(upload_id).await;

        let dir = self.staging_dir(upload_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.chunk_file(upload_id, index);
        tokio::fs::write(&path, data).await?;

        tracing::debug!(
            upload_id = %upload_id,
            chunk_index = index,
            size = data.len(),
            "Chunk staged"
        );

        Ok(())
    }

    /// Pure existence check for one staged chunk.
    pub async fn chunk_exists(&self, upload_id: &str, index: u64) -> Result<bool> {
        let upload_id = fsutil::sanitize_upload_id(upload_id)?;
        validate_index(index)?;

        Ok(tokio::fs::try_exists(self.chunk_file(upload_id, index))
            .await
            .unwrap_or(false))
    }

    /// Resume probe. On a hit the entire staging area for `upload_id` is
    /// deleted: a client that sees a chunk it already sent treats the upload
    /// as restarted from scratch. Deliberately not a pure query.
    pub async fn probe_chunk(&self, upload_id: &str, index: u64) -> Result<bool> {
        let upload_id = fsutil::sanitize_upload_id(upload_id)?;
        validate_index(index)?;

        let _guard = self.lock(upload_id).await;

        let exists = tokio::fs::try_exists(self.chunk_file(upload_id, index))
            .await
            .unwrap_or(false);

        if exists {
            let dir = self.staging_dir(upload_id);
            tokio::fs::remove_dir_all(&dir).await?;
            self.release(upload_id).await;
            tracing::info!(upload_id = %upload_id, "Probe hit, staging area discarded");
        }

        Ok(exists)
    }

    /// Drops all staged state for `upload_id`. Missing state is not an error.
    pub async fn abort(&self, upload_id: &str) -> Result<()> {
        let upload_id = fsutil::sanitize_upload_id(upload_id)?;

        let _guard = self.lock(upload_id).await;

        let dir = self.staging_dir(upload_id);
        let result = match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(e)),
        };
        if result.is_ok() {
            self.release(upload_id).await;
        }
        result
    }

    /// Number of `part*` files currently staged for `upload_id`.
    pub async fn staged_count(&self, upload_id: &str) -> Result<u64> {
        let upload_id = fsutil::sanitize_upload_id(upload_id)?;

        let dir = self.staging_dir(upload_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Storage(e)),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(PART_PREFIX) {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Chunk indices are 1-based.
fn validate_index(index: u64) -> Result<()> {
    if index == 0 {
        return Err(AppError::InvalidInput(
            "chunk index must be 1-based".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ChunkStore {
        ChunkStore::new(dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn write_creates_staging_layout() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write_chunk("abc123", 2, b"hello").await.unwrap();

        let staged = dir.path().join("abc123").join("part2");
        assert_eq!(std::fs::read(staged).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn out_of_order_writes_are_independent_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write_chunk("up", 3, b"c").await.unwrap();
        store.write_chunk("up", 1, b"a").await.unwrap();

        assert!(store.chunk_exists("up", 1).await.unwrap());
        assert!(!store.chunk_exists("up", 2).await.unwrap());
        assert!(store.chunk_exists("up", 3).await.unwrap());
        assert_eq!(store.staged_count("up").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rewrite_same_index_truncates() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write_chunk("up", 1, b"longer content").await.unwrap();
        store.write_chunk("up", 1, b"short").await.unwrap();

        let staged = dir.path().join("up").join("part1");
        assert_eq!(std::fs::read(staged).unwrap(), b"short");
    }

    #[tokio::test]
    async fn probe_hit_discards_whole_staging_area() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write_chunk("up", 1, b"a").await.unwrap();
        store.write_chunk("up", 2, b"b").await.unwrap();

        assert!(store.probe_chunk("up", 1).await.unwrap());
        assert!(!dir.path().join("up").exists());

        // Second probe misses: nothing staged anymore.
        assert!(!store.probe_chunk("up", 1).await.unwrap());
    }

    #[tokio::test]
    async fn probe_miss_keeps_staging_area() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write_chunk("up", 1, b"a").await.unwrap();
        assert!(!store.probe_chunk("up", 2).await.unwrap());
        assert!(store.chunk_exists("up", 1).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_identifiers_rejected_before_fs() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for bad in ["../evil", "a/b", "", "a b"] {
            let err = store.write_chunk(bad, 1, b"x").await.unwrap_err();
            assert!(matches!(err, AppError::InvalidInput(_)), "id {:?}", bad);
        }

        // Nothing was created under the staging root.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn zero_index_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let err = store.write_chunk("up", 0, b"x").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn lock_entries_pruned_with_staging_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write_chunk("up", 1, b"a").await.unwrap();
        assert!(store.has_lock_entry("up").await);

        store.abort("up").await.unwrap();
        assert!(!store.has_lock_entry("up").await);

        // Probe hits prune too.
        store.write_chunk("up", 1, b"a").await.unwrap();
        assert!(store.probe_chunk("up", 1).await.unwrap());
        assert!(!store.has_lock_entry("up").await);
    }

    #[tokio::test]
    async fn abort_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.write_chunk("up", 1, b"a").await.unwrap();
        store.abort("up").await.unwrap();
        store.abort("up").await.unwrap();
        assert_eq!(store.staged_count("up").await.unwrap(), 0);
    }
}
