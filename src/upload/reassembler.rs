//! Chunk reassembly
//!
//! Concatenates staged chunks in index order into the destination file. This
//! is an at-most-once operation: a successful run consumes the staging state,
//! and a second run for the same identifier fails with `NotFound` instead of
//! producing an empty file.

use std::path::Path;

use tokio::io::AsyncWriteExt;

use super::chunk_store::ChunkStore;
use crate::error::{AppError, Result};
use crate::fsutil;

/// Assembles `total_chunks` staged chunks for `upload_id` into `dest`.
///
/// The declared total is verified against the actual staged file count
/// before anything is written; a mismatch leaves the staging area intact so
/// the client can fill the gap. Each chunk is appended, flushed to disk,
/// then deleted, ascending from 1; on failure the partially written
/// destination is left in place and the caller must treat the upload as
/// failed and restart.
pub async fn reassemble(
    store: &ChunkStore,
    upload_id: &str,
    total_chunks: u64,
    dest: &Path,
) -> Result<u64> {
    let upload_id = fsutil::sanitize_upload_id(upload_id)?;
    if total_chunks == 0 {
        return Err(AppError::InvalidInput(
            "total chunk count must be at least 1".to_string(),
        ));
    }

    let _guard = store.lock(upload_id).await;

    let staging_dir = store.staging_dir(upload_id);
    if !tokio::fs::try_exists(&staging_dir).await.unwrap_or(false) {
        return Err(AppError::NotFound(format!(
            "no staged chunks for upload {}",
            upload_id
        )));
    }

    let staged = store.staged_count(upload_id).await?;
    if staged != total_chunks {
        return Err(AppError::InvalidInput(format!(
            "upload {} declared {} chunks but {} are staged",
            upload_id, total_chunks, staged
        )));
    }

    tracing::info!(
        upload_id = %upload_id,
        total_chunks,
        dest = %dest.display(),
        "Reassembling upload"
    );

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Truncate, then reopen for append; every chunk boundary is a durability
    // point before its part file is deleted.
    tokio::fs::File::create(dest).await?;
    let mut out = tokio::fs::OpenOptions::new().append(true).open(dest).await?;

    let mut written: u64 = 0;
    for index in 1..=total_chunks {
        let part = store.chunk_file(upload_id, index);
        let mut chunk = tokio::fs::File::open(&part).await?;

        // Chunk size is read per chunk; the final chunk is usually smaller.
        written += tokio::io::copy(&mut chunk, &mut out).await?;
        out.flush().await?;
        out.sync_all().await?;

        drop(chunk);
        tokio::fs::remove_file(&part).await?;
    }

    tokio::fs::remove_dir(&staging_dir).await?;
    store.release(upload_id).await;

    tracing::info!(
        upload_id = %upload_id,
        bytes = written,
        "Upload reassembled"
    );

    Ok(written)
}
