//! In-place zip extraction
//!
//! Extracting `/x/y.zip` materializes its entries next to the archive, under
//! `/x/`. Entry names are taken through the zip reader's containment check,
//! so a crafted archive cannot write outside the destination directory.

use std::io;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::fsutil;

/// Extracts the zip archive at `src_vpath` into its containing directory.
///
/// Entries with absolute or escaping names are skipped, not an error.
/// Returns the number of entries written.
pub fn unzip(root: &Path, src_vpath: &str) -> Result<u64> {
    let src_vpath = fsutil::clean(src_vpath);
    let host = fsutil::to_host(root, &src_vpath);

    let file = std::fs::File::open(&host).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => AppError::NotFound(src_vpath.clone()),
        _ => AppError::Storage(e),
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;

    let dest_dir = host
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        let rel = match entry.enclosed_name() {
            Some(rel) => rel,
            None => {
                tracing::warn!(entry = %entry.name(), "Skipping escaping zip entry");
                continue;
            }
        };
        let target = dest_dir.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&target)?;
            io::copy(&mut entry, &mut out)?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
            }
        }
        written += 1;
    }

    tracing::info!(src = %src_vpath, entries = written, "Archive extracted");
    Ok(written)
}

fn zip_err(e: zip::result::ZipError) -> AppError {
    match e {
        zip::result::ZipError::Io(e) => AppError::Storage(e),
        other => AppError::InvalidInput(format!("invalid zip archive: {}", other)),
    }
}
