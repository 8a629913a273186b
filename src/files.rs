//! Virtual filesystem entries
//!
//! Stat and listing support for the resource endpoints. All paths here are
//! cleaned virtual paths; host paths are derived through [`crate::fsutil`].

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::access::AccessCheck;
use crate::error::{AppError, Result};
use crate::fsutil;

/// One filesystem node as reported to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: DateTime<Utc>,
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<FileInfo>>,
}

impl FileInfo {
    /// Stats `vpath` under `root`; with `expand`, directories carry their
    /// direct children (entries denied by `checker` are omitted).
    pub async fn stat(
        root: &Path,
        vpath: &str,
        expand: bool,
        checker: &dyn AccessCheck,
    ) -> Result<Self> {
        let host = fsutil::to_host(root, vpath);
        let meta = tokio::fs::metadata(&host)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AppError::NotFound(vpath.to_string()),
                _ => AppError::Storage(e),
            })?;

        let name = vpath.rsplit('/').next().unwrap_or("").to_string();
        let mut info = FileInfo {
            name,
            path: vpath.to_string(),
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
            content_type: content_type(vpath, meta.is_dir()),
            items: None,
        };

        if expand && info.is_dir {
            info.items = Some(Self::list_children(root, vpath, checker).await?);
        }

        Ok(info)
    }

    async fn list_children(
        root: &Path,
        vpath: &str,
        checker: &dyn AccessCheck,
    ) -> Result<Vec<FileInfo>> {
        let host = fsutil::to_host(root, vpath);
        let mut entries = tokio::fs::read_dir(&host).await?;
        let mut items = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let child_name = entry.file_name().to_string_lossy().to_string();
            let child_vpath = if vpath == "/" {
                format!("/{}", child_name)
            } else {
                format!("{}/{}", vpath, child_name)
            };

            if !checker.check(&child_vpath) {
                continue;
            }

            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };

            items.push(FileInfo {
                name: child_name,
                path: child_vpath.clone(),
                size: meta.len(),
                is_dir: meta.is_dir(),
                modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
                content_type: content_type(&child_vpath, meta.is_dir()),
                items: None,
            });
        }

        items.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(items)
    }
}

fn content_type(vpath: &str, is_dir: bool) -> String {
    if is_dir {
        return "inode/directory".to_string();
    }
    mime_guess::from_path(vpath)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Whether the file type is a named pipe (FIFO). FIFOs must never be opened
/// for read while serving: a read would block until a writer appears.
#[cfg(unix)]
pub fn is_named_pipe(file_type: &std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_fifo()
}

#[cfg(not(unix))]
pub fn is_named_pipe(_file_type: &std::fs::FileType) -> bool {
    false
}
