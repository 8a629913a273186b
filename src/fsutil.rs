//! Path utilities
//!
//! Purely lexical path handling for the virtual filesystem: user-supplied
//! paths are cleaned against the virtual root `/` before they ever reach a
//! syscall, so a cleaned path can never escape the root by construction.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Cleans a user-supplied path against the virtual root.
///
/// Prefixes `/` when missing, resolves `.` and `..` segments and collapses
/// repeated slashes. Never touches the filesystem. `..` cannot climb above
/// `/`.
pub fn clean(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Maps a cleaned virtual path to the host path under `root`.
pub fn to_host(root: &Path, vpath: &str) -> PathBuf {
    let rel = vpath.trim_start_matches('/');
    if rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}

/// Longest `sep`-delimited prefix shared by all `paths`.
///
/// Inputs are cleaned first. A single input yields that path's parent
/// directory (the path itself when it is the root); when nothing below the
/// root is shared the result is the separator alone.
pub fn common_prefix(sep: char, paths: &[String]) -> String {
    match paths.len() {
        0 => return String::new(),
        1 => {
            let c = clean(&paths[0]);
            return match c.rfind(sep) {
                Some(0) | None => sep.to_string(),
                Some(i) => c[..i].to_string(),
            };
        }
        _ => {}
    }

    let mut common: Vec<char> = clean(&paths[0]).chars().collect();
    common.push(sep);

    for p in &paths[1..] {
        let mut v: Vec<char> = clean(p).chars().collect();
        v.push(sep);

        if v.len() < common.len() {
            common.truncate(v.len());
        }
        for i in 0..common.len() {
            if v[i] != common[i] {
                common.truncate(i);
                break;
            }
        }
    }

    // Trim back to the last full segment.
    for i in (0..common.len()).rev() {
        if common[i] == sep {
            common.truncate(i);
            break;
        }
    }

    if common.is_empty() {
        sep.to_string()
    } else {
        common.into_iter().collect()
    }
}

/// Rejects a move/copy whose destination is nested under (or equal to) the
/// source. Both paths are cleaned before comparison.
pub fn check_parent(src: &str, dst: &str) -> Result<()> {
    let src = clean(src);
    let dst = clean(dst);

    if dst == src {
        return Err(AppError::SourceIsParent);
    }

    let src_prefix = if src == "/" {
        "/".to_string()
    } else {
        format!("{}/", src)
    };

    if dst.starts_with(&src_prefix) {
        return Err(AppError::SourceIsParent);
    }

    Ok(())
}

/// Validates a client-supplied upload identifier for use as a single staging
/// directory segment. Rejected identifiers never reach the filesystem.
pub fn sanitize_upload_id(id: &str) -> Result<&str> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(AppError::InvalidInput(format!(
            "invalid upload identifier: {:?}",
            id
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(AppError::InvalidInput(format!(
            "invalid upload identifier: {:?}",
            id
        )));
    }

    Ok(id)
}

/// First free `name(N).ext` variant of `vpath` under `root`.
pub fn add_version_suffix(root: &Path, vpath: &str) -> String {
    let vpath = clean(vpath);
    let (dir, name) = match vpath.rfind('/') {
        Some(i) => (&vpath[..i], &vpath[i + 1..]),
        None => ("", vpath.as_str()),
    };
    let (base, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };

    let mut candidate = vpath.clone();
    let mut counter = 1;
    while to_host(root, &candidate).exists() {
        candidate = format!("{}/{}({}){}", dir, base, counter, ext);
        counter += 1;
    }
    candidate
}

/// Recursively copies `src` to `dst` (files and directories).
pub fn copy_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    let meta = std::fs::metadata(src)?;

    if meta.is_dir() {
        std::fs::create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_all(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst)?;
    }

    Ok(())
}

/// Moves `src` to `dst`, falling back to copy-and-delete across devices.
pub fn move_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_all(src, dst)?;
            if std::fs::metadata(src)?.is_dir() {
                std::fs::remove_dir_all(src)
            } else {
                std::fs::remove_file(src)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_basic() {
        assert_eq!(clean("a/b"), "/a/b");
        assert_eq!(clean("/a/b/"), "/a/b");
        assert_eq!(clean("//a//b"), "/a/b");
        assert_eq!(clean("a/./b"), "/a/b");
        assert_eq!(clean(""), "/");
        assert_eq!(clean("/"), "/");
    }

    #[test]
    fn clean_cannot_escape_root() {
        assert_eq!(clean("../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean("/a/../../b"), "/b");
        assert_eq!(clean(".."), "/");
        assert_eq!(clean("a/../.."), "/");
    }

    #[test]
    fn to_host_joins_under_root() {
        let root = Path::new("/srv/depot");
        assert_eq!(to_host(root, "/a/b"), PathBuf::from("/srv/depot/a/b"));
        assert_eq!(to_host(root, "/"), PathBuf::from("/srv/depot"));
    }

    #[test]
    fn common_prefix_shared_directory() {
        let paths = vec!["/docs/a.txt".to_string(), "/docs/sub/b.txt".to_string()];
        assert_eq!(common_prefix('/', &paths), "/docs");
    }

    #[test]
    fn common_prefix_no_shared_segment() {
        let paths = vec!["/a/x".to_string(), "/b/y".to_string()];
        assert_eq!(common_prefix('/', &paths), "/");
    }

    #[test]
    fn common_prefix_single_path_is_its_parent() {
        assert_eq!(common_prefix('/', &["/docs".to_string()]), "/");
        assert_eq!(common_prefix('/', &["/docs/sub".to_string()]), "/docs");
        // The root is its own parent.
        assert_eq!(common_prefix('/', &["/".to_string()]), "/");
    }

    #[test]
    fn common_prefix_order_independent_when_sorted() {
        let mut a = vec![
            "/x/one".to_string(),
            "/x/two".to_string(),
            "/x/two/three".to_string(),
        ];
        a.sort();
        let forward = common_prefix('/', &a);
        a.reverse();
        a.sort();
        assert_eq!(forward, common_prefix('/', &a));
        assert_eq!(forward, "/x");
    }

    #[test]
    fn common_prefix_prefix_is_not_segment() {
        // "/doc" and "/docs" share characters but no segment.
        let paths = vec!["/doc/a".to_string(), "/docs/a".to_string()];
        assert_eq!(common_prefix('/', &paths), "/");
    }

    #[test]
    fn check_parent_rejects_nested_destination() {
        assert!(matches!(
            check_parent("/a", "/a/b"),
            Err(AppError::SourceIsParent)
        ));
        assert!(check_parent("/a/b", "/a/c").is_ok());
    }

    #[test]
    fn check_parent_rejects_equal_paths() {
        assert!(matches!(
            check_parent("/a/b", "/a/b"),
            Err(AppError::SourceIsParent)
        ));
    }

    #[test]
    fn check_parent_sibling_with_shared_name_prefix() {
        assert!(check_parent("/a", "/ab").is_ok());
    }

    #[test]
    fn upload_id_sanitizing() {
        assert!(sanitize_upload_id("abc123").is_ok());
        assert!(sanitize_upload_id("a-b_c.d").is_ok());
        assert!(sanitize_upload_id("").is_err());
        assert!(sanitize_upload_id("..").is_err());
        assert!(sanitize_upload_id("a/b").is_err());
        assert!(sanitize_upload_id("a\\b").is_err());
        assert!(sanitize_upload_id("a b").is_err());
    }

    #[test]
    fn version_suffix_picks_first_free_name() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"x").unwrap();

        assert_eq!(add_version_suffix(dir.path(), "/f.txt"), "/f(1).txt");

        std::fs::write(dir.path().join("f(1).txt"), b"x").unwrap();
        assert_eq!(add_version_suffix(dir.path(), "/f.txt"), "/f(2).txt");

        assert_eq!(add_version_suffix(dir.path(), "/new.txt"), "/new.txt");
    }

    #[test]
    fn copy_all_recurses() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("a.txt"), b"a").unwrap();
        std::fs::write(src.join("sub/b.txt"), b"b").unwrap();

        let dst = dir.path().join("dst");
        copy_all(&src, &dst).unwrap();

        assert_eq!(std::fs::read(dst.join("a.txt")).unwrap(), b"a");
        assert_eq!(std::fs::read(dst.join("sub/b.txt")).unwrap(), b"b");
        // Source untouched.
        assert!(src.join("a.txt").exists());
    }

    #[test]
    fn move_all_removes_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"payload").unwrap();

        let dst = dir.path().join("nested/dst.txt");
        move_all(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(std::fs::read(dst).unwrap(), b"payload");
    }
}
