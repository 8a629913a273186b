//! Archive export walk
//!
//! Walks the selected virtual paths with an explicit work stack (no
//! recursion) and appends each visible entry to an [`ArchiveWriter`]. At
//! most one file handle is open at a time, so archive size never affects
//! descriptor usage.

use std::io;
use std::path::Path;

use crate::access::AccessCheck;
use crate::files;
use crate::fsutil;

use super::writer::ArchiveWriter;

/// Streams `targets` (cleaned virtual paths) into `writer`.
///
/// Entry names are the virtual paths with `common` stripped, so siblings
/// share no redundant leading directories. An entry whose path equals
/// `common` itself is suppressed; its children are still walked. Paths the
/// checker rejects are skipped along with their whole subtree. The first
/// I/O error aborts the walk mid-archive.
pub fn export(
    root: &Path,
    checker: &dyn AccessCheck,
    writer: &mut ArchiveWriter,
    targets: &[String],
    common: &str,
) -> io::Result<()> {
    let mut stack: Vec<String> = targets.iter().rev().map(|t| fsutil::clean(t)).collect();

    while let Some(vpath) = stack.pop() {
        if !checker.check(&vpath) {
            tracing::debug!(path = %vpath, "Skipping inaccessible subtree");
            continue;
        }

        let host = fsutil::to_host(root, &vpath);
        let meta = std::fs::metadata(&host)?;
        let name = entry_name(&vpath, common);

        if meta.is_dir() {
            if vpath != common {
                writer.append_dir(&name, &meta)?;
            }

            let mut children: Vec<String> = Vec::new();
            for entry in std::fs::read_dir(&host)? {
                let entry = entry?;
                let child_name = entry.file_name().to_string_lossy().into_owned();
                children.push(join_vpath(&vpath, &child_name));
            }
            children.sort();
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        } else if vpath != common {
            if files::is_named_pipe(&meta.file_type()) {
                // A pipe would block on open; record it as an empty entry.
                writer.append_file(&name, &meta, &mut io::empty())?;
            } else {
                let mut file = std::fs::File::open(&host)?;
                writer.append_file(&name, &meta, &mut file)?;
            }
        }
    }

    Ok(())
}

/// In-archive name: the virtual path relative to the shared prefix.
fn entry_name(vpath: &str, common: &str) -> String {
    vpath
        .strip_prefix(common)
        .unwrap_or(vpath)
        .trim_start_matches('/')
        .to_string()
}

fn join_vpath(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}
