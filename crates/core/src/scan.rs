//! Build-tree scanner.
//!
//! Produces one flat, ordered listing of root-relative paths. The walk
//! is depth-first with children sorted by name, so the listing is
//! stable across runs. A directory contributes its own path only when
//! recursing into it added nothing; that is how empty directories
//! survive into packages without listing every intermediate directory.
//!
//! Symlinks and special files are listed like plain files.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::{BuildError, Result};

/// List every file under `root` as root-relative paths.
///
/// A missing root is a caller error: `BuildError::NotFound`.
pub fn scan(root: &Path) -> Result<Vec<String>> {
    if fs::symlink_metadata(root).is_err() {
        return Err(BuildError::NotFound(root.to_path_buf()));
    }
    let mut out = Vec::new();
    walk(root, "", &mut out)?;
    debug!("scanned {} entries under {}", out.len(), root.display());
    Ok(out)
}

fn walk(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let before = out.len();
            walk(&entry.path(), &rel, out)?;
            if out.len() == before {
                // Empty directory: keep it as its own entry.
                out.push(rel);
            }
        } else {
            out.push(rel);
        }
    }
    Ok(())
}
