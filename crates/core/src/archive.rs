//! Output archive assembly.
//!
//! One archive per eligible package: a gzip-compressed ustar stream
//! whose first entry is the serialized metadata, followed by embed
//! entries, followed by the classified files (under `data/` for binary
//! packages, verbatim for the source package). The archive is staged
//! under a `.part` name and only renamed once every entry is written,
//! so a cancelled or failed build never leaves a promotable output.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use crate::build::BuildConfig;
use crate::progress::{ProgressKind, ProgressMonitor};
use crate::{BuildError, Result};

/// One (on-disk source, in-archive destination) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub from: PathBuf,
    pub to: String,
}

/// `<name>~<version>.<arch>.<ext>`.
pub fn archive_file_name(name: &str, version: &str, arch: &str, ext: &str) -> String {
    format!("{name}~{version}.{arch}.{ext}")
}

/// Assemble the ordered manifest for one package.
///
/// `files` holds the classified file set: build-tree-relative paths
/// for a binary package, `control/`-prefixed paths for the source
/// pseudo-package. `embeds` must already be template-rendered.
pub fn build_manifest(
    metadata_file: &Path,
    is_source: bool,
    embeds: &[(String, String)],
    files: &[String],
    config: &BuildConfig,
) -> Vec<ManifestEntry> {
    let mut manifest = Vec::with_capacity(1 + embeds.len() + files.len());
    manifest.push(ManifestEntry {
        from: metadata_file.to_path_buf(),
        to: if is_source {
            "metadata.xml".to_string()
        } else {
            "control/metadata.xml".to_string()
        },
    });
    for (from, to) in embeds {
        manifest.push(ManifestEntry {
            from: config.control_dir.join(from),
            to: to.clone(),
        });
    }
    for file in files {
        if is_source {
            let rel = file.strip_prefix("control/").unwrap_or(file);
            manifest.push(ManifestEntry {
                from: config.control_dir.join(rel),
                to: file.clone(),
            });
        } else {
            manifest.push(ManifestEntry {
                from: config.build_dir.join(file),
                to: format!("data/{file}"),
            });
        }
    }
    manifest
}

/// Stream `manifest` into a compressed archive at `out`.
///
/// Cancellation is polled before every entry. Missing source files are
/// the caller's mistake (`NotFound`); everything else on this path is
/// `ArchiveIo` and fatal to the whole build.
pub fn write_archive(
    out: &Path,
    manifest: &[ManifestEntry],
    progress: &dyn ProgressMonitor,
) -> Result<()> {
    let part = staging_path(out);
    let result = write_part(&part, manifest, progress);
    if let Err(err) = result {
        let _ = fs::remove_file(&part);
        return Err(err);
    }
    fs::rename(&part, out).map_err(|source| BuildError::ArchiveIo {
        path: out.to_path_buf(),
        source,
    })?;
    info!("wrote archive {}", out.display());
    Ok(())
}

fn staging_path(out: &Path) -> PathBuf {
    let mut name = out.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    out.with_file_name(name)
}

fn write_part(
    part: &Path,
    manifest: &[ManifestEntry],
    progress: &dyn ProgressMonitor,
) -> Result<()> {
    let io_err = |source| BuildError::ArchiveIo {
        path: part.to_path_buf(),
        source,
    };

    let file = File::create(part).map_err(io_err)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let session = progress.begin(ProgressKind::ArchiveEntries, manifest.len());
    for (index, entry) in manifest.iter().enumerate() {
        if !progress.step(session, index, &entry.to) {
            progress.end(session);
            return Err(BuildError::Cancelled);
        }
        let meta = fs::symlink_metadata(&entry.from)
            .map_err(|_| BuildError::NotFound(entry.from.clone()))?;
        debug!("archiving {} as {}", entry.from.display(), entry.to);
        if meta.is_dir() {
            builder.append_dir(&entry.to, &entry.from).map_err(io_err)?;
        } else {
            builder
                .append_path_with_name(&entry.from, &entry.to)
                .map_err(io_err)?;
        }
    }
    progress.end(session);

    let encoder = builder.into_inner().map_err(io_err)?;
    encoder.finish().map_err(io_err)?;
    Ok(())
}
