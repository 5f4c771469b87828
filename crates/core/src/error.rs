//! Error types for pakt-core

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal build errors.
///
/// These abort the whole build. Diagnostics that should not stop the
/// build travel on the separate remark channel instead
/// ([`crate::remark`]), whatever their severity.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    #[error("Malformed metadata descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("Script '{domain}/{action}' failed")]
    ScriptFailure { domain: String, action: String },

    #[error("Archive I/O error on '{path}': {source}")]
    ArchiveIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Build cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
