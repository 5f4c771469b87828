//! pakt-core: binary-package build pipeline.
//!
//! Takes a source tree that has already been configured and compiled,
//! classifies the built files into one or more packages, runs analyzer
//! plugins over each package (automatic shared-library dependencies,
//! duplicate and orphan detection), resolves the build version, and
//! writes one compressed archive per package.
//!
//! The template/script engine, the installed-package database and the
//! progress reporter are external collaborators behind the traits in
//! [`template`], [`db`] and [`progress`].

pub mod archive;
pub mod build;
pub mod classify;
pub mod db;
pub mod descriptor;
mod error;
pub mod plugin;
pub mod plugins;
pub mod progress;
pub mod remark;
pub mod scan;
pub mod template;
pub mod version;

pub use build::{BuildConfig, BuildSession};
pub use descriptor::{Document, NodeId};
pub use error::BuildError;
pub use remark::{Remark, Severity};

/// Result type for build operations
pub type Result<T> = std::result::Result<T, BuildError>;
