//! Progress/cancellation collaborator contract.
//!
//! The builder opens one coarse session over the eligible packages and
//! one fine session per archive over its manifest entries. Every
//! `step` call doubles as a cancellation poll: returning false asks
//! the build to stop. The poll happens at package and entry
//! boundaries, never mid-write of a single file.

/// What a progress session counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    /// One step per package archived.
    PackageArchives,
    /// One step per manifest entry inside one archive.
    ArchiveEntries,
}

/// Progress reporting and cancellation, possibly observed from another
/// execution context (a UI loop, say).
pub trait ProgressMonitor {
    /// Open a session of `total` steps; returns a session id.
    fn begin(&self, kind: ProgressKind, total: usize) -> u64;

    /// Report step `index` with a human-readable label. Returning
    /// false requests cancellation of the whole build.
    fn step(&self, session: u64, index: usize, label: &str) -> bool;

    fn end(&self, session: u64);
}

/// Monitor that reports nowhere and never cancels.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressMonitor for NullProgress {
    fn begin(&self, _kind: ProgressKind, _total: usize) -> u64 {
        0
    }

    fn step(&self, _session: u64, _index: usize, _label: &str) -> bool {
        true
    }

    fn end(&self, _session: u64) {}
}
