//! Installed-package database collaborator contract.
//!
//! Used only by the shared-library dependency plugin to resolve a
//! library path to the already-installed package that owns it.

use std::collections::HashMap;

/// Handle to an installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPackage {
    pub name: String,
    pub version: String,
}

/// File-ownership lookup over the installed-package database.
pub trait InstalledDb {
    /// Prepare the database; false on failure, details via `last_error`.
    fn initialize(&mut self) -> bool;

    /// Which installed package owns `path` (no leading separator)?
    fn owner_of_path(&self, path: &str) -> Option<DbPackage>;

    fn last_error(&self) -> Option<String>;
}

/// Database with no contents; every lookup misses.
#[derive(Debug, Default)]
pub struct EmptyDatabase;

impl InstalledDb for EmptyDatabase {
    fn initialize(&mut self) -> bool {
        true
    }

    fn owner_of_path(&self, _path: &str) -> Option<DbPackage> {
        None
    }

    fn last_error(&self) -> Option<String> {
        None
    }
}

/// In-memory database, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    files: HashMap<String, DbPackage>,
    fail_init: Option<String>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A database whose initialization fails with `error`.
    pub fn failing(error: &str) -> Self {
        Self {
            fail_init: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Record that `path` belongs to the given installed package.
    pub fn insert(&mut self, path: &str, name: &str, version: &str) {
        self.files.insert(
            path.to_string(),
            DbPackage {
                name: name.to_string(),
                version: version.to_string(),
            },
        );
    }
}

impl InstalledDb for MemoryDatabase {
    fn initialize(&mut self) -> bool {
        self.fail_init.is_none()
    }

    fn owner_of_path(&self, path: &str) -> Option<DbPackage> {
        self.files.get(path).cloned()
    }

    fn last_error(&self) -> Option<String> {
        self.fail_init.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database_lookup() {
        let mut db = MemoryDatabase::new();
        db.insert("usr/lib/libz.so.1", "zlib", "1.2.13");
        assert!(db.initialize());

        let owner = db.owner_of_path("usr/lib/libz.so.1").unwrap();
        assert_eq!(owner.name, "zlib");
        assert_eq!(owner.version, "1.2.13");
        assert_eq!(db.owner_of_path("usr/lib/libmissing.so"), None);
    }

    #[test]
    fn test_failing_database_reports_error() {
        let mut db = MemoryDatabase::failing("database locked");
        assert!(!db.initialize());
        assert_eq!(db.last_error().as_deref(), Some("database locked"));
    }
}
