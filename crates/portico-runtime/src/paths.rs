//! Data-directory layout.

use std::io;
use std::path::{Path, PathBuf};

/// Resolved on-disk layout of the runtime's persistent state.
///
/// Everything lives under a single data directory:
///
/// ```text
/// <data>/catalog.redb          extension catalog
/// <data>/event-log.redb        event execution log
/// <data>/extensions/<slug>/    extracted extension assets
/// <data>/extension-backend/<slug>/  staged server-side sources
/// ```
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    data_dir: PathBuf,
}

impl RuntimePaths {
    /// Create a layout rooted at the given data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// The data directory root.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Catalog database file.
    pub fn catalog_db(&self) -> PathBuf {
        self.data_dir.join("catalog.redb")
    }

    /// Event execution log database file.
    pub fn event_log_db(&self) -> PathBuf {
        self.data_dir.join("event-log.redb")
    }

    /// Root of extracted extension assets, keyed by slug.
    pub fn assets_root(&self) -> PathBuf {
        self.data_dir.join("extensions")
    }

    /// Assets directory of one extension.
    pub fn assets_dir(&self, slug: &str) -> PathBuf {
        self.assets_root().join(slug)
    }

    /// Root of staged extension server code, keyed by slug. Kept apart
    /// from the host's own tree.
    pub fn backend_root(&self) -> PathBuf {
        self.data_dir.join("extension-backend")
    }

    /// Backend staging directory of one extension.
    pub fn backend_dir(&self, slug: &str) -> PathBuf {
        self.backend_root().join(slug)
    }

    /// Create every directory the runtime writes into.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.assets_root())?;
        std::fs::create_dir_all(self.backend_root())?;
        Ok(())
    }
}
