//! Output directory layout for a harvest run.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;

/// Subdirectory holding downloaded attachments.
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Subdirectory holding rendered page documents.
pub const DOCUMENTS_DIR: &str = "documents";

/// Directories a run writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at `base/YYYYmmdd_HHMM` for the current local time.
    #[must_use]
    pub fn timestamped(base: &Path) -> Self {
        Self::timestamped_at(base, Local::now())
    }

    /// Layout rooted at `base/YYYYmmdd_HHMM` for `at`.
    #[must_use]
    pub fn timestamped_at(base: &Path, at: DateTime<Local>) -> Self {
        Self::new(base.join(at.format("%Y%m%d_%H%M").to_string()))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join(ATTACHMENTS_DIR)
    }

    #[must_use]
    pub fn documents_dir(&self) -> PathBuf {
        self.root.join(DOCUMENTS_DIR)
    }

    /// Creates the root, attachments, and documents directories.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the first directory that cannot be created.
    pub async fn prepare(&self) -> io::Result<()> {
        for dir in [self.attachments_dir(), self.documents_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        debug!(root = %self.root.display(), "output layout ready");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_timestamped_root_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        let layout = OutputLayout::timestamped_at(Path::new("downloads"), at);
        assert_eq!(layout.root(), Path::new("downloads/20240309_0705"));
        assert_eq!(
            layout.attachments_dir(),
            Path::new("downloads/20240309_0705/attachments")
        );
    }

    #[tokio::test]
    async fn test_prepare_creates_nested_dirs_idempotently() {
        let tmp = TempDir::new().unwrap();
        let layout = OutputLayout::new(tmp.path().join("a/b"));

        layout.prepare().await.unwrap();
        layout.prepare().await.unwrap();

        assert!(layout.attachments_dir().is_dir());
        assert!(layout.documents_dir().is_dir());
    }

    #[tokio::test]
    async fn test_prepare_fails_when_root_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("out");
        std::fs::write(&blocker, b"x").unwrap();

        assert!(OutputLayout::new(&blocker).prepare().await.is_err());
    }
}
