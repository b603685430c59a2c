//! Per-job files on disk.
//!
//! Every job owns at most two files under the artifact root:
//! `<id>.<ext>` (the upload) and `<id>.pdf` (the conversion result). Ids are
//! unique, so no two jobs ever touch the same path.

use std::path::{Path, PathBuf};

use dr_core::{Error, JobId, Result};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the artifact directory if needed.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn input_path(&self, id: &JobId, extension: &str) -> PathBuf {
        self.root
            .join(format!("{id}.{}", extension.to_ascii_lowercase()))
    }

    pub fn output_path(&self, id: &JobId) -> PathBuf {
        self.root.join(format!("{id}.pdf"))
    }

    /// Persist an upload and return where it landed.
    pub async fn write_input(&self, id: &JobId, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.ensure_root().await?;
        let path = self.input_path(id, extension);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Read an artifact. A missing file is `NotFound`.
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("artifact", path.display()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort delete. Returns `true` if the file is gone afterwards.
    pub async fn remove(&self, path: &Path) -> bool {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed artifact");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact");
                false
            }
        }
    }

    /// Best-effort delete of several files. Returns how many could not be
    /// removed.
    pub async fn remove_all(&self, paths: &[PathBuf]) -> usize {
        let mut failures = 0;
        for path in paths {
            if !self.remove(path).await {
                failures += 1;
            }
        }
        failures
    }
}
