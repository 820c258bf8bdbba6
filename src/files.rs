//! Local-directory file storage backend.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::info;

/// Stores uploaded files under a single local directory.
pub struct FilesBackend {
    directory: PathBuf,
}

impl FilesBackend {
    /// Creates the storage directory and probes it for writability.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or is not writable.
    pub fn new(directory: &str) -> io::Result<Self> {
        let directory = PathBuf::from(directory);
        std::fs::create_dir_all(&directory)?;

        let probe = directory.join(".writable");
        std::fs::write(&probe, b"")?;
        std::fs::remove_file(&probe)?;

        info!(directory = %directory.display(), "Files backend initialized");
        Ok(Self { directory })
    }

    /// # Errors
    ///
    /// Fails on any underlying filesystem error.
    pub async fn save_file(&self, name: &str, data: &[u8]) -> io::Result<()> {
        fs::write(self.resolve(name)?, data).await
    }

    /// # Errors
    ///
    /// Fails when the file is missing or unreadable.
    pub async fn read_file(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(name)?).await
    }

    /// Rejects names that would escape the storage directory.
    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let candidate = Path::new(name);
        if candidate.is_absolute()
            || candidate
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file name '{name}'"),
            ));
        }
        Ok(self.directory.join(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesBackend::new(dir.path().join("files").to_str().unwrap()).unwrap();
        backend.save_file("board.png", b"data").await.unwrap();
        assert_eq!(backend.read_file("board.png").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesBackend::new(dir.path().to_str().unwrap()).unwrap();
        assert!(backend.read_file("../outside").await.is_err());
        assert!(backend.read_file("/etc/passwd").await.is_err());
    }
}
