//! Content-addressed artifact storage.
//!
//! Artifacts are keyed by [`ArtifactKey`] (identity + format) and nothing
//! else, so any worker that computes the same identity finds the same bytes.
//! Source names, request handles and display data never reach this layer.
//!
//! [`FileStorage`] lays files out as:
//!
//! ```text
//! <root>/
//! └── 57/
//!     └── 5755d5d00299ec16fb13c01adaab2406.webp
//! ```
//!
//! The two-character prefix directory keeps any single directory small.
//! Writes go to a temporary file in the same directory and are renamed into
//! place, so readers never see a partial artifact.

use crate::fingerprint::Identity;
use crate::variant::Format;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Address of one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub identity: Identity,
    pub format: Format,
}

impl ArtifactKey {
    pub fn new(identity: Identity, format: Format) -> Self {
        Self { identity, format }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.identity.to_hex(), self.format.extension())
    }

    /// `ab/abcdef….ext`, always with forward slashes.
    pub fn relative_path(&self) -> String {
        let hex = self.identity.to_hex();
        format!("{}/{}", &hex[..2], self.file_name())
    }
}

/// Byte store for generated artifacts.
pub trait Storage: Sync {
    /// Store `bytes` under `key`, replacing any previous content. Returns the
    /// stored location.
    fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<String, StorageError>;

    fn exists(&self, key: &ArtifactKey) -> bool;

    /// `None` when nothing is stored under `key`.
    fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Public URL for `key`. Does not check existence.
    fn url(&self, key: &ArtifactKey) -> String;
}

/// Directory-backed storage with a public URL prefix.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    base_url: String,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        let hex = key.identity.to_hex();
        self.root.join(&hex[..2]).join(key.file_name())
    }
}

impl Storage for FileStorage {
    fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<String, StorageError> {
        let path = self.path_for(key);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(".{}.tmp", key.file_name()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn exists(&self, key: &ArtifactKey) -> bool {
        self.path_for(key).is_file()
    }

    fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn url(&self, key: &ArtifactKey) -> String {
        format!("{}/{}", self.base_url, key.relative_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> ArtifactKey {
        ArtifactKey::new(
            "5755d5d00299ec16fb13c01adaab2406".parse().unwrap(),
            Format::Webp,
        )
    }

    #[test]
    fn relative_path_uses_prefix_directory() {
        assert_eq!(
            key().relative_path(),
            "57/5755d5d00299ec16fb13c01adaab2406.webp"
        );
        let jpeg = ArtifactKey::new(key().identity, Format::Jpeg);
        assert_eq!(jpeg.file_name(), "5755d5d00299ec16fb13c01adaab2406.jpg");
    }

    #[test]
    fn put_then_read_and_exists() {
        let tmp = TempDir::new().unwrap();
        let storage = FileStorage::new(tmp.path(), "/media");
        assert!(!storage.exists(&key()));
        assert_eq!(storage.read(&key()).unwrap(), None);

        let location = storage.put(&key(), b"pixels").unwrap();
        assert!(location.ends_with("5755d5d00299ec16fb13c01adaab2406.webp"));
        assert!(storage.exists(&key()));
        assert_eq!(storage.read(&key()).unwrap(), Some(b"pixels".to_vec()));
    }

    #[test]
    fn put_replaces_and_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let storage = FileStorage::new(tmp.path(), "/media");
        storage.put(&key(), b"first").unwrap();
        storage.put(&key(), b"second").unwrap();
        assert_eq!(storage.read(&key()).unwrap(), Some(b"second".to_vec()));

        let dir = storage.path_for(&key()).parent().unwrap().to_path_buf();
        let names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["5755d5d00299ec16fb13c01adaab2406.webp"]);
    }

    #[test]
    fn url_joins_base_without_double_slash() {
        let storage = FileStorage::new("/unused", "https://cdn.example.com/v/");
        assert_eq!(
            storage.url(&key()),
            "https://cdn.example.com/v/57/5755d5d00299ec16fb13c01adaab2406.webp"
        );
    }
}
