//! Source documents: an immutable snapshot of one input file.
//!
//! The snapshot is taken when the converter picks the file up. The content
//! hash is SHA-256 over the file bytes rather than the mtime so change
//! detection survives `git checkout` and copies that reset timestamps.

use crate::error::ConversionError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file on disk, as it was when conversion started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDocument {
    /// Absolute, canonical path. The key for metadata records.
    pub path: PathBuf,
    /// Lower-case extension without the dot; empty when absent.
    pub extension: String,
    /// Hex SHA-256 of the file contents.
    pub content_hash: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl SourceDocument {
    /// Stat and hash `path`. Runs on the blocking pool.
    pub async fn snapshot(path: &Path) -> Result<Self, ConversionError> {
        let path = path.to_path_buf();
        let display = path.clone();
        tokio::task::spawn_blocking(move || Self::snapshot_blocking(&path))
            .await
            .map_err(|e| ConversionError::SourceUnreadable {
                path: display,
                detail: format!("hash task panicked: {e}"),
            })?
    }

    fn snapshot_blocking(path: &Path) -> Result<Self, ConversionError> {
        let unreadable = |e: std::io::Error| ConversionError::SourceUnreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        };

        let canonical = path.canonicalize().map_err(unreadable)?;
        let meta = std::fs::metadata(&canonical).map_err(unreadable)?;
        if !meta.is_file() {
            return Err(ConversionError::SourceUnreadable {
                path: canonical,
                detail: "not a regular file".into(),
            });
        }
        let content_hash = hash_file(&canonical).map_err(unreadable)?;
        debug!("Hashed {} ({} bytes)", canonical.display(), meta.len());

        Ok(Self {
            extension: extension_of(&canonical),
            content_hash,
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            path: canonical,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Lower-cased extension of `path`, without the dot.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Hex SHA-256 of a file, streamed in 64 KiB blocks.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.txt");

        fs::write(&path, b"version 1").unwrap();
        let h1 = hash_file(&path).unwrap();
        assert_eq!(h1, hash_file(&path).unwrap());
        assert_eq!(h1.len(), 64);

        fs::write(&path, b"version 2").unwrap();
        assert_ne!(h1, hash_file(&path).unwrap());
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension_of(Path::new("Scan.PDF")), "pdf");
        assert_eq!(extension_of(Path::new("README")), "");
    }

    #[tokio::test]
    async fn snapshot_captures_attributes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.TXT");
        fs::write(&path, b"hello").unwrap();

        let doc = SourceDocument::snapshot(&path).await.unwrap();
        assert!(doc.path.is_absolute());
        assert_eq!(doc.extension, "txt");
        assert_eq!(doc.size, 5);
        assert_eq!(doc.file_name(), "notes.TXT");
        assert!(doc.modified.is_some());
    }

    #[tokio::test]
    async fn snapshot_of_missing_file_is_unreadable() {
        let err = SourceDocument::snapshot(Path::new("/definitely/not/here.pdf"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SourceUnreadable);
    }
}
