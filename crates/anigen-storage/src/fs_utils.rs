//! Filesystem helpers for whole-file JSON records.
//!
//! Records are replaced by writing a sibling temp file and renaming it over
//! the target, so readers see either the old or the new content.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

/// Temp sibling used while replacing `path`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` atomically, creating the parent directory if needed.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, bytes).await?;

    if let Err(e) = fs::rename(&tmp, path).await {
        // Clean up temp file on failure
        let _ = fs::remove_file(&tmp).await;
        tracing::error!(
            "Failed to replace {} with temp file: {}",
            path.display(),
            e
        );
        return Err(e);
    }

    Ok(())
}

/// Read a file, mapping "not found" to `None`.
pub(crate) async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_atomic_creates_parent_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("context.json");

        write_atomic(&path, b"old").await.unwrap();
        write_atomic(&path, b"new").await.unwrap();

        assert_eq!(fs::read_to_string(&path).await.unwrap(), "new");
        assert!(!temp_path(&path).exists(), "Temp file should be renamed away");
    }

    #[tokio::test]
    async fn test_read_optional_missing() {
        let dir = TempDir::new().unwrap();
        let missing = read_optional(&dir.path().join("nope.json")).await.unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path(Path::new("/data/p1/context.json"));
        assert_eq!(tmp, PathBuf::from("/data/p1/context.json.tmp"));
    }
}
