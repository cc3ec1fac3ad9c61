//! File-backed key-value store.
//!
//! All keys live in one JSON object on disk. Every call re-reads the file so
//! that changes made by another process are picked up. Writes go through a
//! temporary file and a rename, so a concurrent reader never sees a partial
//! document.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use super::kv::KeyValueStore;
use crate::{AuthError, AuthResult};

/// [`KeyValueStore`] persisted as a JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> AuthResult<BTreeMap<String, String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(AuthError::storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            AuthError::storage(format!("Corrupt store {}: {}", self.path.display(), e))
        })
    }

    async fn write_all(&self, entries: &BTreeMap<String, String>) -> AuthResult<()> {
        let content = serde_json::to_vec_pretty(entries)
            .map_err(|e| AuthError::storage(e.to_string()))?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_file(&path, &content))
            .await
            .map_err(|e| AuthError::storage(format!("Session write task failed: {e}")))?
    }
}

/// Writes `content` to a private temporary file next to `path`, then renames
/// it over `path`. Readers see either the old or the new file, never a mix.
fn replace_file(path: &Path, content: &[u8]) -> AuthResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| AuthError::storage(format!("Failed to create {}: {}", dir.display(), e)))?;

    let write_error =
        |e: std::io::Error| AuthError::storage(format!("Failed to write {}: {}", path.display(), e));

    let mut file = NamedTempFile::new_in(dir).map_err(write_error)?;
    restrict_permissions(file.as_file()).map_err(write_error)?;
    file.write_all(content).map_err(write_error)?;
    file.as_file().sync_all().map_err(write_error)?;

    file.persist(path)
        .map_err(|e| AuthError::storage(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

// Applied before any token bytes are written.
#[cfg(unix)]
fn restrict_permissions(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries).await
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("session.json"));
        assert!(store.get("tokenSet").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("session.json"));

        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.remove("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_changes_from_other_instance_are_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let first = FileStore::new(&path);
        let second = FileStore::new(&path);

        first.set("tokenSet", "x").await.unwrap();
        assert_eq!(second.get("tokenSet").await.unwrap().as_deref(), Some("x"));

        second.remove("tokenSet").await.unwrap();
        assert!(first.get("tokenSet").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = FileStore::new(&path).get("a").await.unwrap_err();
        assert!(matches!(err, AuthError::Storage { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("session.json"));
        store.set("a", "1").await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // Replacing an existing file keeps it private.
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        store.set("b", "2").await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_writes_leave_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("session.json"));

        for i in 0..5 {
            store.set("tokenSet", &i.to_string()).await.unwrap();
        }
        store.remove("tokenSet").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("session.json")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reader_never_sees_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let writer = std::sync::Arc::new(FileStore::new(&path));
        let reader = FileStore::new(&path);
        writer.set("tokenSet", "seed").await.unwrap();

        let task = {
            let writer = writer.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    let value = "x".repeat(4096 + i);
                    writer.set("tokenSet", &value).await.unwrap();
                }
            })
        };

        while !task.is_finished() {
            let value = reader.get("tokenSet").await.unwrap();
            assert!(value.is_some());
        }
        task.await.unwrap();
        assert_eq!(reader.get("tokenSet").await.unwrap().unwrap().len(), 4096 + 49);
    }
}
