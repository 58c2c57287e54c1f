//! Local filesystem backend.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BlobError, BlobResult, BlobStore};

/// Stores each blob under `<root>/<first two chars of key>/<key>`.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn key_to_path(&self, key: &str) -> BlobResult<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && !key.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        let shard: String = key.chars().take(2).collect();
        Ok(self.root.join(shard).join(relative))
    }
}

fn not_found_or_io(key: &str, e: std::io::Error) -> BlobError {
    if e.kind() == ErrorKind::NotFound {
        BlobError::NotFound(key.to_string())
    } else {
        BlobError::Io(e)
    }
}

#[async_trait]
impl BlobStore for FilesystemStore {
    async fn put(&self, key: &str, content: Bytes) -> BlobResult<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;

        tracing::debug!(key, size = content.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        let path = self.key_to_path(key)?;
        let content = fs::read(&path).await.map_err(|e| not_found_or_io(key, e))?;
        Ok(Bytes::from(content))
    }

    async fn size(&self, key: &str) -> BlobResult<u64> {
        let path = self.key_to_path(key)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        Ok(metadata.len())
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.key_to_path(key)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(key, e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_size_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        assert!(matches!(
            store.size("releases/a.ipa").await.unwrap_err(),
            BlobError::NotFound(_)
        ));
        store
            .put("releases/a.ipa", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert_eq!(store.size("releases/a.ipa").await.unwrap(), 7);
        assert_eq!(store.get("releases/a.ipa").await.unwrap(), &b"payload"[..]);
        assert!(dir.path().join("re").join("releases").join("a.ipa").exists());

        store.delete("releases/a.ipa").await.unwrap();
        assert!(matches!(
            store.get("releases/a.ipa").await.unwrap_err(),
            BlobError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        assert!(matches!(
            store.get("missing.apk").await.unwrap_err(),
            BlobError::NotFound(_)
        ));
        assert!(matches!(
            store.size("missing.apk").await.unwrap_err(),
            BlobError::NotFound(_)
        ));
        assert!(matches!(
            store.delete("missing.apk").await.unwrap_err(),
            BlobError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        for key in ["", "../etc/passwd", "/abs/path", "a/../../b", "a\\b", "./a"] {
            assert!(
                matches!(store.get(key).await.unwrap_err(), BlobError::InvalidKey(_)),
                "key {key:?} should be rejected"
            );
        }
    }
}
