//! Progress persistence.
//!
//! Progress is kept as three JSON-encoded values under fixed keys in a small
//! key/value store, so it survives restarts and offline periods:
//! - `progress`: the cursor
//! - `claimedMarkers`: the claimed-marker count
//! - `claimedText`: the ordered list of claimed narrative text
//!
//! This layer has no business logic. Reconciling what it loads with the
//! marker catalog is the session's job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Key holding the cursor.
pub const CURSOR_KEY: &str = "progress";

/// Key holding the claimed-marker count.
pub const CLAIMED_COUNT_KEY: &str = "claimedMarkers";

/// Key holding the claimed narrative text.
pub const CLAIMED_TEXT_KEY: &str = "claimedText";

/// Cursor assumed when no cursor has ever been written.
pub const MISSING_CURSOR: usize = 0;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Corrupt value under '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A minimal asynchronous string key/value store.
///
/// Reading a missing key yields `None` and removing one is a no-op; neither
/// is an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError>;

    async fn remove(&self, key: &str) -> Result<(), PersistError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        (**self).remove(key).await
    }
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        (**self).remove(key).await
    }
}

/// A key/value store backed by one file per key in a directory.
///
/// Each value is written to a temporary file and renamed into place, so a
/// single key is never observed half written.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        match fs::read_to_string(self.key_path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.key_path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// An in-process key/value store.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently present.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PersistError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// The three progress values exactly as they were found in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProgress {
    pub cursor: usize,
    pub claimed_count: usize,
    pub claimed_text: Vec<String>,
}

/// Load/save/clear of the three progress values over a [`KeyValueStore`].
pub struct ProgressStore<S> {
    backend: S,
}

impl<S: KeyValueStore> ProgressStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Write all three values.
    ///
    /// The cursor is written last so it acts as the commit marker: if a
    /// write fails part way, the stored cursor still names the previous
    /// state. There is no retry.
    pub async fn save(
        &self,
        cursor: usize,
        claimed_count: usize,
        claimed_text: &[String],
    ) -> Result<(), PersistError> {
        let text = serde_json::to_string(claimed_text)?;
        let count = serde_json::to_string(&claimed_count)?;
        let position = serde_json::to_string(&cursor)?;

        self.backend.set(CLAIMED_TEXT_KEY, &text).await?;
        self.backend.set(CLAIMED_COUNT_KEY, &count).await?;
        self.backend.set(CURSOR_KEY, &position).await?;

        debug!(cursor, claimed_count, entries = claimed_text.len(), "Saved progress");
        Ok(())
    }

    /// Read all three values, substituting defaults for missing keys.
    pub async fn load(&self) -> Result<StoredProgress, PersistError> {
        let cursor = self.read(CURSOR_KEY).await?.unwrap_or(MISSING_CURSOR);
        let claimed_count = self.read(CLAIMED_COUNT_KEY).await?.unwrap_or(0);
        let claimed_text = self.read(CLAIMED_TEXT_KEY).await?.unwrap_or_default();

        Ok(StoredProgress {
            cursor,
            claimed_count,
            claimed_text,
        })
    }

    /// Remove all three values.
    ///
    /// Every key is attempted even if an earlier removal fails; the first
    /// failure is returned. The cursor goes first so a partial clear still
    /// loads as an empty trail.
    pub async fn clear(&self) -> Result<(), PersistError> {
        let mut first_error = None;
        for key in [CURSOR_KEY, CLAIMED_COUNT_KEY, CLAIMED_TEXT_KEY] {
            if let Err(e) = self.backend.remove(key).await {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("Cleared progress");
                Ok(())
            }
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, PersistError> {
        match self.backend.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| PersistError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_load_empty_store_uses_defaults() {
        let store = ProgressStore::new(MemoryKeyValueStore::new());
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, StoredProgress::default());
        assert_eq!(loaded.cursor, MISSING_CURSOR);
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let store = ProgressStore::new(MemoryKeyValueStore::new());
        let claimed = texts(&["The harbour.", "The bridge.\nA note."]);

        store.save(2, 2, &claimed).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.cursor, 2);
        assert_eq!(loaded.claimed_count, 2);
        assert_eq!(loaded.claimed_text, claimed);
    }

    #[tokio::test]
    async fn test_values_are_json_under_fixed_keys() {
        let store = ProgressStore::new(MemoryKeyValueStore::new());
        store.save(1, 1, &texts(&["hello"])).await.unwrap();

        let backend = store.backend();
        assert_eq!(backend.get(CURSOR_KEY).await.unwrap().as_deref(), Some("1"));
        assert_eq!(
            backend.get(CLAIMED_COUNT_KEY).await.unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(
            backend.get(CLAIMED_TEXT_KEY).await.unwrap().as_deref(),
            Some(r#"["hello"]"#)
        );
    }

    #[tokio::test]
    async fn test_clear_returns_to_defaults() {
        let store = ProgressStore::new(MemoryKeyValueStore::new());
        store.save(3, 3, &texts(&["a", "b", "c"])).await.unwrap();

        store.clear().await.unwrap();

        assert!(store.backend().is_empty().await);
        assert_eq!(store.load().await.unwrap(), StoredProgress::default());
    }

    #[tokio::test]
    async fn test_clear_on_empty_store_is_ok() {
        let store = ProgressStore::new(MemoryKeyValueStore::new());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_value_is_decode_error() {
        let backend = MemoryKeyValueStore::new();
        backend.set(CLAIMED_TEXT_KEY, "{not json").await.unwrap();
        let store = ProgressStore::new(backend);

        match store.load().await {
            Err(PersistError::Decode { key, .. }) => assert_eq!(key, CLAIMED_TEXT_KEY),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_layout() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("progress");
        let store = ProgressStore::new(FileKeyValueStore::new(&dir));

        store.save(1, 1, &texts(&["first"])).await.unwrap();

        assert!(dir.join("progress.json").exists());
        assert!(dir.join("claimedMarkers.json").exists());
        assert!(dir.join("claimedText.json").exists());
        assert!(!dir.join("progress.json.tmp").exists());

        let reopened = ProgressStore::new(FileKeyValueStore::new(&dir));
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.cursor, 1);
        assert_eq!(loaded.claimed_text, texts(&["first"]));
    }

    #[tokio::test]
    async fn test_file_store_missing_dir_loads_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = ProgressStore::new(FileKeyValueStore::new(temp_dir.path().join("nope")));

        assert_eq!(store.load().await.unwrap(), StoredProgress::default());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_overwrites_and_clears() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = ProgressStore::new(FileKeyValueStore::new(temp_dir.path()));

        store.save(2, 2, &texts(&["a", "b"])).await.unwrap();
        store.save(1, 1, &texts(&["a"])).await.unwrap();
        assert_eq!(store.load().await.unwrap().claimed_text, texts(&["a"]));

        store.clear().await.unwrap();
        assert!(!temp_dir.path().join("progress.json").exists());
        assert_eq!(store.load().await.unwrap(), StoredProgress::default());
    }

    #[tokio::test]
    async fn test_file_store_failed_rename_leaves_no_temp_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = FileKeyValueStore::new(temp_dir.path());

        // A non-empty directory where the value file belongs blocks the rename.
        let blocker = temp_dir.path().join("progress.json");
        std::fs::create_dir_all(blocker.join("inner")).unwrap();

        assert!(matches!(store.set(CURSOR_KEY, "1").await, Err(PersistError::Io(_))));
        assert!(!temp_dir.path().join("progress.json.tmp").exists());
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("claimedText"), "claimedText");
        assert_eq!(sanitize_key("../etc/passwd"), "___etc_passwd");
    }
}
