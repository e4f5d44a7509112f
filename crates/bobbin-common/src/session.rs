//! Secret storage collaborator.
//!
//! bobbin never encrypts anything itself. Session records are handed to a
//! [`SecureStore`] as opaque bytes, and the platform implementation is expected
//! to provide encryption at rest.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use miette::Diagnostic;
use serde_json::{Map, Value};
use smol_str::SmolStr;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Errors emitted by secure stores.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum SessionStoreError {
    /// Filesystem or I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(bobbin_common::session_store::io))]
    Io(#[from] std::io::Error),
    /// Serialization error (e.g., JSON)
    #[error("serialization error: {0}")]
    #[diagnostic(code(bobbin_common::session_store::serde))]
    Serde(#[from] serde_json::Error),
    /// Stored value could not be decoded
    #[error("corrupt value for key {0:?}")]
    #[diagnostic(code(bobbin_common::session_store::corrupt))]
    Corrupt(SmolStr),
    /// Any other error from a backend implementation
    #[error(transparent)]
    #[diagnostic(code(bobbin_common::session_store::other))]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

/// Key/value store for secrets.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError>;
    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SessionStoreError>;
    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), SessionStoreError>;
}

#[async_trait]
impl<S: SecureStore + ?Sized> SecureStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError> {
        self.as_ref().get(key).await
    }
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SessionStoreError> {
        self.as_ref().set(key, value).await
    }
    async fn delete(&self, key: &str) -> Result<(), SessionStoreError> {
        self.as_ref().delete(key).await
    }
}

/// In-memory store suitable for short-lived sessions and tests.
#[derive(Clone, Default)]
pub struct MemoryStore(Arc<RwLock<HashMap<SmolStr, Vec<u8>>>>);

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.0.read().await.len()
    }

    /// True if nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.0.read().await.is_empty()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError> {
        Ok(self.0.read().await.get(key).cloned())
    }
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SessionStoreError> {
        self.0.write().await.insert(SmolStr::new(key), value);
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<(), SessionStoreError> {
        self.0.write().await.remove(key);
        Ok(())
    }
}

/// File-backed store using a JSON object of base64 values.
///
/// NOT secure, only suitable for development.
///
/// Example
/// ```no_run
/// use bobbin_common::session::FileStore;
/// let store = FileStore::new("/tmp/bobbin-sessions.json").unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct FileStore {
    /// Path to the JSON file.
    pub path: PathBuf,
    write: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open the store at `path`, creating it (and parent directories) if missing.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SessionStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            std::fs::write(path, b"{}")?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            write: Arc::new(Mutex::new(())),
        })
    }

    async fn load(&self) -> Result<Map<String, Value>, SessionStoreError> {
        let file = tokio::fs::read_to_string(&self.path).await?;
        match serde_json::from_str::<Value>(&file)? {
            Value::Object(map) => Ok(map),
            _ => Err(SessionStoreError::Other("invalid store".into())),
        }
    }

    async fn save(&self, map: &Map<String, Value>) -> Result<(), SessionStoreError> {
        tokio::fs::write(&self.path, serde_json::to_string_pretty(map)?).await?;
        Ok(())
    }
}

#[async_trait]
impl SecureStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionStoreError> {
        let store = {
            let _guard = self.write.lock().await;
            self.load().await?
        };
        let Some(value) = store.get(key) else {
            return Ok(None);
        };
        let encoded = value
            .as_str()
            .ok_or_else(|| SessionStoreError::Corrupt(key.into()))?;
        STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|_| SessionStoreError::Corrupt(key.into()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SessionStoreError> {
        let _guard = self.write.lock().await;
        let mut store = self.load().await?;
        store.insert(key.to_string(), Value::String(STANDARD.encode(value)));
        self.save(&store).await
    }

    async fn delete(&self, key: &str) -> Result<(), SessionStoreError> {
        let _guard = self.write.lock().await;
        let mut store = self.load().await?;
        if store.remove(key).is_some() {
            self.save(&store).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let path = std::env::temp_dir().join(format!(
            "bobbin-file-store-{}-{}.json",
            std::process::id(),
            line!()
        ));
        let _ = std::fs::remove_file(&path);

        let store = FileStore::new(&path).unwrap();
        store.set("session:a", vec![0, 159, 146, 150]).await.unwrap();
        store.set("last", b"did:web:example.com".to_vec()).await.unwrap();

        let reopened = FileStore::new(&path).unwrap();
        assert_eq!(
            reopened.get("session:a").await.unwrap(),
            Some(vec![0, 159, 146, 150])
        );
        reopened.delete("session:a").await.unwrap();
        assert!(store.get("session:a").await.unwrap().is_none());
        assert!(store.get("last").await.unwrap().is_some());

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn file_store_reads_never_see_partial_writes() {
        let path = std::env::temp_dir().join(format!(
            "bobbin-file-store-{}-{}.json",
            std::process::id(),
            line!()
        ));
        let _ = std::fs::remove_file(&path);
        let store = FileStore::new(&path).unwrap();
        store.set("k", vec![7; 4096]).await.unwrap();

        let writer = async {
            for i in 0..32u8 {
                store.set(&format!("k{i}"), vec![i; 4096]).await.unwrap();
            }
        };
        let reader = async {
            for _ in 0..32 {
                assert_eq!(store.get("k").await.unwrap(), Some(vec![7; 4096]));
            }
        };
        tokio::join!(writer, reader);
        assert_eq!(store.get("k31").await.unwrap(), Some(vec![31; 4096]));

        std::fs::remove_file(&path).unwrap();
    }
}
