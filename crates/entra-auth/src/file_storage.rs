use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use fs2::FileExt;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::error;

use crate::crypto::{self, SealedValue, StoreKey};
use crate::errors::{AuthError, Result};
use crate::secret::SecretProvider;
use crate::storage::Storage;

/// File-based persistent store with values sealed at rest
///
/// Entries are sealed with AES-256-GCM and written one file per cache key.
/// The store key lives in the OS keyring, with an Argon2id
/// passphrase-derived fallback when no keyring is available.
///
/// # Directory Structure
/// ```text
/// <storage_dir>/
/// ├── meta.json              # Key derivation metadata
/// ├── lock                   # Advisory lock file
/// └── entries/
///     └── <base64(key)>.json # Sealed value per cache key
/// ```
#[derive(Debug)]
pub struct FileStorage {
    entries_dir: PathBuf,
    lock_file: PathBuf,
    key: StoreKey,
    /// In-memory overlay for recently accessed values
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl FileStorage {
    /// Open or initialize a store, resolving the key via keyring/passphrase
    pub async fn new(
        storage_dir: impl AsRef<Path>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        Self::prepare_dirs(&storage_dir).await?;
        let key = crypto::load_or_create_key(&storage_dir, &secrets).await?;
        Ok(Self::assemble(storage_dir, key))
    }

    /// Open or initialize a store with a caller-managed key
    pub async fn with_key(storage_dir: impl AsRef<Path>, key: StoreKey) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        Self::prepare_dirs(&storage_dir).await?;
        Ok(Self::assemble(storage_dir, key))
    }

    /// Default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("", "", "entra-auth").ok_or_else(|| {
            AuthError::Storage("could not determine config directory".to_string())
        })?;
        Ok(project_dirs.config_dir().join("store"))
    }

    fn assemble(storage_dir: PathBuf, key: StoreKey) -> Self {
        Self {
            entries_dir: storage_dir.join("entries"),
            lock_file: storage_dir.join("lock"),
            key,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn prepare_dirs(storage_dir: &Path) -> Result<()> {
        let entries_dir = storage_dir.join("entries");
        fs::create_dir_all(storage_dir).await?;
        fs::create_dir_all(&entries_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(storage_dir, perms.clone())?;
            std::fs::set_permissions(&entries_dir, perms)?;
        }

        Ok(())
    }

    /// Cache keys are arbitrary strings; file names are their base64 form
    fn entry_path(&self, key: &str) -> PathBuf {
        self.entries_dir
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(key.as_bytes())))
    }

    /// Acquire an exclusive advisory lock on the store
    async fn acquire_lock(&self) -> Result<std::fs::File> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_file)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| AuthError::LockTimeout)?;

        Ok(lock_file)
    }

    async fn load_from_disk(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let sealed: SealedValue =
            serde_json::from_str(&content).map_err(|_| AuthError::CorruptedStore)?;

        let plaintext = crypto::open(&self.key, &sealed, key)?;
        let value = String::from_utf8(plaintext).map_err(|_| AuthError::CorruptedStore)?;
        Ok(Some(value))
    }

    async fn save_to_disk(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        let sealed = crypto::seal(&self.key, value.as_bytes(), key)?;
        let sealed_json = serde_json::to_string_pretty(&sealed)?;

        // Atomic write: temp file, sync, rename
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, sealed_json).await?;
        let file = std::fs::File::open(&temp_path)?;
        file.sync_all()?;
        fs::rename(&temp_path, &path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Option<String> {
        {
            let cache = self.cache.read().await;
            if let Some(value) = cache.get(key) {
                return Some(value.clone());
            }
        }

        match self.load_from_disk(key).await {
            Ok(Some(value)) => {
                self.cache
                    .write()
                    .await
                    .insert(key.to_string(), value.clone());
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                error!("failed to load store entry '{}': {}", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _lock = self.acquire_lock().await?;
        self.save_to_disk(key, value).await?;
        self.cache
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _lock = self.acquire_lock().await?;

        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(&path).await?;
        }

        self.cache.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();

        let mut entries = match fs::read_dir(&self.entries_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("failed to read entries directory: {}", e);
                return keys;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Ok(decoded) = URL_SAFE_NO_PAD.decode(stem)
                && let Ok(key) = String::from_utf8(decoded)
            {
                keys.push(key);
            }
        }

        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (FileStorage, StoreKey, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let key = StoreKey::generate().unwrap();
        let store = FileStorage::with_key(temp_dir.path(), key.clone())
            .await
            .unwrap();
        (store, key, temp_dir)
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let (store, _key, _temp) = create_test_store().await;

        assert!(store.get("entra.token.r").await.is_none());

        store.set("entra.token.r", "{\"token\":\"T\"}").await.unwrap();
        assert_eq!(
            store.get("entra.token.r").await.as_deref(),
            Some("{\"token\":\"T\"}")
        );

        store.remove("entra.token.r").await.unwrap();
        assert!(store.get("entra.token.r").await.is_none());
    }

    #[tokio::test]
    async fn test_values_survive_reopen_with_same_key() {
        let temp_dir = TempDir::new().unwrap();
        let key = StoreKey::generate().unwrap();

        {
            let store = FileStorage::with_key(temp_dir.path(), key.clone())
                .await
                .unwrap();
            store.set("entra.idtoken", "raw-token").await.unwrap();
        }

        let reopened = FileStorage::with_key(temp_dir.path(), key).await.unwrap();
        assert_eq!(reopened.get("entra.idtoken").await.as_deref(), Some("raw-token"));
    }

    #[tokio::test]
    async fn test_wrong_key_reads_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let key = StoreKey::generate().unwrap();

        {
            let store = FileStorage::with_key(temp_dir.path(), key).await.unwrap();
            store.set("entra.idtoken", "raw-token").await.unwrap();
        }

        let other = FileStorage::with_key(temp_dir.path(), StoreKey::generate().unwrap())
            .await
            .unwrap();
        assert!(other.get("entra.idtoken").await.is_none());
    }

    #[tokio::test]
    async fn test_keys_roundtrip_arbitrary_names() {
        let (store, _key, _temp) = create_test_store().await;

        store
            .set("entra.token.https://api.example.com/", "v")
            .await
            .unwrap();
        store.set("entra.error", "e").await.unwrap();

        let mut keys = store.keys().await;
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "entra.error".to_string(),
                "entra.token.https://api.example.com/".to_string()
            ]
        );
    }
}
