use std::path::Path;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2, Params,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use zeroize::ZeroizeOnDrop;

use crate::errors::{AuthError, Result};
use crate::secret::SecretProvider;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 32;
const AAD_VERSION: &str = "v1";

#[cfg(feature = "keyring-support")]
const KEYRING_SERVICE: &str = "entra-auth";
#[cfg(feature = "keyring-support")]
const KEYRING_USER: &str = "store-key:v1";

/// AES-256 key sealing the persistent token store
#[derive(Clone, ZeroizeOnDrop)]
pub struct StoreKey {
    key: [u8; KEY_LEN],
}

impl StoreKey {
    /// Generate a fresh random key
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        getrandom::fill(&mut key).map_err(|e| AuthError::Crypto(format!("rng failure: {}", e)))?;
        Ok(Self { key })
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { key: bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreKey([REDACTED])")
    }
}

/// Sealed store value with nonce and authentication tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SealedValue {
    /// Base64url-encoded nonce
    pub nonce: String,
    /// Base64url-encoded ciphertext + tag
    pub ciphertext: String,
    /// Additional authenticated data version
    pub version: String,
}

fn aad_for(version: &str, cache_key: &str) -> String {
    // The cache key is authenticated so a value cannot be replayed under
    // another key.
    format!("entra-auth|{}|{}", version, cache_key)
}

/// Seal a store value with AES-256-GCM
pub(crate) fn seal(key: &StoreKey, plaintext: &[u8], cache_key: &str) -> Result<SealedValue> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    getrandom::fill(&mut nonce_bytes)
        .map_err(|e| AuthError::Crypto(format!("rng failure: {}", e)))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = aad_for(AAD_VERSION, cache_key);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|e| AuthError::Crypto(format!("encryption failed: {}", e)))?;

    Ok(SealedValue {
        nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        version: AAD_VERSION.to_string(),
    })
}

/// Open a sealed store value
pub(crate) fn open(key: &StoreKey, sealed: &SealedValue, cache_key: &str) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let nonce_bytes = URL_SAFE_NO_PAD
        .decode(&sealed.nonce)
        .map_err(|_| AuthError::CorruptedStore)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(AuthError::CorruptedStore);
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = URL_SAFE_NO_PAD
        .decode(&sealed.ciphertext)
        .map_err(|_| AuthError::CorruptedStore)?;

    let aad = aad_for(&sealed.version, cache_key);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| AuthError::CorruptedStore)
}

/// Key derivation and storage-format metadata, persisted beside the store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreMeta {
    version: u32,
    created_at: chrono::DateTime<chrono::Utc>,
    /// Base64-encoded Argon2id salt, present once a passphrase key is in use
    #[serde(skip_serializing_if = "Option::is_none")]
    passphrase_salt: Option<String>,
}

impl Default for StoreMeta {
    fn default() -> Self {
        Self {
            version: 1,
            created_at: chrono::Utc::now(),
            passphrase_salt: None,
        }
    }
}

/// Load the store key, creating one on first use
///
/// The OS keyring is the primary key holder. When it has no entry yet, a
/// fresh key is generated and saved there. When the keyring is unavailable,
/// the key is derived from a passphrase with Argon2id and the salt recorded
/// in `meta.json`, so the same passphrase reopens the store.
pub(crate) async fn load_or_create_key(
    storage_dir: &Path,
    secrets: &Arc<dyn SecretProvider>,
) -> Result<StoreKey> {
    let meta_path = storage_dir.join("meta.json");

    let mut meta = if meta_path.exists() {
        let content = fs::read_to_string(&meta_path).await?;
        serde_json::from_str(&content).map_err(|_| AuthError::CorruptedStore)?
    } else {
        StoreMeta::default()
    };

    #[cfg(feature = "keyring-support")]
    let key = match lookup_keyring() {
        KeyringLookup::Found(key) => {
            debug!("loaded store key from OS keyring");
            key
        }
        KeyringLookup::Missing => {
            let key = StoreKey::generate()?;
            match save_to_keyring(&key) {
                Ok(()) => {
                    debug!("generated store key and saved it to the OS keyring");
                    key
                }
                Err(e) => {
                    debug!("keyring unavailable ({}), deriving key from passphrase", e);
                    derive_from_passphrase(&mut meta, secrets).await?
                }
            }
        }
        KeyringLookup::Unavailable(reason) => {
            debug!("keyring unavailable ({}), deriving key from passphrase", reason);
            derive_from_passphrase(&mut meta, secrets).await?
        }
    };

    #[cfg(not(feature = "keyring-support"))]
    let key = derive_from_passphrase(&mut meta, secrets).await?;

    let meta_json = serde_json::to_string_pretty(&meta)?;
    fs::write(&meta_path, meta_json).await?;

    Ok(key)
}

#[cfg(feature = "keyring-support")]
enum KeyringLookup {
    Found(StoreKey),
    Missing,
    Unavailable(String),
}

#[cfg(feature = "keyring-support")]
fn lookup_keyring() -> KeyringLookup {
    let entry = match keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        Ok(entry) => entry,
        Err(e) => return KeyringLookup::Unavailable(e.to_string()),
    };
    match entry.get_password() {
        Ok(encoded) => match decode_key(&encoded) {
            Ok(key) => KeyringLookup::Found(key),
            Err(_) => KeyringLookup::Unavailable("stored key is malformed".to_string()),
        },
        Err(keyring::Error::NoEntry) => KeyringLookup::Missing,
        Err(e) => KeyringLookup::Unavailable(e.to_string()),
    }
}

#[cfg(feature = "keyring-support")]
fn save_to_keyring(key: &StoreKey) -> Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| AuthError::Keyring(e.to_string()))?;
    entry
        .set_password(&STANDARD.encode(key.as_bytes()))
        .map_err(|e| AuthError::Keyring(e.to_string()))
}

#[cfg(feature = "keyring-support")]
fn decode_key(encoded: &str) -> Result<StoreKey> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| AuthError::CorruptedStore)?;
    if bytes.len() != KEY_LEN {
        return Err(AuthError::CorruptedStore);
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(StoreKey::from_bytes(key))
}

/// Derive the store key from a passphrase with Argon2id
async fn derive_from_passphrase(
    meta: &mut StoreMeta,
    secrets: &Arc<dyn SecretProvider>,
) -> Result<StoreKey> {
    let salt = match &meta.passphrase_salt {
        Some(salt_b64) => STANDARD
            .decode(salt_b64)
            .map_err(|_| AuthError::CorruptedStore)?,
        None => {
            let mut salt = vec![0u8; SALT_LEN];
            getrandom::fill(&mut salt)
                .map_err(|e| AuthError::Crypto(format!("rng failure: {}", e)))?;
            meta.passphrase_salt = Some(STANDARD.encode(&salt));
            salt
        }
    };

    let passphrase = secrets
        .get_passphrase("Enter passphrase to unlock the token store")
        .await
        .ok_or(AuthError::SecretUnavailable)?;

    // m=64MB, t=3, p=1
    let params = Params::new(65536, 3, 1, Some(KEY_LEN))
        .map_err(|e| AuthError::Crypto(format!("invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let salt_string = SaltString::encode_b64(&salt)
        .map_err(|e| AuthError::Crypto(format!("invalid salt: {}", e)))?;

    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt_string)
        .map_err(|e| AuthError::Crypto(format!("key derivation failed: {}", e)))?;

    let output = hash
        .hash
        .ok_or_else(|| AuthError::Crypto("Argon2 produced no output".to_string()))?;
    if output.len() != KEY_LEN {
        return Err(AuthError::Crypto(format!(
            "expected {} key bytes, got {}",
            KEY_LEN,
            output.len()
        )));
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(output.as_bytes());
    debug!("derived store key from passphrase");
    Ok(StoreKey::from_bytes(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::StaticSecretProvider;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = StoreKey::generate().unwrap();
        let sealed = seal(&key, b"token entry", "entra.token.r").unwrap();
        let opened = open(&key, &sealed, "entra.token.r").unwrap();
        assert_eq!(opened, b"token entry");
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = StoreKey::generate().unwrap();
        let key2 = StoreKey::generate().unwrap();
        let sealed = seal(&key1, b"data", "k").unwrap();
        assert!(matches!(
            open(&key2, &sealed, "k"),
            Err(AuthError::CorruptedStore)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = StoreKey::generate().unwrap();
        let mut sealed = seal(&key, b"data", "k").unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        sealed.ciphertext = URL_SAFE_NO_PAD.encode(bytes);

        assert!(matches!(
            open(&key, &sealed, "k"),
            Err(AuthError::CorruptedStore)
        ));
    }

    #[test]
    fn test_value_bound_to_cache_key() {
        let key = StoreKey::generate().unwrap();
        let sealed = seal(&key, b"data", "entra.token.r1").unwrap();
        assert!(matches!(
            open(&key, &sealed, "entra.token.r2"),
            Err(AuthError::CorruptedStore)
        ));
    }

    #[tokio::test]
    async fn test_passphrase_derivation_is_deterministic() {
        let secrets: Arc<dyn SecretProvider> = Arc::new(StaticSecretProvider::new("hunter2"));
        let mut meta = StoreMeta::default();

        let first = derive_from_passphrase(&mut meta, &secrets).await.unwrap();
        assert!(meta.passphrase_salt.is_some());
        let second = derive_from_passphrase(&mut meta, &secrets).await.unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[tokio::test]
    async fn test_no_passphrase_is_an_error() {
        let secrets: Arc<dyn SecretProvider> = Arc::new(crate::secret::NoSecretProvider);
        let mut meta = StoreMeta::default();
        assert!(matches!(
            derive_from_passphrase(&mut meta, &secrets).await,
            Err(AuthError::SecretUnavailable)
        ));
    }
}
