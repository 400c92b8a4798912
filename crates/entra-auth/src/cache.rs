use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{params, DEFAULT_EXPIRES_IN_SECS};
use crate::correlator::{RequestInfo, RequestType};
use crate::errors::{AuthError, Result};
use crate::models::{TokenEntry, User};
use crate::storage::Storage;

/// Namespace prefix of every key the cache writes
const KEY_NAMESPACE: &str = "entra.";
/// Serialized [`TokenEntry`] per resource
const TOKEN_KEY_PREFIX: &str = "entra.token.";
/// Raw identity token of the signed-in user
const ID_TOKEN_KEY: &str = "entra.idtoken";
/// Nonce issued with the most recent login request
const NONCE_KEY: &str = "entra.nonce.idtoken";
const ERROR_KEY: &str = "entra.error";
const ERROR_DESCRIPTION_KEY: &str = "entra.error.description";

/// Keyed token store over the pluggable storage backend
///
/// Holds no flow logic; its job is key derivation, expiry computation, and
/// the serialization format of stored entries.
#[derive(Clone)]
pub struct TokenCache {
    storage: Arc<dyn Storage>,
    expire_offset: chrono::Duration,
}

impl TokenCache {
    pub fn new(storage: Arc<dyn Storage>, expire_offset_seconds: u64) -> Self {
        Self {
            storage,
            expire_offset: chrono::Duration::seconds(expire_offset_seconds as i64),
        }
    }

    fn token_key(resource: &str) -> String {
        format!("{}{}", TOKEN_KEY_PREFIX, resource)
    }

    /// Cached token for a resource, or None when absent or no longer valid
    ///
    /// A malformed entry counts as a miss. Never returns a stale token.
    pub async fn token_for_resource(&self, resource: &str) -> Option<String> {
        let raw = self.storage.get(&Self::token_key(resource)).await?;
        let entry: TokenEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(resource, "discarding malformed cache entry: {}", e);
                return None;
            }
        };
        if !entry.is_valid_at(Utc::now(), self.expire_offset) {
            debug!(resource, "cached token expired or unusable");
            return None;
        }
        entry.token
    }

    /// User parsed from the cached identity token, if one is cached
    pub async fn cached_user(&self) -> Option<User> {
        let raw = self.storage.get(ID_TOKEN_KEY).await?;
        match User::from_id_token(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("discarding unparseable cached identity token: {}", e);
                None
            }
        }
    }

    pub(crate) async fn store_entry(&self, entry: &TokenEntry) -> Result<()> {
        let value = serde_json::to_string(entry)?;
        self.storage.set(&Self::token_key(&entry.resource), &value).await
    }

    /// Remember the nonce issued with a login request for later validation
    pub(crate) async fn record_login_nonce(&self, nonce: &str) -> Result<()> {
        self.storage.set(NONCE_KEY, nonce).await
    }

    pub(crate) async fn record_error(&self, error: &str, description: &str) -> Result<()> {
        self.storage.set(ERROR_KEY, error).await?;
        self.storage.set(ERROR_DESCRIPTION_KEY, description).await
    }

    /// Most recent recorded login failure, kept until the next login attempt
    pub async fn login_error(&self) -> Option<String> {
        match self.storage.get(ERROR_DESCRIPTION_KEY).await {
            Some(description) if !description.is_empty() => Some(description),
            _ => self.storage.get(ERROR_KEY).await,
        }
    }

    pub(crate) async fn clear_login_error(&self) -> Result<()> {
        self.storage.remove(ERROR_KEY).await?;
        self.storage.remove(ERROR_DESCRIPTION_KEY).await
    }

    /// Persist the result carried by a validated callback
    ///
    /// An access token is stored under the renewed resource; an identity
    /// token updates the signed-in user and is cached under the login
    /// resource; an error parameter is recorded and surfaced as
    /// [`AuthError::Provider`].
    pub async fn save_token_from_hash(
        &self,
        info: &RequestInfo,
        resource: &str,
        login_resource: &str,
    ) -> Result<String> {
        let parameters = &info.parameters;

        if let Some(error) = parameters.get(params::ERROR) {
            let description = parameters
                .get(params::ERROR_DESCRIPTION)
                .cloned()
                .unwrap_or_else(|| error.clone());
            warn!(error, description, "authorization callback carried an error");
            self.record_error(error, &description).await?;
            if info.request_type == RequestType::RenewToken {
                self.store_entry(&TokenEntry::failed(resource, &description)).await?;
            }
            return Err(AuthError::Provider {
                error: error.clone(),
                description,
            });
        }

        if let Some(token) = parameters.get(params::ACCESS_TOKEN) {
            let expires_in = parameters
                .get(params::EXPIRES_IN)
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
            self.store_entry(&TokenEntry::new(resource, token, expires_in)).await?;
            debug!(resource, "cached access token from callback");
            return Ok(token.clone());
        }

        if let Some(raw) = parameters.get(params::ID_TOKEN) {
            let user = match User::from_id_token(raw) {
                Ok(user) => user,
                Err(e) => {
                    self.record_error("invalid_id_token", &e.to_string()).await?;
                    return Err(e);
                }
            };
            if let Some(expected) = self.storage.get(NONCE_KEY).await
                && user.profile.nonce.as_deref() != Some(expected.as_str())
            {
                self.record_error("nonce_mismatch", "id_token nonce does not match login request")
                    .await?;
                return Err(AuthError::NonceMismatch);
            }

            self.storage.set(ID_TOKEN_KEY, raw).await?;
            let expires_at = user
                .profile
                .expires_at()
                .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(DEFAULT_EXPIRES_IN_SECS));
            self.store_entry(&TokenEntry::with_expiry(login_resource, raw.as_str(), expires_at))
                .await?;
            debug!(user = %user.user_name, "cached identity token from callback");
            return Ok(raw.clone());
        }

        Err(AuthError::InvalidCallback)
    }

    /// Remove every cache entry; safe to call repeatedly
    pub async fn clear(&self) -> Result<()> {
        for key in self.storage.keys().await {
            if key.starts_with(KEY_NAMESPACE) {
                self.storage.remove(&key).await?;
            }
        }
        Ok(())
    }

    /// Remove only the entry cached for one resource
    pub async fn clear_resource(&self, resource: &str) -> Result<()> {
        self.storage.remove(&Self::token_key(resource)).await
    }
}
