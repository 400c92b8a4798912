use std::time::Duration;

use thiserror::Error;

/// Authentication context error types
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("client_id must be configured before any authorization request")]
    MissingClientId,

    #[error("resource is required")]
    ResourceRequired,

    #[error("login is already in progress")]
    LoginInProgress,

    #[error("callback state matches no pending request - possible CSRF or stale reply")]
    StateMismatch,

    #[error("a request is already pending for state '{0}'")]
    StateCollision(String),

    #[error("id_token nonce does not round-trip the value issued at login")]
    NonceMismatch,

    #[error("identity provider returned {error}: {description}")]
    Provider { error: String, description: String },

    #[error("token renewal timed out after {0:?}")]
    RenewTimeout(Duration),

    #[error("pending request was abandoned before a callback arrived")]
    Abandoned,

    #[error("callback fragment carries no recognized parameters")]
    InvalidCallback,

    #[error("no signed-in user in the cache")]
    NoCachedUser,

    #[error("malformed token: {0}")]
    InvalidToken(String),

    #[error("storage backend error: {0}")]
    Storage(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("stored data failed authentication or is corrupted")]
    CorruptedStore,

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("token store is locked by another process")]
    LockTimeout,

    #[error("passphrase entry was cancelled or unavailable")]
    SecretUnavailable,

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;
