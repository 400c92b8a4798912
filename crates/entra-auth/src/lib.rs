//! Implicit-flow authentication context for Entra ID (Azure AD) style
//! authorities
//!
//! This crate drives browser-style OAuth2/OIDC implicit-flow sign-in without
//! touching the network itself: the host supplies navigation and storage,
//! and tokens come back as redirect URL fragments.
//!
//! # Authentication Flow
//!
//! 1. `login()` builds an authorization URL, registers the expected state,
//!    and sends the top-level context there
//! 2. The authority redirects back with an `id_token` (or error) in the URL
//!    fragment, which the host hands to `handle_callback()`
//! 3. `acquire_token(resource)` serves cached tokens, or renews silently
//!    through a hidden navigation surface with `prompt=none`
//! 4. Renewals that never complete fail with a timeout instead of hanging
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use entra_auth::{AuthConfig, AuthContext, MemoryStorage, Navigator};
//! use url::Url;
//!
//! struct Redirect;
//!
//! #[async_trait::async_trait]
//! impl Navigator for Redirect {
//!     async fn navigate(&self, url: Url) -> entra_auth::Result<()> {
//!         println!("-> {}", url);
//!         Ok(())
//!     }
//!
//!     async fn open_hidden(&self, url: Url) -> entra_auth::Result<()> {
//!         println!("(hidden) -> {}", url);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = AuthConfig::new("your-client-id");
//!     config.redirect_uri = Some("https://localhost/callback".to_string());
//!
//!     let ctx = AuthContext::with_storage(
//!         config,
//!         Arc::new(MemoryStorage::new()),
//!         Arc::new(Redirect),
//!     )?;
//!
//!     // Send the user to the authority...
//!     ctx.login().await?;
//!
//!     // ...and hand the redirect fragment back when it arrives.
//!     ctx.handle_callback("#id_token=...&state=...").await?;
//!
//!     if let Some(user) = ctx.cached_user().await {
//!         println!("signed in as {}", user.user_name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Token Storage
//!
//! Cached tokens live behind the [`Storage`] trait. [`MemoryStorage`] covers
//! session-scoped caching and tests:
//!
//! ```
//! use entra_auth::{MemoryStorage, Storage};
//!
//! # async fn example() -> entra_auth::Result<()> {
//! let storage = MemoryStorage::new();
//! storage.set("entra.idtoken", "raw-token").await?;
//! assert_eq!(storage.get("entra.idtoken").await.as_deref(), Some("raw-token"));
//! # Ok(())
//! # }
//! # tokio_test::block_on(example()).unwrap();
//! ```
//!
//! [`FileStorage`] persists entries sealed with AES-256-GCM, keeping the
//! store key in the OS keyring with an Argon2id passphrase fallback via
//! [`SecretProvider`].
//!
//! # Important Notes
//!
//! - The context never verifies token signatures; that belongs to the
//!   authority and the resource server
//! - Tokens are sensitive: pick [`FileStorage`] (or an equivalent sealed
//!   store) for anything that outlives the process, and never log them
//! - Concurrent `acquire_token` calls for one resource share a single
//!   renewal round-trip

pub mod cache;
pub mod config;
pub mod context;
pub mod correlator;
pub mod crypto;
pub mod errors;
pub mod file_storage;
pub mod models;
pub mod navigator;
pub mod secret;
pub mod storage;

// Re-export main types
pub use cache::TokenCache;
pub use config::{AuthConfig, CacheLocation};
pub use context::{AuthContext, PendingToken};
pub use correlator::{is_auth_callback, parse_fragment, RequestInfo, RequestType};
pub use crypto::StoreKey;
pub use errors::{AuthError, Result};
pub use file_storage::FileStorage;
pub use models::{IdTokenClaims, TokenEntry, User};
pub use navigator::Navigator;
pub use secret::{NoSecretProvider, SecretProvider, StaticSecretProvider};
pub use storage::{MemoryStorage, Storage};
