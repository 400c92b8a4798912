use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::cache::TokenCache;
use crate::config::{AuthConfig, CacheLocation};
use crate::correlator::{self, Outcome, PendingRequests, RequestInfo, RequestType};
use crate::errors::{AuthError, Result};
use crate::file_storage::FileStorage;
use crate::models::User;
use crate::navigator::Navigator;
use crate::secret::NoSecretProvider;
use crate::storage::{MemoryStorage, Storage};

/// Authentication context driving login, silent renewal, and logout
///
/// Owns all per-session flow state: the pending-request registry, the
/// login-in-progress flag, and the token cache. Collaborators (storage and
/// navigation) are supplied by the host; the context itself never touches
/// the network.
pub struct AuthContext {
    config: AuthConfig,
    correlation_id: Uuid,
    cache: TokenCache,
    navigator: Arc<dyn Navigator>,
    pending: Arc<Mutex<PendingRequests>>,
    login_in_progress: AtomicBool,
}

/// Handle to a pending authorization round-trip
pub struct PendingToken {
    rx: oneshot::Receiver<Result<String>>,
}

impl PendingToken {
    /// Wait for the matching callback (or the renewal timeout) to resolve
    pub async fn wait(self) -> Result<String> {
        self.rx.await.unwrap_or(Err(AuthError::Abandoned))
    }
}

impl AuthContext {
    /// Create a context with storage chosen by the configured cache location
    ///
    /// `Session` is backed by an in-memory store, `Persistent` by the
    /// keyring-sealed file store in the platform config directory.
    pub async fn new(config: AuthConfig, navigator: Arc<dyn Navigator>) -> Result<Self> {
        config.validate()?;
        let storage: Arc<dyn Storage> = match config.cache_location {
            CacheLocation::Session => Arc::new(MemoryStorage::new()),
            CacheLocation::Persistent => Arc::new(
                FileStorage::new(
                    FileStorage::default_storage_dir()?,
                    Arc::new(NoSecretProvider),
                )
                .await?,
            ),
        };
        Self::with_storage(config, storage, navigator)
    }

    /// Create a context over a host-supplied store
    pub fn with_storage(
        config: AuthConfig,
        storage: Arc<dyn Storage>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        config.validate()?;
        let correlation_id = config.correlation_id.unwrap_or_else(Uuid::new_v4);
        let cache = TokenCache::new(storage, config.expire_offset_seconds);
        Ok(Self {
            config,
            correlation_id,
            cache,
            navigator,
            pending: Arc::new(Mutex::new(PendingRequests::default())),
            login_in_progress: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start an interactive login round-trip
    ///
    /// Registers the expected state, then sends the top-level context to the
    /// authorization endpoint (or the configured local login page). The
    /// result is observed after [`Self::handle_callback`] via
    /// [`Self::cached_user`] and [`Self::login_error`].
    #[instrument(skip(self))]
    pub async fn login(&self) -> Result<()> {
        if self.login_in_progress.swap(true, Ordering::SeqCst) {
            return Err(AuthError::LoginInProgress);
        }
        let result = self.start_login().await;
        if result.is_err() {
            self.login_in_progress.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn start_login(&self) -> Result<()> {
        self.cache.clear_login_error().await?;

        let state = match &self.config.state {
            Some(extra) => format!("{}|{}", Uuid::new_v4(), extra),
            None => Uuid::new_v4().to_string(),
        };
        let nonce = Uuid::new_v4().to_string();
        self.cache.record_login_nonce(&nonce).await?;

        {
            let mut pending = self.pending.lock().await;
            pending.register(&state, self.config.login_resource(), RequestType::Login)?;
        }

        let url = match &self.config.local_login_url {
            Some(local) => Url::parse(local)?,
            None => {
                self.authorize_url("id_token", None, &state, Some(&nonce), false)
                    .await?
            }
        };
        debug!(%url, "navigating to login");
        self.navigator.navigate(url).await
    }

    /// True between a `login()` call and its callback
    pub fn login_in_progress(&self) -> bool {
        self.login_in_progress.load(Ordering::SeqCst)
    }

    /// Acquire a token for a resource, renewing silently on a cache miss
    ///
    /// A valid cached token resolves immediately with no navigation. On a
    /// miss, a hidden renewal surface is opened and the call completes when
    /// its callback arrives or the renewal timeout fires. Concurrent calls
    /// for a resource already under renewal attach to the in-flight request
    /// instead of opening a second surface.
    #[instrument(skip(self))]
    pub async fn acquire_token(&self, resource: &str) -> Result<String> {
        if resource.trim().is_empty() {
            return Err(AuthError::ResourceRequired);
        }
        if let Some(token) = self.cache.token_for_resource(resource).await {
            debug!(resource, "serving token from cache");
            return Ok(token);
        }

        enum Plan {
            Coalesced(oneshot::Receiver<Result<String>>),
            Fresh(String, oneshot::Receiver<Result<String>>),
        }

        let plan = {
            let mut pending = self.pending.lock().await;
            match pending.renewal_state(resource) {
                Some(state) => {
                    let (tx, rx) = oneshot::channel();
                    pending.attach_waiter(&state, tx);
                    debug!(resource, state, "coalescing with renewal already in flight");
                    Plan::Coalesced(rx)
                }
                None => {
                    let state = format!("{}|{}", Uuid::new_v4(), resource);
                    let (tx, rx) = oneshot::channel();
                    pending.register(&state, resource, RequestType::RenewToken)?;
                    pending.attach_waiter(&state, tx);
                    Plan::Fresh(state, rx)
                }
            }
        };

        let rx = match plan {
            Plan::Coalesced(rx) => rx,
            Plan::Fresh(state, rx) => {
                self.spawn_renew_timeout(state.clone());

                // Renewing the app's own resource means refreshing the
                // session id_token, which needs a fresh nonce.
                let url = if resource == self.config.client_id {
                    let nonce = Uuid::new_v4().to_string();
                    self.cache.record_login_nonce(&nonce).await?;
                    self.authorize_url("id_token", Some(resource), &state, Some(&nonce), true)
                        .await?
                } else {
                    self.authorize_url("token", Some(resource), &state, None, true)
                        .await?
                };

                debug!(resource, state, "opening hidden renewal surface");
                if let Err(e) = self.navigator.open_hidden(url).await {
                    let mut pending = self.pending.lock().await;
                    pending.resolve(
                        &state,
                        &Outcome::Failed {
                            error: "navigation_failed".to_string(),
                            description: e.to_string(),
                        },
                    );
                    return Err(e);
                }
                rx
            }
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Abandoned),
        }
    }

    /// Register interest in a round-trip the host navigates itself
    ///
    /// The expected state must be unique among currently pending requests.
    /// The handle resolves when the matching callback arrives or the renewal
    /// timeout fires.
    pub async fn register_callback(
        &self,
        expected_state: &str,
        resource: &str,
    ) -> Result<PendingToken> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.register(expected_state, resource, RequestType::RenewToken)?;
            pending.attach_waiter(expected_state, tx);
        }
        self.spawn_renew_timeout(expected_state.to_string());
        Ok(PendingToken { rx })
    }

    /// Process a redirect callback fragment
    ///
    /// Validates correlation, hands the result to the token cache, resolves
    /// the matching pending request, and returns the parsed view. A state
    /// that matches no pending request is recorded and rejected; provider
    /// errors are recorded and delivered to waiters, not returned here.
    #[instrument(skip_all)]
    pub async fn handle_callback(&self, fragment: &str) -> Result<RequestInfo> {
        let info = self.request_info(fragment).await;
        if !info.valid {
            return Err(AuthError::InvalidCallback);
        }
        if !info.state_match {
            warn!("callback state matches no pending request");
            self.cache
                .record_error("invalid_state", "callback state matches no pending request")
                .await?;
            return Err(AuthError::StateMismatch);
        }
        let state = info.state_response.clone().unwrap_or_default();

        let meta = {
            let pending = self.pending.lock().await;
            pending.entry_meta(&state)
        };
        // The entry can disappear between parsing and here if the renewal
        // timeout wins the race.
        let Some((resource, request_type)) = meta else {
            return Err(AuthError::StateMismatch);
        };

        if request_type == RequestType::Login {
            self.login_in_progress.store(false, Ordering::SeqCst);
        }

        let outcome = match self
            .cache
            .save_token_from_hash(&info, &resource, self.config.login_resource())
            .await
        {
            Ok(token) => Outcome::Token(token),
            Err(AuthError::Provider { error, description }) => {
                Outcome::Failed { error, description }
            }
            Err(e) => Outcome::Failed {
                error: "invalid_token".to_string(),
                description: e.to_string(),
            },
        };

        {
            let mut pending = self.pending.lock().await;
            pending.resolve(&state, &outcome);
        }
        info!(resource, ?request_type, "authorization callback handled");
        Ok(info)
    }

    /// Parse a redirect fragment and classify it against pending requests
    pub async fn request_info(&self, fragment: &str) -> RequestInfo {
        let pending = self.pending.lock().await;
        correlator::evaluate(correlator::parse_fragment(fragment), &pending)
    }

    /// Fast pre-check: does a fragment look like an authorization callback?
    pub fn is_auth_callback(&self, fragment: &str) -> bool {
        correlator::is_auth_callback(fragment)
    }

    /// Cached token for a resource if present and not expired
    pub async fn cached_token(&self, resource: &str) -> Option<String> {
        self.cache.token_for_resource(resource).await
    }

    /// User parsed from the cached identity token
    pub async fn cached_user(&self) -> Option<User> {
        self.cache.cached_user().await
    }

    /// Signed-in user, or an error when none is cached
    pub async fn user(&self) -> Result<User> {
        self.cache.cached_user().await.ok_or(AuthError::NoCachedUser)
    }

    /// Most recent login failure, kept until the next login attempt
    pub async fn login_error(&self) -> Option<String> {
        self.cache.login_error().await
    }

    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }

    pub async fn clear_cache_for_resource(&self, resource: &str) -> Result<()> {
        self.cache.clear_resource(resource).await
    }

    /// Resource required for an API endpoint, per configured mappings
    pub fn resource_for_endpoint(&self, endpoint: &str) -> Option<String> {
        self.config.resource_for_endpoint(endpoint)
    }

    /// Clear the session and send the top-level context to the logout endpoint
    ///
    /// Terminal for the session: pending requests are dropped and their
    /// waiters observe abandonment.
    #[instrument(skip(self))]
    pub async fn log_out(&self) -> Result<()> {
        self.cache.clear().await?;
        {
            let mut pending = self.pending.lock().await;
            pending.clear();
        }
        self.login_in_progress.store(false, Ordering::SeqCst);

        let mut url = self.config.logout_endpoint()?;
        if let Some(post_logout) = &self.config.post_logout_redirect_uri {
            url.query_pairs_mut()
                .append_pair("post_logout_redirect_uri", post_logout);
        }
        info!("logging out via end-session endpoint");
        self.navigator.navigate(url).await
    }

    /// Build an authorization URL for the effective authority
    async fn authorize_url(
        &self,
        response_type: &str,
        resource: Option<&str>,
        state: &str,
        nonce: Option<&str>,
        silent: bool,
    ) -> Result<Url> {
        let mut url = self.config.authorize_endpoint()?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", response_type)
                .append_pair("client_id", &self.config.client_id);
            if let Some(resource) = resource {
                query.append_pair("resource", resource);
            }
            if let Some(redirect) = &self.config.redirect_uri {
                query.append_pair("redirect_uri", redirect);
            }
            query.append_pair("state", state);
            if let Some(nonce) = nonce {
                query.append_pair("nonce", nonce);
            }
            if silent {
                query.append_pair("prompt", "none");
            }
            query
                .append_pair("client-request-id", &self.correlation_id.to_string())
                .append_pair("x-client-SKU", "rust")
                .append_pair("x-client-Ver", env!("CARGO_PKG_VERSION"));
        }

        if silent && let Some(user) = self.cache.cached_user().await {
            url.query_pairs_mut().append_pair("login_hint", &user.user_name);
        }

        if let Some(extra) = &self.config.extra_query_parameter {
            let pairs: Vec<(String, String)> = url::form_urlencoded::parse(extra.as_bytes())
                .into_owned()
                .collect();
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(&key, &value);
            }
        }

        Ok(url)
    }

    /// Bound a renewal: if its callback never arrives, fail every waiter
    fn spawn_renew_timeout(&self, state: String) {
        let pending = Arc::clone(&self.pending);
        let timeout = self.config.renew_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut pending = pending.lock().await;
            if let Some((resource, _)) = pending.resolve(&state, &Outcome::TimedOut(timeout)) {
                warn!(resource, state, "token renewal timed out");
            }
        });
    }
}
