use url::Url;

use crate::errors::Result;

/// Host-supplied navigation surface
///
/// The context never performs navigation itself; the host decides how a URL
/// reaches the authority - a top-level redirect, an embedded view, or a
/// custom display hook. Completion always comes back later through
/// [`crate::AuthContext::handle_callback`] with the redirect fragment.
#[async_trait::async_trait]
pub trait Navigator: Send + Sync {
    /// Send the visible top-level context to an authorization or logout URL
    async fn navigate(&self, url: Url) -> Result<()>;

    /// Load a renewal URL in a hidden surface, leaving the visible page alone
    async fn open_hidden(&self, url: Url) -> Result<()>;
}
