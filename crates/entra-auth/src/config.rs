use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::errors::{AuthError, Result};

/// Public-cloud authority instance used when none is configured
pub const DEFAULT_INSTANCE: &str = "https://login.microsoftonline.com/";

/// Tenant used when none is configured
pub const DEFAULT_TENANT: &str = "common";

/// Treat a token as expired this many seconds before its recorded expiry
pub const DEFAULT_EXPIRE_OFFSET_SECS: u64 = 300;

/// Bound on a hidden renewal round-trip
pub const DEFAULT_RENEW_TIMEOUT_SECS: u64 = 6;

/// Token lifetime assumed when the callback carries no expires_in
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Parameter names of the redirect callback fragment
pub mod params {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const ID_TOKEN: &str = "id_token";
    pub const EXPIRES_IN: &str = "expires_in";
    pub const ERROR: &str = "error";
    pub const ERROR_DESCRIPTION: &str = "error_description";
    pub const STATE: &str = "state";
}

/// Which scope of the host's key-value storage cached tokens land in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLocation {
    /// Cleared when the hosting session ends
    #[default]
    Session,
    /// Survives across sessions
    Persistent,
}

/// Configuration for an authentication context
///
/// Deserializable from a loose configuration record; unknown or absent
/// fields fall back to defaults and `client_id` is validated at context
/// construction. Immutable once the context is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Application (client) id registered with the authority
    pub client_id: String,

    /// Directory tenant, `common` when unset
    pub tenant: String,

    /// Authority instance base URL
    pub instance: String,

    /// URI the authority redirects back to after authorization
    pub redirect_uri: Option<String>,

    /// URI the authority redirects to after logout
    pub post_logout_redirect_uri: Option<String>,

    /// Storage scope the host should back the cache with
    pub cache_location: CacheLocation,

    /// Seconds subtracted from recorded expiry when judging validity
    pub expire_offset_seconds: u64,

    /// Seconds a hidden renewal may stay pending before it fails
    pub renew_timeout_seconds: u64,

    /// Endpoint-prefix to resource-URI mapping for CORS API calls
    pub endpoints: HashMap<String, String>,

    /// URL fragments exempt from token attachment
    pub anonymous_endpoints: Vec<String>,

    /// Raw query string appended to every authorization request
    pub extra_query_parameter: Option<String>,

    /// Correlation id attached to authorization requests, generated when unset
    pub correlation_id: Option<Uuid>,

    /// Extra state payload appended to generated login state
    pub state: Option<String>,

    /// App-local page to navigate to instead of the authority's login page
    pub local_login_url: Option<String>,

    /// Resource the login id_token is cached under, `client_id` when unset
    pub login_resource: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            tenant: DEFAULT_TENANT.to_string(),
            instance: DEFAULT_INSTANCE.to_string(),
            redirect_uri: None,
            post_logout_redirect_uri: None,
            cache_location: CacheLocation::default(),
            expire_offset_seconds: DEFAULT_EXPIRE_OFFSET_SECS,
            renew_timeout_seconds: DEFAULT_RENEW_TIMEOUT_SECS,
            endpoints: HashMap::new(),
            anonymous_endpoints: Vec::new(),
            extra_query_parameter: None,
            correlation_id: None,
            state: None,
            local_login_url: None,
            login_resource: None,
        }
    }
}

impl AuthConfig {
    /// Create a config for the given client id with default authority
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Check that the config can back network-facing operations
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::MissingClientId);
        }
        self.authority()?;
        Ok(())
    }

    /// Effective authority URL, instance plus tenant
    pub fn authority(&self) -> Result<Url> {
        Ok(Url::parse(&self.authority_base())?)
    }

    /// Authorization endpoint under the effective authority
    pub fn authorize_endpoint(&self) -> Result<Url> {
        Ok(Url::parse(&format!("{}/oauth2/authorize", self.authority_base()))?)
    }

    /// Logout endpoint under the effective authority
    pub fn logout_endpoint(&self) -> Result<Url> {
        Ok(Url::parse(&format!("{}/oauth2/logout", self.authority_base()))?)
    }

    /// Resource the login id_token is cached under
    pub fn login_resource(&self) -> &str {
        self.login_resource.as_deref().unwrap_or(&self.client_id)
    }

    pub fn expire_offset(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expire_offset_seconds as i64)
    }

    pub fn renew_timeout(&self) -> Duration {
        Duration::from_secs(self.renew_timeout_seconds)
    }

    /// True when the endpoint is configured to receive no token
    pub fn is_anonymous_endpoint(&self, endpoint: &str) -> bool {
        self.anonymous_endpoints
            .iter()
            .any(|fragment| endpoint.contains(fragment.as_str()))
    }

    /// Resource required for an API endpoint, if any
    ///
    /// Anonymous endpoints map to no resource. Configured endpoint prefixes
    /// map to their resource URI. Relative endpoints and endpoints under the
    /// redirect URI's origin belong to the app backend and map to the login
    /// resource. Unmapped cross-origin endpoints map to no resource.
    pub fn resource_for_endpoint(&self, endpoint: &str) -> Option<String> {
        if self.is_anonymous_endpoint(endpoint) {
            return None;
        }
        for (prefix, resource) in &self.endpoints {
            if endpoint.contains(prefix.as_str()) {
                return Some(resource.clone());
            }
        }
        if !endpoint.starts_with("http") {
            return Some(self.login_resource().to_string());
        }
        if let Some(redirect) = &self.redirect_uri
            && let (Ok(endpoint_url), Ok(redirect_url)) = (Url::parse(endpoint), Url::parse(redirect))
            && endpoint_url.origin() == redirect_url.origin()
        {
            return Some(self.login_resource().to_string());
        }
        None
    }

    fn authority_base(&self) -> String {
        let instance = if self.instance.ends_with('/') {
            self.instance.clone()
        } else {
            format!("{}/", self.instance)
        };
        format!("{}{}", instance, self.tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_authority() {
        let config = AuthConfig::new("abc");
        assert_eq!(
            config.authority().unwrap().as_str(),
            "https://login.microsoftonline.com/common"
        );
    }

    #[test]
    fn test_custom_instance_and_tenant() {
        let mut config = AuthConfig::new("abc");
        config.instance = "https://login.microsoftonline.de".to_string();
        config.tenant = "contoso.onmicrosoft.com".to_string();
        assert_eq!(
            config.authorize_endpoint().unwrap().as_str(),
            "https://login.microsoftonline.de/contoso.onmicrosoft.com/oauth2/authorize"
        );
    }

    #[test]
    fn test_missing_client_id_rejected() {
        let config = AuthConfig::default();
        assert!(matches!(config.validate(), Err(AuthError::MissingClientId)));

        let blank = AuthConfig::new("   ");
        assert!(matches!(blank.validate(), Err(AuthError::MissingClientId)));
    }

    #[test]
    fn test_login_resource_defaults_to_client_id() {
        let mut config = AuthConfig::new("abc");
        assert_eq!(config.login_resource(), "abc");
        config.login_resource = Some("https://graph.example.com".to_string());
        assert_eq!(config.login_resource(), "https://graph.example.com");
    }

    #[test]
    fn test_resource_for_mapped_endpoint() {
        let mut config = AuthConfig::new("abc");
        config.endpoints.insert(
            "https://api.example.com".to_string(),
            "https://api.example.com/resource".to_string(),
        );
        assert_eq!(
            config.resource_for_endpoint("https://api.example.com/items/1"),
            Some("https://api.example.com/resource".to_string())
        );
    }

    #[test]
    fn test_anonymous_endpoint_gets_no_resource() {
        let mut config = AuthConfig::new("abc");
        config.endpoints.insert(
            "https://api.example.com".to_string(),
            "https://api.example.com/resource".to_string(),
        );
        config.anonymous_endpoints.push("/public/".to_string());
        assert_eq!(
            config.resource_for_endpoint("https://api.example.com/public/info"),
            None
        );
    }

    #[test]
    fn test_relative_endpoint_maps_to_login_resource() {
        let config = AuthConfig::new("abc");
        assert_eq!(
            config.resource_for_endpoint("/api/todo"),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_same_origin_endpoint_maps_to_login_resource() {
        let mut config = AuthConfig::new("abc");
        config.redirect_uri = Some("https://app.example.com/callback".to_string());
        assert_eq!(
            config.resource_for_endpoint("https://app.example.com/api/todo"),
            Some("abc".to_string())
        );
        assert_eq!(config.resource_for_endpoint("https://other.example.com/api"), None);
    }

    #[test]
    fn test_deserializes_from_sparse_record() {
        let config: AuthConfig = serde_json::from_str(r#"{"client_id": "abc"}"#).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.tenant, DEFAULT_TENANT);
        assert_eq!(config.expire_offset_seconds, DEFAULT_EXPIRE_OFFSET_SECS);
        assert_eq!(config.cache_location, CacheLocation::Session);
        assert!(config.validate().is_ok());
    }
}
