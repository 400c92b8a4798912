use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::params;
use crate::errors::{AuthError, Result};

/// How a callback fragment relates to an in-flight authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Login,
    RenewToken,
    Unknown,
}

/// Ephemeral view of a redirect callback fragment
///
/// Produced per callback, consumed immediately, never persisted.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Fragment carries a recognized parameter set
    pub valid: bool,
    pub parameters: HashMap<String, String>,
    /// Returned state matches a currently pending request
    pub state_match: bool,
    pub state_response: Option<String>,
    pub request_type: RequestType,
}

/// Parse a redirect fragment into its parameter map
///
/// Accepts an optional leading `#` or `#/` the way hosting pages deliver it.
pub fn parse_fragment(fragment: &str) -> HashMap<String, String> {
    let trimmed = fragment
        .strip_prefix('#')
        .map(|rest| rest.strip_prefix('/').unwrap_or(rest))
        .unwrap_or(fragment);
    url::form_urlencoded::parse(trimmed.as_bytes())
        .into_owned()
        .collect()
}

/// Fast pre-check: does the fragment look like an authorization callback?
pub fn is_auth_callback(fragment: &str) -> bool {
    let parameters = parse_fragment(fragment);
    parameters.contains_key(params::ACCESS_TOKEN)
        || parameters.contains_key(params::ID_TOKEN)
        || parameters.contains_key(params::ERROR_DESCRIPTION)
}

/// Classify parsed callback parameters against the pending registry
pub(crate) fn evaluate(
    parameters: HashMap<String, String>,
    pending: &PendingRequests,
) -> RequestInfo {
    let valid = parameters.contains_key(params::ACCESS_TOKEN)
        || parameters.contains_key(params::ID_TOKEN)
        || parameters.contains_key(params::ERROR)
        || parameters.contains_key(params::ERROR_DESCRIPTION)
        || parameters.contains_key(params::STATE);
    let state_response = parameters.get(params::STATE).cloned();
    let request_type = state_response
        .as_deref()
        .map(|state| pending.request_type(state))
        .unwrap_or(RequestType::Unknown);
    RequestInfo {
        valid,
        parameters,
        state_match: request_type != RequestType::Unknown,
        state_response,
        request_type,
    }
}

/// Completion value of an authorization round-trip, fanned out to waiters
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Token(String),
    Failed { error: String, description: String },
    TimedOut(Duration),
}

impl Outcome {
    pub(crate) fn into_result(self) -> Result<String> {
        match self {
            Outcome::Token(token) => Ok(token),
            Outcome::Failed { error, description } => {
                Err(AuthError::Provider { error, description })
            }
            Outcome::TimedOut(timeout) => Err(AuthError::RenewTimeout(timeout)),
        }
    }
}

pub(crate) type Waiter = oneshot::Sender<Result<String>>;

/// One in-flight authorization round-trip
pub(crate) struct PendingRequest {
    pub resource: String,
    pub request_type: RequestType,
    waiters: Vec<Waiter>,
}

/// Registry tying expected state values to their in-flight requests
///
/// Owned and written only by the flow orchestrator. States are unique keys,
/// so concurrent waiters for one round-trip share a single entry.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: HashMap<String, PendingRequest>,
    /// Resource currently under renewal, for coalescing duplicate acquires
    renewals: HashMap<String, String>,
}

impl PendingRequests {
    /// Register a new expected state; reuse of a pending state is a caller error
    pub fn register(&mut self, state: &str, resource: &str, request_type: RequestType) -> Result<()> {
        if self.entries.contains_key(state) {
            return Err(AuthError::StateCollision(state.to_string()));
        }
        self.entries.insert(
            state.to_string(),
            PendingRequest {
                resource: resource.to_string(),
                request_type,
                waiters: Vec::new(),
            },
        );
        if request_type == RequestType::RenewToken {
            self.renewals.insert(resource.to_string(), state.to_string());
        }
        debug!(state, resource, ?request_type, "registered pending request");
        Ok(())
    }

    /// Attach a waiter to an existing entry; false if the state is not pending
    pub fn attach_waiter(&mut self, state: &str, waiter: Waiter) -> bool {
        match self.entries.get_mut(state) {
            Some(entry) => {
                entry.waiters.push(waiter);
                true
            }
            None => false,
        }
    }

    /// State of the renewal currently in flight for a resource, if any
    pub fn renewal_state(&self, resource: &str) -> Option<String> {
        self.renewals.get(resource).cloned()
    }

    pub fn request_type(&self, state: &str) -> RequestType {
        self.entries
            .get(state)
            .map(|entry| entry.request_type)
            .unwrap_or(RequestType::Unknown)
    }

    pub fn entry_meta(&self, state: &str) -> Option<(String, RequestType)> {
        self.entries
            .get(state)
            .map(|entry| (entry.resource.clone(), entry.request_type))
    }

    /// Resolve and remove a pending entry, fanning the outcome to all waiters
    ///
    /// Returns the entry's metadata, or None when the state was already
    /// resolved - which makes timeout and callback resolution race-safe.
    pub fn resolve(&mut self, state: &str, outcome: &Outcome) -> Option<(String, RequestType)> {
        let entry = self.entries.remove(state)?;
        if self.renewals.get(&entry.resource).map(String::as_str) == Some(state) {
            self.renewals.remove(&entry.resource);
        }
        for waiter in entry.waiters {
            if waiter.send(outcome.clone().into_result()).is_err() {
                warn!(state, "pending waiter dropped before resolution");
            }
        }
        Some((entry.resource, entry.request_type))
    }

    /// Drop every pending entry; outstanding waiters observe abandonment
    pub fn clear(&mut self) {
        self.entries.clear();
        self.renewals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment_strips_prefix() {
        for fragment in [
            "access_token=T&state=S",
            "#access_token=T&state=S",
            "#/access_token=T&state=S",
        ] {
            let parameters = parse_fragment(fragment);
            assert_eq!(parameters.get("access_token").map(String::as_str), Some("T"));
            assert_eq!(parameters.get("state").map(String::as_str), Some("S"));
        }
    }

    #[test]
    fn test_parse_fragment_percent_decodes() {
        let parameters = parse_fragment("#error_description=AADSTS50058%3A+silent+sign-in+failed");
        assert_eq!(
            parameters.get("error_description").map(String::as_str),
            Some("AADSTS50058: silent sign-in failed")
        );
    }

    #[test]
    fn test_is_auth_callback() {
        assert!(is_auth_callback("#access_token=T"));
        assert!(is_auth_callback("#id_token=T"));
        assert!(is_auth_callback("#error_description=denied"));
        assert!(!is_auth_callback("#route=/home"));
        assert!(!is_auth_callback(""));
    }

    #[test]
    fn test_evaluate_matches_pending_state() {
        let mut pending = PendingRequests::default();
        pending
            .register("S1|https://r", "https://r", RequestType::RenewToken)
            .unwrap();

        let info = evaluate(parse_fragment("#access_token=T&state=S1%7Chttps%3A%2F%2Fr"), &pending);
        assert!(info.valid);
        assert!(info.state_match);
        assert_eq!(info.request_type, RequestType::RenewToken);
        assert_eq!(info.state_response.as_deref(), Some("S1|https://r"));
    }

    #[test]
    fn test_evaluate_flags_unknown_state() {
        let pending = PendingRequests::default();
        let info = evaluate(parse_fragment("#access_token=T&state=forged"), &pending);
        assert!(info.valid);
        assert!(!info.state_match);
        assert_eq!(info.request_type, RequestType::Unknown);
    }

    #[test]
    fn test_register_collision_is_an_error() {
        let mut pending = PendingRequests::default();
        pending.register("S", "r1", RequestType::Login).unwrap();
        assert!(matches!(
            pending.register("S", "r2", RequestType::Login),
            Err(AuthError::StateCollision(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_fans_out_to_all_waiters() {
        let mut pending = PendingRequests::default();
        pending.register("S", "r", RequestType::RenewToken).unwrap();

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        assert!(pending.attach_waiter("S", tx1));
        assert!(pending.attach_waiter("S", tx2));

        let meta = pending.resolve("S", &Outcome::Token("T".to_string()));
        assert_eq!(meta, Some(("r".to_string(), RequestType::RenewToken)));
        assert_eq!(rx1.await.unwrap().unwrap(), "T");
        assert_eq!(rx2.await.unwrap().unwrap(), "T");

        // second resolution is a no-op
        assert!(pending.resolve("S", &Outcome::Token("T".to_string())).is_none());
        assert!(pending.renewal_state("r").is_none());
    }

    #[tokio::test]
    async fn test_timeout_outcome_surfaces_as_error() {
        let mut pending = PendingRequests::default();
        pending.register("S", "r", RequestType::RenewToken).unwrap();
        let (tx, rx) = oneshot::channel();
        pending.attach_waiter("S", tx);

        pending.resolve("S", &Outcome::TimedOut(Duration::from_secs(6)));
        assert!(matches!(rx.await.unwrap(), Err(AuthError::RenewTimeout(_))));
    }
}
