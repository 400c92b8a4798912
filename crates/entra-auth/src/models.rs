use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AuthError, Result};

/// Claim set carried by an identity token
///
/// Well-known claims get typed fields; everything else stays in the open
/// `extra` map until a caller narrows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IdTokenClaims {
    /// Expiry claim as a timestamp, when present and representable
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

/// Signed-in user derived from a parsed identity token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// UPN claim, falling back to email, then subject
    pub user_name: String,
    pub profile: IdTokenClaims,
}

impl User {
    /// Parse a raw identity token into a user
    pub fn from_id_token(raw: &str) -> Result<Self> {
        let profile = decode_claims(raw)?;
        let user_name = profile
            .upn
            .clone()
            .or_else(|| profile.email.clone())
            .or_else(|| profile.sub.clone())
            .ok_or_else(|| {
                AuthError::InvalidToken("identity token has no upn, email or sub claim".to_string())
            })?;
        Ok(Self { user_name, profile })
    }
}

/// Decode the payload segment of a JWT without verifying its signature
///
/// Signature verification belongs to the authority and the resource server;
/// the cache only needs the claims.
pub fn decode_claims(raw: &str) -> Result<IdTokenClaims> {
    let mut segments = raw.split('.');
    let (Some(_header), Some(payload)) = (segments.next(), segments.next()) else {
        return Err(AuthError::InvalidToken(
            "identity token is not a JWT".to_string(),
        ));
    };
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidToken(format!("invalid payload encoding: {}", e)))?;
    serde_json::from_slice(&decoded)
        .map_err(|e| AuthError::InvalidToken(format!("invalid payload JSON: {}", e)))
}

/// Cached token for a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub resource: String,
    pub token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TokenEntry {
    /// Entry expiring `expires_in` seconds from now
    pub fn new(resource: impl Into<String>, token: impl Into<String>, expires_in: i64) -> Self {
        Self::with_expiry(resource, token, Utc::now() + chrono::Duration::seconds(expires_in))
    }

    pub fn with_expiry(
        resource: impl Into<String>,
        token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            resource: resource.into(),
            token: Some(token.into()),
            expires_at,
            error: None,
        }
    }

    /// Entry recording a failed acquisition for the resource
    pub fn failed(resource: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            token: None,
            expires_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    /// A token is served only while `now + offset` is strictly before expiry
    pub fn is_valid_at(&self, now: DateTime<Utc>, offset: chrono::Duration) -> bool {
        self.error.is_none() && self.token.is_some() && now + offset < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_token(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
        format!("{}.{}.signature", header, body)
    }

    #[test]
    fn test_decode_claims() {
        let token = encode_token(&serde_json::json!({
            "upn": "user@contoso.com",
            "nonce": "n-1",
            "exp": 1_900_000_000i64,
            "tid": "tenant-guid"
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.upn.as_deref(), Some("user@contoso.com"));
        assert_eq!(claims.nonce.as_deref(), Some("n-1"));
        assert!(claims.expires_at().is_some());
        assert_eq!(
            claims.extra.get("tid").and_then(|v| v.as_str()),
            Some("tenant-guid")
        );
    }

    #[test]
    fn test_decode_rejects_non_jwt() {
        assert!(matches!(
            decode_claims("not-a-token"),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            decode_claims("a.%%%.c"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_user_name_fallbacks() {
        let with_upn = encode_token(&serde_json::json!({"upn": "u@c.com", "email": "e@c.com"}));
        assert_eq!(User::from_id_token(&with_upn).unwrap().user_name, "u@c.com");

        let with_email = encode_token(&serde_json::json!({"email": "e@c.com", "sub": "s"}));
        assert_eq!(User::from_id_token(&with_email).unwrap().user_name, "e@c.com");

        let with_sub = encode_token(&serde_json::json!({"sub": "s"}));
        assert_eq!(User::from_id_token(&with_sub).unwrap().user_name, "s");

        let with_none = encode_token(&serde_json::json!({"aud": "abc"}));
        assert!(User::from_id_token(&with_none).is_err());
    }

    #[test]
    fn test_entry_validity_boundary() {
        let now = Utc::now();
        let offset = chrono::Duration::seconds(300);

        let fresh = TokenEntry::with_expiry("R", "T", now + offset + chrono::Duration::seconds(1));
        assert!(fresh.is_valid_at(now, offset));

        // now + offset == expiry is already invalid
        let boundary = TokenEntry::with_expiry("R", "T", now + offset);
        assert!(!boundary.is_valid_at(now, offset));

        let stale = TokenEntry::with_expiry("R", "T", now - chrono::Duration::seconds(1));
        assert!(!stale.is_valid_at(now, offset));
    }

    #[test]
    fn test_failed_entry_never_serves() {
        let entry = TokenEntry::failed("R", "interaction_required");
        assert!(!entry.is_valid_at(Utc::now(), chrono::Duration::zero()));
    }

    #[test]
    fn test_entry_roundtrips_through_json() {
        let entry = TokenEntry::new("https://api.example.com", "T", 3600);
        let json = serde_json::to_string(&entry).unwrap();
        let back: TokenEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
