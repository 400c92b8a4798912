//! Simulated redirect round trip against a stand-in authority.
//!
//! The navigator captures every URL the context would send the browser to,
//! and the "authority" answers by fabricating the redirect fragment a real
//! one would produce.
//!
//! Run with: cargo run --example redirect_flow

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use entra_auth::{AuthConfig, AuthContext, MemoryStorage, Navigator};
use tokio::sync::Mutex;
use url::Url;

#[derive(Default)]
struct CapturingNavigator {
    last: Mutex<Option<Url>>,
}

impl CapturingNavigator {
    async fn take(&self) -> Option<Url> {
        self.last.lock().await.take()
    }
}

#[async_trait::async_trait]
impl Navigator for CapturingNavigator {
    async fn navigate(&self, url: Url) -> entra_auth::Result<()> {
        println!("navigate -> {}", url);
        *self.last.lock().await = Some(url);
        Ok(())
    }

    async fn open_hidden(&self, url: Url) -> entra_auth::Result<()> {
        println!("hidden   -> {}", url);
        *self.last.lock().await = Some(url);
        Ok(())
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn fragment(pairs: &[(&str, &str)]) -> String {
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("#{}", encoded)
}

fn fake_id_token(upn: &str, nonce: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({
            "upn": upn,
            "nonce": nonce,
            "exp": 1_900_000_000i64
        })
        .to_string()
        .as_bytes(),
    );
    format!("{}.{}.signature", header, payload)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let navigator = Arc::new(CapturingNavigator::default());
    let mut config = AuthConfig::new("11111111-2222-3333-4444-555555555555");
    config.redirect_uri = Some("https://localhost:8080/".to_string());

    let ctx = Arc::new(AuthContext::with_storage(
        config,
        Arc::new(MemoryStorage::new()),
        navigator.clone(),
    )?);

    // Interactive login: the context sends the browser out, the authority
    // answers with an id_token in the redirect fragment.
    ctx.login().await?;
    let login_url = navigator.take().await.ok_or_else(|| anyhow!("no login navigation"))?;
    let state = query_param(&login_url, "state").ok_or_else(|| anyhow!("no state"))?;
    let nonce = query_param(&login_url, "nonce").ok_or_else(|| anyhow!("no nonce"))?;

    let id_token = fake_id_token("user@contoso.com", &nonce);
    ctx.handle_callback(&fragment(&[("id_token", &id_token), ("state", &state)]))
        .await?;

    let user = ctx.cached_user().await.ok_or_else(|| anyhow!("no cached user"))?;
    println!("signed in as {}", user.user_name);

    // Silent renewal: acquire_token opens a hidden surface, and the callback
    // resolves the waiting call.
    let acquire = tokio::spawn({
        let ctx = ctx.clone();
        async move { ctx.acquire_token("https://graph.example.com").await }
    });

    let renew_url = loop {
        if let Some(url) = navigator.take().await {
            break url;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    let state = query_param(&renew_url, "state").ok_or_else(|| anyhow!("no renew state"))?;

    ctx.handle_callback(&fragment(&[
        ("access_token", "graph-access-token"),
        ("expires_in", "3600"),
        ("state", &state),
    ]))
    .await?;

    let token = acquire.await??;
    println!("acquired token for graph: {}", token);

    Ok(())
}
