use zeroize::Zeroizing;

/// Source of the passphrase protecting the on-disk token store
///
/// Consulted only when the OS keyring cannot hold the store key.
#[async_trait::async_trait]
pub trait SecretProvider: Send + Sync {
    /// Passphrase for key derivation, or None when the host cannot supply one
    ///
    /// The returned string is zeroized when dropped.
    async fn get_passphrase(&self, prompt: &str) -> Option<Zeroizing<String>>;
}

/// Provider that never supplies a passphrase
///
/// Use for keyring-only deployments with no interactive fallback.
#[derive(Debug, Clone, Default)]
pub struct NoSecretProvider;

#[async_trait::async_trait]
impl SecretProvider for NoSecretProvider {
    async fn get_passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        None
    }
}

/// Fixed-passphrase provider for tests and non-interactive hosts
#[derive(Debug, Clone)]
pub struct StaticSecretProvider {
    secret: String,
}

impl StaticSecretProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait::async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn get_passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        Some(Zeroizing::new(self.secret.clone()))
    }
}
