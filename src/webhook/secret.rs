//! Secret resolution and key rotation
//!
//! The verifier never holds a secret. It asks a [`SecretResolver`] for the
//! secret matching the header's `kid` on every call, so adding or retiring a
//! key takes effect on the next delivery without a redeploy.
//!
//! Rotation procedure: register the new key id next to the old one, let the
//! platform start signing with it, then retire the old id. Both verify in
//! the overlap window.

use std::collections::HashMap;
use std::env;
use std::fmt;

use parking_lot::RwLock;

use crate::webhook::error::ResolverError;
use crate::webhook::header::DEFAULT_KEY_ID;

/// Environment variable prefix read by [`EnvSecretResolver`]
pub const SECRET_ENV_PREFIX: &str = "MOLAM_WEBHOOK_SECRET";

/// Shared webhook signing secret
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(Vec<u8>);

impl WebhookSecret {
    /// Wrap raw secret bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Secret bytes used as the HMAC key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(<redacted>)")
    }
}

impl From<&str> for WebhookSecret {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for WebhookSecret {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<Vec<u8>> for WebhookSecret {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// Maps a key id to its current secret.
///
/// `Ok(None)` means "no such key" and becomes `UnknownKeyId`; `Err` means the
/// lookup itself failed and becomes a resolver error.
pub trait SecretResolver: Send + Sync {
    /// Look up the secret for `key_id`
    fn resolve(&self, key_id: &str) -> Result<Option<WebhookSecret>, ResolverError>;
}

/// Resolver whose lookup performs async I/O (vault, KMS, database).
///
/// Every [`SecretResolver`] is also an `AsyncSecretResolver`.
#[async_trait::async_trait]
pub trait AsyncSecretResolver: Send + Sync {
    /// Look up the secret for `key_id`
    async fn resolve_async(&self, key_id: &str)
        -> Result<Option<WebhookSecret>, ResolverError>;
}

#[async_trait::async_trait]
impl<T: SecretResolver + ?Sized> AsyncSecretResolver for T {
    async fn resolve_async(
        &self,
        key_id: &str,
    ) -> Result<Option<WebhookSecret>, ResolverError> {
        SecretResolver::resolve(self, key_id)
    }
}

/// Adapter turning a closure into a resolver
pub struct FnResolver<F>(F);

/// Build a resolver from `Fn(&str) -> Option<WebhookSecret>`
pub fn resolver_fn<F>(f: F) -> FnResolver<F>
where
    F: Fn(&str) -> Option<WebhookSecret> + Send + Sync,
{
    FnResolver(f)
}

impl<F> SecretResolver for FnResolver<F>
where
    F: Fn(&str) -> Option<WebhookSecret> + Send + Sync,
{
    fn resolve(&self, key_id: &str) -> Result<Option<WebhookSecret>, ResolverError> {
        Ok((self.0)(key_id))
    }
}

/// In-process key ring that can be rotated at runtime
#[derive(Default)]
pub struct KeyRing {
    keys: RwLock<HashMap<String, WebhookSecret>>,
}

impl KeyRing {
    /// Create an empty key ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with_secret(self, key_id: impl Into<String>, secret: impl Into<WebhookSecret>) -> Self {
        self.rotate_in(key_id, secret);
        self
    }

    /// Register (or replace) the secret for `key_id`
    pub fn rotate_in(&self, key_id: impl Into<String>, secret: impl Into<WebhookSecret>) {
        let key_id = key_id.into();
        tracing::info!(key_id = %key_id, "Webhook key registered");
        self.keys.write().insert(key_id, secret.into());
    }

    /// Remove `key_id`; returns whether it was registered
    pub fn retire(&self, key_id: &str) -> bool {
        let removed = self.keys.write().remove(key_id).is_some();
        if removed {
            tracing::info!(key_id, "Webhook key retired");
        }
        removed
    }

    /// Registered key ids, sorted
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("key_ids", &self.key_ids())
            .finish()
    }
}

impl SecretResolver for KeyRing {
    fn resolve(&self, key_id: &str) -> Result<Option<WebhookSecret>, ResolverError> {
        Ok(self.keys.read().get(key_id).cloned())
    }
}

/// Reads secrets from the environment on every lookup.
///
/// `kid=v2` reads `MOLAM_WEBHOOK_SECRET_V2`. For the default key id the bare
/// `MOLAM_WEBHOOK_SECRET` is used when the suffixed variable is unset, which
/// keeps single-secret deployments working. Non-alphanumeric characters in
/// the key id map to `_`. Empty values count as unset.
#[derive(Debug, Clone)]
pub struct EnvSecretResolver {
    prefix: String,
    default_key_id: String,
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self {
            prefix: SECRET_ENV_PREFIX.to_string(),
            default_key_id: DEFAULT_KEY_ID.to_string(),
        }
    }
}

impl EnvSecretResolver {
    /// Resolver with the standard prefix and default key id
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different variable prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Key id allowed to fall back to the bare prefix variable
    pub fn with_default_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.default_key_id = key_id.into();
        self
    }

    /// Variable name consulted for `key_id`
    pub fn var_name(&self, key_id: &str) -> String {
        let suffix: String = key_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{}", self.prefix, suffix)
    }

    fn read(name: &str) -> Option<WebhookSecret> {
        env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .map(WebhookSecret::from)
    }
}

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, key_id: &str) -> Result<Option<WebhookSecret>, ResolverError> {
        if let Some(secret) = Self::read(&self.var_name(key_id)) {
            return Ok(Some(secret));
        }
        if key_id == self.default_key_id {
            return Ok(Self::read(&self.prefix));
        }
        Ok(None)
    }
}
