//! Runtime configuration
//!
//! All settings come from environment variables; secrets are never part of
//! this struct (see [`crate::webhook::EnvSecretResolver`]).
//!
//! - `MOLAM_WEBHOOK_TOLERANCE_MS`: freshness window (default: 300000)
//! - `MOLAM_WEBHOOK_REQUIRE_KID`: "true" to reject headers without `kid`
//! - `MOLAM_WEBHOOK_DEFAULT_KID`: key id assumed when `kid` is absent (default: v1)
//! - `MOLAM_WEBHOOK_PROCESSING_TIMEOUT_MS`: handler timeout (default: 30000)
//! - `MOLAM_WEBHOOK_BIND_ALL`: "true" to listen on 0.0.0.0 (Docker)
//! - `MOLAM_IDEMPOTENCY_PREFIX`: prefix of generated keys (default: molam)
//! - `MOLAM_IDEMPOTENCY_TTL_SECS`: retention of stored responses (default: 86400)

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::idempotency::IdempotencyKeyManager;
use crate::webhook::dispatch::DispatchConfig;
use crate::webhook::header::DEFAULT_KEY_ID;
use crate::webhook::verifier::{VerifierConfig, DEFAULT_TOLERANCE_MS};

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to an unusable value
    #[error("Invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Webhook receiver and SDK configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Maximum `|now - t|` accepted, in milliseconds
    pub tolerance_ms: u64,
    /// Reject signature headers without `kid`
    pub require_kid: bool,
    /// Key id assumed when `kid` is absent
    pub default_key_id: String,
    /// Upper bound on one event handler call
    pub processing_timeout: Duration,
    /// Listen on all interfaces instead of localhost
    pub bind_all: bool,
    /// Prefix of generated idempotency keys
    pub idempotency_prefix: String,
    /// Retention of idempotency keys and processed event ids
    pub idempotency_ttl: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            require_kid: false,
            default_key_id: DEFAULT_KEY_ID.to_string(),
            processing_timeout: Duration::from_secs(30),
            bind_all: false,
            idempotency_prefix: crate::idempotency::key::DEFAULT_KEY_PREFIX.to_string(),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl WebhookConfig {
    /// Load from the process environment
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let tolerance_ms = parse_u64(&lookup, "MOLAM_WEBHOOK_TOLERANCE_MS")?
            .unwrap_or(defaults.tolerance_ms);
        if tolerance_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "MOLAM_WEBHOOK_TOLERANCE_MS",
                reason: "tolerance cannot be 0".to_string(),
            });
        }
        if tolerance_ms > 3_600_000 {
            warn!(
                tolerance_ms,
                "SECURITY WARNING: webhook tolerance above one hour widens the replay window"
            );
        }

        let require_kid = parse_bool(&lookup, "MOLAM_WEBHOOK_REQUIRE_KID")?
            .unwrap_or(defaults.require_kid);

        let default_key_id = match lookup("MOLAM_WEBHOOK_DEFAULT_KID") {
            Some(kid) if kid.trim().is_empty() => {
                return Err(ConfigError::Invalid {
                    var: "MOLAM_WEBHOOK_DEFAULT_KID",
                    reason: "key id cannot be empty".to_string(),
                })
            }
            Some(kid) => kid.trim().to_string(),
            None => defaults.default_key_id,
        };

        let processing_timeout = parse_u64(&lookup, "MOLAM_WEBHOOK_PROCESSING_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.processing_timeout);

        let bind_all =
            parse_bool(&lookup, "MOLAM_WEBHOOK_BIND_ALL")?.unwrap_or(defaults.bind_all);

        let idempotency_prefix = lookup("MOLAM_IDEMPOTENCY_PREFIX")
            .unwrap_or(defaults.idempotency_prefix);
        IdempotencyKeyManager::new(idempotency_prefix.clone()).map_err(|e| {
            ConfigError::Invalid {
                var: "MOLAM_IDEMPOTENCY_PREFIX",
                reason: e.to_string(),
            }
        })?;

        let idempotency_ttl = parse_u64(&lookup, "MOLAM_IDEMPOTENCY_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.idempotency_ttl);

        if !require_kid {
            info!(
                default_key_id = %default_key_id,
                "Signature headers without kid are verified against the default key"
            );
        }

        Ok(Self {
            tolerance_ms,
            require_kid,
            default_key_id,
            processing_timeout,
            bind_all,
            idempotency_prefix,
            idempotency_ttl,
        })
    }

    /// Verifier settings derived from this configuration
    pub fn verifier_config(&self) -> VerifierConfig {
        VerifierConfig {
            tolerance_ms: self.tolerance_ms,
            require_kid: self.require_kid,
            default_key_id: self.default_key_id.clone(),
        }
    }

    /// Dispatcher settings derived from this configuration
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            processing_timeout: self.processing_timeout,
            dedup_ttl: self.idempotency_ttl,
            ..DispatchConfig::default()
        }
    }

    /// Key manager using the configured prefix
    pub fn key_manager(&self) -> IdempotencyKeyManager {
        // Prefix was validated when the configuration was loaded
        IdempotencyKeyManager::new(self.idempotency_prefix.clone()).unwrap_or_default()
    }

    /// Address to listen on
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        let ip = if self.bind_all {
            warn!("SECURITY: Binding to 0.0.0.0 (MOLAM_WEBHOOK_BIND_ALL=true)");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };
        SocketAddr::new(ip, port)
    }
}

fn parse_u64<F>(lookup: &F, var: &'static str) -> ConfigResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool<F>(lookup: &F, var: &'static str) -> ConfigResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|raw| match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(ConfigError::Invalid {
                var,
                reason: format!("expected true/false, got {other:?}"),
            }),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ConfigResult<WebhookConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WebhookConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.tolerance_ms, 300_000);
        assert!(!config.require_kid);
        assert_eq!(config.default_key_id, "v1");
        assert_eq!(config.idempotency_ttl, Duration::from_secs(86_400));
        assert_eq!(config.socket_addr(8080).ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("MOLAM_WEBHOOK_TOLERANCE_MS", "60000"),
            ("MOLAM_WEBHOOK_REQUIRE_KID", "true"),
            ("MOLAM_WEBHOOK_DEFAULT_KID", "2024-01"),
            ("MOLAM_WEBHOOK_BIND_ALL", "yes"),
            ("MOLAM_IDEMPOTENCY_PREFIX", "shop"),
        ])
        .unwrap();

        assert_eq!(config.tolerance_ms, 60_000);
        assert!(config.require_kid);
        assert_eq!(config.default_key_id, "2024-01");
        assert!(config.bind_all);
        assert_eq!(config.key_manager().prefix(), "shop");

        let verifier = config.verifier_config();
        assert_eq!(verifier.tolerance_ms, 60_000);
        assert!(verifier.require_kid);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("MOLAM_WEBHOOK_TOLERANCE_MS", "five minutes")]),
            Err(ConfigError::Invalid { var: "MOLAM_WEBHOOK_TOLERANCE_MS", .. })
        ));
        assert!(load(&[("MOLAM_WEBHOOK_TOLERANCE_MS", "0")]).is_err());
        assert!(load(&[("MOLAM_WEBHOOK_REQUIRE_KID", "maybe")]).is_err());
        assert!(load(&[("MOLAM_WEBHOOK_DEFAULT_KID", "  ")]).is_err());
        assert!(load(&[("MOLAM_IDEMPOTENCY_PREFIX", "has space")]).is_err());
    }
}
