use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::provider::{ProviderSlug, ProvidersConfig};
use crate::queue::RetryPolicy;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub queue: RetryPolicy,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("pce.db")
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub method: AuthMethod,
    /// API key -> brand id. Only used with `method = "api_key"`.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Trust the brand id forwarded by an upstream gateway.
    #[default]
    #[serde(alias = "none")]
    Gateway,
    ApiKey,
}

/// Shipment tracking sweep configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackingConfig {
    /// Interval between active-shipment sweeps (default: 6 hours)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Upper bound of the random delay added to each sweep
    #[serde(default = "default_sweep_jitter")]
    pub sweep_jitter_secs: u64,
    /// Run one sweep immediately at startup
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            sweep_jitter_secs: default_sweep_jitter(),
            sweep_on_start: true,
        }
    }
}

fn default_sweep_interval() -> u64 {
    6 * 60 * 60
}

fn default_sweep_jitter() -> u64 {
    5 * 60
}

fn default_true() -> bool {
    true
}

/// Inbound webhook policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    /// Drop provider webhooks whose signature cannot be verified.
    /// Disable only in development.
    #[serde(default = "default_true")]
    pub require_signature: bool,
    /// Shared secret the tracking aggregator signs payloads with
    /// (`X-Tracking-Signature`, hex HMAC-SHA256).
    #[serde(default)]
    pub tracking_secret: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            require_signature: true,
            tracking_secret: None,
        }
    }
}

/// External render service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RenderConfig {
    /// Base URL of the render service. When absent, line items must carry
    /// print-ready design files.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
}

fn default_render_timeout() -> u64 {
    120
}

// ============================================================================
// Sanitized config (secrets redacted)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: SanitizedAuthConfig,
    pub queue: RetryPolicy,
    pub orchestrator: OrchestratorConfig,
    pub tracking: TrackingConfig,
    pub webhooks: SanitizedWebhookConfig,
    pub providers: SanitizedProvidersConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: AuthMethod,
    pub api_keys_configured: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedWebhookConfig {
    pub require_signature: bool,
    pub tracking_secret_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProvidersConfig {
    pub default: ProviderSlug,
    pub brands: HashMap<String, ProviderSlug>,
    pub configured: Vec<SanitizedProviderConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProviderConfig {
    pub slug: ProviderSlug,
    pub base_url: String,
    pub credentials_configured: bool,
    pub webhook_secret_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let mut configured = Vec::new();
        if let Some(pf) = &config.providers.printful {
            configured.push(SanitizedProviderConfig {
                slug: ProviderSlug::Printful,
                base_url: pf.base_url.clone(),
                credentials_configured: !pf.api_token.is_empty(),
                webhook_secret_configured: pf.webhook_secret.is_some(),
                timeout_secs: pf.timeout_secs,
            });
        }
        if let Some(gelato) = &config.providers.gelato {
            configured.push(SanitizedProviderConfig {
                slug: ProviderSlug::Gelato,
                base_url: gelato.base_url.clone(),
                credentials_configured: !gelato.api_key.is_empty(),
                webhook_secret_configured: gelato.webhook_secret.is_some(),
                timeout_secs: gelato.timeout_secs,
            });
        }

        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            auth: SanitizedAuthConfig {
                method: config.auth.method,
                api_keys_configured: config.auth.api_keys.len(),
            },
            queue: config.queue.clone(),
            orchestrator: config.orchestrator.clone(),
            tracking: config.tracking.clone(),
            webhooks: SanitizedWebhookConfig {
                require_signature: config.webhooks.require_signature,
                tracking_secret_configured: config.webhooks.tracking_secret.is_some(),
            },
            providers: SanitizedProvidersConfig {
                default: config.providers.default,
                brands: config.providers.brands.clone(),
                configured,
            },
            render: config.render.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PrintfulConfig;

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config = Config::default();
        config.providers.printful = Some(PrintfulConfig {
            api_token: "super-secret-token".to_string(),
            webhook_secret: Some("whsec".to_string()),
            ..PrintfulConfig::default()
        });
        config.webhooks.tracking_secret = Some("track-secret".to_string());
        config
            .auth
            .api_keys
            .insert("key-123".to_string(), "brand-1".to_string());

        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();

        assert!(!json.contains("super-secret-token"));
        assert!(!json.contains("whsec"));
        assert!(!json.contains("key-123"));
        assert!(!json.contains("track-secret"));
        assert!(sanitized.webhooks.tracking_secret_configured);
        assert_eq!(sanitized.auth.api_keys_configured, 1);
        assert_eq!(sanitized.providers.configured.len(), 1);
        assert!(sanitized.providers.configured[0].credentials_configured);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.tracking.sweep_interval_secs, 21600);
        assert!(config.webhooks.require_signature);
        assert_eq!(config.auth.method, AuthMethod::Gateway);
    }
}
