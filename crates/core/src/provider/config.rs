use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::types::ProviderSlug;

/// Provider selection and credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    /// Provider used for brands without an explicit assignment.
    #[serde(default = "default_provider")]
    pub default: ProviderSlug,
    /// Brand id -> provider.
    #[serde(default)]
    pub brands: HashMap<String, ProviderSlug>,
    #[serde(default)]
    pub printful: Option<PrintfulConfig>,
    #[serde(default)]
    pub gelato: Option<GelatoConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            brands: HashMap::new(),
            printful: None,
            gelato: None,
        }
    }
}

impl ProvidersConfig {
    pub fn is_configured(&self, slug: ProviderSlug) -> bool {
        match slug {
            ProviderSlug::Printful => self.printful.is_some(),
            ProviderSlug::Gelato => self.gelato.is_some(),
        }
    }
}

fn default_provider() -> ProviderSlug {
    ProviderSlug::Printful
}

/// Printful API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrintfulConfig {
    /// Private token (Bearer)
    pub api_token: String,
    /// Store id, required for account-level tokens
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default = "default_printful_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Shared secret for webhook signatures
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for PrintfulConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            store_id: None,
            base_url: default_printful_url(),
            timeout_secs: default_timeout(),
            webhook_secret: None,
        }
    }
}

/// Gelato API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GelatoConfig {
    pub api_key: String,
    #[serde(default = "default_gelato_order_url")]
    pub base_url: String,
    #[serde(default = "default_gelato_product_url")]
    pub product_base_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for GelatoConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_gelato_order_url(),
            product_base_url: default_gelato_product_url(),
            currency: default_currency(),
            timeout_secs: default_timeout(),
            webhook_secret: None,
        }
    }
}

fn default_printful_url() -> String {
    "https://api.printful.com".to_string()
}

fn default_gelato_order_url() -> String {
    "https://order.gelatoapis.com".to_string()
}

fn default_gelato_product_url() -> String {
    "https://product.gelatoapis.com".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_timeout() -> u64 {
    30
}
