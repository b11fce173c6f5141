use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::config::ProvidersConfig;
use super::gelato::GelatoProvider;
use super::printful::PrintfulProvider;
use super::types::{PodProvider, ProviderError, ProviderSlug};

/// Providers built at startup, keyed by slug, plus brand routing.
pub struct ProviderRegistry {
    providers: HashMap<ProviderSlug, Arc<dyn PodProvider>>,
    default: ProviderSlug,
    brands: HashMap<String, ProviderSlug>,
}

impl ProviderRegistry {
    pub fn new(default: ProviderSlug) -> Self {
        Self {
            providers: HashMap::new(),
            default,
            brands: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn PodProvider>) -> Self {
        self.providers.insert(provider.slug(), provider);
        self
    }

    pub fn with_brand(mut self, brand_id: impl Into<String>, slug: ProviderSlug) -> Self {
        self.brands.insert(brand_id.into(), slug);
        self
    }

    /// Build every configured provider. Any routing entry that points at an
    /// unconfigured provider is an error here rather than at first use.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let mut registry = Self::new(config.default);

        if let Some(printful) = &config.printful {
            registry = registry.with_provider(Arc::new(PrintfulProvider::new(printful)?));
        }
        if let Some(gelato) = &config.gelato {
            registry = registry.with_provider(Arc::new(GelatoProvider::new(gelato)?));
        }
        for (brand_id, slug) in &config.brands {
            registry = registry.with_brand(brand_id.clone(), *slug);
        }

        registry.check_routing()?;
        info!(
            providers = ?registry.slugs(),
            default = %registry.default,
            brand_overrides = registry.brands.len(),
            "Provider registry ready"
        );
        Ok(registry)
    }

    fn check_routing(&self) -> Result<(), ProviderError> {
        let routed = std::iter::once(&self.default).chain(self.brands.values());
        for slug in routed {
            if !self.providers.contains_key(slug) {
                return Err(ProviderError::Config(format!(
                    "provider {} is routed to but not configured",
                    slug
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, slug: ProviderSlug) -> Option<Arc<dyn PodProvider>> {
        self.providers.get(&slug).cloned()
    }

    /// The provider assigned to a brand, falling back to the default.
    pub fn for_brand(&self, brand_id: &str) -> Result<Arc<dyn PodProvider>, ProviderError> {
        let slug = self.brands.get(brand_id).copied().unwrap_or(self.default);
        self.get(slug)
            .ok_or_else(|| ProviderError::Config(format!("provider {} is not configured", slug)))
    }

    pub fn all(&self) -> Vec<Arc<dyn PodProvider>> {
        let mut providers: Vec<_> = self.providers.values().cloned().collect();
        providers.sort_by_key(|p| p.slug());
        providers
    }

    pub fn slugs(&self) -> Vec<ProviderSlug> {
        let mut slugs: Vec<_> = self.providers.keys().copied().collect();
        slugs.sort();
        slugs
    }

    /// Validate credentials for every provider.
    ///
    /// Authentication failures are returned; network failures are only
    /// logged so that a provider outage does not block startup.
    pub async fn connect_all(&self) -> Result<(), ProviderError> {
        for provider in self.all() {
            match provider.connect().await {
                Ok(()) => {}
                Err(e @ ProviderError::Authentication(_)) => return Err(e),
                Err(e) => {
                    warn!(provider = %provider.slug(), error = %e, "Provider unreachable at startup");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GelatoConfig, PrintfulConfig};
    use crate::testing::MockProvider;

    #[test]
    fn test_brand_routing() {
        let registry = ProviderRegistry::new(ProviderSlug::Printful)
            .with_provider(Arc::new(MockProvider::new(ProviderSlug::Printful)))
            .with_provider(Arc::new(MockProvider::new(ProviderSlug::Gelato)))
            .with_brand("eu-brand", ProviderSlug::Gelato);

        assert_eq!(
            registry.for_brand("eu-brand").unwrap().slug(),
            ProviderSlug::Gelato
        );
        assert_eq!(
            registry.for_brand("anyone").unwrap().slug(),
            ProviderSlug::Printful
        );
        assert_eq!(registry.slugs(), vec![ProviderSlug::Printful, ProviderSlug::Gelato]);
    }

    #[test]
    fn test_unconfigured_default() {
        let registry = ProviderRegistry::new(ProviderSlug::Gelato)
            .with_provider(Arc::new(MockProvider::new(ProviderSlug::Printful)));
        assert!(matches!(
            registry.for_brand("b1"),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let config = ProvidersConfig {
            default: ProviderSlug::Printful,
            brands: HashMap::from([("b2".to_string(), ProviderSlug::Gelato)]),
            printful: Some(PrintfulConfig {
                api_token: "t".to_string(),
                ..Default::default()
            }),
            gelato: Some(GelatoConfig {
                api_key: "k".to_string(),
                ..Default::default()
            }),
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.all().len(), 2);
        assert_eq!(registry.for_brand("b2").unwrap().slug(), ProviderSlug::Gelato);
    }

    #[test]
    fn test_from_config_rejects_unconfigured_route() {
        let config = ProvidersConfig {
            default: ProviderSlug::Printful,
            brands: HashMap::from([("b2".to_string(), ProviderSlug::Gelato)]),
            printful: Some(PrintfulConfig {
                api_token: "t".to_string(),
                ..Default::default()
            }),
            gelato: None,
        };
        assert!(matches!(
            ProviderRegistry::from_config(&config),
            Err(ProviderError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_all_fails_on_auth_only() {
        let flaky = MockProvider::new(ProviderSlug::Printful);
        flaky.fail_connect(ProviderError::Connection("refused".into()));
        let registry = ProviderRegistry::new(ProviderSlug::Printful).with_provider(Arc::new(flaky));
        assert!(registry.connect_all().await.is_ok());

        let bad_creds = MockProvider::new(ProviderSlug::Printful);
        bad_creds.fail_connect(ProviderError::Authentication("401".into()));
        let registry =
            ProviderRegistry::new(ProviderSlug::Printful).with_provider(Arc::new(bad_creds));
        assert!(matches!(
            registry.connect_all().await,
            Err(ProviderError::Authentication(_))
        ));
    }
}
