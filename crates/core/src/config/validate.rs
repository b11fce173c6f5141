use super::{types::Config, AuthMethod, ConfigError};

/// Validate configuration.
///
/// Provider slugs are already checked at deserialization; this verifies that
/// every referenced provider is actually configured.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.queue.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "queue.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.queue.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "queue.backoff_multiplier must be >= 1.0".to_string(),
        ));
    }

    if config.orchestrator.workers_per_queue == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.workers_per_queue must be at least 1".to_string(),
        ));
    }

    if config.tracking.sweep_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "tracking.sweep_interval_secs cannot be 0".to_string(),
        ));
    }

    let providers = &config.providers;
    if !providers.is_configured(providers.default) {
        return Err(ConfigError::ValidationError(format!(
            "providers.default is '{}' but [providers.{}] is not configured",
            providers.default, providers.default
        )));
    }

    for (brand, slug) in &providers.brands {
        if !providers.is_configured(*slug) {
            return Err(ConfigError::ValidationError(format!(
                "brand '{}' is assigned to provider '{}' which is not configured",
                brand, slug
            )));
        }
    }

    if config.auth.method == AuthMethod::ApiKey && config.auth.api_keys.is_empty() {
        return Err(ConfigError::ValidationError(
            "auth.api_keys must not be empty when using api_key auth".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{GelatoConfig, PrintfulConfig, ProviderSlug};

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.providers.printful = Some(PrintfulConfig {
            api_token: "token".to_string(),
            ..PrintfulConfig::default()
        });
        config
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = valid_config();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_default_provider_must_be_configured() {
        let mut config = valid_config();
        config.providers.default = ProviderSlug::Gelato;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("gelato"));

        config.providers.gelato = Some(GelatoConfig {
            api_key: "key".to_string(),
            ..GelatoConfig::default()
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_brand_override_must_be_configured() {
        let mut config = valid_config();
        config
            .providers
            .brands
            .insert("brand-1".to_string(), ProviderSlug::Gelato);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        let mut config = valid_config();
        config.queue.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_api_key_auth_requires_keys() {
        let mut config = valid_config();
        config.auth.method = AuthMethod::ApiKey;
        assert!(validate_config(&config).is_err());

        config
            .auth
            .api_keys
            .insert("k".to_string(), "brand-1".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
