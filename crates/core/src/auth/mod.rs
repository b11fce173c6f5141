//! Resolves which brand a request acts for.

mod api_key;
mod gateway;
mod traits;
mod types;

pub use api_key::*;
pub use gateway::*;
pub use traits::*;
pub use types::*;

use crate::config::{AuthConfig, AuthMethod};

/// Factory function to create authenticator from config
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::Gateway => Ok(Box::new(GatewayAuthenticator::new())),
        AuthMethod::ApiKey => {
            if config.api_keys.is_empty() {
                return Err(AuthError::ConfigurationError(
                    "api_keys must be set when using api_key auth".to_string(),
                ));
            }
            Ok(Box::new(ApiKeyAuthenticator::new(config.api_keys.clone())))
        }
    }
}
