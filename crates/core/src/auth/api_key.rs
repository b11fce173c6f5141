//! API key authentication.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Maps API keys to the brand they act for.
///
/// Accepts the key in either:
/// - `Authorization: Bearer <key>` header
/// - `X-API-Key: <key>` header
pub struct ApiKeyAuthenticator {
    keys: Vec<(String, String)>,
}

impl ApiKeyAuthenticator {
    /// `keys` is API key -> brand id.
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    fn extract_key(request: &AuthRequest) -> Option<&str> {
        if let Some(auth_header) = request.header("authorization") {
            if let Some(key) = auth_header
                .strip_prefix("Bearer ")
                .or_else(|| auth_header.strip_prefix("bearer "))
            {
                return Some(key.trim());
            }
        }
        request.header("x-api-key").map(str::trim)
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let provided = Self::extract_key(request).ok_or(AuthError::NotAuthenticated)?;

        // Compare against every key so the match position does not leak.
        let mut brand = None;
        for (key, brand_id) in &self.keys {
            if constant_time_eq(provided.as_bytes(), key.as_bytes()) {
                brand = Some(brand_id);
            }
        }

        brand
            .map(|brand_id| Identity::new(brand_id.clone(), self.method_name()))
            .ok_or_else(|| AuthError::InvalidCredentials("Invalid API key".to_string()))
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
