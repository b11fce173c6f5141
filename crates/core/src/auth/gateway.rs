use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Header an upstream gateway sets after authenticating the caller.
pub const BRAND_HEADER: &str = "x-brand-id";

/// Trusts the brand id forwarded by the gateway in front of this service.
/// Only safe when the service is not reachable except through that gateway.
pub struct GatewayAuthenticator;

impl GatewayAuthenticator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GatewayAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for GatewayAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        match request.header(BRAND_HEADER).map(str::trim) {
            Some(brand_id) if !brand_id.is_empty() => Ok(Identity::new(brand_id, self.method_name())),
            _ => Err(AuthError::NotAuthenticated),
        }
    }

    fn method_name(&self) -> &'static str {
        "gateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::IpAddr;

    fn request(headers: &[(&str, &str)]) -> AuthRequest {
        AuthRequest {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            source_ip: "127.0.0.1".parse::<IpAddr>().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_reads_forwarded_brand() {
        let auth = GatewayAuthenticator::new();
        let identity = auth
            .authenticate(&request(&[("x-brand-id", " brand-a ")]))
            .await
            .unwrap();

        assert_eq!(identity.brand_id, "brand-a");
        assert_eq!(identity.method, "gateway");
    }

    #[tokio::test]
    async fn test_missing_or_blank_header_rejected() {
        let auth = GatewayAuthenticator::default();
        assert!(matches!(
            auth.authenticate(&request(&[])).await,
            Err(AuthError::NotAuthenticated)
        ));
        assert!(matches!(
            auth.authenticate(&request(&[("x-brand-id", "  ")])).await,
            Err(AuthError::NotAuthenticated)
        ));
    }
}
