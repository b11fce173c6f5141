//! Authentication and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use pce_core::{AuthError, AuthRequest, Identity};

use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Resolves the brand a request acts for.
///
/// On success the [`Identity`] is stored in request extensions for
/// [`AuthBrand`]. Missing or wrong credentials are a 401.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    // Get source IP (default to localhost if not available)
    let source_ip = request
        .extensions()
        .get::<std::net::SocketAddr>()
        .map(|addr| addr.ip())
        .unwrap_or_else(|| std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    let auth_request = AuthRequest { headers, source_ip };

    match state.authenticator().authenticate(&auth_request).await {
        Ok(identity) => {
            let mut request = request;
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(AuthError::NotAuthenticated) => {
            AUTH_FAILURES_TOTAL.with_label_values(&["not_authenticated"]).inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(AuthError::InvalidCredentials(_)) => {
            AUTH_FAILURES_TOTAL.with_label_values(&["invalid_credentials"]).inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(AuthError::ConfigurationError(_)) => {
            AUTH_FAILURES_TOTAL.with_label_values(&["internal_error"]).inc();
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Extractor for the authenticated brand id.
///
/// Rejects with 401 when no [`Identity`] was stored, which only happens on
/// routes mounted without [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthBrand(pub String);

impl<S> FromRequestParts<S> for AuthBrand
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let brand = parts
            .extensions
            .get::<Identity>()
            .map(|id| AuthBrand(id.brand_id.clone()))
            .ok_or(StatusCode::UNAUTHORIZED);
        std::future::ready(brand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request},
        middleware,
        routing::get,
        Router,
    };
    use http_body_util::BodyExt;
    use pce_core::testing::TestEngine;
    use pce_core::{create_authenticator, AuthConfig, AuthMethod, Config};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::state::Services;

    async fn brand_handler(AuthBrand(brand): AuthBrand) -> String {
        brand
    }

    fn create_test_state(auth_config: AuthConfig) -> Arc<AppState> {
        let engine = TestEngine::new().unwrap();
        let authenticator = create_authenticator(&auth_config).unwrap();
        let config = Config {
            auth: auth_config,
            ..Default::default()
        };
        Arc::new(AppState::new(
            config,
            Arc::from(authenticator),
            Services::from_engine(&engine),
        ))
    }

    fn api_key_config() -> AuthConfig {
        AuthConfig {
            method: AuthMethod::ApiKey,
            api_keys: HashMap::from([("secret-key".to_string(), "brand-a".to_string())]),
        }
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/test", get(brand_handler))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    async fn body_text(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_gateway_auth_uses_brand_header() {
        let state = create_test_state(AuthConfig::default());

        let request = Request::builder()
            .uri("/test")
            .header("X-Brand-Id", "brand-gw")
            .body(Body::empty())
            .unwrap();

        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "brand-gw");
    }

    #[tokio::test]
    async fn test_gateway_auth_requires_brand_header() {
        let state = create_test_state(AuthConfig::default());

        let request = Request::builder()
            .uri("/test")
            .body(Body::empty())
            .unwrap();

        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_key_auth_valid() {
        let state = create_test_state(api_key_config());

        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer secret-key")
            .body(Body::empty())
            .unwrap();

        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "brand-a");
    }

    #[tokio::test]
    async fn test_api_key_auth_invalid() {
        let state = create_test_state(api_key_config());

        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();

        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_key_ignores_brand_header() {
        let state = create_test_state(api_key_config());

        let request = Request::builder()
            .uri("/test")
            .header("X-Brand-Id", "brand-a")
            .body(Body::empty())
            .unwrap();

        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_x_api_key_header() {
        let state = create_test_state(api_key_config());

        let request = Request::builder()
            .uri("/test")
            .header("X-API-Key", "secret-key")
            .body(Body::empty())
            .unwrap();

        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_brand_without_middleware_is_unauthorized() {
        let state = create_test_state(AuthConfig::default());
        let app = Router::new()
            .route("/test", get(brand_handler))
            .with_state(state);

        let request = Request::builder()
            .uri("/test")
            .header("X-Brand-Id", "brand-gw")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
