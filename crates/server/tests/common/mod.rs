//! Common test utilities for E2E testing with mocks.
//!
//! The fixture wires the real router over the full orchestration stack,
//! backed by in-memory SQLite and the mock provider. Background workers are
//! not started; tests drive the queues through `engine.run_until_idle()`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use pce_core::{testing::TestEngine, Config, GatewayAuthenticator};
use pce_server::state::{AppState, Services};

/// Re-export fixtures for test convenience
pub use pce_core::testing::fixtures;

/// Brand used by requests that do not name one
pub const BRAND: &str = "brand-a";

/// Test fixture for E2E testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_order_intake() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/orders", json!({
///         "order": fixtures::order("o1", "brand-a"),
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// The stack behind the router, for driving queues and mocks
    pub engine: TestEngine,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Must be called inside a Tokio runtime.
    pub fn new() -> Self {
        let engine = TestEngine::new().expect("Failed to build test engine");
        let state = Arc::new(AppState::new(
            Config::default(),
            Arc::new(GatewayAuthenticator::new()),
            Services::from_engine(&engine),
        ));
        let router = pce_server::api::create_router(state);
        Self { router, engine }
    }

    /// Send a GET request as [`BRAND`].
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, Some(BRAND)).await
    }

    /// Send a POST request with JSON body as [`BRAND`].
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), Some(BRAND)).await
    }

    /// Send a GET request as another brand.
    pub async fn get_as(&self, brand: &str, path: &str) -> TestResponse {
        self.request("GET", path, None, Some(brand)).await
    }

    /// Send a POST request as another brand.
    pub async fn post_as(&self, brand: &str, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), Some(brand)).await
    }

    /// Send a GET request without any brand header.
    pub async fn get_anonymous(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    /// Send a raw body with extra headers and no brand, as a webhook sender would.
    pub async fn post_raw(&self, path: &str, body: &[u8], headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body.to_vec())).unwrap();
        self.send(request).await
    }

    /// Send a request to the test server.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        brand: Option<&str>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        if let Some(brand) = brand {
            request_builder = request_builder.header("X-Brand-Id", brand);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            $response.text
        );
    };
}
