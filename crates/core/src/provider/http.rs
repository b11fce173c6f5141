//! HTTP plumbing shared by the provider clients.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{ProviderError, ProviderSlug};
use crate::metrics;

pub(crate) fn build_client(timeout_secs: u64, headers: HeaderMap) -> Result<Client, ProviderError> {
    Client::builder()
        .user_agent(concat!("pce/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(timeout_secs))
        .default_headers(headers)
        .build()
        .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Run one provider call, recording its duration and result.
pub(crate) async fn timed<T, F>(provider: ProviderSlug, operation: &str, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    let result = call.await;
    metrics::record_provider_call(provider.as_str(), operation, result.is_ok(), start.elapsed());
    if let Err(e) = &result {
        debug!(provider = %provider, operation, error = %e, "Provider call failed");
    }
    result
}

/// Provider ids arrive as numbers or strings.
pub(crate) fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Classify a transport failure.
///
/// Only a connect failure is known not to have reached the provider. A
/// request that was never built is a configuration problem. Anything else
/// broke after bytes may have been sent.
pub(crate) fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_connect() {
        ProviderError::Connection(e.to_string())
    } else if e.is_builder() {
        ProviderError::Config(e.to_string())
    } else if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_decode() {
        ProviderError::InvalidResponse(e.to_string())
    } else {
        ProviderError::Interrupted(e.to_string())
    }
}

/// Map a non-success status to an error, extracting a message from the body.
pub(crate) async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, error_message(&body)))
}

pub(crate) fn status_error(status: StatusCode, message: String) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::Timeout(message)
        }
        s if s.is_server_error() => ProviderError::Server {
            status: s.as_u16(),
            message,
        },
        s => ProviderError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let response = check_status(response).await?;
    let body = response.bytes().await.map_err(send_error)?;
    serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// Best-effort error message from a JSON error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.chars().take(500).collect();
    };
    let candidates = [
        value.pointer("/error/message"),
        value.pointer("/result"),
        value.pointer("/message"),
        value.pointer("/error"),
    ];
    let message = candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(500).collect());
    message
}

/// Parse a decimal money string ("4.99") into cents.
pub(crate) fn parse_cents(amount: &str) -> Option<i64> {
    let amount = amount.trim();
    let (negative, amount) = match amount.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, amount),
    };
    let (whole, frac) = amount.split_once('.').unwrap_or((amount, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_digits: String = frac.chars().chain("00".chars()).take(2).collect();
    let frac: i64 = frac_digits.parse().ok()?;
    let cents = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -cents } else { cents })
}

/// Parse a float amount (as some APIs return) into cents.
pub(crate) fn float_to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}
