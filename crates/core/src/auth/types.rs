use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Request information for authentication
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

impl AuthRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// The brand a request acts for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub brand_id: String,
    pub method: String,
}

impl Identity {
    pub fn new(brand_id: impl Into<String>, method: &str) -> Self {
        Self {
            brand_id: brand_id.into(),
            method: method.to_string(),
        }
    }
}
