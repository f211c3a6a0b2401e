//! Shared HTTP plumbing for the backend client

use crate::types::ErrorBody;
use hydrowatch_core::{ApiConfig, ErrorContext, HydroError, HydroResult};
use std::collections::HashMap;

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// User agent string
    pub user_agent: String,
    /// Additional headers
    pub headers: HashMap<String, String>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        ApiClientConfig::from(&ApiConfig::default())
    }
}

impl From<&ApiConfig> for ApiClientConfig {
    fn from(config: &ApiConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout_ms: config.request_timeout_ms,
            user_agent: config.user_agent.clone(),
            headers: HashMap::new(),
        }
    }
}

impl ApiClientConfig {
    /// Configuration pointing at a specific backend
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set additional header
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Join the base URL and an endpoint path
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Helper function to create HTTP client with common configuration
pub(crate) fn create_http_client(config: &ApiClientConfig) -> HydroResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| {
            HydroError::Config {
                message: format!("Invalid user agent: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?,
    );

    for (key, value) in &config.headers {
        let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            HydroError::Config {
                message: format!("Invalid header name '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?;

        let header_value =
            reqwest::header::HeaderValue::from_str(value).map_err(|e| HydroError::Config {
                message: format!("Invalid header value for '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            })?;

        headers.insert(header_name, header_value);
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(config.timeout_ms))
        .default_headers(headers)
        .build()
        .map_err(|e| HydroError::Internal {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?;

    Ok(client)
}

/// Convert a reqwest transport failure into a network or timeout error
pub(crate) fn transport_error(error: reqwest::Error, operation: &str) -> HydroError {
    if error.is_timeout() {
        return HydroError::Timeout {
            operation: operation.to_string(),
            duration_ms: 0,
            context: ErrorContext::new("api_client")
                .with_operation(operation)
                .with_suggestion("Check that the backend is reachable"),
        };
    }

    HydroError::Network {
        message: format!("Request failed: {}", error),
        source: Some(Box::new(error)),
        context: ErrorContext::new("api_client")
            .with_operation(operation)
            .with_suggestion("Make sure the server is running"),
    }
}

/// Helper function to handle HTTP response errors
pub(crate) async fn handle_response_error(response: reqwest::Response, operation: &str) -> HydroError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message())
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty() && trimmed.len() < 512).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });

    HydroError::Api {
        status: status.as_u16(),
        detail,
        context: ErrorContext::new("api_client")
            .with_operation(operation)
            .with_suggestion(match status.as_u16() {
                401 => "Sign in again",
                403 => "The account is not allowed to perform this action",
                404 => "The requested resource does not exist",
                409 => "The resource already exists",
                _ => "Check network connectivity and API status",
            }),
    }
}

/// Decode a successful JSON response
pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation: &str,
) -> HydroResult<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(e, operation))?;
    serde_json::from_slice(&bytes).map_err(HydroError::Serialization)
}
