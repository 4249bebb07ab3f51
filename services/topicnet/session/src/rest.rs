//! REST client used for TNS and runtime registry lookups.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default timeout for a single REST request
pub const DEFAULT_REST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST transport and HTTP failures
#[derive(Error, Debug, Clone)]
pub enum RestError {
    /// Connection or protocol failure
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Request URL
        url: String,
        /// Underlying failure
        reason: String,
    },
    /// Request did not finish in time
    #[error("request to {url} timed out")]
    Timeout {
        /// Request URL
        url: String,
    },
    /// Non-success HTTP status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Request URL
        url: String,
        /// Status code
        status: u16,
    },
    /// Body is not JSON
    #[error("{url} returned a body that is not JSON: {reason}")]
    Body {
        /// Request URL
        url: String,
        /// Parser message
        reason: String,
    },
}

/// Minimal REST capability: each call returns the parsed JSON body
#[async_trait]
pub trait RestClient: Send + Sync {
    /// GET a URL
    async fn get(&self, url: &str) -> Result<Value, RestError>;

    /// POST a JSON body
    async fn post(&self, url: &str, body: &Value) -> Result<Value, RestError>;

    /// DELETE a URL
    async fn delete(&self, url: &str) -> Result<Value, RestError>;
}

/// `reqwest`-backed REST client
#[derive(Debug, Clone)]
pub struct HttpRestClient {
    client: reqwest::Client,
}

impl HttpRestClient {
    /// Create a client with the default timeout
    pub fn new() -> Result<Self, RestError> {
        Self::with_timeout(DEFAULT_REST_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self, RestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RestError::Request {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    async fn execute(&self, url: &str, request: reqwest::RequestBuilder) -> Result<Value, RestError> {
        let response = request.send().await.map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| map_reqwest_error(url, e))?;
        debug!("REST {} -> {} ({} bytes)", url, status, body.len());
        parse_body(url, &body)
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> RestError {
    if error.is_timeout() {
        RestError::Timeout {
            url: url.to_string(),
        }
    } else {
        RestError::Request {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Parse a response body; empty bodies become `null`
pub(crate) fn parse_body(url: &str, body: &[u8]) -> Result<Value, RestError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| RestError::Body {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn get(&self, url: &str) -> Result<Value, RestError> {
        self.execute(url, self.client.get(url)).await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, RestError> {
        self.execute(url, self.client.post(url).json(body)).await
    }

    async fn delete(&self, url: &str) -> Result<Value, RestError> {
        self.execute(url, self.client.delete(url)).await
    }
}
