//! Test doubles shared by the unit tests.

use crate::endpoint::Endpoint;
use crate::error::ErrorCode;
use crate::keys::KeyPair;
use crate::rest::{RestClient, RestError};
use crate::subscriber::SubscriberCallback;
use crate::transport::{
    ClientSecurity, Inbound, PublisherLink, SubscriberLink, TcpTransport, Transport,
    TransportError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Write a schema with an integer `seq` and an optional string `label`
pub fn write_schema(dir: &TempDir, file: &str, schema_id: &str) -> PathBuf {
    let path = dir.path().join(file);
    std::fs::write(
        &path,
        format!(
            "id: {}\nname: robot\nversion: \"1\"\nfields:\n  - name: seq\n    type: integer\n  - name: label\n    type: string\n    optional: true\n",
            schema_id
        ),
    )
    .unwrap();
    path
}

/// REST client answering from canned bodies; unknown URLs get HTTP 404
#[derive(Default)]
pub struct FakeRestClient {
    responses: Mutex<HashMap<String, Result<Value, RestError>>>,
    calls: Mutex<Vec<String>>,
    posted: Mutex<Vec<(String, Value)>>,
}

impl FakeRestClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_response(&self, url: &str, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(body));
    }

    /// Answer `url` with a failure instead of a body
    pub fn set_error(&self, url: &str, error: RestError) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(error));
    }

    /// Every request as `"METHOD url"`, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn posted(&self, url: &str) -> Vec<Value> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn answer(&self, method: &str, url: &str) -> Result<Value, RestError> {
        self.calls.lock().unwrap().push(format!("{} {}", method, url));
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| {
                Err(RestError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            })
    }
}

#[async_trait]
impl RestClient for FakeRestClient {
    async fn get(&self, url: &str) -> Result<Value, RestError> {
        self.answer("GET", url)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, RestError> {
        self.posted
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        self.answer("POST", url)
    }

    async fn delete(&self, url: &str) -> Result<Value, RestError> {
        self.answer("DELETE", url)
    }
}

/// Transport wrapper counting bind and connect attempts
pub struct CountingTransport {
    inner: Arc<dyn Transport>,
    binds: AtomicUsize,
    connects: AtomicUsize,
}

impl CountingTransport {
    pub fn tcp() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(TcpTransport::with_handshake_timeout(Duration::from_secs(2))),
            binds: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn bind(
        &self,
        endpoint: &Endpoint,
        keys: Option<&KeyPair>,
    ) -> Result<Box<dyn PublisherLink>, TransportError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        self.inner.bind(endpoint, keys).await
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        topics: &[String],
        security: Option<&ClientSecurity>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<Box<dyn SubscriberLink>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(endpoint, topics, security, inbound).await
    }
}

/// Callback recording everything it receives
#[derive(Default)]
pub struct Collector {
    messages: Mutex<Vec<(String, Value)>>,
    errors: Mutex<Vec<(String, ErrorCode)>>,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(String, ErrorCode)> {
        self.errors.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<(String, Value)> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.messages.lock().unwrap().len() < count && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.messages()
    }

    pub async fn wait_for_errors(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<(String, ErrorCode)> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.errors.lock().unwrap().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.errors()
    }
}

impl SubscriberCallback for Collector {
    fn on_message(&self, topic: &str, payload: Value) {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
    }

    fn on_error(&self, topic: &str, code: ErrorCode) {
        self.errors.lock().unwrap().push((topic.to_string(), code));
    }
}
