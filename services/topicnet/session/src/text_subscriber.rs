//! Subscriber that hands payloads to the caller as rendered text.
//!
//! Opening, connection handling and teardown are those of [`Subscriber`];
//! only delivery differs: each decoded payload is rendered in the chosen
//! [`TextFormat`] before it reaches the callback.

use crate::config::SessionConfig;
use crate::error::{ErrorCode, Result};
use crate::keys::KeyPair;
use crate::subscriber::{Subscriber, SubscriberCallback};
use crate::topic::TopicDescriptor;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Text form payloads are rendered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextFormat {
    /// Compact single-line JSON
    #[default]
    Json,
    /// Indented JSON
    PrettyJson,
    /// YAML document
    Yaml,
}

impl TextFormat {
    /// Render a decoded payload
    pub fn render(&self, payload: &Value) -> std::result::Result<String, String> {
        match self {
            TextFormat::Json => serde_json::to_string(payload).map_err(|e| e.to_string()),
            TextFormat::PrettyJson => {
                serde_json::to_string_pretty(payload).map_err(|e| e.to_string())
            }
            TextFormat::Yaml => serde_yaml::to_string(payload).map_err(|e| e.to_string()),
        }
    }
}

/// Receives rendered messages and per-message failures
pub trait TextSubscriberCallback: Send + Sync + 'static {
    /// A payload decoded against the topic's schema, rendered as text
    fn on_message(&self, topic: &str, data: String);

    /// A message that could not be delivered
    fn on_error(&self, topic: &str, code: ErrorCode);
}

struct Render {
    format: TextFormat,
    callback: Arc<dyn TextSubscriberCallback>,
}

impl SubscriberCallback for Render {
    fn on_message(&self, topic: &str, payload: Value) {
        match self.format.render(&payload) {
            Ok(data) => self.callback.on_message(topic, data),
            Err(e) => {
                debug!("Cannot render message on {} as {:?}: {}", topic, self.format, e);
                self.callback.on_error(topic, ErrorCode::DeserializationFailed);
            }
        }
    }

    fn on_error(&self, topic: &str, code: ErrorCode) {
        self.callback.on_error(topic, code);
    }
}

/// Handle to a text-delivering subscriber
#[derive(Debug)]
pub struct TextSubscriber {
    inner: Subscriber,
    format: TextFormat,
}

impl TextSubscriber {
    fn wrap(
        format: TextFormat,
        callback: Arc<dyn TextSubscriberCallback>,
    ) -> Arc<dyn SubscriberCallback> {
        Arc::new(Render { format, callback })
    }

    /// Subscribe to one unsecured topic
    pub async fn subscribe(
        config: &Arc<SessionConfig>,
        topic: TopicDescriptor,
        format: TextFormat,
        callback: Arc<dyn TextSubscriberCallback>,
    ) -> Result<TextSubscriber> {
        let inner = Subscriber::subscribe(config, topic, Self::wrap(format, callback)).await?;
        Ok(TextSubscriber { inner, format })
    }

    /// Subscribe to several unsecured topics through one handle
    pub async fn subscribe_all(
        config: &Arc<SessionConfig>,
        topics: Vec<TopicDescriptor>,
        format: TextFormat,
        callback: Arc<dyn TextSubscriberCallback>,
    ) -> Result<TextSubscriber> {
        let inner = Subscriber::subscribe_all(config, topics, Self::wrap(format, callback)).await?;
        Ok(TextSubscriber { inner, format })
    }

    /// Subscribe to one secured topic
    pub async fn subscribe_secured(
        config: &Arc<SessionConfig>,
        topic: TopicDescriptor,
        server_key: &str,
        keys: &KeyPair,
        format: TextFormat,
        callback: Arc<dyn TextSubscriberCallback>,
    ) -> Result<TextSubscriber> {
        let inner = Subscriber::subscribe_secured(
            config,
            topic,
            server_key,
            keys,
            Self::wrap(format, callback),
        )
        .await?;
        Ok(TextSubscriber { inner, format })
    }

    /// Subscribe to several secured topics, each with its publisher's key
    pub async fn subscribe_secured_all<I, S>(
        config: &Arc<SessionConfig>,
        topics: I,
        keys: &KeyPair,
        format: TextFormat,
        callback: Arc<dyn TextSubscriberCallback>,
    ) -> Result<TextSubscriber>
    where
        I: IntoIterator<Item = (TopicDescriptor, S)>,
        S: AsRef<str>,
    {
        let inner =
            Subscriber::subscribe_secured_all(config, topics, keys, Self::wrap(format, callback))
                .await?;
        Ok(TextSubscriber { inner, format })
    }

    /// Resolve `name` through the TNS and subscribe to every record
    pub async fn by_name(
        config: &Arc<SessionConfig>,
        name: &str,
        secured: bool,
        format: TextFormat,
        callback: Arc<dyn TextSubscriberCallback>,
    ) -> Result<TextSubscriber> {
        let inner = Subscriber::by_name(config, name, secured, Self::wrap(format, callback)).await?;
        Ok(TextSubscriber { inner, format })
    }

    /// Format payloads are rendered in
    pub fn format(&self) -> TextFormat {
        self.format
    }

    /// Topics this session was opened with
    pub fn topics(&self) -> &HashSet<TopicDescriptor> {
        self.inner.topics()
    }

    /// Whether the session was opened secured
    pub fn is_secured(&self) -> bool {
        self.inner.is_secured()
    }

    /// Whether `terminate()` has run
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Close every connection and stop delivery. Safe to call repeatedly.
    pub async fn terminate(&self) {
        self.inner.terminate().await;
    }
}
