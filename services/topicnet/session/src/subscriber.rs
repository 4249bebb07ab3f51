//! Subscriber sessions.
//!
//! Every entry point funnels into one open path: validate keys, validate or
//! resolve descriptors, open one connection per (endpoint, server key), then
//! start a delivery task that decodes each payload and calls the caller's
//! callback in arrival order.

use crate::config::SessionConfig;
use crate::endpoint::Endpoint;
use crate::error::{ErrorCode, Result, SessionError};
use crate::keys::{validate_secured_topics, KeyPair, PublicKey};
use crate::manager::{ManagedSession, SessionRole};
use crate::resolver::TopicResolver;
use crate::schema::SchemaRegistry;
use crate::topic::TopicDescriptor;
use crate::transport::{ClientSecurity, Inbound, SubscriberLink};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives decoded messages and per-message failures
pub trait SubscriberCallback: Send + Sync + 'static {
    /// A payload decoded against the topic's schema
    fn on_message(&self, topic: &str, payload: Value);

    /// A message that could not be delivered
    fn on_error(&self, topic: &str, code: ErrorCode);
}

/// Handle to an active or terminated subscriber
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

struct SubscriberInner {
    id: u64,
    topics: HashSet<TopicDescriptor>,
    secured: bool,
    links: Mutex<Vec<Box<dyn SubscriberLink>>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
    config: Arc<SessionConfig>,
    terminated: AtomicBool,
}

/// One connection to open
struct ConnectionPlan {
    endpoint: Endpoint,
    server_key: Option<PublicKey>,
    topics: Vec<String>,
}

impl Subscriber {
    /// Subscribe to one unsecured topic
    pub async fn subscribe(
        config: &Arc<SessionConfig>,
        topic: TopicDescriptor,
        callback: Arc<dyn SubscriberCallback>,
    ) -> Result<Subscriber> {
        Self::subscribe_all(config, vec![topic], callback).await
    }

    /// Subscribe to several unsecured topics through one handle.
    ///
    /// Descriptors are checked in order and the first failure aborts the
    /// call; nothing stays open.
    pub async fn subscribe_all(
        config: &Arc<SessionConfig>,
        topics: Vec<TopicDescriptor>,
        callback: Arc<dyn SubscriberCallback>,
    ) -> Result<Subscriber> {
        if let Some(secured) = topics.iter().find(|t| t.is_secured()) {
            return Err(SessionError::InvalidArgument(format!(
                "topic {} is secured; use a secured subscription",
                secured.name()
            )));
        }

        let entries = topics.into_iter().map(|t| (t, None)).collect();
        Self::open(config, entries, None, callback).await
    }

    /// Subscribe to one secured topic
    pub async fn subscribe_secured(
        config: &Arc<SessionConfig>,
        topic: TopicDescriptor,
        server_key: &str,
        keys: &KeyPair,
        callback: Arc<dyn SubscriberCallback>,
    ) -> Result<Subscriber> {
        Self::subscribe_secured_all(config, [(topic, server_key)], keys, callback).await
    }

    /// Subscribe to several secured topics, each with its publisher's key.
    ///
    /// Any entry that is not flagged secured or carries a malformed key
    /// aborts the whole call before a connection is attempted.
    pub async fn subscribe_secured_all<I, S>(
        config: &Arc<SessionConfig>,
        topics: I,
        keys: &KeyPair,
        callback: Arc<dyn SubscriberCallback>,
    ) -> Result<Subscriber>
    where
        I: IntoIterator<Item = (TopicDescriptor, S)>,
        S: AsRef<str>,
    {
        let entries = validate_secured_topics(topics)?
            .into_iter()
            .map(|(topic, key)| (topic, Some(key)))
            .collect();
        Self::open(config, entries, Some(keys.clone()), callback).await
    }

    /// Resolve `name` through the TNS and subscribe to every record.
    ///
    /// Secured subscriptions take this process's key pair and the topic's
    /// server key from the config's key store.
    pub async fn by_name(
        config: &Arc<SessionConfig>,
        name: &str,
        secured: bool,
        callback: Arc<dyn SubscriberCallback>,
    ) -> Result<Subscriber> {
        let resolved = TopicResolver::new(config).resolve_name(name).await?;

        if !secured {
            return Self::subscribe_all(config, resolved, callback).await;
        }

        if let Some(plain) = resolved.iter().find(|t| !t.is_secured()) {
            return Err(SessionError::TopicNotSecured(plain.name().to_string()));
        }
        let keys = config
            .keys()
            .own_keys()
            .ok_or_else(|| SessionError::InvalidKey("no key pair configured".to_string()))?;
        let server_key = config.keys().server_key(name).ok_or_else(|| {
            SessionError::InvalidKey(format!("no server key known for topic {}", name))
        })?;

        let entries = resolved
            .into_iter()
            .map(|t| (t, Some(server_key.clone())))
            .collect();
        Self::open(config, entries, Some(keys), callback).await
    }

    async fn open(
        config: &Arc<SessionConfig>,
        entries: Vec<(TopicDescriptor, Option<PublicKey>)>,
        keys: Option<KeyPair>,
        callback: Arc<dyn SubscriberCallback>,
    ) -> Result<Subscriber> {
        if entries.is_empty() {
            return Err(SessionError::InvalidArgument(
                "at least one topic is required".to_string(),
            ));
        }

        let resolver = TopicResolver::new(config);
        let mut topics = HashSet::new();
        let mut schema_ids = SchemaIds::new();
        let mut plans: Vec<ConnectionPlan> = Vec::new();

        for (topic, server_key) in entries {
            let topic = resolver.validate(&topic)?;
            if !topics.insert(topic.clone()) {
                continue;
            }
            let key = (topic.endpoint().clone(), topic.name().to_string());
            match schema_ids.get(&key) {
                Some(schema_id) if schema_id != topic.schema_id() => {
                    return Err(SessionError::InvalidArgument(format!(
                        "topic {} at {} requested with schemas {} and {}",
                        topic.name(),
                        topic.endpoint(),
                        schema_id,
                        topic.schema_id()
                    )));
                }
                Some(_) => {}
                None => {
                    schema_ids.insert(key, topic.schema_id().to_string());
                }
            }

            let plan = plans
                .iter_mut()
                .find(|p| &p.endpoint == topic.endpoint() && p.server_key == server_key);
            match plan {
                Some(plan) => {
                    if !plan.topics.iter().any(|t| t == topic.name()) {
                        plan.topics.push(topic.name().to_string());
                    }
                }
                None => plans.push(ConnectionPlan {
                    endpoint: topic.endpoint().clone(),
                    server_key,
                    topics: vec![topic.name().to_string()],
                }),
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut links: Vec<Box<dyn SubscriberLink>> = Vec::with_capacity(plans.len());
        for plan in &plans {
            let security = match (&plan.server_key, &keys) {
                (Some(server_key), Some(keys)) => Some(ClientSecurity {
                    server_key: server_key.clone(),
                    keys: keys.clone(),
                }),
                _ => None,
            };

            match config
                .transport()
                .connect(&plan.endpoint, &plan.topics, security.as_ref(), tx.clone())
                .await
            {
                Ok(link) => links.push(link),
                Err(e) => {
                    warn!("Connecting to {} failed: {}", plan.endpoint, e);
                    for link in &links {
                        link.close();
                    }
                    return Err(e.into());
                }
            }
        }
        drop(tx);

        let delivery = tokio::spawn(deliver(
            rx,
            schema_ids,
            config.schema_registry().clone(),
            callback,
        ));

        let secured = keys.is_some();
        let id = config.sessions().allocate_id();
        info!(
            "Subscriber {} open on {} topic(s) over {} connection(s){}",
            id,
            topics.len(),
            links.len(),
            if secured { ", secured" } else { "" }
        );

        let inner = Arc::new(SubscriberInner {
            id,
            topics,
            secured,
            links: Mutex::new(links),
            delivery: Mutex::new(Some(delivery)),
            config: config.clone(),
            terminated: AtomicBool::new(false),
        });
        let managed: Arc<dyn ManagedSession> = inner.clone();
        config.sessions().insert(&managed);

        Ok(Subscriber { inner })
    }

    /// Topics this session was opened with
    pub fn topics(&self) -> &HashSet<TopicDescriptor> {
        &self.inner.topics
    }

    /// Whether the session was opened secured
    pub fn is_secured(&self) -> bool {
        self.inner.secured
    }

    /// Whether `terminate()` has run
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Close every connection and stop delivery. Safe to call repeatedly.
    pub async fn terminate(&self) {
        self.inner.terminate().await;
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("topics", &self.inner.topics)
            .field("secured", &self.inner.secured)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Schema id per (publisher endpoint, topic name)
type SchemaIds = HashMap<(Endpoint, String), String>;

/// Per-subscriber delivery loop; ends when every connection is gone
async fn deliver(
    mut rx: mpsc::UnboundedReceiver<Inbound>,
    schema_ids: SchemaIds,
    schema_registry: Arc<dyn SchemaRegistry>,
    callback: Arc<dyn SubscriberCallback>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            Inbound::Message {
                endpoint,
                topic,
                payload,
            } => {
                let key = (endpoint, topic);
                let topic = &key.1;
                match schema_ids.get(&key) {
                    Some(schema_id) => match schema_registry.decode(schema_id, &payload) {
                        Ok(value) => callback.on_message(topic, value),
                        Err(e) => {
                            debug!("Dropping undecodable message on {}: {}", topic, e);
                            callback.on_error(topic, ErrorCode::DeserializationFailed);
                        }
                    },
                    None => callback.on_error(topic, ErrorCode::UnknownTopic),
                }
            }
            Inbound::Corrupt { topic, .. } => {
                callback.on_error(&topic, ErrorCode::DecryptionFailed);
            }
        }
    }
    debug!("Delivery task finished");
}

impl SubscriberInner {
    fn shutdown(&self) {
        for link in self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            link.close();
        }
        if let Some(delivery) = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            delivery.abort();
        }
        self.config.sessions().remove(self.id);
    }
}

#[async_trait]
impl ManagedSession for SubscriberInner {
    fn id(&self) -> u64 {
        self.id
    }

    fn role(&self) -> SessionRole {
        SessionRole::Subscriber
    }

    async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown();
        info!("Terminated subscriber {}", self.id);
    }
}

impl Drop for SubscriberInner {
    fn drop(&mut self) {
        if !self.terminated.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{Publisher, SchemaSource};
    use crate::testing::{write_schema, Collector, CountingTransport, FakeRestClient};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn standalone(dir: &TempDir) -> (Arc<SessionConfig>, Arc<CountingTransport>) {
        let transport = CountingTransport::tcp();
        let config = SessionConfig::builder()
            .rest_client(FakeRestClient::new())
            .transport(transport.clone())
            .build()
            .unwrap();
        config.start_standalone_mode("127.0.0.1", false, None).await.unwrap();
        config
            .add_schema(&[write_schema(dir, "robot.yaml", "S1")])
            .await
            .unwrap();
        (config, transport)
    }

    fn topic(name: &str, secured: bool, port: u16) -> TopicDescriptor {
        TopicDescriptor::new(name, "S1", secured, Endpoint::new("127.0.0.1", port).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_delivery_in_order() {
        let dir = TempDir::new().unwrap();
        let (config, _transport) = standalone(&dir).await;

        let publisher = Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45562)
            .await
            .unwrap();
        let collector = Collector::new();
        let subscriber = Subscriber::subscribe(&config, publisher.topic().clone(), collector.clone())
            .await
            .unwrap();

        for i in 0..5 {
            publisher
                .publish(&json!({"seq": i, "label": format!("msg-{}", i)}))
                .await
                .unwrap();
        }

        let messages = collector.wait_for(5, Duration::from_secs(5)).await;
        assert_eq!(messages.len(), 5);
        for (i, (topic, payload)) in messages.iter().enumerate() {
            assert_eq!(topic, "robot");
            assert_eq!(payload, &json!({"seq": i, "label": format!("msg-{}", i)}));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(collector.messages().len(), 5);
        assert!(collector.errors().is_empty());

        subscriber.terminate().await;
        publisher.terminate().await;
    }

    #[tokio::test]
    async fn test_secured_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (config, _transport) = standalone(&dir).await;
        let server = KeyPair::generate();
        let client = KeyPair::generate();

        let publisher = Publisher::create_secured(
            &config,
            "robot",
            SchemaSource::Id("S1".to_string()),
            45563,
            &server,
        )
        .await
        .unwrap();
        assert!(publisher.is_secured());

        let collector = Collector::new();
        let subscriber = Subscriber::subscribe_secured(
            &config,
            publisher.topic().clone(),
            server.public_key().as_str(),
            &client,
            collector.clone(),
        )
        .await
        .unwrap();
        assert!(subscriber.is_secured());

        publisher.publish(&json!({"seq": 1, "label": "sealed"})).await.unwrap();
        let messages = collector.wait_for(1, Duration::from_secs(5)).await;
        assert_eq!(messages[0].1, json!({"seq": 1, "label": "sealed"}));

        let wrong = KeyPair::generate();
        assert!(matches!(
            Subscriber::subscribe_secured(
                &config,
                publisher.topic().clone(),
                wrong.public_key().as_str(),
                &client,
                Collector::new(),
            )
            .await,
            Err(SessionError::Transport(_))
        ));

        subscriber.terminate().await;
        publisher.terminate().await;
    }

    #[tokio::test]
    async fn test_bad_key_never_connects() {
        let dir = TempDir::new().unwrap();
        let (config, transport) = standalone(&dir).await;
        let keys = KeyPair::generate();

        let result = Subscriber::subscribe_secured(
            &config,
            topic("robot", true, 45564),
            "too-short",
            &keys,
            Collector::new(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::InvalidKey(_))));
        assert_eq!(transport.connects(), 0);
    }

    #[tokio::test]
    async fn test_mixed_mapping_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (config, transport) = standalone(&dir).await;
        let server = KeyPair::generate();
        let keys = KeyPair::generate();

        let mapping = vec![
            (topic("robot", true, 45565), server.public_key().as_str().to_string()),
            (topic("arm", false, 45565), server.public_key().as_str().to_string()),
        ];
        let result = Subscriber::subscribe_secured_all(&config, mapping, &keys, Collector::new()).await;
        assert!(matches!(result, Err(SessionError::TopicNotSecured(name)) if name == "arm"));
        assert_eq!(transport.connects(), 0);
        assert_eq!(config.sessions().live_count(), 0);
    }

    #[tokio::test]
    async fn test_argument_checks() {
        let dir = TempDir::new().unwrap();
        let (config, transport) = standalone(&dir).await;

        assert!(matches!(
            Subscriber::subscribe_all(&config, Vec::new(), Collector::new()).await,
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(matches!(
            Subscriber::subscribe(&config, topic("robot", true, 45566), Collector::new()).await,
            Err(SessionError::InvalidArgument(_))
        ));

        let unknown = TopicDescriptor::new(
            "robot",
            "S9",
            false,
            Endpoint::new("127.0.0.1", 45566).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            Subscriber::subscribe_all(
                &config,
                vec![topic("robot", false, 45566), unknown],
                Collector::new()
            )
            .await,
            Err(SessionError::UnknownSchema(_))
        ));
        assert_eq!(transport.connects(), 0);

        assert!(matches!(
            Subscriber::subscribe(&config, topic("robot", false, 45566), Collector::new()).await,
            Err(SessionError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_connect_closes_opened_links() {
        let dir = TempDir::new().unwrap();
        let (config, transport) = standalone(&dir).await;
        let publisher = Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45567)
            .await
            .unwrap();

        let result = Subscriber::subscribe_all(
            &config,
            vec![topic("robot", false, 45567), topic("arm", false, 45568)],
            Collector::new(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert_eq!(transport.connects(), 2);
        assert_eq!(config.sessions().live_count(), 1);

        publisher.terminate().await;
    }

    #[tokio::test]
    async fn test_undecodable_payload_reaches_error_path() {
        let dir = TempDir::new().unwrap();
        let (config, _transport) = standalone(&dir).await;
        let other = dir.path().join("loose.yaml");
        std::fs::write(
            &other,
            "id: LOOSE\nname: loose\nfields:\n  - name: seq\n    type: string\n",
        )
        .unwrap();
        config.add_schema(&[other]).await.unwrap();

        // Publisher writes LOOSE payloads; the subscriber expects S1.
        let publisher = Publisher::create(&config, "robot", SchemaSource::Id("LOOSE".to_string()), 45569)
            .await
            .unwrap();
        let collector = Collector::new();
        let subscriber = Subscriber::subscribe(&config, topic("robot", false, 45569), collector.clone())
            .await
            .unwrap();

        publisher.publish(&json!({"seq": "not-a-number"})).await.unwrap();
        let errors = collector.wait_for_errors(1, Duration::from_secs(5)).await;
        assert_eq!(errors, vec![("robot".to_string(), ErrorCode::DeserializationFailed)]);
        assert!(collector.messages().is_empty());
        assert!(!subscriber.is_terminated());

        subscriber.terminate().await;
        publisher.terminate().await;
    }

    #[tokio::test]
    async fn test_same_name_with_two_schemas_on_two_publishers() {
        let dir = TempDir::new().unwrap();
        let tag = dir.path().join("tag.yaml");
        std::fs::write(&tag, "id: TAG\nname: tag\nfields:\n  - name: text\n    type: string\n").unwrap();

        let (config, transport) = standalone(&dir).await;
        config.add_schema(&[tag.clone()]).await.unwrap();
        let (other, _other_transport) = standalone(&dir).await;
        other.add_schema(&[tag]).await.unwrap();

        let first = Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45573)
            .await
            .unwrap();
        let second = Publisher::create(&other, "robot", SchemaSource::Id("TAG".to_string()), 45574)
            .await
            .unwrap();

        let collector = Collector::new();
        let subscriber = Subscriber::subscribe_all(
            &config,
            vec![first.topic().clone(), second.topic().clone()],
            collector.clone(),
        )
        .await
        .unwrap();
        assert_eq!(subscriber.topics().len(), 2);

        first.publish(&json!({"seq": 1})).await.unwrap();
        second.publish(&json!({"text": "hi"})).await.unwrap();

        let mut messages = collector.wait_for(2, Duration::from_secs(5)).await;
        messages.sort_by_key(|(_, payload)| payload.to_string());
        assert_eq!(
            messages,
            vec![
                ("robot".to_string(), json!({"seq": 1})),
                ("robot".to_string(), json!({"text": "hi"})),
            ]
        );
        assert!(collector.errors().is_empty());

        // One publisher cannot serve a name under two schemas
        let connects = transport.connects();
        let ambiguous = TopicDescriptor::new("robot", "TAG", false, first.topic().endpoint().clone())
            .unwrap();
        assert!(matches!(
            Subscriber::subscribe_all(
                &config,
                vec![first.topic().clone(), ambiguous],
                Collector::new()
            )
            .await,
            Err(SessionError::InvalidArgument(_))
        ));
        assert_eq!(transport.connects(), connects);

        subscriber.terminate().await;
        first.terminate().await;
        second.terminate().await;
    }

    #[tokio::test]
    async fn test_terminate_twice_and_reset() {
        let dir = TempDir::new().unwrap();
        let (config, _transport) = standalone(&dir).await;
        let publisher = Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45570)
            .await
            .unwrap();
        let subscriber = Subscriber::subscribe(&config, publisher.topic().clone(), Collector::new())
            .await
            .unwrap();
        assert_eq!(subscriber.topics().len(), 1);

        subscriber.terminate().await;
        assert!(subscriber.is_terminated());
        subscriber.terminate().await;
        assert!(subscriber.is_terminated());

        let second = Subscriber::subscribe(&config, publisher.topic().clone(), Collector::new())
            .await
            .unwrap();
        config.reset().await;
        assert!(second.is_terminated());
        assert!(publisher.is_terminated());
        assert!(!config.is_initialized());
    }

    async fn managed(rest: Arc<FakeRestClient>, dir: &TempDir) -> Arc<SessionConfig> {
        rest.set_response(
            "http://node:48098/api/v1/management/nodes/configuration",
            json!({"node_address": "127.0.0.1", "registry_url": "http://registry:48099"}),
        );
        rest.set_response(
            "http://registry:48099/api/v1/registry/tns",
            json!({"tns_url": "http://tns:48323/api/v1/tns"}),
        );
        let registry = dir.path().join("registry.yaml");
        std::fs::write(&registry, "node:\n  api_url: http://node:48098\n").unwrap();

        let config = SessionConfig::builder().rest_client(rest).build().unwrap();
        config.start_managed_mode(&registry).await.unwrap();
        config
            .add_schema(&[write_schema(dir, "robot.yaml", "S1")])
            .await
            .unwrap();
        config
    }

    #[tokio::test]
    async fn test_managed_subscribe_by_name() {
        let dir = TempDir::new().unwrap();
        let (publishing, _transport) = standalone(&dir).await;
        let publisher = Publisher::create(&publishing, "robot", SchemaSource::Id("S1".to_string()), 5562)
            .await
            .unwrap();

        let rest = FakeRestClient::new();
        rest.set_response(
            "http://tns:48323/api/v1/tns/topics/robot",
            json!({"topics": [{"name": "robot", "endpoint": "127.0.0.1:5562", "schema": "S1", "secured": false}]}),
        );
        let config = managed(rest, &dir).await;

        let collector = Collector::new();
        let subscriber = Subscriber::by_name(&config, "robot", false, collector.clone())
            .await
            .unwrap();
        let expected: HashSet<TopicDescriptor> = [topic("robot", false, 5562)].into_iter().collect();
        assert_eq!(subscriber.topics(), &expected);
        assert!(!subscriber.is_secured());

        publisher.publish(&json!({"seq": 7})).await.unwrap();
        let messages = collector.wait_for(1, Duration::from_secs(5)).await;
        assert_eq!(messages, vec![("robot".to_string(), json!({"seq": 7}))]);

        assert!(matches!(
            Subscriber::by_name(&config, "robot", true, Collector::new()).await,
            Err(SessionError::TopicNotSecured(_))
        ));

        subscriber.terminate().await;
        publisher.terminate().await;
    }

    #[tokio::test]
    async fn test_missing_endpoint_creates_no_session() {
        let dir = TempDir::new().unwrap();
        let rest = FakeRestClient::new();
        rest.set_response(
            "http://tns:48323/api/v1/tns/topics/robot",
            json!({"topics": [{"name": "robot", "schema": "S1", "secured": false}]}),
        );
        let config = managed(rest, &dir).await;

        assert!(matches!(
            Subscriber::by_name(&config, "robot", false, Collector::new()).await,
            Err(SessionError::InvalidResponse { .. })
        ));
        assert_eq!(config.sessions().live_count(), 0);
    }

    #[tokio::test]
    async fn test_secured_by_name_uses_key_store() {
        let dir = TempDir::new().unwrap();
        let (publishing, _transport) = standalone(&dir).await;
        let server = KeyPair::generate();
        let publisher = Publisher::create_secured(
            &publishing,
            "robot",
            SchemaSource::Id("S1".to_string()),
            45572,
            &server,
        )
        .await
        .unwrap();

        let rest = FakeRestClient::new();
        rest.set_response(
            "http://tns:48323/api/v1/tns/topics/robot",
            json!({"topics": [{"name": "robot", "endpoint": "127.0.0.1:45572", "schema": "S1", "secured": true}]}),
        );
        let config = managed(rest, &dir).await;

        assert!(matches!(
            Subscriber::by_name(&config, "robot", true, Collector::new()).await,
            Err(SessionError::InvalidKey(_))
        ));
        assert!(matches!(
            Subscriber::by_name(&config, "robot", false, Collector::new()).await,
            Err(SessionError::InvalidArgument(_))
        ));

        config.keys().set_own_keys(KeyPair::generate());
        config
            .keys()
            .set_server_key("robot", server.public_key().as_str())
            .unwrap();

        let collector = Collector::new();
        let subscriber = Subscriber::by_name(&config, "robot", true, collector.clone())
            .await
            .unwrap();
        assert!(subscriber.is_secured());

        publisher.publish(&json!({"seq": 1})).await.unwrap();
        assert_eq!(collector.wait_for(1, Duration::from_secs(5)).await.len(), 1);

        subscriber.terminate().await;
        publisher.terminate().await;
    }
}
