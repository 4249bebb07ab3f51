//! Publisher sessions.

use crate::config::{DiscoveryMode, SessionConfig};
use crate::discovery::DiscoveryClient;
use crate::endpoint::Endpoint;
use crate::error::{Result, SessionError};
use crate::keys::KeyPair;
use crate::manager::{ManagedSession, SessionRole};
use crate::schema::SchemaRegistry;
use crate::topic::TopicDescriptor;
use crate::transport::{PublisherLink, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a publisher's schema comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// A schema id already registered with the config
    Id(String),
    /// A schema file, registered on creation if not known yet
    File(PathBuf),
}

/// Handle to an active or terminated publisher
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    id: u64,
    topics: HashSet<TopicDescriptor>,
    topic: TopicDescriptor,
    link: Box<dyn PublisherLink>,
    schema_registry: Arc<dyn SchemaRegistry>,
    tns: Option<(DiscoveryClient, String)>,
    config: Arc<SessionConfig>,
    terminated: AtomicBool,
}

impl Publisher {
    /// Create an unsecured publisher for `topic` listening on `port`
    pub async fn create(
        config: &Arc<SessionConfig>,
        topic: &str,
        schema: SchemaSource,
        port: u16,
    ) -> Result<Publisher> {
        Self::open(config, topic, schema, port, None).await
    }

    /// Create a secured publisher; subscribers need `keys.public_key()`
    pub async fn create_secured(
        config: &Arc<SessionConfig>,
        topic: &str,
        schema: SchemaSource,
        port: u16,
        keys: &KeyPair,
    ) -> Result<Publisher> {
        Self::open(config, topic, schema, port, Some(keys)).await
    }

    async fn open(
        config: &Arc<SessionConfig>,
        topic: &str,
        schema: SchemaSource,
        port: u16,
        keys: Option<&KeyPair>,
    ) -> Result<Publisher> {
        let mode = config.require_mode(&format!("creating a publisher for {}", topic))?;
        if topic.is_empty() {
            return Err(SessionError::InvalidArgument(
                "topic name must not be empty".to_string(),
            ));
        }
        let bind_endpoint = Endpoint::any(port)?;

        let schema_id = match schema {
            SchemaSource::Id(schema_id) => {
                if !config.has_schema(&schema_id) {
                    return Err(SessionError::UnknownSchema(schema_id));
                }
                schema_id
            }
            SchemaSource::File(path) => {
                let mut ids = config.add_schema(&[path]).await?;
                ids.pop().ok_or_else(|| {
                    SessionError::InvalidArgument("schema file produced no id".to_string())
                })?
            }
        };

        let sessions = config.sessions();
        let id = sessions.allocate_id();
        if !sessions.claim(SessionRole::Publisher, topic, id) {
            return Err(SessionError::InvalidArgument(format!(
                "topic {} already has an active publisher",
                topic
            )));
        }

        let link = match config.transport().bind(&bind_endpoint, keys).await {
            Ok(link) => link,
            Err(e) => {
                sessions.release(SessionRole::Publisher, topic, id);
                return Err(e.into());
            }
        };

        let announced = match announce(config, &mode, topic, &schema_id, keys.is_some(), port).await {
            Ok(announced) => announced,
            Err(e) => {
                link.close();
                sessions.release(SessionRole::Publisher, topic, id);
                return Err(e);
            }
        };
        let (descriptor, tns) = announced;

        info!(
            "Publishing {} (schema {}) on {}{}",
            descriptor.name(),
            descriptor.schema_id(),
            descriptor.endpoint(),
            if descriptor.is_secured() { ", secured" } else { "" }
        );

        let inner = Arc::new(PublisherInner {
            id,
            topics: HashSet::from([descriptor.clone()]),
            topic: descriptor,
            link,
            schema_registry: config.schema_registry().clone(),
            tns,
            config: config.clone(),
            terminated: AtomicBool::new(false),
        });
        let managed: Arc<dyn ManagedSession> = inner.clone();
        sessions.insert(&managed);

        Ok(Publisher { inner })
    }

    /// Encode `value` with the topic's schema and send it to every subscriber
    pub async fn publish(&self, value: &Value) -> Result<()> {
        if self.is_terminated() {
            return Err(TransportError::Closed.into());
        }

        let payload = self
            .inner
            .schema_registry
            .encode(self.inner.topic.schema_id(), value)?;
        self.inner
            .link
            .send(self.inner.topic.name(), payload)
            .await?;
        Ok(())
    }

    /// The descriptor subscribers use to reach this publisher
    pub fn topic(&self) -> &TopicDescriptor {
        &self.inner.topic
    }

    /// Topics this session was opened with
    pub fn topics(&self) -> &HashSet<TopicDescriptor> {
        &self.inner.topics
    }

    /// Port the transport is bound to
    pub fn local_port(&self) -> u16 {
        self.inner.link.local_port()
    }

    /// Whether the publisher was created secured
    pub fn is_secured(&self) -> bool {
        self.inner.topic.is_secured()
    }

    /// Whether `terminate()` has run
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Stop publishing and unregister from the TNS. Safe to call repeatedly.
    pub async fn terminate(&self) {
        self.inner.terminate().await;
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("id", &self.inner.id)
            .field("topic", &self.inner.topic)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Work out the advertised descriptor and register it with the TNS if any
async fn announce(
    config: &SessionConfig,
    mode: &DiscoveryMode,
    topic: &str,
    schema_id: &str,
    secured: bool,
    port: u16,
) -> Result<(TopicDescriptor, Option<(DiscoveryClient, String)>)> {
    let discovery = config.discovery();

    let advertised_port = match mode {
        DiscoveryMode::Managed {
            node_api_url,
            app_id: Some(app_id),
            ..
        } => discovery
            .app_info(node_api_url, app_id)
            .await?
            .public_port(port),
        _ => port,
    };

    let endpoint = Endpoint::new(mode.advertised_host(), advertised_port)?;
    let descriptor = TopicDescriptor::new(topic, schema_id, secured, endpoint)?;

    let tns = match mode.tns_url() {
        Some(tns_url) => {
            discovery.register_topic(tns_url, &descriptor).await?;
            debug!("Registered {} with TNS {}", topic, tns_url);
            Some((discovery, tns_url.to_string()))
        }
        None => None,
    };

    Ok((descriptor, tns))
}

#[async_trait]
impl ManagedSession for PublisherInner {
    fn id(&self) -> u64 {
        self.id
    }

    fn role(&self) -> SessionRole {
        SessionRole::Publisher
    }

    async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        self.link.close();
        let sessions = self.config.sessions();
        sessions.remove(self.id);
        sessions.release(SessionRole::Publisher, self.topic.name(), self.id);

        if let Some((discovery, tns_url)) = &self.tns {
            if let Err(e) = discovery.unregister_topic(tns_url, self.topic.name()).await {
                warn!("Failed to unregister {} from TNS: {}", self.topic.name(), e);
            }
        }
        info!("Terminated publisher for {}", self.topic.name());
    }
}

impl Drop for PublisherInner {
    fn drop(&mut self) {
        if !self.terminated.load(Ordering::Acquire) {
            let sessions = self.config.sessions();
            sessions.remove(self.id);
            sessions.release(SessionRole::Publisher, self.topic.name(), self.id);
            debug!("Publisher for {} dropped without terminate", self.topic.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_schema, CountingTransport, FakeRestClient};
    use serde_json::json;
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

    #[tokio::test]
    async fn test_create_requires_mode_and_schema() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::builder()
            .rest_client(FakeRestClient::new())
            .build()
            .unwrap();
        assert!(matches!(
            Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45501).await,
            Err(SessionError::InvalidMode { .. })
        ));

        let (config, transport) = standalone(&dir).await;
        assert!(matches!(
            Publisher::create(&config, "robot", SchemaSource::Id("S9".to_string()), 45501).await,
            Err(SessionError::UnknownSchema(_))
        ));
        assert!(matches!(
            Publisher::create(&config, "", SchemaSource::Id("S1".to_string()), 45501).await,
            Err(SessionError::InvalidArgument(_))
        ));
        assert_eq!(transport.binds(), 0);
    }

    #[tokio::test]
    async fn test_publish_and_terminate() {
        let dir = TempDir::new().unwrap();
        let (config, _transport) = standalone(&dir).await;
        let schema_file = dir.path().join("arm.yaml");
        std::fs::write(
            &schema_file,
            "id: ARM\nname: arm\nfields:\n  - name: x\n    type: number\n",
        )
        .unwrap();

        let publisher = Publisher::create(&config, "arm", SchemaSource::File(schema_file), 45502)
            .await
            .unwrap();
        assert!(config.has_schema("ARM"));
        assert_eq!(
            publisher.topic(),
            &TopicDescriptor::new("arm", "ARM", false, Endpoint::new("127.0.0.1", 45502).unwrap())
                .unwrap()
        );
        assert_eq!(publisher.topics().len(), 1);
        assert!(!publisher.is_secured());

        publisher.publish(&json!({"x": 1.5})).await.unwrap();
        assert!(matches!(
            publisher.publish(&json!({"y": 1})).await,
            Err(SessionError::Schema { .. })
        ));

        publisher.terminate().await;
        publisher.terminate().await;
        assert!(publisher.is_terminated());
        assert!(matches!(
            publisher.publish(&json!({"x": 1.5})).await,
            Err(SessionError::Transport(TransportError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_one_active_publisher_per_topic() {
        let dir = TempDir::new().unwrap();
        let (config, _transport) = standalone(&dir).await;

        let first = Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45503)
            .await
            .unwrap();
        assert!(matches!(
            Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45504).await,
            Err(SessionError::InvalidArgument(_))
        ));

        first.terminate().await;
        let second = Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45504)
            .await
            .unwrap();
        second.terminate().await;
    }

    #[tokio::test]
    async fn test_managed_publisher_registers_with_tns() {
        let dir = TempDir::new().unwrap();
        let rest = FakeRestClient::new();
        rest.set_response(
            "http://node:48098/api/v1/management/nodes/configuration",
            json!({"node_address": "10.0.0.5", "registry_url": "http://registry:48099"}),
        );
        rest.set_response(
            "http://registry:48099/api/v1/registry/tns",
            json!({"tns_url": "http://tns"}),
        );
        rest.set_response(
            "http://node:48098/api/v1/management/apps/robot-app",
            json!({"host": "10.0.0.5", "ports": [{"private": 45505, "public": 35505}]}),
        );
        rest.set_response("http://tns/topics", Value::Null);
        rest.set_response("http://tns/topics/robot", Value::Null);

        let config = SessionConfig::builder()
            .rest_client(rest.clone())
            .build()
            .unwrap();
        let registry = dir.path().join("registry.yaml");
        std::fs::write(
            &registry,
            "node:\n  api_url: http://node:48098\napp:\n  id: robot-app\n",
        )
        .unwrap();
        config.start_managed_mode(&registry).await.unwrap();
        config
            .add_schema(&[write_schema(&dir, "robot.yaml", "S1")])
            .await
            .unwrap();

        let publisher = Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45505)
            .await
            .unwrap();
        assert_eq!(publisher.topic().endpoint(), &Endpoint::new("10.0.0.5", 35505).unwrap());
        assert_eq!(rest.posted("http://tns/topics")[0]["endpoint"], "10.0.0.5:35505");

        publisher.terminate().await;
        assert!(rest
            .calls()
            .contains(&"DELETE http://tns/topics/robot".to_string()));
    }

    #[tokio::test]
    async fn test_failed_tns_registration_releases_port() {
        let dir = TempDir::new().unwrap();
        let config = SessionConfig::builder()
            .rest_client(FakeRestClient::new())
            .build()
            .unwrap();
        let tns_file = dir.path().join("tns.yaml");
        std::fs::write(&tns_file, "tns:\n  url: http://tns\n").unwrap();
        config
            .start_standalone_mode("127.0.0.1", true, Some(&tns_file))
            .await
            .unwrap();
        config
            .add_schema(&[write_schema(&dir, "robot.yaml", "S1")])
            .await
            .unwrap();

        assert!(matches!(
            Publisher::create(&config, "robot", SchemaSource::Id("S1".to_string()), 45506).await,
            Err(SessionError::Rest(_))
        ));
        assert_eq!(config.sessions().live_count(), 0);
    }
}
