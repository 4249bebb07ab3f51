//! Topic resolution and publish/subscribe session management for topicnet.
//!
//! This crate resolves topic names to endpoints, validates topics against
//! registered schemas and manages the lifecycle of unsecured and secured
//! publisher and subscriber sessions.
//!
//! ## Features
//!
//! - **Discovery modes**: standalone (caller-supplied endpoints, optional
//!   TNS) and managed (TNS plus node runtime registry)
//! - **Topic Resolver**: TNS lookups with two-hop runtime resolution
//! - **Schema Registry**: YAML/JSON schemas, CBOR payloads
//! - **Secured sessions**: x25519 key agreement, ChaCha20-Poly1305 framing
//! - **Session Manager**: idempotent terminate, bulk teardown on `reset()`
//! - **Text delivery**: subscribers that receive payloads rendered as JSON
//!   or YAML text
//!
//! ## Example
//!
//! ```rust,no_run
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//! use topicnet_session::{
//!     ErrorCode, Publisher, SchemaSource, SessionConfig, Subscriber, SubscriberCallback,
//! };
//!
//! struct Print;
//!
//! impl SubscriberCallback for Print {
//!     fn on_message(&self, topic: &str, payload: Value) {
//!         println!("{}: {}", topic, payload);
//!     }
//!
//!     fn on_error(&self, topic: &str, code: ErrorCode) {
//!         eprintln!("{}: {}", topic, code);
//!     }
//! }
//!
//! # async fn example() -> topicnet_session::Result<()> {
//! let config = SessionConfig::new()?;
//! config.start_standalone_mode("127.0.0.1", false, None).await?;
//! config.add_schema(&["schemas/robot.yaml"]).await?;
//!
//! let publisher = Publisher::create(&config, "robot", SchemaSource::Id("robot_1".into()), 5562).await?;
//! let subscriber = Subscriber::subscribe(&config, publisher.topic().clone(), Arc::new(Print)).await?;
//!
//! publisher.publish(&json!({"seq": 1})).await?;
//!
//! subscriber.terminate().await;
//! publisher.terminate().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod keys;
pub mod manager;
pub mod publisher;
pub mod registry_config;
pub mod resolver;
pub mod rest;
pub mod schema;
pub mod subscriber;
pub mod text_subscriber;
pub mod topic;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{DiscoveryMode, SchemaRegistration, SessionConfig, SessionConfigBuilder};
pub use discovery::{AppInfo, DiscoveryClient, NodeInfo, PortMapping, TopicEntry};
pub use endpoint::Endpoint;
pub use error::{ErrorCode, Result, SessionError};
pub use keys::{validate_secured_topics, KeyPair, KeyStore, PublicKey};
pub use manager::{ManagedSession, SessionRegistry, SessionRole};
pub use publisher::{Publisher, SchemaSource};
pub use registry_config::{RegistryConfig, TnsFileConfig};
pub use resolver::TopicResolver;
pub use rest::{HttpRestClient, RestClient, RestError};
pub use schema::{FileSchemaRegistry, SchemaDefinition, SchemaError, SchemaRegistry};
pub use subscriber::{Subscriber, SubscriberCallback};
pub use text_subscriber::{TextFormat, TextSubscriber, TextSubscriberCallback};
pub use topic::TopicDescriptor;
pub use transport::{
    ClientSecurity, Inbound, PublisherLink, SubscriberLink, TcpTransport, Transport,
    TransportError,
};
