//! REST discovery client for the TNS and the node runtime registry.
//!
//! Every call is a single request with no retry; transport failures come back
//! as `Rest` and bodies that do not have the expected shape as
//! `InvalidResponse`.

use crate::endpoint::Endpoint;
use crate::error::{Result, SessionError};
use crate::rest::{RestClient, RestError};
use crate::topic::TopicDescriptor;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Node runtime configuration path
pub const NODE_CONFIGURATION_PATH: &str = "/api/v1/management/nodes/configuration";
/// Application runtime info path prefix
pub const APPS_PATH: &str = "/api/v1/management/apps";
/// Cluster registry TNS lookup path
pub const REGISTRY_TNS_PATH: &str = "/api/v1/registry/tns";
/// TNS topics collection path
pub const TNS_TOPICS_PATH: &str = "/topics";

/// Join a base URL and a path with exactly one slash
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// URL of one topic record in the TNS.
///
/// `/` in the name separates path segments; every other reserved character
/// is percent-encoded.
pub fn topic_url(tns_url: &str, name: &str) -> Result<String> {
    let base = join_url(tns_url, TNS_TOPICS_PATH);
    let mut url = Url::parse(&base)
        .map_err(|e| SessionError::InvalidArgument(format!("invalid TNS URL {}: {}", tns_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| SessionError::InvalidArgument(format!("TNS URL {} cannot take a path", tns_url)))?
        .extend(name.split('/').filter(|segment| !segment.is_empty()));
    Ok(url.into())
}

/// Node runtime information
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Address other nodes reach this node at
    pub node_address: String,
    /// Base URL of the cluster registry
    pub registry_url: String,
}

#[derive(Debug, Deserialize)]
struct TnsInfo {
    tns_url: String,
}

/// Port published by the runtime for a container port
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    /// Port inside the application
    pub private: u16,
    /// Port reachable from outside
    pub public: u16,
}

/// Application runtime information
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AppInfo {
    /// Host the application is reachable at
    pub host: String,
    /// Published ports
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

impl AppInfo {
    /// Public port for a private port; unmapped ports are used as is
    pub fn public_port(&self, private: u16) -> u16 {
        self.ports
            .iter()
            .find(|m| m.private == private)
            .map(|m| m.public)
            .unwrap_or(private)
    }
}

/// One topic record returned by the TNS
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TopicEntry {
    /// Topic name
    pub name: String,
    /// `host:port` as registered by the publisher
    pub endpoint: String,
    /// Schema id
    pub schema: String,
    /// Whether the publisher is secured
    #[serde(default)]
    pub secured: bool,
    /// Runtime info URL when the topic is hosted by another application
    #[serde(default)]
    pub runtime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TopicList {
    topics: Vec<TopicEntry>,
}

fn parse<T: DeserializeOwned>(url: &str, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| SessionError::invalid_response(url, e.to_string()))
}

// A body that is not JSON is a malformed response, not a transport failure
fn map_rest_error(error: RestError) -> SessionError {
    match error {
        RestError::Body { url, reason } => SessionError::InvalidResponse { url, reason },
        other => SessionError::Rest(other),
    }
}

/// Typed REST calls against the TNS and runtime registry
#[derive(Clone)]
pub struct DiscoveryClient {
    rest: Arc<dyn RestClient>,
}

impl DiscoveryClient {
    /// Wrap a REST client
    pub fn new(rest: Arc<dyn RestClient>) -> Self {
        Self { rest }
    }

    async fn get(&self, url: &str) -> Result<Value> {
        self.rest.get(url).await.map_err(map_rest_error)
    }

    /// Fetch the local node's runtime configuration
    pub async fn node_info(&self, node_api_url: &str) -> Result<NodeInfo> {
        let url = join_url(node_api_url, NODE_CONFIGURATION_PATH);
        let body = self.get(&url).await?;
        let info: NodeInfo = parse(&url, body)?;
        if info.node_address.is_empty() || info.registry_url.is_empty() {
            return Err(SessionError::invalid_response(&url, "empty node_address or registry_url"));
        }
        Ok(info)
    }

    /// Ask the cluster registry for the TNS base URL
    pub async fn tns_url(&self, registry_url: &str) -> Result<String> {
        let url = join_url(registry_url, REGISTRY_TNS_PATH);
        let body = self.get(&url).await?;
        let info: TnsInfo = parse(&url, body)?;
        if info.tns_url.is_empty() {
            return Err(SessionError::invalid_response(&url, "empty tns_url"));
        }
        Ok(info.tns_url)
    }

    /// Fetch an application's runtime info by id from the local node
    pub async fn app_info(&self, node_api_url: &str, app_id: &str) -> Result<AppInfo> {
        let url = join_url(node_api_url, &format!("{}/{}", APPS_PATH, app_id));
        self.app_info_at(&url).await
    }

    /// Fetch application runtime info from a full URL
    pub async fn app_info_at(&self, url: &str) -> Result<AppInfo> {
        let body = self.get(url).await?;
        let info: AppInfo = parse(url, body)?;
        if info.host.is_empty() {
            return Err(SessionError::invalid_response(url, "empty host"));
        }
        Ok(info)
    }

    /// Look up a topic name in the TNS
    pub async fn query_topic(&self, tns_url: &str, name: &str) -> Result<Vec<TopicEntry>> {
        let url = topic_url(tns_url, name)?;
        let body = self.get(&url).await?;
        let list: TopicList = parse(&url, body)?;
        debug!("TNS returned {} record(s) for {}", list.topics.len(), name);
        Ok(list.topics)
    }

    /// Register a publisher's topic with the TNS
    pub async fn register_topic(&self, tns_url: &str, topic: &TopicDescriptor) -> Result<()> {
        let url = join_url(tns_url, TNS_TOPICS_PATH);
        let body = json!({
            "name": topic.name(),
            "endpoint": topic.endpoint().to_string(),
            "schema": topic.schema_id(),
            "secured": topic.is_secured(),
        });
        self.rest.post(&url, &body).await.map_err(map_rest_error)?;
        Ok(())
    }

    /// Remove a topic from the TNS
    pub async fn unregister_topic(&self, tns_url: &str, name: &str) -> Result<()> {
        let url = topic_url(tns_url, name)?;
        self.rest.delete(&url).await.map_err(map_rest_error)?;
        Ok(())
    }
}

impl TopicEntry {
    /// Parse the registered endpoint
    pub fn parse_endpoint(&self, url: &str) -> Result<Endpoint> {
        self.endpoint
            .parse::<Endpoint>()
            .map_err(|e| SessionError::invalid_response(url, e.to_string()))
    }
}
