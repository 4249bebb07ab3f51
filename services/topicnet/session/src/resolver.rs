//! Topic resolution.
//!
//! Bare names go through the TNS (and, for topics hosted by another
//! application, that application's runtime info). Caller-built descriptors
//! are used verbatim. Either way every descriptor handed back names a
//! registered schema.

use crate::config::{DiscoveryMode, SessionConfig};
use crate::discovery::topic_url;
use crate::endpoint::Endpoint;
use crate::error::{Result, SessionError};
use crate::topic::TopicDescriptor;
use std::sync::Arc;
use tracing::debug;

/// Resolves topic names and validates descriptors against a config
#[derive(Debug, Clone)]
pub struct TopicResolver {
    config: Arc<SessionConfig>,
}

impl TopicResolver {
    /// Create a resolver reading from `config`
    pub fn new(config: &Arc<SessionConfig>) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Resolve a bare topic name through the TNS.
    ///
    /// Requires managed mode, or standalone mode started with a TNS. Each
    /// TNS record becomes one descriptor; no retry is attempted on failure.
    pub async fn resolve_name(&self, name: &str) -> Result<Vec<TopicDescriptor>> {
        if name.is_empty() {
            return Err(SessionError::InvalidArgument(
                "topic name must not be empty".to_string(),
            ));
        }

        let operation = format!("resolving topic name {:?}", name);
        let mode = self.config.require_mode(&operation)?;
        let tns_url = mode
            .tns_url()
            .ok_or_else(|| SessionError::invalid_mode(mode.name(), operation.as_str()))?
            .to_string();

        let discovery = self.config.discovery();
        let query_url = topic_url(&tns_url, name)?;
        let entries = discovery.query_topic(&tns_url, name).await?;
        if entries.is_empty() {
            return Err(SessionError::invalid_response(
                &query_url,
                format!("no record for topic {}", name),
            ));
        }

        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut endpoint = entry.parse_endpoint(&query_url)?;

            if let Some(runtime_url) = &entry.runtime {
                let app = discovery.app_info_at(runtime_url).await?;
                endpoint = Endpoint::new(app.host.clone(), app.public_port(endpoint.port()))
                    .map_err(|e| SessionError::invalid_response(runtime_url, e.to_string()))?;
                debug!("Topic {} is hosted at {} via {}", entry.name, endpoint, runtime_url);
            }

            let descriptor = TopicDescriptor::new(&entry.name, &entry.schema, entry.secured, endpoint)
                .map_err(|e| SessionError::invalid_response(&query_url, e.to_string()))?;
            resolved.push(self.validate(&descriptor)?);
        }

        debug!("Resolved {} to {} descriptor(s)", name, resolved.len());
        Ok(resolved)
    }

    /// Check a caller-supplied descriptor: a mode must be active and the
    /// schema must be registered. No network call is made.
    pub fn validate(&self, topic: &TopicDescriptor) -> Result<TopicDescriptor> {
        self.config
            .require_mode(&format!("subscribing to {}", topic.name()))?;
        if !self.config.has_schema(topic.schema_id()) {
            return Err(SessionError::UnknownSchema(topic.schema_id().to_string()));
        }
        Ok(topic.clone())
    }

    /// Mode the resolver currently works in
    pub fn mode(&self) -> Option<DiscoveryMode> {
        self.config.mode()
    }
}
