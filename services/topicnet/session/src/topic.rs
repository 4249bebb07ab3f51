//! Topic descriptor value type.

use crate::endpoint::Endpoint;
use crate::error::{Result, SessionError};
use std::fmt;

/// Fully resolved topic: name, schema id, security flag and endpoint.
///
/// `Eq` and `Hash` cover all four fields so descriptors can key maps of
/// per-topic server keys. Use [`TopicDescriptor::is_same_topic`] to compare
/// by name and schema only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicDescriptor {
    name: String,
    schema_id: String,
    secured: bool,
    endpoint: Endpoint,
}

impl TopicDescriptor {
    /// Create a descriptor; the name must be non-empty
    pub fn new(
        name: impl Into<String>,
        schema_id: impl Into<String>,
        secured: bool,
        endpoint: Endpoint,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SessionError::InvalidArgument("topic name is empty".to_string()));
        }
        Ok(Self {
            name,
            schema_id: schema_id.into(),
            secured,
            endpoint,
        })
    }

    /// Topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema id payloads are encoded with
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    /// Whether the topic requires a secured session
    pub fn is_secured(&self) -> bool {
        self.secured
    }

    /// Endpoint of the publisher
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Same logical topic: name and schema id match
    pub fn is_same_topic(&self, other: &TopicDescriptor) -> bool {
        self.name == other.name && self.schema_id == other.schema_id
    }
}

impl fmt::Display for TopicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]@{}{}",
            self.name,
            self.schema_id,
            self.endpoint,
            if self.secured { " (secured)" } else { "" }
        )
    }
}
