//! Schema registry adapter.
//!
//! Payloads are structured values (`serde_json::Value` objects) validated
//! against a registered schema and carried on the wire as CBOR.

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Schema registry errors
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Schema file could not be read
    #[error("failed to read schema {path:?}: {source}")]
    Io {
        /// Schema file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// Schema file is not a valid definition
    #[error("failed to parse schema {path:?}: {reason}")]
    Parse {
        /// Schema file path
        path: PathBuf,
        /// Parser message
        reason: String,
    },
    /// Id already used by a different definition in this process
    #[error("schema id {0} was already registered with a different definition")]
    Conflict(String),
    /// Id is not currently registered
    #[error("schema {0} is not registered")]
    NotRegistered(String),
    /// Value does not match the schema
    #[error("payload does not match schema {schema_id}: {reason}")]
    Validation {
        /// Schema id
        schema_id: String,
        /// First mismatch found
        reason: String,
    },
    /// CBOR encoding failed
    #[error("payload encoding failed: {0}")]
    Encode(String),
    /// CBOR decoding failed
    #[error("payload decoding failed: {0}")]
    Decode(String),
}

/// Schema service consumed by the session layer
pub trait SchemaRegistry: Send + Sync {
    /// Parse and register a schema file, returning its id
    fn register(&self, path: &Path) -> Result<String, SchemaError>;

    /// Validate and serialize a value
    fn encode(&self, schema_id: &str, value: &Value) -> Result<Bytes, SchemaError>;

    /// Deserialize and validate a payload
    fn decode(&self, schema_id: &str, bytes: &[u8]) -> Result<Value, SchemaError>;

    /// Drop a registration; the id is never handed to a different schema afterwards
    fn remove(&self, schema_id: &str);
}

/// Field value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// JSON boolean
    Boolean,
    /// Signed or unsigned integer
    Integer,
    /// Any number
    Number,
    /// UTF-8 string
    String,
    /// Array of any values
    Array,
    /// Nested object
    Object,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::Boolean => value.is_boolean(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

/// One field of a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub kind: FieldType,
    /// Whether the field may be absent or null
    #[serde(default)]
    pub optional: bool,
}

/// Schema file contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Explicit id; defaults to `{name}_{version}`
    #[serde(default)]
    pub id: Option<String>,
    /// Schema name
    pub name: String,
    /// Schema version
    #[serde(default)]
    pub version: Option<String>,
    /// Record fields
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl SchemaDefinition {
    /// Id this definition registers under
    pub fn schema_id(&self) -> String {
        match (&self.id, &self.version) {
            (Some(id), _) => id.clone(),
            (None, Some(version)) => format!("{}_{}", self.name, version),
            (None, None) => self.name.clone(),
        }
    }

    fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("schema name is empty".to_string());
        }
        if matches!(&self.id, Some(id) if id.trim().is_empty()) {
            return Err("schema id is empty".to_string());
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err("field name is empty".to_string());
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!("duplicate field {}", field.name));
            }
        }
        Ok(())
    }

    /// Check a value against this definition
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let object = value
            .as_object()
            .ok_or_else(|| "payload is not an object".to_string())?;

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.optional => {}
                None => return Err(format!("missing field {}", field.name)),
                Some(v) if !field.kind.accepts(v) => {
                    return Err(format!("field {} is not {:?}", field.name, field.kind))
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = object
            .keys()
            .find(|k| !self.fields.iter().any(|f| &f.name == *k))
        {
            return Err(format!("unknown field {}", unknown));
        }
        Ok(())
    }
}

/// Registry backed by YAML or JSON schema files
#[derive(Default)]
pub struct FileSchemaRegistry {
    /// Currently registered schemas
    live: DashMap<String, SchemaDefinition>,
    /// Every definition ever registered, kept so ids are never reassigned
    history: DashMap<String, SchemaDefinition>,
}

impl FileSchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already parsed definition
    pub fn register_definition(&self, definition: SchemaDefinition) -> Result<String, SchemaError> {
        let schema_id = definition.schema_id();

        if let Some(previous) = self.history.get(&schema_id) {
            if *previous != definition {
                return Err(SchemaError::Conflict(schema_id));
            }
        }

        self.history.insert(schema_id.clone(), definition.clone());
        self.live.insert(schema_id.clone(), definition);
        Ok(schema_id)
    }

    fn definition(&self, schema_id: &str) -> Result<SchemaDefinition, SchemaError> {
        self.live
            .get(schema_id)
            .map(|d| d.clone())
            .ok_or_else(|| SchemaError::NotRegistered(schema_id.to_string()))
    }
}

impl SchemaRegistry for FileSchemaRegistry {
    fn register(&self, path: &Path) -> Result<String, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // serde_yaml also accepts JSON documents
        let definition: SchemaDefinition =
            serde_yaml::from_str(&content).map_err(|e| SchemaError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        definition.check().map_err(|reason| SchemaError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;

        let schema_id = self.register_definition(definition)?;
        info!("Registered schema {} from {:?}", schema_id, path);
        Ok(schema_id)
    }

    fn encode(&self, schema_id: &str, value: &Value) -> Result<Bytes, SchemaError> {
        let definition = self.definition(schema_id)?;
        definition
            .validate(value)
            .map_err(|reason| SchemaError::Validation {
                schema_id: schema_id.to_string(),
                reason,
            })?;

        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).map_err(|e| SchemaError::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    fn decode(&self, schema_id: &str, bytes: &[u8]) -> Result<Value, SchemaError> {
        let definition = self.definition(schema_id)?;
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| SchemaError::Decode(e.to_string()))?;
        definition
            .validate(&value)
            .map_err(|reason| SchemaError::Validation {
                schema_id: schema_id.to_string(),
                reason,
            })?;
        Ok(value)
    }

    fn remove(&self, schema_id: &str) {
        if self.live.remove(schema_id).is_some() {
            debug!("Removed schema {}", schema_id);
        }
    }
}
