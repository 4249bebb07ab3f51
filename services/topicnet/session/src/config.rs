//! Session configuration: discovery mode, schema table and collaborators.
//!
//! A `SessionConfig` starts Uninitialized, moves to Standalone or Managed
//! exactly once, and returns to Uninitialized on `reset()`. It is passed by
//! reference to the resolver and the session factories; `global()` offers a
//! shared instance for callers that want one.

use crate::discovery::DiscoveryClient;
use crate::error::{Result, SessionError};
use crate::keys::KeyStore;
use crate::manager::SessionRegistry;
use crate::registry_config::{RegistryConfig, TnsFileConfig};
use crate::rest::{HttpRestClient, RestClient};
use crate::schema::{FileSchemaRegistry, SchemaRegistry};
use crate::transport::{TcpTransport, Transport};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Active discovery mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Caller supplies endpoints; a TNS may still be used for names
    Standalone {
        /// Host publishers advertise
        host: String,
        /// TNS base URL when started with `use_tns`
        tns_url: Option<String>,
    },
    /// Endpoints resolved through the TNS and the node runtime
    Managed {
        /// TNS base URL from the cluster registry
        tns_url: String,
        /// Address of this node
        node_address: String,
        /// Node runtime API base URL
        node_api_url: String,
        /// Application id for public port lookups
        app_id: Option<String>,
    },
}

impl DiscoveryMode {
    /// Short mode name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryMode::Standalone { .. } => "standalone",
            DiscoveryMode::Managed { .. } => "managed",
        }
    }

    /// TNS base URL, if this mode has one
    pub fn tns_url(&self) -> Option<&str> {
        match self {
            DiscoveryMode::Standalone { tns_url, .. } => tns_url.as_deref(),
            DiscoveryMode::Managed { tns_url, .. } => Some(tns_url),
        }
    }

    /// Host publishers advertise in their topic descriptors
    pub fn advertised_host(&self) -> &str {
        match self {
            DiscoveryMode::Standalone { host, .. } => host,
            DiscoveryMode::Managed { node_address, .. } => node_address,
        }
    }
}

/// Name used for the Uninitialized state in `InvalidMode` errors
pub const UNINITIALIZED: &str = "uninitialized";

/// A registered schema file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistration {
    /// Id assigned by the schema registry
    pub schema_id: String,
    /// File it was read from
    pub source_path: PathBuf,
}

#[derive(Debug, Default)]
struct ConfigState {
    mode: Option<DiscoveryMode>,
    schemas: HashMap<String, SchemaRegistration>,
    by_path: HashMap<PathBuf, String>,
}

/// Builder for [`SessionConfig`]
#[derive(Default)]
pub struct SessionConfigBuilder {
    rest: Option<Arc<dyn RestClient>>,
    schema_registry: Option<Arc<dyn SchemaRegistry>>,
    transport: Option<Arc<dyn Transport>>,
}

impl SessionConfigBuilder {
    /// Use a custom REST client
    pub fn rest_client(mut self, rest: Arc<dyn RestClient>) -> Self {
        self.rest = Some(rest);
        self
    }

    /// Use a custom schema registry
    pub fn schema_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.schema_registry = Some(registry);
        self
    }

    /// Use a custom transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the configuration; unset collaborators get their defaults
    pub fn build(self) -> Result<Arc<SessionConfig>> {
        let rest: Arc<dyn RestClient> = match self.rest {
            Some(rest) => rest,
            None => Arc::new(HttpRestClient::new()?),
        };

        Ok(Arc::new(SessionConfig {
            lifecycle: tokio::sync::Mutex::new(()),
            state: RwLock::new(ConfigState::default()),
            rest,
            schema_registry: self
                .schema_registry
                .unwrap_or_else(|| Arc::new(FileSchemaRegistry::new())),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(TcpTransport::new())),
            keys: KeyStore::new(),
            sessions: SessionRegistry::new(),
        }))
    }
}

/// Discovery mode, schema table and shared collaborators
pub struct SessionConfig {
    /// Serializes `start_*`, `add_schema` and `reset`
    lifecycle: tokio::sync::Mutex<()>,
    state: RwLock<ConfigState>,
    rest: Arc<dyn RestClient>,
    schema_registry: Arc<dyn SchemaRegistry>,
    transport: Arc<dyn Transport>,
    keys: KeyStore,
    sessions: SessionRegistry,
}

static GLOBAL: OnceCell<Arc<SessionConfig>> = OnceCell::new();

impl SessionConfig {
    /// Start building a configuration
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Build a configuration with the default collaborators
    pub fn new() -> Result<Arc<Self>> {
        Self::builder().build()
    }

    /// Process-wide instance, created on first access
    pub fn global() -> Result<Arc<SessionConfig>> {
        GLOBAL.get_or_try_init(SessionConfig::new).cloned()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConfigState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConfigState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_uninitialized(&self) -> Result<()> {
        if self.read_state().mode.is_some() {
            return Err(SessionError::AlreadyInitialized);
        }
        Ok(())
    }

    /// Enter standalone mode.
    ///
    /// With `use_tns`, `tns_file` names a YAML file holding the TNS URL so
    /// well-known names can still be resolved.
    pub async fn start_standalone_mode(
        &self,
        host: &str,
        use_tns: bool,
        tns_file: Option<&Path>,
    ) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_uninitialized()?;

        if host.trim().is_empty() {
            return Err(SessionError::InvalidArgument("host must not be empty".to_string()));
        }

        let tns_url = match (use_tns, tns_file) {
            (true, Some(path)) => Some(TnsFileConfig::load_from_file(path)?.tns.url),
            (true, None) => {
                return Err(SessionError::InvalidArgument(
                    "use_tns requires a TNS file".to_string(),
                ))
            }
            (false, _) => None,
        };

        info!(
            "Starting standalone mode on host {} (TNS: {})",
            host,
            tns_url.as_deref().unwrap_or("none")
        );
        self.write_state().mode = Some(DiscoveryMode::Standalone {
            host: host.to_string(),
            tns_url,
        });
        Ok(())
    }

    /// Enter managed mode from a registry config file.
    ///
    /// The TNS URL is looked up from the node runtime and then the cluster
    /// registry. No lock is held during those calls; the mode is committed
    /// only if nothing else initialized the config meanwhile.
    pub async fn start_managed_mode<P: AsRef<Path>>(&self, registry_config: P) -> Result<()> {
        self.ensure_uninitialized()?;

        let registry = RegistryConfig::load_from_file(registry_config)?;
        let discovery = self.discovery();
        let node = discovery.node_info(&registry.node.api_url).await?;
        let tns_url = discovery.tns_url(&node.registry_url).await?;

        let _guard = self.lifecycle.lock().await;
        self.ensure_uninitialized()?;

        info!(
            "Starting managed mode: node {} via {}, TNS {}",
            node.node_address, registry.node.api_url, tns_url
        );
        self.write_state().mode = Some(DiscoveryMode::Managed {
            tns_url,
            node_address: node.node_address,
            node_api_url: registry.node.api_url,
            app_id: registry.app.id,
        });
        Ok(())
    }

    /// Register schema files in order and return their ids.
    ///
    /// Registration stops at the first failure. Schemas registered earlier in
    /// the same call stay registered and are listed in the error.
    pub async fn add_schema<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<String>> {
        let _guard = self.lifecycle.lock().await;

        let mut registered = Vec::with_capacity(paths.len());
        for path in paths {
            match self.register_schema_path(path.as_ref()) {
                Ok(schema_id) => registered.push(schema_id),
                Err(source) => {
                    warn!(
                        "Schema registration failed at {:?} after {} schema(s): {}",
                        path.as_ref(),
                        registered.len(),
                        source
                    );
                    return Err(SessionError::Schema { registered, source });
                }
            }
        }
        Ok(registered)
    }

    fn register_schema_path(&self, path: &Path) -> std::result::Result<String, crate::schema::SchemaError> {
        if let Some(schema_id) = self.read_state().by_path.get(path) {
            debug!("Schema {:?} already registered as {}", path, schema_id);
            return Ok(schema_id.clone());
        }

        let schema_id = self.schema_registry.register(path)?;
        let mut state = self.write_state();
        state.by_path.insert(path.to_path_buf(), schema_id.clone());
        state.schemas.insert(
            schema_id.clone(),
            SchemaRegistration {
                schema_id: schema_id.clone(),
                source_path: path.to_path_buf(),
            },
        );
        Ok(schema_id)
    }

    /// Whether a schema id is registered
    pub fn has_schema(&self, schema_id: &str) -> bool {
        self.read_state().schemas.contains_key(schema_id)
    }

    /// Registration record for a schema id
    pub fn schema(&self, schema_id: &str) -> Option<SchemaRegistration> {
        self.read_state().schemas.get(schema_id).cloned()
    }

    /// Current discovery mode, `None` while Uninitialized
    pub fn mode(&self) -> Option<DiscoveryMode> {
        self.read_state().mode.clone()
    }

    /// Whether a mode has been started
    pub fn is_initialized(&self) -> bool {
        self.read_state().mode.is_some()
    }

    /// Current mode, or `InvalidMode` naming `operation`
    pub(crate) fn require_mode(&self, operation: &str) -> Result<DiscoveryMode> {
        self.mode()
            .ok_or_else(|| SessionError::invalid_mode(UNINITIALIZED, operation))
    }

    /// Key store used by name-based secured subscriptions
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Registry of open sessions
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub(crate) fn discovery(&self) -> DiscoveryClient {
        DiscoveryClient::new(self.rest.clone())
    }

    pub(crate) fn schema_registry(&self) -> &Arc<dyn SchemaRegistry> {
        &self.schema_registry
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Terminate every open session, drop all schemas and key material and
    /// return to Uninitialized. Never fails.
    pub async fn reset(&self) {
        let sessions = {
            let _guard = self.lifecycle.lock().await;

            let schema_ids: Vec<String> = {
                let mut state = self.write_state();
                state.mode = None;
                state.by_path.clear();
                state.schemas.drain().map(|(id, _)| id).collect()
            };
            for schema_id in &schema_ids {
                self.schema_registry.remove(schema_id);
            }
            self.keys.clear();

            debug!("Dropped {} schema registration(s)", schema_ids.len());
            self.sessions.drain()
        };

        let count = SessionRegistry::terminate_sessions(sessions).await;
        info!("Session configuration reset; terminated {} session(s)", count);
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("mode", &self.mode())
            .field("sessions", &self.sessions)
            .finish()
    }
}
