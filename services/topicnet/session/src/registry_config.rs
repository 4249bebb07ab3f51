//! Configuration files read when starting a discovery mode.
//!
//! Managed mode reads a registry config naming the local node's runtime API
//! and this application's id; standalone mode may read a TNS file. Both are
//! YAML and both accept environment overrides.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Managed mode registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Local node runtime
    pub node: NodeSection,
    /// This application
    #[serde(default)]
    pub app: AppSection,
}

/// Local node runtime section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSection {
    /// Base URL of the node runtime API, e.g. `http://localhost:48098`
    pub api_url: String,
}

/// Application section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSection {
    /// Application/container id registered with the node runtime
    #[serde(default)]
    pub id: Option<String>,
}

/// Standalone mode TNS file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TnsFileConfig {
    /// TNS section
    pub tns: TnsSection,
}

/// TNS section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TnsSection {
    /// Base URL of the TNS, e.g. `http://tns:48323/api/v1/tns`
    pub url: String,
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| SessionError::InvalidConfigFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| SessionError::InvalidConfigFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn require_url(path: &Path, field: &str, value: &str) -> Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(SessionError::InvalidConfigFile {
            path: path.to_path_buf(),
            reason: format!("{} must be an http(s) URL, got {:?}", field, value),
        })
    }
}

impl RegistryConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config: RegistryConfig = read_yaml(path)?;

        config.apply_environment_overrides();
        require_url(path, "node.api_url", &config.node.api_url)?;
        if matches!(&config.app.id, Some(id) if id.trim().is_empty()) {
            config.app.id = None;
        }

        info!(
            "Loaded registry configuration from {:?}: node_api={}, app_id={:?}",
            path, config.node.api_url, config.app.id
        );
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(api_url) = std::env::var("TOPICNET_NODE_API_URL") {
            info!("Node API URL overridden by environment: {}", api_url);
            self.node.api_url = api_url;
        }

        if let Ok(app_id) = std::env::var("TOPICNET_APP_ID") {
            info!("Application id overridden by environment: {}", app_id);
            self.app.id = Some(app_id);
        }
    }
}

impl TnsFileConfig {
    /// Load the TNS file and apply the `TOPICNET_TNS_URL` override
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config: TnsFileConfig = read_yaml(path)?;

        if let Ok(url) = std::env::var("TOPICNET_TNS_URL") {
            info!("TNS URL overridden by environment: {}", url);
            config.tns.url = url;
        }
        require_url(path, "tns.url", &config.tns.url)?;

        info!("Loaded TNS configuration from {:?}: {}", path, config.tns.url);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_load_registry_config() {
        let yaml_content = r#"
node:
  api_url: http://localhost:48098
app:
  id: robot-app
"#;
        let temp_file = file(yaml_content);
        let config = RegistryConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.node.api_url, "http://localhost:48098");
        assert_eq!(config.app.id.as_deref(), Some("robot-app"));
    }

    #[test]
    fn test_app_section_is_optional() {
        let temp_file = file("node:\n  api_url: http://localhost:48098\n");
        let config = RegistryConfig::load_from_file(temp_file.path()).unwrap();
        assert!(config.app.id.is_none());
    }

    #[test]
    fn test_missing_or_invalid_file() {
        assert!(matches!(
            RegistryConfig::load_from_file("/nonexistent/registry.yaml"),
            Err(SessionError::InvalidConfigFile { .. })
        ));
        assert!(matches!(
            RegistryConfig::load_from_file(file("node: [").path()),
            Err(SessionError::InvalidConfigFile { .. })
        ));
        assert!(matches!(
            RegistryConfig::load_from_file(file("app:\n  id: x\n").path()),
            Err(SessionError::InvalidConfigFile { .. })
        ));
        assert!(matches!(
            RegistryConfig::load_from_file(file("node:\n  api_url: localhost\n").path()),
            Err(SessionError::InvalidConfigFile { .. })
        ));
    }

    #[test]
    fn test_load_tns_file() {
        let temp_file = file("tns:\n  url: http://tns:48323/api/v1/tns\n");
        let config = TnsFileConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.tns.url, "http://tns:48323/api/v1/tns");

        assert!(TnsFileConfig::load_from_file(file("tns: {}\n").path()).is_err());
    }
}
