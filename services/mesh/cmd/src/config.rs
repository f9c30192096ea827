//! Configuration handling for the mesh daemon.
//!
//! Reads the shared YAML config file and environment-variable overrides,
//! providing a unified configuration interface.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Mesh daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Nickname announced to the mesh
    pub nickname: String,
    /// UDP port for the reference transport
    pub port: u16,
    /// Data directory (identity key lives here)
    pub data_dir: PathBuf,
    /// Seconds between identity announcements
    pub announce_interval_secs: u64,
    /// Hop budget for locally originated packets
    pub message_ttl: u8,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            nickname: "anonymous".to_string(),
            port: 47_900,
            data_dir: PathBuf::from("./emberdata"),
            announce_interval_secs: 30,
            message_ttl: 3,
        }
    }
}

/// Root configuration structure (matches the YAML layout)
#[derive(Debug, Deserialize)]
struct RootConfig {
    mesh: Option<ServiceSection>,
}

#[derive(Debug, Deserialize)]
struct ServiceSection {
    config: Option<HashMap<String, String>>,
}

impl DaemonConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            if let Ok(root_config) = serde_yaml::from_str::<RootConfig>(&content) {
                config.apply_root_config(root_config);
                info!("Loaded configuration from {:?}", config_path.as_ref());
            } else {
                warn!(
                    "Failed to parse config file {:?}, using defaults",
                    config_path.as_ref()
                );
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.apply_environment_overrides();

        info!(
            "Final mesh configuration: nickname={}, port={}, data_dir={:?}",
            config.nickname, config.port, config.data_dir
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        let Some(service) = root_config.mesh else { return };
        let Some(config_map) = service.config else { return };

        for (key, value) in config_map {
            match key.as_str() {
                "mesh.nickname" => {
                    self.nickname = value;
                }
                "mesh.port" => {
                    if let Ok(port) = value.parse::<u16>() {
                        self.port = port;
                    }
                }
                "mesh.data_dir" => {
                    self.data_dir = PathBuf::from(value);
                }
                "mesh.announce_interval_secs" => {
                    if let Ok(secs) = value.parse::<u64>() {
                        self.announce_interval_secs = secs;
                    }
                }
                "mesh.message_ttl" => {
                    if let Ok(ttl) = value.parse::<u8>() {
                        self.message_ttl = ttl;
                    }
                }
                _ => {
                    // Ignore unknown configuration keys
                }
            }
        }
    }

    fn apply_environment_overrides(&mut self) {
        if let Ok(nickname) = std::env::var("MESH_NICKNAME") {
            self.nickname = nickname;
            info!("Nickname overridden by environment");
        }

        if let Ok(port) = std::env::var("MESH_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.port = port;
                info!("Port overridden by environment: {}", port);
            }
        }

        if let Ok(data_dir) = std::env::var("MESH_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
            info!("Data directory overridden by environment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.nickname, "anonymous");
        assert_eq!(config.port, 47_900);
        assert_eq!(config.message_ttl, 3);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
mesh:
  config:
    mesh.nickname: "river"
    mesh.port: "48123"
    mesh.announce_interval_secs: "15"
    mesh.message_ttl: "5"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = DaemonConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.nickname, "river");
        assert_eq!(config.port, 48123);
        assert_eq!(config.announce_interval_secs, 15);
        assert_eq!(config.message_ttl, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = DaemonConfig::load_from_file("/nonexistent/mesh.yaml").unwrap();
        assert_eq!(config.port, DaemonConfig::default().port);
    }
}
