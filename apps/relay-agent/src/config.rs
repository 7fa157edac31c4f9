//! Agent configuration management.
//!
//! Configuration is stored as TOML at `~/.config/iotc-relay/agent.toml`,
//! or wherever `IOTC_RELAY_CONFIG` points. `IOTC_RELAY_ENDPOINT` overrides
//! the endpoint without touching the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use iotc_relay_protocol::constants::DEFAULT_SOCKET_PATH;

const CONFIG_ENV: &str = "IOTC_RELAY_CONFIG";
const ENDPOINT_ENV: &str = "IOTC_RELAY_ENDPOINT";

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relay target: `tcp://host:port` or a local socket path.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Identifier registered with the relay (hostname by default).
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Value of the `UnoQdemo` field in every heartbeat.
    #[serde(default = "default_demo_name")]
    pub demo_name: String,

    /// Seconds between reconnection attempts.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Initial heartbeat interval in seconds. Changed at runtime by the
    /// `set-interval` command.
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_SOCKET_PATH.into()
}

fn default_client_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "iotc-relay-agent".into())
}

fn default_demo_name() -> String {
    "relay-agent".into()
}

fn default_retry_interval() -> u64 {
    5
}

fn default_telemetry_interval() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            client_id: default_client_id(),
            demo_name: default_demo_name(),
            retry_interval_secs: default_retry_interval(),
            telemetry_interval_secs: default_telemetry_interval(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found,
    /// then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        config.apply_endpoint_override(std::env::var(ENDPOINT_ENV).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_endpoint_override(&mut self, endpoint: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
            tracing::debug!(%endpoint, "endpoint overridden from environment");
            self.endpoint = endpoint.trim().to_string();
        }
    }
}

fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("iotc-relay")
        .join("agent.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.endpoint, "/tmp/iotconnect-relay.sock");
        assert!(!config.client_id.is_empty());
        assert_eq!(config.demo_name, "relay-agent");
        assert_eq!(config.retry_interval_secs, 5);
        assert_eq!(config.telemetry_interval_secs, 5);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"endpoint = "tcp://172.17.0.1:8899""#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint, "tcp://172.17.0.1:8899");
        assert_eq!(config.telemetry_interval_secs, 5);
        assert!(!config.client_id.is_empty());
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("agent.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.endpoint, DEFAULT_SOCKET_PATH);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");

        let config = Config {
            client_id: "air_quality_led_matrix".into(),
            telemetry_interval_secs: 10,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.client_id, "air_quality_led_matrix");
        assert_eq!(loaded.telemetry_interval_secs, 10);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");
        std::fs::write(&path, "retry_interval_secs = \"soon\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn endpoint_override() {
        let mut config = Config::default();
        config.apply_endpoint_override(Some(" tcp://10.0.0.2:8899 ".into()));
        assert_eq!(config.endpoint, "tcp://10.0.0.2:8899");

        config.apply_endpoint_override(Some("   ".into()));
        assert_eq!(config.endpoint, "tcp://10.0.0.2:8899");

        config.apply_endpoint_override(None);
        assert_eq!(config.endpoint, "tcp://10.0.0.2:8899");
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path();
        assert!(path.to_string_lossy().ends_with(".toml"));
    }
}
