use anyhow::{Context, Result};
use prefer::{ConfigValue, FromValue};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::instrument::{ClientTimeouts, ServerMap, StaticDirectory};
use crate::net::Endpoint;

#[derive(Debug, Clone)]
pub struct Config {
    pub observatory: ObservatoryConfig,
    pub directory: DirectoryConfig,
    pub timeouts: TimeoutConfig,
    pub observation: ObservationConfig,
}

#[derive(Debug, Clone)]
pub struct ObservatoryConfig {
    /// Server name looked up in the directory (default: localhost)
    pub server: String,
    /// Directory prefix for the base filename handed to the camera
    pub data_dir: PathBuf,
}

/// Endpoints of each server's instrument services, keyed by role key
#[derive(Debug, Clone, Default)]
pub struct DirectoryConfig {
    pub servers: HashMap<String, ServerMap>,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub read_secs: u64,
    pub notify_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            read_secs: 10,
            notify_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservationConfig {
    /// Delay between telescope polls while slewing
    pub slew_poll_ms: u64,
    /// Give up on a slew after this long
    pub slew_timeout_secs: u64,
    /// Failed telescope polls tolerated during a slew
    pub slew_io_retries: u32,
    /// Delay between busy checks while waiting for an exposure
    pub status_interval_secs: u64,
    /// Typical time to point the telescope
    pub pointing_time_secs: u64,
    /// Typical CCD readout time per exposure
    pub ccd_read_time_secs: u64,
    /// Check busy state again after claiming the control connections
    pub recheck_after_claim: bool,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            slew_poll_ms: 1000,
            slew_timeout_secs: 600,
            slew_io_retries: 3,
            status_interval_secs: 5,
            pointing_time_secs: 70,
            ccd_read_time_secs: 25,
            recheck_after_claim: true,
        }
    }
}

// FromValue implementations for prefer integration

impl FromValue for Config {
    fn from_value(value: &ConfigValue) -> prefer::Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| prefer::Error::ConversionError {
                key: String::new(),
                type_name: "Config".into(),
                source: "expected object".into(),
            })?;

        Ok(Self {
            observatory: obj
                .get("observatory")
                .map(ObservatoryConfig::from_value)
                .transpose()?
                .unwrap_or_default(),
            directory: obj
                .get("directory")
                .map(DirectoryConfig::from_value)
                .transpose()?
                .unwrap_or_default(),
            timeouts: obj
                .get("timeouts")
                .map(TimeoutConfig::from_value)
                .transpose()?
                .unwrap_or_default(),
            observation: obj
                .get("observation")
                .map(ObservationConfig::from_value)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

impl FromValue for ObservatoryConfig {
    fn from_value(value: &ConfigValue) -> prefer::Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| prefer::Error::ConversionError {
                key: String::new(),
                type_name: "ObservatoryConfig".into(),
                source: "expected object".into(),
            })?;
        let defaults = Self::default();

        Ok(Self {
            server: obj
                .get("server")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or(defaults.server),
            data_dir: obj
                .get("data_dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }
}

impl FromValue for DirectoryConfig {
    fn from_value(value: &ConfigValue) -> prefer::Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| prefer::Error::ConversionError {
                key: String::new(),
                type_name: "DirectoryConfig".into(),
                source: "expected object".into(),
            })?;
        let mut servers = HashMap::new();

        for (server, entries) in obj {
            let entries = entries
                .as_object()
                .ok_or_else(|| prefer::Error::ConversionError {
                    key: format!("directory.{}", server),
                    type_name: "ServerMap".into(),
                    source: "expected object".into(),
                })?;
            let mut map = ServerMap::new();
            for (key, raw) in entries {
                let endpoint = raw
                    .as_u64()
                    .and_then(|port| u16::try_from(port).ok())
                    .map(|port| Endpoint::new(server.as_str(), port))
                    .or_else(|| raw.as_str().and_then(|s| Endpoint::parse(s, server)))
                    .ok_or_else(|| prefer::Error::ConversionError {
                        key: format!("directory.{}.{}", server, key),
                        type_name: "Endpoint".into(),
                        source: "expected a port or \"host:port\"".into(),
                    })?;
                map.insert(key.clone(), endpoint);
            }
            servers.insert(server.clone(), map);
        }

        Ok(Self { servers })
    }
}

impl FromValue for TimeoutConfig {
    fn from_value(value: &ConfigValue) -> prefer::Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| prefer::Error::ConversionError {
                key: String::new(),
                type_name: "TimeoutConfig".into(),
                source: "expected object".into(),
            })?;
        let defaults = Self::default();

        Ok(Self {
            connect_secs: obj
                .get("connect_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(defaults.connect_secs),
            read_secs: obj
                .get("read_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(defaults.read_secs),
            notify_secs: obj
                .get("notify_secs")
                .and_then(|v| v.as_u64())
                .unwrap_or(defaults.notify_secs),
        })
    }
}

impl FromValue for ObservationConfig {
    fn from_value(value: &ConfigValue) -> prefer::Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| prefer::Error::ConversionError {
                key: String::new(),
                type_name: "ObservationConfig".into(),
                source: "expected object".into(),
            })?;
        let defaults = Self::default();
        let get_u64 = |key: &str, default: u64| {
            obj.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
        };

        Ok(Self {
            slew_poll_ms: get_u64("slew_poll_ms", defaults.slew_poll_ms),
            slew_timeout_secs: get_u64("slew_timeout_secs", defaults.slew_timeout_secs),
            slew_io_retries: obj
                .get("slew_io_retries")
                .and_then(|v| v.as_u64())
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.slew_io_retries),
            status_interval_secs: get_u64("status_interval_secs", defaults.status_interval_secs),
            pointing_time_secs: get_u64("pointing_time_secs", defaults.pointing_time_secs),
            ccd_read_time_secs: get_u64("ccd_read_time_secs", defaults.ccd_read_time_secs),
            recheck_after_claim: obj
                .get("recheck_after_claim")
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.recheck_after_claim),
        })
    }
}

impl Default for ObservatoryConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            data_dir: Config::default_data_dir(),
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn client(&self) -> ClientTimeouts {
        ClientTimeouts {
            read: Duration::from_secs(self.read_secs),
            notify: Duration::from_secs(self.notify_secs),
        }
    }
}

impl Config {
    /// Load config from a specific path (TOML format)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let toml_value: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        let config_value = toml_to_config_value(toml_value);
        Config::from_value(&config_value)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    fn to_toml_string(&self) -> String {
        let mut content = String::new();

        content.push_str("[observatory]\n");
        content.push_str(&format!(
            "server = {}\n",
            toml_string(&self.observatory.server)
        ));
        content.push_str(&format!(
            "data_dir = {}\n",
            toml_string(&self.observatory.data_dir.display().to_string())
        ));
        content.push('\n');

        content.push_str("[timeouts]\n");
        content.push_str(&format!("connect_secs = {}\n", self.timeouts.connect_secs));
        content.push_str(&format!("read_secs = {}\n", self.timeouts.read_secs));
        content.push_str(&format!("notify_secs = {}\n", self.timeouts.notify_secs));
        content.push('\n');

        let obs = &self.observation;
        content.push_str("[observation]\n");
        content.push_str(&format!("slew_poll_ms = {}\n", obs.slew_poll_ms));
        content.push_str(&format!("slew_timeout_secs = {}\n", obs.slew_timeout_secs));
        content.push_str(&format!("slew_io_retries = {}\n", obs.slew_io_retries));
        content.push_str(&format!(
            "status_interval_secs = {}\n",
            obs.status_interval_secs
        ));
        content.push_str(&format!("pointing_time_secs = {}\n", obs.pointing_time_secs));
        content.push_str(&format!("ccd_read_time_secs = {}\n", obs.ccd_read_time_secs));
        content.push_str(&format!(
            "recheck_after_claim = {}\n",
            obs.recheck_after_claim
        ));

        let mut servers: Vec<_> = self.directory.servers.iter().collect();
        servers.sort_by(|a, b| a.0.cmp(b.0));
        for (server, entries) in servers {
            content.push('\n');
            content.push_str(&format!("[directory.{}]\n", toml_string(server)));
            for (key, endpoint) in entries {
                content.push_str(&format!(
                    "{} = {}\n",
                    toml_string(key),
                    toml_string(&endpoint.to_string())
                ));
            }
        }

        content
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("utslink")
            .join("config.toml")
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("utslink")
            .join("data")
    }

    /// Static directory built from the `[directory]` tables
    pub fn service_directory(&self) -> StaticDirectory {
        StaticDirectory::from(&self.directory.servers)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            observatory: ObservatoryConfig::default(),
            directory: DirectoryConfig::default(),
            timeouts: TimeoutConfig::default(),
            observation: ObservationConfig::default(),
        }
    }
}

/// Quoted and escaped TOML string, usable as a value or a key
fn toml_string(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

/// Convert toml::Value to prefer::ConfigValue
fn toml_to_config_value(value: toml::Value) -> ConfigValue {
    match value {
        toml::Value::String(s) => ConfigValue::String(s),
        toml::Value::Integer(i) => ConfigValue::Integer(i),
        toml::Value::Float(f) => ConfigValue::Float(f),
        toml::Value::Boolean(b) => ConfigValue::Bool(b),
        toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
        toml::Value::Array(arr) => {
            ConfigValue::Array(arr.into_iter().map(toml_to_config_value).collect())
        }
        toml::Value::Table(table) => ConfigValue::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_config_value(v)))
                .collect(),
        ),
    }
}
