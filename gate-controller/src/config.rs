//! Configuration stored in GATE_HOME

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionConfig;

pub const CONFIG_FILE: &str = "config.json";
pub const KEYS_FILE: &str = "keys.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory, set GATE_HOME")]
    NoHome,
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid UUID {value:?}: {source}")]
    InvalidUuid {
        value: String,
        #[source]
        source: uuid::Error,
    },
}

/// Get GATE_HOME directory, creating it if needed
pub fn gate_home() -> Result<PathBuf, ConfigError> {
    let home = match std::env::var("GATE_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => dirs::home_dir().ok_or(ConfigError::NoHome)?.join(".gate"),
    };
    ensure_dir(&home)?;
    Ok(home)
}

pub fn ensure_dir(dir: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Which controller to talk to and how to find its characteristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Hardware address (or advertised name on platforms hiding addresses)
    pub address: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    /// Advertised name, used to mark the gate in scan results
    pub name: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            address: gate_proto::ble::MAC_ADDRESS.to_string(),
            service_uuid: gate_proto::ble::SERVICE_UUID.to_string(),
            characteristic_uuid: gate_proto::ble::CHARACTERISTIC_UUID.to_string(),
            name: gate_proto::ble::DEVICE_NAME.to_string(),
        }
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(value).map_err(|source| ConfigError::InvalidUuid {
        value: value.to_string(),
        source,
    })
}

impl DeviceIdentity {
    pub fn service(&self) -> Result<Uuid, ConfigError> {
        parse_uuid(&self.service_uuid)
    }

    pub fn characteristic(&self) -> Result<Uuid, ConfigError> {
        parse_uuid(&self.characteristic_uuid)
    }
}

/// Contents of `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub device: DeviceIdentity,
    /// How long to scan for the device when connecting
    pub scan_secs: u64,
    /// How long the CLI waits for the controller to answer
    pub reply_timeout_secs: u64,
    /// Refuse a new command while the previous one is unanswered
    pub single_in_flight: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            device: DeviceIdentity::default(),
            scan_secs: 5,
            reply_timeout_secs: 5,
            single_in_flight: true,
        }
    }
}

impl GateConfig {
    /// Load `config.json` from `home`, writing the defaults on first run
    pub fn load_or_create(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);

        let config = if path.exists() {
            let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| ConfigError::Json {
                path: path.clone(),
                source,
            })?
        } else {
            let config = Self::default();
            let data = serde_json::to_string_pretty(&config).map_err(|source| ConfigError::Json {
                path: path.clone(),
                source,
            })?;
            fs::write(&path, data).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            tracing::info!(path = %path.display(), "wrote default config");
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.service()?;
        self.device.characteristic()?;
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            address: self.device.address.clone(),
            single_in_flight: self.single_in_flight,
        }
    }

    pub fn keys_path(home: &Path) -> PathBuf {
        home.join(KEYS_FILE)
    }
}
