//! Agent configuration
//!
//! External inputs consumed by the core: channel endpoint, rotation
//! interval bounds, file locations. Loaded from an optional JSON file
//! given on the command line; every field has a default matching the
//! original deployment.

use std::path::PathBuf;

use serde::Deserialize;

use crate::constants;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Local endpoint the control channel binds to.
    pub channel_endpoint: String,

    /// Telemetry push cadence (seconds).
    pub telemetry_interval_secs: u64,

    /// Key rotation interval bounds (hours).
    pub rotation_min_hours: u64,
    pub rotation_max_hours: u64,

    /// WireGuard tunnel name used by the mitigation executor.
    pub tunnel_name: String,

    /// Agent data directory; defaults to the platform-local app data
    /// directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            channel_endpoint: constants::CHANNEL_ENDPOINT.to_string(),
            telemetry_interval_secs: constants::TELEMETRY_INTERVAL_SECS,
            rotation_min_hours: constants::MIN_ROTATION_HOURS,
            rotation_max_hours: constants::MAX_ROTATION_HOURS,
            tunnel_name: "hostguard-vpn".to_string(),
            data_dir: None,
        }
    }
}

impl AgentConfig {
    /// Load from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<String>) -> Result<Self, ConfigError> {
        let config: Self = match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                        path: path.clone(),
                        source: e.to_string(),
                    })?;
                serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                    path,
                    source: e.to_string(),
                })?
            }
            None => Self::default(),
        };

        if config.rotation_min_hours == 0 || config.rotation_min_hours > config.rotation_max_hours
        {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "rotation bounds {}-{}h are not a valid range",
                    config.rotation_min_hours, config.rotation_max_hours
                ),
            });
        }
        if config.telemetry_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "telemetry interval must be at least 1 second".to_string(),
            });
        }

        Ok(config)
    }

    pub fn sealed_key_path(&self) -> PathBuf {
        self.resolved_data_dir().join(constants::SEALED_KEY_FILE)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.resolved_data_dir().join(constants::AUDIT_LOG_FILE)
    }

    fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hostguard")
        })
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    Io { path: String, source: String },
    Parse { path: String, source: String },
    Invalid { reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read config {}: {}", path, source),
            Self::Parse { path, source } => write!(f, "cannot parse config {}: {}", path, source),
            Self::Invalid { reason } => write!(f, "invalid config: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}
