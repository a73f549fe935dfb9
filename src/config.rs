//! Configuration for the SMC bridge

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::curve::CurveLimits;
use crate::errors::{Result, SmcBridgeError};

/// Tunables for the bridge. All fields have working defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a cached temperature reading stays valid, in milliseconds.
    /// Fan metadata uses five times this value.
    pub cache_timeout_ms: u64,
    /// Deadline for the version handshake during connect, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Deadline for the best-effort installation probe, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Temperature bounds applied when validating curve profiles.
    pub curve_limits: CurveLimits,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cache_timeout_ms: 2000,
            handshake_timeout_ms: 5000,
            probe_timeout_ms: 1000,
            curve_limits: CurveLimits::default(),
        }
    }
}

impl BridgeConfig {
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn get_config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".smc_bridge").join("config.json")
    }

    /// Load the config file if present, otherwise fall back to defaults.
    /// A malformed file is reported and ignored rather than fatal.
    pub fn load_or_default() -> Self {
        let path = Self::get_config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| SmcBridgeError::Unknown(format!("config read failed: {}", e)))?;
        serde_json::from_str(&json)
            .map_err(|e| SmcBridgeError::Unknown(format!("config decoding failed: {}", e)))
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SmcBridgeError::Unknown(format!("config dir creation failed: {}", e)))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SmcBridgeError::Unknown(format!("config encoding failed: {}", e)))?;
        fs::write(path, json)
            .map_err(|e| SmcBridgeError::Unknown(format!("config write failed: {}", e)))?;
        Ok(())
    }
}
