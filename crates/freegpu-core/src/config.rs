//! Configuration types for freegpu

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::restriction::CUDA_VISIBLE_DEVICES;

/// Top-level configuration, loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeGpuConfig {
    /// Device-management tool settings
    pub smi: SmiConfig,
    /// Device-restriction settings
    pub restriction: RestrictionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl FreeGpuConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::FreeGpuError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::FreeGpuError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(toml::from_str(&content)?)
    }
}

/// `nvidia-smi` invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmiConfig {
    /// Program to run
    pub program: PathBuf,
    /// Arguments for the device inventory query
    pub inventory_args: Vec<String>,
    /// Arguments for the active compute-process query
    pub compute_apps_args: Vec<String>,
}

impl Default for SmiConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("nvidia-smi"),
            inventory_args: vec![
                "--query-gpu=index,gpu_bus_id".to_string(),
                "--format=csv,noheader".to_string(),
            ],
            compute_apps_args: vec![
                "--query-compute-apps=pid,gpu_bus_id".to_string(),
                "--format=csv,noheader".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestrictionConfig {
    /// Environment variable holding the reserved device ordinals
    pub env_var: String,
}

impl Default for RestrictionConfig {
    fn default() -> Self {
        Self {
            env_var: CUDA_VISIBLE_DEVICES.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}
