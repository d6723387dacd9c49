//! Engine configuration

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for route computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Port-bit assumed for ports that do not declare one (device ports)
    pub device_port_bit: i64,
    /// Reuse the primary routes when a TYPE2 entity fails instead of recomputing
    pub bridge_short_circuit: bool,
    /// Compute per-destination trees on the rayon thread pool
    pub parallel_trees: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_port_bit: -1,
            bridge_short_circuit: true,
            parallel_trees: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"parallel_trees": false}"#).unwrap();
        assert!(!config.parallel_trees);
        assert!(config.bridge_short_circuit);
        assert_eq!(config.device_port_bit, -1);
    }

    #[test]
    fn test_invalid_config() {
        let err = EngineConfig::from_json_str(r#"{"device_port_bit": "low"}"#).unwrap_err();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
