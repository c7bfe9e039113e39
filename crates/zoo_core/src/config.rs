//! Board configuration.
//!
//! # Example
//!
//! ```ignore
//! use zoo_core::config::BoardConfig;
//!
//! let config = BoardConfig::from_json_str(r#"{"width": 128, "height": 64, "seed": 7}"#)?;
//! assert_eq!(config.empty_particle, "_");
//! ```

use super::topology::Topology;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Errors that can occur while loading a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// File system error
    Io(std::io::Error),
    /// JSON decoding error
    Json(String),
    /// Width or height is zero
    InvalidDimensions { width: usize, height: usize },
    /// Empty particle name is empty
    EmptyParticleName,
    /// Rules were compiled for a different neighborhood than the board's
    TopologyMismatch { board: Topology, rules: Topology },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Json(e) => write!(f, "JSON error: {}", e),
            ConfigError::InvalidDimensions { width, height } => {
                write!(f, "invalid board dimensions {}x{}", width, height)
            }
            ConfigError::EmptyParticleName => write!(f, "empty particle name must not be empty"),
            ConfigError::TopologyMismatch { board, rules } => {
                write!(f, "board topology {:?} does not match rule topology {:?}", board, rules)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for one board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub width: usize,
    pub height: usize,
    pub topology: Topology,
    /// Absent means seed from entropy.
    pub seed: Option<u64>,
    /// Particle every cell starts as.
    pub empty_particle: String,
    /// Longer particle names are truncated.
    pub max_name_len: usize,
    /// Registry size at which the cache monitor flushes.
    pub cache_flush_threshold: usize,
    pub monitor_interval_ms: u64,
    /// This board's address on the remote transport.
    pub address: String,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            topology: Topology::Square4,
            seed: None,
            empty_particle: "_".to_string(),
            max_name_len: 256,
            cache_flush_threshold: 4096,
            monitor_interval_ms: 1000,
            address: "local".to_string(),
        }
    }
}

impl BoardConfig {
    /// Config for a `width x height` board, other fields default.
    pub fn with_size(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.empty_particle.is_empty() {
            return Err(ConfigError::EmptyParticleName);
        }
        Ok(())
    }

    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = BoardConfig::from_json_str(r#"{"width": 8, "topology": "Hex6"}"#).unwrap();
        assert_eq!(config.width, 8);
        assert_eq!(config.height, 64);
        assert_eq!(config.topology, Topology::Hex6);
        assert_eq!(config.empty_particle, "_");
        assert!(config.seed.is_none());
        assert_eq!(config.monitor_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(matches!(
            BoardConfig::from_json_str(r#"{"width": 0}"#),
            Err(ConfigError::InvalidDimensions { width: 0, .. })
        ));
        assert!(matches!(
            BoardConfig::from_json_str(r#"{"empty_particle": ""}"#),
            Err(ConfigError::EmptyParticleName)
        ));
        assert!(matches!(
            BoardConfig::from_json_str("not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        std::fs::write(&path, r#"{"width": 4, "height": 2, "seed": 11}"#).unwrap();
        let config = BoardConfig::load(&path).unwrap();
        assert_eq!((config.width, config.height, config.seed), (4, 2, Some(11)));

        assert!(matches!(
            BoardConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
