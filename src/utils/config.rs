//! System configuration loaded from a JSON file

use crate::algorithms::TriangulationEngine;
use crate::core::{AnchorId, Point2, ANCHOR_COUNT, DEFAULT_PUBLISH_INTERVAL_MS, DEFAULT_STARTUP_DELAY_MS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Bounds accepted for the publish cadence (milliseconds)
pub const MIN_PUBLISH_INTERVAL_MS: u64 = 100;
pub const MAX_PUBLISH_INTERVAL_MS: u64 = 60_000;

/// Fixed anchor node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Identifier used in payloads (e.g. `ESP32-A`)
    pub id: AnchorId,
    /// Display name
    pub name: String,
    /// Name the transport searches for when connecting
    pub transport_name: String,
    /// Fixed position in the map frame (meters)
    pub position: Point2,
}

impl AnchorConfig {
    pub fn new(id: &str, name: &str, transport_name: &str, position: Point2) -> Self {
        Self {
            id: AnchorId::new(id),
            name: name.to_string(),
            transport_name: transport_name.to_string(),
            position,
        }
    }
}

/// System-wide configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Publish cadence (milliseconds)
    pub publish_interval_ms: u64,
    /// Wait after connecting before the first publish (milliseconds)
    pub startup_delay_ms: u64,
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    /// Exactly three anchors
    pub anchors: Vec<AnchorConfig>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL_MS,
            startup_delay_ms: DEFAULT_STARTUP_DELAY_MS,
            log_level: "info".to_string(),
            anchors: vec![
                AnchorConfig::new("ESP32-A", "Node 1", "ESP32_Crowd_Node_1", Point2::new(10.0, 10.0)),
                AnchorConfig::new("ESP32-B", "Node 2", "ESP32_Crowd_Node_2", Point2::new(90.0, 10.0)),
                AnchorConfig::new("ESP32-C", "Node 3", "ESP32_Crowd_Node_3", Point2::new(50.0, 80.0)),
            ],
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {parameter} = {value}: {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },
    #[error("failed to read or write config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Non-fatal findings from validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl SystemConfig {
    /// Load and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;

        let config: SystemConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_str,
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path_str.clone(),
            source,
        })?;

        fs::write(&path, content).map_err(|source| ConfigError::Io { path: path_str, source })
    }

    /// Check the configuration, returning warnings for usable-but-suspect values
    pub fn validate(&self) -> ConfigResult<ValidationReport> {
        let mut report = ValidationReport::default();

        if !(MIN_PUBLISH_INTERVAL_MS..=MAX_PUBLISH_INTERVAL_MS).contains(&self.publish_interval_ms) {
            return Err(ConfigError::InvalidParameter {
                parameter: "publish_interval_ms".to_string(),
                value: self.publish_interval_ms.to_string(),
                reason: format!(
                    "must be between {} and {}",
                    MIN_PUBLISH_INTERVAL_MS, MAX_PUBLISH_INTERVAL_MS
                ),
            });
        }

        if self.anchors.len() != ANCHOR_COUNT {
            return Err(ConfigError::InvalidParameter {
                parameter: "anchors".to_string(),
                value: self.anchors.len().to_string(),
                reason: format!("exactly {} anchors are required", ANCHOR_COUNT),
            });
        }

        let mut seen = HashSet::new();
        for anchor in &self.anchors {
            if anchor.id.as_str().is_empty() {
                return Err(ConfigError::InvalidParameter {
                    parameter: "anchors.id".to_string(),
                    value: String::new(),
                    reason: "anchor id must not be empty".to_string(),
                });
            }
            if !seen.insert(anchor.id.clone()) {
                return Err(ConfigError::InvalidParameter {
                    parameter: "anchors.id".to_string(),
                    value: anchor.id.to_string(),
                    reason: "anchor ids must be unique".to_string(),
                });
            }
            if !anchor.position.is_finite() {
                return Err(ConfigError::InvalidParameter {
                    parameter: format!("anchors[{}].position", anchor.id),
                    value: format!("{:?}", anchor.position),
                    reason: "coordinates must be finite".to_string(),
                });
            }
        }

        if let Ok(positions) = self.anchor_positions() {
            if let Err(e) = TriangulationEngine::new(positions).check_geometry() {
                report
                    .warnings
                    .push(format!("anchor layout is degenerate ({}); no device can be positioned", e));
            }
        }

        if self.startup_delay_ms > 60_000 {
            report
                .warnings
                .push(format!("startup delay of {} ms delays the first publish noticeably", self.startup_delay_ms));
        }

        Ok(report)
    }

    /// The three anchors as a fixed-size array
    pub fn anchor_array(&self) -> ConfigResult<[AnchorConfig; ANCHOR_COUNT]> {
        self.anchors
            .clone()
            .try_into()
            .map_err(|anchors: Vec<AnchorConfig>| ConfigError::InvalidParameter {
                parameter: "anchors".to_string(),
                value: anchors.len().to_string(),
                reason: format!("exactly {} anchors are required", ANCHOR_COUNT),
            })
    }

    pub fn anchor_positions(&self) -> ConfigResult<[Point2; ANCHOR_COUNT]> {
        Ok(self.anchor_array()?.map(|anchor| anchor.position))
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}
