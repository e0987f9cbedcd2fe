//! Configuration and simulation utilities

pub mod config;
pub mod simulate;

pub use config::{AnchorConfig, ConfigError, ConfigResult, SystemConfig, ValidationReport};
pub use simulate::{CrowdSimulator, SimulationConfig};
