//! Core types and constants for the crowd positioning system

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
