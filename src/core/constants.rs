//! Deployment defaults and protocol constants

/// Number of anchors the correlator requires for a position fix
pub const ANCHOR_COUNT: usize = 3;

/// Default publish cadence (milliseconds)
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 2000;

/// Default delay between connecting the anchors and the first publish (milliseconds)
pub const DEFAULT_STARTUP_DELAY_MS: u64 = 5000;

/// Number of leading characters of a device's raw id exposed as `hashedId`
pub const HASHED_ID_LEN: usize = 8;

/// Fragment progress is logged every this many fragments
pub const PROGRESS_LOG_EVERY: u32 = 10;
