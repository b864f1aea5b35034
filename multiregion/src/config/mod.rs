//! Device and manager configuration
//!
//! This module contains:
//! - Build-time device identity (per-region DevEUI, JoinEUI, root keys)
//! - Manager policy (auto-switch, home region, geo search, join timing)

/// Device identity provisioned at build time
pub mod device;

pub use device::DeviceConfig;

use crate::lorawan::region::Region;

/// EUI-64 (8 bytes)
pub type EUI64 = [u8; 8];
/// AES-128 key (16 bytes)
pub type AESKey = [u8; 16];
/// Network-assigned device address
pub type DevAddr = u32;

/// Flash address of the session store page used when none is configured
pub const DEFAULT_STORE_OFFSET: u32 = 0x0003_F800;

/// Nearest-region search limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoConfig {
    /// Candidates farther than this are ignored
    pub max_distance_km: f32,
    /// Largest ring count tried by the outward search
    pub max_rings: u8,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            max_distance_km: 500.0,
            max_rings: 6,
        }
    }
}

/// Join orchestration timing, all values in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTiming {
    /// Sleep between process-function calls while waiting for the join
    pub poll_interval_ms: u32,
    /// Re-issue the join request this often
    pub retrigger_interval_ms: u32,
    /// Settle time after the join event before the session is captured
    pub settle_ms: u32,
    /// Unconfirmed uplinks sent after a join to solicit MAC commands
    pub post_join_uplinks: u8,
    /// Time the stack is pumped after each post-join uplink
    pub uplink_gap_ms: u32,
    /// Gap between regions while pre-joining
    pub pre_join_gap_ms: u32,
    /// Give up after this long; `None` retries until cancelled
    pub timeout_ms: Option<u32>,
}

impl Default for JoinTiming {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            retrigger_interval_ms: 30_000,
            settle_ms: 1_000,
            post_join_uplinks: 2,
            uplink_gap_ms: 5_000,
            pre_join_gap_ms: 5_000,
            timeout_ms: None,
        }
    }
}

/// Manager policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerConfig {
    /// Follow GPS fixes across region borders
    pub auto_switch: bool,
    /// Region switched to after pre-joining, and assumed when none is active
    pub home_region: Region,
    /// Flash address of the session store page
    pub store_offset: u32,
    /// Nearest-region search limits
    pub geo: GeoConfig,
    /// Join timing
    pub join: JoinTiming,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            auto_switch: cfg!(feature = "auto-switch"),
            home_region: Region::US915,
            store_offset: DEFAULT_STORE_OFFSET,
            geo: GeoConfig::default(),
            join: JoinTiming::default(),
        }
    }
}
