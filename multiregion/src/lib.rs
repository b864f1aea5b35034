//! Multi-region LoRaWAN session manager
//!
//! This crate lets one device hold a joined LoRaWAN session in each of up to
//! six regions and move the live MAC stack between them without rejoining.
//! Sessions are kept in a single flash page, guarded by CRCs, and resumed as
//! ABP with their frame counters intact.
//!
//! # Features
//! - OTAA join per region with per-region DevEUIs
//! - Session switch with counter, key and channel-mask restore
//! - GPS-driven region selection through an external geospatial index
//! - Import of ABP sessions provisioned on the network server
//! - `no_std`, no allocation, no unsafe code
//!
//! # Example
//! ```ignore
//! use multiregion::{
//!     config::{DeviceConfig, ManagerConfig},
//!     lorawan::region::Region,
//!     manager::{EventFlags, MultiRegionManager},
//! };
//!
//! static FLAGS: EventFlags = EventFlags::new();
//!
//! let device = DeviceConfig::new(JOIN_EUI, APP_KEY, NWK_KEY)
//!     .with_dev_eui(Region::US915, DEV_EUI_US915)
//!     .with_dev_eui(Region::EU868, DEV_EUI_EU868);
//!
//! let mut manager =
//!     MultiRegionManager::new(mac, flash, timer, index, &FLAGS, device, ManagerConfig::default())?;
//! manager.init();
//!
//! if manager.is_region_joined(Region::US915) {
//!     manager.switch_to_region(Region::US915)?;
//! } else {
//!     manager.pre_join_all_regions()?;
//! }
//!
//! // on every GPS fix
//! manager.auto_switch_for_location(lat, lon)?;
//! ```

#![warn(missing_docs)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod fmt;

/// Device and manager configuration
pub mod config;

/// Per-region session record
pub mod context;

/// Cryptographic functions
pub mod crypto;

/// Error types
pub mod error;

/// Location to region policy
pub mod geo;

/// CRC codecs for records and the store image
pub mod integrity;

/// LoRaWAN regions and the MAC stack interface
pub mod lorawan;

/// High-level session manager
pub mod manager;

/// Flash-backed session store
pub mod store;

pub use config::{DeviceConfig, ManagerConfig};
pub use error::{Error, StoreError};
pub use lorawan::region::Region;
pub use manager::{Clock, EventFlags, MultiRegionManager};
