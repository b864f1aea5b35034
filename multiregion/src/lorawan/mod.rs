//! LoRaWAN side of the manager
//!
//! This module contains:
//! - Regional plans and their session defaults
//! - The control surface of the external MAC stack

/// MAC stack control surface
pub mod mac;

/// Regional plans, defaults and channel masks
pub mod region;

pub use mac::{ActivationType, MacStack, NvmContext, RadioParams, SessionKey};
pub use region::{ChannelMask, Region, RegionDefaults};
