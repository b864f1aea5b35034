//! Control surface of the external LoRaWAN MAC stack
//!
//! The manager never touches the stack's internals directly. Everything it
//! needs, including the fields it rewrites inside the stack's NVM context
//! during a session switch, goes through [`MacStack`] and [`NvmContext`].

use super::region::{ChannelMask, Region};
use crate::config::{AESKey, DevAddr, EUI64};

/// Network activation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ActivationType {
    /// Not activated
    None = 0,
    /// Activation by personalization
    Abp = 1,
    /// Over-the-air activation
    Otaa = 2,
}

impl ActivationType {
    /// Decode a stored activation byte
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ActivationType::Abp,
            2 => ActivationType::Otaa,
            _ => ActivationType::None,
        }
    }
}

/// Session keys held in the secure element's key list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionKey {
    /// Application session key
    AppSKey,
    /// Network session encryption key
    NwkSEncKey,
    /// Forwarding network session integrity key
    FNwkSIntKey,
    /// Serving network session integrity key
    SNwkSIntKey,
}

impl SessionKey {
    /// The three network keys; LoRaWAN 1.0.x uses one NwkSKey for all of them
    pub const NETWORK: [SessionKey; 3] = [
        SessionKey::NwkSEncKey,
        SessionKey::FNwkSIntKey,
        SessionKey::SNwkSIntKey,
    ];
}

/// Volatile radio configuration of the running session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioParams {
    /// Uplink data rate index
    pub datarate: u8,
    /// TX power index
    pub tx_power: u8,
    /// Adaptive data rate
    pub adr_enabled: bool,
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
    /// RX2 data rate index
    pub rx2_datarate: u8,
}

/// Session state the stack keeps in its NVM context blob
pub trait NvmContext {
    /// Uplink frame counter
    fn fcnt_up(&self) -> u32;
    /// Overwrite the uplink frame counter
    fn set_fcnt_up(&mut self, fcnt: u32);
    /// Network downlink frame counter
    fn nfcnt_down(&self) -> u32;
    /// Overwrite the network downlink frame counter
    fn set_nfcnt_down(&mut self, fcnt: u32);
    /// MIC of the last accepted downlink
    fn last_rx_mic(&self) -> u32;
    /// Overwrite the last accepted downlink MIC
    fn set_last_rx_mic(&mut self, mic: u32);
    /// Activation recorded in the context
    fn network_activation(&self) -> ActivationType;
    /// Overwrite the activation recorded in the context
    fn set_network_activation(&mut self, activation: ActivationType);
    /// Read a key from the secure-element key list shadow
    fn key(&self, id: SessionKey) -> AESKey;
    /// Write a key into the secure-element key list shadow
    fn set_key(&mut self, id: SessionKey, key: &AESKey);
}

/// Operations the manager drives on the LoRaWAN MAC stack
pub trait MacStack {
    /// Error type for stack operations
    type Error;
    /// NVM context exposed by the stack
    type Nvm: NvmContext;

    /// Tear the stack down and bring it back up for `region`
    fn reinit(&mut self, region: Region) -> Result<(), Self::Error>;

    /// Select the region used by the next `configure`, without a teardown
    fn set_active_region(&mut self, region: Region);

    /// Apply the handler configuration for `region`.
    ///
    /// Stacks may restore identity from their own NVM here.
    fn configure(&mut self, region: Region) -> Result<(), Self::Error>;

    /// Start the MAC state machine
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Run one iteration of the stack's process function
    fn process(&mut self);

    /// Whether the MAC has an operation in flight
    fn is_busy(&self) -> bool;

    /// Whether the stack holds an activated session
    fn is_joined(&self) -> bool;

    /// Erase the stack's own NVM area
    fn erase_nvm(&mut self) -> Result<(), Self::Error>;

    /// Set the device EUI
    fn set_dev_eui(&mut self, dev_eui: &EUI64) -> Result<(), Self::Error>;

    /// Set the join EUI
    fn set_join_eui(&mut self, join_eui: &EUI64) -> Result<(), Self::Error>;

    /// Set the application root key
    fn set_app_key(&mut self, key: &AESKey) -> Result<(), Self::Error>;

    /// Set the network root key
    fn set_nwk_key(&mut self, key: &AESKey) -> Result<(), Self::Error>;

    /// Set both session keys through the stack's key setter
    fn set_session_keys(&mut self, app_s_key: &AESKey, nwk_s_key: &AESKey) -> Result<(), Self::Error>;

    /// Set the device address through the management interface
    fn set_dev_addr(&mut self, dev_addr: DevAddr) -> Result<(), Self::Error>;

    /// Current device address
    fn dev_addr(&self) -> DevAddr;

    /// Set the activation type through the management interface
    fn set_activation(&mut self, activation: ActivationType) -> Result<(), Self::Error>;

    /// Set the uplink data rate
    fn set_datarate(&mut self, datarate: u8) -> Result<(), Self::Error>;

    /// Enable or disable ADR
    fn set_adr(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Set the operational channel mask
    fn set_channel_mask(&mut self, mask: &ChannelMask) -> Result<(), Self::Error>;

    /// Set the default channel mask
    fn set_default_channel_mask(&mut self, mask: &ChannelMask) -> Result<(), Self::Error>;

    /// Set the RX2 window
    fn set_rx2(&mut self, frequency: u32, datarate: u8) -> Result<(), Self::Error>;

    /// Read the volatile radio configuration
    fn radio_params(&self) -> RadioParams;

    /// Send an OTAA join request
    fn join_otaa(&mut self) -> Result<(), Self::Error>;

    /// Queue an unconfirmed data uplink
    fn send_unconfirmed(&mut self, port: u8, data: &[u8]) -> Result<(), Self::Error>;

    /// Access the stack's NVM context, `None` while the stack has none
    fn nvm_context(&mut self) -> Option<&mut Self::Nvm>;
}
