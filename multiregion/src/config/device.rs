use super::{AESKey, EUI64};
use crate::lorawan::region::Region;

const REGION_COUNT: usize = Region::ALL.len();

/// Device identity used for OTAA joins
///
/// Every region is joined with its own DevEUI; JoinEUI and the root keys
/// are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Join server EUI
    pub join_eui: EUI64,
    /// Application root key
    pub app_key: AESKey,
    /// Network root key
    pub nwk_key: AESKey,
    /// DevEUI per region, indexed by region code
    dev_euis: [Option<EUI64>; REGION_COUNT],
}

impl DeviceConfig {
    /// Create a configuration with no per-region DevEUIs yet
    pub fn new(join_eui: EUI64, app_key: AESKey, nwk_key: AESKey) -> Self {
        Self {
            join_eui,
            app_key,
            nwk_key,
            dev_euis: [None; REGION_COUNT],
        }
    }

    /// Provision the DevEUI used in `region`
    pub fn with_dev_eui(mut self, region: Region, dev_eui: EUI64) -> Self {
        self.dev_euis[region.as_u8() as usize] = Some(dev_eui);
        self
    }

    /// DevEUI provisioned for `region`
    pub fn dev_eui(&self, region: Region) -> Option<EUI64> {
        self.dev_euis[region.as_u8() as usize]
    }

    /// Whether `region` has a DevEUI
    pub fn is_provisioned(&self, region: Region) -> bool {
        self.dev_eui(region).is_some()
    }
}
