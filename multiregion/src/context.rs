//! Per-region session record
//!
//! A [`RegionContext`] holds everything needed to resume a region's session
//! as ABP without rejoining. Records are stored verbatim in flash as
//! [`RECORD_SIZE`]-byte little-endian images sealed with a CRC-16.
//!
//! Layout:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | region (0xFF = none) |
//! | 1 | 8 | DevEUI |
//! | 9 | 1 | activation |
//! | 10 | 4 | DevAddr |
//! | 14 | 16 | AppSKey |
//! | 30 | 16 | NwkSKey |
//! | 46 | 4 | uplink counter |
//! | 50 | 4 | downlink counter |
//! | 54 | 4 | last accepted downlink MIC |
//! | 58 | 1 | data rate |
//! | 59 | 1 | TX power |
//! | 60 | 1 | ADR |
//! | 61 | 4 | RX2 frequency |
//! | 65 | 1 | RX2 data rate |
//! | 66 | 4 | last used tick |
//! | 70 | 8 | reserved, zero when written |
//! | 78 | 2 | CRC-16 over bytes 0..78 |

use crate::{
    config::{AESKey, DevAddr, EUI64},
    integrity,
    lorawan::{
        mac::{ActivationType, MacStack, NvmContext},
        region::Region,
    },
};

/// Encoded record size, a multiple of 8 so slot arrays stay 8-byte aligned
pub const RECORD_SIZE: usize = 80;

const CRC_OFFSET: usize = RECORD_SIZE - 2;
const RESERVED_OFFSET: usize = 70;
/// Reserved bytes between `last_used` and the CRC
pub const RESERVED_SIZE: usize = CRC_OFFSET - RESERVED_OFFSET;
const EMPTY_REGION: u8 = 0xFF;

/// Identity material written at join or key-import time and never
/// re-read from the MAC afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Device EUI used in this region
    pub dev_eui: EUI64,
    /// Network-assigned address
    pub dev_addr: DevAddr,
    /// Application session key
    pub app_s_key: AESKey,
    /// Network session key
    pub nwk_s_key: AESKey,
}

/// Stored session of one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionContext {
    /// Region, `None` for an empty slot
    pub region: Option<Region>,
    /// Device EUI used in this region
    pub dev_eui: EUI64,
    /// How the session was obtained
    pub activation: ActivationType,
    /// Network-assigned address; 0 and 0xFFFFFFFF mark an empty slot
    pub dev_addr: DevAddr,
    /// Application session key
    pub app_s_key: AESKey,
    /// Network session key
    pub nwk_s_key: AESKey,
    /// Uplink frame counter
    pub uplink_counter: u32,
    /// Downlink frame counter
    pub downlink_counter: u32,
    /// MIC of the last accepted downlink
    pub last_rx_mic: u32,
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
    /// Tick of the last switch to or save of this session
    pub last_used: u32,
    /// Reserved, zero when written by this crate; kept as read so the CRC
    /// covers them
    pub reserved: [u8; RESERVED_SIZE],
    /// CRC-16 over the encoded record
    pub crc16: u16,
}

impl Default for RegionContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl RegionContext {
    /// An empty slot
    pub const fn empty() -> Self {
        Self {
            region: None,
            dev_eui: [0; 8],
            activation: ActivationType::None,
            dev_addr: 0,
            app_s_key: [0; 16],
            nwk_s_key: [0; 16],
            uplink_counter: 0,
            downlink_counter: 0,
            last_rx_mic: 0,
            datarate: 0,
            tx_power: 0,
            adr_enabled: false,
            rx2_frequency: 0,
            rx2_datarate: 0,
            last_used: 0,
            reserved: [0; RESERVED_SIZE],
            crc16: 0,
        }
    }

    /// A fresh sealed session with the region's default radio parameters
    /// and zeroed counters
    pub fn provision(
        region: Region,
        activation: ActivationType,
        identity: SessionIdentity,
        now: u32,
    ) -> Self {
        let defaults = region.defaults();
        let mut ctx = Self {
            region: Some(region),
            dev_eui: identity.dev_eui,
            activation,
            dev_addr: identity.dev_addr,
            app_s_key: identity.app_s_key,
            nwk_s_key: identity.nwk_s_key,
            datarate: defaults.datarate,
            tx_power: defaults.tx_power,
            adr_enabled: defaults.adr_enabled,
            rx2_frequency: defaults.rx2_frequency,
            rx2_datarate: defaults.rx2_datarate,
            last_used: now,
            ..Self::empty()
        };
        ctx.seal();
        ctx
    }

    /// Identity material of this record
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            dev_eui: self.dev_eui,
            dev_addr: self.dev_addr,
            app_s_key: self.app_s_key,
            nwk_s_key: self.nwk_s_key,
        }
    }

    /// Encode into the flash image, CRC field as currently stored
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = self.region.map_or(EMPTY_REGION, Region::as_u8);
        buf[1..9].copy_from_slice(&self.dev_eui);
        buf[9] = self.activation as u8;
        buf[10..14].copy_from_slice(&self.dev_addr.to_le_bytes());
        buf[14..30].copy_from_slice(&self.app_s_key);
        buf[30..46].copy_from_slice(&self.nwk_s_key);
        buf[46..50].copy_from_slice(&self.uplink_counter.to_le_bytes());
        buf[50..54].copy_from_slice(&self.downlink_counter.to_le_bytes());
        buf[54..58].copy_from_slice(&self.last_rx_mic.to_le_bytes());
        buf[58] = self.datarate;
        buf[59] = self.tx_power;
        buf[60] = self.adr_enabled as u8;
        buf[61..65].copy_from_slice(&self.rx2_frequency.to_le_bytes());
        buf[65] = self.rx2_datarate;
        buf[66..70].copy_from_slice(&self.last_used.to_le_bytes());
        buf[RESERVED_OFFSET..CRC_OFFSET].copy_from_slice(&self.reserved);
        buf[CRC_OFFSET..].copy_from_slice(&self.crc16.to_le_bytes());
        buf
    }

    /// Decode a flash image; the CRC is carried over, not checked
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut dev_eui = [0u8; 8];
        dev_eui.copy_from_slice(&buf[1..9]);
        let mut app_s_key = [0u8; 16];
        app_s_key.copy_from_slice(&buf[14..30]);
        let mut nwk_s_key = [0u8; 16];
        nwk_s_key.copy_from_slice(&buf[30..46]);
        let mut reserved = [0u8; RESERVED_SIZE];
        reserved.copy_from_slice(&buf[RESERVED_OFFSET..CRC_OFFSET]);

        Self {
            region: Region::from_u8(buf[0]),
            dev_eui,
            activation: ActivationType::from_u8(buf[9]),
            dev_addr: read_u32(buf, 10),
            app_s_key,
            nwk_s_key,
            uplink_counter: read_u32(buf, 46),
            downlink_counter: read_u32(buf, 50),
            last_rx_mic: read_u32(buf, 54),
            datarate: buf[58],
            tx_power: buf[59],
            adr_enabled: buf[60] != 0,
            rx2_frequency: read_u32(buf, 61),
            rx2_datarate: buf[65],
            last_used: read_u32(buf, 66),
            reserved,
            crc16: u16::from_le_bytes([buf[CRC_OFFSET], buf[CRC_OFFSET + 1]]),
        }
    }

    /// Recompute and store the CRC
    pub fn seal(&mut self) {
        let mut buf = self.encode();
        self.crc16 = integrity::seal_crc16(&mut buf, CRC_OFFSET);
    }

    /// Whether the stored CRC matches the record
    pub fn crc_valid(&self) -> bool {
        integrity::check_crc16(&self.encode(), CRC_OFFSET)
    }

    /// Whether the slot holds a session at all
    pub fn is_populated(&self) -> bool {
        self.region.is_some() && self.dev_addr != 0 && self.dev_addr != u32::MAX
    }

    /// Populated and CRC-intact
    pub fn is_valid(&self) -> bool {
        self.is_populated() && self.crc_valid()
    }

    /// Copy the volatile session state off the live MAC and reseal.
    ///
    /// DevAddr, DevEUI and the session keys are left untouched. Frame
    /// counters never move backwards.
    pub fn capture_from<M: MacStack>(&mut self, mac: &mut M, now: u32) {
        let radio = mac.radio_params();
        self.datarate = radio.datarate;
        self.tx_power = radio.tx_power;
        self.adr_enabled = radio.adr_enabled;
        self.rx2_frequency = radio.rx2_frequency;
        self.rx2_datarate = radio.rx2_datarate;

        if let Some(nvm) = mac.nvm_context() {
            self.uplink_counter = self.uplink_counter.max(nvm.fcnt_up());
            self.downlink_counter = self.downlink_counter.max(nvm.nfcnt_down());
            self.last_rx_mic = nvm.last_rx_mic();
        }

        self.last_used = now;
        self.seal();
    }

    /// Mark as used at `now` and reseal
    pub fn touch(&mut self, now: u32) {
        self.last_used = now;
        self.seal();
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
