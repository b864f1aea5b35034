use core::fmt;

/// Number of 16-bit banks in a channel mask (96 channels, enough for CN470)
pub const CHANNEL_MASK_BANKS: usize = 6;

/// LoRaWAN regional plan
///
/// Discriminants match the MAC stack's region numbering and are what gets
/// stored in a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(clippy::upper_case_acronyms)]
#[repr(u8)]
pub enum Region {
    /// Asia 923 MHz (all AS923 sub-plans)
    AS923 = 0,
    /// Australia 915 MHz
    AU915 = 1,
    /// China 470 MHz
    CN470 = 2,
    /// China 779 MHz
    CN779 = 3,
    /// Europe 433 MHz
    EU433 = 4,
    /// Europe 868 MHz
    EU868 = 5,
    /// Korea 920 MHz
    KR920 = 6,
    /// India 865 MHz
    IN865 = 7,
    /// United States 915 MHz
    US915 = 8,
    /// Russia 864 MHz
    RU864 = 9,
}

/// Region-specific radio parameters used when a session is provisioned
/// without going through a join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionDefaults {
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
    /// RX2 data rate index
    pub rx2_datarate: u8,
    /// Uplink data rate index
    pub datarate: u8,
    /// TX power index (0 = max EIRP)
    pub tx_power: u8,
    /// Adaptive data rate
    pub adr_enabled: bool,
}

impl Region {
    /// Every region the MAC stack knows about
    pub const ALL: [Region; 10] = [
        Region::AS923,
        Region::AU915,
        Region::CN470,
        Region::CN779,
        Region::EU433,
        Region::EU868,
        Region::KR920,
        Region::IN865,
        Region::US915,
        Region::RU864,
    ];

    /// Regions that get a session slot, in pre-join order
    pub const MANAGED: [Region; 6] = [
        Region::US915,
        Region::EU868,
        Region::AS923,
        Region::AU915,
        Region::IN865,
        Region::KR920,
    ];

    /// Decode a stored region byte
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| *r as u8 == value)
    }

    /// Region byte as stored in flash
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether sessions for this region are managed
    pub fn is_managed(self) -> bool {
        Self::MANAGED.contains(&self)
    }

    /// Short plan name, e.g. `"US915"`
    pub fn name(self) -> &'static str {
        match self {
            Region::AS923 => "AS923",
            Region::AU915 => "AU915",
            Region::CN470 => "CN470",
            Region::CN779 => "CN779",
            Region::EU433 => "EU433",
            Region::EU868 => "EU868",
            Region::KR920 => "KR920",
            Region::IN865 => "IN865",
            Region::US915 => "US915",
            Region::RU864 => "RU864",
        }
    }

    /// Default RX2 window, uplink data rate and power for this region
    pub fn defaults(self) -> RegionDefaults {
        let (rx2_frequency, rx2_datarate, datarate) = match self {
            Region::US915 => (923_300_000, 8, 0),
            Region::AU915 => (923_300_000, 8, 2),
            Region::EU868 => (869_525_000, 0, 0),
            Region::AS923 => (923_200_000, 2, 2),
            Region::IN865 => (866_550_000, 2, 2),
            Region::KR920 => (921_900_000, 0, 0),
            Region::CN470 => (505_300_000, 0, 0),
            Region::CN779 => (786_000_000, 0, 0),
            Region::EU433 => (434_665_000, 0, 0),
            Region::RU864 => (869_100_000, 0, 0),
        };
        RegionDefaults {
            rx2_frequency,
            rx2_datarate,
            datarate,
            tx_power: 0,
            adr_enabled: true,
        }
    }

    /// Channel mask applied after a session switch, `None` to keep the
    /// stack's regional default.
    ///
    /// US915 is restricted to sub-band 2 (channels 8-15 plus the 500 kHz
    /// channel 64); EU868 enables its eight standard channels.
    pub fn channel_mask(self) -> Option<ChannelMask> {
        match self {
            Region::US915 => Some(ChannelMask::new([0xFF00, 0x0000, 0x0000, 0x0000, 0x0001, 0x0000])),
            Region::EU868 => Some(ChannelMask::new([0x00FF, 0, 0, 0, 0, 0])),
            _ => None,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Enabled-channel bitmap, 16 channels per bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMask {
    banks: [u16; CHANNEL_MASK_BANKS],
}

impl ChannelMask {
    /// Create a mask from raw banks
    pub const fn new(banks: [u16; CHANNEL_MASK_BANKS]) -> Self {
        Self { banks }
    }

    /// Raw banks
    pub fn banks(&self) -> &[u16; CHANNEL_MASK_BANKS] {
        &self.banks
    }

    /// Whether `channel` is enabled
    pub fn is_enabled(&self, channel: usize) -> bool {
        self.banks
            .get(channel / 16)
            .map_or(false, |bank| bank & (1 << (channel % 16)) != 0)
    }

    /// Indices of enabled channels
    pub fn enabled_channels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..CHANNEL_MASK_BANKS * 16).filter(move |&ch| self.is_enabled(ch))
    }
}
