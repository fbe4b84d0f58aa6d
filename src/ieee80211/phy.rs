
use crate::Ts;

/// OFDM PHY mode timing, as consumed by the MAC
///
/// Defaults to the slowest mandatory 802.11a/g mode (6 Mbps, 20 MHz).
#[derive(Debug, Clone, PartialEq)]
pub struct PhyMode {
    /// Net bitrate in Mbps
    pub bitrate_mbps: u32,

    /// Slot time in microseconds
    pub slot_time: Ts,
    /// Short inter-frame space in microseconds
    pub sifs_time: Ts,
    /// Delay from start of reception to the PHY reporting it, in microseconds
    pub phy_rx_start_delay: Ts,

    /// Preamble and SIGNAL field duration in microseconds
    pub preamble_duration: Ts,
    /// OFDM symbol duration in microseconds
    pub symbol_duration: Ts,

    /// Legacy minimum contention window (aCWmin)
    pub cw_min: u32,
    /// Legacy maximum contention window (aCWmax)
    pub cw_max: u32,
}

impl Default for PhyMode {
    fn default() -> Self {
        Self {
            bitrate_mbps: 6,
            slot_time: 9,
            sifs_time: 16,
            phy_rx_start_delay: 20,
            preamble_duration: 20,
            symbol_duration: 4,
            cw_min: 15,
            cw_max: 1023,
        }
    }
}

impl PhyMode {
    /// OFDM mode at another bitrate with the same timing
    pub fn with_bitrate(bitrate_mbps: u32) -> Self {
        Self {
            bitrate_mbps,
            ..Default::default()
        }
    }

    /// Air time for a PPDU carrying `len` MPDU bytes
    ///
    /// 16 service bits and 6 tail bits are added to the payload, padded to
    /// whole symbols.
    pub fn duration(&self, len: usize) -> Ts {
        let bits_per_symbol = (self.bitrate_mbps as u64 * self.symbol_duration).max(1);
        let bits = 16 + 8 * len as u64 + 6;
        let symbols = (bits + bits_per_symbol - 1) / bits_per_symbol;

        self.preamble_duration + symbols * self.symbol_duration
    }
}
