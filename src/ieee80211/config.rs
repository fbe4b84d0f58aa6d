
use crate::Ts;

use super::{AccessCategory, MacAddress, PhyMode};
use super::access_category::{QOS_CATEGORIES, LEGACY_CATEGORIES};
use super::frame::{ACK_LEN, CTS_LEN};

/// Per access category overrides, `None` selects the standard default
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AcConfig {
    /// Arbitration inter-frame space number
    pub aifsn: Option<u32>,
    /// Minimum contention window
    pub cw_min: Option<u32>,
    /// Maximum contention window
    pub cw_max: Option<u32>,
    /// Contention window for multicast frames
    pub cw_multicast: Option<u32>,
}

/// Configuration for the upper MAC
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Station MAC address
    pub address: MacAddress,

    /// Enable QoS (EDCA, four access categories), otherwise DCF with a
    /// single legacy category
    pub qos: bool,

    /// Retry limit for frames at or below the RTS threshold
    pub short_retry_limit: u32,
    /// Retry limit for frames above the RTS threshold
    pub long_retry_limit: u32,

    /// Frames longer than this (in bytes) are protected by RTS/CTS
    pub rts_threshold: usize,
    /// Frames longer than this (in bytes) are fragmented
    pub fragmentation_threshold: usize,

    /// Wait for the full ACK rather than only the start of its reception
    pub use_full_ack_timeout: bool,

    /// Slot time override in microseconds
    pub slot_time: Option<Ts>,
    /// SIFS override in microseconds
    pub sifs_time: Option<Ts>,

    /// Per category overrides, indexed by `AccessCategory::index()`
    pub ac: [AcConfig; 4],

    /// Maximum number of queued frames per category, 0 disables the limit
    pub max_queue_size: usize,

    /// Order multicast frames ahead of unicast in the transmission queue
    pub prioritize_multicast: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: MacAddress::default(),
            qos: true,

            short_retry_limit: 7,
            long_retry_limit: 4,

            rts_threshold: 2346,
            fragmentation_threshold: 2346,

            use_full_ack_timeout: false,

            slot_time: None,
            sifs_time: None,

            ac: Default::default(),

            max_queue_size: 14,
            prioritize_multicast: false,
        }
    }
}

impl Config {
    /// Access categories enabled by this configuration
    pub fn categories(&self) -> &'static [AccessCategory] {
        match self.qos {
            true => &QOS_CATEGORIES,
            false => &LEGACY_CATEGORIES,
        }
    }
}

/// Derived timing for one access category
#[derive(Debug, Clone, PartialEq)]
pub struct AcParameters {
    pub aifs: Ts,
    pub eifs: Ts,
    pub cw_min: u32,
    pub cw_max: u32,
    pub cw_multicast: u32,
}

/// Immutable MAC parameters, derived once from the configuration and the
/// slowest mandatory PHY mode and shared by all components
#[derive(Debug, Clone, PartialEq)]
pub struct MacParameters {
    pub address: MacAddress,
    pub qos: bool,

    pub short_retry_limit: u32,
    pub long_retry_limit: u32,
    pub rts_threshold: usize,
    pub fragmentation_threshold: usize,
    pub use_full_ack_timeout: bool,

    pub slot_time: Ts,
    pub sifs_time: Ts,
    pub phy_rx_start_delay: Ts,

    pub max_queue_size: usize,
    pub prioritize_multicast: bool,

    /// Mode used for control responses and timeout computation
    pub reference_mode: PhyMode,

    ac: [AcParameters; 4],
}

impl MacParameters {
    pub fn new(config: &Config, slowest_mode: &PhyMode) -> Self {
        let slot_time = config.slot_time.unwrap_or(slowest_mode.slot_time);
        let sifs_time = config.sifs_time.unwrap_or(slowest_mode.sifs_time);
        let ack_duration = slowest_mode.duration(ACK_LEN);

        let ac_params = |ac: AccessCategory| {
            let c = &config.ac[ac.index()];

            let aifsn = c.aifsn.unwrap_or_else(|| ac.default_aifsn());
            let aifs = sifs_time + aifsn as Ts * slot_time;
            let cw_min = c.cw_min.unwrap_or_else(|| ac.default_cw_min(slowest_mode.cw_min));

            AcParameters {
                aifs,
                eifs: sifs_time + aifs + ack_duration,
                cw_min,
                cw_max: c.cw_max.unwrap_or_else(|| ac.default_cw_max(slowest_mode.cw_min, slowest_mode.cw_max)),
                cw_multicast: c.cw_multicast.unwrap_or(cw_min),
            }
        };

        let ac = match config.qos {
            true => [
                ac_params(AccessCategory::Background),
                ac_params(AccessCategory::BestEffort),
                ac_params(AccessCategory::Video),
                ac_params(AccessCategory::Voice),
            ],
            // Only slot 0 is used in DCF mode
            false => [
                ac_params(AccessCategory::Legacy),
                ac_params(AccessCategory::Legacy),
                ac_params(AccessCategory::Legacy),
                ac_params(AccessCategory::Legacy),
            ],
        };

        Self {
            address: config.address,
            qos: config.qos,
            short_retry_limit: config.short_retry_limit,
            long_retry_limit: config.long_retry_limit,
            rts_threshold: config.rts_threshold,
            fragmentation_threshold: config.fragmentation_threshold,
            use_full_ack_timeout: config.use_full_ack_timeout,
            slot_time,
            sifs_time,
            phy_rx_start_delay: slowest_mode.phy_rx_start_delay,
            max_queue_size: config.max_queue_size,
            prioritize_multicast: config.prioritize_multicast,
            reference_mode: slowest_mode.clone(),
            ac,
        }
    }

    /// Timing parameters for an access category
    pub fn ac(&self, ac: AccessCategory) -> &AcParameters {
        &self.ac[ac.index()]
    }

    pub fn categories(&self) -> &'static [AccessCategory] {
        match self.qos {
            true => &QOS_CATEGORIES,
            false => &LEGACY_CATEGORIES,
        }
    }

    pub fn ack_duration(&self) -> Ts {
        self.reference_mode.duration(ACK_LEN)
    }

    pub fn cts_duration(&self) -> Ts {
        self.reference_mode.duration(CTS_LEN)
    }

    /// Wait for the start of an ACK reception
    pub fn ack_early_timeout(&self) -> Ts {
        self.sifs_time + self.slot_time + self.phy_rx_start_delay
    }

    /// Wait for a complete ACK reception
    pub fn ack_full_timeout(&self) -> Ts {
        self.sifs_time + self.slot_time + self.ack_duration()
    }

    /// Wait for the start of a CTS reception
    pub fn cts_early_timeout(&self) -> Ts {
        self.sifs_time + self.slot_time + self.phy_rx_start_delay
    }
}
