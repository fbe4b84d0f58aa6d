
use strum::{Display, IntoStaticStr};

/// Traffic priority class with its own queue, contention and retry state.
///
/// QoS (EDCA) stations run the four categories, non-QoS (DCF) stations
/// run the single `Legacy` category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr)]
pub enum AccessCategory {
    #[strum(serialize = "AC_BK")]
    Background,
    #[strum(serialize = "AC_BE")]
    BestEffort,
    #[strum(serialize = "AC_VI")]
    Video,
    #[strum(serialize = "AC_VO")]
    Voice,
    #[strum(serialize = "AC_LEGACY")]
    Legacy,
}

/// EDCA categories in ascending priority order
pub const QOS_CATEGORIES: [AccessCategory; 4] = [
    AccessCategory::Background,
    AccessCategory::BestEffort,
    AccessCategory::Video,
    AccessCategory::Voice,
];

/// DCF category set
pub const LEGACY_CATEGORIES: [AccessCategory; 1] = [AccessCategory::Legacy];

impl AccessCategory {
    /// Map a traffic identifier to an access category using the
    /// standard UP-to-AC table
    pub fn from_tid(tid: u8) -> Option<Self> {
        match tid {
            1 | 2 => Some(AccessCategory::Background),
            0 | 3 => Some(AccessCategory::BestEffort),
            4 | 5 => Some(AccessCategory::Video),
            6 | 7 => Some(AccessCategory::Voice),
            _ => None,
        }
    }

    /// Index into per-category state, the legacy category uses slot 0
    pub fn index(&self) -> usize {
        match self {
            AccessCategory::Background | AccessCategory::Legacy => 0,
            AccessCategory::BestEffort => 1,
            AccessCategory::Video => 2,
            AccessCategory::Voice => 3,
        }
    }

    /// Default arbitration inter-frame space number
    pub fn default_aifsn(&self) -> u32 {
        match self {
            AccessCategory::Background => 7,
            AccessCategory::BestEffort => 3,
            AccessCategory::Video | AccessCategory::Voice => 2,
            // DIFS = SIFS + 2 slots
            AccessCategory::Legacy => 2,
        }
    }

    /// Default minimum contention window derived from the PHY aCWmin
    pub fn default_cw_min(&self, a_cw_min: u32) -> u32 {
        match self {
            AccessCategory::Background | AccessCategory::BestEffort | AccessCategory::Legacy => a_cw_min,
            AccessCategory::Video => ((a_cw_min + 1) / 2).saturating_sub(1),
            AccessCategory::Voice => ((a_cw_min + 1) / 4).saturating_sub(1),
        }
    }

    /// Default maximum contention window derived from the PHY aCWmin / aCWmax
    pub fn default_cw_max(&self, a_cw_min: u32, a_cw_max: u32) -> u32 {
        match self {
            AccessCategory::Background | AccessCategory::BestEffort | AccessCategory::Legacy => a_cw_max,
            AccessCategory::Video => a_cw_min,
            AccessCategory::Voice => ((a_cw_min + 1) / 2).saturating_sub(1),
        }
    }
}
