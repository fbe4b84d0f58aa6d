
use log::{debug, trace};

use super::{AccessCategory, Frame, MacParameters};

/// Retry counters and contention window for one access category.
///
/// Frames at or below the RTS threshold count against the short retry
/// limit, longer frames against the long retry limit. The handler never
/// drops frames itself, the caller does when `is_retry_possible` fails.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryHandler {
    ac: AccessCategory,

    short_retry_limit: u32,
    long_retry_limit: u32,
    rts_threshold: usize,

    cw_min: u32,
    cw_max: u32,

    short_retry_count: u32,
    long_retry_count: u32,
    cw: u32,
}

impl RetryHandler {
    pub fn new(params: &MacParameters, ac: AccessCategory) -> Self {
        let p = params.ac(ac);

        Self {
            ac,
            short_retry_limit: params.short_retry_limit,
            long_retry_limit: params.long_retry_limit,
            rts_threshold: params.rts_threshold,
            cw_min: p.cw_min,
            cw_max: p.cw_max,
            short_retry_count: 0,
            long_retry_count: 0,
            cw: p.cw_min,
        }
    }

    fn is_short(&self, failed_frame: &Frame) -> bool {
        failed_frame.byte_len() <= self.rts_threshold
    }

    /// Account for a failed transmission of `failed_frame` (the data frame
    /// itself or the RTS protecting it)
    pub fn frame_transmission_failed(&mut self, _data_frame: &Frame, failed_frame: &Frame) {
        if self.is_short(failed_frame) {
            self.short_retry_count += 1;
        } else {
            self.long_retry_count += 1;
        }

        self.cw = (2 * self.cw + 1).min(self.cw_max);

        debug!("{} transmission failed (short: {} long: {} cw: {})",
            self.ac, self.short_retry_count, self.long_retry_count, self.cw);
    }

    /// Reset counters and window following a successful transmission.
    ///
    /// An answered RTS only clears the short counter, the long counter
    /// and window are kept until the protected data frame is acknowledged.
    pub fn frame_transmission_succeeded(&mut self, frame: &Frame) {
        if frame.is_rts() {
            trace!("{} RTS answered, resetting short retry count", self.ac);
            self.short_retry_count = 0;
            return;
        }

        trace!("{} transmission succeeded, resetting retry state", self.ac);
        self.reset();
    }

    /// Whether the failed frame may be attempted again
    pub fn is_retry_possible(&self, _data_frame: &Frame, failed_frame: &Frame) -> bool {
        if self.is_short(failed_frame) {
            self.short_retry_count < self.short_retry_limit
        } else {
            self.long_retry_count < self.long_retry_limit
        }
    }

    /// Reset counters and window, used on success and when a frame is dropped
    pub fn reset(&mut self) {
        self.short_retry_count = 0;
        self.long_retry_count = 0;
        self.cw = self.cw_min;
    }

    /// Current contention window
    pub fn cw(&self) -> u32 {
        self.cw
    }

    pub fn short_retry_count(&self) -> u32 {
        self.short_retry_count
    }

    pub fn long_retry_count(&self) -> u32 {
        self.long_retry_count
    }
}
