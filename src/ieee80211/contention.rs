//! CSMA/CA channel contention
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

use log::{debug, trace};

use rand_core::RngCore;
use strum::{Display, IntoStaticStr};

use crate::Ts;
use crate::timer::{Timer, TimerEvent};

use super::AccessCategory;

/// Contention state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ContentionState {
    /// No channel access requested
    Idle,
    /// Access requested, waiting for the medium to become free
    Defer,
    /// Medium free, counting down the inter-frame space and backoff slots
    WaitingBackoff,
    /// Channel access granted
    Owning,
}

/// Source of the contention window for a backoff draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffWindow {
    /// Window grows from `cw_min` with the retry count
    RetryCount(u32),
    /// Explicit window, bounded by `cw_max`
    Window(u32),
}

/// Parameters for one contention attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ContentionParams {
    /// Arbitration inter-frame space
    pub aifs: Ts,
    /// Extended inter-frame space, used following a corrupted reception
    pub eifs: Ts,
    pub cw_min: u32,
    pub cw_max: u32,
    pub slot_time: Ts,
    pub window: BackoffWindow,
}

impl ContentionParams {
    /// Contention window for this attempt
    pub fn cw(&self) -> u32 {
        match self.window {
            BackoffWindow::RetryCount(r) => compute_cw(self.cw_min, self.cw_max, r),
            BackoffWindow::Window(cw) => cw.min(self.cw_max),
        }
    }
}

/// Standard binary exponential window: (cw_min + 1) * 2^retries - 1, bounded by cw_max
pub fn compute_cw(cw_min: u32, cw_max: u32, retry_count: u32) -> u32 {
    let cw = ((cw_min as u64 + 1) << retry_count.min(32)) - 1;
    cw.min(cw_max as u64) as u32
}

/// Contention engine for a single access category
#[derive(Debug, Clone, PartialEq)]
pub struct Contention {
    ac: AccessCategory,
    state: ContentionState,

    params: Option<ContentionParams>,

    /// Remaining backoff slots, frozen while the medium is busy
    backoff_slots: u32,
    /// EIFS applies until this time following a corrupted reception
    end_eifs: Ts,
    /// EIFS of the most recent contention, retained for idle engines
    eifs: Ts,
    /// Time at which the backoff will complete
    scheduled: Option<Ts>,

    medium_free: bool,
}

impl Contention {
    pub fn new(ac: AccessCategory, eifs: Ts) -> Self {
        Self {
            ac,
            state: ContentionState::Idle,
            params: None,
            backoff_slots: 0,
            end_eifs: 0,
            eifs,
            scheduled: None,
            medium_free: true,
        }
    }

    /// Request channel access
    ///
    /// Panics if a contention is already in progress
    pub fn start_contention<G: RngCore>(&mut self, now: Ts, params: ContentionParams, rng: &mut G) {
        if self.state != ContentionState::Idle {
            panic!("{} start_contention() in state {}, contention already in progress", self.ac, self.state);
        }

        let cw = params.cw();
        self.backoff_slots = rng.next_u32() % (cw + 1);
        self.eifs = params.eifs;
        self.params = Some(params);

        debug!("{} starting contention at {} us (cw: {} slots: {})", self.ac, now, cw, self.backoff_slots);

        if self.medium_free {
            self.schedule(now);
        } else {
            self.state = ContentionState::Defer;
        }
    }

    /// Release an owned channel, no-op if idle
    pub fn channel_released(&mut self) {
        match self.state {
            ContentionState::Idle => {
                trace!("{} channel released while idle", self.ac);
            },
            ContentionState::Owning => {
                debug!("{} channel released", self.ac);
            },
            ContentionState::Defer | ContentionState::WaitingBackoff => {
                debug!("{} contention cancelled in state {}", self.ac, self.state);
            },
        }

        self.state = ContentionState::Idle;
        self.params = None;
        self.scheduled = None;
    }

    /// Update carrier sense state
    pub fn medium_state_changed(&mut self, now: Ts, free: bool) {
        self.medium_free = free;

        match (self.state, free) {
            (ContentionState::Defer, true) => {
                self.schedule(now);
            },
            (ContentionState::WaitingBackoff, false) => {
                self.freeze(now);
                self.state = ContentionState::Defer;

                trace!("{} medium busy at {} us, backoff frozen with {} slots", self.ac, now, self.backoff_slots);
            },
            _ => (),
        }
    }

    /// A corrupted frame was received, defer with EIFS rather than AIFS
    pub fn corrupted_frame_received(&mut self, now: Ts) {
        self.end_eifs = now + self.eifs;

        trace!("{} corrupted frame at {} us, EIFS until {} us", self.ac, now, self.end_eifs);

        if self.state == ContentionState::WaitingBackoff {
            self.freeze(now);
            self.schedule(now);
        }
    }

    /// Backoff completed and this category won arbitration
    pub fn transmission_granted(&mut self) {
        debug_assert_eq!(self.state, ContentionState::WaitingBackoff);

        self.state = ContentionState::Owning;
        self.scheduled = None;
    }

    /// Backoff completed in the same slot as a higher priority category
    pub fn internal_collision(&mut self) {
        debug_assert_eq!(self.state, ContentionState::WaitingBackoff);

        self.state = ContentionState::Idle;
        self.params = None;
        self.scheduled = None;
    }

    pub fn state(&self) -> ContentionState {
        self.state
    }

    pub fn is_owning(&self) -> bool {
        self.state == ContentionState::Owning
    }

    pub fn is_contention_in_progress(&self) -> bool {
        self.state != ContentionState::Idle
    }

    /// Time at which the backoff completes, if counting down
    pub fn scheduled_transmission(&self) -> Option<Ts> {
        self.scheduled
    }

    pub fn backoff_slots(&self) -> u32 {
        self.backoff_slots
    }

    /// Count down IFS and the remaining backoff slots from `now`
    fn schedule(&mut self, now: Ts) {
        let p = match &self.params {
            Some(p) => p,
            None => return,
        };

        let ifs = p.aifs.max(self.end_eifs.saturating_sub(now));
        let at = now + ifs + self.backoff_slots as Ts * p.slot_time;

        self.scheduled = Some(at);
        self.state = ContentionState::WaitingBackoff;

        trace!("{} backoff scheduled for {} us (ifs: {} slots: {})", self.ac, at, ifs, self.backoff_slots);
    }

    /// Recompute remaining slots from the scheduled expiry, only whole
    /// elapsed slots are consumed
    fn freeze(&mut self, now: Ts) {
        let (at, slot_time) = match (self.scheduled.take(), &self.params) {
            (Some(at), Some(p)) => (at, p.slot_time.max(1)),
            _ => return,
        };

        let remaining = at.saturating_sub(now);
        let slots = ((remaining + slot_time - 1) / slot_time) as u32;

        if slots < self.backoff_slots {
            self.backoff_slots = slots;
        }
    }
}

/// Outcome of a backoff expiry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arbitration {
    /// Category granted the channel
    pub granted: Option<AccessCategory>,
    /// Lower priority categories that expired in the same slot
    pub collided: heapless::Vec<AccessCategory, 4>,
}

/// Arbitrates backoff expiries between the contention engines of a
/// station, granting at most one category per slot.
///
/// A single [`TimerEvent::Contention`] timer tracks the earliest expiry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollisionController {
    armed: Option<Ts>,
}

impl CollisionController {
    pub fn new() -> Self {
        Self { armed: None }
    }

    /// Arm the contention timer for the earliest scheduled expiry
    pub fn rearm<T: Timer>(&mut self, timer: &mut T, next: Option<Ts>) {
        if next == self.armed {
            return;
        }

        match next {
            Some(at) => timer.schedule(at, TimerEvent::Contention),
            None => timer.cancel(TimerEvent::Contention),
        }

        self.armed = next;
    }

    /// The contention timer fired
    pub fn expired(&mut self) {
        self.armed = None;
    }

    /// Select the highest priority category among those whose backoff
    /// completed by `now`, all others completing are internal collisions
    pub fn arbitrate<I>(&self, now: Ts, candidates: I) -> Arbitration
    where
        I: Iterator<Item=(AccessCategory, Option<Ts>)>,
    {
        let mut a = Arbitration::default();

        for (ac, at) in candidates {
            match at {
                Some(at) if at <= now => (),
                _ => continue,
            }

            match a.granted {
                Some(g) if g.index() > ac.index() => {
                    let _ = a.collided.push(ac);
                },
                Some(g) => {
                    let _ = a.collided.push(g);
                    a.granted = Some(ac);
                },
                None => a.granted = Some(ac),
            }
        }

        a
    }
}
