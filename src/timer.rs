//! MAC Timer API
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

use crate::Ts;
use crate::ieee80211::AccessCategory;

/// One-shot timers the MAC arms with the simulation kernel.
///
/// Each variant identifies its owner so expiries are dispatched directly
/// to the component that armed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerEvent {
    /// Earliest backoff expiry across all contention engines
    Contention,
    /// Reply wait of the frame exchange running for an access category
    ReplyTimeout(AccessCategory),
}

/// Timer trait provides the monotonic simulation clock and one-shot
/// timer scheduling.
///
/// Timers are keyed by [`TimerEvent`], at most one instance of each event
/// is pending at a time.
pub trait Timer {
    /// Returns the current simulation time in microseconds
    fn ticks_us(&self) -> Ts;

    /// Arm a timer to fire at `at`, replacing any pending timer for the same event
    fn schedule(&mut self, at: Ts, event: TimerEvent);

    /// Cancel a pending timer, no-op if the event is not armed
    fn cancel(&mut self, event: TimerEvent);
}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use super::*;

    #[derive(Debug, Default)]
    struct Inner {
        now: Ts,
        pending: Vec<(Ts, TimerEvent)>,
    }

    /// Mock timer implementation to assist with testing
    #[derive(Clone, Debug)]
    pub struct MockTimer (Arc<Mutex<Inner>>);

    impl MockTimer {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(Inner::default())))
        }

        pub fn set_us(&mut self, val: Ts) {
            self.0.lock().unwrap().now = val;
        }

        pub fn inc(&mut self, delta: Ts) {
            self.0.lock().unwrap().now += delta;
        }

        pub fn val(&self) -> Ts {
            self.0.lock().unwrap().now
        }

        /// Expiry time of a pending event
        pub fn pending(&self, event: TimerEvent) -> Option<Ts> {
            self.0.lock().unwrap().pending.iter()
                .find(|(_, e)| *e == event)
                .map(|(at, _)| *at)
        }

        /// Next pending event, earliest first
        pub fn next(&self) -> Option<(Ts, TimerEvent)> {
            self.0.lock().unwrap().pending.iter()
                .min_by_key(|(at, e)| (*at, *e))
                .cloned()
        }

        /// Remove the next pending event and advance the clock to it
        pub fn fire_next(&mut self) -> Option<TimerEvent> {
            let (at, event) = self.next()?;

            let mut inner = self.0.lock().unwrap();
            inner.pending.retain(|(_, e)| *e != event);
            if at > inner.now {
                inner.now = at;
            }

            Some(event)
        }
    }

    impl Timer for MockTimer {
        fn ticks_us(&self) -> Ts {
            self.val()
        }

        fn schedule(&mut self, at: Ts, event: TimerEvent) {
            let mut inner = self.0.lock().unwrap();
            inner.pending.retain(|(_, e)| *e != event);
            inner.pending.push((at, event));
        }

        fn cancel(&mut self, event: TimerEvent) {
            self.0.lock().unwrap().pending.retain(|(_, e)| *e != event);
        }
    }
}
