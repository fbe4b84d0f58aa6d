//! IEEE 802.11 upper MAC core
//!
//! Channel access (DCF / EDCA contention), frame exchange sequencing
//! (DATA/ACK, RTS/CTS/DATA/ACK, multicast) and retry handling for a
//! station driven by a discrete-event simulator.
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

#![no_std]

extern crate alloc;

#[cfg(any(test, feature="std", feature="mocks"))]
extern crate std;

pub mod timer;

pub mod radio;

pub mod error;

pub mod ieee80211;

pub mod prelude;

pub use radio::{Radio, Transmit, ReceiveStatus};

/// Timestamps and durations are 64-bit simulation time in microseconds
pub type Ts = u64;
