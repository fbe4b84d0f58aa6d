//! Radio collaborator interfaces
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

use crate::Ts;
use crate::ieee80211::Frame;

/// Transmit service
///
/// Transmission is asynchronous, completion is reported back to the MAC
/// via [`UpperMac::transmission_complete`](crate::ieee80211::UpperMac::transmission_complete).
pub trait Transmit {
    type Error: Debug;

    /// Start transmitting a frame, optionally after waiting for an inter-frame space
    fn transmit_frame(&mut self, frame: Frame, ifs: Option<Ts>) -> Result<(), Self::Error>;
}

/// Receive status service
pub trait ReceiveStatus {
    /// Whether a reception is currently under way (preamble detected but
    /// frame not yet complete)
    fn is_reception_in_progress(&self) -> bool;
}

/// Radio interface combines transmit and receive status services
pub trait Radio: Transmit + ReceiveStatus {}

/// Default Radio impl for devices providing both services
impl <T> Radio for T where
    T: Transmit + ReceiveStatus,
{}

#[cfg(any(test, feature="mocks"))]
pub mod mock {
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    use super::*;

    #[derive(Debug, Default)]
    struct Inner {
        transmitted: Vec<(Frame, Option<Ts>)>,
        receiving: bool,
    }

    /// Mock radio recording transmitted frames
    #[derive(Clone, Debug)]
    pub struct MockRadio (Arc<Mutex<Inner>>);

    impl MockRadio {
        pub fn new() -> Self {
            Self(Arc::new(Mutex::new(Inner::default())))
        }

        /// Set the reception-in-progress indication
        pub fn set_receiving(&mut self, receiving: bool) {
            self.0.lock().unwrap().receiving = receiving;
        }

        /// Take all frames transmitted since the last call
        pub fn take(&mut self) -> Vec<(Frame, Option<Ts>)> {
            core::mem::take(&mut self.0.lock().unwrap().transmitted)
        }

        /// Number of frames transmitted and not yet taken
        pub fn count(&self) -> usize {
            self.0.lock().unwrap().transmitted.len()
        }
    }

    impl Transmit for MockRadio {
        type Error = ();

        fn transmit_frame(&mut self, frame: Frame, ifs: Option<Ts>) -> Result<(), Self::Error> {
            self.0.lock().unwrap().transmitted.push((frame, ifs));
            Ok(())
        }
    }

    impl ReceiveStatus for MockRadio {
        fn is_reception_in_progress(&self) -> bool {
            self.0.lock().unwrap().receiving
        }
    }
}
