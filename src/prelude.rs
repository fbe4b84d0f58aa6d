//! Wifi MAC crate prelude
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

pub use crate::{Radio, Transmit, ReceiveStatus, Ts};

pub use crate::error::CoreError;
pub use crate::timer::{Timer as MacTimer, TimerEvent};

pub use crate::ieee80211::{UpperMac, Config as MacConfig, AcConfig, MacParameters, Services};
pub use crate::ieee80211::{AccessCategory, Frame, FrameKind, FrameFlags, MacAddress, PhyMode};
