//! IEEE 802.11 frame model
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

use core::fmt;

use bitflags::bitflags;
use bytes::Bytes;

use crate::Ts;

use super::PhyMode;

/// Data / management MAC header length in bytes
pub const DATA_HEADER_LEN: usize = 24;
/// QoS data MAC header length in bytes (adds QoS control)
pub const QOS_DATA_HEADER_LEN: usize = 26;
/// Frame check sequence length in bytes
pub const FCS_LEN: usize = 4;
/// RTS frame length in bytes
pub const RTS_LEN: usize = 20;
/// CTS frame length in bytes
pub const CTS_LEN: usize = 14;
/// ACK frame length in bytes
pub const ACK_LEN: usize = 14;

/// Sequence numbers are 12 bits wide
pub const SEQUENCE_MODULO: u16 = 4096;

/// 48-bit IEEE MAC address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    /// Build an address from the low 48 bits of an integer
    pub fn from_u64(v: u64) -> Self {
        let b = v.to_be_bytes();
        MacAddress([b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group addresses have the I/G bit of the first octet set
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a[0], a[1], a[2], a[3], a[4], a[5])
    }
}

bitflags! {
    /// Frame control / QoS control flags tracked by the MAC
    pub struct FrameFlags: u8 {
        /// Frame is a retransmission
        const RETRY = 0b0000_0001;
        /// More fragments of the same MSDU follow
        const MORE_FRAGMENTS = 0b0000_0010;
        /// Payload carries an A-MSDU (QoS control bit 7)
        const AMSDU = 0b0000_0100;
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        FrameFlags::empty()
    }
}

/// Frame type / subtype as far as the MAC is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Non-QoS data
    Data,
    /// QoS data with traffic identifier
    QosData { tid: u8 },
    Management,
    Rts,
    Cts,
    Ack,
}

/// Frame object represents an IEEE 802.11 MPDU with owned payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,

    /// Receiver address (RA)
    pub receiver: MacAddress,
    /// Transmitter address (TA), absent on CTS and ACK
    pub transmitter: Option<MacAddress>,

    /// NAV duration in microseconds
    pub duration: Ts,

    pub sequence: u16,
    pub fragment: u8,

    pub flags: FrameFlags,

    /// PHY mode chosen for transmission, `None` selects the reference mode
    pub mode: Option<PhyMode>,

    payload: Bytes,
}

impl Frame {
    fn new(kind: FrameKind, receiver: MacAddress, transmitter: Option<MacAddress>, payload: Bytes) -> Self {
        Self {
            kind,
            receiver,
            transmitter,
            duration: 0,
            sequence: 0,
            fragment: 0,
            flags: FrameFlags::empty(),
            mode: None,
            payload,
        }
    }

    /// Build a non-QoS data frame
    pub fn data(receiver: MacAddress, transmitter: MacAddress, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Data, receiver, Some(transmitter), payload.into())
    }

    /// Build a QoS data frame for the given traffic identifier
    pub fn qos_data(receiver: MacAddress, transmitter: MacAddress, tid: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::QosData{ tid }, receiver, Some(transmitter), payload.into())
    }

    /// Build a management frame
    pub fn management(receiver: MacAddress, transmitter: MacAddress, body: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Management, receiver, Some(transmitter), body.into())
    }

    /// Build an RTS protecting the provided data frame
    pub fn rts(data: &Frame, duration: Ts) -> Self {
        let mut f = Self::new(FrameKind::Rts, data.receiver, data.transmitter, Bytes::new());
        f.duration = duration;
        f
    }

    /// Build a CTS in response to an RTS
    pub fn cts(rts: &Frame, duration: Ts) -> Self {
        let ra = rts.transmitter.unwrap_or_default();
        let mut f = Self::new(FrameKind::Cts, ra, None, Bytes::new());
        f.duration = duration;
        f
    }

    /// Build an ACK for a received data or management frame
    pub fn ack(data: &Frame, duration: Ts) -> Self {
        let ra = data.transmitter.unwrap_or_default();
        let mut f = Self::new(FrameKind::Ack, ra, None, Bytes::new());
        f.duration = duration;
        f
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    /// Total MPDU length in bytes, including header and FCS
    pub fn byte_len(&self) -> usize {
        match self.kind {
            FrameKind::Data | FrameKind::Management => DATA_HEADER_LEN + self.payload.len() + FCS_LEN,
            FrameKind::QosData{..} => QOS_DATA_HEADER_LEN + self.payload.len() + FCS_LEN,
            FrameKind::Rts => RTS_LEN,
            FrameKind::Cts => CTS_LEN,
            FrameKind::Ack => ACK_LEN,
        }
    }

    /// Header and FCS overhead for this frame kind
    pub fn overhead(&self) -> usize {
        self.byte_len() - self.payload.len()
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, FrameKind::Data | FrameKind::QosData{..})
    }

    pub fn is_data_or_management(&self) -> bool {
        self.is_data() || self.kind == FrameKind::Management
    }

    pub fn is_management(&self) -> bool {
        self.kind == FrameKind::Management
    }

    pub fn is_ack(&self) -> bool {
        self.kind == FrameKind::Ack
    }

    pub fn is_cts(&self) -> bool {
        self.kind == FrameKind::Cts
    }

    pub fn is_rts(&self) -> bool {
        self.kind == FrameKind::Rts
    }

    pub fn is_broadcast_or_multicast(&self) -> bool {
        self.receiver.is_multicast()
    }

    pub fn is_retry(&self) -> bool {
        self.flags.contains(FrameFlags::RETRY)
    }

    pub fn set_retry(&mut self, retry: bool) {
        self.flags.set(FrameFlags::RETRY, retry);
    }

    pub fn has_more_fragments(&self) -> bool {
        self.flags.contains(FrameFlags::MORE_FRAGMENTS)
    }

    /// Fragments carry a non-zero fragment number or the more-fragments flag
    pub fn is_fragment(&self) -> bool {
        self.fragment != 0 || self.has_more_fragments()
    }

    pub fn is_amsdu(&self) -> bool {
        self.flags.contains(FrameFlags::AMSDU)
    }

    /// Air time of this frame in its transmission mode
    pub fn duration_in(&self, reference: &PhyMode) -> Ts {
        self.mode.as_ref().unwrap_or(reference).duration(self.byte_len())
    }

    /// Traffic identifier for QoS data
    pub fn tid(&self) -> Option<u8> {
        match self.kind {
            FrameKind::QosData{ tid } => Some(tid),
            _ => None,
        }
    }
}
