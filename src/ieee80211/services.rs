//! Pluggable MAC services
//!
//! Sequence numbering and duplicate detection, fragmentation and
//! reassembly, A-MSDU aggregation and rate selection are consumed by the
//! upper MAC through the traits below. Basic implementations are provided
//! for each.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, trace, warn};

use super::{Frame, FrameFlags, MacAddress, PhyMode, TransmissionQueue};
use super::frame::SEQUENCE_MODULO;

/// Maximum number of fragments an MSDU may be split into
pub const MAX_FRAGMENTS: usize = 16;

/// A-MSDU subframe header: destination, source and length
pub const AMSDU_SUBHEADER_LEN: usize = 14;

/// Sequence number assignment for outgoing and duplicate filtering for
/// incoming frames
pub trait DuplicateDetector {
    /// Assign the next sequence number for the frame's receiver
    fn assign_sequence_number(&mut self, frame: &mut Frame);

    /// Whether a received frame repeats one already delivered
    fn is_duplicate(&mut self, frame: &Frame) -> bool;
}

/// Splits an MSDU into fragments no longer than a threshold
pub trait Fragmenter {
    fn fragment(&mut self, frame: Frame, threshold: usize) -> Vec<Frame>;
}

/// Rebuilds MSDUs from received fragments
pub trait Reassembly {
    /// Add a fragment, returning the complete frame once the last fragment arrives
    fn add_fragment(&mut self, fragment: Frame) -> Option<Frame>;
}

/// A-MSDU aggregation
pub trait MsduAggregation {
    /// Take the next frame from the queue, aggregating the frames that
    /// follow it where possible
    fn create_aggregate_frame(&mut self, queue: &mut TransmissionQueue) -> Option<Frame>;

    /// Split a received A-MSDU into its subframes
    fn explode_aggregate_frame(&mut self, frame: Frame) -> Vec<Frame>;
}

/// PHY mode selection for outgoing frames
pub trait RateSelection {
    fn mode_for_unicast(&mut self, frame: &Frame) -> PhyMode;

    fn mode_for_multicast(&mut self, frame: &Frame) -> PhyMode;

    /// Slowest mandatory mode, used for control responses and to derive MAC timing
    fn slowest_mandatory_mode(&self) -> PhyMode;
}

/// Services used by the upper MAC
pub struct Services {
    pub duplicate_detector: Box<dyn DuplicateDetector>,
    pub fragmenter: Box<dyn Fragmenter>,
    pub reassembly: Box<dyn Reassembly>,
    pub aggregation: Option<Box<dyn MsduAggregation>>,
    pub rate_selection: Box<dyn RateSelection>,
}

impl Services {
    /// Basic services transmitting at a fixed mode, without aggregation
    pub fn basic(mode: PhyMode) -> Self {
        Self {
            duplicate_detector: Box::new(QosDuplicateDetector::default()),
            fragmenter: Box::new(BasicFragmenter),
            reassembly: Box::new(BasicReassembly::default()),
            aggregation: None,
            rate_selection: Box::new(FixedRateSelection::new(mode)),
        }
    }

    /// Enable A-MSDU aggregation
    pub fn with_aggregation(mut self, aggregation: impl MsduAggregation + 'static) -> Self {
        self.aggregation = Some(Box::new(aggregation));
        self
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::basic(PhyMode::default())
    }
}

/// Sequence spaces are kept per address and traffic identifier, non-QoS
/// and management frames share the `None` space
type SequenceKey = (MacAddress, Option<u8>);

/// Duplicate detector with per receiver / TID sequence counters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QosDuplicateDetector {
    tx: BTreeMap<SequenceKey, u16>,
    rx: BTreeMap<SequenceKey, (u16, u8)>,
}

impl DuplicateDetector for QosDuplicateDetector {
    fn assign_sequence_number(&mut self, frame: &mut Frame) {
        let next = self.tx.entry((frame.receiver, frame.tid())).or_insert(0);

        frame.sequence = *next;
        *next = (*next + 1) % SEQUENCE_MODULO;

        trace!("Assigned sequence {} for {}", frame.sequence, frame.receiver);
    }

    fn is_duplicate(&mut self, frame: &Frame) -> bool {
        let transmitter = match frame.transmitter {
            Some(t) => t,
            None => return false,
        };

        let key = (transmitter, frame.tid());
        let id = (frame.sequence, frame.fragment);

        if frame.is_retry() && self.rx.get(&key) == Some(&id) {
            return true;
        }

        self.rx.insert(key, id);
        false
    }
}

/// Fragmenter splitting payloads into equal chunks
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BasicFragmenter;

impl Fragmenter for BasicFragmenter {
    fn fragment(&mut self, frame: Frame, threshold: usize) -> Vec<Frame> {
        let payload = frame.payload().clone();

        let mut chunk = threshold.saturating_sub(frame.overhead()).max(1);
        if (payload.len() + chunk - 1) / chunk > MAX_FRAGMENTS {
            chunk = (payload.len() + MAX_FRAGMENTS - 1) / MAX_FRAGMENTS;
        }

        let count = ((payload.len() + chunk - 1) / chunk).max(1);

        debug!("Fragmenting {} byte frame for {} into {} fragments", frame.byte_len(), frame.receiver, count);

        (0..count).map(|i| {
            let start = i * chunk;
            let end = (start + chunk).min(payload.len());

            let mut f = frame.clone();
            f.set_payload(payload.slice(start..end));
            f.fragment = i as u8;
            f.flags.set(FrameFlags::MORE_FRAGMENTS, i + 1 < count);
            f
        }).collect()
    }
}

/// Reassembly of in-order fragments, keyed by transmitter and sequence number
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicReassembly {
    pending: BTreeMap<(MacAddress, u16), Vec<Frame>>,
}

impl Reassembly for BasicReassembly {
    fn add_fragment(&mut self, fragment: Frame) -> Option<Frame> {
        let key = (fragment.transmitter.unwrap_or_default(), fragment.sequence);

        if fragment.fragment == 0 {
            self.pending.insert(key, Vec::new());
        }

        let fragments = match self.pending.get_mut(&key) {
            Some(f) => f,
            None => {
                debug!("Dropping fragment {} of {}, first fragment missing", fragment.fragment, fragment.sequence);
                return None;
            },
        };

        if fragments.len() != fragment.fragment as usize {
            debug!("Dropping out of order fragment {} of {} (expected {})", fragment.fragment, fragment.sequence, fragments.len());
            self.pending.remove(&key);
            return None;
        }

        let last = !fragment.has_more_fragments();
        fragments.push(fragment);

        if !last {
            return None;
        }

        let fragments = self.pending.remove(&key)?;

        let len = fragments.iter().map(|f| f.payload().len()).sum();
        let mut payload = BytesMut::with_capacity(len);
        for f in &fragments {
            payload.put_slice(f.payload());
        }

        let mut frame = fragments.into_iter().next()?;
        frame.set_payload(payload.freeze());
        frame.fragment = 0;
        frame.flags.remove(FrameFlags::MORE_FRAGMENTS);

        Some(frame)
    }
}

/// A-MSDU aggregation of consecutive QoS data frames sharing receiver and TID
#[derive(Debug, Clone, PartialEq)]
pub struct BasicMsduAggregation {
    /// Minimum number of subframes worth aggregating
    pub min_subframes: usize,
    /// Maximum number of subframes per aggregate
    pub max_subframes: usize,
    /// Maximum A-MSDU payload length in bytes
    pub max_len: usize,
}

impl Default for BasicMsduAggregation {
    fn default() -> Self {
        Self {
            min_subframes: 2,
            max_subframes: 8,
            max_len: 3839,
        }
    }
}

fn subframe_len(payload: usize) -> usize {
    AMSDU_SUBHEADER_LEN + payload
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

impl BasicMsduAggregation {
    /// Number of frames at the head of the queue that can be aggregated
    fn aggregatable(&self, queue: &TransmissionQueue) -> usize {
        let head = match queue.front() {
            Some(h) if h.tid().is_some() && !h.is_broadcast_or_multicast() && !h.is_fragment() => h,
            _ => return 0,
        };

        let mut count = 0;
        let mut len = 0;

        for f in queue.iter() {
            if count == self.max_subframes || f.receiver != head.receiver || f.tid() != head.tid() || f.is_fragment() {
                break;
            }

            let sub = padding(len) + subframe_len(f.payload().len());
            if len + sub > self.max_len {
                break;
            }

            len += sub;
            count += 1;
        }

        count
    }
}

impl MsduAggregation for BasicMsduAggregation {
    fn create_aggregate_frame(&mut self, queue: &mut TransmissionQueue) -> Option<Frame> {
        let count = self.aggregatable(queue);
        if count < self.min_subframes {
            return queue.pop();
        }

        let mut payload = BytesMut::new();
        let mut first = None;

        for _ in 0..count {
            let f = queue.pop()?;

            payload.put_bytes(0, padding(payload.len()));
            payload.put_slice(&f.receiver.0);
            payload.put_slice(&f.transmitter.unwrap_or_default().0);
            payload.put_u16(f.payload().len() as u16);
            payload.put_slice(f.payload());

            if first.is_none() {
                first = Some(f);
            }
        }

        let mut frame = first?;
        frame.set_payload(payload.freeze());
        frame.flags.insert(FrameFlags::AMSDU);

        debug!("Aggregated {} frames for {} ({} bytes)", count, frame.receiver, frame.byte_len());

        Some(frame)
    }

    fn explode_aggregate_frame(&mut self, frame: Frame) -> Vec<Frame> {
        let tid = frame.tid().unwrap_or(0);
        let mut buf: Bytes = frame.payload().clone();
        let mut frames = Vec::new();

        while buf.remaining() >= AMSDU_SUBHEADER_LEN {
            let mut da = [0u8; 6];
            let mut sa = [0u8; 6];
            buf.copy_to_slice(&mut da);
            buf.copy_to_slice(&mut sa);
            let len = buf.get_u16() as usize;

            if len > buf.remaining() {
                warn!("Truncated A-MSDU subframe from {} ({} of {} bytes)", MacAddress(sa), buf.remaining(), len);
                break;
            }

            let body = buf.split_to(len);

            let mut f = Frame::qos_data(MacAddress(da), MacAddress(sa), tid, body);
            f.sequence = frame.sequence;
            frames.push(f);

            let pad = padding(AMSDU_SUBHEADER_LEN + len).min(buf.remaining());
            buf.advance(pad);
        }

        frames
    }
}

/// Rate selection using the same mode for every frame
#[derive(Debug, Clone, PartialEq)]
pub struct FixedRateSelection {
    mode: PhyMode,
    slowest: PhyMode,
}

impl FixedRateSelection {
    pub fn new(mode: PhyMode) -> Self {
        Self {
            slowest: PhyMode {
                bitrate_mbps: 6,
                ..mode.clone()
            },
            mode,
        }
    }
}

impl RateSelection for FixedRateSelection {
    fn mode_for_unicast(&mut self, _frame: &Frame) -> PhyMode {
        self.mode.clone()
    }

    fn mode_for_multicast(&mut self, _frame: &Frame) -> PhyMode {
        self.slowest.clone()
    }

    fn slowest_mandatory_mode(&self) -> PhyMode {
        self.slowest.clone()
    }
}
