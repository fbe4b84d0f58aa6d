
use alloc::collections::VecDeque;

use log::{debug, warn};

use super::{AccessCategory, Frame};

/// Per access category transmission queue.
///
/// Frames are ordered by class (management first, then optionally
/// multicast, then unicast data) and FIFO within a class. Data frames
/// arriving at a full queue are dropped, management frames never are.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionQueue {
    ac: AccessCategory,
    max_len: usize,
    prioritize_multicast: bool,
    frames: VecDeque<Frame>,
}

impl TransmissionQueue {
    /// Create a new queue, a `max_len` of 0 disables the length limit
    pub fn new(ac: AccessCategory, max_len: usize, prioritize_multicast: bool) -> Self {
        Self {
            ac,
            max_len,
            prioritize_multicast,
            frames: VecDeque::new(),
        }
    }

    /// Priority class, lower is sent first
    fn class(&self, frame: &Frame) -> u8 {
        match (frame.is_management(), self.prioritize_multicast && frame.is_broadcast_or_multicast()) {
            (true, _) => 0,
            (false, true) => 1,
            (false, false) => 2,
        }
    }

    pub fn is_full(&self) -> bool {
        self.max_len > 0 && self.frames.len() >= self.max_len
    }

    /// Enqueue a frame, returning false if a data frame was dropped as the
    /// queue is full
    pub fn enqueue(&mut self, frame: Frame) -> bool {
        if self.is_full() && frame.is_data() {
            warn!("{} queue full ({} frames), dropping data frame for {}", self.ac, self.frames.len(), frame.receiver);
            return false;
        }

        let class = self.class(&frame);
        let idx = self.frames.iter()
            .position(|f| self.class(f) > class)
            .unwrap_or(self.frames.len());

        debug!("{} enqueue frame for {} at position {}", self.ac, frame.receiver, idx);

        self.frames.insert(idx, frame);
        true
    }

    /// Insert frames at the head of the queue, preserving their order
    pub fn push_front_all<I>(&mut self, frames: I)
    where
        I: IntoIterator<Item=Frame>,
        I::IntoIter: DoubleEndedIterator,
    {
        for f in frames.into_iter().rev() {
            self.frames.push_front(f);
        }
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn front(&self) -> Option<&Frame> {
        self.frames.front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=&Frame> {
        self.frames.iter()
    }
}
