//! Frame exchange sequences
//!
//! A frame exchange is a short scripted conversation with a peer (DATA/ACK,
//! RTS/CTS/DATA/ACK) or a single unacknowledged multicast transmission.
//! Acknowledged exchanges are expressed as a [`StepSequence`] and driven
//! by the generic [`StepExchange`] engine.
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

use alloc::collections::VecDeque;

use log::{debug, trace, warn};
use strum::Display;

use crate::{Radio, Ts};
use crate::error::CoreError;
use crate::timer::{Timer, TimerEvent};

use super::{AccessCategory, Frame, MacParameters};

/// Originator of a pending radio transmission
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TxOrigin {
    Exchange(AccessCategory),
    Responder,
}

/// Borrowed station resources used while driving an exchange
pub struct ExchangeContext<'a, R, T> {
    pub now: Ts,
    pub params: &'a MacParameters,
    pub radio: &'a mut R,
    pub timer: &'a mut T,
    /// Transmissions awaiting completion, oldest first
    pub pending_tx: &'a mut VecDeque<TxOrigin>,
}

impl <'a, R: Radio, T: Timer> ExchangeContext<'a, R, T> {
    /// Hand a frame to the radio, recording its origin for completion dispatch
    pub fn transmit(&mut self, origin: TxOrigin, frame: Frame, ifs: Option<Ts>) -> Result<(), CoreError<R::Error>> {
        trace!("Transmit {:?} for {:?} at {} us (ifs: {:?})", frame.kind, origin, self.now, ifs);

        self.radio.transmit_frame(frame, ifs).map_err(CoreError::Radio)?;
        self.pending_tx.push_back(origin);

        Ok(())
    }
}

/// Frame within an exchange a result refers to
#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum FrameRole {
    Rts,
    Data,
}

/// Exchange completion status
#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum ExchangeStatus {
    InProgress,
    Succeeded,
    Failed,
}

/// Outcome of feeding an event to an exchange
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExchangeResult {
    /// Event was not relevant to the exchange
    Ignored,
    /// Exchange advanced and is waiting on the radio or a reply
    InProgress,
    /// Reply to the given frame accepted, exchange continues
    Accepted(FrameRole),
    /// Reply to the given frame did not arrive in time, the exchange
    /// resumes on the next channel grant
    Timeout(FrameRole),
    /// Exchange terminated
    Finished(ExchangeStatus),
}

/// Operation issued by a step
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Transmit a frame, the next step runs on completion
    Transmit { frame: Frame, ifs: Option<Ts> },
    /// Wait for a reply to be completely received
    ExpectFullReply(Ts),
    /// Wait for the start of a reply reception
    ExpectReplyRxStart(Ts),
    /// Continue at another step
    Goto(usize),
    Fail,
    Succeed,
}

/// Script for a step-based exchange
pub trait StepSequence {
    fn name(&self) -> &'static str;

    /// Exactly one operation per step
    fn do_step(&mut self, step: usize, params: &MacParameters) -> Operation;

    /// Classify a frame received while waiting in `step`, returning the
    /// acknowledged frame if accepted as the expected reply
    fn process_reply(&mut self, step: usize, frame: &Frame) -> Option<FrameRole>;

    /// Handle a reply timeout in `step`, returning the failed frame and
    /// the step to resume at on the next channel grant
    fn process_timeout(&mut self, step: usize) -> (FrameRole, usize);

    fn data_frame(&self) -> &Frame;

    /// First frame transmitted (RTS where used)
    fn first_frame(&self) -> &Frame;

    fn frame(&self, role: FrameRole) -> &Frame;
}

/// Operation the engine is blocked on
#[derive(Debug, Clone, Copy, PartialEq, Display)]
enum Pending {
    None,
    Transmit,
    FullReply,
    ReplyRxStart,
}

/// Generic engine driving a [`StepSequence`]
#[derive(Debug, Clone, PartialEq)]
pub struct StepExchange<S> {
    ac: AccessCategory,
    sequence: S,

    step: usize,
    next_step: Option<usize>,

    pending: Pending,
    timer_armed: bool,

    status: ExchangeStatus,
}

impl <S: StepSequence> StepExchange<S> {
    pub fn new(ac: AccessCategory, sequence: S) -> Self {
        Self {
            ac,
            sequence,
            step: 0,
            next_step: Some(0),
            pending: Pending::None,
            timer_armed: false,
            status: ExchangeStatus::InProgress,
        }
    }

    pub fn sequence(&self) -> &S {
        &self.sequence
    }

    pub fn status(&self) -> ExchangeStatus {
        self.status
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Run steps until the exchange blocks or terminates
    fn proceed<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        if self.status != ExchangeStatus::InProgress {
            panic!("{} {} exchange continued after finishing ({})", self.ac, self.sequence.name(), self.status);
        }

        loop {
            self.step = match self.next_step.take() {
                Some(s) => s,
                None => self.step + 1,
            };
            self.pending = Pending::None;

            let op = self.sequence.do_step(self.step, ctx.params);

            trace!("{} {} step {}: {:?}", self.ac, self.sequence.name(), self.step, op);

            match op {
                Operation::Transmit { frame, ifs } => {
                    self.pending = Pending::Transmit;
                    ctx.transmit(TxOrigin::Exchange(self.ac), frame, ifs)?;
                    return Ok(ExchangeResult::InProgress);
                },
                Operation::ExpectFullReply(timeout) => {
                    self.arm(ctx, timeout);
                    self.pending = Pending::FullReply;
                    return Ok(ExchangeResult::InProgress);
                },
                Operation::ExpectReplyRxStart(timeout) => {
                    self.arm(ctx, timeout);
                    self.pending = Pending::ReplyRxStart;
                    return Ok(ExchangeResult::InProgress);
                },
                Operation::Goto(step) => {
                    self.next_step = Some(step);
                },
                Operation::Succeed => {
                    debug!("{} {} exchange succeeded", self.ac, self.sequence.name());
                    self.status = ExchangeStatus::Succeeded;
                    return Ok(ExchangeResult::Finished(self.status));
                },
                Operation::Fail => {
                    debug!("{} {} exchange failed", self.ac, self.sequence.name());
                    self.status = ExchangeStatus::Failed;
                    return Ok(ExchangeResult::Finished(self.status));
                },
            }
        }
    }

    fn arm<R, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>, timeout: Ts) {
        ctx.timer.schedule(ctx.now + timeout, TimerEvent::ReplyTimeout(self.ac));
        self.timer_armed = true;
    }

    fn disarm<R, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) {
        if self.timer_armed {
            ctx.timer.cancel(TimerEvent::ReplyTimeout(self.ac));
            self.timer_armed = false;
        }
    }

    fn timeout(&mut self) -> ExchangeResult {
        let (role, resume) = self.sequence.process_timeout(self.step);

        debug!("{} {} reply timeout in step {}, {} failed", self.ac, self.sequence.name(), self.step, role);

        self.pending = Pending::None;
        self.timer_armed = false;
        self.next_step = Some(resume);

        ExchangeResult::Timeout(role)
    }

    pub fn start<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        debug!("{} starting {} exchange for {}", self.ac, self.sequence.name(), self.sequence.data_frame().receiver);
        self.proceed(ctx)
    }

    /// Resume after a transmission completes or after a reply timeout once
    /// the channel has been granted again
    pub fn continue_exchange<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        match self.pending {
            Pending::Transmit | Pending::None => self.proceed(ctx),
            _ => panic!("{} {} exchange continued while waiting for a reply in step {}", self.ac, self.sequence.name(), self.step),
        }
    }

    pub fn abort<T: Timer>(&mut self, timer: &mut T) {
        debug!("{} aborting {} exchange in step {}", self.ac, self.sequence.name(), self.step);

        if self.timer_armed {
            timer.cancel(TimerEvent::ReplyTimeout(self.ac));
            self.timer_armed = false;
        }

        self.pending = Pending::None;
        self.status = ExchangeStatus::Failed;
    }

    pub fn lower_frame_received<R: Radio, T: Timer>(&mut self, frame: &Frame, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        match self.pending {
            Pending::FullReply | Pending::ReplyRxStart => (),
            _ => return Ok(ExchangeResult::Ignored),
        }

        match self.sequence.process_reply(self.step, frame) {
            Some(role) => {
                trace!("{} {} accepted {:?} in step {}", self.ac, self.sequence.name(), frame.kind, self.step);

                self.disarm(ctx);

                match self.proceed(ctx)? {
                    ExchangeResult::Finished(s) => Ok(ExchangeResult::Finished(s)),
                    _ => Ok(ExchangeResult::Accepted(role)),
                }
            },
            // The timer expired during this reception and the frame was not the reply
            None if self.pending == Pending::ReplyRxStart && !self.timer_armed => {
                Ok(self.timeout())
            },
            None => Ok(ExchangeResult::Ignored),
        }
    }

    /// A corrupted or foreign frame was received
    pub fn corrupted_or_not_for_us(&mut self) -> ExchangeResult {
        match self.pending {
            Pending::ReplyRxStart if !self.timer_armed => self.timeout(),
            _ => ExchangeResult::Ignored,
        }
    }

    /// The reply timer fired
    pub fn reply_timeout<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> ExchangeResult {
        self.timer_armed = false;

        match self.pending {
            Pending::FullReply => self.timeout(),
            Pending::ReplyRxStart if ctx.radio.is_reception_in_progress() => {
                trace!("{} {} reply timer expired during reception, waiting for frame", self.ac, self.sequence.name());
                ExchangeResult::Ignored
            },
            Pending::ReplyRxStart => self.timeout(),
            _ => {
                warn!("{} {} reply timer expired in step {} while not waiting", self.ac, self.sequence.name(), self.step);
                ExchangeResult::Ignored
            },
        }
    }
}

/// DATA followed by ACK
#[derive(Debug, Clone, PartialEq)]
pub struct SendDataWithAck {
    data: Frame,
}

impl SendDataWithAck {
    pub fn new(mut data: Frame, params: &MacParameters) -> Self {
        data.duration = params.sifs_time + params.ack_duration();
        Self { data }
    }
}

impl StepSequence for SendDataWithAck {
    fn name(&self) -> &'static str {
        "DATA/ACK"
    }

    fn do_step(&mut self, step: usize, params: &MacParameters) -> Operation {
        match step {
            0 => Operation::Transmit { frame: self.data.clone(), ifs: None },
            1 if params.use_full_ack_timeout => Operation::ExpectFullReply(params.ack_full_timeout()),
            1 => Operation::ExpectReplyRxStart(params.ack_early_timeout()),
            2 => Operation::Succeed,
            _ => panic!("{} invalid step {}", self.name(), step),
        }
    }

    fn process_reply(&mut self, step: usize, frame: &Frame) -> Option<FrameRole> {
        match step {
            1 if frame.is_ack() => Some(FrameRole::Data),
            1 => None,
            _ => panic!("{} unexpected reply in step {}", self.name(), step),
        }
    }

    fn process_timeout(&mut self, step: usize) -> (FrameRole, usize) {
        match step {
            1 => {
                self.data.set_retry(true);
                (FrameRole::Data, 0)
            },
            _ => panic!("{} unexpected timeout in step {}", self.name(), step),
        }
    }

    fn data_frame(&self) -> &Frame {
        &self.data
    }

    fn first_frame(&self) -> &Frame {
        &self.data
    }

    fn frame(&self, _role: FrameRole) -> &Frame {
        &self.data
    }
}

/// RTS, CTS, DATA then ACK
#[derive(Debug, Clone, PartialEq)]
pub struct SendDataWithRtsCts {
    rts: Frame,
    data: Frame,
}

impl SendDataWithRtsCts {
    pub fn new(mut data: Frame, params: &MacParameters) -> Self {
        let sifs = params.sifs_time;
        let ack = params.ack_duration();

        data.duration = sifs + ack;

        let data_airtime = data.duration_in(&params.reference_mode);
        let rts = Frame::rts(&data, 3 * sifs + params.cts_duration() + data_airtime + ack);

        Self { rts, data }
    }
}

impl StepSequence for SendDataWithRtsCts {
    fn name(&self) -> &'static str {
        "RTS/CTS/DATA/ACK"
    }

    fn do_step(&mut self, step: usize, params: &MacParameters) -> Operation {
        match step {
            0 => Operation::Transmit { frame: self.rts.clone(), ifs: None },
            1 => Operation::ExpectReplyRxStart(params.cts_early_timeout()),
            2 => Operation::Transmit { frame: self.data.clone(), ifs: Some(params.sifs_time) },
            3 if params.use_full_ack_timeout => Operation::ExpectFullReply(params.ack_full_timeout()),
            3 => Operation::ExpectReplyRxStart(params.ack_early_timeout()),
            4 => Operation::Succeed,
            _ => panic!("{} invalid step {}", self.name(), step),
        }
    }

    fn process_reply(&mut self, step: usize, frame: &Frame) -> Option<FrameRole> {
        match step {
            1 if frame.is_cts() => Some(FrameRole::Rts),
            3 if frame.is_ack() => Some(FrameRole::Data),
            1 | 3 => None,
            _ => panic!("{} unexpected reply in step {}", self.name(), step),
        }
    }

    fn process_timeout(&mut self, step: usize) -> (FrameRole, usize) {
        match step {
            1 => (FrameRole::Rts, 0),
            3 => {
                self.data.set_retry(true);
                (FrameRole::Data, 0)
            },
            _ => panic!("{} unexpected timeout in step {}", self.name(), step),
        }
    }

    fn data_frame(&self) -> &Frame {
        &self.data
    }

    fn first_frame(&self) -> &Frame {
        &self.rts
    }

    fn frame(&self, role: FrameRole) -> &Frame {
        match role {
            FrameRole::Rts => &self.rts,
            FrameRole::Data => &self.data,
        }
    }
}

/// Single unacknowledged group addressed transmission
#[derive(Debug, Clone, PartialEq)]
pub struct MulticastExchange {
    ac: AccessCategory,
    data: Frame,
    status: ExchangeStatus,
    transmitting: bool,
}

impl MulticastExchange {
    pub fn new(ac: AccessCategory, mut data: Frame) -> Self {
        data.duration = 0;
        Self { ac, data, status: ExchangeStatus::InProgress, transmitting: false }
    }

    pub fn start<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        debug!("{} starting multicast exchange for {}", self.ac, self.data.receiver);

        ctx.transmit(TxOrigin::Exchange(self.ac), self.data.clone(), None)?;
        self.transmitting = true;

        Ok(ExchangeResult::InProgress)
    }

    pub fn transmission_complete(&mut self) -> ExchangeResult {
        if !self.transmitting {
            panic!("{} multicast exchange completed without transmitting", self.ac);
        }

        self.transmitting = false;
        self.status = ExchangeStatus::Succeeded;

        ExchangeResult::Finished(self.status)
    }

    pub fn data_frame(&self) -> &Frame {
        &self.data
    }
}

/// Active frame exchange for an access category
#[derive(Debug, Clone, PartialEq)]
pub enum FrameExchange {
    DataWithAck(StepExchange<SendDataWithAck>),
    RtsCts(StepExchange<SendDataWithRtsCts>),
    Multicast(MulticastExchange),
}

impl FrameExchange {
    /// Select the exchange for a frame: group addressed frames are sent
    /// without acknowledgement, frames above the RTS threshold are
    /// protected by RTS/CTS
    pub fn new(ac: AccessCategory, frame: Frame, params: &MacParameters) -> Self {
        if frame.is_broadcast_or_multicast() {
            FrameExchange::Multicast(MulticastExchange::new(ac, frame))
        } else if frame.byte_len() > params.rts_threshold {
            FrameExchange::RtsCts(StepExchange::new(ac, SendDataWithRtsCts::new(frame, params)))
        } else {
            FrameExchange::DataWithAck(StepExchange::new(ac, SendDataWithAck::new(frame, params)))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameExchange::DataWithAck(x) => x.sequence().name(),
            FrameExchange::RtsCts(x) => x.sequence().name(),
            FrameExchange::Multicast(_) => "MULTICAST",
        }
    }

    pub fn start<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        match self {
            FrameExchange::DataWithAck(x) => x.start(ctx),
            FrameExchange::RtsCts(x) => x.start(ctx),
            FrameExchange::Multicast(x) => x.start(ctx),
        }
    }

    /// Channel granted again following a reply timeout
    pub fn continue_exchange<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        match self {
            FrameExchange::DataWithAck(x) => x.continue_exchange(ctx),
            FrameExchange::RtsCts(x) => x.continue_exchange(ctx),
            FrameExchange::Multicast(_) => panic!("Multicast frame exchange cannot be continued"),
        }
    }

    pub fn transmission_complete<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        match self {
            FrameExchange::DataWithAck(x) => x.continue_exchange(ctx),
            FrameExchange::RtsCts(x) => x.continue_exchange(ctx),
            FrameExchange::Multicast(x) => Ok(x.transmission_complete()),
        }
    }

    pub fn abort<T: Timer>(&mut self, timer: &mut T) {
        match self {
            FrameExchange::DataWithAck(x) => x.abort(timer),
            FrameExchange::RtsCts(x) => x.abort(timer),
            FrameExchange::Multicast(_) => panic!("Multicast frame exchange cannot be aborted"),
        }
    }

    pub fn lower_frame_received<R: Radio, T: Timer>(&mut self, frame: &Frame, ctx: &mut ExchangeContext<R, T>) -> Result<ExchangeResult, CoreError<R::Error>> {
        match self {
            FrameExchange::DataWithAck(x) => x.lower_frame_received(frame, ctx),
            FrameExchange::RtsCts(x) => x.lower_frame_received(frame, ctx),
            FrameExchange::Multicast(_) => Ok(ExchangeResult::Ignored),
        }
    }

    pub fn corrupted_or_not_for_us(&mut self) -> ExchangeResult {
        match self {
            FrameExchange::DataWithAck(x) => x.corrupted_or_not_for_us(),
            FrameExchange::RtsCts(x) => x.corrupted_or_not_for_us(),
            FrameExchange::Multicast(_) => ExchangeResult::Ignored,
        }
    }

    pub fn reply_timeout<R: Radio, T: Timer>(&mut self, ctx: &mut ExchangeContext<R, T>) -> ExchangeResult {
        match self {
            FrameExchange::DataWithAck(x) => x.reply_timeout(ctx),
            FrameExchange::RtsCts(x) => x.reply_timeout(ctx),
            FrameExchange::Multicast(_) => panic!("Multicast frame exchange does not expect replies"),
        }
    }

    pub fn data_frame(&self) -> &Frame {
        match self {
            FrameExchange::DataWithAck(x) => x.sequence().data_frame(),
            FrameExchange::RtsCts(x) => x.sequence().data_frame(),
            FrameExchange::Multicast(x) => x.data_frame(),
        }
    }

    pub fn first_frame(&self) -> &Frame {
        match self {
            FrameExchange::DataWithAck(x) => x.sequence().first_frame(),
            FrameExchange::RtsCts(x) => x.sequence().first_frame(),
            FrameExchange::Multicast(x) => x.data_frame(),
        }
    }

    pub fn frame(&self, role: FrameRole) -> &Frame {
        match self {
            FrameExchange::DataWithAck(x) => x.sequence().frame(role),
            FrameExchange::RtsCts(x) => x.sequence().frame(role),
            FrameExchange::Multicast(x) => x.data_frame(),
        }
    }
}
