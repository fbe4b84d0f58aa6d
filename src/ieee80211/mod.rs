//! IEEE 802.11 Upper MAC
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

use alloc::collections::VecDeque;

use log::{trace, debug, warn};
use rand_core::RngCore;

use crate::{Radio, error::CoreError, timer::{Timer, TimerEvent}};

pub mod access_category;
pub use access_category::AccessCategory;

pub mod frame;
pub use frame::{Frame, FrameFlags, FrameKind, MacAddress};

pub mod phy;
pub use phy::PhyMode;

pub mod config;
pub use config::{AcConfig, AcParameters, Config, MacParameters};

pub mod contention;
pub use contention::{CollisionController, Contention, ContentionState};

pub mod retry;
pub use retry::RetryHandler;

pub mod queue;
pub use queue::TransmissionQueue;

pub mod services;
pub use services::Services;

pub mod exchange;
pub use exchange::{ExchangeContext, ExchangeResult, ExchangeStatus, FrameExchange, FrameRole, TxOrigin};

pub mod coordinator;
pub use coordinator::{AcResources, FrameExchangeCoordinator};

pub mod responder;

/// State owned per access category
#[derive(Debug, Clone, PartialEq)]
pub struct AcData {
    pub ac: AccessCategory,
    pub queue: TransmissionQueue,
    pub contention: Contention,
    pub coordinator: FrameExchangeCoordinator,
}

/// Upper MAC for a single station.
/// Generic over a Radio (R), Timer (T) and random source (G)
///
/// All inputs are event driven: upper layer frames, received and corrupted
/// frames, carrier sense changes, transmission completions and timer
/// expiries. Frames for the upper layer are collected with [`UpperMac::receive`].
pub struct UpperMac<R, T, G> {
    params: MacParameters,

    radio: R,
    timer: T,
    rng: G,

    services: Services,

    acs: heapless::Vec<AcData, 4>,
    collision: CollisionController,

    /// Carrier sense as reported by the PHY
    medium_free: bool,

    /// Transmissions handed to the radio and not yet completed
    pending_tx: VecDeque<TxOrigin>,

    /// RX buffer for frames delivered to the upper layer
    rx_buff: VecDeque<Frame>,
}

impl <R, T, G> UpperMac<R, T, G>
where
    R: Radio,
    T: Timer,
    G: RngCore,
{
    /// Create a new MAC using the provided radio, timer and services
    pub fn new(config: Config, services: Services, radio: R, timer: T, rng: G) -> Self {
        let params = MacParameters::new(&config, &services.rate_selection.slowest_mandatory_mode());

        let mut acs = heapless::Vec::new();
        for ac in params.categories() {
            let _ = acs.push(AcData {
                ac: *ac,
                queue: TransmissionQueue::new(*ac, params.max_queue_size, params.prioritize_multicast),
                contention: Contention::new(*ac, params.ac(*ac).eifs),
                coordinator: FrameExchangeCoordinator::new(*ac, RetryHandler::new(&params, *ac)),
            });
        }

        debug!("Upper MAC {} starting ({} access categories)", params.address, acs.len());

        Self {
            params,
            radio,
            timer,
            rng,
            services,
            acs,
            collision: CollisionController::new(),
            medium_free: true,
            pending_tx: VecDeque::new(),
            rx_buff: VecDeque::new(),
        }
    }

    pub fn params(&self) -> &MacParameters {
        &self.params
    }

    /// Access category for an outgoing frame.
    ///
    /// A QoS traffic identifier outside 0..=7 is a caller error and is
    /// returned as [`CoreError::InvalidTid`] rather than aborting the station.
    pub fn classify(&self, frame: &Frame) -> Result<AccessCategory, CoreError<R::Error>> {
        if !self.params.qos {
            return Ok(AccessCategory::Legacy);
        }

        match frame.kind {
            FrameKind::Data => Ok(AccessCategory::BestEffort),
            FrameKind::QosData{ tid } => AccessCategory::from_tid(tid).ok_or(CoreError::InvalidTid(tid)),
            _ => Ok(AccessCategory::Voice),
        }
    }

    fn slot(&self, ac: AccessCategory) -> Option<usize> {
        self.acs.iter().position(|a| a.ac == ac)
    }

    /// Queue a frame from the upper layer for transmission
    pub fn upper_frame_received(&mut self, mut frame: Frame) -> Result<(), CoreError<R::Error>> {
        let ac = self.classify(&frame)?;
        let idx = match self.slot(ac) {
            Some(i) => i,
            None => {
                warn!("No queue for {}, dropping frame", ac);
                return Ok(())
            }
        };

        trace!("Upper frame for {} ({} bytes) on {}", frame.receiver, frame.byte_len(), ac);

        frame.transmitter = Some(self.params.address);

        if self.acs[idx].queue.enqueue(frame) {
            self.with_ac(idx, |c, ctx, res| c.start_contention_if_necessary(ctx, res));
        }

        self.sync_contention();

        Ok(())
    }

    fn is_for_us(&self, frame: &Frame) -> bool {
        frame.receiver == self.params.address
            || (frame.receiver.is_multicast() && frame.transmitter != Some(self.params.address))
    }

    /// Handle a frame successfully received by the PHY
    pub fn lower_frame_received(&mut self, frame: Frame) -> Result<(), CoreError<R::Error>> {
        if !self.is_for_us(&frame) {
            trace!("Dropping {:?} frame for {}", frame.kind, frame.receiver);

            for i in 0..self.acs.len() {
                self.with_ac(i, |c, ctx, res| c.corrupted_or_not_for_us(ctx, res))?;
            }
            self.sync_contention();

            return Ok(());
        }

        let mut processed: Option<AccessCategory> = None;
        for i in 0..self.acs.len() {
            if self.with_ac(i, |c, ctx, res| c.lower_frame_received(&frame, ctx, res))? {
                if let Some(other) = processed {
                    panic!("{:?} frame processed by both {} and {} frame exchanges", frame.kind, other, self.acs[i].ac);
                }
                processed = Some(self.acs[i].ac);
            }
        }

        if processed.is_none() {
            self.respond(&frame)?;
            self.deliver(frame);
        }

        self.sync_contention();

        Ok(())
    }

    /// Send the control response owed for a received frame
    fn respond(&mut self, frame: &Frame) -> Result<(), CoreError<R::Error>> {
        let response = match responder::response_for(&self.params, frame) {
            Some(r) => r,
            None => return Ok(()),
        };

        let mut ctx = ExchangeContext {
            now: self.timer.ticks_us(),
            params: &self.params,
            radio: &mut self.radio,
            timer: &mut self.timer,
            pending_tx: &mut self.pending_tx,
        };

        ctx.transmit(TxOrigin::Responder, response, Some(self.params.sifs_time))
    }

    /// Pass data and management frames on to the upper layer
    fn deliver(&mut self, frame: Frame) {
        if !frame.is_data_or_management() {
            debug!("Dropping unexpected {:?} frame from {:?}", frame.kind, frame.transmitter);
            return;
        }

        if self.services.duplicate_detector.is_duplicate(&frame) {
            debug!("Dropping duplicate frame {} from {:?}", frame.sequence, frame.transmitter);
            return;
        }

        if frame.is_amsdu() {
            match &mut self.services.aggregation {
                Some(a) => self.rx_buff.extend(a.explode_aggregate_frame(frame)),
                None => warn!("Dropping A-MSDU from {:?}, aggregation disabled", frame.transmitter),
            }
        } else if frame.is_fragment() {
            if let Some(f) = self.services.reassembly.add_fragment(frame) {
                self.rx_buff.push_back(f);
            }
        } else {
            self.rx_buff.push_back(frame);
        }
    }

    /// Handle a reception that failed its FCS check
    pub fn corrupted_frame_received(&mut self) -> Result<(), CoreError<R::Error>> {
        let now = self.timer.ticks_us();

        debug!("Corrupted frame received at {} us", now);

        for a in self.acs.iter_mut() {
            a.contention.corrupted_frame_received(now);
        }

        for i in 0..self.acs.len() {
            self.with_ac(i, |c, ctx, res| c.corrupted_or_not_for_us(ctx, res))?;
        }

        self.sync_contention();

        Ok(())
    }

    /// Update physical carrier sense
    pub fn medium_state_changed(&mut self, free: bool) -> Result<(), CoreError<R::Error>> {
        trace!("Medium {} at {} us", if free { "free" } else { "busy" }, self.timer.ticks_us());

        self.medium_free = free;
        self.sync_contention();

        Ok(())
    }

    /// The radio finished the oldest pending transmission
    pub fn transmission_complete(&mut self) -> Result<(), CoreError<R::Error>> {
        match self.pending_tx.pop_front() {
            Some(TxOrigin::Exchange(ac)) => {
                if let Some(idx) = self.slot(ac) {
                    self.with_ac(idx, |c, ctx, res| c.transmission_complete(ctx, res))?;
                }
            },
            Some(TxOrigin::Responder) => {
                trace!("Response transmission complete");
            },
            None => {
                warn!("Transmission complete with no pending transmission");
            },
        }

        self.sync_contention();

        Ok(())
    }

    /// Dispatch a timer expiry
    pub fn handle_timer(&mut self, event: TimerEvent) -> Result<(), CoreError<R::Error>> {
        let now = self.timer.ticks_us();

        match event {
            TimerEvent::Contention => {
                self.collision.expired();

                let a = self.collision.arbitrate(now, self.acs.iter()
                    .map(|a| (a.ac, a.contention.scheduled_transmission())));

                if let Some(idx) = a.granted.and_then(|ac| self.slot(ac)) {
                    self.acs[idx].contention.transmission_granted();
                    self.with_ac(idx, |c, ctx, res| c.channel_access_granted(ctx, res))?;
                }

                for ac in a.collided.iter() {
                    if let Some(idx) = self.slot(*ac) {
                        self.acs[idx].contention.internal_collision();
                        self.with_ac(idx, |c, ctx, res| c.internal_collision(ctx, res))?;
                    }
                }
            },
            TimerEvent::ReplyTimeout(ac) => match self.slot(ac) {
                Some(idx) => self.with_ac(idx, |c, ctx, res| c.reply_timeout(ctx, res))?,
                None => warn!("Reply timeout for unknown {}", ac),
            },
        }

        self.sync_contention();

        Ok(())
    }

    /// Fetch a frame delivered to the upper layer
    pub fn receive(&mut self) -> Option<Frame> {
        self.rx_buff.pop_front()
    }

    pub fn queue_len(&self, ac: AccessCategory) -> usize {
        self.slot(ac).map(|i| self.acs[i].queue.len()).unwrap_or(0)
    }

    pub fn contention_state(&self, ac: AccessCategory) -> Option<ContentionState> {
        self.slot(ac).map(|i| self.acs[i].contention.state())
    }

    pub fn retry(&self, ac: AccessCategory) -> Option<&RetryHandler> {
        self.slot(ac).map(|i| self.acs[i].coordinator.retry())
    }

    pub fn exchange(&self, ac: AccessCategory) -> Option<&FrameExchange> {
        self.slot(ac).and_then(|i| self.acs[i].coordinator.exchange())
    }

    /// Category currently owning the channel
    pub fn owner(&self) -> Option<AccessCategory> {
        self.acs.iter().find(|a| a.contention.is_owning()).map(|a| a.ac)
    }

    /// Run a coordinator operation with the station resources it needs
    fn with_ac<F, X>(&mut self, idx: usize, f: F) -> X
    where
        F: FnOnce(&mut FrameExchangeCoordinator, &mut ExchangeContext<R, T>, &mut AcResources<G>) -> X,
    {
        let now = self.timer.ticks_us();
        let a = &mut self.acs[idx];

        let mut ctx = ExchangeContext {
            now,
            params: &self.params,
            radio: &mut self.radio,
            timer: &mut self.timer,
            pending_tx: &mut self.pending_tx,
        };
        let mut res = AcResources {
            queue: &mut a.queue,
            contention: &mut a.contention,
            rng: &mut self.rng,
            services: &mut self.services,
        };

        f(&mut a.coordinator, &mut ctx, &mut res)
    }

    /// Propagate carrier sense to the contention engines and rearm the
    /// contention timer.
    ///
    /// While one category owns the channel the others see it as busy.
    fn sync_contention(&mut self) {
        let now = self.timer.ticks_us();

        debug_assert!(self.acs.iter().filter(|a| a.contention.is_owning()).count() <= 1,
            "more than one access category owns the channel");

        let owner = self.acs.iter().position(|a| a.contention.is_owning());

        for (i, a) in self.acs.iter_mut().enumerate() {
            let free = self.medium_free && owner.map_or(true, |o| o == i);
            a.contention.medium_state_changed(now, free);
        }

        let next = self.acs.iter()
            .filter_map(|a| a.contention.scheduled_transmission())
            .min();

        self.collision.rearm(&mut self.timer, next);
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use bytes::Bytes;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use super::services::{BasicMsduAggregation, MsduAggregation};
    use crate::radio::mock::MockRadio;
    use crate::timer::mock::MockTimer;

    type Mac = UpperMac<MockRadio, MockTimer, StdRng>;

    const LOCAL: u64 = 1;
    const PEER: u64 = 2;

    fn setup(config: Config) -> (Mac, MockRadio, MockTimer) {
        setup_with(config, Services::default())
    }

    fn setup_with(config: Config, services: Services) -> (Mac, MockRadio, MockTimer) {
        let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

        let radio = MockRadio::new();
        let timer = MockTimer::new();

        let config = Config {
            address: MacAddress::from_u64(LOCAL),
            ..config
        };

        let mac = UpperMac::new(config, services, radio.clone(), timer.clone(), StdRng::seed_from_u64(1));

        (mac, radio, timer)
    }

    fn data(len: usize) -> Frame {
        Frame::data(MacAddress::from_u64(PEER), MacAddress::from_u64(LOCAL), Bytes::from(std::vec![0u8; len]))
    }

    fn qos(tid: u8) -> Frame {
        Frame::qos_data(MacAddress::from_u64(PEER), MacAddress::from_u64(LOCAL), tid, Bytes::from_static(b"qos"))
    }

    /// Fire the next timer, returning the event
    fn fire(mac: &mut Mac, timer: &mut MockTimer) -> TimerEvent {
        let e = timer.fire_next().expect("no pending timer");
        mac.handle_timer(e).unwrap();
        e
    }

    #[test]
    fn classification() {
        let (mut mac, _radio, _timer) = setup(Config::default());

        assert_eq!(mac.classify(&data(10)), Ok(AccessCategory::BestEffort));
        assert_eq!(mac.classify(&qos(6)), Ok(AccessCategory::Voice));
        assert_eq!(mac.classify(&qos(1)), Ok(AccessCategory::Background));
        assert_eq!(mac.classify(&qos(4)), Ok(AccessCategory::Video));

        let m = Frame::management(MacAddress::from_u64(PEER), MacAddress::from_u64(LOCAL), Bytes::new());
        assert_eq!(mac.classify(&m), Ok(AccessCategory::Voice));

        assert_eq!(mac.upper_frame_received(qos(8)), Err(CoreError::InvalidTid(8)));

        let (mac, _radio, _timer) = setup(Config { qos: false, ..Default::default() });
        assert_eq!(mac.classify(&qos(6)), Ok(AccessCategory::Legacy));
    }

    #[test]
    fn queue_overflow_drops_data() {
        let (mut mac, radio, _timer) = setup(Config { max_queue_size: 2, ..Default::default() });

        mac.medium_state_changed(false).unwrap();

        for _ in 0..3 {
            mac.upper_frame_received(data(10)).unwrap();
        }
        assert_eq!(mac.queue_len(AccessCategory::BestEffort), 2);
        assert_eq!(mac.contention_state(AccessCategory::BestEffort), Some(ContentionState::Defer));

        // Management frames are never dropped
        let m = Frame::management(MacAddress::from_u64(PEER), MacAddress::from_u64(LOCAL), Bytes::new());
        mac.upper_frame_received(m.clone()).unwrap();
        mac.upper_frame_received(m.clone()).unwrap();
        mac.upper_frame_received(m).unwrap();
        assert_eq!(mac.queue_len(AccessCategory::Voice), 3);

        assert_eq!(radio.count(), 0);
    }

    #[test]
    fn data_ack_success() {
        let (mut mac, mut radio, mut timer) = setup(Config::default());

        mac.upper_frame_received(data(100)).unwrap();
        assert_eq!(mac.contention_state(AccessCategory::BestEffort), Some(ContentionState::WaitingBackoff));

        assert_eq!(fire(&mut mac, &mut timer), TimerEvent::Contention);
        assert_eq!(mac.owner(), Some(AccessCategory::BestEffort));

        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.transmitter, Some(MacAddress::from_u64(LOCAL)));

        mac.transmission_complete().unwrap();
        assert!(timer.pending(TimerEvent::ReplyTimeout(AccessCategory::BestEffort)).is_some());

        timer.inc(30);
        let ack = Frame::ack(&sent[0].0, 0);
        mac.lower_frame_received(ack.clone()).unwrap();

        assert_eq!(mac.owner(), None);
        assert_eq!(mac.contention_state(AccessCategory::BestEffort), Some(ContentionState::Idle));
        assert!(mac.exchange(AccessCategory::BestEffort).is_none());
        assert_eq!(timer.next(), None);

        // A repeated ACK is ignored and not answered
        mac.lower_frame_received(ack).unwrap();
        assert_eq!(radio.count(), 0);
        assert_eq!(mac.receive(), None);
    }

    #[test]
    fn timeout_retransmits_with_retry_flag() {
        let (mut mac, mut radio, mut timer) = setup(Config::default());

        mac.upper_frame_received(data(100)).unwrap();
        fire(&mut mac, &mut timer);
        assert!(!radio.take()[0].0.is_retry());
        mac.transmission_complete().unwrap();

        assert_eq!(fire(&mut mac, &mut timer), TimerEvent::ReplyTimeout(AccessCategory::BestEffort));

        let retry = mac.retry(AccessCategory::BestEffort).unwrap();
        assert_eq!(retry.short_retry_count(), 1);
        assert_eq!(retry.cw(), 31);
        assert_eq!(mac.owner(), None);

        assert_eq!(fire(&mut mac, &mut timer), TimerEvent::Contention);
        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_retry());
        assert_eq!(sent[0].0.sequence, 0);
    }

    #[test]
    fn rts_cts_timeouts() {
        let (mut mac, mut radio, mut timer) = setup(Config { rts_threshold: 200, ..Default::default() });
        let be = AccessCategory::BestEffort;

        mac.upper_frame_received(data(500)).unwrap();
        fire(&mut mac, &mut timer);
        let rts = radio.take().remove(0).0;
        assert!(rts.is_rts());
        mac.transmission_complete().unwrap();

        // Missing CTS counts against the short limit
        assert_eq!(fire(&mut mac, &mut timer), TimerEvent::ReplyTimeout(be));
        assert_eq!(mac.retry(be).unwrap().short_retry_count(), 1);
        assert_eq!(mac.retry(be).unwrap().long_retry_count(), 0);

        fire(&mut mac, &mut timer);
        let rts = radio.take().remove(0).0;
        assert!(rts.is_rts());
        mac.transmission_complete().unwrap();

        mac.lower_frame_received(Frame::cts(&rts, 0)).unwrap();
        let sent = radio.take();
        assert!(sent[0].0.is_data());
        assert_eq!(sent[0].1, Some(16));
        mac.transmission_complete().unwrap();

        // Missing ACK counts against the long limit
        assert_eq!(fire(&mut mac, &mut timer), TimerEvent::ReplyTimeout(be));
        assert_eq!(mac.retry(be).unwrap().long_retry_count(), 1);

        // Retransmission restarts with the RTS, data now flagged as retry
        fire(&mut mac, &mut timer);
        assert!(radio.take()[0].0.is_rts());
        match mac.exchange(be) {
            Some(x) => assert!(x.data_frame().is_retry()),
            None => panic!("exchange dropped"),
        }
    }

    #[test]
    fn internal_collision_and_sibling_freeze() {
        let mut config = Config::default();
        for i in [1, 3] {
            config.ac[i].aifsn = Some(2);
            config.ac[i].cw_min = Some(0);
            config.ac[i].cw_max = Some(0);
        }
        let (mut mac, mut radio, mut timer) = setup(config);

        mac.upper_frame_received(data(100)).unwrap();
        mac.upper_frame_received(qos(7)).unwrap();

        assert_eq!(fire(&mut mac, &mut timer), TimerEvent::Contention);

        // Voice wins, best effort collides internally and is frozen
        assert_eq!(mac.owner(), Some(AccessCategory::Voice));
        assert_eq!(mac.retry(AccessCategory::BestEffort).unwrap().short_retry_count(), 1);
        assert_eq!(mac.contention_state(AccessCategory::BestEffort), Some(ContentionState::Defer));
        assert_eq!(mac.queue_len(AccessCategory::BestEffort), 1);

        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.tid(), Some(7));

        mac.transmission_complete().unwrap();
        mac.lower_frame_received(Frame::ack(&sent[0].0, 0)).unwrap();

        // Released, best effort resumes
        assert_eq!(mac.owner(), None);
        assert_eq!(mac.contention_state(AccessCategory::BestEffort), Some(ContentionState::WaitingBackoff));

        fire(&mut mac, &mut timer);
        assert_eq!(mac.owner(), Some(AccessCategory::BestEffort));
        assert_eq!(radio.take()[0].0.kind, FrameKind::Data);
    }

    #[test]
    fn busy_medium_defers_access() {
        let (mut mac, radio, mut timer) = setup(Config { qos: false, ..Default::default() });

        mac.medium_state_changed(false).unwrap();
        mac.upper_frame_received(data(10)).unwrap();
        assert_eq!(mac.contention_state(AccessCategory::Legacy), Some(ContentionState::Defer));
        assert_eq!(timer.next(), None);

        timer.inc(1000);
        mac.medium_state_changed(true).unwrap();
        let at = timer.pending(TimerEvent::Contention).unwrap();
        assert!(at >= 1000 + mac.params().ac(AccessCategory::Legacy).aifs);

        fire(&mut mac, &mut timer);
        assert_eq!(radio.count(), 1);
    }

    #[test]
    fn receive_acknowledges_and_filters_duplicates() {
        let (mut mac, mut radio, timer) = setup(Config::default());

        let mut d = Frame::data(MacAddress::from_u64(LOCAL), MacAddress::from_u64(PEER), Bytes::from_static(b"hello"));
        d.sequence = 5;
        d.duration = 16 + 44;

        mac.lower_frame_received(d.clone()).unwrap();

        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_ack());
        assert_eq!(sent[0].0.receiver, MacAddress::from_u64(PEER));
        assert_eq!(sent[0].1, Some(16));
        mac.transmission_complete().unwrap();

        assert_eq!(mac.receive().map(|f| f.payload().clone()), Some(Bytes::from_static(b"hello")));

        // Retransmission after a lost ACK is acknowledged again but not delivered
        d.set_retry(true);
        mac.lower_frame_received(d).unwrap();
        assert!(radio.take()[0].0.is_ack());
        mac.transmission_complete().unwrap();
        assert_eq!(mac.receive(), None);

        // Frames for other stations are neither answered nor delivered
        let other = Frame::data(MacAddress::from_u64(3), MacAddress::from_u64(PEER), Bytes::new());
        mac.lower_frame_received(other).unwrap();
        assert_eq!(radio.count(), 0);
        assert_eq!(mac.receive(), None);

        // RTS is answered with CTS
        let rts = Frame::rts(&Frame::data(MacAddress::from_u64(LOCAL), MacAddress::from_u64(PEER), Bytes::new()), 300);
        mac.lower_frame_received(rts).unwrap();
        let sent = radio.take();
        assert!(sent[0].0.is_cts());
        assert_eq!(sent[0].0.duration, 300 - 16 - 44);

        assert_eq!(timer.next(), None);
    }

    #[test]
    fn aggregated_frames_share_one_exchange() {
        let services = Services::default().with_aggregation(BasicMsduAggregation::default());
        let (mut mac, mut radio, mut timer) = setup_with(Config::default(), services);
        let be = AccessCategory::BestEffort;

        for _ in 0..3 {
            mac.upper_frame_received(qos(0)).unwrap();
        }
        assert_eq!(mac.queue_len(be), 3);

        assert_eq!(fire(&mut mac, &mut timer), TimerEvent::Contention);
        assert_eq!(mac.queue_len(be), 0);

        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        let amsdu = &sent[0].0;
        assert!(amsdu.is_amsdu());
        assert_eq!(amsdu.tid(), Some(0));
        assert!(!amsdu.is_fragment());

        mac.transmission_complete().unwrap();
        mac.lower_frame_received(Frame::ack(amsdu, 0)).unwrap();

        assert_eq!(mac.owner(), None);
        assert!(mac.exchange(be).is_none());
        assert_eq!(mac.contention_state(be), Some(ContentionState::Idle));
        assert_eq!(radio.count(), 0);
    }

    #[test]
    fn received_aggregate_is_delivered_as_frames() {
        let services = Services::default().with_aggregation(BasicMsduAggregation::default());
        let (mut mac, mut radio, _timer) = setup_with(Config::default(), services);

        let mut agg = BasicMsduAggregation::default();
        let mut q = TransmissionQueue::new(AccessCategory::Video, 0, false);
        for body in [&b"first"[..], &b"second"[..]] {
            q.enqueue(Frame::qos_data(MacAddress::from_u64(LOCAL), MacAddress::from_u64(PEER), 5, Bytes::from_static(body)));
        }

        let mut amsdu = agg.create_aggregate_frame(&mut q).unwrap();
        amsdu.sequence = 9;
        assert!(amsdu.is_amsdu());

        mac.lower_frame_received(amsdu).unwrap();

        // Acknowledged once as a single MPDU
        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_ack());
        mac.transmission_complete().unwrap();

        let first = mac.receive().unwrap();
        assert_eq!(first.payload(), &Bytes::from_static(b"first"));
        assert_eq!(first.transmitter, Some(MacAddress::from_u64(PEER)));
        assert_eq!(first.tid(), Some(5));

        let second = mac.receive().unwrap();
        assert_eq!(second.payload(), &Bytes::from_static(b"second"));

        assert_eq!(mac.receive(), None);
    }

    #[test]
    fn multicast_is_not_acknowledged() {
        let (mut mac, mut radio, mut timer) = setup(Config::default());

        let mut f = data(50);
        f.receiver = MacAddress::BROADCAST;
        mac.upper_frame_received(f).unwrap();

        fire(&mut mac, &mut timer);
        let sent = radio.take();
        assert_eq!(sent[0].0.duration, 0);

        mac.transmission_complete().unwrap();
        assert_eq!(mac.owner(), None);
        assert_eq!(timer.next(), None);

        // Received group frames are delivered without a response
        let g = Frame::data(MacAddress::BROADCAST, MacAddress::from_u64(PEER), Bytes::from_static(b"all"));
        mac.lower_frame_received(g).unwrap();
        assert_eq!(radio.count(), 0);
        assert!(mac.receive().is_some());
    }

    #[test]
    fn corrupted_frame_extends_deferral() {
        let (mut mac, _radio, timer) = setup(Config { qos: false, ..Default::default() });

        mac.medium_state_changed(false).unwrap();
        mac.upper_frame_received(data(10)).unwrap();

        mac.corrupted_frame_received().unwrap();
        mac.medium_state_changed(true).unwrap();

        let at = timer.pending(TimerEvent::Contention).unwrap();
        assert!(at >= mac.params().ac(AccessCategory::Legacy).eifs);
    }

    /// Random interleaving of all inputs, checking the channel is owned by
    /// at most one category and every exchange belongs to its category
    #[test]
    fn random_event_interleaving() {
        let (mut mac, mut radio, mut timer) = setup(Config { rts_threshold: 300, short_retry_limit: 3, long_retry_limit: 2, ..Default::default() });
        let mut rng = StdRng::seed_from_u64(7);

        let mut outstanding = 0;
        let mut last: Vec<Frame> = Vec::new();
        let mut receiving = false;

        for _ in 0..5000 {
            match rng.gen_range(0..9) {
                0 => {
                    let len = rng.gen_range(10..600);
                    let mut f = Frame::qos_data(MacAddress::from_u64(PEER), MacAddress::from_u64(LOCAL), rng.gen_range(0..8), Bytes::from(std::vec![0u8; len]));
                    if rng.gen_bool(0.1) {
                        f.receiver = MacAddress::BROADCAST;
                    }
                    mac.upper_frame_received(f).unwrap();
                },
                1 | 2 => {
                    if let Some(e) = timer.fire_next() {
                        mac.handle_timer(e).unwrap();
                    }
                },
                3 if outstanding > 0 => {
                    outstanding -= 1;
                    mac.transmission_complete().unwrap();
                },
                4 => {
                    if let Some(f) = last.iter().rev().find(|f| f.is_data()) {
                        mac.lower_frame_received(Frame::ack(f, 0)).unwrap();
                    }
                },
                5 => {
                    if let Some(f) = last.iter().rev().find(|f| f.is_rts()) {
                        mac.lower_frame_received(Frame::cts(f, 0)).unwrap();
                    }
                },
                6 => mac.corrupted_frame_received().unwrap(),
                7 => {
                    timer.inc(rng.gen_range(0..50));
                    mac.medium_state_changed(rng.gen_bool(0.7)).unwrap();
                },
                8 => {
                    receiving = !receiving;
                    radio.set_receiving(receiving);
                },
                _ => (),
            }

            for (f, _) in radio.take() {
                outstanding += 1;
                last.push(f);
            }
            if last.len() > 4 {
                last.drain(..last.len() - 4);
            }

            let owners = QOS_ORDER.iter()
                .filter(|ac| mac.contention_state(**ac) == Some(ContentionState::Owning))
                .count();
            assert!(owners <= 1);

            for ac in QOS_ORDER.iter() {
                if let Some(FrameExchange::Multicast(_)) = mac.exchange(*ac) {
                    assert_eq!(mac.owner(), Some(*ac));
                }
            }
        }
    }

    const QOS_ORDER: [AccessCategory; 4] = access_category::QOS_CATEGORIES;
}
