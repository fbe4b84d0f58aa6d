
use log::{debug, info, trace, warn};
use rand_core::RngCore;

use crate::Radio;
use crate::error::CoreError;
use crate::timer::Timer;

use super::{AccessCategory, Frame, Services, TransmissionQueue};
use super::contention::{BackoffWindow, Contention, ContentionParams};
use super::exchange::{ExchangeContext, ExchangeResult, ExchangeStatus, FrameExchange, FrameRole};
use super::retry::RetryHandler;

/// Per access category resources the coordinator drives
pub struct AcResources<'a, G> {
    pub queue: &'a mut TransmissionQueue,
    pub contention: &'a mut Contention,
    pub rng: &'a mut G,
    pub services: &'a mut Services,
}

/// Frame exchange coordinator for one access category.
///
/// Owns the active exchange and the retry state, pulls frames from the
/// queue when the channel is granted and feeds exchange outcomes back
/// into the retry handler and the contention engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameExchangeCoordinator {
    ac: AccessCategory,
    exchange: Option<FrameExchange>,
    retry: RetryHandler,
}

impl FrameExchangeCoordinator {
    pub fn new(ac: AccessCategory, retry: RetryHandler) -> Self {
        Self { ac, exchange: None, retry }
    }

    pub fn exchange(&self) -> Option<&FrameExchange> {
        self.exchange.as_ref()
    }

    pub fn retry(&self) -> &RetryHandler {
        &self.retry
    }

    /// Start contention for the next frame unless already contending or owning
    pub fn start_contention_if_necessary<R, T, G: RngCore>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) {
        if !res.contention.is_contention_in_progress() {
            self.start_contention(ctx, res);
        }
    }

    fn start_contention<R, T, G: RngCore>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) {
        let p = ctx.params.ac(self.ac);

        let next = match &self.exchange {
            Some(x) => Some(x.data_frame()),
            None => res.queue.front(),
        };

        let window = match next {
            Some(f) if f.is_broadcast_or_multicast() => BackoffWindow::Window(p.cw_multicast),
            _ => BackoffWindow::Window(self.retry.cw()),
        };

        let params = ContentionParams {
            aifs: p.aifs,
            eifs: p.eifs,
            cw_min: p.cw_min,
            cw_max: p.cw_max,
            slot_time: ctx.params.slot_time,
            window,
        };

        res.contention.start_contention(ctx.now, params, res.rng);
    }

    /// Backoff completed and the channel is ours
    pub fn channel_access_granted<R: Radio, T: Timer, G: RngCore>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Result<(), CoreError<R::Error>> {
        trace!("{} channel access granted at {} us", self.ac, ctx.now);

        if let Some(x) = &mut self.exchange {
            let r = x.continue_exchange(ctx)?;
            return self.handle_result(r, ctx, res);
        }

        match self.dequeue(ctx, res) {
            Some(frame) => self.start_frame_exchange(frame, ctx, res),
            None => {
                warn!("{} channel granted with empty queue", self.ac);
                res.contention.channel_released();
                Ok(())
            }
        }
    }

    /// Backoff completed in the same slot as a higher priority category,
    /// treated as a transmission failure of the next frame
    pub fn internal_collision<R: Radio, T: Timer, G: RngCore>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Result<(), CoreError<R::Error>> {
        debug!("{} internal collision at {} us", self.ac, ctx.now);

        if let Some(x) = &self.exchange {
            self.retry.frame_transmission_failed(x.data_frame(), x.first_frame());

            if self.retry.is_retry_possible(x.data_frame(), x.first_frame()) {
                self.start_contention(ctx, res);
            } else {
                info!("{} retry limit reached after internal collision, dropping frame for {}", self.ac, x.data_frame().receiver);

                if let Some(mut x) = self.exchange.take() {
                    x.abort(ctx.timer);
                }
                self.retry.reset();

                if !res.queue.is_empty() {
                    self.start_contention(ctx, res);
                }
            }

            return Ok(());
        }

        let retry_possible = match res.queue.front() {
            Some(head) => {
                self.retry.frame_transmission_failed(head, head);
                self.retry.is_retry_possible(head, head)
            },
            None => {
                warn!("{} internal collision with empty queue", self.ac);
                return Ok(());
            }
        };

        if !retry_possible {
            if let Some(f) = res.queue.pop() {
                info!("{} retry limit reached after internal collision, dropping frame for {}", self.ac, f.receiver);
            }
            self.retry.reset();
        }

        if !res.queue.is_empty() {
            self.start_contention(ctx, res);
        }

        Ok(())
    }

    /// A transmission by this category's exchange completed
    pub fn transmission_complete<R: Radio, T: Timer, G: RngCore>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Result<(), CoreError<R::Error>> {
        let r = match &mut self.exchange {
            Some(x) => x.transmission_complete(ctx)?,
            None => {
                warn!("{} transmission complete without active exchange", self.ac);
                return Ok(());
            }
        };

        self.handle_result(r, ctx, res)
    }

    /// Offer a received frame to the active exchange, returns whether it was consumed
    pub fn lower_frame_received<R: Radio, T: Timer, G: RngCore>(&mut self, frame: &Frame, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Result<bool, CoreError<R::Error>> {
        let r = match &mut self.exchange {
            Some(x) => x.lower_frame_received(frame, ctx)?,
            None => return Ok(false),
        };

        let processed = matches!(r, ExchangeResult::Accepted(_) | ExchangeResult::Finished(_));
        self.handle_result(r, ctx, res)?;

        Ok(processed)
    }

    pub fn corrupted_or_not_for_us<R: Radio, T: Timer, G: RngCore>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Result<(), CoreError<R::Error>> {
        let r = match &mut self.exchange {
            Some(x) => x.corrupted_or_not_for_us(),
            None => return Ok(()),
        };

        self.handle_result(r, ctx, res)
    }

    pub fn reply_timeout<R: Radio, T: Timer, G: RngCore>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Result<(), CoreError<R::Error>> {
        let r = match &mut self.exchange {
            Some(x) => x.reply_timeout(ctx),
            None => {
                warn!("{} reply timeout without active exchange", self.ac);
                return Ok(());
            }
        };

        self.handle_result(r, ctx, res)
    }

    /// Next frame for transmission, aggregated, numbered and fragmented as required
    fn dequeue<R, T, G>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Option<Frame> {
        let mut frame = match &mut res.services.aggregation {
            Some(a) => a.create_aggregate_frame(res.queue)?,
            None => res.queue.pop()?,
        };

        // Fragments were numbered before being split
        if !frame.is_fragment() {
            res.services.duplicate_detector.assign_sequence_number(&mut frame);
        }

        if frame.byte_len() > ctx.params.fragmentation_threshold && !frame.is_amsdu() && !frame.is_fragment() {
            let fragments = res.services.fragmenter.fragment(frame, ctx.params.fragmentation_threshold);
            res.queue.push_front_all(fragments);
            frame = res.queue.pop()?;
        }

        frame.mode = Some(match frame.is_broadcast_or_multicast() {
            true => res.services.rate_selection.mode_for_multicast(&frame),
            false => res.services.rate_selection.mode_for_unicast(&frame),
        });

        Some(frame)
    }

    fn start_frame_exchange<R: Radio, T: Timer, G: RngCore>(&mut self, frame: Frame, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Result<(), CoreError<R::Error>> {
        if self.exchange.is_some() {
            panic!("{} frame exchange started while another is active", self.ac);
        }

        let mut x = FrameExchange::new(self.ac, frame, ctx.params);
        let r = x.start(ctx)?;
        self.exchange = Some(x);

        self.handle_result(r, ctx, res)
    }

    fn handle_result<R: Radio, T: Timer, G: RngCore>(&mut self, result: ExchangeResult, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) -> Result<(), CoreError<R::Error>> {
        match result {
            ExchangeResult::Ignored | ExchangeResult::InProgress => (),
            ExchangeResult::Accepted(role) => {
                if let Some(x) = &self.exchange {
                    self.retry.frame_transmission_succeeded(x.frame(role));
                }
            },
            ExchangeResult::Timeout(role) => self.transmission_failed(role, ctx, res),
            ExchangeResult::Finished(status) => {
                match (status, &self.exchange) {
                    (ExchangeStatus::Succeeded, Some(x)) => self.retry.frame_transmission_succeeded(x.data_frame()),
                    _ => self.retry.reset(),
                }

                self.exchange_finished(ctx, res);
            },
        }

        Ok(())
    }

    fn transmission_failed<R: Radio, T: Timer, G: RngCore>(&mut self, role: FrameRole, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) {
        let retry_possible = match &self.exchange {
            Some(x) => {
                self.retry.frame_transmission_failed(x.data_frame(), x.frame(role));
                self.retry.is_retry_possible(x.data_frame(), x.frame(role))
            },
            None => return,
        };

        if retry_possible {
            res.contention.channel_released();
            self.start_contention(ctx, res);
            return;
        }

        if let Some(x) = &mut self.exchange {
            info!("{} retry limit reached, dropping frame for {}", self.ac, x.data_frame().receiver);
            x.abort(ctx.timer);
        }

        self.retry.reset();
        self.exchange_finished(ctx, res);
    }

    fn exchange_finished<R, T, G: RngCore>(&mut self, ctx: &mut ExchangeContext<R, T>, res: &mut AcResources<G>) {
        if let Some(x) = &self.exchange {
            debug!("{} {} exchange finished at {} us", self.ac, x.name(), ctx.now);
        }

        res.contention.channel_released();
        self.exchange = None;

        if !res.queue.is_empty() {
            self.start_contention(ctx, res);
        }
    }
}

#[cfg(test)]
mod test {
    use alloc::collections::VecDeque;
    use bytes::Bytes;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::ieee80211::{Config, MacAddress, MacParameters, PhyMode};
    use crate::ieee80211::contention::ContentionState;
    use crate::ieee80211::exchange::TxOrigin;
    use crate::radio::mock::MockRadio;
    use crate::timer::mock::MockTimer;

    const AC: AccessCategory = AccessCategory::BestEffort;

    struct Harness {
        params: MacParameters,
        radio: MockRadio,
        timer: MockTimer,
        pending_tx: VecDeque<TxOrigin>,
        queue: TransmissionQueue,
        contention: Contention,
        rng: StdRng,
        services: Services,
        coordinator: FrameExchangeCoordinator,
    }

    impl Harness {
        fn new(config: Config) -> Self {
            let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, simplelog::Config::default());

            let params = MacParameters::new(&config, &PhyMode::default());
            let retry = RetryHandler::new(&params, AC);

            Self {
                radio: MockRadio::new(),
                timer: MockTimer::new(),
                pending_tx: VecDeque::new(),
                queue: TransmissionQueue::new(AC, 0, false),
                contention: Contention::new(AC, params.ac(AC).eifs),
                rng: StdRng::seed_from_u64(1),
                services: Services::default(),
                coordinator: FrameExchangeCoordinator::new(AC, retry),
                params,
            }
        }

        /// Run an operation against the coordinator with borrowed resources
        fn run<F, X>(&mut self, f: F) -> X
        where
            F: FnOnce(&mut FrameExchangeCoordinator, &mut ExchangeContext<MockRadio, MockTimer>, &mut AcResources<StdRng>) -> X,
        {
            let mut ctx = ExchangeContext {
                now: self.timer.val(),
                params: &self.params,
                radio: &mut self.radio,
                timer: &mut self.timer,
                pending_tx: &mut self.pending_tx,
            };
            let mut res = AcResources {
                queue: &mut self.queue,
                contention: &mut self.contention,
                rng: &mut self.rng,
                services: &mut self.services,
            };

            f(&mut self.coordinator, &mut ctx, &mut res)
        }

        fn enqueue(&mut self, len: usize) {
            let f = Frame::data(MacAddress::from_u64(2), MacAddress::from_u64(1), Bytes::from(std::vec![0u8; len]));
            self.queue.enqueue(f);
            self.run(|c, ctx, res| c.start_contention_if_necessary(ctx, res));
        }

        /// Expire the backoff and grant the channel
        fn grant(&mut self) {
            let at = self.contention.scheduled_transmission().unwrap();
            self.timer.set_us(at);
            self.contention.transmission_granted();
            self.run(|c, ctx, res| c.channel_access_granted(ctx, res)).unwrap();
        }

        fn complete(&mut self) {
            self.pending_tx.pop_front();
            self.run(|c, ctx, res| c.transmission_complete(ctx, res)).unwrap();
        }

        fn timeout(&mut self) {
            self.timer.fire_next();
            self.run(|c, ctx, res| c.reply_timeout(ctx, res)).unwrap();
        }
    }

    #[test]
    fn data_ack_releases_channel() {
        let mut h = Harness::new(Config::default());

        h.enqueue(100);
        h.enqueue(100);
        assert_eq!(h.contention.state(), ContentionState::WaitingBackoff);

        h.grant();
        assert!(h.contention.is_owning());
        assert_eq!(h.queue.len(), 1);

        let sent = h.radio.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.sequence, 0);
        assert_eq!(sent[0].0.mode, Some(PhyMode::default()));

        h.complete();

        let ack = Frame::ack(&sent[0].0, 0);
        assert!(h.run(|c, ctx, res| c.lower_frame_received(&ack, ctx, res)).unwrap());

        // Queue not empty, contention restarted for the next frame
        assert!(h.coordinator.exchange().is_none());
        assert_eq!(h.contention.state(), ContentionState::WaitingBackoff);

        h.grant();
        assert_eq!(h.radio.take()[0].0.sequence, 1);
    }

    #[test]
    fn timeout_retransmits_with_larger_window() {
        let mut h = Harness::new(Config::default());

        h.enqueue(100);
        h.grant();
        h.complete();
        h.timeout();

        assert_eq!(h.coordinator.retry().short_retry_count(), 1);
        assert_eq!(h.coordinator.retry().cw(), 31);
        assert_eq!(h.contention.state(), ContentionState::WaitingBackoff);
        assert!(h.coordinator.exchange().is_some());

        h.radio.take();
        h.grant();
        let sent = h.radio.take();
        assert!(sent[0].0.is_retry());
    }

    #[test]
    fn retry_limit_drops_frame() {
        let mut h = Harness::new(Config { short_retry_limit: 2, ..Default::default() });

        h.enqueue(100);

        for _ in 0..2 {
            h.grant();
            h.complete();
            h.timeout();
        }

        assert!(h.coordinator.exchange().is_none());
        assert_eq!(h.coordinator.retry().short_retry_count(), 0);
        assert_eq!(h.contention.state(), ContentionState::Idle);
        assert_eq!(h.timer.next(), None);
    }

    #[test]
    fn internal_collision_without_exchange() {
        let mut h = Harness::new(Config { short_retry_limit: 1, ..Default::default() });

        h.enqueue(100);
        h.enqueue(100);

        let at = h.contention.scheduled_transmission().unwrap();
        h.timer.set_us(at);
        h.contention.internal_collision();
        h.run(|c, ctx, res| c.internal_collision(ctx, res)).unwrap();

        // Head dropped on reaching the limit, contention restarted for the next frame
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.coordinator.retry().short_retry_count(), 0);
        assert!(h.contention.is_contention_in_progress());
    }

    #[test]
    fn internal_collision_keeps_head_when_retry_possible() {
        let mut h = Harness::new(Config::default());

        h.enqueue(100);

        let at = h.contention.scheduled_transmission().unwrap();
        h.timer.set_us(at);
        h.contention.internal_collision();
        h.run(|c, ctx, res| c.internal_collision(ctx, res)).unwrap();

        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.coordinator.retry().cw(), 31);
        assert!(h.contention.is_contention_in_progress());
    }

    #[test]
    fn rts_cts_timeout_counts_short_retry() {
        let mut h = Harness::new(Config { rts_threshold: 200, ..Default::default() });

        h.enqueue(500);
        h.grant();
        assert!(h.radio.take()[0].0.is_rts());

        h.complete();
        h.timeout();

        assert_eq!(h.coordinator.retry().short_retry_count(), 1);
        assert_eq!(h.coordinator.retry().long_retry_count(), 0);
    }

    #[test]
    fn rts_protected_frame_dropped_at_long_limit() {
        let mut h = Harness::new(Config { rts_threshold: 200, long_retry_limit: 2, ..Default::default() });

        h.enqueue(500);

        for attempt in 0..2 {
            h.grant();
            let rts = h.radio.take().remove(0).0;
            assert!(rts.is_rts());
            h.complete();

            let cts = Frame::cts(&rts, 0);
            assert!(h.run(|c, ctx, res| c.lower_frame_received(&cts, ctx, res)).unwrap());
            assert!(h.radio.take()[0].0.is_data());

            // CTS clears the short count only
            assert_eq!(h.coordinator.retry().short_retry_count(), 0);
            assert_eq!(h.coordinator.retry().long_retry_count(), attempt);
            assert_eq!(h.coordinator.retry().cw(), if attempt == 0 { 15 } else { 31 });

            h.complete();
            h.timeout();
        }

        assert!(h.coordinator.exchange().is_none());
        assert_eq!(h.coordinator.retry().long_retry_count(), 0);
        assert_eq!(h.coordinator.retry().cw(), 15);
        assert_eq!(h.contention.state(), ContentionState::Idle);
    }

    #[test]
    fn rts_protected_frame_window_grows() {
        let mut h = Harness::new(Config { rts_threshold: 200, ..Default::default() });

        h.enqueue(500);

        for expected in [31, 63, 127] {
            h.grant();
            let rts = h.radio.take().remove(0).0;
            h.complete();
            h.run(|c, ctx, res| c.lower_frame_received(&Frame::cts(&rts, 0), ctx, res)).unwrap();
            h.radio.take();
            h.complete();
            h.timeout();

            assert_eq!(h.coordinator.retry().cw(), expected);
            assert!(h.coordinator.exchange().is_some());
        }
    }

    #[test]
    fn empty_queue_grant_releases() {
        let mut h = Harness::new(Config::default());

        h.enqueue(100);
        h.queue.pop();

        h.grant();
        assert_eq!(h.contention.state(), ContentionState::Idle);
        assert_eq!(h.radio.count(), 0);
    }

    #[test]
    fn fragments_sent_in_order() {
        let mut h = Harness::new(Config { fragmentation_threshold: 300, ..Default::default() });

        h.enqueue(1000);
        h.grant();

        let first = h.radio.take().remove(0).0;
        assert_eq!(first.fragment, 0);
        assert!(first.has_more_fragments());
        assert_eq!(h.queue.len(), 3);

        h.complete();
        let ack = Frame::ack(&first, 0);
        h.run(|c, ctx, res| c.lower_frame_received(&ack, ctx, res)).unwrap();

        h.grant();
        let second = h.radio.take().remove(0).0;
        assert_eq!(second.fragment, 1);
        assert_eq!(second.sequence, first.sequence);
    }

    #[test]
    fn multicast_uses_multicast_window() {
        let mut h = Harness::new(Config::default());

        let f = Frame::data(MacAddress::BROADCAST, MacAddress::from_u64(1), Bytes::new());
        h.queue.enqueue(f);
        h.run(|c, ctx, res| c.start_contention_if_necessary(ctx, res));

        h.grant();
        assert_eq!(h.radio.take()[0].0.duration, 0);

        h.complete();
        assert!(h.coordinator.exchange().is_none());
        assert_eq!(h.contention.state(), ContentionState::Idle);
    }
}
