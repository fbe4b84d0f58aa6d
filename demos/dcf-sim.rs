//! Shared channel simulation
//!
//! Runs a number of stations on a single collision domain, each generating
//! traffic for random peers, and reports delivery statistics.
//
// https://github.com/rust-iot/rust-wifi-mac
// Copyright 2021 Ryan Kurte

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::rc::Rc;

use log::{debug, info, trace};
use rand::{Rng, SeedableRng, rngs::StdRng};
use structopt::StructOpt;

use wifi_mac::prelude::*;

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "4")]
    /// Number of stations sharing the channel
    pub stations: usize,

    #[structopt(long, default_value = "1s")]
    /// Simulated time to run for
    pub duration: humantime::Duration,

    #[structopt(long, default_value = "2ms")]
    /// Mean interval between frames generated by each station
    pub interval: humantime::Duration,

    #[structopt(long, default_value = "500")]
    /// Payload length in bytes
    pub payload_len: usize,

    #[structopt(long, default_value = "1000")]
    /// Frames longer than this are protected by RTS/CTS
    pub rts_threshold: usize,

    #[structopt(long, default_value = "0.1")]
    /// Fraction of generated frames sent to the broadcast address
    pub broadcast: f64,

    #[structopt(long)]
    /// Run DCF with a single legacy access category rather than EDCA
    pub legacy: bool,

    #[structopt(long, default_value = "1")]
    /// Random seed
    pub seed: u64,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

#[derive(Debug)]
enum Event {
    Generate(usize),
    Timer(usize, TimerEvent),
    TxStart(usize, Frame),
    TxEnd(usize, u64),
}

/// Per station channel state
#[derive(Debug, Default)]
struct Station {
    /// Receptions in progress, by transmission id, with a corrupted flag
    receptions: Vec<(u64, bool)>,
    transmitting: bool,
}

#[derive(Debug, Default)]
struct Kernel {
    now: Ts,
    seq: u64,
    events: BTreeMap<(Ts, u64), Event>,
    timers: BTreeMap<(usize, TimerEvent), Ts>,
    airborne: BTreeMap<u64, Frame>,
    stations: Vec<Station>,
}

impl Kernel {
    fn push(&mut self, at: Ts, event: Event) {
        self.seq += 1;
        self.events.insert((at, self.seq), event);
    }
}

type Shared = Rc<RefCell<Kernel>>;

struct SimTimer {
    station: usize,
    kernel: Shared,
}

impl MacTimer for SimTimer {
    fn ticks_us(&self) -> Ts {
        self.kernel.borrow().now
    }

    fn schedule(&mut self, at: Ts, event: TimerEvent) {
        let mut k = self.kernel.borrow_mut();
        k.timers.insert((self.station, event), at);
        k.push(at, Event::Timer(self.station, event));
    }

    fn cancel(&mut self, event: TimerEvent) {
        self.kernel.borrow_mut().timers.remove(&(self.station, event));
    }
}

struct SimRadio {
    station: usize,
    kernel: Shared,
}

impl Transmit for SimRadio {
    type Error = Infallible;

    fn transmit_frame(&mut self, frame: Frame, ifs: Option<Ts>) -> Result<(), Self::Error> {
        let mut k = self.kernel.borrow_mut();
        let at = k.now + ifs.unwrap_or(0);
        k.push(at, Event::TxStart(self.station, frame));
        Ok(())
    }
}

impl ReceiveStatus for SimRadio {
    fn is_reception_in_progress(&self) -> bool {
        !self.kernel.borrow().stations[self.station].receptions.is_empty()
    }
}

type Mac = UpperMac<SimRadio, SimTimer, StdRng>;

#[derive(Debug, Clone, Default)]
struct Stats {
    generated: u64,
    transmissions: u64,
    delivered: u64,
    corrupted: u64,
}

fn check<T>(r: Result<T, CoreError<Infallible>>) -> anyhow::Result<T> {
    r.map_err(|e| anyhow::anyhow!("MAC error: {:?}", e))
}

fn address(station: usize) -> MacAddress {
    MacAddress::from_u64(0x0200_0000_0000 | (station as u64 + 1))
}

fn main() -> anyhow::Result<()> {
    let opts = Options::from_args();

    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    if opts.stations < 2 {
        return Err(anyhow::anyhow!("At least two stations are required"));
    }

    let end = opts.duration.as_micros() as Ts;
    let interval = (opts.interval.as_micros() as Ts).max(2);

    info!("Simulating {} stations for {} ({})", opts.stations, opts.duration, if opts.legacy { "DCF" } else { "EDCA" });

    let kernel: Shared = Rc::new(RefCell::new(Kernel::default()));
    kernel.borrow_mut().stations = (0..opts.stations).map(|_| Station::default()).collect();

    let mut macs: Vec<Mac> = (0..opts.stations).map(|i| {
        let config = MacConfig {
            address: address(i),
            qos: !opts.legacy,
            rts_threshold: opts.rts_threshold,
            ..Default::default()
        };

        let radio = SimRadio { station: i, kernel: kernel.clone() };
        let timer = SimTimer { station: i, kernel: kernel.clone() };

        UpperMac::new(config, Services::default(), radio, timer, StdRng::seed_from_u64(opts.seed + 1 + i as u64))
    }).collect();

    let mut stats = vec![Stats::default(); opts.stations];
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let reference = PhyMode::default();

    for i in 0..opts.stations {
        kernel.borrow_mut().push(rng.gen_range(0..interval), Event::Generate(i));
    }

    loop {
        let next = kernel.borrow_mut().events.pop_first();
        let ((at, _), event) = match next {
            Some(v) => v,
            None => break,
        };

        if at > end {
            break;
        }

        kernel.borrow_mut().now = at;

        match event {
            Event::Generate(i) => {
                let receiver = if rng.gen_bool(opts.broadcast) {
                    MacAddress::BROADCAST
                } else {
                    let peer = (i + rng.gen_range(1..opts.stations)) % opts.stations;
                    address(peer)
                };

                let payload = vec![i as u8; opts.payload_len];
                let frame = match opts.legacy {
                    true => Frame::data(receiver, address(i), payload),
                    false => Frame::qos_data(receiver, address(i), rng.gen_range(0..8), payload),
                };

                trace!("{} us: station {} generated frame for {}", at, i, receiver);

                stats[i].generated += 1;
                check(macs[i].upper_frame_received(frame))?;

                let next = at + rng.gen_range(interval / 2..interval * 3 / 2);
                kernel.borrow_mut().push(next, Event::Generate(i));
            },
            Event::Timer(i, e) => {
                let valid = {
                    let mut k = kernel.borrow_mut();
                    match k.timers.get(&(i, e)) {
                        Some(t) if *t == at => {
                            k.timers.remove(&(i, e));
                            true
                        },
                        _ => false,
                    }
                };

                if valid {
                    check(macs[i].handle_timer(e))?;
                }
            },
            Event::TxStart(i, frame) => {
                let airtime = frame.duration_in(&reference);
                let mut busy = Vec::new();

                debug!("{} us: station {} transmits {:?} to {} ({} us)", at, i, frame.kind, frame.receiver, airtime);
                stats[i].transmissions += 1;

                {
                    let mut k = kernel.borrow_mut();
                    k.seq += 1;
                    let id = k.seq;
                    k.airborne.insert(id, frame);

                    for (j, s) in k.stations.iter_mut().enumerate() {
                        // Half duplex, transmitting corrupts any ongoing reception
                        for r in s.receptions.iter_mut() {
                            r.1 = true;
                        }

                        if j == i {
                            s.transmitting = true;
                            continue;
                        }

                        if s.receptions.is_empty() {
                            busy.push(j);
                        }

                        let corrupted = s.transmitting || !s.receptions.is_empty();
                        s.receptions.push((id, corrupted));
                    }

                    k.push(at + airtime, Event::TxEnd(i, id));
                }

                for j in busy {
                    check(macs[j].medium_state_changed(false))?;
                }
            },
            Event::TxEnd(i, id) => {
                let mut outcomes = Vec::new();

                let frame = {
                    let mut k = kernel.borrow_mut();
                    k.stations[i].transmitting = false;

                    for (j, s) in k.stations.iter_mut().enumerate() {
                        if let Some(p) = s.receptions.iter().position(|r| r.0 == id) {
                            let (_, corrupted) = s.receptions.remove(p);
                            outcomes.push((j, corrupted, s.receptions.is_empty()));
                        }
                    }

                    k.airborne.remove(&id)
                };

                check(macs[i].transmission_complete())?;

                let frame = match frame {
                    Some(f) => f,
                    None => continue,
                };

                for (j, corrupted, idle) in outcomes {
                    if corrupted {
                        stats[j].corrupted += 1;
                        check(macs[j].corrupted_frame_received())?;
                    } else {
                        check(macs[j].lower_frame_received(frame.clone()))?;
                    }

                    if idle {
                        check(macs[j].medium_state_changed(true))?;
                    }

                    while let Some(f) = macs[j].receive() {
                        trace!("{} us: station {} delivered frame {} from {:?}", at, j, f.sequence, f.transmitter);
                        stats[j].delivered += 1;
                    }
                }
            },
        }
    }

    for (i, s) in stats.iter().enumerate() {
        info!("Station {} ({}): generated {} transmissions {} delivered {} corrupted {}",
            i, address(i), s.generated, s.transmissions, s.delivered, s.corrupted);
    }

    let generated: u64 = stats.iter().map(|s| s.generated).sum();
    let delivered: u64 = stats.iter().map(|s| s.delivered).sum();
    info!("Total: generated {} delivered {}", generated, delivered);

    Ok(())
}
