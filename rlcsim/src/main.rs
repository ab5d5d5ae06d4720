//! Albor RLC loopback simulator
//!
//! Runs two RLC peers back to back over an impaired in-process link, driving
//! the MAC pull path with the round-robin grant scheduler, and reports
//! per-bearer metrics as JSON.

mod config;
mod link;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use clap::Parser;
use common::types::Lcid;
use interfaces::{ChannelUpper, UpperEvent};
use layers::mac::GrantScheduler;
use layers::rlc::{Rlc, RlcBearerMetrics};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::SimConfig;
use link::{ImpairedLink, LinkStats};

/// Albor RLC loopback simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log filter, overrides the configured levels (e.g. "debug,layers::rlc=trace")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Simulated time in milliseconds, 0 runs until interrupted
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Link loss probability
    #[arg(long)]
    loss: Option<f64>,

    /// Seed for traffic and link impairments
    #[arg(long)]
    seed: Option<u64>,

    /// Run TTIs back to back instead of pacing them against the clock
    #[arg(long)]
    fast: bool,
}

impl Args {
    fn apply(&self, config: &mut SimConfig) {
        if let Some(duration_ms) = self.duration_ms {
            config.sim.duration_ms = duration_ms;
        }
        if let Some(loss) = self.loss {
            config.link.loss = loss;
        }
        if let Some(seed) = self.seed {
            config.sim.seed = seed;
        }
        if self.fast {
            config.sim.realtime = false;
        }
    }
}

/// Traffic counters seen from one peer's upper layer
#[derive(Debug, Clone, Copy, Default, Serialize)]
struct PeerStats {
    sdus_offered: u64,
    sdus_refused: u64,
    sdus_received: u64,
    bytes_received: u64,
    sdus_acknowledged: u64,
    out_of_order: u64,
    max_retx: u64,
    protocol_failures: u64,
}

struct Peer {
    name: &'static str,
    rlc: Rlc,
    events: mpsc::UnboundedReceiver<UpperEvent>,
    scheduler: GrantScheduler,
    stats: PeerStats,
    next_seq: HashMap<Lcid, u32>,
    last_rx_seq: HashMap<Lcid, u32>,
}

impl Peer {
    fn new(name: &'static str, config: &SimConfig) -> Result<Self> {
        let (upper, events) = ChannelUpper::new();
        let rlc = Rlc::new(upper);
        for bearer in &config.bearers {
            let lcid = Lcid::new(bearer.lcid).ok_or_else(|| anyhow!("Invalid LCID: {}", bearer.lcid))?;
            rlc.add_bearer(lcid, bearer.rlc.clone())?;
        }
        Ok(Self {
            name,
            rlc,
            events,
            scheduler: GrantScheduler::new(config.grants),
            stats: PeerStats::default(),
            next_seq: HashMap::new(),
            last_rx_seq: HashMap::new(),
        })
    }

    /// Offer one SDU carrying a per-bearer sequence number
    fn offer(&mut self, lcid: Lcid, len: usize) {
        if self.rlc.sdu_queue_is_full(lcid) {
            self.stats.sdus_refused += 1;
            return;
        }
        let seq = self.next_seq.entry(lcid).or_insert(0);
        let mut sdu = vec![(*seq % 251) as u8; len.max(4)];
        sdu[..4].copy_from_slice(&seq.to_be_bytes());

        match self.rlc.write_sdu(lcid, Bytes::from(sdu)) {
            Ok(_) => {
                *seq += 1;
                self.stats.sdus_offered += 1;
            }
            Err(e) => {
                debug!("{} refused SDU on {}: {}", self.name, lcid, e);
                self.stats.sdus_refused += 1;
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                UpperEvent::Sdu { lcid, sdu } => {
                    self.stats.sdus_received += 1;
                    self.stats.bytes_received += sdu.len() as u64;
                    if sdu.len() >= 4 {
                        let seq = u32::from_be_bytes([sdu[0], sdu[1], sdu[2], sdu[3]]);
                        if let Some(&last) = self.last_rx_seq.get(&lcid) {
                            if seq <= last {
                                self.stats.out_of_order += 1;
                            }
                        }
                        self.last_rx_seq.insert(lcid, seq);
                    }
                }
                UpperEvent::Delivered { sdus, .. } => {
                    self.stats.sdus_acknowledged += sdus.len() as u64;
                }
                UpperEvent::MaxRetx { lcid } => {
                    warn!("{}: max retransmissions reached on {}", self.name, lcid);
                    self.stats.max_retx += 1;
                }
                UpperEvent::ProtocolFailure { lcid } => {
                    warn!("{}: protocol failure on {}", self.name, lcid);
                    self.stats.protocol_failures += 1;
                }
            }
        }
    }
}

#[derive(Serialize)]
struct BearerReport {
    lcid: u8,
    metrics: RlcBearerMetrics,
}

#[derive(Serialize)]
struct PeerReport {
    name: &'static str,
    stats: PeerStats,
    bearers: Vec<BearerReport>,
}

#[derive(Serialize)]
struct Report {
    tti: u64,
    peers: Vec<PeerReport>,
    link_a_to_b: LinkStats,
    link_b_to_a: LinkStats,
}

struct Simulation {
    config: SimConfig,
    a: Peer,
    b: Peer,
    a_to_b: ImpairedLink,
    b_to_a: ImpairedLink,
    lcids: Vec<Lcid>,
    rng: StdRng,
    tti: u64,
}

impl Simulation {
    fn new(config: SimConfig) -> Result<Self> {
        let seed = config.sim.seed;
        let lcids = config
            .bearers
            .iter()
            .filter_map(|bearer| Lcid::new(bearer.lcid))
            .collect();
        Ok(Self {
            a: Peer::new("A", &config)?,
            b: Peer::new("B", &config)?,
            a_to_b: ImpairedLink::new("A->B", config.link.clone(), seed.wrapping_add(1)),
            b_to_a: ImpairedLink::new("B->A", config.link.clone(), seed.wrapping_add(2)),
            lcids,
            rng: StdRng::seed_from_u64(seed),
            tti: 0,
            config,
        })
    }

    fn tti(&self) -> u64 {
        self.tti
    }

    fn step(&mut self) {
        self.tti += 1;
        let tti = self.tti;
        let sim = &self.config.sim;

        if sim.sdu_interval_ttis > 0 && tti % sim.sdu_interval_ttis == 0 {
            for &lcid in &self.lcids {
                let len = self.rng.gen_range(sim.sdu_size_min..=sim.sdu_size_max);
                self.a.offer(lcid, len);
                if sim.bidirectional {
                    let len = self.rng.gen_range(sim.sdu_size_min..=sim.sdu_size_max);
                    self.b.offer(lcid, len);
                }
            }
        }

        for (peer, link) in [(&mut self.a, &mut self.a_to_b), (&mut self.b, &mut self.b_to_a)] {
            for scheduled in peer.scheduler.run_tti(&peer.rlc) {
                if let Err(e) = link.send(tti, scheduled.lcid, &scheduled.pdu) {
                    debug!("{} PDU lost on the link: {}", peer.name, e);
                }
            }
        }

        for frame in self.a_to_b.receive(tti) {
            self.b.rlc.write_pdu(frame.lcid, &frame.pdu);
        }
        for frame in self.b_to_a.receive(tti) {
            self.a.rlc.write_pdu(frame.lcid, &frame.pdu);
        }

        for peer in [&mut self.a, &mut self.b] {
            peer.rlc.tick(self.config.sim.tti_ms);
            peer.drain_events();
        }
    }

    fn report(&self) -> Report {
        let peer_report = |peer: &Peer| PeerReport {
            name: peer.name,
            stats: peer.stats,
            bearers: peer
                .rlc
                .get_all_metrics()
                .into_iter()
                .map(|(lcid, metrics)| BearerReport {
                    lcid: lcid.value(),
                    metrics,
                })
                .collect(),
        };
        Report {
            tti: self.tti,
            peers: vec![peer_report(&self.a), peer_report(&self.b)],
            link_a_to_b: self.a_to_b.stats(),
            link_b_to_a: self.b_to_a.stats(),
        }
    }

    fn log_report(&self) -> Result<()> {
        info!("Metrics: {}", serde_json::to_string(&self.report())?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    args.apply(&mut config);

    // Initialize logging
    let directives = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.filter_directives());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    config.validate()?;

    info!("Starting Albor RLC loopback simulator");
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path);
    }
    for bearer in &config.bearers {
        info!(
            "  LCID {}: {} with {}-bit SN",
            bearer.lcid, bearer.rlc.mode, bearer.rlc.sn_field_width
        );
    }
    info!(
        "  Link: loss {}, duplication {}, up to {} TTIs of extra delay",
        config.link.loss, config.link.duplicate, config.link.max_delay_ttis
    );

    let tti_ms = u64::from(config.sim.tti_ms);
    let total_ttis = config.sim.duration_ms / tti_ms;
    let report_every = (config.sim.metrics_period_ms / tti_ms).max(1);
    let realtime = config.sim.realtime;

    let mut sim = Simulation::new(config)?;
    let mut interval = tokio::time::interval(Duration::from_millis(tti_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        if total_ttis > 0 && sim.tti() >= total_ttis {
            break;
        }

        if realtime {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = interval.tick() => {}
            }
        } else if sim.tti() % 100 == 0 {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
                _ = tokio::task::yield_now() => {}
            }
        }

        sim.step();
        if sim.tti() % report_every == 0 {
            sim.log_report()?;
        }
    }

    sim.log_report()?;
    let summary = sim.report();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!("Simulation finished after {} TTIs", sim.tti());
    Ok(())
}
