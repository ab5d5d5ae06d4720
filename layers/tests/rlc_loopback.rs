//! Two RLC peers connected back to back through an impaired link

use bytes::Bytes;
use common::types::{Lcid, SduId};
use interfaces::{ChannelUpper, UpperEvent};
use layers::mac::{GrantConfig, GrantScheduler, ScheduledPdu};
use layers::rlc::{Rlc, RlcConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default)]
struct Impairments {
    loss: f64,
    duplicate: f64,
    /// Extra TTIs a PDU may be held back
    max_delay: u64,
}

/// One direction of the link
struct Link {
    rng: StdRng,
    impairments: Impairments,
    in_flight: Vec<(u64, Lcid, Bytes)>,
}

impl Link {
    fn new(seed: u64, impairments: Impairments) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            impairments,
            in_flight: Vec::new(),
        }
    }

    fn send(&mut self, tti: u64, pdus: Vec<ScheduledPdu>) {
        for ScheduledPdu { lcid, pdu } in pdus {
            if self.rng.gen_bool(self.impairments.loss) {
                continue;
            }
            let copies = if self.rng.gen_bool(self.impairments.duplicate) { 2 } else { 1 };
            for _ in 0..copies {
                let due = tti + 1 + self.rng.gen_range(0..=self.impairments.max_delay);
                self.in_flight.push((due, lcid, pdu.clone()));
            }
        }
    }

    fn deliver(&mut self, tti: u64, peer: &Rlc) {
        let (due, later): (Vec<_>, Vec<_>) = self.in_flight.drain(..).partition(|(at, _, _)| *at <= tti);
        self.in_flight = later;
        for (_, lcid, pdu) in due {
            peer.write_pdu(lcid, &pdu);
        }
    }
}

struct Peer {
    rlc: Rlc,
    events: mpsc::UnboundedReceiver<UpperEvent>,
    scheduler: GrantScheduler,
    sdus: Vec<(Lcid, Vec<u8>)>,
    delivered: Vec<SduId>,
    max_retx: usize,
}

impl Peer {
    fn new(grants: GrantConfig) -> Self {
        let (upper, events) = ChannelUpper::new();
        Self {
            rlc: Rlc::new(upper),
            events,
            scheduler: GrantScheduler::new(grants),
            sdus: Vec::new(),
            delivered: Vec::new(),
            max_retx: 0,
        }
    }

    fn collect(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                UpperEvent::Sdu { lcid, sdu } => self.sdus.push((lcid, sdu)),
                UpperEvent::Delivered { sdus, .. } => self.delivered.extend(sdus),
                UpperEvent::MaxRetx { .. } => self.max_retx += 1,
                UpperEvent::ProtocolFailure { lcid } => panic!("protocol failure on {}", lcid),
            }
        }
    }
}

struct Loopback {
    a: Peer,
    b: Peer,
    a_to_b: Link,
    b_to_a: Link,
    tti: u64,
}

impl Loopback {
    fn new(seed: u64, impairments: Impairments, grants: GrantConfig) -> Self {
        Self {
            a: Peer::new(grants),
            b: Peer::new(grants),
            a_to_b: Link::new(seed, impairments),
            b_to_a: Link::new(seed.wrapping_add(1), impairments),
            tti: 0,
        }
    }

    fn add_bearer(&self, lcid: Lcid, config: RlcConfig) {
        self.a.rlc.add_bearer(lcid, config.clone()).unwrap();
        self.b.rlc.add_bearer(lcid, config).unwrap();
    }

    /// One millisecond: schedule both sides, move due PDUs, run timers
    fn step(&mut self) {
        self.tti += 1;
        let from_a = self.a.scheduler.run_tti(&self.a.rlc);
        let from_b = self.b.scheduler.run_tti(&self.b.rlc);
        self.a_to_b.send(self.tti, from_a);
        self.b_to_a.send(self.tti, from_b);
        self.a_to_b.deliver(self.tti, &self.b.rlc);
        self.b_to_a.deliver(self.tti, &self.a.rlc);
        self.a.rlc.tick(1);
        self.b.rlc.tick(1);
        self.a.collect();
        self.b.collect();
    }

    fn run_until(&mut self, max_ttis: u64, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..max_ttis {
            self.step();
            if done(self) {
                return true;
            }
        }
        false
    }
}

fn lcid(value: u8) -> Lcid {
    Lcid::new(value).unwrap()
}

/// SDU whose first four bytes carry its index
fn numbered_sdu(index: u32, len: usize) -> Bytes {
    let mut sdu = vec![(index % 251) as u8; len.max(4)];
    sdu[..4].copy_from_slice(&index.to_be_bytes());
    Bytes::from(sdu)
}

fn sdu_index(sdu: &[u8]) -> u32 {
    u32::from_be_bytes([sdu[0], sdu[1], sdu[2], sdu[3]])
}

fn am_config() -> RlcConfig {
    let mut config = RlcConfig::am();
    config.t_poll_retransmit_ms = 20;
    config.t_reordering_ms = 10;
    config.t_status_prohibit_ms = 5;
    config.max_retx_threshold = 32;
    config
}

#[test]
fn test_am_recovers_every_sdu_over_lossy_link() {
    let impairments = Impairments {
        loss: 0.1,
        duplicate: 0.05,
        max_delay: 3,
    };
    let mut lb = Loopback::new(7, impairments, GrantConfig::default());
    lb.add_bearer(lcid(3), am_config());

    let mut rng = StdRng::seed_from_u64(42);
    let mut sent = Vec::new();
    let mut ids = Vec::new();
    for index in 0..60 {
        let sdu = numbered_sdu(index, rng.gen_range(10..3000));
        ids.push(lb.a.rlc.write_sdu(lcid(3), sdu.clone()).unwrap());
        sent.push(sdu.to_vec());
    }

    let finished = lb.run_until(20_000, |lb| lb.b.sdus.len() == sent.len() && lb.a.delivered.len() == ids.len());
    assert!(finished, "received {} of {} SDUs", lb.b.sdus.len(), sent.len());

    let received: Vec<Vec<u8>> = lb.b.sdus.iter().map(|(_, sdu)| sdu.clone()).collect();
    assert_eq!(received, sent);

    let mut delivered = lb.a.delivered.clone();
    delivered.sort();
    assert_eq!(delivered, ids);
    assert_eq!(lb.a.max_retx, 0);

    let tx = lb.a.rlc.get_metrics(lcid(3)).unwrap();
    assert!(tx.num_retx_pdus > 0);
    let rx = lb.b.rlc.get_metrics(lcid(3)).unwrap();
    assert_eq!(rx.num_rx_sdus, 60);
    assert_eq!(rx.num_lost_sdus, 0);
}

#[test]
fn test_am_small_grants_force_resegmentation() {
    let impairments = Impairments {
        loss: 0.15,
        duplicate: 0.0,
        max_delay: 1,
    };
    let grants = GrantConfig {
        tti_bytes: 400,
        max_grant: 0,
    };
    let mut lb = Loopback::new(11, impairments, grants);
    lb.add_bearer(lcid(4), am_config());

    let sent: Vec<Bytes> = (0..20).map(|i| numbered_sdu(i, 350 + 17 * i as usize)).collect();
    for sdu in &sent {
        lb.a.rlc.write_sdu(lcid(4), sdu.clone()).unwrap();
    }

    let finished = lb.run_until(20_000, |lb| lb.b.sdus.len() == sent.len());
    assert!(finished, "received {} of {} SDUs", lb.b.sdus.len(), sent.len());
    for ((_, got), want) in lb.b.sdus.iter().zip(&sent) {
        assert_eq!(got.as_slice(), want.as_ref());
    }
}

#[test]
fn test_um_delivers_in_order_without_duplicates() {
    let impairments = Impairments {
        loss: 0.1,
        duplicate: 0.1,
        max_delay: 4,
    };
    let mut lb = Loopback::new(3, impairments, GrantConfig::default());
    let mut config = RlcConfig::um(10);
    config.t_reordering_ms = 10;
    lb.add_bearer(lcid(2), config);

    let count = 200;
    for index in 0..count {
        lb.a.rlc.write_sdu(lcid(2), numbered_sdu(index, 300)).unwrap();
        lb.step();
    }
    // let t-Reordering flush whatever is still held back
    for _ in 0..50 {
        lb.step();
    }

    let indices: Vec<u32> = lb.b.sdus.iter().map(|(_, sdu)| sdu_index(sdu)).collect();
    assert!(indices.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", indices);
    let unique: HashSet<u32> = indices.iter().copied().collect();
    assert_eq!(unique.len(), indices.len());
    assert!(indices.len() > count as usize / 2);
    assert!(indices.len() < count as usize);

    let metrics = lb.b.rlc.get_metrics(lcid(2)).unwrap();
    assert!(metrics.num_lost_pdus > 0);
}

#[test]
fn test_mixed_bearers_share_the_grant() {
    let mut lb = Loopback::new(1, Impairments::default(), GrantConfig::default());
    lb.add_bearer(lcid(1), RlcConfig::tm());
    lb.add_bearer(lcid(2), RlcConfig::um(5));
    lb.add_bearer(lcid(3), am_config());

    for index in 0..10 {
        lb.a.rlc.write_sdu(lcid(1), numbered_sdu(index, 40)).unwrap();
        lb.a.rlc.write_sdu(lcid(2), numbered_sdu(100 + index, 700)).unwrap();
        lb.a.rlc.write_sdu(lcid(3), numbered_sdu(200 + index, 1200)).unwrap();
    }

    let finished = lb.run_until(500, |lb| lb.b.sdus.len() == 30);
    assert!(finished, "received {} of 30 SDUs", lb.b.sdus.len());

    for (bearer, base) in [(lcid(1), 0), (lcid(2), 100), (lcid(3), 200)] {
        let indices: Vec<u32> = lb
            .b
            .sdus
            .iter()
            .filter(|(l, _)| *l == bearer)
            .map(|(_, sdu)| sdu_index(sdu))
            .collect();
        assert_eq!(indices, (base..base + 10).collect::<Vec<_>>());
    }
}
