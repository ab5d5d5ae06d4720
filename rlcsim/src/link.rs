//! In-process impaired link between the two RLC peers
//!
//! Frames can be dropped, duplicated or held back a random number of TTIs,
//! which reorders them. The RNG is seeded so every run is reproducible.

use bytes::Bytes;
use common::types::Lcid;
use interfaces::{InterfaceError, LinkFrame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

use crate::config::LinkConfig;

/// Counters for one direction
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub delivered: u64,
    /// Frames refused because too many were in flight
    pub overflow: u64,
}

pub struct ImpairedLink {
    name: &'static str,
    config: LinkConfig,
    rng: StdRng,
    /// Frames keyed by the TTI they arrive in
    in_flight: BTreeMap<u64, Vec<LinkFrame>>,
    queued: usize,
    stats: LinkStats,
}

impl ImpairedLink {
    pub fn new(name: &'static str, config: LinkConfig, seed: u64) -> Self {
        Self {
            name,
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: BTreeMap::new(),
            queued: 0,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    fn enqueue(&mut self, frame: LinkFrame) -> Result<(), InterfaceError> {
        if self.queued >= self.config.capacity {
            self.stats.overflow += 1;
            return Err(InterfaceError::BufferFull);
        }
        let delay = 1 + self.rng.gen_range(0..=self.config.max_delay_ttis);
        self.in_flight.entry(frame.tti + delay).or_default().push(frame);
        self.queued += 1;
        Ok(())
    }

    /// Put a PDU scheduled in `tti` on the link
    pub fn send(&mut self, tti: u64, lcid: Lcid, pdu: &Bytes) -> Result<(), InterfaceError> {
        self.stats.sent += 1;
        if self.rng.gen_bool(self.config.loss) {
            self.stats.dropped += 1;
            trace!("{} link dropped {} byte PDU on {}", self.name, pdu.len(), lcid);
            return Ok(());
        }

        let frame = LinkFrame::new(lcid, tti, pdu.to_vec());
        if self.rng.gen_bool(self.config.duplicate) {
            self.stats.duplicated += 1;
            self.enqueue(frame.clone())?;
        }
        self.enqueue(frame)
    }

    /// Frames due by `tti`, in arrival order
    pub fn receive(&mut self, tti: u64) -> Vec<LinkFrame> {
        let later = self.in_flight.split_off(&(tti + 1));
        let due: Vec<LinkFrame> = std::mem::replace(&mut self.in_flight, later)
            .into_values()
            .flatten()
            .collect();
        self.queued -= due.len();
        self.stats.delivered += due.len() as u64;
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcid() -> Lcid {
        Lcid::new(3).unwrap()
    }

    #[test]
    fn test_clean_link_delivers_next_tti() {
        let config = LinkConfig {
            loss: 0.0,
            duplicate: 0.0,
            max_delay_ttis: 0,
            capacity: 16,
        };
        let mut link = ImpairedLink::new("test", config, 1);
        link.send(5, lcid(), &Bytes::from_static(b"abc")).unwrap();
        assert!(link.receive(5).is_empty());

        let frames = link.receive(6);
        assert_eq!(frames, vec![LinkFrame::new(lcid(), 5, b"abc".to_vec())]);
        assert_eq!(link.stats().delivered, 1);
    }

    #[test]
    fn test_total_loss_and_duplication() {
        let lossy = LinkConfig {
            loss: 1.0,
            ..LinkConfig::default()
        };
        let mut link = ImpairedLink::new("lossy", lossy, 2);
        link.send(0, lcid(), &Bytes::from_static(b"x")).unwrap();
        assert!(link.receive(100).is_empty());
        assert_eq!(link.stats().dropped, 1);

        let doubling = LinkConfig {
            loss: 0.0,
            duplicate: 1.0,
            max_delay_ttis: 0,
            capacity: 16,
        };
        let mut link = ImpairedLink::new("dup", doubling, 3);
        link.send(0, lcid(), &Bytes::from_static(b"x")).unwrap();
        assert_eq!(link.receive(1).len(), 2);
    }

    #[test]
    fn test_capacity_overflow() {
        let config = LinkConfig {
            loss: 0.0,
            duplicate: 0.0,
            max_delay_ttis: 0,
            capacity: 1,
        };
        let mut link = ImpairedLink::new("small", config, 4);
        link.send(0, lcid(), &Bytes::from_static(b"a")).unwrap();
        let result = link.send(0, lcid(), &Bytes::from_static(b"b"));
        assert!(matches!(result, Err(InterfaceError::BufferFull)));
        assert_eq!(link.stats().overflow, 1);
    }

    #[test]
    fn test_same_seed_same_schedule() {
        let config = LinkConfig {
            loss: 0.3,
            duplicate: 0.1,
            max_delay_ttis: 4,
            capacity: 1024,
        };
        let run = |seed| {
            let mut link = ImpairedLink::new("seeded", config.clone(), seed);
            for tti in 0..100 {
                let _ = link.send(tti, lcid(), &Bytes::from(vec![tti as u8]));
            }
            link.receive(200)
        };
        assert_eq!(run(9), run(9));
    }
}
