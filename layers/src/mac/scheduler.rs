//! Round-robin byte-grant scheduler
//!
//! Each TTI has a fixed byte budget. Bearers with data are served in turn,
//! starting one position later every TTI, until the budget is spent or no
//! bearer can use what is left.

use bytes::Bytes;
use common::types::Lcid;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::rlc::Rlc;

/// Smallest grant worth offering: one header byte plus one data byte
const MIN_GRANT: usize = 2;

/// Grant budget per TTI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantConfig {
    /// Bytes available to all bearers in one TTI
    #[serde(default = "default_tti_bytes")]
    pub tti_bytes: usize,
    /// Largest single grant, 0 for no limit
    #[serde(default)]
    pub max_grant: usize,
}

fn default_tti_bytes() -> usize {
    1500
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            tti_bytes: default_tti_bytes(),
            max_grant: 0,
        }
    }
}

/// A PDU pulled from a bearer during a TTI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledPdu {
    pub lcid: Lcid,
    pub pdu: Bytes,
}

/// MAC grant scheduler
#[derive(Debug)]
pub struct GrantScheduler {
    config: GrantConfig,
    /// Rotation offset into the bearer list
    next: usize,
    tti: u64,
}

impl GrantScheduler {
    pub fn new(config: GrantConfig) -> Self {
        Self {
            config,
            next: 0,
            tti: 0,
        }
    }

    /// TTIs scheduled so far
    pub fn tti(&self) -> u64 {
        self.tti
    }

    fn grant_for(&self, buffer_state: usize, remaining: usize) -> usize {
        let grant = buffer_state.min(remaining);
        if self.config.max_grant > 0 {
            grant.min(self.config.max_grant)
        } else {
            grant
        }
    }

    /// Distribute one TTI's budget over the bearers of `rlc`
    pub fn run_tti(&mut self, rlc: &Rlc) -> Vec<ScheduledPdu> {
        let mut scheduled = Vec::new();
        let mut lcids = rlc.active_lcids();
        self.tti += 1;
        if lcids.is_empty() {
            return scheduled;
        }
        let start = self.next % lcids.len();
        lcids.rotate_left(start);
        self.next = self.next.wrapping_add(1);

        let mut remaining = self.config.tti_bytes;
        loop {
            let mut progress = false;
            for &lcid in &lcids {
                if remaining < MIN_GRANT {
                    break;
                }
                let buffer_state = rlc.get_buffer_state(lcid);
                if buffer_state == 0 {
                    continue;
                }
                let grant = self.grant_for(buffer_state, remaining);
                let pdu = rlc.read_pdu(lcid, grant);
                if pdu.is_empty() {
                    trace!("{} could not use a {} byte grant", lcid, grant);
                    continue;
                }
                remaining -= pdu.len();
                scheduled.push(ScheduledPdu { lcid, pdu });
                progress = true;
            }
            if !progress || remaining < MIN_GRANT {
                break;
            }
        }

        debug!(
            "TTI {}: {} PDUs, {} of {} bytes used",
            self.tti,
            scheduled.len(),
            self.config.tti_bytes - remaining,
            self.config.tti_bytes
        );
        scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::RlcConfig;
    use interfaces::ChannelUpper;

    fn rlc_with_um_bearers(lcids: &[u8]) -> (Rlc, Vec<Lcid>) {
        let (upper, _events) = ChannelUpper::new();
        let rlc = Rlc::new(upper);
        let lcids: Vec<Lcid> = lcids.iter().map(|&l| Lcid::new(l).unwrap()).collect();
        for &lcid in &lcids {
            rlc.add_bearer(lcid, RlcConfig::um(10)).unwrap();
        }
        (rlc, lcids)
    }

    #[test]
    fn test_empty_rlc_schedules_nothing() {
        let (rlc, _) = rlc_with_um_bearers(&[]);
        let mut scheduler = GrantScheduler::new(GrantConfig::default());
        assert!(scheduler.run_tti(&rlc).is_empty());
        assert_eq!(scheduler.tti(), 1);
    }

    #[test]
    fn test_budget_is_respected() {
        let (rlc, lcids) = rlc_with_um_bearers(&[1, 2]);
        for &lcid in &lcids {
            rlc.write_sdu(lcid, Bytes::from(vec![0u8; 1000])).unwrap();
        }

        let mut scheduler = GrantScheduler::new(GrantConfig {
            tti_bytes: 600,
            max_grant: 0,
        });
        let pdus = scheduler.run_tti(&rlc);
        let used: usize = pdus.iter().map(|p| p.pdu.len()).sum();
        assert!(used <= 600);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].lcid, lcids[0]);
    }

    #[test]
    fn test_round_robin_rotates_first_bearer() {
        let (rlc, lcids) = rlc_with_um_bearers(&[1, 2, 3]);
        let mut scheduler = GrantScheduler::new(GrantConfig {
            tti_bytes: 100,
            max_grant: 50,
        });

        let mut firsts = Vec::new();
        for _ in 0..3 {
            for &lcid in &lcids {
                rlc.write_sdu(lcid, Bytes::from(vec![1u8; 200])).unwrap();
            }
            let pdus = scheduler.run_tti(&rlc);
            assert_eq!(pdus.len(), 2);
            firsts.push(pdus[0].lcid);
        }
        assert_eq!(firsts, lcids);
    }

    #[test]
    fn test_small_sdus_drain_in_one_tti() {
        let (rlc, lcids) = rlc_with_um_bearers(&[4, 5]);
        for &lcid in &lcids {
            rlc.write_sdu(lcid, Bytes::from_static(b"ping")).unwrap();
        }
        let mut scheduler = GrantScheduler::new(GrantConfig::default());
        let pdus = scheduler.run_tti(&rlc);
        assert_eq!(pdus.len(), 2);
        assert!(lcids.iter().all(|&lcid| rlc.get_buffer_state(lcid) == 0));
    }
}
