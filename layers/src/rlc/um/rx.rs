//! UM receive side: reordering window, t-Reordering and reassembly
//! (TS 36.322 section 5.1.2.2)

use bytes::Bytes;
use common::buffer_pool::BufferPool;
use interfaces::Timer;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::rlc::entity::Effects;
use crate::rlc::header::{FramingInfo, PduFormat};
use crate::rlc::metrics::RlcBearerMetrics;
use crate::rlc::reassembly::Reassembler;
use crate::rlc::sn::SnSpace;

#[derive(Debug)]
struct UmPdu {
    fi: FramingInfo,
    li: Vec<u16>,
    payload: Bytes,
}

#[derive(Debug)]
pub struct UmRx {
    format: PduFormat,
    space: SnSpace,
    window: u32,
    /// VR(UR), earliest SN still considered for reordering
    vr_ur: u32,
    /// VR(UX), SN following the one that triggered t-Reordering
    vr_ux: u32,
    /// VR(UH), SN following the highest received
    vr_uh: u32,
    buffer: HashMap<u32, UmPdu>,
    reassembler: Reassembler,
    reordering: Timer,
}

impl UmRx {
    pub fn new(format: PduFormat, space: SnSpace, pool: Arc<BufferPool>, reordering: Timer) -> Self {
        Self {
            format,
            space,
            window: space.half(),
            vr_ur: 0,
            vr_ux: 0,
            vr_uh: 0,
            buffer: HashMap::new(),
            reassembler: Reassembler::new(pool),
            reordering,
        }
    }

    pub fn vr_ur(&self) -> u32 {
        self.vr_ur
    }

    pub fn vr_uh(&self) -> u32 {
        self.vr_uh
    }

    pub fn reordering_timer(&self) -> &Timer {
        &self.reordering
    }

    fn lower_edge(&self) -> u32 {
        self.space.sub(self.vr_uh, self.window)
    }

    /// Position relative to the lower edge of the reordering window
    fn pos(&self, sn: u32) -> u32 {
        self.space.offset(sn, self.lower_edge())
    }

    fn in_reordering_window(&self, sn: u32) -> bool {
        self.pos(sn) < self.window
    }

    pub(crate) fn write_pdu(&mut self, pdu: &[u8], fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        metrics.record_rx_pdu(pdu.len());
        let (header, header_len) = match self.format.unpack(pdu) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding UMD PDU: {}", e);
                metrics.num_malformed_pdus += 1;
                return;
            }
        };
        let sn = header.sn;

        if self.pos(sn) < self.pos(self.vr_ur) || self.buffer.contains_key(&sn) {
            debug!(
                "Discarding UMD PDU SN={} (VR(UR)={}, VR(UH)={})",
                sn, self.vr_ur, self.vr_uh
            );
            return;
        }

        self.buffer.insert(
            sn,
            UmPdu {
                fi: header.fi,
                li: header.li,
                payload: Bytes::copy_from_slice(&pdu[header_len..]),
            },
        );

        if !self.in_reordering_window(sn) {
            self.vr_uh = self.space.inc(sn);
            let lower = self.lower_edge();
            if !self.in_reordering_window(self.vr_ur) {
                self.flush_to(lower, fx, metrics);
                self.vr_ur = lower;
            }
        }

        if self.buffer.contains_key(&self.vr_ur) {
            self.advance_vr_ur(fx, metrics);
        }

        if self.reordering.is_running() {
            let ux = self.pos(self.vr_ux);
            if ux <= self.pos(self.vr_ur) || (!self.in_reordering_window(self.vr_ux) && self.vr_ux != self.vr_uh) {
                debug!("Stopping t-Reordering (VR(UX)={})", self.vr_ux);
                self.reordering.stop();
            }
        }
        if !self.reordering.is_running() && self.pos(self.vr_ur) < self.pos(self.vr_uh) {
            self.start_reordering(fx, metrics);
        }
    }

    pub(crate) fn on_reordering_expiry(&mut self, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        debug!(
            "t-Reordering expired: VR(UR)={} VR(UX)={} VR(UH)={}",
            self.vr_ur, self.vr_ux, self.vr_uh
        );
        if self.pos(self.vr_ur) < self.pos(self.vr_ux) {
            self.flush_to(self.vr_ux, fx, metrics);
            self.vr_ur = self.vr_ux;
        }
        self.advance_vr_ur(fx, metrics);

        if self.pos(self.vr_ur) < self.pos(self.vr_uh) {
            self.start_reordering(fx, metrics);
        }
    }

    /// Deliver what the buffer holds and return to the initial state
    pub(crate) fn reestablish(&mut self, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        self.reordering.stop();
        let end = self.vr_uh;
        self.flush_to(end, fx, metrics);
        self.buffer.clear();
        self.reassembler.reset();
        self.vr_ur = 0;
        self.vr_ux = 0;
        self.vr_uh = 0;
    }

    fn start_reordering(&mut self, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        self.vr_ux = self.vr_uh;
        if self.reordering.is_valid() {
            self.reordering.start();
        } else {
            self.on_reordering_expiry(fx, metrics);
        }
    }

    /// Reassemble everything in `[VR(UR), end)`, counting missing PDUs as lost
    fn flush_to(&mut self, end: u32, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        for sn in self.space.range(self.vr_ur, end) {
            match self.buffer.remove(&sn) {
                Some(pdu) => self.reassemble(sn, pdu, fx, metrics),
                None => {
                    debug!("UMD PDU SN={} lost", sn);
                    metrics.num_lost_pdus += 1;
                }
            }
        }
    }

    fn advance_vr_ur(&mut self, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        while let Some(pdu) = self.buffer.remove(&self.vr_ur) {
            self.reassemble(self.vr_ur, pdu, fx, metrics);
            self.vr_ur = self.space.inc(self.vr_ur);
        }
    }

    fn reassemble(&mut self, sn: u32, pdu: UmPdu, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        metrics.num_lost_sdus += self.reassembler.push(
            &self.space,
            sn,
            pdu.fi,
            &pdu.li,
            &pdu.payload,
            &mut fx.sdus,
        );
    }
}
