//! AM receive side: reception buffer with byte segment tracking, t-Reordering,
//! STATUS reporting under t-StatusProhibit (TS 36.322 sections 5.1.3.2 and
//! 5.2.3)

use bytes::{Bytes, BytesMut};
use common::buffer_pool::BufferPool;
use common::utils::bytes_to_hex;
use interfaces::Timer;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::rlc::entity::Effects;
use crate::rlc::header::{FramingInfo, PduFormat, MAX_SEGMENT_OFFSET};
use crate::rlc::metrics::RlcBearerMetrics;
use crate::rlc::reassembly::Reassembler;
use crate::rlc::sn::SnSpace;
use crate::rlc::status::{NackRecord, StatusCodec, StatusPdu, SO_END_OF_PDU};

#[derive(Debug)]
struct RxSegment {
    so: usize,
    /// Carries the last byte of the PDU
    last: bool,
    fi: FramingInfo,
    li: Vec<u16>,
    payload: Bytes,
}

/// Everything received for one SN
#[derive(Debug, Default)]
struct RxPdu {
    segments: Vec<RxSegment>,
    /// Received byte ranges, sorted and merged
    covered: Vec<(usize, usize)>,
    /// Data field length, known once the last segment arrived
    total_len: Option<usize>,
}

impl RxPdu {
    fn covers(&self, start: usize, end: usize) -> bool {
        self.covered.iter().any(|&(s, e)| s <= start && end <= e)
    }

    /// Store a segment unless its bytes were all received already
    fn insert(&mut self, segment: RxSegment) -> bool {
        let start = segment.so;
        let end = start + segment.payload.len();
        if self.covers(start, end) {
            return false;
        }
        if segment.last {
            self.total_len = Some(end);
        }

        self.covered.push((start, end));
        self.covered.sort_unstable();
        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.covered.len());
        for &(s, e) in &self.covered {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.covered = merged;
        self.segments.push(segment);
        true
    }

    fn is_complete(&self) -> bool {
        match (self.total_len, self.covered.first()) {
            (Some(len), Some(&(0, end))) => end >= len,
            _ => false,
        }
    }

    /// Missing byte ranges `[start, end)`, `None` for an open tail
    fn missing(&self) -> Vec<(usize, Option<usize>)> {
        let mut gaps = Vec::new();
        let mut pos = 0;
        for &(s, e) in &self.covered {
            if s > pos {
                gaps.push((pos, Some(s)));
            }
            pos = pos.max(e);
        }
        match self.total_len {
            Some(len) if pos < len => gaps.push((pos, Some(len))),
            None => gaps.push((pos, None)),
            _ => {}
        }
        gaps
    }

    /// Rebuild the original data field with its framing info and LIs
    ///
    /// Returns `None` when an SDU span does not fit a length indicator.
    fn assemble(self) -> Option<(FramingInfo, Vec<u16>, Bytes)> {
        let len = self.total_len.unwrap_or(0);
        let mut data = BytesMut::zeroed(len);
        let mut boundaries = BTreeSet::new();
        let mut starts_sdu = true;
        let mut ends_sdu = true;

        for segment in &self.segments {
            let end = (segment.so + segment.payload.len()).min(len);
            if segment.so < end {
                data[segment.so..end].copy_from_slice(&segment.payload[..end - segment.so]);
            }

            let mut pos = segment.so;
            for &li in &segment.li {
                pos += li as usize;
                boundaries.insert(pos);
            }

            if segment.so == 0 {
                starts_sdu = segment.fi.starts_sdu();
            } else if segment.fi.starts_sdu() {
                boundaries.insert(segment.so);
            }
            if segment.last {
                ends_sdu = segment.fi.ends_sdu();
            } else if segment.fi.ends_sdu() {
                boundaries.insert(end);
            }
        }

        let mut li = Vec::with_capacity(boundaries.len());
        let mut prev = 0;
        for b in boundaries.into_iter().filter(|&b| b > 0 && b < len) {
            li.push(u16::try_from(b - prev).ok()?);
            prev = b;
        }

        Some((FramingInfo::from_alignment(starts_sdu, ends_sdu), li, data.freeze()))
    }
}

#[derive(Debug)]
pub struct AmRx {
    format: PduFormat,
    space: SnSpace,
    codec: StatusCodec,
    window: u32,

    /// VR(R), earliest SN not yet completely received
    vr_r: u32,
    /// VR(X), SN following the one that triggered t-Reordering
    vr_x: u32,
    /// VR(MS), highest SN a STATUS can acknowledge
    vr_ms: u32,
    /// VR(H), SN following the highest received
    vr_h: u32,

    rx_window: HashMap<u32, RxPdu>,
    reassembler: Reassembler,
    reordering: Timer,
    status_prohibit: Timer,
    do_status: bool,
    /// Highest polled SN whose report waits for VR(MS) to pass it
    pending_poll: Option<u32>,
}

impl AmRx {
    pub fn new(
        format: PduFormat,
        space: SnSpace,
        window: u32,
        pool: Arc<BufferPool>,
        reordering: Timer,
        status_prohibit: Timer,
    ) -> Self {
        Self {
            format,
            space,
            codec: StatusCodec::new(space),
            window,
            vr_r: 0,
            vr_x: 0,
            vr_ms: 0,
            vr_h: 0,
            rx_window: HashMap::new(),
            reassembler: Reassembler::new(pool),
            reordering,
            status_prohibit,
            do_status: false,
            pending_poll: None,
        }
    }

    pub fn vr_r(&self) -> u32 {
        self.vr_r
    }

    pub fn vr_mr(&self) -> u32 {
        self.space.add(self.vr_r, self.window)
    }

    pub fn vr_ms(&self) -> u32 {
        self.vr_ms
    }

    pub fn vr_h(&self) -> u32 {
        self.vr_h
    }

    pub fn reordering_timer(&self) -> &Timer {
        &self.reordering
    }

    pub fn status_prohibit_timer(&self) -> &Timer {
        &self.status_prohibit
    }

    /// A STATUS report is triggered, whether or not it may be sent yet
    pub fn status_triggered(&self) -> bool {
        self.do_status
    }

    pub fn status_ready(&self) -> bool {
        self.do_status && !self.status_prohibit.is_running()
    }

    /// Size of the STATUS PDU that would be sent now
    pub fn status_len(&self) -> usize {
        if !self.status_ready() {
            return 0;
        }
        self.status_pdu(usize::MAX)
            .map_or(0, |status| self.codec.packed_len(&status))
    }

    fn pos(&self, sn: u32) -> u32 {
        self.space.offset(sn, self.vr_r)
    }

    fn in_rx_window(&self, sn: u32) -> bool {
        self.pos(sn) < self.window
    }

    fn is_complete(&self, sn: u32) -> bool {
        self.rx_window.get(&sn).is_some_and(RxPdu::is_complete)
    }

    fn below_vr_ms(&self, sn: u32) -> bool {
        let distance = self.space.offset(self.vr_ms, sn);
        distance > 0 && distance <= self.window
    }

    fn trigger_status(&mut self, reason: &str) {
        if !self.do_status {
            debug!("STATUS triggered: {}", reason);
        }
        self.do_status = true;
    }

    fn handle_poll(&mut self, sn: u32) {
        if self.below_vr_ms(sn) || !self.in_rx_window(sn) {
            self.trigger_status("poll");
            return;
        }
        let replace = match self.pending_poll {
            Some(pending) => self.space.lt(pending, sn, self.vr_r),
            None => true,
        };
        if replace {
            self.pending_poll = Some(sn);
        }
    }

    pub(crate) fn write_pdu(&mut self, pdu: &[u8], fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        metrics.record_rx_pdu(pdu.len());
        let (header, header_len) = match self.format.unpack(pdu) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Discarding AMD PDU: {}", e);
                metrics.num_malformed_pdus += 1;
                return;
            }
        };
        let sn = header.sn;
        trace!("AMD PDU bytes: {}", bytes_to_hex(pdu));

        if !self.in_rx_window(sn) {
            debug!(
                "Discarding AMD PDU SN={} outside [VR(R)={}, VR(MR)={})",
                sn,
                self.vr_r,
                self.vr_mr()
            );
            if header.poll {
                self.trigger_status("poll outside the window");
            }
            return;
        }

        let so = header.segment.map_or(0, |s| s.so as usize);
        if so + (pdu.len() - header_len) > MAX_SEGMENT_OFFSET as usize {
            warn!(
                "Discarding AMD PDU SN={}: data ends past the segment offset space",
                sn
            );
            metrics.num_malformed_pdus += 1;
            return;
        }

        let segment = RxSegment {
            so,
            last: header.segment.map_or(true, |s| s.last),
            fi: header.fi,
            li: header.li,
            payload: Bytes::copy_from_slice(&pdu[header_len..]),
        };
        let entry = self.rx_window.entry(sn).or_default();
        if entry.is_complete() || !entry.insert(segment) {
            debug!("Discarding duplicate AMD PDU SN={}", sn);
            if header.poll {
                self.handle_poll(sn);
            }
            return;
        }

        if !self.space.lt(sn, self.vr_h, self.vr_r) {
            self.vr_h = self.space.inc(sn);
        }

        if self.is_complete(self.vr_ms) {
            while self.is_complete(self.vr_ms) {
                self.vr_ms = self.space.inc(self.vr_ms);
            }
        }

        if sn == self.vr_r && self.is_complete(sn) {
            let start = self.vr_r;
            while self.is_complete(self.vr_r) {
                self.vr_r = self.space.inc(self.vr_r);
            }
            for done in self.space.range(start, self.vr_r) {
                self.reassemble(done, fx, metrics);
            }
        }

        if self.reordering.is_running()
            && (self.vr_x == self.vr_r || (!self.in_rx_window(self.vr_x) && self.vr_x != self.vr_mr()))
        {
            debug!("Stopping t-Reordering (VR(X)={})", self.vr_x);
            self.reordering.stop();
        }
        if !self.reordering.is_running() && self.pos(self.vr_h) > 0 {
            self.start_reordering(fx, metrics);
        }

        if header.poll {
            self.handle_poll(sn);
        }
        if let Some(pending) = self.pending_poll {
            if self.below_vr_ms(pending) {
                self.pending_poll = None;
                self.trigger_status("polled SN received in sequence");
            }
        }
    }

    fn start_reordering(&mut self, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        self.vr_x = self.vr_h;
        if self.reordering.is_valid() {
            self.reordering.start();
        } else {
            self.on_reordering_expiry(fx, metrics);
        }
    }

    pub(crate) fn on_reordering_expiry(&mut self, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        debug!(
            "t-Reordering expired: VR(R)={} VR(X)={} VR(MS)={} VR(H)={}",
            self.vr_r, self.vr_x, self.vr_ms, self.vr_h
        );
        let mut sn = self.vr_x;
        while self.is_complete(sn) {
            sn = self.space.inc(sn);
        }
        self.vr_ms = sn;
        self.pending_poll = None;
        self.trigger_status("t-Reordering expired");

        if self.pos(self.vr_h) > self.pos(self.vr_ms) {
            self.start_reordering(fx, metrics);
        }
    }

    /// Nothing to do beyond making a deferred report sendable
    pub fn on_status_prohibit_expiry(&mut self) {
        if self.do_status {
            debug!("t-StatusProhibit expired with a STATUS pending");
        }
    }

    fn reassemble(&mut self, sn: u32, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        let Some(pdu) = self.rx_window.remove(&sn) else {
            return;
        };
        let Some((fi, li, payload)) = pdu.assemble() else {
            warn!("Dropping AMD PDU SN={}: SDU spans exceed the LI range", sn);
            metrics.num_malformed_pdus += 1;
            return;
        };
        metrics.num_lost_sdus += self
            .reassembler
            .push(&self.space, sn, fi, &li, &payload, &mut fx.sdus);
    }

    /// STATUS for a grant of `budget` bytes, truncated when NACKs do not fit
    fn status_pdu(&self, budget: usize) -> Option<StatusPdu> {
        let mut bits = self.codec.fixed_bits();
        if (bits + 7) / 8 > budget {
            return None;
        }

        let mut status = StatusPdu {
            ack_sn: self.vr_h,
            nacks: Vec::new(),
        };
        'sns: for sn in self.space.range(self.vr_r, self.vr_h) {
            let records: Vec<NackRecord> = match self.rx_window.get(&sn) {
                None => vec![NackRecord::whole(sn)],
                Some(pdu) if pdu.is_complete() => continue,
                // a gap that cannot be expressed in SO fields NACKs the whole PDU
                Some(pdu) => pdu
                    .missing()
                    .into_iter()
                    .map(|(start, end)| {
                        let start = u16::try_from(start).ok()?;
                        let end = match end {
                            Some(e) => u16::try_from(e - 1).ok().filter(|&e| e < SO_END_OF_PDU)?,
                            None => SO_END_OF_PDU,
                        };
                        Some(NackRecord::range(sn, start, end))
                    })
                    .collect::<Option<Vec<_>>>()
                    .unwrap_or_else(|| vec![NackRecord::whole(sn)]),
            };

            for record in records {
                let needed = bits + self.codec.nack_bits(&record);
                if (needed + 7) / 8 > budget {
                    status.nacks.retain(|n| n.sn != sn);
                    status.ack_sn = sn;
                    break 'sns;
                }
                bits = needed;
                status.nacks.push(record);
            }
        }
        Some(status)
    }

    /// Build the pending STATUS PDU if one may be sent and fits `budget`
    pub fn build_status(&mut self, budget: usize, metrics: &mut RlcBearerMetrics) -> Option<Bytes> {
        if !self.status_ready() {
            return None;
        }
        let status = self.status_pdu(budget)?;

        let mut pdu = BytesMut::with_capacity(self.codec.packed_len(&status));
        self.codec.pack(&status, &mut pdu);
        debug!(
            "STATUS PDU ACK_SN={} NACKs={:?} len={}",
            status.ack_sn,
            status.nacks.iter().map(|n| n.sn).collect::<Vec<_>>(),
            pdu.len()
        );

        self.do_status = false;
        self.status_prohibit.start();
        metrics.record_tx_pdu(pdu.len());
        Some(pdu.freeze())
    }

    /// Deliver what is complete and return to the initial state
    pub(crate) fn reestablish(&mut self, fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        self.reordering.stop();
        self.status_prohibit.stop();
        for sn in self.space.range(self.vr_r, self.vr_h) {
            if self.is_complete(sn) {
                self.reassemble(sn, fx, metrics);
            }
        }
        self.rx_window.clear();
        self.reassembler.reset();
        self.vr_r = 0;
        self.vr_x = 0;
        self.vr_ms = 0;
        self.vr_h = 0;
        self.do_status = false;
        self.pending_poll = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::am::AmTx;
    use crate::rlc::config::RlcConfig;
    use crate::rlc::header::{DataPduHeader, SegmentOffset};
    use common::types::SnFieldWidth;
    use interfaces::{TimerKind, TimerService};

    struct Harness {
        format: PduFormat,
        tx: AmTx,
        rx: AmRx,
        timers: TimerService,
        metrics: RlcBearerMetrics,
    }

    impl Harness {
        fn new(config: RlcConfig) -> Self {
            let (timers, _events) = TimerService::new();
            let poll = timers.create_timer(1, TimerKind::PollRetransmit);
            poll.set_duration(config.t_poll_retransmit_ms);
            let reordering = timers.create_timer(2, TimerKind::Reordering);
            reordering.set_duration(config.t_reordering_ms);
            let prohibit = timers.create_timer(2, TimerKind::StatusProhibit);
            prohibit.set_duration(config.t_status_prohibit_ms);

            let format = config.pdu_format().unwrap();
            let space = SnSpace::new(config.sn_width().unwrap());
            let window = config.window_size().unwrap();
            Self {
                format,
                tx: AmTx::new(format, space, window, &config, poll),
                rx: AmRx::new(format, space, window, BufferPool::new(16, 9000), reordering, prohibit),
                timers,
                metrics: RlcBearerMetrics::default(),
            }
        }

        /// Queue every SDU first, then send one PDU per SDU
        fn pdus(&mut self, sizes: &[usize]) -> Vec<Bytes> {
            for (i, &size) in sizes.iter().enumerate() {
                self.tx.write_sdu(Bytes::from(vec![i as u8; size])).unwrap();
            }
            let overhead = self.format.fixed_len(false);
            let mut fx = Effects::default();
            sizes
                .iter()
                .map(|&size| self.tx.read_pdu(size + overhead, &mut fx, &mut self.metrics).unwrap())
                .collect()
        }

        fn receive(&mut self, pdu: &[u8]) -> Vec<Bytes> {
            let mut fx = Effects::default();
            self.rx.write_pdu(pdu, &mut fx, &mut self.metrics);
            fx.sdus
        }

        fn status(&mut self) -> StatusPdu {
            let bytes = self.rx.build_status(1000, &mut self.metrics).unwrap();
            self.rx.codec.unpack(&bytes).unwrap()
        }
    }

    fn segment_pdu(sn: u32, so: u16, last: bool, fi: FramingInfo, payload: &[u8]) -> Vec<u8> {
        let header = DataPduHeader {
            sn,
            fi,
            segment: Some(SegmentOffset { so, last }),
            ..Default::default()
        };
        let mut pdu = BytesMut::new();
        PduFormat::Am10.pack(&header, &mut pdu);
        pdu.extend_from_slice(payload);
        pdu.to_vec()
    }

    #[test]
    fn test_in_sequence_delivery_and_poll() {
        let mut h = Harness::new(RlcConfig::am());
        let pdus = h.pdus(&[5, 6, 7]);
        for pdu in &pdus {
            assert_eq!(h.receive(pdu).len(), 1);
        }
        assert_eq!((h.rx.vr_r(), h.rx.vr_ms(), h.rx.vr_h()), (3, 3, 3));
        // the last PDU emptied the sender's queue and carried a poll
        assert!(h.rx.status_ready());
        assert_eq!(
            h.status(),
            StatusPdu {
                ack_sn: 3,
                nacks: vec![]
            }
        );
        assert!(h.rx.status_prohibit_timer().is_running());
    }

    #[test]
    fn test_duplicate_delivered_once() {
        let mut h = Harness::new(RlcConfig::am());
        let pdus = h.pdus(&[5, 6]);
        assert_eq!(h.receive(&pdus[0]).len(), 1);
        assert!(h.receive(&pdus[0]).is_empty());
        assert_eq!(h.receive(&pdus[1]).len(), 1);
        assert!(h.receive(&pdus[1]).is_empty());
        assert_eq!(h.metrics.num_rx_pdus, 4);
    }

    #[test]
    fn test_gap_reported_as_nack() {
        let mut h = Harness::new(RlcConfig::am());
        let pdus = h.pdus(&[5, 6, 7, 8]);
        h.receive(&pdus[0]);
        h.receive(&pdus[2]);
        h.receive(&pdus[3]);
        assert!(h.rx.reordering_timer().is_running());
        assert_eq!(h.rx.vr_r(), 1);

        // the poll on SN 3 waits for VR(MS) to pass it
        assert!(!h.rx.status_triggered());

        let mut fx = Effects::default();
        h.rx.on_reordering_expiry(&mut fx, &mut h.metrics);
        assert_eq!(h.rx.vr_ms(), 4);
        assert_eq!(
            h.status(),
            StatusPdu {
                ack_sn: 4,
                nacks: vec![NackRecord::whole(1)]
            }
        );

        let sdus = h.receive(&pdus[1]);
        assert_eq!(sdus.iter().map(|s| s[0]).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(h.rx.vr_r(), 4);
        assert!(!h.rx.reordering_timer().is_running());
    }

    #[test]
    fn test_status_prohibit_defers_report() {
        let mut h = Harness::new(RlcConfig::am());
        let pdus = h.pdus(&[5, 6]);
        h.receive(&pdus[0]);
        h.receive(&pdus[1]);
        h.status();

        let more = h.pdus(&[4]);
        h.receive(&more[0]);
        assert!(h.rx.status_triggered());
        assert!(!h.rx.status_ready());
        assert_eq!(h.rx.status_len(), 0);

        h.timers.tick(5);
        assert!(h.rx.status_ready());
        assert_eq!(h.status().ack_sn, 3);
    }

    #[test]
    fn test_out_of_window_poll_triggers_status() {
        let mut h = Harness::new(RlcConfig::am());
        let header = DataPduHeader {
            sn: 600,
            poll: true,
            ..Default::default()
        };
        let mut pdu = BytesMut::new();
        PduFormat::Am10.pack(&header, &mut pdu);
        pdu.extend_from_slice(b"late");

        assert!(h.receive(&pdu).is_empty());
        assert_eq!(h.rx.vr_h(), 0);
        assert!(h.rx.status_ready());
    }

    #[test]
    fn test_segments_reassemble_out_of_order() {
        let mut h = Harness::new(RlcConfig::am());
        let sdu = b"the quick brown fox";
        let tail = segment_pdu(0, 10, true, FramingInfo::NOT_START_ALIGNED, &sdu[10..]);
        let head = segment_pdu(0, 0, false, FramingInfo::NOT_END_ALIGNED, &sdu[..6]);
        let middle = segment_pdu(0, 4, false, FramingInfo::all(), &sdu[4..12]);

        assert!(h.receive(&tail).is_empty());
        assert!(h.receive(&head).is_empty());
        assert_eq!(h.rx.rx_window[&0].missing(), vec![(6, Some(10))]);
        assert_eq!(
            h.rx.status_pdu(100).unwrap().nacks,
            vec![NackRecord::range(0, 6, 9)]
        );

        let sdus = h.receive(&middle);
        assert_eq!(sdus, vec![Bytes::from_static(sdu)]);
        assert_eq!(h.rx.vr_r(), 1);
    }

    #[test]
    fn test_segment_boundaries_rebuild_length_indicators() {
        let mut h = Harness::new(RlcConfig::am());
        // data field "aaaa|bbbbbb" split right after the SDU boundary
        let first = segment_pdu(0, 0, false, FramingInfo::empty(), b"aaaa");
        let second = segment_pdu(0, 4, true, FramingInfo::empty(), b"bbbbbb");

        h.receive(&second);
        let sdus = h.receive(&first);
        assert_eq!(
            sdus,
            vec![Bytes::from_static(b"aaaa"), Bytes::from_static(b"bbbbbb")]
        );
    }

    #[test]
    fn test_open_tail_nack_reaches_end() {
        let mut h = Harness::new(RlcConfig::am());
        h.receive(&segment_pdu(0, 0, false, FramingInfo::NOT_END_ALIGNED, b"abc"));
        h.receive(&segment_pdu(1, 0, true, FramingInfo::empty(), b"x"));
        assert_eq!(
            h.rx.status_pdu(100).unwrap(),
            StatusPdu {
                ack_sn: 2,
                nacks: vec![NackRecord::range(0, 3, SO_END_OF_PDU)]
            }
        );
    }

    #[test]
    fn test_segment_past_offset_space_is_dropped() {
        let mut h = Harness::new(RlcConfig::am());
        let tail = segment_pdu(0, 0x7FF0, true, FramingInfo::NOT_START_ALIGNED, &[7; 32]);
        assert!(h.receive(&tail).is_empty());
        assert_eq!(h.metrics.num_malformed_pdus, 1);
        assert!(h.rx.rx_window.is_empty());
        assert_eq!(h.rx.vr_h(), 0);

        // the highest offset still inside the space is accepted
        let edge = segment_pdu(0, 0x7FEF, true, FramingInfo::NOT_START_ALIGNED, &[7; 16]);
        assert!(h.receive(&edge).is_empty());
        assert_eq!(h.metrics.num_malformed_pdus, 1);
        assert_eq!(
            h.rx.status_pdu(100).unwrap().nacks,
            vec![NackRecord::range(0, 0, 0x7FEE)]
        );
    }

    #[test]
    fn test_status_truncated_to_grant() {
        let mut h = Harness::new(RlcConfig::am());
        let pdus = h.pdus(&[1; 8]);
        for i in [0, 2, 4, 6, 7] {
            h.receive(&pdus[i]);
        }
        // 15 fixed bits plus 12 bits per NACK: room for two NACKs in 5 bytes
        let status = h.rx.status_pdu(5).unwrap();
        assert_eq!(status.ack_sn, 5);
        assert_eq!(status.nacks, vec![NackRecord::whole(1), NackRecord::whole(3)]);
        assert!(h.rx.status_pdu(1).is_none());

        let full = h.rx.status_pdu(100).unwrap();
        assert_eq!(full.ack_sn, 8);
        assert_eq!(full.nacks.len(), 3);
    }

    #[test]
    fn test_extended_sn_window() {
        let config = RlcConfig {
            sn_field_width: 16,
            ..RlcConfig::am()
        };
        let mut h = Harness::new(config);
        let pdus = h.pdus(&[3, 4]);
        h.receive(&pdus[1]);
        assert_eq!(h.rx.vr_mr(), 32768);
        assert_eq!(h.receive(&pdus[0]).len(), 2);
        assert_eq!(h.rx.vr_r(), 2);
    }

    #[test]
    fn test_reestablish_resets_window() {
        let mut h = Harness::new(RlcConfig::am());
        let pdus = h.pdus(&[5, 6]);
        h.receive(&pdus[1]);

        let mut fx = Effects::default();
        h.rx.reestablish(&mut fx, &mut h.metrics);
        assert_eq!(fx.sdus.len(), 1);
        assert_eq!((h.rx.vr_r(), h.rx.vr_h()), (0, 0));
        assert!(!h.rx.status_triggered());
        assert!(!h.rx.reordering_timer().is_running());
    }
}
