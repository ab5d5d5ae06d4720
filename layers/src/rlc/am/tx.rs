//! AM transmit side: transmission window, polling, STATUS handling and
//! retransmission with re-segmentation (TS 36.322 sections 5.1.3.1, 5.2.1
//! and 5.2.2)

use bytes::{Bytes, BytesMut};
use common::types::SduId;
use common::utils::bytes_to_hex;
use interfaces::{BufferState, Timer};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

use crate::rlc::config::RlcConfig;
use crate::rlc::entity::Effects;
use crate::rlc::header::{DataPduHeader, FramingInfo, PduFormat, SegmentOffset, MAX_SEGMENT_OFFSET};
use crate::rlc::metrics::RlcBearerMetrics;
use crate::rlc::sn::SnSpace;
use crate::rlc::status::{NackRecord, StatusCodec};
use crate::rlc::tx_queue::{SduQueue, SduSegment};
use crate::LayerError;

/// Whether `ack_sn` may acknowledge anything: it must lie in `[VT(A), VT(S)]`
/// and at most one window ahead of `VT(A)`.
pub fn ack_sn_in_tx_window(space: &SnSpace, window: u32, vt_a: u32, vt_s: u32, ack_sn: u32) -> bool {
    let offset = space.offset(ack_sn, vt_a);
    offset <= window && offset <= space.offset(vt_s, vt_a)
}

/// A transmitted AMD PDU kept until acknowledged
#[derive(Debug)]
struct TxPdu {
    /// Header as first transmitted, poll bit cleared
    header: DataPduHeader,
    payload: Bytes,
    sdus: Vec<SduSegment>,
    retx_count: u32,
    max_retx_notified: bool,
}

/// Byte range `[start, end)` of a PDU to retransmit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetxRequest {
    sn: u32,
    start: usize,
    end: usize,
}

#[derive(Debug, Default)]
struct SduProgress {
    /// Unacknowledged PDUs carrying part of the SDU
    outstanding: u32,
    /// The last byte has been transmitted
    fully_sent: bool,
}

#[derive(Debug)]
pub struct AmTx {
    format: PduFormat,
    space: SnSpace,
    codec: StatusCodec,
    window: u32,
    poll_pdu: u32,
    poll_byte: u32,
    max_retx_threshold: u32,

    queue: SduQueue,
    tx_window: HashMap<u32, TxPdu>,
    retx_queue: VecDeque<RetxRequest>,
    sdu_progress: HashMap<SduId, SduProgress>,

    /// VT(A), SN of the next PDU to be acknowledged in sequence
    vt_a: u32,
    /// VT(S), SN of the next new PDU
    vt_s: u32,
    poll_sn: u32,
    pdu_without_poll: u32,
    byte_without_poll: u32,
    poll_retx_expired: bool,
    poll_retransmit: Timer,
}

impl AmTx {
    pub fn new(format: PduFormat, space: SnSpace, window: u32, config: &RlcConfig, poll_retransmit: Timer) -> Self {
        Self {
            format,
            space,
            codec: StatusCodec::new(space),
            window,
            poll_pdu: config.poll_pdu,
            poll_byte: config.poll_byte,
            max_retx_threshold: config.max_retx_threshold,
            queue: SduQueue::new(config.tx_queue_length),
            tx_window: HashMap::new(),
            retx_queue: VecDeque::new(),
            sdu_progress: HashMap::new(),
            vt_a: 0,
            vt_s: 0,
            poll_sn: 0,
            pdu_without_poll: 0,
            byte_without_poll: 0,
            poll_retx_expired: false,
            poll_retransmit,
        }
    }

    /// Apply new polling and retransmission parameters without touching
    /// the SN state
    pub fn reconfigure(&mut self, window: u32, config: &RlcConfig) {
        self.window = window;
        self.poll_pdu = config.poll_pdu;
        self.poll_byte = config.poll_byte;
        self.max_retx_threshold = config.max_retx_threshold;
        self.queue.set_capacity(config.tx_queue_length);
        self.poll_retransmit.set_duration(config.t_poll_retransmit_ms);
    }

    pub fn vt_a(&self) -> u32 {
        self.vt_a
    }

    pub fn vt_s(&self) -> u32 {
        self.vt_s
    }

    pub fn poll_sn(&self) -> u32 {
        self.poll_sn
    }

    /// PDUs awaiting acknowledgement
    pub fn unacked_pdus(&self) -> usize {
        self.tx_window.len()
    }

    pub fn retx_queue_len(&self) -> usize {
        self.retx_queue.len()
    }

    pub fn poll_retransmit_timer(&self) -> &Timer {
        &self.poll_retransmit
    }

    pub fn is_window_stalled(&self) -> bool {
        !self.space.in_window(self.vt_s, self.vt_a, self.window)
    }

    pub fn write_sdu(&mut self, sdu: Bytes) -> Result<SduId, LayerError> {
        self.queue.push(sdu)
    }

    pub fn discard_sdu(&mut self, id: SduId) -> bool {
        self.queue.discard(id)
    }

    pub fn sdu_queue_is_full(&self) -> bool {
        self.queue.is_full()
    }

    fn stall_retx_due(&self) -> bool {
        self.is_window_stalled()
            && self.retx_queue.is_empty()
            && !self.poll_retransmit.is_running()
            && self.tx_window.contains_key(&self.vt_a)
    }

    fn retx_len(&self, pdu: &TxPdu, start: usize, end: usize) -> usize {
        if start == 0 && end >= pdu.payload.len() {
            self.format.packed_len(&pdu.header) + pdu.payload.len()
        } else {
            self.format.header_len(pdu.header.li.len(), true) + end.saturating_sub(start)
        }
    }

    /// Bytes needed for pending retransmissions and for new data
    pub fn buffer_state(&self) -> BufferState {
        let mut prio_tx: usize = self
            .retx_queue
            .iter()
            .filter_map(|req| {
                let pdu = self.tx_window.get(&req.sn)?;
                Some(self.retx_len(pdu, req.start, req.end))
            })
            .sum();

        let mut new_tx = 0;
        if !self.is_window_stalled() {
            new_tx = self.queue.required_bytes(self.format);
        } else if self.stall_retx_due() {
            if let Some(pdu) = self.tx_window.get(&self.vt_a) {
                prio_tx += self.retx_len(pdu, 0, pdu.payload.len());
            }
        }
        BufferState { new_tx, prio_tx }
    }

    /// Next PDU for a grant of `budget` bytes: retransmissions first, then new data
    pub(crate) fn read_pdu(&mut self, budget: usize, fx: &mut Effects, metrics: &mut RlcBearerMetrics) -> Option<Bytes> {
        if self.stall_retx_due() {
            debug!("Window stalled at VT(A)={}, retransmitting it", self.vt_a);
            self.consider_for_retx(self.vt_a, fx);
        }

        if let Some(pdu) = self.retransmit_pdu(budget, metrics) {
            return Some(pdu);
        }
        self.build_new_pdu(budget, metrics)
    }

    fn poll_required(&self) -> bool {
        (self.poll_pdu > 0 && self.pdu_without_poll >= self.poll_pdu)
            || (self.poll_byte > 0 && self.byte_without_poll >= self.poll_byte)
            || (self.queue.is_empty() && self.retx_queue.is_empty())
            || self.is_window_stalled()
            || self.poll_retx_expired
    }

    fn set_poll(&mut self) {
        self.poll_sn = self.space.sub(self.vt_s, 1);
        self.pdu_without_poll = 0;
        self.byte_without_poll = 0;
        self.poll_retx_expired = false;
        self.poll_retransmit.start();
    }

    fn finish_pdu(&mut self, header: &DataPduHeader, payload: &[u8], metrics: &mut RlcBearerMetrics) -> Bytes {
        let mut pdu = BytesMut::with_capacity(self.format.packed_len(header) + payload.len());
        self.format.pack(header, &mut pdu);
        pdu.extend_from_slice(payload);
        trace!("AMD PDU bytes: {}", bytes_to_hex(&pdu));
        metrics.record_tx_pdu(pdu.len());
        pdu.freeze()
    }

    fn build_new_pdu(&mut self, budget: usize, metrics: &mut RlcBearerMetrics) -> Option<Bytes> {
        if self.is_window_stalled() {
            return None;
        }

        // keep every byte of the data field addressable by a 15-bit SO
        let budget = budget.min(MAX_SEGMENT_OFFSET as usize + self.format.fixed_len(false));
        let content = self.queue.build(self.format, budget)?;

        let sn = self.vt_s;
        self.vt_s = self.space.inc(self.vt_s);
        self.pdu_without_poll += 1;
        self.byte_without_poll = self.byte_without_poll.saturating_add(content.payload.len() as u32);

        for segment in &content.sdus {
            let progress = self.sdu_progress.entry(segment.id).or_default();
            progress.outstanding += 1;
            progress.fully_sent |= segment.completes;
        }

        let mut header = DataPduHeader {
            sn,
            fi: content.fi,
            li: content.li,
            ..Default::default()
        };
        let payload = content.payload.freeze();

        let poll = self.poll_required();
        if poll {
            self.set_poll();
        }
        header.poll = poll;
        let pdu = self.finish_pdu(&header, &payload, metrics);
        header.poll = false;

        debug!(
            "AMD PDU SN={} FI={:?} LI={:?} P={} len={}",
            sn,
            header.fi,
            header.li,
            poll,
            pdu.len()
        );

        self.tx_window.insert(
            sn,
            TxPdu {
                header,
                payload,
                sdus: content.sdus,
                retx_count: 0,
                max_retx_notified: false,
            },
        );
        Some(pdu)
    }

    /// Serve the head of the retransmission queue within `budget` bytes,
    /// re-segmenting the PDU when it does not fit whole. Never builds new data.
    pub(crate) fn retransmit_pdu(&mut self, budget: usize, metrics: &mut RlcBearerMetrics) -> Option<Bytes> {
        while let Some(&req) = self.retx_queue.front() {
            let Some(pdu) = self.tx_window.get(&req.sn) else {
                self.retx_queue.pop_front();
                continue;
            };
            let len = pdu.payload.len();
            let end = req.end.min(len);
            if req.start >= end {
                self.retx_queue.pop_front();
                continue;
            }

            let whole = req.start == 0 && end == len;
            let (mut header, payload, seg_end) = if whole && self.format.packed_len(&pdu.header) + len <= budget {
                (pdu.header.clone(), pdu.payload.clone(), end)
            } else {
                let (header, seg_end) = self.segment_header(pdu, req.start, end, budget)?;
                (header, pdu.payload.slice(req.start..seg_end), seg_end)
            };

            match self.retx_queue.front_mut() {
                Some(front) if seg_end < end => front.start = seg_end,
                _ => {
                    self.retx_queue.pop_front();
                }
            }

            let poll = self.poll_required();
            if poll {
                self.set_poll();
            }
            header.poll = poll;
            let out = self.finish_pdu(&header, &payload, metrics);
            metrics.num_retx_pdus += 1;

            debug!(
                "Retransmitting SN={} bytes [{}, {}) of {} P={} len={}",
                req.sn,
                req.start,
                seg_end,
                len,
                poll,
                out.len()
            );
            return Some(out);
        }
        None
    }

    /// Header for the largest segment of `[start, end)` that fits `budget`,
    /// with the segment end it reaches
    fn segment_header(&self, pdu: &TxPdu, start: usize, end: usize, budget: usize) -> Option<(DataPduHeader, usize)> {
        let len = pdu.payload.len();
        let boundaries: Vec<usize> = pdu
            .header
            .li
            .iter()
            .scan(0usize, |acc, &li| {
                *acc += li as usize;
                Some(*acc)
            })
            .collect();

        let mut seg_end = end;
        loop {
            let inner: Vec<usize> = boundaries
                .iter()
                .copied()
                .filter(|&b| b > start && b < seg_end)
                .collect();
            let header_len = self.format.header_len(inner.len(), true);

            if header_len + (seg_end - start) <= budget {
                let mut points = Vec::with_capacity(inner.len() + 2);
                points.push(start);
                points.extend_from_slice(&inner);
                points.push(seg_end);
                let li = points
                    .windows(2)
                    .take(inner.len())
                    .map(|w| u16::try_from(w[1] - w[0]).ok())
                    .collect::<Option<Vec<_>>>()?;

                let starts_sdu = if start == 0 {
                    pdu.header.fi.starts_sdu()
                } else {
                    boundaries.contains(&start)
                };
                let ends_sdu = if seg_end == len {
                    pdu.header.fi.ends_sdu()
                } else {
                    boundaries.contains(&seg_end)
                };

                let header = DataPduHeader {
                    sn: pdu.header.sn,
                    fi: FramingInfo::from_alignment(starts_sdu, ends_sdu),
                    poll: false,
                    segment: Some(SegmentOffset {
                        so: u16::try_from(start).ok().filter(|&so| so <= MAX_SEGMENT_OFFSET)?,
                        last: seg_end == len,
                    }),
                    li,
                };
                return Some((header, seg_end));
            }

            seg_end = if budget > header_len {
                start + (budget - header_len)
            } else {
                // fewer LIs may leave room for data
                *inner.last()?
            };
        }
    }

    /// Count a retransmission of `sn`. Returns false once the threshold is
    /// reached, raising the max-retx notification the first time.
    fn retx_allowed(&mut self, sn: u32, fx: &mut Effects) -> bool {
        let Some(pdu) = self.tx_window.get_mut(&sn) else {
            return false;
        };
        if pdu.retx_count >= self.max_retx_threshold {
            if !pdu.max_retx_notified {
                warn!(
                    "SN={} reached max_retx_threshold={}",
                    sn, self.max_retx_threshold
                );
                pdu.max_retx_notified = true;
                fx.max_retx = true;
            }
            return false;
        }
        pdu.retx_count += 1;
        true
    }

    fn consider_for_retx(&mut self, sn: u32, fx: &mut Effects) {
        if self.retx_queue.iter().any(|req| req.sn == sn) || !self.retx_allowed(sn, fx) {
            return;
        }
        if let Some(pdu) = self.tx_window.get(&sn) {
            let end = pdu.payload.len();
            self.retx_queue.push_back(RetxRequest { sn, start: 0, end });
        }
    }

    fn acknowledge(&mut self, pdu: TxPdu, fx: &mut Effects) {
        for segment in pdu.sdus {
            let done = match self.sdu_progress.get_mut(&segment.id) {
                Some(progress) => {
                    progress.outstanding = progress.outstanding.saturating_sub(1);
                    progress.outstanding == 0 && progress.fully_sent
                }
                None => false,
            };
            if done {
                self.sdu_progress.remove(&segment.id);
                fx.delivered.push(segment.id);
            }
        }
    }

    /// Apply a STATUS PDU from the peer. Invalid reports leave every state
    /// variable untouched.
    pub(crate) fn handle_status(&mut self, pdu: &[u8], fx: &mut Effects, metrics: &mut RlcBearerMetrics) {
        metrics.record_rx_pdu(pdu.len());
        let status = match self.codec.unpack(pdu) {
            Ok(status) => status,
            Err(e) => {
                warn!("Discarding STATUS PDU: {}", e);
                metrics.num_malformed_pdus += 1;
                return;
            }
        };

        let ack_sn = status.ack_sn;
        if !ack_sn_in_tx_window(&self.space, self.window, self.vt_a, self.vt_s, ack_sn) {
            warn!(
                "Discarding STATUS PDU: ACK_SN={} outside [VT(A)={}, VT(S)={}]",
                ack_sn, self.vt_a, self.vt_s
            );
            metrics.num_malformed_pdus += 1;
            return;
        }
        debug!(
            "STATUS ACK_SN={} with {} NACKs (VT(A)={}, VT(S)={})",
            ack_sn,
            status.nacks.len(),
            self.vt_a,
            self.vt_s
        );

        let base = self.vt_a;
        let space = self.space;
        if self.poll_retransmit.is_running() && space.lt(self.poll_sn, ack_sn, base) {
            debug!("POLL_SN={} reported, stopping t-PollRetransmit", self.poll_sn);
            self.poll_retransmit.stop();
        }

        let nacks: Vec<NackRecord> = status
            .nacks
            .into_iter()
            .filter(|nack| {
                let current = space.lt(nack.sn, ack_sn, base);
                if !current {
                    debug!("Ignoring NACK_SN={} below VT(A)={}", nack.sn, base);
                }
                current
            })
            .collect();

        let mut requests = VecDeque::new();
        let mut next = 0;
        let mut advancing = true;
        for sn in space.range(base, ack_sn) {
            let first = next;
            while next < nacks.len() && nacks[next].sn == sn {
                next += 1;
            }
            let group = &nacks[first..next];

            if group.is_empty() {
                if let Some(acked) = self.tx_window.remove(&sn) {
                    self.acknowledge(acked, fx);
                }
                if advancing {
                    self.vt_a = space.inc(sn);
                }
                continue;
            }

            advancing = false;
            let Some(len) = self.tx_window.get(&sn).map(|pdu| pdu.payload.len()) else {
                warn!("Peer NACKed SN={} after acknowledging it", sn);
                fx.protocol_failure = true;
                continue;
            };
            if !self.retx_allowed(sn, fx) {
                continue;
            }
            for nack in group {
                let (start, end) = match nack.so {
                    None => (0, len),
                    Some(so) if so.reaches_end() => (so.start as usize, len),
                    Some(so) => (so.start as usize, (so.end as usize + 1).min(len)),
                };
                if start < end {
                    requests.push_back(RetxRequest { sn, start, end });
                } else {
                    debug!("Ignoring NACK for SN={} beyond its {} bytes", sn, len);
                }
            }
        }

        // requests for SNs this report does not cover stay queued
        requests.extend(
            self.retx_queue
                .drain(..)
                .filter(|req| !space.lt(req.sn, ack_sn, base)),
        );
        self.retx_queue = requests;
    }

    pub(crate) fn on_poll_retransmit_expiry(&mut self, fx: &mut Effects) {
        debug!(
            "t-PollRetransmit expired (POLL_SN={}, VT(A)={}, VT(S)={})",
            self.poll_sn, self.vt_a, self.vt_s
        );
        self.poll_retx_expired = true;
        if (self.queue.is_empty() && self.retx_queue.is_empty()) || self.is_window_stalled() {
            self.consider_for_retx(self.vt_a, fx);
        }
    }

    /// Drop every SDU not yet completely sent. PDUs already in the transmit
    /// window stay there; a partially sent SDU is never reported delivered.
    pub fn empty_queue(&mut self) -> usize {
        let dropped = self.queue.flush();
        for id in &dropped {
            if self.sdu_progress.get(id).is_some_and(|p| !p.fully_sent) {
                self.sdu_progress.remove(id);
            }
        }
        dropped.len()
    }

    pub fn reestablish(&mut self) {
        self.poll_retransmit.stop();
        self.queue.clear();
        self.tx_window.clear();
        self.retx_queue.clear();
        self.sdu_progress.clear();
        self.vt_a = 0;
        self.vt_s = 0;
        self.poll_sn = 0;
        self.pdu_without_poll = 0;
        self.byte_without_poll = 0;
        self.poll_retx_expired = false;
    }
}
