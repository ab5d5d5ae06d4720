//! Transmit SDU queue with segmentation and concatenation into data fields

use bytes::{Bytes, BytesMut};
use common::types::SduId;
use std::collections::VecDeque;

use super::config::MAX_SDU_SIZE;
use super::header::{FramingInfo, PduFormat};
use crate::LayerError;

#[derive(Debug)]
struct TxSdu {
    id: SduId,
    data: Bytes,
    offset: usize,
}

impl TxSdu {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

/// Part of an SDU carried by one PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SduSegment {
    pub id: SduId,
    /// This segment carries the last byte of the SDU
    pub completes: bool,
}

/// Data field assembled for a new PDU
#[derive(Debug)]
pub struct PduContent {
    pub fi: FramingInfo,
    pub li: Vec<u16>,
    pub payload: BytesMut,
    pub sdus: Vec<SduSegment>,
}

/// Bounded FIFO of SDUs awaiting first transmission
#[derive(Debug)]
pub struct SduQueue {
    queue: VecDeque<TxSdu>,
    /// SDU partially sent in an earlier PDU
    current: Option<TxSdu>,
    capacity: usize,
    pending_bytes: usize,
    next_id: u32,
}

impl SduQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            current: None,
            capacity,
            pending_bytes: 0,
            next_id: 0,
        }
    }

    pub fn push(&mut self, data: Bytes) -> Result<SduId, LayerError> {
        if data.is_empty() {
            return Err(LayerError::InvalidState("empty SDU".to_string()));
        }
        if data.len() > MAX_SDU_SIZE {
            return Err(LayerError::SduTooLarge {
                size: data.len(),
                max: MAX_SDU_SIZE,
            });
        }
        if self.is_full() {
            return Err(LayerError::QueueFull);
        }

        let id = SduId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.pending_bytes += data.len();
        self.queue.push_back(TxSdu { id, data, offset: 0 });
        Ok(id)
    }

    /// Change the SDU limit. SDUs already queued are kept.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    /// SDUs not yet completely sent
    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.current.is_some())
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Drop a queued SDU that has not started transmission
    pub fn discard(&mut self, id: SduId) -> bool {
        match self.queue.iter().position(|sdu| sdu.id == id) {
            Some(pos) => {
                if let Some(sdu) = self.queue.remove(pos) {
                    self.pending_bytes -= sdu.remaining();
                }
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.current = None;
        self.pending_bytes = 0;
    }

    /// Drop every SDU not yet completely sent, the partially sent one first.
    /// Returns their ids.
    pub fn flush(&mut self) -> Vec<SduId> {
        let ids = self.iter().map(|sdu| sdu.id).collect();
        self.clear();
        ids
    }

    fn iter(&self) -> impl Iterator<Item = &TxSdu> {
        self.current.iter().chain(self.queue.iter())
    }

    /// Bytes needed to drain the queue with unsegmented new PDUs. An SDU too
    /// long for a length indicator ends its PDU.
    pub fn required_bytes(&self, format: PduFormat) -> usize {
        if self.is_empty() {
            return 0;
        }

        let mut total = self.pending_bytes;
        let mut n_li = 0;
        let count = self.len();
        for (i, sdu) in self.iter().enumerate() {
            if i + 1 == count {
                break;
            }
            if sdu.remaining() <= format.max_li() {
                n_li += 1;
            } else {
                total += format.header_len(n_li, false);
                n_li = 0;
            }
        }
        total + format.header_len(n_li, false)
    }

    /// Fill a data field for a PDU of at most `budget` bytes including the
    /// header. Returns `None` unless at least one payload byte fits.
    pub fn build(&mut self, format: PduFormat, budget: usize) -> Option<PduContent> {
        let fixed = format.fixed_len(false);
        if budget <= fixed || self.is_empty() {
            return None;
        }

        let mut payload = BytesMut::with_capacity(budget - fixed);
        let mut li: Vec<u16> = Vec::new();
        let mut sdus = Vec::new();
        let mut starts_sdu = true;
        let mut ends_sdu = true;
        let mut last_len = 0;

        while let Some(mut sdu) = self.current.take().or_else(|| self.queue.pop_front()) {
            if sdus.is_empty() {
                starts_sdu = sdu.offset == 0;
            } else {
                // the previous segment needs an LI before another can follow
                let header_len = format.header_len(li.len() + 1, false);
                if last_len > format.max_li() || header_len + payload.len() >= budget {
                    self.current = Some(sdu);
                    break;
                }
                li.push(last_len as u16);
            }

            let header_len = format.header_len(li.len(), false);
            let room = budget - header_len - payload.len();
            let take = room.min(sdu.remaining());
            payload.extend_from_slice(&sdu.data[sdu.offset..sdu.offset + take]);
            sdu.offset += take;
            self.pending_bytes -= take;
            last_len = take;

            let completes = sdu.remaining() == 0;
            sdus.push(SduSegment {
                id: sdu.id,
                completes,
            });

            if !completes {
                ends_sdu = false;
                self.current = Some(sdu);
                break;
            }
            if header_len + payload.len() >= budget {
                break;
            }
        }

        Some(PduContent {
            fi: FramingInfo::from_alignment(starts_sdu, ends_sdu),
            li,
            payload,
            sdus,
        })
    }

    /// Pop the head SDU whole if it fits `budget` (transparent mode)
    pub fn pop_whole(&mut self, budget: usize) -> Option<(SduId, Bytes)> {
        let fits = self.queue.front().is_some_and(|sdu| sdu.remaining() <= budget);
        if !fits {
            return None;
        }
        let sdu = self.queue.pop_front()?;
        self.pending_bytes -= sdu.remaining();
        Some((sdu.id, sdu.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(sizes: &[usize]) -> SduQueue {
        let mut queue = SduQueue::new(16);
        for (i, &size) in sizes.iter().enumerate() {
            queue.push(Bytes::from(vec![i as u8; size])).unwrap();
        }
        queue
    }

    #[test]
    fn test_single_sdu_fits_exactly() {
        let mut queue = queue_with(&[10]);
        assert_eq!(queue.required_bytes(PduFormat::Um10), 12);

        let content = queue.build(PduFormat::Um10, 12).unwrap();
        assert_eq!(content.fi, FramingInfo::empty());
        assert!(content.li.is_empty());
        assert_eq!(content.payload.len(), 10);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_segmentation_sets_framing_info() {
        let mut queue = queue_with(&[25]);

        let first = queue.build(PduFormat::Um10, 12).unwrap();
        assert_eq!(first.fi, FramingInfo::NOT_END_ALIGNED);
        assert_eq!(first.payload.len(), 10);

        let middle = queue.build(PduFormat::Um10, 12).unwrap();
        assert_eq!(middle.fi, FramingInfo::all());

        let last = queue.build(PduFormat::Um10, 12).unwrap();
        assert_eq!(last.fi, FramingInfo::NOT_START_ALIGNED);
        assert_eq!(last.payload.len(), 5);
        assert_eq!(
            last.sdus,
            vec![SduSegment {
                id: SduId(0),
                completes: true
            }]
        );
        assert!(queue.build(PduFormat::Um10, 12).is_none());
    }

    #[test]
    fn test_concatenation_uses_length_indicators() {
        let mut queue = queue_with(&[5, 6, 7]);
        let required = queue.required_bytes(PduFormat::Um10);
        assert_eq!(required, 18 + PduFormat::Um10.header_len(2, false));

        let content = queue.build(PduFormat::Um10, required).unwrap();
        assert_eq!(content.li, vec![5, 6]);
        assert_eq!(content.payload.len(), 18);
        assert_eq!(content.fi, FramingInfo::empty());
        assert_eq!(content.sdus.len(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_no_room_for_next_li_leaves_sdu_queued() {
        let mut queue = queue_with(&[5, 6]);
        // 2 header + 5 payload, one spare byte is not enough for an LI plus data
        let content = queue.build(PduFormat::Um10, 8).unwrap();
        assert!(content.li.is_empty());
        assert_eq!(content.payload.len(), 5);
        assert_eq!(queue.len(), 1);

        let next = queue.build(PduFormat::Um10, 8).unwrap();
        assert_eq!(next.fi, FramingInfo::empty());
        assert_eq!(next.payload.len(), 6);
    }

    #[test]
    fn test_budget_too_small() {
        let mut queue = queue_with(&[5]);
        assert!(queue.build(PduFormat::Am10, 2).is_none());
        assert!(queue.build(PduFormat::Am10, 3).is_some());
    }

    #[test]
    fn test_long_segment_is_not_length_indicated() {
        let mut queue = queue_with(&[3000, 10]);
        assert_eq!(
            queue.required_bytes(PduFormat::Um10),
            3010 + 2 * PduFormat::Um10.fixed_len(false)
        );

        let content = queue.build(PduFormat::Um10, 5000).unwrap();
        assert!(content.li.is_empty());
        assert_eq!(content.payload.len(), 3000);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_queue_limits() {
        let mut queue = SduQueue::new(2);
        assert!(queue.push(Bytes::from_static(b"a")).is_ok());
        assert!(queue.push(Bytes::from_static(b"b")).is_ok());
        assert!(queue.is_full());
        assert_eq!(queue.push(Bytes::from_static(b"c")), Err(LayerError::QueueFull));
        assert!(queue.push(Bytes::new()).is_err());

        let mut queue = SduQueue::new(2);
        let err = queue.push(Bytes::from(vec![0; MAX_SDU_SIZE + 1])).unwrap_err();
        assert!(matches!(err, LayerError::SduTooLarge { .. }));
    }

    #[test]
    fn test_discard_only_untouched_sdus() {
        let mut queue = queue_with(&[20, 4]);
        queue.build(PduFormat::Um10, 10).unwrap();

        assert!(!queue.discard(SduId(0)));
        assert!(queue.discard(SduId(1)));
        assert_eq!(queue.pending_bytes(), 12);
        assert!(!queue.discard(SduId(1)));
    }

    #[test]
    fn test_pop_whole() {
        let mut queue = queue_with(&[8]);
        assert!(queue.pop_whole(7).is_none());
        let (id, data) = queue.pop_whole(8).unwrap();
        assert_eq!(id, SduId(0));
        assert_eq!(data.len(), 8);
        assert_eq!(queue.pending_bytes(), 0);
    }
}
