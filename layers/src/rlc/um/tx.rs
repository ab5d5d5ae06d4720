//! UM transmit side

use bytes::{Bytes, BytesMut};
use common::types::SduId;
use common::utils::bytes_to_hex;
use tracing::{debug, trace};

use crate::rlc::header::{DataPduHeader, PduFormat};
use crate::rlc::metrics::RlcBearerMetrics;
use crate::rlc::sn::SnSpace;
use crate::rlc::tx_queue::SduQueue;
use crate::LayerError;

#[derive(Debug)]
pub struct UmTx {
    format: PduFormat,
    space: SnSpace,
    /// VT(US), SN of the next UMD PDU
    vt_us: u32,
    queue: SduQueue,
}

impl UmTx {
    pub fn new(format: PduFormat, space: SnSpace, tx_queue_length: usize) -> Self {
        Self {
            format,
            space,
            vt_us: 0,
            queue: SduQueue::new(tx_queue_length),
        }
    }

    pub fn vt_us(&self) -> u32 {
        self.vt_us
    }

    pub fn reconfigure(&mut self, tx_queue_length: usize) {
        self.queue.set_capacity(tx_queue_length);
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

    /// Bytes needed to send everything queued, headers included
    pub fn buffer_state(&self) -> usize {
        self.queue.required_bytes(self.format)
    }

    /// Build one UMD PDU of at most `budget` bytes
    pub fn read_pdu(&mut self, budget: usize, metrics: &mut RlcBearerMetrics) -> Option<Bytes> {
        let content = self.queue.build(self.format, budget)?;

        let header = DataPduHeader {
            sn: self.vt_us,
            fi: content.fi,
            li: content.li,
            ..Default::default()
        };
        self.vt_us = self.space.inc(self.vt_us);

        let mut pdu = BytesMut::with_capacity(self.format.packed_len(&header) + content.payload.len());
        self.format.pack(&header, &mut pdu);
        pdu.extend_from_slice(&content.payload);

        debug!(
            "UMD PDU SN={} FI={:?} LI={:?} len={}",
            header.sn,
            header.fi,
            header.li,
            pdu.len()
        );
        trace!("UMD PDU bytes: {}", bytes_to_hex(&pdu));

        metrics.record_tx_pdu(pdu.len());
        Some(pdu.freeze())
    }

    /// Drop every SDU not yet completely sent, keeping VT(US)
    pub fn empty_queue(&mut self) -> usize {
        self.queue.flush().len()
    }

    pub fn reestablish(&mut self) {
        self.vt_us = 0;
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::header::FramingInfo;
    use common::types::SnFieldWidth;

    fn um_tx(width: SnFieldWidth) -> UmTx {
        let format = PduFormat::for_um(width).unwrap();
        UmTx::new(format, SnSpace::new(width), 16)
    }

    #[test]
    fn test_sn_assignment_wraps() {
        let mut tx = um_tx(SnFieldWidth::Size5);
        let mut metrics = RlcBearerMetrics::default();
        for _ in 0..33 {
            tx.write_sdu(Bytes::from_static(b"x")).unwrap();
            let pdu = tx.read_pdu(10, &mut metrics).unwrap();
            assert_eq!(pdu.len(), 2);
        }
        assert_eq!(tx.vt_us(), 1);
        assert_eq!(metrics.num_tx_pdus, 33);
    }

    #[test]
    fn test_buffer_state_covers_one_pdu() {
        let mut tx = um_tx(SnFieldWidth::Size10);
        let mut metrics = RlcBearerMetrics::default();
        for size in [100, 200, 300] {
            tx.write_sdu(Bytes::from(vec![1u8; size])).unwrap();
        }
        let required = tx.buffer_state();
        let pdu = tx.read_pdu(required, &mut metrics).unwrap();
        assert_eq!(pdu.len(), required);
        assert_eq!(tx.buffer_state(), 0);

        let (header, len) = PduFormat::Um10.unpack(&pdu).unwrap();
        assert_eq!(header.sn, 0);
        assert_eq!(header.li, vec![100, 200]);
        assert_eq!(header.fi, FramingInfo::empty());
        assert_eq!(pdu.len() - len, 600);
    }

    #[test]
    fn test_nothing_fits() {
        let mut tx = um_tx(SnFieldWidth::Size10);
        let mut metrics = RlcBearerMetrics::default();
        tx.write_sdu(Bytes::from_static(b"abc")).unwrap();
        assert!(tx.read_pdu(2, &mut metrics).is_none());
        assert_eq!(tx.vt_us(), 0);
    }

    #[test]
    fn test_empty_queue_keeps_sn() {
        let mut tx = um_tx(SnFieldWidth::Size10);
        let mut metrics = RlcBearerMetrics::default();
        tx.write_sdu(Bytes::from(vec![7u8; 50])).unwrap();
        tx.write_sdu(Bytes::from_static(b"tail")).unwrap();
        tx.read_pdu(20, &mut metrics).unwrap();

        assert_eq!(tx.empty_queue(), 2);
        assert_eq!(tx.buffer_state(), 0);
        assert!(tx.read_pdu(100, &mut metrics).is_none());

        // the next SDU starts a fresh PDU after the last SN used
        tx.write_sdu(Bytes::from_static(b"next")).unwrap();
        let pdu = tx.read_pdu(100, &mut metrics).unwrap();
        let (header, _) = PduFormat::Um10.unpack(&pdu).unwrap();
        assert_eq!(header.sn, 1);
        assert_eq!(header.fi, FramingInfo::empty());
    }

    #[test]
    fn test_reestablish_resets_sn() {
        let mut tx = um_tx(SnFieldWidth::Size10);
        let mut metrics = RlcBearerMetrics::default();
        tx.write_sdu(Bytes::from_static(b"abc")).unwrap();
        tx.write_sdu(Bytes::from_static(b"def")).unwrap();
        tx.read_pdu(5, &mut metrics).unwrap();
        tx.reestablish();
        assert_eq!(tx.vt_us(), 0);
        assert_eq!(tx.buffer_state(), 0);
    }
}
