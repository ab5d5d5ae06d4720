//! Transparent Mode entity
//!
//! No header, no segmentation: an SDU goes out whole in one PDU and every
//! received PDU is delivered as an SDU.

use bytes::Bytes;
use common::types::SduId;
use tracing::debug;

use super::entity::Effects;
use super::metrics::RlcBearerMetrics;
use super::tx_queue::SduQueue;
use crate::LayerError;

#[derive(Debug)]
pub struct TmEntity {
    queue: SduQueue,
}

impl TmEntity {
    pub fn new(tx_queue_length: usize) -> Self {
        Self {
            queue: SduQueue::new(tx_queue_length),
        }
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

    pub fn buffer_state(&self) -> usize {
        self.queue.pending_bytes()
    }

    pub fn read_pdu(&mut self, budget: usize, metrics: &mut RlcBearerMetrics) -> Option<Bytes> {
        let (id, sdu) = self.queue.pop_whole(budget)?;
        debug!("TM SDU {:?} sent as a {} byte PDU", id, sdu.len());
        metrics.record_tx_pdu(sdu.len());
        Some(sdu)
    }

    pub(crate) fn write_pdu(&mut self, pdu: &[u8], fx: &mut Effects) {
        if pdu.is_empty() {
            return;
        }
        fx.sdus.push(Bytes::copy_from_slice(pdu));
    }

    /// Drop every queued SDU. Returns how many were dropped.
    pub fn empty_queue(&mut self) -> usize {
        self.queue.flush().len()
    }

    pub fn reestablish(&mut self) {
        self.queue.clear();
    }
}
