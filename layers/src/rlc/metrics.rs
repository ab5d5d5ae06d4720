//! Per-bearer RLC counters

use serde::Serialize;

/// Counters kept by every bearer. Reading them has no effect on protocol state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RlcBearerMetrics {
    pub num_tx_sdus: u64,
    pub num_tx_sdu_bytes: u64,
    pub num_rx_sdus: u64,
    pub num_rx_sdu_bytes: u64,
    pub num_tx_pdus: u64,
    pub num_tx_pdu_bytes: u64,
    pub num_rx_pdus: u64,
    pub num_rx_pdu_bytes: u64,
    /// PDUs declared lost by the receive window
    pub num_lost_pdus: u64,
    /// SDUs dropped during reassembly
    pub num_lost_sdus: u64,
    pub num_retx_pdus: u64,
    /// Data or status PDUs that failed to decode
    pub num_malformed_pdus: u64,
    /// SDUs removed by `discard_sdu`
    pub num_discarded_sdus: u64,
}

impl RlcBearerMetrics {
    pub fn record_tx_pdu(&mut self, len: usize) {
        self.num_tx_pdus += 1;
        self.num_tx_pdu_bytes += len as u64;
    }

    pub fn record_rx_pdu(&mut self, len: usize) {
        self.num_rx_pdus += 1;
        self.num_rx_pdu_bytes += len as u64;
    }

    pub fn record_tx_sdu(&mut self, len: usize) {
        self.num_tx_sdus += 1;
        self.num_tx_sdu_bytes += len as u64;
    }

    pub fn record_rx_sdu(&mut self, len: usize) {
        self.num_rx_sdus += 1;
        self.num_rx_sdu_bytes += len as u64;
    }
}
