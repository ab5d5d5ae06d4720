//! RLC upper-layer interface
//!
//! Upcalls from RLC towards PDCP and RRC.

use bytes::Bytes;
use common::types::{Lcid, SduId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::message_types::UpperEvent;

/// Receiver of RLC upcalls (PDCP data path and RRC failure reporting)
pub trait RlcUpperInterface: Send + Sync {
    /// A fully reassembled, in-sequence SDU
    fn deliver_sdu(&self, lcid: Lcid, sdu: Bytes);

    /// AM retransmission limit reached on this bearer
    fn notify_max_retx(&self, lcid: Lcid);

    /// SDUs whose every byte the peer acknowledged
    fn notify_delivery(&self, _lcid: Lcid, _sdus: &[SduId]) {}

    /// The peer reported data as missing after acknowledging it
    fn notify_protocol_failure(&self, _lcid: Lcid) {}
}

/// Forwards every upcall as an [`UpperEvent`] message
pub struct ChannelUpper {
    tx: mpsc::UnboundedSender<UpperEvent>,
}

impl ChannelUpper {
    /// Create the forwarder and the receiving end of its channel
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<UpperEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, event: UpperEvent) {
        if self.tx.send(event).is_err() {
            debug!("Upper event receiver dropped");
        }
    }
}

impl RlcUpperInterface for ChannelUpper {
    fn deliver_sdu(&self, lcid: Lcid, sdu: Bytes) {
        self.forward(UpperEvent::Sdu { lcid, sdu: sdu.to_vec() });
    }

    fn notify_max_retx(&self, lcid: Lcid) {
        self.forward(UpperEvent::MaxRetx { lcid });
    }

    fn notify_delivery(&self, lcid: Lcid, sdus: &[SduId]) {
        self.forward(UpperEvent::Delivered {
            lcid,
            sdus: sdus.to_vec(),
        });
    }

    fn notify_protocol_failure(&self, lcid: Lcid) {
        self.forward(UpperEvent::ProtocolFailure { lcid });
    }
}
