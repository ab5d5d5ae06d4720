//! Message Types exchanged around the RLC layer
//!
//! Defines the frames carried by the lower-layer link and the upcall events
//! forwarded to the upper layers.

use common::types::{Lcid, SduId};
use serde::{Deserialize, Serialize};

/// One RLC PDU travelling over the lower-layer link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFrame {
    /// Logical channel the PDU belongs to
    pub lcid: Lcid,
    /// Transmission time interval the PDU was scheduled in
    pub tti: u64,
    /// PDU bytes
    pub pdu: Vec<u8>,
}

impl LinkFrame {
    /// Create a new frame
    pub fn new(lcid: Lcid, tti: u64, pdu: Vec<u8>) -> Self {
        Self { lcid, tti, pdu }
    }
}

/// RLC upcall in message form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpperEvent {
    /// Reassembled SDU for PDCP
    Sdu {
        /// Receiving bearer
        lcid: Lcid,
        /// SDU bytes
        sdu: Vec<u8>,
    },
    /// Retransmission limit reached
    MaxRetx {
        /// Affected bearer
        lcid: Lcid,
    },
    /// SDUs acknowledged by the peer
    Delivered {
        /// Transmitting bearer
        lcid: Lcid,
        /// Acknowledged SDU ids
        sdus: Vec<SduId>,
    },
    /// Peer NACKed data it had already acknowledged
    ProtocolFailure {
        /// Affected bearer
        lcid: Lcid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_frame_serialization() {
        let frame = LinkFrame::new(Lcid(4), 120, vec![0x80, 0x01, 0xAA]);

        let serialized = serde_json::to_string(&frame).unwrap();
        let deserialized: LinkFrame = serde_json::from_str(&serialized).unwrap();

        assert_eq!(frame, deserialized);
    }

    #[test]
    fn test_upper_event_serialization() {
        let event = UpperEvent::Delivered {
            lcid: Lcid(2),
            sdus: vec![SduId(5)],
        };
        let serialized = serde_json::to_string(&event).unwrap();
        let deserialized: UpperEvent = serde_json::from_str(&serialized).unwrap();
        assert_eq!(event, deserialized);
    }
}
