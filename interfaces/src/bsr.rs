//! Buffer status reporting towards the MAC scheduler

use common::types::Lcid;
use serde::{Deserialize, Serialize};

/// Pending transmit data of one bearer, headers included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferState {
    /// SDU bytes not yet sent in any PDU
    pub new_tx: usize,
    /// Retransmissions and STATUS reports, served before new data
    pub prio_tx: usize,
}

impl BufferState {
    pub fn total(&self) -> usize {
        self.new_tx + self.prio_tx
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Receiver of buffer status updates (the MAC BSR procedure)
pub trait BsrListener: Send + Sync {
    /// The buffer state of `lcid` may have changed
    fn update_bsr(&self, lcid: Lcid, state: BufferState);
}
