//! Acknowledged Mode entity

mod rx;
mod tx;

pub use rx::AmRx;
pub use tx::{ack_sn_in_tx_window, AmTx};
