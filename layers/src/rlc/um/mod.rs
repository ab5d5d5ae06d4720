//! Unacknowledged Mode entity

mod rx;
mod tx;

pub use rx::UmRx;
pub use tx::UmTx;
