//! Medium Access Control (MAC) grant distribution
//!
//! The MAC side of the RLC pull path: every TTI the scheduler asks each
//! bearer for its buffer state and hands out byte grants from a fixed budget.

pub mod scheduler;

pub use scheduler::{GrantConfig, GrantScheduler, ScheduledPdu};
