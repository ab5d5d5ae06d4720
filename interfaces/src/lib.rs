//! RLC Boundary Interfaces Library
//!
//! This crate provides the collaborators the RLC layer talks to: the upper
//! layer upcall trait, the buffer status listener, the timer service and the
//! messages exchanged with the lower-layer link.

pub mod bsr;
pub mod message_types;
pub mod timers;
pub mod upper;

pub use bsr::{BsrListener, BufferState};
pub use message_types::{LinkFrame, UpperEvent};
pub use timers::{Timer, TimerEvent, TimerKind, TimerService};
pub use upper::{ChannelUpper, RlcUpperInterface};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Buffer full")]
    BufferFull,
}
