//! Common Utilities and Types Library
//!
//! This crate provides shared types, bit utilities and the byte buffer pool
//! used across the RLC stack.

pub mod buffer_pool;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use buffer_pool::{BufferPool, BufferPoolStats, PooledBuffer};
pub use types::*;
pub use utils::*;
