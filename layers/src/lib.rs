//! Protocol Stack Layers Library
//!
//! This crate implements the LTE Radio Link Control sublayer according to
//! 3GPP TS 36.322, together with the byte-grant scheduler that drives its
//! pull path.

pub mod mac;
pub mod rlc;

use common::types::Lcid;
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    #[error("Malformed PDU header: {0}")]
    MalformedHeader(String),

    #[error("Malformed status PDU: {0}")]
    MalformedStatusPdu(String),

    #[error("SDU queue full")]
    QueueFull,

    #[error("SDU of {size} bytes exceeds the {max} byte limit")]
    SduTooLarge { size: usize, max: usize },

    #[error("Bearer already exists: {0}")]
    BearerExists(Lcid),

    #[error("Bearer not found: {0}")]
    BearerNotFound(Lcid),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
