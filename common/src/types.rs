//! Common Types for the RLC stack
//!
//! Defines fundamental identifiers and enumerations shared by the layers

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical Channel Identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lcid(pub u8);

impl Lcid {
    /// Number of logical channels a single UE context can carry
    pub const MAX: u8 = 32;

    /// Create a new LCID with validation
    pub fn new(value: u8) -> Option<Self> {
        if value < Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the LCID value
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Lcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LCID {}", self.0)
    }
}

/// Identifier the RLC entity assigns to every accepted SDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SduId(pub u32);

/// RLC transfer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RlcMode {
    /// Transparent Mode
    Tm,
    /// Unacknowledged Mode
    Um,
    /// Acknowledged Mode
    Am,
}

impl fmt::Display for RlcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RlcMode::Tm => "TM",
            RlcMode::Um => "UM",
            RlcMode::Am => "AM",
        };
        f.write_str(name)
    }
}

/// Sequence number field widths in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SnFieldWidth {
    /// 5-bit SN (UM)
    Size5 = 5,
    /// 10-bit SN (UM and AM)
    Size10 = 10,
    /// 12-bit SN
    Size12 = 12,
    /// 16-bit SN (extended AM)
    Size16 = 16,
    /// 18-bit SN
    Size18 = 18,
}

impl SnFieldWidth {
    /// Width in bits
    pub fn bits(&self) -> u8 {
        *self as u8
    }

    /// Size of the sequence number space
    pub fn modulus(&self) -> u32 {
        1u32 << self.bits()
    }
}
