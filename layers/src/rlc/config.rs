//! RLC bearer configuration

use common::types::{RlcMode, SnFieldWidth};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::header::PduFormat;
use crate::LayerError;

/// Largest SDU accepted from the upper layer
pub const MAX_SDU_SIZE: usize = 9000;

/// Buffers in the reassembly pool shared by all bearers
pub const DEFAULT_POOL_BUFFERS: usize = 1024;

/// Per-bearer RLC configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlcConfig {
    /// Transfer mode
    pub mode: RlcMode,
    /// SN field width in bits
    #[serde(default = "default_sn_field_width")]
    pub sn_field_width: u8,
    /// t-Reordering
    #[serde(default = "default_t_reordering")]
    pub t_reordering_ms: u32,
    /// t-StatusProhibit
    #[serde(default = "default_t_status_prohibit")]
    pub t_status_prohibit_ms: u32,
    /// t-PollRetransmit
    #[serde(default = "default_t_poll_retransmit")]
    pub t_poll_retransmit_ms: u32,
    /// PDUs between polls, 0 for infinity
    #[serde(default = "default_poll_pdu")]
    pub poll_pdu: u32,
    /// Bytes between polls, 0 for infinity
    #[serde(default = "default_poll_byte")]
    pub poll_byte: u32,
    #[serde(default = "default_max_retx_threshold")]
    pub max_retx_threshold: u32,
    /// AM transmit window, 0 derives it from the SN width
    #[serde(default)]
    pub am_window_size: u32,
    /// SDUs the transmit queue holds
    #[serde(default = "default_tx_queue_length")]
    pub tx_queue_length: usize,
}

fn default_sn_field_width() -> u8 {
    10
}

fn default_t_reordering() -> u32 {
    5
}

fn default_t_status_prohibit() -> u32 {
    5
}

fn default_t_poll_retransmit() -> u32 {
    5
}

fn default_poll_pdu() -> u32 {
    4
}

fn default_poll_byte() -> u32 {
    25000
}

fn default_max_retx_threshold() -> u32 {
    4
}

fn default_tx_queue_length() -> usize {
    128
}

impl Default for RlcConfig {
    fn default() -> Self {
        Self::am()
    }
}

impl RlcConfig {
    pub fn tm() -> Self {
        Self {
            mode: RlcMode::Tm,
            ..Self::am()
        }
    }

    pub fn um(sn_field_width: u8) -> Self {
        Self {
            mode: RlcMode::Um,
            sn_field_width,
            ..Self::am()
        }
    }

    pub fn am() -> Self {
        Self {
            mode: RlcMode::Am,
            sn_field_width: default_sn_field_width(),
            t_reordering_ms: default_t_reordering(),
            t_status_prohibit_ms: default_t_status_prohibit(),
            t_poll_retransmit_ms: default_t_poll_retransmit(),
            poll_pdu: default_poll_pdu(),
            poll_byte: default_poll_byte(),
            max_retx_threshold: default_max_retx_threshold(),
            am_window_size: 0,
            tx_queue_length: default_tx_queue_length(),
        }
    }

    pub fn sn_width(&self) -> Result<SnFieldWidth, LayerError> {
        SnFieldWidth::from_u8(self.sn_field_width).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!(
                "unknown SN field width {}",
                self.sn_field_width
            ))
        })
    }

    /// Header layout of a UM or AM bearer
    pub fn pdu_format(&self) -> Result<PduFormat, LayerError> {
        match self.mode {
            RlcMode::Um => PduFormat::for_um(self.sn_width()?),
            RlcMode::Am => PduFormat::for_am(self.sn_width()?),
            RlcMode::Tm => Err(LayerError::InvalidConfiguration(
                "TM bearers have no PDU header".to_string(),
            )),
        }
    }

    /// Effective AM transmit window
    pub fn window_size(&self) -> Result<u32, LayerError> {
        let half = self.sn_width()?.modulus() / 2;
        Ok(if self.am_window_size == 0 {
            half
        } else {
            self.am_window_size
        })
    }

    pub fn validate(&self) -> Result<(), LayerError> {
        if self.tx_queue_length == 0 {
            return Err(LayerError::InvalidConfiguration(
                "tx_queue_length must be positive".to_string(),
            ));
        }
        if self.mode == RlcMode::Tm {
            return Ok(());
        }

        self.pdu_format()?;

        if self.mode == RlcMode::Am {
            let half = self.sn_width()?.modulus() / 2;
            let window = self.window_size()?;
            if window > half {
                return Err(LayerError::InvalidConfiguration(format!(
                    "AM window {} exceeds half the SN space ({})",
                    window, half
                )));
            }
            if self.max_retx_threshold == 0 {
                return Err(LayerError::InvalidConfiguration(
                    "max_retx_threshold must be positive".to_string(),
                ));
            }
            // a stalled window retransmits once per t-PollRetransmit
            if self.t_poll_retransmit_ms == 0 {
                return Err(LayerError::InvalidConfiguration(
                    "t_poll_retransmit_ms must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = RlcConfig::default();
        assert_eq!(config.mode, RlcMode::Am);
        assert_eq!(config.window_size().unwrap(), 512);
        assert_eq!(config.poll_pdu, 4);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(RlcConfig::um(5), true)]
    #[case(RlcConfig::um(10), true)]
    #[case(RlcConfig::um(12), false)]
    #[case(RlcConfig::um(16), false)]
    #[case(RlcConfig { sn_field_width: 16, ..RlcConfig::am() }, true)]
    #[case(RlcConfig { sn_field_width: 18, ..RlcConfig::am() }, false)]
    #[case(RlcConfig { sn_field_width: 5, ..RlcConfig::am() }, false)]
    #[case(RlcConfig { sn_field_width: 7, ..RlcConfig::am() }, false)]
    #[case(RlcConfig { am_window_size: 600, ..RlcConfig::am() }, false)]
    #[case(RlcConfig { am_window_size: 64, ..RlcConfig::am() }, true)]
    #[case(RlcConfig { tx_queue_length: 0, ..RlcConfig::um(10) }, false)]
    #[case(RlcConfig { t_poll_retransmit_ms: 0, ..RlcConfig::am() }, false)]
    #[case(RlcConfig { t_poll_retransmit_ms: 0, ..RlcConfig::um(10) }, true)]
    #[case(RlcConfig { t_reordering_ms: 0, t_status_prohibit_ms: 0, ..RlcConfig::am() }, true)]
    #[case(RlcConfig::tm(), true)]
    fn test_validation(#[case] config: RlcConfig, #[case] valid: bool) {
        assert_eq!(config.validate().is_ok(), valid);
    }

    #[test]
    fn test_extended_window() {
        let config = RlcConfig {
            sn_field_width: 16,
            ..RlcConfig::am()
        };
        assert_eq!(config.window_size().unwrap(), 32768);
        assert_eq!(config.pdu_format().unwrap(), PduFormat::Am16);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: RlcConfig = serde_json::from_str(r#"{"mode":"um","sn_field_width":5}"#).unwrap();
        assert_eq!(config, RlcConfig::um(5));
    }
}
