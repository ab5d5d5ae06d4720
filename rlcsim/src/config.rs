//! Simulator configuration
//!
//! Loaded from YAML or TOML, chosen by file extension. Every section has
//! defaults, so an empty file gives a single AM bearer over a mildly lossy
//! link.

use anyhow::{anyhow, Result};
use common::types::Lcid;
use layers::mac::GrantConfig;
use layers::rlc::config::MAX_SDU_SIZE;
use layers::rlc::RlcConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main simulator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    #[serde(default)]
    pub sim: SimParams,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub grants: GrantConfig,
    #[serde(default = "default_bearers")]
    pub bearers: Vec<BearerConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sim: SimParams::default(),
            link: LinkConfig::default(),
            grants: GrantConfig::default(),
            bearers: default_bearers(),
            log: LogConfig::default(),
        }
    }
}

/// Run length and traffic shape
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimParams {
    /// Simulated time, 0 to run until interrupted
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Length of one TTI
    #[serde(default = "default_tti_ms")]
    pub tti_ms: u32,
    /// Pace TTIs against the wall clock
    #[serde(default = "default_realtime")]
    pub realtime: bool,
    /// A new SDU per bearer every this many TTIs
    #[serde(default = "default_sdu_interval")]
    pub sdu_interval_ttis: u64,
    #[serde(default = "default_sdu_size_min")]
    pub sdu_size_min: usize,
    #[serde(default = "default_sdu_size_max")]
    pub sdu_size_max: usize,
    /// Send traffic from the second peer too
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default = "default_metrics_period_ms")]
    pub metrics_period_ms: u64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_duration_ms() -> u64 {
    10_000
}

fn default_tti_ms() -> u32 {
    1
}

fn default_realtime() -> bool {
    true
}

fn default_sdu_interval() -> u64 {
    2
}

fn default_sdu_size_min() -> usize {
    40
}

fn default_sdu_size_max() -> usize {
    1500
}

fn default_metrics_period_ms() -> u64 {
    1000
}

fn default_seed() -> u64 {
    1
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            tti_ms: default_tti_ms(),
            realtime: default_realtime(),
            sdu_interval_ttis: default_sdu_interval(),
            sdu_size_min: default_sdu_size_min(),
            sdu_size_max: default_sdu_size_max(),
            bidirectional: false,
            metrics_period_ms: default_metrics_period_ms(),
            seed: default_seed(),
        }
    }
}

/// Impairments applied to each direction of the link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Probability a PDU is dropped
    #[serde(default = "default_loss")]
    pub loss: f64,
    /// Probability a PDU arrives twice
    #[serde(default)]
    pub duplicate: f64,
    /// Extra TTIs a PDU may be held back, which reorders PDUs
    #[serde(default = "default_max_delay")]
    pub max_delay_ttis: u64,
    /// PDUs in flight per direction before new ones are dropped
    #[serde(default = "default_link_capacity")]
    pub capacity: usize,
}

fn default_loss() -> f64 {
    0.05
}

fn default_max_delay() -> u64 {
    2
}

fn default_link_capacity() -> usize {
    4096
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            loss: default_loss(),
            duplicate: 0.0,
            max_delay_ttis: default_max_delay(),
            capacity: default_link_capacity(),
        }
    }
}

/// One bearer, configured identically on both peers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BearerConfig {
    pub lcid: u8,
    pub rlc: RlcConfig,
}

fn default_bearers() -> Vec<BearerConfig> {
    vec![BearerConfig {
        lcid: 3,
        rlc: RlcConfig::am(),
    }]
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// Level for the RLC engine
    #[serde(default = "default_log_level")]
    pub rlc_level: String,
    /// Level for the grant scheduler
    #[serde(default = "default_log_level")]
    pub mac_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            rlc_level: default_log_level(),
            mac_level: default_log_level(),
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string for these levels
    pub fn filter_directives(&self) -> String {
        format!(
            "{},layers::rlc={},layers::mac={}",
            self.all_level, self.rlc_level, self.mac_level
        )
    }
}

impl SimConfig {
    /// Load configuration from a `.yaml`/`.yml` or `.toml` file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        match extension {
            "yaml" | "yml" => Self::from_yaml_str(&contents),
            "toml" => Self::from_toml_str(&contents),
            other => Err(anyhow!("Unsupported configuration format: {:?}", other)),
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bearers.is_empty() {
            return Err(anyhow!("At least one bearer is required"));
        }
        let mut seen = Vec::new();
        for bearer in &self.bearers {
            let lcid = Lcid::new(bearer.lcid).ok_or_else(|| anyhow!("Invalid LCID: {}", bearer.lcid))?;
            if seen.contains(&lcid) {
                return Err(anyhow!("Duplicate bearer on {}", lcid));
            }
            seen.push(lcid);
            bearer
                .rlc
                .validate()
                .map_err(|e| anyhow!("Bearer {}: {}", lcid, e))?;
        }

        for (name, p) in [("loss", self.link.loss), ("duplicate", self.link.duplicate)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(anyhow!("Link {} probability {} is outside [0, 1]", name, p));
            }
        }
        if self.sim.tti_ms == 0 {
            return Err(anyhow!("tti_ms must be positive"));
        }
        if self.sim.sdu_size_min == 0 || self.sim.sdu_size_min > self.sim.sdu_size_max {
            return Err(anyhow!(
                "Invalid SDU size range {}..={}",
                self.sim.sdu_size_min,
                self.sim.sdu_size_max
            ));
        }
        if self.sim.sdu_size_max > MAX_SDU_SIZE {
            return Err(anyhow!(
                "SDU size {} exceeds the {} byte limit",
                self.sim.sdu_size_max,
                MAX_SDU_SIZE
            ));
        }
        Ok(())
    }
}
