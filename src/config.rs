//! Timing and wiring configuration, loadable from YAML.
use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Device timing. The defaults encode the target's datasheet requirements
/// with margin, shortening them risks corrupted writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Held on each SCK phase
    pub sck_half_period_us: u64,
    /// Reset low before the programming-enable instruction
    pub reset_settle_ms: u64,
    /// After releasing reset
    pub reset_release_ms: u64,
    /// After driving the idle line levels
    pub idle_settle_ms: u64,
    pub chip_erase_ms: u64,
    pub fuse_write_ms: u64,
    pub page_write_ms: u64,
    /// Verification gives up after this many mismatching bytes
    pub verify_mismatch_limit: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            sck_half_period_us: 1,
            reset_settle_ms: 20,
            reset_release_ms: 1,
            idle_settle_ms: 10,
            chip_erase_ms: 100,
            fuse_write_ms: 50,
            page_write_ms: 50,
            verify_mismatch_limit: 20,
        }
    }
}

impl Timing {
    pub fn sck_half_period(&self) -> Duration {
        Duration::from_micros(self.sck_half_period_us)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn reset_release(&self) -> Duration {
        Duration::from_millis(self.reset_release_ms)
    }

    pub fn idle_settle(&self) -> Duration {
        Duration::from_millis(self.idle_settle_ms)
    }

    pub fn chip_erase(&self) -> Duration {
        Duration::from_millis(self.chip_erase_ms)
    }

    pub fn fuse_write(&self) -> Duration {
        Duration::from_millis(self.fuse_write_ms)
    }

    pub fn page_write(&self) -> Duration {
        Duration::from_millis(self.page_write_ms)
    }
}

/// GPIO lines driving the ISP header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// GPIO character device, e.g. "/dev/gpiochip0"
    pub chip: String,
    pub sck: u32,
    pub miso: u32,
    pub mosi: u32,
    pub reset: u32,
}

impl Default for PinConfig {
    fn default() -> Self {
        PinConfig {
            chip: "/dev/gpiochip0".to_string(),
            sck: 4,
            miso: 5,
            mosi: 6,
            reset: 7,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timing: Timing,
    pub pins: PinConfig,
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let raw = std::fs::read_to_string(p)
            .with_context(|| format!("reading config {}", p.display()))?;
        let config = Self::from_yaml(&raw).with_context(|| format!("parsing {}", p.display()))?;
        log::debug!("Loaded config from {}: {:?}", p.display(), config);
        Ok(config)
    }
}
