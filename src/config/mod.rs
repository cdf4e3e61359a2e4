//! Configuration for the relay engine.
//!
//! The engine itself is pure; what is configurable is policy: how long
//! incomplete concatenated messages are retained and what happens to them,
//! plus outbound reference-allocation tuning. Configuration is TOML,
//! loaded asynchronously, with defaults for every field:
//!
//! ```toml
//! [reassembly]
//! max_pending_groups = 64
//! stale_policy = "emit_partial"
//! stale_after_minutes = 1440
//!
//! [outbound]
//! reference_guard_depth = 8
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub use crate::reassembly::{ReassemblyConfig, StalePolicy};

/// Outbound planning options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// How many recently used references to avoid per destination.
    /// Values above 255 are clamped by the allocator.
    #[serde(default = "default_reference_guard_depth")]
    pub reference_guard_depth: usize,
}

fn default_reference_guard_depth() -> usize {
    8
}

impl Default for OutboundConfig {
    fn default() -> Self {
        OutboundConfig {
            reference_guard_depth: default_reference_guard_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub reassembly: ReassemblyConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.reassembly.max_pending_groups == 0 {
            return Err(anyhow!("reassembly.max_pending_groups must be at least 1"));
        }
        if self.reassembly.stale_policy != StalePolicy::Keep
            && self.reassembly.stale_after_minutes == 0
        {
            return Err(anyhow!(
                "reassembly.stale_after_minutes must be positive when a stale policy is active"
            ));
        }
        Ok(())
    }
}
