//! Allocator settings.

use serde::{Deserialize, Serialize};

use crate::{Result, SequenceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// IDs per reserved block.
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// Remaining fraction of a block at which the next one is reserved in
    /// the background. `0.0` disables pre-allocation.
    #[serde(default = "default_prealloc_threshold")]
    pub prealloc_threshold: f64,
    /// Node identity. Empty means generate (or load a persisted one).
    #[serde(default)]
    pub node_id: String,
}

fn default_block_size() -> u64 {
    10_000
}

fn default_prealloc_threshold() -> f64 {
    0.1
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            prealloc_threshold: default_prealloc_threshold(),
            node_id: String::new(),
        }
    }
}

impl SequenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(SequenceError::InvalidConfig(
                "block_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.prealloc_threshold) {
            return Err(SequenceError::InvalidConfig(format!(
                "prealloc_threshold must be in [0.0, 1.0), got {}",
                self.prealloc_threshold
            )));
        }
        Ok(())
    }

    pub fn preallocation_enabled(&self) -> bool {
        self.prealloc_threshold > 0.0
    }
}
