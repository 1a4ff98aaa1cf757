//! Index synthesizer settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::quota::TierLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Upper bound for a single CREATE/DROP INDEX statement.
    #[serde(default = "default_ddl_timeout")]
    pub ddl_timeout_secs: u64,
    /// Per-tier index quotas.
    #[serde(default)]
    pub tiers: TierLimits,
}

fn default_ddl_timeout() -> u64 {
    30
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ddl_timeout_secs: default_ddl_timeout(),
            tiers: TierLimits::default(),
        }
    }
}

impl IndexConfig {
    pub fn ddl_timeout(&self) -> Duration {
        Duration::from_secs(self.ddl_timeout_secs.max(1))
    }
}
