//! Migration engine tuning.

use serde::{Deserialize, Serialize};

/// Bulk migration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Documents fetched per batch during bulk migration.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on per-document errors kept in a bulk report.
    #[serde(default = "default_max_error_samples")]
    pub max_error_samples: usize,
}

fn default_batch_size() -> usize {
    500
}

fn default_max_error_samples() -> usize {
    50
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_error_samples: default_max_error_samples(),
        }
    }
}
