//! Per-tenant index quotas.
//!
//! The quota is checked before any DDL runs, so a rejected request leaves
//! no partial state behind.

use docshard_types::{TenantId, Tier};
use serde::{Deserialize, Serialize};

use crate::{IndexError, Result};

/// Maximum live virtual indexes per tenant, by tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierLimits {
    #[serde(default = "default_free")]
    pub free: usize,
    #[serde(default = "default_standard")]
    pub standard: usize,
    #[serde(default = "default_enterprise")]
    pub enterprise: usize,
}

fn default_free() -> usize {
    10
}

fn default_standard() -> usize {
    50
}

fn default_enterprise() -> usize {
    500
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            free: default_free(),
            standard: default_standard(),
            enterprise: default_enterprise(),
        }
    }
}

impl TierLimits {
    pub fn limit_for(&self, tier: Tier) -> usize {
        match tier {
            Tier::Free => self.free,
            Tier::Standard => self.standard,
            Tier::Enterprise => self.enterprise,
        }
    }

    /// Fail if one more index would exceed the tenant's limit.
    pub fn check(&self, tenant: &TenantId, tier: Tier, current: usize) -> Result<()> {
        let limit = self.limit_for(tier);
        if current >= limit {
            return Err(IndexError::QuotaExceeded {
                tenant: tenant.to_string(),
                tier,
                current,
                limit,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_by_tier() {
        let limits = TierLimits::default();
        assert_eq!(limits.limit_for(Tier::Free), 10);
        assert_eq!(limits.limit_for(Tier::Standard), 50);
        assert_eq!(limits.limit_for(Tier::Enterprise), 500);
    }

    #[test]
    fn test_check_rejects_at_limit() {
        let limits = TierLimits {
            free: 2,
            ..TierLimits::default()
        };
        let tenant = TenantId::new("t1").expect("tenant");
        assert!(limits.check(&tenant, Tier::Free, 1).is_ok());
        assert!(matches!(
            limits.check(&tenant, Tier::Free, 2),
            Err(IndexError::QuotaExceeded { current: 2, limit: 2, .. })
        ));
    }
}
