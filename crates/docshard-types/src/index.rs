//! Virtual index metadata and tenant placement.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{CollectionName, TableName, TenantId};

/// Physical index access method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMethod {
    #[default]
    Btree,
    Hash,
    Gin,
    Brin,
}

impl IndexMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Btree => "btree",
            Self::Hash => "hash",
            Self::Gin => "gin",
            Self::Brin => "brin",
        }
    }
}

impl FromStr for IndexMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btree" => Ok(Self::Btree),
            "hash" => Ok(Self::Hash),
            "gin" => Ok(Self::Gin),
            "brin" => Ok(Self::Brin),
            other => Err(format!("unknown index method '{other}'")),
        }
    }
}

impl fmt::Display for IndexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing tier deciding per-tenant quotas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Standard,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Enterprise => "enterprise",
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "standard" => Ok(Self::Standard),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// Physical table holding a tenant's documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Partition {
    /// Partition holding only this tenant's rows.
    Dedicated { table: String },
    /// Partition shared with other tenants; predicates must filter by tenant.
    Shared { table: String },
}

impl Partition {
    pub fn table(&self) -> &str {
        match self {
            Self::Dedicated { table } | Self::Shared { table } => table,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }
}

/// Logical index metadata mapped to one physical index on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualIndex {
    pub id: i64,
    pub tenant: TenantId,
    pub collection: CollectionName,
    pub table: TableName,
    /// Logical name, unique per (tenant, collection) among live indexes.
    pub name: String,
    /// Deterministic physical object name.
    pub physical_name: String,
    pub fields: Vec<String>,
    pub partial: Option<String>,
    pub unique: bool,
    pub method: IndexMethod,
    /// Physical table the index was built on.
    pub partition: String,
    pub created_at: u64,
    /// Soft-delete marker; rows are never hard-deleted.
    pub dropped_at: Option<u64>,
}

impl VirtualIndex {
    pub fn is_dropped(&self) -> bool {
        self.dropped_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_method_parse() {
        assert_eq!("BTREE".parse::<IndexMethod>(), Ok(IndexMethod::Btree));
        assert_eq!("gin".parse::<IndexMethod>(), Ok(IndexMethod::Gin));
        assert!("fulltext".parse::<IndexMethod>().is_err());
        assert_eq!(IndexMethod::default(), IndexMethod::Btree);
    }

    #[test]
    fn test_partition_table() {
        let shared = Partition::Shared {
            table: "documents".to_string(),
        };
        assert!(shared.is_shared());
        assert_eq!(shared.table(), "documents");
    }

    #[test]
    fn test_tier_roundtrip_names() {
        for tier in [Tier::Free, Tier::Standard, Tier::Enterprise] {
            assert_eq!(tier.as_str().parse::<Tier>(), Ok(tier));
        }
    }
}
