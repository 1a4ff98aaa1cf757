//! # docshard-index
//!
//! Virtual index synthesis: turns index hints embedded in collection schemas
//! into physical expression indexes on the tenant's partition.
//!
//! ## Modules
//!
//! - [`definition`]: parsing `x-index` / `x-indexes` hints.
//! - [`ddl`]: deterministic physical names and CREATE/DROP statements.
//! - [`quota`]: per-tier index limits.
//! - [`synthesizer`]: reconcile, create, drop and list.
//! - [`store`]: catalog, DDL executor and tenant directory traits.

pub mod config;
pub mod ddl;
pub mod definition;
pub mod quota;
pub mod store;
pub mod synthesizer;

use docshard_types::Tier;

pub use config::IndexConfig;
pub use ddl::SqlDialect;
pub use definition::{parse_index_definitions, IndexDefinition, ParsedIndexes};
pub use quota::TierLimits;
pub use store::{DdlExecutor, IndexCatalog, TenantDirectory};
pub use synthesizer::{IndexSynthesizer, SyncReport};

/// Error types for index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Metadata store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Tenant already holds its tier's maximum number of indexes.
    #[error("tenant {tenant} ({}) has {current} of {limit} indexes", tier.as_str())]
    QuotaExceeded {
        tenant: String,
        tier: Tier,
        current: usize,
        limit: usize,
    },

    /// Index definition has an unusable name or field list.
    #[error("invalid index definition: {0}")]
    InvalidDefinition(String),

    /// Partial predicate failed validation.
    #[error("invalid partial predicate: {0}")]
    InvalidPartial(String),

    /// Schema text could not be parsed.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// DDL statement failed (syntax, lock timeout, disk).
    #[error("ddl failed: {0}")]
    Ddl(String),

    /// DDL statement did not finish in time.
    #[error("ddl timed out after {0}s")]
    Timeout(u64),

    /// No live index with this name.
    #[error("index '{name}' not found in collection {collection}")]
    NotFound { collection: String, name: String },

    /// A live index with this name has a different definition.
    #[error("index '{name}' already exists in collection {collection} with another definition")]
    NameConflict { collection: String, name: String },
}

/// Convenience result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
