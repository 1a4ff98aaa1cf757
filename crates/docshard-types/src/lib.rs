//! # docshard-types
//!
//! Shared domain types used across the docshard workspace: tenant-scoped
//! identifiers, versioned collection schemas, documents and virtual index
//! metadata.

pub mod document;
pub mod ids;
pub mod index;
pub mod schema;

pub use document::Document;
pub use ids::{CollectionName, SequenceKey, TableName, TenantId};
pub use index::{IndexMethod, Partition, Tier, VirtualIndex};
pub use schema::{CollectionSchema, SchemaDocument};

/// Maximum length of any tenant, collection or table identifier.
pub const MAX_IDENT_LEN: usize = 64;

/// Errors raised while validating identifiers or reading raw schemas.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Identifier is empty, too long or contains forbidden characters.
    #[error("invalid {kind} identifier '{value}'")]
    InvalidIdentifier { kind: &'static str, value: String },

    /// Raw schema text is not valid JSON.
    #[error("schema is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Raw schema parsed but its root is not a JSON object.
    #[error("schema root must be a JSON object")]
    NotAnObject,
}

/// Convenience result type for type-level validation.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Current Unix timestamp in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
