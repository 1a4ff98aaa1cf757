//! # docshard-migrate
//!
//! Lazy document migration across collection schema versions.
//!
//! ## Modules
//!
//! - [`transform`]: the closed set of field transforms and their semantics.
//! - [`path`]: version-chain walk producing ordered migration steps.
//! - [`compat`]: schema diffing and compatibility classification.
//! - [`engine`]: document, lazy-read and bulk migration service.
//! - [`store`]: schema and document store traits.

pub mod compat;
pub mod config;
pub mod engine;
pub mod path;
pub mod store;
pub mod transform;

pub use compat::{Compatibility, CompatibilityReport, SchemaDiff};
pub use config::MigrationConfig;
pub use engine::{BulkMigrationReport, MigrationEngine, MigrationOutcome, PreviewEntry};
pub use path::{validate_migrations, MigrationIssue, MigrationPath, MigrationStep};
pub use store::{DocumentStore, SchemaStore};
pub use transform::{CastKind, FieldTransform, Transform};

/// Error types for migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Backing store failure.
    #[error("store error: {0}")]
    Store(String),

    /// A schema version's raw text could not be read.
    #[error("invalid schema {collection} v{version}: {detail}")]
    InvalidSchema {
        collection: String,
        version: u32,
        detail: String,
    },

    /// A migrations-map entry is not an array of transforms.
    #[error("migration step '{0}' must be an array of transforms")]
    MalformedStep(String),

    /// A transform declaration could not be parsed.
    #[error("invalid transform on '{field}': {detail}")]
    InvalidTransform { field: String, detail: String },

    /// Document payload root is not a JSON object.
    #[error("document payload is not a JSON object")]
    NotAnObject,

    /// A dotted path runs through a non-object value.
    #[error("path '{0}' traverses a non-object value")]
    PathConflict(String),

    /// Requested schema version does not exist.
    #[error("schema {tenant}/{collection} v{version} not found")]
    SchemaNotFound {
        tenant: String,
        collection: String,
        version: u32,
    },

    /// Document or schema belongs to a different tenant/collection.
    #[error("scope mismatch: expected {expected}, got {actual}")]
    ScopeMismatch { expected: String, actual: String },

    /// Document is tagged with a version newer than the target.
    #[error("document is at v{document}, ahead of target v{target}")]
    VersionAhead { document: u32, target: u32 },
}

/// Convenience result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
