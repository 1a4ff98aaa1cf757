//! # docshard-sequence
//!
//! Multi-master primary key allocation.
//!
//! Each node reserves contiguous `[start, end)` blocks from a durable
//! per-key cursor and hands out IDs from its block with a single atomic
//! increment. The store-side reservation is the only cross-node
//! coordination point.

pub mod allocator;
pub mod block;
pub mod config;
pub mod node;
pub mod reserver;

pub use allocator::SequenceAllocator;
pub use block::{BlockRange, BlockStatus};
pub use config::SequenceConfig;
pub use node::NodeId;
pub use reserver::BlockReserver;

/// Error types for sequence allocation.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    /// The backing store could not reserve a block. There is no fallback ID
    /// source, so this always reaches the caller.
    #[error("block reservation failed for {key}: {detail}")]
    Reservation { key: String, detail: String },

    /// The store returned a range of the wrong size.
    #[error("reserved range [{start}, {end}) for {key} does not hold {expected} ids")]
    InvalidRange {
        key: String,
        start: u64,
        end: u64,
        expected: u64,
    },

    /// The store returned a range overlapping a block this node already used.
    #[error("reserved range for {key} starts at {start}, before previous end {previous_end}")]
    Overlap {
        key: String,
        start: u64,
        previous_end: u64,
    },

    #[error("invalid node id '{0}'")]
    InvalidNodeId(String),

    #[error("invalid sequence config: {0}")]
    InvalidConfig(String),

    #[error("node id file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience result type for sequence operations.
pub type Result<T> = std::result::Result<T, SequenceError>;
