//! ID blocks.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A half-open `[start, end)` range reserved from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A block held by this node. IDs are issued with a lock-free
/// compare-and-swap on `next`; once `next == end` the block is exhausted
/// and stays exhausted.
#[derive(Debug)]
pub(crate) struct SequenceBlock {
    range: BlockRange,
    next: AtomicU64,
}

impl SequenceBlock {
    pub(crate) fn new(range: BlockRange) -> Self {
        Self {
            range,
            next: AtomicU64::new(range.start),
        }
    }

    pub(crate) fn range(&self) -> BlockRange {
        self.range
    }

    /// Claim the next ID, or `None` if the block is used up.
    pub(crate) fn try_next(&self) -> Option<u64> {
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                (next < self.range.end).then_some(next + 1)
            })
            .ok()
    }

    pub(crate) fn next(&self) -> u64 {
        self.next.load(Ordering::Acquire).min(self.range.end)
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.range.end - self.next()
    }

    pub(crate) fn remaining_fraction(&self) -> f64 {
        if self.range.is_empty() {
            return 0.0;
        }
        self.remaining() as f64 / self.range.len() as f64
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Read-only view of a key's allocation state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockStatus {
    pub key: String,
    pub node: String,
    pub start: u64,
    pub end: u64,
    /// Next ID to be issued (equals `end` when exhausted).
    pub next: u64,
    pub remaining: u64,
    pub consumed_pct: f64,
    /// Pre-allocated block waiting to replace the current one.
    pub standby: Option<BlockRange>,
}
