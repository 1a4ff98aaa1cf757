//! Store-side block reservation.

use async_trait::async_trait;
use docshard_types::SequenceKey;

use crate::block::BlockRange;
use crate::node::NodeId;
use crate::Result;

/// Atomically reserves the next range for a key.
///
/// Implementations must advance a durable cursor and return the range in a
/// single atomic operation, so two nodes can never be handed overlapping
/// ranges. Ranges for one key are strictly increasing.
#[async_trait]
pub trait BlockReserver: Send + Sync {
    async fn reserve(&self, key: &SequenceKey, node: &NodeId, size: u64) -> Result<BlockRange>;
}
