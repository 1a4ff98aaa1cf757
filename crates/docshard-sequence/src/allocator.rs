//! The per-node sequence allocator.
//!
//! Blocks are cached in a registry keyed by (tenant, collection, table).
//! Each key has its own slot: the hot path only reads the slot's current
//! block and bumps an atomic counter, while block replacement is serialized
//! per key by an async mutex. Unrelated keys never contend.
//!
//! When a block's remaining fraction drops to the configured threshold, a
//! background task reserves the next range as a standby block, so the
//! exhausting call swaps blocks without a store round-trip. At most one
//! such task exists per key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use docshard_types::SequenceKey;
use tokio::task::JoinHandle;

use crate::block::{BlockRange, BlockStatus, SequenceBlock};
use crate::config::SequenceConfig;
use crate::node::NodeId;
use crate::reserver::BlockReserver;
use crate::{Result, SequenceError};

#[derive(Default)]
struct KeySlot {
    current: RwLock<Option<Arc<SequenceBlock>>>,
    standby: Mutex<Option<BlockRange>>,
    /// Highest `end` this node has seen for the key.
    high_water: Mutex<u64>,
    refill: tokio::sync::Mutex<()>,
    prealloc_pending: AtomicBool,
    prealloc_task: Mutex<Option<JoinHandle<()>>>,
}

impl KeySlot {
    fn current(&self) -> Option<Arc<SequenceBlock>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, block: Arc<SequenceBlock>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(block);
    }

    fn take_standby(&self) -> Option<BlockRange> {
        self.standby
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn standby(&self) -> Option<BlockRange> {
        *self.standby.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner {
    reserver: Arc<dyn BlockReserver>,
    node: NodeId,
    config: SequenceConfig,
    slots: RwLock<HashMap<SequenceKey, Arc<KeySlot>>>,
}

/// Hands out unique, per-key increasing IDs. Cheap to clone.
#[derive(Clone)]
pub struct SequenceAllocator {
    inner: Arc<Inner>,
}

impl SequenceAllocator {
    pub fn new(
        reserver: Arc<dyn BlockReserver>,
        node: NodeId,
        config: SequenceConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                reserver,
                node,
                config,
                slots: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn node(&self) -> &NodeId {
        &self.inner.node
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.inner.config
    }

    /// Next ID for `key`.
    ///
    /// Served from the held block when possible; otherwise the block is
    /// replaced first. Fails only if the store cannot reserve a new block.
    pub async fn get_next_id(&self, key: &SequenceKey) -> Result<u64> {
        let slot = self.slot(key);
        let mut block = match slot.current() {
            Some(block) => block,
            None => self.refill(key, &slot).await?,
        };
        loop {
            if let Some(id) = block.try_next() {
                self.maybe_preallocate(key, &slot, &block);
                return Ok(id);
            }
            // Exhausted, possibly by concurrent callers after our refill.
            block = self.refill(key, &slot).await?;
        }
    }

    /// Make sure `key` holds a block with IDs left, reserving one if needed.
    ///
    /// Concurrent callers for the same key wait on one another; whoever runs
    /// second sees the refreshed block and returns without touching the store.
    pub async fn allocate_block(&self, key: &SequenceKey) -> Result<BlockStatus> {
        let slot = self.slot(key);
        let block = self.refill(key, &slot).await?;
        Ok(self.status_of(key, &slot, &block))
    }

    /// Current block bounds and consumption for `key`, if one is held.
    pub fn get_block_status(&self, key: &SequenceKey) -> Option<BlockStatus> {
        let slot = self.existing_slot(key)?;
        let block = slot.current()?;
        Some(self.status_of(key, &slot, &block))
    }

    /// Status of every key this node holds a block for.
    pub fn block_statuses(&self) -> Vec<BlockStatus> {
        let slots: Vec<(SequenceKey, Arc<KeySlot>)> = self
            .inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect();
        let mut statuses: Vec<BlockStatus> = slots
            .iter()
            .filter_map(|(key, slot)| {
                slot.current()
                    .map(|block| self.status_of(key, slot, &block))
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    /// Forget the cached blocks for `key`. Unused IDs in them are abandoned,
    /// never reissued. Returns whether anything was cached.
    pub fn invalidate(&self, key: &SequenceKey) -> bool {
        let removed = self
            .inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(slot) = &removed {
            let abandoned = slot.current().map_or(0, |b| b.remaining())
                + slot.standby().map_or(0, |r| r.len());
            tracing::info!(key = %key, node = %self.inner.node, abandoned, "sequence cache invalidated");
        }
        removed.is_some()
    }

    /// Wait for every in-flight background pre-allocation to finish.
    pub async fn wait_for_preallocations(&self) {
        let slots: Vec<Arc<KeySlot>> = self
            .inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for slot in slots {
            let task = slot
                .prealloc_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "pre-allocation task did not complete");
                }
            }
        }
    }

    fn existing_slot(&self, key: &SequenceKey) -> Option<Arc<KeySlot>> {
        self.inner
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn slot(&self, key: &SequenceKey) -> Arc<KeySlot> {
        if let Some(slot) = self.existing_slot(key) {
            return slot;
        }
        self.inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Replace the key's block unless someone already did.
    async fn refill(&self, key: &SequenceKey, slot: &KeySlot) -> Result<Arc<SequenceBlock>> {
        let _guard = slot.refill.lock().await;

        if let Some(block) = slot.current() {
            if !block.is_exhausted() {
                return Ok(block);
            }
        }

        let range = match slot.take_standby() {
            Some(range) => {
                slot.prealloc_pending.store(false, Ordering::Release);
                tracing::debug!(
                    key = %key,
                    node = %self.inner.node,
                    start = range.start,
                    end = range.end,
                    "promoted standby block"
                );
                range
            }
            None => self.inner.reserve(key, slot).await?,
        };

        let block = Arc::new(SequenceBlock::new(range));
        slot.install(block.clone());
        Ok(block)
    }

    fn maybe_preallocate(&self, key: &SequenceKey, slot: &Arc<KeySlot>, block: &SequenceBlock) {
        let threshold = self.inner.config.prealloc_threshold;
        if threshold <= 0.0 || block.remaining_fraction() > threshold {
            return;
        }
        if slot.prealloc_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = self.inner.clone();
        let key = key.clone();
        let task_slot = slot.clone();
        let handle = tokio::spawn(async move {
            inner.preallocate(&key, &task_slot).await;
        });
        *slot
            .prealloc_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn status_of(&self, key: &SequenceKey, slot: &KeySlot, block: &SequenceBlock) -> BlockStatus {
        let range = block.range();
        let consumed = block.next() - range.start;
        let consumed_pct = if range.is_empty() {
            100.0
        } else {
            consumed as f64 * 100.0 / range.len() as f64
        };
        BlockStatus {
            key: key.to_string(),
            node: self.inner.node.to_string(),
            start: range.start,
            end: range.end,
            next: block.next(),
            remaining: block.remaining(),
            consumed_pct,
            standby: slot.standby(),
        }
    }
}

impl Inner {
    /// One store round-trip. Validates the range before anyone can use it.
    async fn reserve(&self, key: &SequenceKey, slot: &KeySlot) -> Result<BlockRange> {
        let size = self.config.block_size;
        let range = match self.reserver.reserve(key, &self.node, size).await {
            Ok(range) => range,
            Err(e) => {
                tracing::error!(key = %key, node = %self.node, error = %e, "block reservation failed");
                return Err(e);
            }
        };

        if range.len() != size || range.start == 0 {
            return Err(SequenceError::InvalidRange {
                key: key.to_string(),
                start: range.start,
                end: range.end,
                expected: size,
            });
        }

        {
            let mut high_water = slot.high_water.lock().unwrap_or_else(PoisonError::into_inner);
            if range.start < *high_water {
                return Err(SequenceError::Overlap {
                    key: key.to_string(),
                    start: range.start,
                    previous_end: *high_water,
                });
            }
            *high_water = range.end;
        }

        tracing::info!(
            key = %key,
            node = %self.node,
            start = range.start,
            end = range.end,
            "reserved sequence block"
        );
        Ok(range)
    }

    async fn preallocate(&self, key: &SequenceKey, slot: &KeySlot) {
        let _guard = slot.refill.lock().await;
        if slot.standby().is_some() {
            return;
        }
        match self.reserve(key, slot).await {
            Ok(range) => {
                *slot.standby.lock().unwrap_or_else(PoisonError::into_inner) = Some(range);
            }
            Err(e) => {
                // The exhausting caller will retry synchronously.
                slot.prealloc_pending.store(false, Ordering::Release);
                tracing::warn!(key = %key, node = %self.node, error = %e, "pre-allocation failed");
            }
        }
    }
}
