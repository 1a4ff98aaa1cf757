//! Event emission system.
//!
//! Every engine operation the daemon runs ends in an event, so outcomes are
//! observable by subscribers. Each subscriber has an independent buffer; a
//! slow subscriber loses the oldest events rather than blocking emitters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic per-daemon sequence number.
    pub seq: u64,
    /// Event type name (e.g. "SchemaPublished", "BlockAllocated").
    pub event_type: String,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "schema", "index", "migration", "sequence", "system".
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Only events whose payload names one of these tenants.
    #[serde(default)]
    pub tenants: Option<Vec<String>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stamp and emit an event to all subscribers.
    pub fn emit(&self, event_type: &str, payload: serde_json::Value) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        // No subscribers is fine.
        let _ = self.sender.send(Event {
            seq,
            event_type: event_type.to_string(),
            timestamp: docshard_types::now_secs(),
            payload,
        });
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let category = categorize_event(&event.event_type);
            if !categories.iter().any(|c| c == category) {
                return false;
            }
        }

        if let Some(ref tenants) = self.tenants {
            if let Some(tenant) = event.payload.get("tenant").and_then(|v| v.as_str()) {
                if !tenants.iter().any(|t| t == tenant) {
                    return false;
                }
            }
        }

        true
    }
}

/// Categorize an event type into a category.
pub fn categorize_event(event_type: &str) -> &'static str {
    match event_type {
        s if s.starts_with("Schema") || s.starts_with("Tenant") => "schema",
        s if s.starts_with("Index") => "index",
        s if s.starts_with("Migration") || s.starts_with("Document") => "migration",
        s if s.starts_with("Block") || s.starts_with("Sequence") => "sequence",
        _ => "system",
    }
}
