//! Sequence allocation command handlers.

use std::sync::Arc;

use serde_json::{json, Value};

use super::{sequence_key, to_value, Result};
use crate::DaemonState;

pub async fn next_id(state: &Arc<DaemonState>, params: &Value) -> Result {
    let key = sequence_key(params)?;
    let id = state.sequences.get_next_id(&key).await?;
    Ok(json!({"id": id}))
}

/// Force the key's current block to be reserved, if it is not already.
pub async fn allocate_block(state: &Arc<DaemonState>, params: &Value) -> Result {
    let key = sequence_key(params)?;
    let status = state.sequences.allocate_block(&key).await?;
    state.event_bus.emit(
        "BlockAllocated",
        json!({
            "tenant": key.tenant,
            "key": status.key,
            "node": status.node,
            "start": status.start,
            "end": status.end,
        }),
    );
    to_value(&status)
}

/// Status for one key, or for every key held when no table is named.
pub async fn status(state: &Arc<DaemonState>, params: &Value) -> Result {
    if params.get("table").is_none() {
        return to_value(&state.sequences.block_statuses());
    }
    let key = sequence_key(params)?;
    Ok(match state.sequences.get_block_status(&key) {
        Some(status) => to_value(&status)?,
        None => Value::Null,
    })
}

pub async fn invalidate(state: &Arc<DaemonState>, params: &Value) -> Result {
    let key = sequence_key(params)?;
    let invalidated = state.sequences.invalidate(&key);
    Ok(json!({"invalidated": invalidated}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_state;

    fn key() -> Value {
        json!({"tenant": "acme", "collection": "shop", "table": "orders"})
    }

    #[tokio::test]
    async fn test_next_id_starts_at_one() {
        let state = test_state();
        let first = next_id(&state, &key()).await.expect("first");
        let second = next_id(&state, &key()).await.expect("second");
        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);

        let status = status(&state, &key()).await.expect("status");
        assert_eq!(status["start"], 1);
        assert_eq!(status["next"], 3);
        assert_eq!(status["node"], "test-node");
    }

    #[tokio::test]
    async fn test_status_lists_all_keys() {
        let state = test_state();
        next_id(&state, &key()).await.expect("orders");
        next_id(
            &state,
            &json!({"tenant": "acme", "collection": "shop", "table": "invoices"}),
        )
        .await
        .expect("invoices");

        let all = status(&state, &json!({})).await.expect("all");
        assert_eq!(all.as_array().map(Vec::len), Some(2));

        let unknown = status(
            &state,
            &json!({"tenant": "acme", "collection": "shop", "table": "refunds"}),
        )
        .await
        .expect("unknown key");
        assert!(unknown.is_null());
    }

    #[tokio::test]
    async fn test_invalidate_skips_abandoned_ids() {
        let state = test_state();
        next_id(&state, &key()).await.expect("first");
        let result = invalidate(&state, &key()).await.expect("invalidate");
        assert_eq!(result["invalidated"], true);

        let after = next_id(&state, &key()).await.expect("after");
        let block_size = state.config.sequence.block_size;
        assert_eq!(after["id"], block_size + 1);
    }

    #[tokio::test]
    async fn test_allocate_block_emits_event() {
        let state = test_state();
        let mut events = state.event_bus.subscribe();
        let status = allocate_block(&state, &key()).await.expect("allocate");
        assert_eq!(status["remaining"], state.config.sequence.block_size);

        let event = events.try_recv().expect("event");
        assert_eq!(event.event_type, "BlockAllocated");
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        let state = test_state();
        let err = next_id(
            &state,
            &json!({"tenant": "acme", "collection": "shop", "table": "orders; drop"}),
        )
        .await
        .expect_err("bad identifier");
        assert_eq!(err.code, -32602);
    }
}
