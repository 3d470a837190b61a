//! Store Transfer
//!
//! Serializes server-side store entries marked for client transfer into
//! `<script>` snippets and routes them through the controller, so
//! transfers obey the same suspense-buffering rules as ordinary content.
//!
//! Wire format: the first transfer bootstraps `window._S` with
//! `[[key,value],...]`; later transfers append, and — once any local
//! signal mirror exists on the client — also write through the local
//! store map.

use serde_json::Value;
use tracing::debug;

use super::suspense::StreamSuspenseController;
use crate::reactive::Store;

impl StreamSuspenseController {
    /// Serialize the store's queued transfer entries into a script chunk
    /// and enqueue it, buffered under `suspense_id` when given. Does
    /// nothing when no entries are queued.
    pub fn transfer_store_to_client(&self, store: &Store, suspense_id: Option<u32>) {
        let Some(batch) = store.drain_transfers() else {
            return;
        };

        let payload = serde_json::to_string(&batch.entries).unwrap_or_else(|_| "[]".to_string());
        debug!(
            entries = batch.entries.len(),
            first = batch.first,
            bridged = batch.bridged,
            "transferring store entries"
        );

        let script = if batch.first {
            format!("<script>window._S={payload}</script>")
        } else if batch.bridged {
            format!("<script>for(let e of {payload}){{_S.push(e);_s.Map.set(e[0],e[1])}}</script>")
        } else {
            format!("<script>for(let e of {payload}) _S.push(e)</script>")
        };

        self.enqueue(Some(&script), suspense_id);
    }
}

/// Decode one transported value. Malformed payloads are not an error:
/// the raw input comes back as a string value.
pub fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Decode a transported entry list (`[[key,value],...]`), falling back
/// to an empty list when malformed.
pub fn decode_entries(raw: &str) -> Vec<(String, Value)> {
    serde_json::from_str(raw).unwrap_or_default()
}
