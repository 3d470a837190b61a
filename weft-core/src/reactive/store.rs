//! Reactive Store
//!
//! The store is a process-wide key/value registry shared by every signal
//! graph on the page. `get`/`set`/`delete` are the only reactive
//! operations: writes go through the backing map and then broadcast on an
//! explicit notification bus that graphs bridge into their local
//! dependency graphs. Anything that mutates a value in place without
//! going through `set` bypasses propagation entirely — reactivity here is
//! assignment-based.
//!
//! # Key conventions
//!
//! - `"__ind:" + name` — indicator flag for the named async action.
//! - `"e__ind:" + name` — error slot paired with that indicator.
//! - `"__opt:" + key` — optimistic shadow for `key`; while present,
//!   [`Store::get`] returns it instead of the authoritative value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

/// Prefix for indicator keys.
pub const INDICATOR_PREFIX: &str = "__ind:";

/// Prefix for optimistic shadow keys.
pub const OPTIMISTIC_PREFIX: &str = "__opt:";

/// Indicator key for a named async action.
pub fn indicator_key(name: &str) -> String {
    format!("{INDICATOR_PREFIX}{name}")
}

/// Error key paired with a named action's indicator.
pub fn error_key(name: &str) -> String {
    format!("e{INDICATOR_PREFIX}{name}")
}

/// Optimistic shadow key for a store key.
pub fn optimistic_key(key: &str) -> String {
    format!("{OPTIMISTIC_PREFIX}{key}")
}

/// JavaScript-style truthiness over transported values, used by
/// indicator signals.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

type BusCallback = Arc<dyn Fn(&str, Option<&Value>)>;

/// The store's notification bus: an explicit subscriber list instead of
/// ambient global state. Each signal graph holds one subscription that
/// bridges broadcasts into its local mirrors.
pub(crate) struct StoreBus {
    subscribers: Mutex<Vec<(u64, BusCallback)>>,
    next_id: AtomicU64,
}

impl StoreBus {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe<F>(&self, callback: F) -> u64
    where
        F: Fn(&str, Option<&Value>) + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(sub_id, _)| *sub_id != id);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Invoke every subscriber with the changed key. The list is
    /// snapshotted first so callbacks may subscribe or unsubscribe
    /// mid-broadcast.
    fn broadcast(&self, key: &str, value: Option<&Value>) {
        let snapshot: Vec<BusCallback> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in snapshot {
            callback(key, value);
        }
    }
}

/// One batch of store entries marked for client transfer.
pub struct TransferBatch {
    /// Key/value pairs, serialized on the wire as `[[key,value],...]`.
    pub entries: Vec<(String, Value)>,
    /// Whether this is the first transfer of the response (bootstrap
    /// form vs incremental append).
    pub first: bool,
    /// Whether any graph has bridged a local mirror, in which case the
    /// incremental form also writes through the local store.
    pub bridged: bool,
}

struct TransferState {
    queued: Vec<String>,
    bootstrapped: bool,
}

/// A process-wide reactive key/value registry.
///
/// Shared by every [`SignalGraph`](super::SignalGraph) as `Arc<Store>`;
/// graphs bridge the bus into per-key local mirrors lazily on first read.
pub struct Store {
    map: DashMap<String, Value>,
    bus: StoreBus,
    transfer: Mutex<TransferState>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
            bus: StoreBus::new(),
            transfer: Mutex::new(TransferState {
                queued: Vec::new(),
                bootstrapped: false,
            }),
        }
    }

    /// Get the effective value for `key`: the optimistic override while
    /// one is pending, else the authoritative value.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(shadow) = self.map.get(&optimistic_key(key)) {
            return Some(shadow.value().clone());
        }
        self.map.get(key).map(|v| v.value().clone())
    }

    /// Get the authoritative value for `key`, ignoring any optimistic
    /// override.
    pub fn raw_get(&self, key: &str) -> Option<Value> {
        self.map.get(key).map(|v| v.value().clone())
    }

    /// Write `value` under `key` and broadcast the change.
    pub fn set(&self, key: &str, value: Value) {
        self.map.insert(key.to_string(), value.clone());
        self.bus.broadcast(key, Some(&value));
    }

    /// Remove `key` and broadcast the deletion. Deleting a key that is
    /// absent is a no-op and does not broadcast.
    pub fn delete(&self, key: &str) {
        if self.map.remove(key).is_some() {
            self.bus.broadcast(key, None);
        }
    }

    /// Mark `key` for transfer to the client on the next
    /// `transfer_store_to_client` call.
    pub fn transfer_to_client(&self, key: &str) {
        let mut transfer = self.transfer.lock();
        if !transfer.queued.iter().any(|k| k == key) {
            transfer.queued.push(key.to_string());
        }
    }

    /// Drain the queued transfer keys into a batch, resolving their
    /// current authoritative values. Returns `None` when nothing is
    /// queued. The first non-empty drain flips the bootstrap flag.
    pub fn drain_transfers(&self) -> Option<TransferBatch> {
        let mut transfer = self.transfer.lock();
        if transfer.queued.is_empty() {
            return None;
        }

        let keys = std::mem::take(&mut transfer.queued);
        let entries: Vec<(String, Value)> = keys
            .into_iter()
            .filter_map(|key| self.raw_get(&key).map(|value| (key, value)))
            .collect();

        if entries.is_empty() {
            return None;
        }

        let first = !transfer.bootstrapped;
        transfer.bootstrapped = true;

        debug!(entries = entries.len(), first, "draining store transfers");

        Some(TransferBatch {
            entries,
            first,
            bridged: self.bus.subscriber_count() > 0,
        })
    }

    pub(crate) fn bus(&self) -> &StoreBus {
        &self.bus
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn set_and_get_roundtrip() {
        let store = Store::new();
        store.set("k", json!("v"));
        assert_eq!(store.get("k"), Some(json!("v")));
    }

    #[test]
    fn set_broadcasts_to_subscribers() {
        let store = Store::new();
        let notified = Arc::new(AtomicI32::new(0));

        let notified_clone = notified.clone();
        store.bus().subscribe(move |key, value| {
            assert_eq!(key, "k");
            assert_eq!(value, Some(&json!(1)));
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.set("k", json!(1));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delete_broadcasts_only_when_key_existed() {
        let store = Store::new();
        let notified = Arc::new(AtomicI32::new(0));

        let notified_clone = notified.clone();
        store.bus().subscribe(move |_key, value| {
            assert!(value.is_none());
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.delete("missing");
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        store.map.insert("k".into(), json!(1));
        store.delete("k");
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn optimistic_shadow_overrides_get() {
        let store = Store::new();
        store.set("k", json!("real"));
        store.set(&optimistic_key("k"), json!("hoped"));

        assert_eq!(store.get("k"), Some(json!("hoped")));
        assert_eq!(store.raw_get("k"), Some(json!("real")));

        store.delete(&optimistic_key("k"));
        assert_eq!(store.get("k"), Some(json!("real")));
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = Store::new();
        let notified = Arc::new(AtomicI32::new(0));

        let notified_clone = notified.clone();
        let id = store.bus().subscribe(move |_, _| {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.set("k", json!(1));
        store.bus().unsubscribe(id);
        store.set("k", json!(2));

        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_transfers_marks_bootstrap_once() {
        let store = Store::new();
        store.set("a", json!(1));
        store.set("b", json!(2));

        assert!(store.drain_transfers().is_none());

        store.transfer_to_client("a");
        let batch = store.drain_transfers().expect("queued batch");
        assert!(batch.first);
        assert_eq!(batch.entries, vec![("a".to_string(), json!(1))]);

        store.transfer_to_client("b");
        let batch = store.drain_transfers().expect("queued batch");
        assert!(!batch.first);
        assert_eq!(batch.entries, vec![("b".to_string(), json!(2))]);
    }

    #[test]
    fn truthiness_matches_transported_semantics() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
    }
}
