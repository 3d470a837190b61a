//! Signal Graph
//!
//! A `SignalGraph` is the per-component reactive scope. It owns the
//! top-level effects created through it (torn down by [`SignalGraph::reset`]
//! or drop), and it bridges the shared [`Store`] into its own dependency
//! graph by lazily materializing a local mirror state for every store key
//! it reads.
//!
//! Graphs are intended to live inside persistent UI nodes: one graph per
//! component instance, all sharing one process-wide store.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use futures_util::future::LocalBoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::context;
use super::effect::Effect;
use super::state::State;
use super::store::{error_key, indicator_key, optimistic_key, truthy, Store, OPTIMISTIC_PREFIX};

/// A derived boolean reflecting the in-flight state of a named async
/// action, paired with its error slot. See [`SignalGraph::indicate`].
pub struct Indicator {
    /// True while the action is pending.
    pub pending: State<bool>,
    /// The transported error value, `Null` when none.
    pub error: State<Value>,
}

struct GraphInner {
    store: Arc<Store>,

    /// Top-level effects owned by this scope.
    roots: Mutex<Vec<Effect>>,

    /// Local mirror per store key this graph has read. The mirror is the
    /// bridge between the store's global bus and local dependency
    /// tracking.
    mirrors: Mutex<HashMap<String, State<Value>>>,

    /// Bus subscription id, established lazily on first store read.
    bus_token: Mutex<Option<u64>>,
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        if let Some(token) = self.bus_token.lock().take() {
            self.store.bus().unsubscribe(token);
        }
        for effect in std::mem::take(&mut *self.roots.lock()) {
            effect.dispose();
        }
    }
}

/// A per-component reactive scope over a shared [`Store`].
///
/// Cloning a `SignalGraph` produces another handle to the same scope.
pub struct SignalGraph {
    inner: Arc<GraphInner>,
}

impl SignalGraph {
    /// Create a new graph over `store`.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                store,
                roots: Mutex::new(Vec::new()),
                mirrors: Mutex::new(HashMap::new()),
                bus_token: Mutex::new(None),
            }),
        }
    }

    fn from_inner(inner: Arc<GraphInner>) -> Self {
        Self { inner }
    }

    /// The shared store this graph bridges.
    pub fn store(&self) -> &Arc<Store> {
        &self.inner.store
    }

    /// Create a state cell. Present for surface parity; a `State` is not
    /// owned by the scope, only effects are.
    pub fn state<T>(&self, initial: T) -> State<T>
    where
        T: Clone + PartialEq + 'static,
    {
        State::new(initial)
    }

    /// Create and immediately run an effect.
    ///
    /// If another effect is currently executing, the new effect becomes
    /// its sub-effect (disposed before the parent re-runs); otherwise it
    /// is owned by this scope until [`SignalGraph::reset`].
    pub fn effect<F>(&self, f: F) -> Effect
    where
        F: Fn() + 'static,
    {
        let effect = Effect::new_sync(f);
        self.register(effect.clone());
        effect.run();
        effect
    }

    /// Create and immediately run an effect with an async body.
    ///
    /// The body's future is polled once inside the dependency-capture
    /// window; reads after its first suspension point are not tracked.
    /// A body that actually suspends is driven on the local task set.
    pub fn effect_async<F>(&self, f: F) -> Effect
    where
        F: Fn() -> LocalBoxFuture<'static, ()> + 'static,
    {
        let effect = Effect::new_async(f);
        self.register(effect.clone());
        effect.run();
        effect
    }

    fn register(&self, effect: Effect) {
        if let Some(parent) = context::current() {
            parent.adopt(effect);
        } else {
            self.inner.roots.lock().push(effect);
        }
    }

    /// Register a cleanup on the currently running effect. Outside a
    /// running effect this is a no-op; use [`Effect::on_cleanup`] to
    /// target an explicit effect.
    pub fn cleanup<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        match context::current() {
            Some(effect) => effect.on_cleanup(f),
            None => debug!("cleanup registered outside a running effect; dropped"),
        }
    }

    /// Create a state whose value is recomputed by an owned effect
    /// whenever anything `f` reads changes.
    pub fn derived<T, F>(&self, f: F) -> State<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        let slot: Rc<RefCell<Option<State<T>>>> = Rc::new(RefCell::new(None));

        let slot_in_effect = Rc::clone(&slot);
        self.effect(move || {
            let value = f();
            let existing = slot_in_effect.borrow().clone();
            match existing {
                Some(state) => state.set(value),
                None => *slot_in_effect.borrow_mut() = Some(State::new(value)),
            }
        });

        let state = slot.borrow().clone();
        state.expect("derived effect ran synchronously")
    }

    /// Tear down the scope: dispose every owned effect and drop the
    /// store mirrors. The graph is reusable afterwards.
    pub fn reset(&self) {
        for effect in std::mem::take(&mut *self.inner.roots.lock()) {
            effect.dispose();
        }
        self.inner.mirrors.lock().clear();
    }

    /// Reactive read of a store key.
    ///
    /// Returns the effective value (the optimistic override while one is
    /// pending), `Null` when the key is absent. The first read of a key
    /// materializes a local mirror bridged from the store bus, so
    /// subsequent `set`/`delete` on the store propagate into this graph.
    pub fn store_get(&self, key: &str) -> Value {
        self.mirror_for(key).get()
    }

    fn mirror_for(&self, key: &str) -> State<Value> {
        self.ensure_bridge();

        let mut mirrors = self.inner.mirrors.lock();
        mirrors
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key, "materializing store mirror");
                State::new(self.inner.store.get(key).unwrap_or(Value::Null))
            })
            .clone()
    }

    fn ensure_bridge(&self) {
        let mut token = self.inner.bus_token.lock();
        if token.is_some() {
            return;
        }

        let weak: Weak<GraphInner> = Arc::downgrade(&self.inner);
        *token = Some(self.inner.store.bus().subscribe(move |key, _value| {
            let Some(inner) = weak.upgrade() else { return };

            // A shadow-key write changes the effective value of its
            // logical key; route it to that key's mirror.
            let logical = key.strip_prefix(OPTIMISTIC_PREFIX).unwrap_or(key);
            let mirror = inner.mirrors.lock().get(logical).cloned();

            if let Some(mirror) = mirror {
                let effective = inner.store.get(logical).unwrap_or(Value::Null);
                if effective.is_null() {
                    // Deletions write a nullish sentinel; the naive
                    // equality skip must not swallow them.
                    mirror.set_forced(effective);
                } else {
                    mirror.set(effective);
                }
            }
        }));
    }

    /// Apply an optimistic update for `key` under a named action.
    ///
    /// Immediately writes `f(current)` under the shadow key (so
    /// [`SignalGraph::store_get`] reflects it), flips the action's
    /// indicator on, and registers an effect that deletes the shadow once
    /// the indicator clears and the authoritative value has caught up to
    /// the optimistic one.
    pub fn set_optimistic<F>(&self, action: &str, key: &str, f: F)
    where
        F: FnOnce(Value) -> Value,
    {
        let store = Arc::clone(&self.inner.store);
        let current = store.get(key).unwrap_or(Value::Null);
        let next = f(current);

        store.set(&optimistic_key(key), next.clone());
        store.set(&indicator_key(action), Value::Bool(true));

        let weak = Arc::downgrade(&self.inner);
        let action = action.to_string();
        let key = key.to_string();
        self.effect(move || {
            let Some(inner) = weak.upgrade() else { return };
            let graph = SignalGraph::from_inner(inner);

            let pending = truthy(&graph.store_get(&indicator_key(&action)));
            // Subscribe to the key so authoritative writes re-evaluate us.
            let _ = graph.store_get(&key);

            let caught_up = graph.inner.store.raw_get(&key).as_ref() == Some(&next);
            if !pending && caught_up {
                graph.inner.store.delete(&optimistic_key(&key));
            }
        });
    }

    /// Derived pending/error signals for a named async action, without
    /// bespoke plumbing per call site.
    pub fn indicate(&self, name: &str) -> Indicator {
        let weak = Arc::downgrade(&self.inner);
        let pending_key = indicator_key(name);
        let pending = self.derived(move || {
            weak.upgrade()
                .map(|inner| truthy(&SignalGraph::from_inner(inner).store_get(&pending_key)))
                .unwrap_or(false)
        });

        let weak = Arc::downgrade(&self.inner);
        let err_key = error_key(name);
        let error = self.derived(move || {
            weak.upgrade()
                .map(|inner| SignalGraph::from_inner(inner).store_get(&err_key))
                .unwrap_or(Value::Null)
        });

        Indicator { pending, error }
    }
}

impl Clone for SignalGraph {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for SignalGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalGraph")
            .field("roots", &self.inner.roots.lock().len())
            .field("mirrors", &self.inner.mirrors.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn graph() -> SignalGraph {
        SignalGraph::new(Arc::new(Store::new()))
    }

    #[test]
    fn derived_recomputes_transitively() {
        let g = graph();
        let base = g.state(2);

        let base_clone = base.clone();
        let doubled = g.derived(move || base_clone.get() * 2);

        assert_eq!(doubled.get(), 4);

        base.set(5);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn nested_effect_becomes_sub_effect() {
        let g = graph();
        let outer = g.state(0);
        let sub_runs = Arc::new(AtomicI32::new(0));

        let g2 = g.clone();
        let outer_clone = outer.clone();
        let sub_runs_clone = sub_runs.clone();
        g.effect(move || {
            outer_clone.get();
            let sub_runs_inner = sub_runs_clone.clone();
            g2.effect(move || {
                sub_runs_inner.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(sub_runs.load(Ordering::SeqCst), 1);
        // Only the outer effect is a scope root.
        assert_eq!(g.inner.roots.lock().len(), 1);

        // Re-triggering the parent disposes the old sub-effect and
        // creates a fresh one.
        outer.set(1);
        assert_eq!(sub_runs.load(Ordering::SeqCst), 2);
        assert_eq!(g.inner.roots.lock().len(), 1);
    }

    #[test]
    fn store_write_propagates_into_mirror() {
        let g = graph();
        let observed = Arc::new(Mutex::new(Value::Null));

        let g2 = g.clone();
        let observed_clone = observed.clone();
        g.effect(move || {
            *observed_clone.lock() = g2.store_get("k");
        });

        assert_eq!(*observed.lock(), Value::Null);

        g.store().set("k", json!("v"));
        assert_eq!(*observed.lock(), json!("v"));
    }

    #[test]
    fn store_delete_propagates_nullish() {
        let g = graph();
        g.store().set("k", json!("v"));

        let runs = Arc::new(AtomicI32::new(0));
        let g2 = g.clone();
        let runs_clone = runs.clone();
        g.effect(move || {
            g2.store_get("k");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);

        g.store().delete("k");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(g.store_get("k"), Value::Null);
    }

    #[test]
    fn reset_disposes_scope_effects() {
        let g = graph();
        let s = g.state(0);
        let runs = Arc::new(AtomicI32::new(0));

        let s_clone = s.clone();
        let runs_clone = runs.clone();
        g.effect(move || {
            s_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        g.reset();
        s.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn indicate_tracks_indicator_keys() {
        let g = graph();
        let indicator = g.indicate("save");

        assert!(!indicator.pending.get_untracked());
        assert_eq!(indicator.error.get_untracked(), Value::Null);

        g.store().set(&indicator_key("save"), json!(true));
        assert!(indicator.pending.get_untracked());

        g.store().set(&error_key("save"), json!("boom"));
        assert_eq!(indicator.error.get_untracked(), json!("boom"));
    }

    #[test]
    fn optimistic_update_reconciles_once_authoritative() {
        let g = graph();
        g.store().set("count", json!(1));

        g.set_optimistic("bump", "count", |v| {
            json!(v.as_i64().unwrap_or(0) + 1)
        });

        // The optimistic value is visible immediately.
        assert_eq!(g.store_get("count"), json!(2));
        assert!(truthy(&g.store_get(&indicator_key("bump"))));

        // The authoritative write lands, then the indicator clears.
        g.store().set("count", json!(2));
        g.store().set(&indicator_key("bump"), json!(false));

        // Shadow is gone; effective value is the authoritative one.
        assert_eq!(g.store().raw_get(&optimistic_key("count")), None);
        assert_eq!(g.store_get("count"), json!(2));
    }
}
