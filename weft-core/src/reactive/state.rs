//! State Implementation
//!
//! A `State` is the fundamental reactive primitive. It holds a value and
//! tracks which effects depend on it.
//!
//! # How State Works
//!
//! 1. When a state is read while an effect is on the execution stack, the
//!    state registers that effect as a subscriber (deduplicated by id).
//!
//! 2. When a state's value changes, the subscribers captured at write
//!    time are re-invoked, in iteration order, synchronously. The
//!    snapshot rule means effects that re-subscribe mid-propagation are
//!    not invoked twice and cannot starve the pass.
//!
//! 3. A write whose new value equals the old one skips propagation. The
//!    explicit [`State::set_forced`] path always propagates; the store
//!    bridge uses it for deletions, whose nullish sentinel must stay
//!    reactive.
//!
//! # Self-triggering writes
//!
//! An effect that writes a state it also subscribes to would re-invoke
//! itself forever. Each state stamps every propagation pass with a
//! generation id; a running effect may claim one re-entry per pass, and a
//! second self-triggering write within the same pass is skipped. The
//! generation comparison makes the "at most one self re-entry" rule an
//! inspectable invariant rather than an implicit flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::trace;

use super::context;
use super::effect::{Effect, EffectId};

/// Counter for generating unique state IDs.
static STATE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Counter for propagation pass generations, shared by all states so a
/// generation id identifies one pass globally.
static PASS_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The set of effects subscribed to one state.
///
/// Effects hold weak back-references to this set so they can unregister
/// themselves on disposal.
pub(crate) struct SubscriberSet {
    entries: Mutex<SmallVec<[Effect; 4]>>,
}

impl SubscriberSet {
    fn new() -> Self {
        Self {
            entries: Mutex::new(SmallVec::new()),
        }
    }

    fn insert(&self, effect: &Effect) {
        let mut entries = self.entries.lock();
        if !entries.iter().any(|e| e.id() == effect.id()) {
            entries.push(effect.clone());
        }
    }

    pub(crate) fn remove(&self, id: EffectId) {
        self.entries.lock().retain(|e| e.id() != id);
    }

    /// Clone the current subscriber list. Propagation iterates the
    /// snapshot with no lock held, so subscriber mutation mid-pass is
    /// safe and invisible to the pass.
    fn snapshot(&self) -> SmallVec<[Effect; 4]> {
        self.entries.lock().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Per-state propagation pass bookkeeping.
struct PassState {
    propagating: AtomicBool,
    generation: AtomicU64,
}

impl PassState {
    fn new() -> Self {
        Self {
            propagating: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Begin (or join) a propagation pass for this state. A write issued
    /// from inside a subscriber of the same state joins the pass already
    /// in flight and shares its generation.
    fn begin(&self) -> PassToken<'_> {
        if self.propagating.swap(true, Ordering::SeqCst) {
            PassToken {
                state: self,
                generation: self.generation.load(Ordering::SeqCst),
                outermost: false,
            }
        } else {
            let generation = PASS_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
            self.generation.store(generation, Ordering::SeqCst);
            PassToken {
                state: self,
                generation,
                outermost: true,
            }
        }
    }
}

struct PassToken<'a> {
    state: &'a PassState,
    generation: u64,
    outermost: bool,
}

impl Drop for PassToken<'_> {
    fn drop(&mut self) {
        if self.outermost {
            self.state.propagating.store(false, Ordering::SeqCst);
        }
    }
}

struct StateInner<T> {
    id: u64,
    value: RwLock<T>,
    subscribers: Arc<SubscriberSet>,
    pass: PassState,
}

/// A reactive state cell holding a value of type `T`.
///
/// Cloning a `State` produces another handle to the same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = State::new(0);
///
/// // Read the value (registers a dependency inside an effect)
/// let value = count.get();
///
/// // Update the value (re-invokes subscribed effects)
/// count.set(5);
/// ```
pub struct State<T> {
    inner: Arc<StateInner<T>>,
}

impl<T> State<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new state cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(StateInner {
                id: STATE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                value: RwLock::new(value),
                subscribers: Arc::new(SubscriberSet::new()),
                pass: PassState::new(),
            }),
        }
    }

    /// Get the current value.
    ///
    /// If an effect is executing inside its dependency-capture window,
    /// it is registered as a subscriber of this state.
    pub fn get(&self) -> T {
        if let Some(effect) = context::current() {
            self.inner.subscribers.insert(&effect);
            effect.track_subscription(Arc::downgrade(&self.inner.subscribers));
        }
        self.inner.value.read().clone()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and re-invoke subscribed effects.
    ///
    /// Skips propagation when the new value equals the old one. Use
    /// [`State::set_forced`] for writes that must propagate regardless.
    pub fn set(&self, value: T) {
        let changed = {
            let mut guard = self.inner.value.write();
            if *guard == value {
                false
            } else {
                *guard = value;
                true
            }
        };

        if changed {
            self.propagate();
        }
    }

    /// Set a new value and propagate unconditionally, even when the new
    /// value equals the old one.
    pub fn set_forced(&self, value: T) {
        *self.inner.value.write() = value;
        self.propagate();
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(next);
    }

    /// Re-invoke every effect in the write-time subscriber snapshot.
    fn propagate(&self) {
        let pass = self.inner.pass.begin();
        let snapshot = self.inner.subscribers.snapshot();

        trace!(
            state = self.inner.id,
            subscribers = snapshot.len(),
            generation = pass.generation,
            "propagating write"
        );

        for effect in snapshot {
            if effect.is_disposed() {
                continue;
            }

            // A currently-running effect writing a state it subscribes to
            // re-enters itself at most once per propagation pass.
            if context::is_running(&effect) && !effect.claim_self_pass(pass.generation) {
                continue;
            }

            effect.run();
        }
    }
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for State<T>
where
    T: Clone + PartialEq + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .finish()
    }
}
