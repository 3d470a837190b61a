//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever a state
//! cell it read during its last run changes.
//!
//! # Lifecycle
//!
//! 1. When created through a [`SignalGraph`](super::SignalGraph), the
//!    effect runs immediately to establish its initial dependencies.
//!
//! 2. When any subscribed state changes, the effect is re-invoked.
//!
//! 3. Before the body re-executes, all sub-effects (effects created while
//!    this one was on the execution stack) are recursively disposed and
//!    unregistered from every state they had subscribed to, and then this
//!    effect's own cleanups run, in registration order.
//!
//! 4. Disposal (scope reset or parent re-run) is terminal: a disposed
//!    effect never runs again.
//!
//! # Async bodies
//!
//! An async effect body is polled once synchronously inside the tracking
//! scope. If it suspends, the dependency-capture window closes and the
//! remainder of the future is driven on the local task set without
//! tracking. A re-run or disposal aborts a still-pending continuation
//! from the previous run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;
use futures_util::task::noop_waker_ref;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

use super::context::EffectScope;
use super::state::SubscriberSet;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for an effect.
///
/// Subscriber sets deduplicate by this ID, so an effect that re-reads the
/// same state across runs is registered once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

impl EffectId {
    fn next() -> Self {
        Self(EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// The effect body: a plain closure, or a closure producing a future
/// whose first poll happens inside the dependency-capture window.
enum Body {
    Sync(Box<dyn Fn()>),
    Async(Box<dyn Fn() -> LocalBoxFuture<'static, ()>>),
}

struct EffectInner {
    id: EffectId,

    body: Body,

    /// Cleanup callbacks, run in registration order before each re-run
    /// and on disposal.
    cleanups: Mutex<SmallVec<[Box<dyn FnOnce()>; 2]>>,

    /// Effects created while this one was executing. Disposed recursively
    /// before each re-run.
    sub_effects: Mutex<Vec<Effect>>,

    /// Back-references to the subscriber sets of every state this effect
    /// has read, used to unregister on disposal.
    subscriptions: Mutex<Vec<Weak<SubscriberSet>>>,

    /// The last propagation pass in which this effect re-entered itself.
    /// See [`State::set`](super::State::set) for the guard rule.
    last_self_pass: AtomicU64,

    disposed: AtomicBool,

    /// Continuation of a suspended async body from the previous run.
    pending: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// A side-effecting computation that re-runs when its dependencies change.
///
/// Cloning an `Effect` produces another handle to the same effect.
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    pub(crate) fn new_sync<F>(body: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::with_body(Body::Sync(Box::new(body)))
    }

    pub(crate) fn new_async<F>(body: F) -> Self
    where
        F: Fn() -> LocalBoxFuture<'static, ()> + 'static,
    {
        Self::with_body(Body::Async(Box::new(body)))
    }

    fn with_body(body: Body) -> Self {
        Self {
            inner: Arc::new(EffectInner {
                id: EffectId::next(),
                body,
                cleanups: Mutex::new(SmallVec::new()),
                sub_effects: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                last_self_pass: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                pending: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn id(&self) -> EffectId {
        self.inner.id
    }

    /// Register `f` to run the next time this effect is about to be
    /// cleaned (re-run or disposal). Multiple cleanups run in
    /// registration order.
    pub fn on_cleanup<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.inner.cleanups.lock().push(Box::new(f));
    }

    /// Adopt `child` as a sub-effect, disposed before this effect re-runs.
    pub(crate) fn adopt(&self, child: Effect) {
        self.inner.sub_effects.lock().push(child);
    }

    /// Record that this effect subscribed to a state's subscriber set.
    pub(crate) fn track_subscription(&self, set: Weak<SubscriberSet>) {
        let mut subs = self.inner.subscriptions.lock();
        if !subs.iter().any(|existing| existing.ptr_eq(&set)) {
            subs.push(set);
        }
    }

    /// Claim the single allowed self re-entry for propagation pass
    /// `generation`. Returns `false` if already claimed for this pass.
    pub(crate) fn claim_self_pass(&self, generation: u64) -> bool {
        self.inner.last_self_pass.swap(generation, Ordering::SeqCst) != generation
    }

    /// Execute the effect body.
    ///
    /// Disposes sub-effects and runs cleanups first, then runs the body
    /// inside an execution-stack scope so reads register dependencies.
    pub(crate) fn run(&self) {
        if self.is_disposed() {
            return;
        }

        self.teardown();

        trace!(effect = ?self.inner.id, "running effect");
        let scope = EffectScope::enter(self.clone());

        match &self.inner.body {
            Body::Sync(f) => f(),
            Body::Async(f) => {
                let mut fut = f();
                let mut cx = Context::from_waker(noop_waker_ref());
                match fut.as_mut().poll(&mut cx) {
                    Poll::Ready(()) => {}
                    Poll::Pending => {
                        // Close the capture window before the continuation
                        // is scheduled: reads past the first suspension
                        // point are untracked.
                        drop(scope);
                        let handle = tokio::task::spawn_local(fut);
                        *self.inner.pending.lock() = Some(handle);
                        return;
                    }
                }
            }
        }
    }

    /// Dispose sub-effects, run own cleanups, abort a pending async
    /// continuation. Leaves subscriptions intact (the effect stays a
    /// subscriber across re-runs; disposal severs them).
    fn teardown(&self) {
        if let Some(handle) = self.inner.pending.lock().take() {
            handle.abort();
        }

        let subs: Vec<Effect> = std::mem::take(&mut *self.inner.sub_effects.lock());
        for sub in subs {
            sub.dispose();
        }

        let cleanups: SmallVec<[Box<dyn FnOnce()>; 2]> =
            std::mem::take(&mut *self.inner.cleanups.lock());
        for cleanup in cleanups {
            cleanup();
        }
    }

    /// Dispose of the effect: run its teardown and unregister it from
    /// every state it subscribed to. Terminal.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        trace!(effect = ?self.inner.id, "disposing effect");
        self.teardown();

        let subscriptions: Vec<Weak<SubscriberSet>> =
            std::mem::take(&mut *self.inner.subscriptions.lock());
        for set in subscriptions {
            if let Some(set) = set.upgrade() {
                set.remove(self.inner.id);
            }
        }
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
