//! Reactive Primitives
//!
//! This module implements the core reactive system: state cells, derived
//! values, effects, and the shared store. These primitives form the
//! foundation of Weft's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## State
//!
//! A [`State`] is a container for mutable state. When a state's value is
//! read while an effect is executing, the state registers that effect as
//! a subscriber. When the value changes, subscribers re-run synchronously.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that re-runs whenever a
//! subscribed state changes. Effects own cleanups and sub-effects, both
//! torn down before every re-run. Effects are not batched: each write
//! triggers its dependents immediately and independently.
//!
//! ## Derived values
//!
//! [`SignalGraph::derived`] wraps a state in an owned effect that
//! recomputes it, making the state transitively reactive to anything the
//! computation reads.
//!
//! ## The store
//!
//! A [`Store`] is a process-wide key/value registry shared by every
//! graph, with an explicit notification bus instead of ambient global
//! state. Graphs bridge store keys into local mirrors lazily on first
//! read.
//!
//! # Implementation Notes
//!
//! Dependency detection uses a thread-local execution stack: reading a
//! state checks for a running effect and registers it. This approach
//! (sometimes called "automatic dependency tracking") is used by SolidJS,
//! Vue 3, and Leptos. Writes propagate synchronously and depth-first; the
//! dependency-capture window of an async effect closes at its first
//! suspension point.

mod context;
mod effect;
mod graph;
mod state;
mod store;

pub use effect::{Effect, EffectId};
pub use graph::{Indicator, SignalGraph};
pub use state::State;
pub use store::{error_key, indicator_key, optimistic_key, truthy, Store, TransferBatch};

/// The transported value type stored in a [`Store`].
pub use serde_json::Value;
