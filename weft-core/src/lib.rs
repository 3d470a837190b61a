//! Weft Core
//!
//! This crate provides the core runtime for the Weft reactive rendering
//! framework. It implements:
//!
//! - Reactive primitives (state, derived values, effects, the shared store)
//! - Out-of-order streaming with suspense buffering
//! - Live-tree reconciliation with identity-preserving moves
//!
//! UI state lives inside persistent document nodes, so re-rendering must
//! never destroy node identity, and HTML may need to start streaming
//! before all of it is known. The three modules here are the pieces that
//! make that hold together.
//!
//! # Architecture
//!
//! - `reactive`: dependency-tracked signal graph and the shared store
//! - `stream`: suspense buffering and flush ordering for streamed responses
//! - `dom`: tree model, fragment parsing, and the reconciler
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use weft_core::reactive::{SignalGraph, Store};
//!
//! let graph = SignalGraph::new(Arc::new(Store::new()));
//! let count = graph.state(0);
//!
//! let count_reader = count.clone();
//! graph.effect(move || {
//!     println!("count is {}", count_reader.get());
//! });
//!
//! // Effect re-runs synchronously, prints: "count is 5"
//! count.set(5);
//! ```

pub mod dom;
pub mod reactive;
pub mod stream;
