//! Stream Suspense Controller
//!
//! Buffers and orders the fragments of an HTML response so that slow
//! ("suspended") subtrees can be emitted out of declaration order once
//! ready, without blocking or corrupting the main document stream.
//!
//! # How It Works
//!
//! 1. Content with no suspense id is written straight to the sink, FIFO
//!    in call order.
//!
//! 2. Content carrying a suspense id accumulates into that id's buffer.
//!    `start_tag`/`end_tag` count tag opens and closes so the controller
//!    can detect when a suspended subtree is fully closed, however deeply
//!    its own nested suspense boundaries go (those buffer independently
//!    under their own ids).
//!
//! 3. The renderer registers one future per suspended subtree. After the
//!    root document close has been written, [`wait_suspensed_promises`]
//!    drives the registered futures; every settlement triggers a global
//!    rescan that flushes all balanced buffers as
//!    `<template id="U:{n}">…</template><script id="R:{n}">u$('{n}')</script>`
//!    units, in settlement order, not declaration order.
//!
//! The root document close is never delayed by outstanding suspended
//! work, and the controller performs no error handling of its own: a
//! rejected backing future is the renderer's concern upstream.
//!
//! [`wait_suspensed_promises`]: StreamSuspenseController::wait_suspensed_promises

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures_util::future::LocalBoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use super::sink::ChunkSink;

/// Accumulated content for one suspense id.
#[derive(Default)]
pub(crate) struct SuspenseBuffer {
    chunk: String,
    open_tags: u32,
    close_tags: u32,
}

impl SuspenseBuffer {
    fn is_balanced(&self) -> bool {
        self.open_tags == self.close_tags
    }
}

/// Out-of-order streaming controller for one in-flight response.
pub struct StreamSuspenseController {
    sink: Box<dyn ChunkSink>,

    /// Buffers keyed by suspense id, scanned in insertion order on flush.
    buffers: Mutex<IndexMap<u32, SuspenseBuffer>>,

    /// Reserved suspense ids are 1-based and monotonically increasing.
    next_index: AtomicU32,

    doc_complete: AtomicBool,

    /// Futures registered via `suspense_promise`, drained by
    /// `wait_suspensed_promises`.
    pending: Mutex<Vec<LocalBoxFuture<'static, ()>>>,
}

impl StreamSuspenseController {
    pub fn new(sink: impl ChunkSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            buffers: Mutex::new(IndexMap::new()),
            next_index: AtomicU32::new(0),
            doc_complete: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Reserve the next suspense id.
    pub fn next_suspense_index(&self) -> u32 {
        self.next_index.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Write an opening-tag chunk. With a suspense id the chunk buffers
    /// and the id's open-tag counter increments.
    pub fn start_tag(&self, chunk: Option<&str>, suspense_id: Option<u32>) {
        self.write(chunk, suspense_id, 1, 0);
    }

    /// Write a content chunk. `None` marks a fragment boundary with no
    /// literal tag.
    pub fn enqueue(&self, chunk: Option<&str>, suspense_id: Option<u32>) {
        self.write(chunk, suspense_id, 0, 0);
    }

    /// Write a closing-tag chunk. With a suspense id the chunk buffers
    /// and the id's close-tag counter increments.
    pub fn end_tag(&self, chunk: Option<&str>, suspense_id: Option<u32>) {
        self.write(chunk, suspense_id, 0, 1);
    }

    fn write(&self, chunk: Option<&str>, suspense_id: Option<u32>, open: u32, close: u32) {
        match suspense_id {
            None => {
                if let Some(chunk) = chunk {
                    self.sink.enqueue(chunk);
                }
            }
            Some(id) => {
                let mut buffers = self.buffers.lock();
                let buffer = buffers.entry(id).or_default();
                if let Some(chunk) = chunk {
                    buffer.chunk.push_str(chunk);
                }
                buffer.open_tags += open;
                buffer.close_tags += close;
            }
        }
    }

    /// Register a future backing a suspended subtree. Once the whole
    /// document has been written and the future settles, all
    /// currently-balanced buffers are flushed.
    pub fn suspense_promise<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        self.pending.lock().push(Box::pin(future));
    }

    /// Drive the registered futures to completion, flushing resolved
    /// buffers as each settles. Call after the closing root tag has been
    /// written; the root close is never delayed by suspended work.
    ///
    /// Futures registered while another is being driven (nested suspense)
    /// join the drain.
    pub async fn wait_suspensed_promises(&self) {
        self.doc_complete.store(true, Ordering::SeqCst);

        let mut in_flight = FuturesUnordered::new();
        loop {
            let registered: Vec<LocalBoxFuture<'static, ()>> = {
                let mut pending = self.pending.lock();
                pending.drain(..).collect()
            };
            for future in registered {
                in_flight.push(future);
            }

            if in_flight.is_empty() {
                if self.pending.lock().is_empty() {
                    break;
                }
                continue;
            }

            if in_flight.next().await.is_some() {
                self.flush_and_unsuspense_all_ready();
            }
        }
    }

    /// Scan all suspense buffers and emit every balanced one as a
    /// resolution unit, removing it. Unbalanced buffers are left for a
    /// later pass.
    pub fn flush_and_unsuspense_all_ready(&self) {
        let ready: Vec<(u32, SuspenseBuffer)> = {
            let mut buffers = self.buffers.lock();
            let ids: Vec<u32> = buffers
                .iter()
                .filter(|(_, buffer)| buffer.is_balanced())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| buffers.shift_remove(&id).map(|buffer| (id, buffer)))
                .collect()
        };

        for (id, buffer) in ready {
            debug!(
                id,
                len = buffer.chunk.len(),
                complete = self.doc_complete.load(Ordering::SeqCst),
                "flushing resolved suspense"
            );
            self.sink.enqueue(&format!(
                "<template id=\"U:{id}\">{chunk}</template><script id=\"R:{id}\">u$('{id}')</script>",
                id = id,
                chunk = buffer.chunk,
            ));
        }
    }
}
