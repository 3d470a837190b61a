//! Output Sinks
//!
//! The suspense controller writes through an abstract [`ChunkSink`] so it
//! can target an HTTP response channel, an in-memory buffer, or anything
//! else that accepts HTML chunks in order.

use parking_lot::Mutex;
use tracing::debug;

/// An ordered consumer of HTML chunks. Single-writer: one controller
/// instance owns one sink per in-flight response.
pub trait ChunkSink {
    fn enqueue(&self, chunk: &str);
}

/// Sink over an unbounded channel, the usual shape for a streaming HTTP
/// response body.
///
/// If the receiver is gone (response aborted), late chunks are discarded:
/// backing suspense work still runs to completion, its output just has
/// nowhere to go.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl ChunkSink for ChannelSink {
    fn enqueue(&self, chunk: &str) {
        if self.tx.send(chunk.to_string()).is_err() {
            debug!(len = chunk.len(), "consumer gone; discarding chunk");
        }
    }
}

/// Sink that collects chunks in memory. Used for whole-buffer rendering
/// and in tests.
#[derive(Default)]
pub struct BufferSink {
    chunks: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The chunks enqueued so far, in order.
    pub fn chunks(&self) -> Vec<String> {
        self.chunks.lock().clone()
    }

    /// All output concatenated.
    pub fn concat(&self) -> String {
        self.chunks.lock().concat()
    }
}

impl ChunkSink for BufferSink {
    fn enqueue(&self, chunk: &str) {
        self.chunks.lock().push(chunk.to_string());
    }
}

impl<S: ChunkSink + ?Sized> ChunkSink for std::sync::Arc<S> {
    fn enqueue(&self, chunk: &str) {
        (**self).enqueue(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_preserves_order() {
        let sink = BufferSink::new();
        sink.enqueue("<html>");
        sink.enqueue("<body>");
        assert_eq!(sink.chunks(), vec!["<html>", "<body>"]);
        assert_eq!(sink.concat(), "<html><body>");
    }

    #[test]
    fn channel_sink_discards_after_receiver_drop() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);

        sink.enqueue("a");
        drop(rx);
        // Does not panic; the chunk is discarded.
        sink.enqueue("b");
    }
}
