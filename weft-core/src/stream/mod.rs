//! Out-of-Order Streaming
//!
//! Server-side buffering and ordering for streamed HTML responses. The
//! [`StreamSuspenseController`] emits ready content immediately and
//! buffers suspended subtrees under their suspense ids until their
//! backing futures settle, then appends them as template+script
//! resolution units the client reconciler knows how to promote.

mod sink;
mod suspense;
mod transfer;

pub use sink::{BufferSink, ChannelSink, ChunkSink};
pub use suspense::StreamSuspenseController;
pub use transfer::{decode_entries, decode_value};
