//! Capture pipeline (userspace side of the ring buffer)
//!
//! - Record decoding
//! - Transports (kernel ring buffer, in-process channel)
//! - Consumer loop
//! - Output handlers

pub mod consumer;
pub mod event;
pub mod handlers;
pub mod transport;

// Re-export common types
pub use consumer::{
    run_consumer, CancelToken, EventConsumer, LoopStats, LoopSummary, StopReason,
    DEFAULT_POLL_TIMEOUT,
};
pub use event::CapturedEvent;
pub use handlers::{EventHandler, JsonHandler, LogHandler};
pub use transport::{channel, ChannelSink, ChannelSource, EventSource, RingBufSource};
