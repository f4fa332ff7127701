//! # Consumer Loop
//!
//! Drains an [`EventSource`], decodes each record and hands it to the caller's
//! [`EventHandler`] in transport order.
//!
//! ## Termination
//!
//! - [`CancelToken::cancel`] from any thread or task: observed within one
//!   poll timeout
//! - Interrupted wait or closed transport: clean stop
//! - Any other transport error: returned to the caller
//!
//! Malformed records are counted and skipped; they never stop the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use super::event::CapturedEvent;
use super::handlers::EventHandler;
use super::transport::EventSource;
use crate::domain::TransportError;

/// Poll timeout used when none is configured
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Shared stop flag for a running consumer loop
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    Interrupted,
    Closed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::Interrupted => f.write_str("interrupted"),
            StopReason::Closed => f.write_str("transport closed"),
        }
    }
}

/// Counters of one consumer run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    /// Records decoded and handed to the handler
    pub delivered: u64,
    /// Records that failed to decode
    pub malformed: u64,
    /// Delivered records whose payload was cut short
    pub truncated: u64,
}

/// Result of a consumer run that ended without a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub stop: StopReason,
    pub stats: LoopStats,
}

/// Encapsulates record decoding and dispatch
pub struct EventConsumer<'h, H: EventHandler + ?Sized> {
    handler: &'h mut H,
    pub stats: LoopStats,
}

impl<'h, H: EventHandler + ?Sized> EventConsumer<'h, H> {
    #[must_use]
    pub fn new(handler: &'h mut H) -> Self {
        Self { handler, stats: LoopStats::default() }
    }

    /// Decode one raw record and dispatch it
    pub fn process_record(&mut self, record: &[u8]) {
        match CapturedEvent::decode(record) {
            Ok(event) => {
                self.stats.delivered += 1;
                if event.is_truncated() {
                    self.stats.truncated += 1;
                }
                self.handler.handle(&event);
            }
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Dropping malformed record: {e}");
            }
        }
    }

    /// Poll `source` until cancelled, interrupted or closed
    ///
    /// # Errors
    /// Returns the first non-graceful transport error
    pub async fn run<S: EventSource>(
        &mut self,
        source: &mut S,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<StopReason, TransportError> {
        while !cancel.is_cancelled() {
            match source.poll(timeout, &mut |record| self.process_record(record)).await {
                Ok(_) => {}
                Err(TransportError::Interrupted) => {
                    debug!("Poll interrupted, stopping consumer");
                    return Ok(StopReason::Interrupted);
                }
                Err(TransportError::Closed) => return Ok(StopReason::Closed),
                Err(e) => return Err(e),
            }
        }
        Ok(StopReason::Cancelled)
    }
}

/// Run a consumer loop over `source` until it stops
///
/// # Errors
/// Returns the first non-graceful transport error
pub async fn run_consumer<S, H>(
    source: &mut S,
    handler: &mut H,
    cancel: &CancelToken,
    timeout: Duration,
) -> Result<LoopSummary, TransportError>
where
    S: EventSource,
    H: EventHandler + ?Sized,
{
    let mut consumer = EventConsumer::new(handler);
    let stop = consumer.run(source, cancel, timeout).await?;
    Ok(LoopSummary { stop, stats: consumer.stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::transport::channel;
    use sslsniff_common::Direction;

    struct FailingSource;

    impl EventSource for FailingSource {
        async fn poll(
            &mut self,
            _timeout: Duration,
            _on_record: &mut dyn FnMut(&[u8]),
        ) -> Result<usize, TransportError> {
            Err(TransportError::Poll(std::io::Error::other("ring buffer gone")))
        }
    }

    struct InterruptedSource;

    impl EventSource for InterruptedSource {
        async fn poll(
            &mut self,
            _timeout: Duration,
            _on_record: &mut dyn FnMut(&[u8]),
        ) -> Result<usize, TransportError> {
            Err(TransportError::Interrupted)
        }
    }

    fn record(data: &[u8]) -> Vec<u8> {
        CapturedEvent {
            comm: "wget".to_string(),
            pid: 1,
            tid: 1,
            timestamp_ns: 0,
            latency_ns: 0,
            direction: Direction::Read,
            fd: None,
            len: u32::try_from(data.len()).unwrap(),
            data: data.to_vec(),
        }
        .to_record()
    }

    #[tokio::test]
    async fn test_cancelled_before_start_returns_immediately() {
        let (_sink, mut source) = channel(4);
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut handler = |_: &CapturedEvent| panic!("no events expected");
        let summary =
            run_consumer(&mut source, &mut handler, &cancel, Duration::from_millis(5))
                .await
                .unwrap();
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(summary.stats, LoopStats::default());
    }

    #[tokio::test]
    async fn test_malformed_records_are_counted_and_skipped() {
        let (sink, mut source) = channel(4);
        sink.push(vec![0u8; 3]);
        sink.push(record(b"ok"));
        drop(sink);

        let mut seen = Vec::new();
        let mut handler = |e: &CapturedEvent| seen.push(e.data.clone());
        let summary = run_consumer(
            &mut source,
            &mut handler,
            &CancelToken::new(),
            Duration::from_millis(5),
        )
        .await
        .unwrap();

        assert_eq!(summary.stop, StopReason::Closed);
        assert_eq!(summary.stats.delivered, 1);
        assert_eq!(summary.stats.malformed, 1);
        assert_eq!(seen, [b"ok".to_vec()]);
    }

    #[tokio::test]
    async fn test_transport_failure_is_returned() {
        let mut handler = |_: &CapturedEvent| {};
        let err = run_consumer(
            &mut FailingSource,
            &mut handler,
            &CancelToken::new(),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::Poll(_)));
    }

    #[tokio::test]
    async fn test_interrupt_stops_cleanly() {
        let mut handler = |_: &CapturedEvent| {};
        let summary = run_consumer(
            &mut InterruptedSource,
            &mut handler,
            &CancelToken::new(),
            Duration::from_millis(5),
        )
        .await
        .unwrap();
        assert_eq!(summary.stop, StopReason::Interrupted);
    }

    #[tokio::test]
    async fn test_cancel_from_other_thread() {
        let (sink, mut source) = channel(4);
        let cancel = CancelToken::new();
        let remote = cancel.clone();

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let mut handler = |_: &CapturedEvent| {};
        let summary =
            run_consumer(&mut source, &mut handler, &cancel, Duration::from_millis(5))
                .await
                .unwrap();
        canceller.join().unwrap();
        drop(sink);

        assert_eq!(summary.stop, StopReason::Cancelled);
    }
}
