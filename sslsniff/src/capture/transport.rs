//! # Event Transport
//!
//! Consumer side of the kernel → userspace queue.
//!
//! - [`RingBufSource`]: the `EVENTS` ring buffer, woken through tokio's reactor
//!   via [`AsyncFd`]
//! - [`channel`]: a bounded in-process queue with the same drop-when-full
//!   semantics, for producers that live in userspace
//!
//! Both deliver each record exactly once and never block a producer.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aya::maps::{MapData, RingBuf};
use aya::Ebpf;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use crate::domain::TransportError;

/// Name of the ring buffer map in the kernel object
pub const EVENTS_MAP: &str = "EVENTS";

/// A queue of raw capture records
#[allow(async_fn_in_trait)]
pub trait EventSource {
    /// Wait up to `timeout` for records and pass each one to `on_record`
    ///
    /// Returns the number of records delivered; `0` means the timeout elapsed.
    ///
    /// # Errors
    /// [`TransportError::Interrupted`] and [`TransportError::Closed`] end the
    /// wait normally; anything else is a transport failure.
    async fn poll(
        &mut self,
        timeout: Duration,
        on_record: &mut dyn FnMut(&[u8]),
    ) -> Result<usize, TransportError>;
}

/// The kernel ring buffer
pub struct RingBufSource {
    ring: AsyncFd<RingBuf<MapData>>,
}

impl RingBufSource {
    /// Register `ring` with the tokio reactor
    ///
    /// # Errors
    /// Returns an error if the fd cannot be registered
    pub fn new(ring: RingBuf<MapData>) -> Result<Self, TransportError> {
        let ring = AsyncFd::with_interest(ring, Interest::READABLE).map_err(TransportError::Poll)?;
        Ok(Self { ring })
    }

    /// Take ownership of the `EVENTS` map
    ///
    /// # Errors
    /// Returns an error if the map is missing, not a ring buffer, or cannot
    /// be registered with the reactor
    pub fn from_ebpf(bpf: &mut Ebpf) -> Result<Self, TransportError> {
        let map = bpf
            .take_map(EVENTS_MAP)
            .ok_or_else(|| TransportError::Create(format!("{EVENTS_MAP} map not found")))?;
        Self::new(RingBuf::try_from(map)?)
    }
}

impl EventSource for RingBufSource {
    async fn poll(
        &mut self,
        timeout: Duration,
        on_record: &mut dyn FnMut(&[u8]),
    ) -> Result<usize, TransportError> {
        let mut guard = match tokio::time::timeout(timeout, self.ring.readable_mut()).await {
            Err(_elapsed) => return Ok(0),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                return Err(TransportError::Interrupted);
            }
            Ok(Err(e)) => return Err(TransportError::Poll(e)),
            Ok(Ok(guard)) => guard,
        };

        // Batch drain, then wait for the next wakeup
        let ring = guard.get_inner_mut();
        let mut delivered = 0;
        while let Some(item) = ring.next() {
            on_record(&item);
            delivered += 1;
        }
        guard.clear_ready();
        Ok(delivered)
    }
}

/// Create a bounded in-process transport holding at most `capacity` records
#[must_use]
pub fn channel(capacity: usize) -> (ChannelSink, ChannelSource) {
    let (tx, rx) = bounded(capacity);
    let sink = ChannelSink { tx, dropped: Arc::new(AtomicU64::new(0)) };
    (sink, ChannelSource { rx })
}

/// Producer half of [`channel`]; clone it for each producer thread
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<Vec<u8>>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Queue `record` without waiting. Returns `false` and counts the drop if
    /// the queue is full or the consumer is gone.
    pub fn push(&self, record: Vec<u8>) -> bool {
        if self.tx.try_send(record).is_ok() {
            true
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Records dropped so far, across all clones
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half of [`channel`]
pub struct ChannelSource {
    rx: Receiver<Vec<u8>>,
}

impl ChannelSource {
    fn drain(&self, on_record: &mut dyn FnMut(&[u8])) -> usize {
        let mut delivered = 0;
        for record in self.rx.try_iter() {
            on_record(&record);
            delivered += 1;
        }
        delivered
    }
}

impl EventSource for ChannelSource {
    async fn poll(
        &mut self,
        timeout: Duration,
        on_record: &mut dyn FnMut(&[u8]),
    ) -> Result<usize, TransportError> {
        let queued = self.drain(on_record);
        if queued > 0 {
            return Ok(queued);
        }

        // crossbeam waits block, keep them off the runtime threads
        let rx = self.rx.clone();
        let first = tokio::task::spawn_blocking(move || rx.recv_timeout(timeout))
            .await
            .map_err(|e| TransportError::Poll(io::Error::other(e)))?;
        match first {
            Ok(record) => {
                on_record(&record);
                Ok(1 + self.drain(on_record))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}
