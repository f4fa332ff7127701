//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the wire record, the per-call context and the correlation routine
//! shared between the kernel-side probes and userspace. All map and ring buffer
//! types use `#[repr(C)]` for a consistent layout across the boundary.
//!
//! ## Correlation
//!
//! A TLS read or write is observed twice: once when the library function is
//! entered (buffer pointer and requested length are known) and once when it
//! returns (the number of bytes actually transferred is known). [`record_entry`]
//! stores the entry half keyed by thread, [`complete_call`] consumes it on return
//! and emits one [`DataEvent`]. Both are generic over [`ContextStore`] and
//! [`EventSink`] so the same routine runs in the kernel (LRU hash map + ring
//! buffer) and in userspace tests.
//!
//! ## Key Types
//!
//! - [`DataEvent`] - Captured plaintext record passed via ring buffer
//! - [`CallContext`] - Entry-time arguments of an in-flight call
//! - [`SessionKey`] - `(pid, session handle)` key for the socket fd binding map
//! - [`Outcome`] - What happened to a return firing (also the counter index)

#![cfg_attr(not(test), no_std)]

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of plaintext bytes copied per call
///
/// Larger transfers are truncated; [`DataEvent::len`] still carries the real size.
pub const MAX_CAPTURE_BYTES: usize = 4096;

/// Length of the kernel task command name (`TASK_COMM_LEN`)
pub const COMM_LEN: usize = 16;

/// Byte offset of [`DataEvent::data`] within the wire record
pub const DATA_OFFSET: usize = 56;

/// Size of one wire record in the ring buffer
pub const RECORD_SIZE: usize = DATA_OFFSET + MAX_CAPTURE_BYTES;

/// Capacity of the in-flight call store (LRU evicted when full)
pub const MAX_INFLIGHT_CALLS: u32 = 10_240;

/// Capacity of the session → socket fd binding map
pub const MAX_SESSIONS: u32 = 4096;

/// Ring buffer size in bytes (power of two, multiple of the page size)
pub const RING_BUFFER_BYTES: u32 = 1024 * 1024;

/// Socket fd value used when the session was never bound with `SSL_set_fd`
pub const FD_UNKNOWN: i32 = -1;

// ============================================================================
// Direction
// ============================================================================

/// Direction of a captured TLS transfer, as seen from the instrumented process
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Plaintext returned by a read/recv call
    Read = 1,
    /// Plaintext handed to a write/send call
    Write = 2,
}

impl Direction {
    /// Decode the wire byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            _ => None,
        }
    }
}

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Captured plaintext record sent from eBPF to userspace via ring buffer
///
/// The layout is the wire format; offsets are checked at compile time below.
/// Only the first `captured_len` bytes of `data` are meaningful.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DataEvent {
    /// Command name of the calling task (NUL padded, may be truncated)
    pub comm: [u8; COMM_LEN],

    /// Process ID (TGID in Linux terms)
    pub pid: u32,

    /// Thread ID (PID in Linux terms)
    pub tid: u32,

    /// Return time in nanoseconds (`bpf_ktime_get_ns()`, monotonic since boot)
    pub timestamp_ns: u64,

    /// Time spent inside the library call (return − entry)
    pub latency_ns: u64,

    /// [`Direction`] as its wire byte
    pub direction: u8,

    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 3],

    /// Socket fd bound to the session, or [`FD_UNKNOWN`]
    pub fd: i32,

    /// Bytes actually transferred by the call
    pub len: u32,

    /// Bytes of `data` that were copied (`≤ MAX_CAPTURE_BYTES`, `≤ len`)
    pub captured_len: u32,

    /// Captured plaintext
    pub data: [u8; MAX_CAPTURE_BYTES],
}

impl DataEvent {
    /// Create a zeroed record
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            comm: [0u8; COMM_LEN],
            pid: 0,
            tid: 0,
            timestamp_ns: 0,
            latency_ns: 0,
            direction: 0,
            _padding: [0u8; 3],
            fd: FD_UNKNOWN,
            len: 0,
            captured_len: 0,
            data: [0u8; MAX_CAPTURE_BYTES],
        }
    }
}

const _: () = {
    assert!(core::mem::offset_of!(DataEvent, pid) == 16);
    assert!(core::mem::offset_of!(DataEvent, tid) == 20);
    assert!(core::mem::offset_of!(DataEvent, timestamp_ns) == 24);
    assert!(core::mem::offset_of!(DataEvent, latency_ns) == 32);
    assert!(core::mem::offset_of!(DataEvent, direction) == 40);
    assert!(core::mem::offset_of!(DataEvent, fd) == 44);
    assert!(core::mem::offset_of!(DataEvent, len) == 48);
    assert!(core::mem::offset_of!(DataEvent, captured_len) == 52);
    assert!(core::mem::offset_of!(DataEvent, data) == DATA_OFFSET);
    assert!(core::mem::size_of::<DataEvent>() == RECORD_SIZE);
};

/// Entry-time arguments of one in-flight read or write
///
/// Stored in the `CALL_CONTEXTS` map keyed by `pid_tgid` when the library
/// function is entered, consumed when it returns.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    /// User-space address of the plaintext buffer
    pub buf: u64,

    /// Length argument of the call (capacity for reads, size for writes)
    pub requested_len: u64,

    /// First argument of the call (`SSL*`, `gnutls_session_t`, `PRFileDesc*`)
    pub handle: u64,

    /// Entry time in nanoseconds
    pub start_ns: u64,

    /// [`Direction`] as its wire byte
    pub direction: u8,

    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 7],
}

impl CallContext {
    #[must_use]
    pub const fn new(
        direction: Direction,
        buf: u64,
        requested_len: u64,
        handle: u64,
        start_ns: u64,
    ) -> Self {
        Self { buf, requested_len, handle, start_ns, direction: direction as u8, _padding: [0u8; 7] }
    }
}

/// Key of the session → socket fd binding map
///
/// Session handles are process-local pointers, so the owning process is part of the key.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub pid: u32,

    #[allow(clippy::pub_underscore_fields)]
    pub _padding: u32,

    pub handle: u64,
}

impl SessionKey {
    #[must_use]
    pub const fn new(pid: u32, handle: u64) -> Self {
        Self { pid, _padding: 0, handle }
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// Result of a return firing
///
/// The discriminant doubles as the index into the kernel `STATS` counter array.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// One record handed to the transport
    Emitted = 0,
    /// No entry was stored for this thread
    OrphanReturn = 1,
    /// The call returned an error or end of stream (`ret <= 0`)
    FailedCall = 2,
    /// The stored entry belongs to the other direction
    DirectionMismatch = 3,
    /// The transport was full
    TransportFull = 4,
}

/// Number of [`Outcome`] variants (size of the `STATS` array)
pub const OUTCOME_COUNT: u32 = 5;

impl Outcome {
    pub const ALL: [Outcome; OUTCOME_COUNT as usize] = [
        Outcome::Emitted,
        Outcome::OrphanReturn,
        Outcome::FailedCall,
        Outcome::DirectionMismatch,
        Outcome::TransportFull,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Outcome::Emitted => "emitted",
            Outcome::OrphanReturn => "orphan_return",
            Outcome::FailedCall => "failed_call",
            Outcome::DirectionMismatch => "direction_mismatch",
            Outcome::TransportFull => "transport_full",
        }
    }
}

/// Return-time facts about a completed call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub direction: Direction,
    /// Bytes actually transferred
    pub len: u32,
    /// Bytes to copy from the call's buffer
    pub captured_len: u32,
    /// Return time in nanoseconds
    pub end_ns: u64,
}

/// Keyed store of in-flight calls
///
/// Implementations must be safe under concurrent access from many CPUs and must
/// never block. `put` overwrites an existing entry for the same key.
pub trait ContextStore {
    fn put(&self, key: u64, call: &CallContext);

    /// Read and delete the entry for `key`
    fn take(&self, key: u64) -> Option<CallContext>;
}

/// Producer side of the event transport
pub trait EventSink {
    /// Copy `completion.captured_len` bytes from `call.buf` into a record and
    /// publish it. Returns `false` if the record was dropped.
    fn emit(&self, call: &CallContext, completion: &Completion) -> bool;
}

/// Bytes to copy for a transfer of `len` bytes into a buffer of `requested_len`
#[inline(always)]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn capture_len(len: u32, requested_len: u64) -> u32 {
    let mut captured = len;
    if u64::from(captured) > requested_len {
        captured = requested_len as u32;
    }
    if captured as usize > MAX_CAPTURE_BYTES {
        captured = MAX_CAPTURE_BYTES as u32;
    }
    captured
}

/// ENTER half: remember the call's arguments, replacing any unconsumed entry
#[inline(always)]
pub fn record_entry<S: ContextStore>(store: &S, key: u64, call: &CallContext) {
    store.put(key, call);
}

/// RETURN half: consume the entry for `key` and emit the captured record
///
/// `ret` is the library function's return value (bytes transferred, or an
/// error code when `<= 0`). The entry is removed whatever the outcome.
#[inline(always)]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn complete_call<S: ContextStore, E: EventSink>(
    store: &S,
    sink: &E,
    key: u64,
    direction: Direction,
    ret: i64,
    now_ns: u64,
) -> Outcome {
    let Some(call) = store.take(key) else {
        return Outcome::OrphanReturn;
    };
    if call.direction != direction as u8 {
        return Outcome::DirectionMismatch;
    }
    if ret <= 0 {
        return Outcome::FailedCall;
    }

    let len = if ret > i64::from(u32::MAX) { u32::MAX } else { ret as u32 };
    let completion = Completion {
        direction,
        len,
        captured_len: capture_len(len, call.requested_len),
        end_ns: now_ns,
    };

    if sink.emit(&call, &completion) {
        Outcome::Emitted
    } else {
        Outcome::TransportFull
    }
}

#[cfg(feature = "user")]
use aya::Pod;

// These unsafe impls are required for eBPF <-> userspace communication
// Pod trait ensures types can be safely transmitted as plain bytes
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for DataEvent {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for CallContext {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for SessionKey {}
