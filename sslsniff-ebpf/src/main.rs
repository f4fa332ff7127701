//! # eBPF Kernel-Side Instrumentation
//!
//! Uprobes on TLS library read/write functions that copy plaintext out of the
//! caller's buffer once the call has returned.
//!
//! ## Programs
//!
//! - **Uprobe**: `ssl_read_enter`, `ssl_write_enter` - remember buffer and length
//! - **Uretprobe**: `ssl_read_return`, `ssl_write_return` - capture transferred bytes
//! - **Uprobe**: `ssl_set_fd` - bind an OpenSSL session to its socket fd
//!
//! The same enter/return programs serve every library family; userspace attaches
//! them to `SSL_read`, `gnutls_record_recv`, `PR_Recv`, etc.
//!
//! ## Maps (Shared with Userspace)
//!
//! - `EVENTS` - Ring buffer (1MB) of [`DataEvent`] records
//! - `CALL_CONTEXTS` - In-flight calls keyed by `pid_tgid` (LRU bounded)
//! - `SESSION_FDS` - `(pid, SSL*)` → socket fd
//! - `STATS` - Per-CPU correlation outcome counters
//!
//! ## Build
//!
//! Always compiled in release mode:
//! ```bash
//! cargo xtask build-ebpf
//! ```

#![no_std]
#![no_main]
#![allow(unused_unsafe)]

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_ktime_get_ns, bpf_probe_read_user_buf,
    },
    macros::{map, uprobe, uretprobe},
    maps::{LruHashMap, PerCpuArray, RingBuf},
    programs::{ProbeContext, RetProbeContext},
};
use aya_log_ebpf::debug;
use sslsniff_common::{
    complete_call, record_entry, CallContext, Completion, ContextStore, DataEvent, Direction,
    EventSink, Outcome, SessionKey, COMM_LEN, FD_UNKNOWN, MAX_CAPTURE_BYTES, MAX_INFLIGHT_CALLS,
    MAX_SESSIONS, OUTCOME_COUNT, RING_BUFFER_BYTES,
};

// ============================================================================
// eBPF Maps - Shared data structures between kernel and userspace
// ============================================================================

/// Ring buffer for sending captured plaintext to userspace
///
/// - **Size**: 1MB (~250 full records)
/// - **Overflow**: `reserve()` fails and the record is dropped, the caller never waits
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(RING_BUFFER_BYTES, 0);

/// Map: `pid_tgid` → entry-time arguments of the thread's in-flight call
///
/// LRU so that entries whose return never fires (thread killed mid-call) are
/// evicted instead of filling the map.
#[map]
static CALL_CONTEXTS: LruHashMap<u64, CallContext> =
    LruHashMap::with_max_entries(MAX_INFLIGHT_CALLS, 0);

/// Map: `(pid, SSL*)` → socket fd, filled by `SSL_set_fd`
#[map]
static SESSION_FDS: LruHashMap<SessionKey, i32> = LruHashMap::with_max_entries(MAX_SESSIONS, 0);

/// Correlation outcome counters, indexed by [`Outcome`]
#[map]
static STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(OUTCOME_COUNT, 0);

// ============================================================================
// Store and sink backed by the maps above
// ============================================================================

struct InflightCalls;

impl ContextStore for InflightCalls {
    #[inline(always)]
    fn put(&self, key: u64, call: &CallContext) {
        // BPF_ANY: an unconsumed entry for this thread is replaced
        let _ = CALL_CONTEXTS.insert(&key, call, 0);
    }

    #[inline(always)]
    fn take(&self, key: u64) -> Option<CallContext> {
        let call = unsafe { CALL_CONTEXTS.get(&key).copied() };
        if call.is_some() {
            let _ = CALL_CONTEXTS.remove(&key);
        }
        call
    }
}

struct RingSink {
    pid_tgid: u64,
}

impl EventSink for RingSink {
    #[inline(always)]
    fn emit(&self, call: &CallContext, completion: &Completion) -> bool {
        let Some(mut entry) = EVENTS.reserve::<DataEvent>(0) else {
            return false;
        };
        let event = unsafe { &mut *entry.as_mut_ptr() };

        let pid = (self.pid_tgid >> 32) as u32;
        event.comm = bpf_get_current_comm().unwrap_or([0u8; COMM_LEN]);
        event.pid = pid;
        event.tid = self.pid_tgid as u32;
        event.timestamp_ns = completion.end_ns;
        event.latency_ns = completion.end_ns.saturating_sub(call.start_ns);
        event.direction = completion.direction as u8;
        event._padding = [0u8; 3];
        event.fd = session_fd(pid, call.handle);
        event.len = completion.len;
        event.captured_len = 0;

        // The verifier needs the bound checked right before the slice
        let captured = completion.captured_len as usize;
        if call.buf != 0 && captured > 0 && captured <= MAX_CAPTURE_BYTES {
            let read =
                unsafe { bpf_probe_read_user_buf(call.buf as *const u8, &mut event.data[..captured]) };
            if read.is_ok() {
                event.captured_len = captured as u32;
            }
        }

        entry.submit(0);
        true
    }
}

#[inline(always)]
fn session_fd(pid: u32, handle: u64) -> i32 {
    let key = SessionKey::new(pid, handle);
    unsafe { SESSION_FDS.get(&key).copied().unwrap_or(FD_UNKNOWN) }
}

#[inline(always)]
fn count(outcome: Outcome) {
    if let Some(counter) = STATS.get_ptr_mut(outcome as u32) {
        unsafe { *counter += 1 };
    }
}

// ============================================================================
// eBPF Program Hooks
// ============================================================================

/// Hook: entry of `SSL_read`, `gnutls_record_recv`, `PR_Read`, `PR_Recv`
#[uprobe]
pub fn ssl_read_enter(ctx: ProbeContext) -> u32 {
    match try_enter(&ctx, Direction::Read) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Hook: entry of `SSL_write`, `gnutls_record_send`, `PR_Write`, `PR_Send`
#[uprobe]
pub fn ssl_write_enter(ctx: ProbeContext) -> u32 {
    match try_enter(&ctx, Direction::Write) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Hook: return of the read-side functions
#[uretprobe]
pub fn ssl_read_return(ctx: RetProbeContext) -> u32 {
    try_return(&ctx, Direction::Read);
    0
}

/// Hook: return of the write-side functions
#[uretprobe]
pub fn ssl_write_return(ctx: RetProbeContext) -> u32 {
    try_return(&ctx, Direction::Write);
    0
}

/// Hook: `int SSL_set_fd(SSL *ssl, int fd)`
#[uprobe]
pub fn ssl_set_fd(ctx: ProbeContext) -> u32 {
    match try_set_fd(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_enter(ctx: &ProbeContext, direction: Direction) -> Result<(), i64> {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };

    // All supported functions share the (session, buf, len) argument shape
    let handle: u64 = ctx.arg(0).ok_or(1i64)?;
    let buf: u64 = ctx.arg(1).ok_or(1i64)?;
    let requested_len: u64 = ctx.arg(2).ok_or(1i64)?;

    let start_ns = unsafe { bpf_ktime_get_ns() };
    let call = CallContext::new(direction, buf, requested_len, handle, start_ns);
    record_entry(&InflightCalls, pid_tgid, &call);

    Ok(())
}

fn try_return(ctx: &RetProbeContext, direction: Direction) {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };

    // Return types are int / PRInt32 / ssize_t; TLS records never exceed i32
    let ret = i64::from(ctx.ret::<i32>().unwrap_or(0));
    let now = unsafe { bpf_ktime_get_ns() };

    let outcome = complete_call(&InflightCalls, &RingSink { pid_tgid }, pid_tgid, direction, ret, now);
    count(outcome);

    match outcome {
        Outcome::OrphanReturn => {
            debug!(ctx, "orphan return tid={}", pid_tgid as u32);
        }
        Outcome::DirectionMismatch => {
            debug!(ctx, "direction mismatch tid={}", pid_tgid as u32);
        }
        Outcome::TransportFull => {
            debug!(ctx, "ring buffer full, dropped {} bytes", ret);
        }
        Outcome::Emitted | Outcome::FailedCall => {}
    }
}

fn try_set_fd(ctx: &ProbeContext) -> Result<(), i64> {
    let pid_tgid = unsafe { bpf_get_current_pid_tgid() };
    let handle: u64 = ctx.arg(0).ok_or(1i64)?;
    let fd: i32 = ctx.arg(1).ok_or(1i64)?;

    let key = SessionKey::new((pid_tgid >> 32) as u32, handle);
    SESSION_FDS.insert(&key, &fd, 0).map_err(|e| e as i64)?;

    Ok(())
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
