//! # sslsniff - eBPF-based TLS Plaintext Capture
//!
//! sslsniff observes the plaintext that processes hand to, and receive from,
//! their TLS library. It places uprobes on the library's read/write functions,
//! copies the transferred bytes out in the kernel once each call returns, and
//! streams them to userspace over a ring buffer. No traffic is decrypted and
//! the observed processes are never modified.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Observed Application                        │
//! │          SSL_write / SSL_read / gnutls_record_* / PR_*          │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ uprobe (entry) + uretprobe (return)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Programs (Kernel)                      │
//! │  • Entry: remember (buf, len, session) per thread               │
//! │  • Return: copy min(ret, len, 4096) bytes into a DataEvent      │
//! │  • SSL_set_fd: remember session → socket fd                     │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ring buffer records
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     sslsniff (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Probes     │   │   Consumer   │──▶│   Handler    │         │
//! │  │ (attach/det) │   │    Loop      │   │ (text/JSON)  │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         ▲                  ▲                                    │
//! │         └──── Sniffer ─────┘  load → attach → listen → shutdown │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`probes`]: library profiles, attachment bookkeeping, eBPF loading
//!   - `profiles`: which symbols to instrument for OpenSSL, GnuTLS and NSS
//!   - `attachment`: ordered attach, abort on first failure, detach exactly once
//!   - `ebpf_setup`: load the kernel object and implement the aya linker
//!
//! - [`capture`]: everything downstream of the ring buffer
//!   - `event`: decode the fixed record layout
//!   - `transport`: ring buffer and in-process channel sources
//!   - `consumer`: cancellable poll loop
//!   - `handlers`: text and JSON output
//!
//! - [`sniffer`]: lifecycle controller tying the two together
//!
//! - [`preflight`]: privilege, kernel and library checks before loading
//!
//! - [`cli`]: command-line argument parsing
//!
//! - [`domain`]: shared types and errors
//!
//! The call correlation itself (matching a return with its entry) lives in
//! `sslsniff-common` so the kernel programs and the tests run the same code.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Build the kernel object, then the tool
//! cargo xtask build-ebpf
//! cargo build --release
//!
//! # Capture everything that goes through the system libssl
//! sudo ./target/release/sslsniff --openssl /usr/lib/x86_64-linux-gnu/libssl.so.3
//!
//! # One process, JSON output
//! sudo ./target/release/sslsniff --openssl /usr/lib/libssl.so.3 --pid 1234 --json
//! ```
//!
//! ## Key Concepts
//!
//! - **Uprobe/Uretprobe**: dynamic tracing of userspace function entry and return
//! - **Ring Buffer**: lock-free kernel→userspace queue; full means dropped, never blocked
//! - **Correlation**: entry arguments are keyed by thread, so one call per thread is in flight

pub mod capture;
pub mod cli;
pub mod domain;
pub mod preflight;
pub mod probes;
pub mod sniffer;

pub use sniffer::{Sniffer, SnifferConfig};
