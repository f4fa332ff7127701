//! Probe management
//!
//! This module owns everything on the kernel side of the ring buffer:
//! - Library profiles (which symbols to instrument)
//! - Attachment bookkeeping
//! - eBPF program loading
//! - Debug diagnostics

pub mod attachment;
pub mod diagnostics;
pub mod ebpf_setup;
pub mod profiles;

// Re-export common types
pub use attachment::{Attachments, ProbeAttachment, ProbeLinker};
pub use diagnostics::{read_outcome_counters, OutcomeCounters};
pub use ebpf_setup::{init_ebpf_logger, load_ebpf_program, load_programs, DebugGate, GatedLogger};
pub use profiles::{profile_for, LibraryFamily, LibraryProfile, Phase, ProbeSpec, SessionBinding};
