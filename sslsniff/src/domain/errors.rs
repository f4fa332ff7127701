//! Structured error types for sslsniff
//!
//! Using thiserror for automatic Display implementation and error chaining.

use aya::programs::ProgramError;
use thiserror::Error;

use crate::probes::Phase;

/// Failure to open or load the kernel program
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(
        "eBPF object not embedded in this build.\n\n\
         Run `cargo xtask build-ebpf` and rebuild, or pass --bpf-object <FILE>"
    )]
    NotEmbedded,

    #[error("Sniffer was shut down and cannot be reloaded")]
    ShutDown,

    #[error("Failed to load eBPF program: {0}")]
    Ebpf(#[from] aya::EbpfError),

    #[error("Failed to load {program}: {source}")]
    Program {
        program: &'static str,
        #[source]
        source: LinkError,
    },
}

/// Failure to attach one probe of a library profile
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("eBPF program must be loaded before attaching probes")]
    NotLoaded,

    #[error("Failed to attach {phase} probe on {symbol} in {binary}: {source}")]
    ProbeAttachFailed {
        symbol: &'static str,
        phase: Phase,
        binary: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl AttachError {
    /// Symbol whose attachment failed, if any
    #[must_use]
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            AttachError::NotLoaded => None,
            AttachError::ProbeAttachFailed { symbol, .. } => Some(symbol),
        }
    }
}

/// Error raised by the aya-backed probe linker
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("program {0} not found in eBPF object")]
    MissingProgram(&'static str),

    #[error(transparent)]
    Program(#[from] ProgramError),
}

/// Ring buffer creation or polling failure
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("eBPF program must be loaded before listening")]
    NotLoaded,

    #[error("Failed to create ring buffer: {0}")]
    Create(String),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),

    #[error("Polling interrupted")]
    Interrupted,

    #[error("Transport closed by all producers")]
    Closed,

    #[error("Error polling ring buffer: {0}")]
    Poll(#[source] std::io::Error),
}

impl TransportError {
    /// Interrupt-class errors end the consumer loop without failing it
    #[must_use]
    pub fn is_graceful(&self) -> bool {
        matches!(self, TransportError::Interrupted | TransportError::Closed)
    }
}

/// Malformed ring buffer record
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: {len} bytes, header needs {min}")]
    Truncated { len: usize, min: usize },

    #[error("invalid direction byte {0}")]
    Direction(u8),

    #[error("captured length {captured} exceeds {limit}")]
    CapturedLength { captured: u32, limit: usize },
}

/// Any error of the sniffer lifecycle, with its process exit code
#[derive(Error, Debug)]
pub enum SnifferError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SnifferError {
    /// 1 for load/attach failures, 3 for transport failures
    ///
    /// 2 stays reserved for usage errors.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            SnifferError::Load(_) | SnifferError::Attach(_) => 1,
            SnifferError::Transport(_) => 3,
        }
    }
}
