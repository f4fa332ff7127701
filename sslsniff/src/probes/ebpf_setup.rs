//! # eBPF Program Loading
//!
//! Loads compiled eBPF bytecode and implements [`ProbeLinker`] on top of aya.
//!
//! ## Functions
//!
//! - [`load_ebpf_program()`] - Load bytecode from a file or the embedded binary
//! - [`load_programs()`] - Verify and load every uprobe once
//! - [`init_ebpf_logger()`] - Forward kernel-side `debug!` output to `log`,
//!   switched on and off at runtime through a [`DebugGate`]
//!
//! The object is embedded at build time when `cargo xtask build-ebpf` has been
//! run before building this crate; `--bpf-object` overrides it at runtime.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aya::{
    programs::{uprobe::UProbeLinkId, UProbe},
    Ebpf,
};
use aya_log::EbpfLogger;
use log::{info, warn, Log, Metadata, Record};

use super::attachment::ProbeLinker;
use super::profiles::ALL_PROGRAMS;
use crate::domain::{LinkError, LoadError};

#[cfg(embedded_bpf)]
static EMBEDDED_OBJECT: &[u8] = aya::include_bytes_aligned!(env!("SSLSNIFF_BPF_OBJECT"));

/// Load the eBPF program binary
///
/// Always uses the release build because debug builds of BPF targets pull in
/// formatting code the BPF linker rejects.
///
/// # Errors
/// Returns an error if no object is available or the kernel rejects it
pub fn load_ebpf_program(object: Option<&Path>) -> Result<Ebpf, LoadError> {
    if let Some(path) = object {
        info!("Loading eBPF object from {}", path.display());
        return Ok(Ebpf::load_file(path)?);
    }
    load_embedded()
}

#[cfg(embedded_bpf)]
fn load_embedded() -> Result<Ebpf, LoadError> {
    Ok(Ebpf::load(EMBEDDED_OBJECT)?)
}

#[cfg(not(embedded_bpf))]
fn load_embedded() -> Result<Ebpf, LoadError> {
    Err(LoadError::NotEmbedded)
}

/// Load every program of the object into the kernel
///
/// # Errors
/// Returns an error naming the first program that is missing or fails verification
pub fn load_programs(bpf: &mut Ebpf) -> Result<(), LoadError> {
    for program in ALL_PROGRAMS {
        let uprobe = uprobe_mut(bpf, program).map_err(|source| LoadError::Program { program, source })?;
        uprobe
            .load()
            .map_err(|e| LoadError::Program { program, source: LinkError::Program(e) })?;
    }
    info!("✓ Loaded {} uprobe programs", ALL_PROGRAMS.len());
    Ok(())
}

/// Shared switch for forwarding kernel-side diagnostics
#[derive(Debug, Clone, Default)]
pub struct DebugGate(Arc<AtomicBool>);

impl DebugGate {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Passes records to `inner` only while its gate is open
pub struct GatedLogger<L> {
    gate: DebugGate,
    inner: L,
}

impl<L: Log> GatedLogger<L> {
    pub fn new(gate: DebugGate, inner: L) -> Self {
        Self { gate, inner }
    }
}

impl<L: Log> Log for GatedLogger<L> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.gate.is_enabled() && self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.gate.is_enabled() {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize eBPF logger
///
/// The reader tasks live as long as the runtime; `gate` decides whether
/// their records reach the global logger.
pub fn init_ebpf_logger(bpf: &mut Ebpf, gate: &DebugGate) -> bool {
    match EbpfLogger::init_with_logger(bpf, GatedLogger::new(gate.clone(), log::logger())) {
        Ok(_) => true,
        Err(e) => {
            warn!("Failed to initialize eBPF logger: {e}");
            false
        }
    }
}

fn uprobe_mut<'a>(bpf: &'a mut Ebpf, program: &'static str) -> Result<&'a mut UProbe, LinkError> {
    let uprobe: &mut UProbe =
        bpf.program_mut(program).ok_or(LinkError::MissingProgram(program))?.try_into()?;
    Ok(uprobe)
}

impl ProbeLinker for Ebpf {
    type Link = UProbeLinkId;
    type Error = LinkError;

    fn link(
        &mut self,
        program: &'static str,
        symbol: &'static str,
        target: &Path,
        pid: Option<i32>,
    ) -> Result<UProbeLinkId, LinkError> {
        let uprobe = uprobe_mut(self, program)?;
        Ok(uprobe.attach(Some(symbol), 0, target, pid)?)
    }

    fn unlink(&mut self, program: &'static str, link: UProbeLinkId) -> Result<(), LinkError> {
        uprobe_mut(self, program)?.detach(link)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingLogger(AtomicUsize);

    impl Log for CountingLogger {
        fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
            true
        }

        fn log(&self, _record: &Record<'_>) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }

        fn flush(&self) {}
    }

    fn emit(logger: &impl Log) {
        logger.log(&Record::builder().args(format_args!("ssl_read_return: emitted")).build());
    }

    #[test]
    fn test_closed_gate_drops_records() {
        let inner = CountingLogger::default();
        let logger = GatedLogger::new(DebugGate::new(false), &inner);
        emit(&logger);
        assert!(!logger.enabled(&Metadata::builder().build()));
        assert_eq!(inner.0.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_disabling_stops_forwarding() {
        let inner = CountingLogger::default();
        let gate = DebugGate::new(true);
        let logger = GatedLogger::new(gate.clone(), &inner);

        emit(&logger);
        gate.set(false);
        emit(&logger);
        emit(&logger);
        gate.set(true);
        emit(&logger);

        assert_eq!(inner.0.load(Ordering::Relaxed), 2);
    }
}
