//! # Sniffer Lifecycle
//!
//! [`Sniffer`] drives one capture session:
//!
//! ```text
//! new ──▶ load ──▶ attach_* (repeatable) ──▶ listen ──▶ shutdown
//! ```
//!
//! - `attach_*` before `load` fails with [`AttachError::NotLoaded`]
//! - `listen` before `load` fails with [`TransportError::NotLoaded`]
//! - `shutdown` is idempotent and also runs on drop; it releases every probe
//!   exactly once, then the kernel object
//!
//! `listen` is async and must run inside a tokio runtime, as must `load` when
//! debug output is on. Stop it from another task or thread through the
//! [`CancelToken`] returned by [`Sniffer::cancel_token`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use aya::programs::uprobe::UProbeLinkId;
use aya::Ebpf;
use log::{info, warn};

use crate::capture::{
    run_consumer, CancelToken, EventHandler, LoopSummary, RingBufSource, DEFAULT_POLL_TIMEOUT,
};
use crate::domain::{AttachError, LoadError, TransportError};
use crate::probes::{
    init_ebpf_logger, load_ebpf_program, load_programs, read_outcome_counters, Attachments,
    DebugGate, LibraryFamily,
};

/// Runtime options of a [`Sniffer`]
#[derive(Debug, Clone)]
pub struct SnifferConfig {
    /// Only instrument this process
    pub pid: Option<i32>,
    /// Forward kernel-side diagnostics to the log
    pub debug: bool,
    /// Load the kernel object from this file instead of the embedded one
    pub bpf_object: Option<PathBuf>,
    /// Upper bound on how long a cancelled `listen` takes to return
    pub poll_timeout: Duration,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self { pid: None, debug: false, bpf_object: None, poll_timeout: DEFAULT_POLL_TIMEOUT }
    }
}

/// Owns the kernel object, the attached probes and the stop flag
pub struct Sniffer {
    config: SnifferConfig,
    ebpf: Option<Ebpf>,
    attachments: Attachments<UProbeLinkId>,
    cancel: CancelToken,
    debug: DebugGate,
    logger_ready: bool,
    shut_down: bool,
}

impl Sniffer {
    #[must_use]
    pub fn new(config: SnifferConfig) -> Self {
        Self {
            debug: DebugGate::new(config.debug),
            config,
            ebpf: None,
            attachments: Attachments::new(),
            cancel: CancelToken::new(),
            logger_ready: false,
            shut_down: false,
        }
    }

    /// Turn forwarding of kernel-side diagnostics on or off
    ///
    /// Takes effect immediately when already loaded, otherwise at `load`.
    pub fn set_debug(&mut self, enabled: bool) {
        self.config.debug = enabled;
        self.debug.set(enabled);
        if enabled && !self.logger_ready {
            if let Some(bpf) = self.ebpf.as_mut() {
                self.logger_ready = init_ebpf_logger(bpf, &self.debug);
            }
        }
    }

    /// Whether kernel diagnostics are currently forwarded
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.debug.is_enabled()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.ebpf.is_some()
    }

    #[must_use]
    pub fn config(&self) -> &SnifferConfig {
        &self.config
    }

    /// Open the kernel object and load every program
    ///
    /// Calling this on an already loaded sniffer does nothing.
    ///
    /// # Errors
    /// Returns an error if the object is missing or rejected by the kernel,
    /// or if the sniffer was shut down
    pub fn load(&mut self) -> Result<(), LoadError> {
        if self.shut_down {
            return Err(LoadError::ShutDown);
        }
        if self.ebpf.is_some() {
            return Ok(());
        }

        let mut bpf = load_ebpf_program(self.config.bpf_object.as_deref())?;
        load_programs(&mut bpf)?;
        if self.config.debug {
            self.logger_ready = init_ebpf_logger(&mut bpf, &self.debug);
        }
        self.ebpf = Some(bpf);
        Ok(())
    }

    /// Attach the probes of `family` to the library at `target`
    ///
    /// Returns the number of capture probes placed. Can be called several
    /// times for different libraries; all probes feed the same event stream.
    ///
    /// # Errors
    /// Returns an error if not loaded, or naming the first probe that could
    /// not be attached. Probes placed before the failure stay attached.
    pub fn attach(
        &mut self,
        family: LibraryFamily,
        target: impl AsRef<Path>,
    ) -> Result<usize, AttachError> {
        let bpf = self.ebpf.as_mut().ok_or(AttachError::NotLoaded)?;
        let target = target.as_ref();
        let placed = self
            .attachments
            .attach_profile(bpf, family.profile(), target, self.config.pid)?
            .len();
        info!("✓ Attached {placed} {family} probes to {}", target.display());
        Ok(placed)
    }

    /// # Errors
    /// See [`Sniffer::attach`]
    pub fn attach_openssl(&mut self, target: impl AsRef<Path>) -> Result<usize, AttachError> {
        self.attach(LibraryFamily::OpenSsl, target)
    }

    /// # Errors
    /// See [`Sniffer::attach`]
    pub fn attach_gnutls(&mut self, target: impl AsRef<Path>) -> Result<usize, AttachError> {
        self.attach(LibraryFamily::GnuTls, target)
    }

    /// # Errors
    /// See [`Sniffer::attach`]
    pub fn attach_nss(&mut self, target: impl AsRef<Path>) -> Result<usize, AttachError> {
        self.attach(LibraryFamily::Nss, target)
    }

    /// Probes currently attached, bindings included
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Deliver captured events to `handler` until cancelled or interrupted
    ///
    /// # Errors
    /// Returns an error if not loaded, if the ring buffer cannot be opened,
    /// or if polling fails
    pub async fn listen<H: EventHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<LoopSummary, TransportError> {
        let bpf = self.ebpf.as_mut().ok_or(TransportError::NotLoaded)?;
        let mut source = RingBufSource::from_ebpf(bpf)?;

        info!("Listening for TLS traffic ({} probes)", self.attachments.len());
        let summary =
            run_consumer(&mut source, handler, &self.cancel, self.config.poll_timeout).await?;
        info!(
            "{}: {} events delivered, {} malformed, {} truncated",
            summary.stop, summary.stats.delivered, summary.stats.malformed, summary.stats.truncated
        );
        Ok(summary)
    }

    /// Stop listening, detach every probe and release the kernel object
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.shut_down = true;

        let Some(mut bpf) = self.ebpf.take() else {
            return;
        };

        match read_outcome_counters(&bpf) {
            Ok(counters) => info!("Kernel outcomes: {counters}"),
            Err(e) => warn!("Failed to read kernel counters: {e:#}"),
        }

        let released = self.attachments.detach_all(&mut bpf);
        info!("Detached {released} probes");
    }
}

impl Drop for Sniffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_before_load_fails() {
        let mut sniffer = Sniffer::new(SnifferConfig::default());
        let err = sniffer.attach_openssl("/usr/lib/libssl.so.3").unwrap_err();
        assert!(matches!(err, AttachError::NotLoaded));
        assert_eq!(sniffer.attachment_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_before_load_fails() {
        let mut sniffer = Sniffer::new(SnifferConfig::default());
        let mut handler = |_: &crate::capture::CapturedEvent| {};
        let err = sniffer.listen(&mut handler).await.unwrap_err();
        assert!(matches!(err, TransportError::NotLoaded));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut sniffer = Sniffer::new(SnifferConfig::default());
        let cancel = sniffer.cancel_token();
        sniffer.shutdown();
        sniffer.shutdown();
        assert!(cancel.is_cancelled());
        assert!(!sniffer.is_loaded());
    }

    #[test]
    fn test_load_after_shutdown_fails() {
        let mut sniffer = Sniffer::new(SnifferConfig::default());
        sniffer.shutdown();
        assert!(matches!(sniffer.load(), Err(LoadError::ShutDown)));
    }

    #[test]
    fn test_set_debug_before_load_is_recorded() {
        let mut sniffer = Sniffer::new(SnifferConfig::default());
        sniffer.set_debug(true);
        assert!(sniffer.config().debug);
        assert!(!sniffer.is_loaded());
    }

    #[test]
    fn test_set_debug_toggles_both_ways() {
        let mut sniffer = Sniffer::new(SnifferConfig { debug: true, ..SnifferConfig::default() });
        assert!(sniffer.debug_enabled());

        sniffer.set_debug(false);
        assert!(!sniffer.debug_enabled());
        assert!(!sniffer.config().debug);

        sniffer.set_debug(true);
        assert!(sniffer.debug_enabled());
    }

    #[test]
    fn test_default_poll_timeout() {
        assert_eq!(SnifferConfig::default().poll_timeout, Duration::from_millis(100));
    }
}
