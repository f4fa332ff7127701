//! # Probe Attachment
//!
//! Places the probes of a [`LibraryProfile`] on a target binary and keeps the
//! resulting handles until shutdown.
//!
//! The kernel side of attachment sits behind [`ProbeLinker`] so the ordering and
//! failure rules here can be exercised without loading anything into the kernel.
//!
//! - Specs are attached in profile order, entry before return.
//! - The first failing spec aborts the profile. Handles already placed, for this
//!   and earlier profiles, stay attached and owned by the set.
//! - Session bindings are attached after the specs and are best effort.
//! - [`Attachments::detach_all`] releases each handle exactly once.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::profiles::{LibraryProfile, Phase};
use crate::domain::AttachError;

/// Attaches a loaded kernel program to a symbol of a user-space binary
pub trait ProbeLinker {
    /// Handle identifying one attachment
    type Link;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Attach `program` to `symbol` in `target`, restricted to `pid` if given
    ///
    /// # Errors
    /// Returns an error if the symbol cannot be resolved or the kernel rejects the probe
    fn link(
        &mut self,
        program: &'static str,
        symbol: &'static str,
        target: &Path,
        pid: Option<i32>,
    ) -> Result<Self::Link, Self::Error>;

    /// Release an attachment made by [`ProbeLinker::link`]
    ///
    /// # Errors
    /// Returns an error if the kernel refuses to detach
    fn unlink(&mut self, program: &'static str, link: Self::Link) -> Result<(), Self::Error>;
}

/// One live probe
#[derive(Debug)]
pub struct ProbeAttachment<L> {
    program: &'static str,
    symbol: &'static str,
    phase: Phase,
    target: PathBuf,
    link: L,
}

impl<L> ProbeAttachment<L> {
    #[must_use]
    pub fn program(&self) -> &'static str {
        self.program
    }

    #[must_use]
    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    #[must_use]
    pub fn link(&self) -> &L {
        &self.link
    }
}

/// Every probe attached so far, in attachment order
#[derive(Debug)]
pub struct Attachments<L> {
    attached: Vec<ProbeAttachment<L>>,
}

impl<L> Default for Attachments<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> Attachments<L> {
    #[must_use]
    pub fn new() -> Self {
        Self { attached: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attached.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeAttachment<L>> {
        self.attached.iter()
    }

    /// Attach every spec of `profile` to `target`
    ///
    /// Returns the handles of the profile's specs, one per spec and in spec
    /// order. Binding probes are kept in the set but not returned.
    ///
    /// # Errors
    /// Returns [`AttachError::ProbeAttachFailed`] naming the first spec that
    /// could not be attached. Probes attached before it are not rolled back.
    pub fn attach_profile<K>(
        &mut self,
        linker: &mut K,
        profile: &LibraryProfile,
        target: &Path,
        pid: Option<i32>,
    ) -> Result<&[ProbeAttachment<L>], AttachError>
    where
        K: ProbeLinker<Link = L>,
    {
        let first = self.attached.len();

        for spec in profile.specs {
            let program = spec.program();
            let link = linker.link(program, spec.symbol, target, pid).map_err(|e| {
                AttachError::ProbeAttachFailed {
                    symbol: spec.symbol,
                    phase: spec.phase,
                    binary: target.display().to_string(),
                    source: Box::new(e),
                }
            })?;
            info!("✓ Attached {} probe: {} ({program})", spec.phase, spec.symbol);
            self.attached.push(ProbeAttachment {
                program,
                symbol: spec.symbol,
                phase: spec.phase,
                target: target.to_path_buf(),
                link,
            });
        }
        let spec_end = self.attached.len();

        for binding in profile.bindings {
            match linker.link(binding.program, binding.symbol, target, pid) {
                Ok(link) => {
                    info!("✓ Attached uprobe: {}", binding.symbol);
                    self.attached.push(ProbeAttachment {
                        program: binding.program,
                        symbol: binding.symbol,
                        phase: Phase::Enter,
                        target: target.to_path_buf(),
                        link,
                    });
                }
                Err(e) => {
                    warn!("⚠️  Could not attach {}: {e}", binding.symbol);
                    warn!("   Socket fds unavailable for {}", target.display());
                }
            }
        }

        Ok(&self.attached[first..spec_end])
    }

    /// Detach every probe, newest first. Returns the number released.
    ///
    /// Failures are logged and the handle is dropped either way, so calling
    /// this twice never releases a handle twice.
    pub fn detach_all<K>(&mut self, linker: &mut K) -> usize
    where
        K: ProbeLinker<Link = L>,
    {
        let mut released = 0;
        for attachment in self.attached.drain(..).rev() {
            match linker.unlink(attachment.program, attachment.link) {
                Ok(()) => {
                    debug!("Detached {} probe: {}", attachment.phase, attachment.symbol);
                    released += 1;
                }
                Err(e) => warn!("⚠️  Failed to detach {}: {e}", attachment.symbol),
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::profiles::{profile_for, LibraryFamily};
    use std::collections::HashSet;

    #[derive(Debug, thiserror::Error)]
    #[error("no symbol {0}")]
    struct NoSymbol(&'static str);

    #[derive(Default)]
    struct FakeLinker {
        next_id: u32,
        missing: Vec<&'static str>,
        live: HashSet<u32>,
        unlinked: Vec<u32>,
    }

    impl ProbeLinker for FakeLinker {
        type Link = u32;
        type Error = NoSymbol;

        fn link(
            &mut self,
            _program: &'static str,
            symbol: &'static str,
            _target: &Path,
            _pid: Option<i32>,
        ) -> Result<u32, NoSymbol> {
            if self.missing.contains(&symbol) {
                return Err(NoSymbol(symbol));
            }
            self.next_id += 1;
            self.live.insert(self.next_id);
            Ok(self.next_id)
        }

        fn unlink(&mut self, _program: &'static str, link: u32) -> Result<(), NoSymbol> {
            assert!(self.live.remove(&link), "link {link} released twice");
            self.unlinked.push(link);
            Ok(())
        }
    }

    #[test]
    fn test_attach_returns_one_handle_per_spec() {
        let mut linker = FakeLinker::default();
        let mut set = Attachments::new();
        let profile = profile_for(LibraryFamily::GnuTls);

        let handles = set
            .attach_profile(&mut linker, profile, Path::new("/usr/lib/libgnutls.so.30"), None)
            .unwrap();

        assert_eq!(handles.len(), profile.specs.len());
        for (handle, spec) in handles.iter().zip(profile.specs) {
            assert_eq!(handle.symbol(), spec.symbol);
            assert_eq!(handle.phase(), spec.phase);
            assert_eq!(handle.program(), spec.program());
        }
    }

    #[test]
    fn test_openssl_binding_is_kept_but_not_returned() {
        let mut linker = FakeLinker::default();
        let mut set = Attachments::new();

        let returned = set
            .attach_profile(
                &mut linker,
                profile_for(LibraryFamily::OpenSsl),
                Path::new("/usr/lib/libssl.so.3"),
                Some(42),
            )
            .unwrap()
            .len();

        assert_eq!(returned, 4);
        assert_eq!(set.len(), 5);
        assert_eq!(set.iter().last().unwrap().symbol(), "SSL_set_fd");
    }

    #[test]
    fn test_missing_binding_is_not_fatal() {
        let mut linker = FakeLinker { missing: vec!["SSL_set_fd"], ..Default::default() };
        let mut set = Attachments::new();

        let result = set.attach_profile(
            &mut linker,
            profile_for(LibraryFamily::OpenSsl),
            Path::new("/usr/lib/libssl.so.3"),
            None,
        );

        assert_eq!(result.unwrap().len(), 4);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_first_failure_aborts_without_rollback() {
        let mut linker = FakeLinker { missing: vec!["SSL_read"], ..Default::default() };
        let mut set = Attachments::new();

        let err = set
            .attach_profile(
                &mut linker,
                profile_for(LibraryFamily::OpenSsl),
                Path::new("/usr/lib/libssl.so.3"),
                None,
            )
            .unwrap_err();

        assert_eq!(err.symbol(), Some("SSL_read"));
        // SSL_write entry and return stay attached
        assert_eq!(set.len(), 2);
        assert_eq!(linker.live.len(), 2);
    }

    #[test]
    fn test_detach_all_releases_each_handle_once() {
        let mut linker = FakeLinker::default();
        let mut set = Attachments::new();
        let target = Path::new("/usr/lib/libnss3.so");
        set.attach_profile(&mut linker, profile_for(LibraryFamily::Nss), target, None).unwrap();
        set.attach_profile(&mut linker, profile_for(LibraryFamily::GnuTls), target, None).unwrap();

        assert_eq!(set.detach_all(&mut linker), 12);
        assert!(set.is_empty());
        assert!(linker.live.is_empty());

        assert_eq!(set.detach_all(&mut linker), 0);
        assert_eq!(linker.unlinked.len(), 12);
    }

    #[test]
    fn test_detach_order_is_newest_first() {
        let mut linker = FakeLinker::default();
        let mut set = Attachments::new();
        set.attach_profile(
            &mut linker,
            profile_for(LibraryFamily::GnuTls),
            Path::new("/lib/libgnutls.so"),
            None,
        )
        .unwrap();

        set.detach_all(&mut linker);
        assert_eq!(linker.unlinked, [4, 3, 2, 1]);
    }
}
