//! Pre-flight checks for sslsniff
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() and setrlimit() require unsafe

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use object::{Object, ObjectSymbol};
use std::collections::HashSet;
use std::path::Path;

use crate::probes::{LibraryFamily, LibraryProfile};

/// Minimum kernel version required for eBPF features used by sslsniff
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// Returns an error if not root, the kernel is too old, or a target is not a file
pub fn run_preflight_checks(targets: &[(LibraryFamily, &Path)], quiet: bool) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    for (family, path) in targets {
        check_binary_exists(path)?;
        if !quiet {
            warn_missing_symbols(path, family.profile());
        }
    }
    raise_memlock_limit();
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF/CAP_PERFMON are not inspected, only root is accepted
    bail!(
        "Permission denied: sslsniff requires root privileges to load eBPF programs.\n\n\
         Run with: sudo sslsniff ..."
    );
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 6.1.0-arch1-1 ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");

    let Some((major, minor)) = parse_kernel_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             sslsniff requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {release}",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Check if the target library exists and is a regular file
fn check_binary_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "Library not found: {}\n\n\
             Make sure the path is correct, e.g. /usr/lib/x86_64-linux-gnu/libssl.so.3",
            path.display()
        );
    }
    if !path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             Library paths must point to a shared object, not a directory.",
            path.display()
        );
    }
    Ok(())
}

/// Symbols of `profile` not exported by the ELF file at `path`
///
/// # Errors
/// Returns an error if the file cannot be read or is not an object file
pub fn missing_symbols(path: &Path, profile: &LibraryProfile) -> Result<Vec<&'static str>> {
    let file_data =
        std::fs::read(path).with_context(|| format!("Failed to read library: {}", path.display()))?;
    let obj = object::File::parse(&*file_data)
        .with_context(|| format!("Not an object file: {}", path.display()))?;

    let exported: HashSet<&str> = obj
        .dynamic_symbols()
        .chain(obj.symbols())
        .filter(|sym| sym.is_definition())
        .filter_map(|sym| sym.name().ok())
        .collect();

    let mut missing: Vec<&'static str> = profile
        .specs
        .iter()
        .map(|spec| spec.symbol)
        .filter(|symbol| !exported.contains(*symbol))
        .collect();
    missing.dedup();
    Ok(missing)
}

fn warn_missing_symbols(path: &Path, profile: &LibraryProfile) {
    match missing_symbols(path, profile) {
        Ok(missing) if missing.is_empty() => {}
        Ok(missing) => {
            eprintln!(
                "warning: {} does not export {} (is it a {} library?)",
                path.display(),
                missing.join(", "),
                profile.family
            );
        }
        Err(e) => debug!("Skipping symbol check: {e:#}"),
    }
}

/// Lift the locked-memory limit for map allocation on kernels before 5.11
fn raise_memlock_limit() {
    let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to remove limit on locked memory, ret is: {ret}");
    }
}
