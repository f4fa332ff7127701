//! CLI argument definitions

use clap::Parser;
use std::path::{Path, PathBuf};

use crate::probes::LibraryFamily;
use crate::sniffer::SnifferConfig;

#[derive(Parser, Debug)]
#[command(
    name = "sslsniff",
    version,
    about = "Capture TLS plaintext from OpenSSL, GnuTLS and NSS via eBPF uprobes",
    after_help = "\
EXAMPLES:
    sudo sslsniff --openssl /usr/lib/x86_64-linux-gnu/libssl.so.3
    sudo sslsniff --gnutls /usr/lib/x86_64-linux-gnu/libgnutls.so.30 --pid 1234
    sudo sslsniff --openssl ./libssl.so --nss /usr/lib/libnspr4.so --json"
)]
pub struct Args {
    /// OpenSSL library to instrument (libssl.so); repeatable
    #[arg(long, value_name = "PATH")]
    pub openssl: Vec<PathBuf>,

    /// GnuTLS library to instrument (libgnutls.so); repeatable
    #[arg(long, value_name = "PATH")]
    pub gnutls: Vec<PathBuf>,

    /// NSS/NSPR library to instrument (libnspr4.so); repeatable
    #[arg(long, value_name = "PATH")]
    pub nss: Vec<PathBuf>,

    /// Only capture traffic of this process
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Forward eBPF-side diagnostics to the log (set RUST_LOG=debug to see them)
    #[arg(long)]
    pub debug: bool,

    /// Print one JSON object per event instead of the text format
    #[arg(long)]
    pub json: bool,

    /// Load the eBPF object from FILE instead of the embedded build
    #[arg(long, value_name = "FILE")]
    pub bpf_object: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Libraries to instrument, in attach order
    #[must_use]
    pub fn targets(&self) -> Vec<(LibraryFamily, &Path)> {
        let openssl = self.openssl.iter().map(|p| (LibraryFamily::OpenSsl, p.as_path()));
        let gnutls = self.gnutls.iter().map(|p| (LibraryFamily::GnuTls, p.as_path()));
        let nss = self.nss.iter().map(|p| (LibraryFamily::Nss, p.as_path()));
        openssl.chain(gnutls).chain(nss).collect()
    }

    #[must_use]
    pub fn sniffer_config(&self) -> SnifferConfig {
        SnifferConfig {
            pid: self.pid,
            debug: self.debug,
            bpf_object: self.bpf_object.clone(),
            ..SnifferConfig::default()
        }
    }
}
