//! # sslsniff - Main Entry Point
//!
//! Loads the kernel programs, attaches them to every library given on the
//! command line and prints captured plaintext until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use log::info;

use sslsniff::capture::{JsonHandler, LogHandler};
use sslsniff::cli::Args;
use sslsniff::domain::SnifferError;
use sslsniff::preflight::run_preflight_checks;
use sslsniff::Sniffer;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<SnifferError>() {
        return e.exit_code();
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let targets = args.targets();
    if targets.is_empty() {
        anyhow::bail!(
            "Missing required argument: --openssl, --gnutls or --nss\n\n\
             Usage:\n  \
             sslsniff --openssl /usr/lib/x86_64-linux-gnu/libssl.so.3\n\n\
             Run 'sslsniff --help' for more options"
        );
    }

    // Run pre-flight checks before anything else
    run_preflight_checks(&targets, quiet)?;

    if !quiet {
        eprintln!("sslsniff v{}", env!("CARGO_PKG_VERSION"));
        if let Some(pid) = args.pid {
            eprintln!("pid: {pid}");
        }
    }

    let mut sniffer = Sniffer::new(args.sniffer_config());
    sniffer.load().map_err(SnifferError::from)?;

    for (family, path) in &targets {
        let placed = sniffer.attach(*family, path).map_err(SnifferError::from)?;
        if !quiet {
            eprintln!("{family}: {placed} probes on {}", path.display());
        }
    }

    // Ctrl+C only flips the cancel token; the loop notices within one poll timeout
    let cancel = sniffer.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping");
            cancel.cancel();
        }
    });

    let result = if args.json {
        sniffer.listen(&mut JsonHandler::stdout()).await
    } else {
        sniffer.listen(&mut LogHandler::stdout()).await
    };

    sniffer.shutdown();
    let summary = result.map_err(SnifferError::from)?;

    if !quiet {
        eprintln!(
            "\n{}: {} events ({} truncated, {} malformed)",
            summary.stop, summary.stats.delivered, summary.stats.truncated, summary.stats.malformed
        );
    }

    Ok(())
}
