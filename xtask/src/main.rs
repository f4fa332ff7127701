use anyhow::{Context, Result};
use clap::Parser;
use std::process::Command;

const EBPF_PACKAGE: &str = "sslsniff-ebpf";
const USER_PACKAGE: &str = "sslsniff";
/// Read by sslsniff's build script to locate the object to embed
const TARGET_ENV: &str = "SSLSNIFF_BPF_TARGET";

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Compile the kernel programs to a BPF object
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
    },
    /// Compile the kernel programs, then the userspace tool with the object embedded
    Build {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        #[arg(long)]
        release: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target } => build_ebpf(&target)?,
        Cmd::Build { target, release } => {
            build_ebpf(&target)?;
            build_user(&target, release)?;
        }
    }

    Ok(())
}

fn build_ebpf(target: &str) -> Result<()> {
    // Debug builds pull in formatting code (LowerHex) the BPF linker rejects;
    // release LTO strips it.
    let mut cmd = Command::new("cargo");
    cmd.arg("+nightly")
        .args(["build", "--package", EBPF_PACKAGE, "--target", target])
        .args(["-Z", "build-std=core"])
        .arg("--release");

    let status = cmd.status().context("Failed to build eBPF program")?;
    if !status.success() {
        anyhow::bail!("Failed to build eBPF program");
    }

    println!("✓ eBPF program built successfully");
    println!("  Object: target/{target}/release/{USER_PACKAGE}");
    if target != "bpfel-unknown-none" {
        println!("  Embed it with: {TARGET_ENV}={target} cargo build --package {USER_PACKAGE}");
    }

    Ok(())
}

fn user_build_command(bpf_target: &str, release: bool) -> Command {
    let mut cmd = Command::new("cargo");
    cmd.args(["build", "--package", USER_PACKAGE]).env(TARGET_ENV, bpf_target);
    if release {
        cmd.arg("--release");
    }
    cmd
}

fn build_user(bpf_target: &str, release: bool) -> Result<()> {
    let status =
        user_build_command(bpf_target, release).status().context("Failed to build sslsniff")?;
    if !status.success() {
        anyhow::bail!("Failed to build sslsniff");
    }

    let profile = if release { "release" } else { "debug" };
    println!("✓ sslsniff built with embedded eBPF object");
    println!("  Binary: target/{profile}/{USER_PACKAGE}");

    Ok(())
}
