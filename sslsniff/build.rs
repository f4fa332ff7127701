//! Embed the eBPF object when `cargo xtask build-ebpf` has produced one

use std::path::PathBuf;

/// Overrides the BPF target whose object gets embedded
const TARGET_ENV: &str = "SSLSNIFF_BPF_TARGET";
const DEFAULT_TARGET: &str = "bpfel-unknown-none";

fn main() {
    println!("cargo::rustc-check-cfg=cfg(embedded_bpf)");
    println!("cargo::rerun-if-env-changed={TARGET_ENV}");

    let target = std::env::var(TARGET_ENV).unwrap_or_else(|_| DEFAULT_TARGET.to_string());
    let relative = format!("../target/{target}/release/sslsniff");
    println!("cargo::rerun-if-changed={relative}");

    let manifest_dir = PathBuf::from(std::env::var_os("CARGO_MANIFEST_DIR").unwrap_or_default());
    let object = manifest_dir.join(&relative);
    if object.is_file() {
        println!("cargo::rustc-cfg=embedded_bpf");
        println!("cargo::rustc-env=SSLSNIFF_BPF_OBJECT={}", object.display());
    } else {
        println!(
            "cargo::warning=eBPF object for {target} not found, run `cargo xtask build-ebpf --target {target}` to embed it"
        );
    }
}
