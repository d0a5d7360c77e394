//! Build script for prise-io
//!
//! Detects the target platform and kernel version to decide which kernel
//! I/O backend the reactor compiles against:
//!
//! - **Linux with kernel 5.10+**: `io_uring` (completion-based)
//! - **macOS**: `kqueue` (readiness-based, completions synthesized)
//! - **Anything else**: only the deterministic mock backend is available
//!
//! The selection is exposed as the `io_backend` configuration flag, which
//! conditional compilation attributes throughout `src/io/` key off.
//!
//! ## Assumptions
//!
//! - The compilation machine and runtime machine are the same (reasonable
//!   for most use cases)
//! - Kernel version 5.10+ is considered stable and feature-complete for
//!   io_uring

use std::process::Command;

fn main() {
    // Emit check-cfg hints so `cfg(io_backend = "...")` is accepted by the compiler
    println!("cargo:rustc-check-cfg=cfg(io_backend, values(\"io_uring\", \"kqueue\"))");

    if cfg!(target_os = "linux") {
        match linux_kernel_version() {
            Some((major, minor)) => {
                eprintln!("Detected Linux {major}.{minor}");
                if (major, minor) >= (5, 10) {
                    eprintln!("Kernel supports io_uring: selecting io_uring backend.");
                    println!("cargo:rustc-cfg=io_backend=\"io_uring\"");
                } else {
                    eprintln!("Kernel too old for io_uring (< 5.10): only the mock backend will be available.");
                }
            }
            None => {
                // Assume a modern kernel when uname is unreadable; the ring
                // setup fails cleanly at runtime if io_uring is missing.
                eprintln!("Could not determine the kernel version, assuming io_uring support");
                println!("cargo:rustc-cfg=io_backend=\"io_uring\"");
            }
        }
    } else if cfg!(target_os = "macos") {
        eprintln!("Enabling kqueue backend (macOS)");
        println!("cargo:rustc-cfg=io_backend=\"kqueue\"");
    } else {
        eprintln!("No kernel I/O backend for this platform; only the mock backend will be available");
    }
}

/// Asks `uname -r` for the running kernel and extracts its major.minor
/// pair. `None` when the command cannot run or its output is unparseable.
fn linux_kernel_version() -> Option<(u32, u32)> {
    let output = Command::new("uname").arg("-r").output().ok()?;
    parse_release(std::str::from_utf8(&output.stdout).ok()?)
}

/// Pulls the leading major.minor out of a release string. Anything after
/// the minor component ("6.1.0-13-amd64", "5.15.49+") is irrelevant to the
/// io_uring gate and ignored.
fn parse_release(release: &str) -> Option<(u32, u32)> {
    let (major, rest) = release.trim().split_once('.')?;
    let minor: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    Some((major.parse().ok()?, minor.parse().ok()?))
}
