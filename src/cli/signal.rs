//! Signal handling for graceful shutdown and CLI exit codes (§6 "CLI exit codes")
//!
//! Provides Ctrl+C handling with two-phase shutdown:
//! - First Ctrl+C: set the interrupted flag, allow current work to finish
//! - Second Ctrl+C: force exit with code 130

use std::sync::atomic::{AtomicBool, Ordering};

/// CLI process exit codes (§6).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    ConfigError = 2,
    SchemaIncompatible = 3,
    Interrupted = 130,
}

/// Global flag indicating the user requested interruption.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install Ctrl+C handler for graceful shutdown.
///
/// First Ctrl+C sets INTERRUPTED, allowing in-flight work (e.g. a batch flush) to
/// finish. Second Ctrl+C force-exits with code 130.
pub fn setup_signal_handler() {
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::AcqRel) {
            std::process::exit(ExitCode::Interrupted as i32);
        }
        eprintln!("\nInterrupted. Finishing current batch...");
    }) {
        tracing::warn!(error = %e, "Failed to set Ctrl+C handler");
    }
}

/// Check if the user requested interruption via Ctrl+C.
pub fn check_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Acquire)
}

/// Reset the interrupted flag. Call at the start of each top-level operation so a
/// prior Ctrl+C (e.g. during `pommel watch`) doesn't poison subsequent commands.
pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::Release);
}
