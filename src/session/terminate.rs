//! Forceful process termination.
//!
//! A wedged automation driver can ignore graceful shutdown indefinitely, so
//! after `destroy()` the supervisor kills the client's process tree through
//! this capability trait. Implementations are per platform; callers never
//! shell out inline.

use std::process::Command;

use tracing::{debug, warn};

/// Kills the process tree rooted at a pid. Must tolerate the process being
/// already dead.
pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self, pid: u32);
}

/// Terminator using the host OS's native kill facility.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsTerminator;

impl ProcessTerminator for OsTerminator {
    #[cfg(unix)]
    fn terminate(&self, pid: u32) {
        debug!(pid = pid, "Force-killing client process tree");
        // Children first, then the root; either may already be gone.
        let _ = Command::new("pkill")
            .args(["-KILL", "-P", &pid.to_string()])
            .status();
        match Command::new("kill").args(["-KILL", &pid.to_string()]).status() {
            Ok(_) => {}
            Err(e) => warn!(pid = pid, error = %e, "kill invocation failed"),
        }
    }

    #[cfg(windows)]
    fn terminate(&self, pid: u32) {
        debug!(pid = pid, "Force-killing client process tree");
        // /T terminates child processes, /F forces termination.
        match Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/T", "/F"])
            .status()
        {
            Ok(_) => {}
            Err(e) => warn!(pid = pid, error = %e, "taskkill invocation failed"),
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn terminate(&self, pid: u32) {
        warn!(pid = pid, "No process terminator for this platform");
    }
}

/// Terminator that does nothing; for clients that run in process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTerminator;

impl ProcessTerminator for NoopTerminator {
    fn terminate(&self, _pid: u32) {}
}
