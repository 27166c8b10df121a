// src/core/gate.rs

//! The process-wide concurrency gate. Every in-flight probe holds one permit,
//! and the gate is sized from the file-descriptor budget so that the scanner
//! can never open more sockets than the process is allowed to.

use std::process::Command;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Used when the soft limit cannot be read.
pub const FALLBACK_FD_LIMIT: usize = 1024;

/// Descriptors kept back for the runtime, the log file and the reporting client.
pub const RESERVED_FDS: usize = 32;

/// A counting semaphore shared by every probe in a run. Clones share the same
/// permits.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Sizes the gate from the soft descriptor limit, optionally capped lower.
    pub fn from_fd_budget(cap: Option<usize>) -> Self {
        let limit = soft_fd_limit();
        let mut capacity = limit.saturating_sub(RESERVED_FDS).max(1);
        if let Some(cap) = cap {
            capacity = capacity.min(cap.max(1));
        }
        debug!(fd_limit = limit, capacity, "Sized concurrency gate.");
        Self::new(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a free slot. The slot is returned when the permit drops,
    /// whatever the probe's outcome. Fails only once the gate is closed.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.semaphore).acquire_owned().await
    }

    /// Stops handing out permits; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Reads the soft `RLIMIT_NOFILE` through the shell's `ulimit -n`.
///
/// "unlimited", a missing shell or garbage output all fall back to
/// [`FALLBACK_FD_LIMIT`]; none of them is an error.
pub fn soft_fd_limit() -> usize {
    let output = match Command::new("sh").args(["-c", "ulimit -n"]).output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(status = %output.status, "ulimit -n failed, using fallback fd limit.");
            return FALLBACK_FD_LIMIT;
        }
        Err(e) => {
            warn!(error = %e, "Could not run ulimit -n, using fallback fd limit.");
            return FALLBACK_FD_LIMIT;
        }
    };
    parse_ulimit(&String::from_utf8_lossy(&output.stdout))
}

fn parse_ulimit(raw: &str) -> usize {
    let raw = raw.trim();
    match raw.parse::<usize>() {
        Ok(limit) if limit > 0 => limit,
        _ => {
            debug!(raw, "Unusable fd limit, using fallback.");
            FALLBACK_FD_LIMIT
        }
    }
}
