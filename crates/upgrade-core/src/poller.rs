//! Blocking wait for a device (or one RE of it) to come back after a
//! disruptive step.
//!
//! There is no upper bound. A device that never returns is left to the
//! operator to interrupt.

use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryWait {
    /// Grace period that lets the reboot actually begin.
    pub initial_delay: Duration,
    pub poll_interval: Duration,
}

/// Result of a completed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    pub probes: u32,
    pub waited: Duration,
}

pub struct AvailabilityPoller {
    wait: RecoveryWait,
}

impl AvailabilityPoller {
    pub fn new(wait: RecoveryWait) -> Self {
        Self { wait }
    }

    /// Sleep `initial_delay`, then call `probe` every `poll_interval` until it
    /// reports the target is back. Callers must reopen the session and
    /// refresh facts afterwards.
    pub fn await_recovery<F>(&self, what: &str, mut probe: F) -> Recovery
    where
        F: FnMut() -> bool,
    {
        let start = Instant::now();
        info!(
            "Waiting {}s for {what} to go down, then checking every {}s...",
            self.wait.initial_delay.as_secs(),
            self.wait.poll_interval.as_secs()
        );
        std::thread::sleep(self.wait.initial_delay);

        let mut probes = 0u32;
        loop {
            std::thread::sleep(self.wait.poll_interval);
            probes += 1;
            if probe() {
                break;
            }
            debug!("{what} not back yet (probe {probes})");
        }

        let waited = start.elapsed();
        info!("{what} is back after {}s", waited.as_secs());
        Recovery { probes, waited }
    }
}
