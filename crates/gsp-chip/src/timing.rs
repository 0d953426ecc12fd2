//! Timeouts and fixed limits used by the scheduler.
//!
//! Every blocking step in the driver is bounded by one of these.

use std::time::Duration;

/// Waiting for a busy core to quiesce before suspend (ms).
pub const SUSPEND_WAIT_MS: u64 = 3000;

/// Waiting for resume before touching a suspended device (ms).
pub const RESUME_WAIT_MS: u64 = 3000;

/// Waiting for a free job slot on an exhausted core (ms).
pub const RELEASE_WAIT_MS: u64 = 3000;

/// Hang watchdog armed on each successful trigger (ms).
pub const CORE_TIMER_OUT_MS: u64 = 2800;

/// Waiting for each acquire fence before trigger (ms).
pub const FENCE_WAIT_TIMEOUT_MS: u64 = 2900;

/// Waiting for a synchronous job to complete (ms).
pub const COMPLETION_WAIT_MS: u64 = 3000;

/// Runtime-PM autosuspend delay (ms).
pub const PM_RUNTIME_DELAY_MS: u64 = 1000;

/// Acquire fences collected per job.
pub const WAIT_FENCE_MAX: usize = 8;

/// Convenience: milliseconds to [`Duration`].
#[must_use]
pub const fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_fires_before_waiters_give_up() {
        assert!(CORE_TIMER_OUT_MS < FENCE_WAIT_TIMEOUT_MS);
        assert!(CORE_TIMER_OUT_MS < COMPLETION_WAIT_MS);
    }
}
