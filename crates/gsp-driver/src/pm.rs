//! Runtime power-management bookkeeping
//!
//! Each core holds one usage reference from the moment it leaves Idle until
//! it returns there. The device may autosuspend once no reference is held
//! and the last activity is older than the autosuspend delay.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Usage counter with an autosuspend delay
#[derive(Debug)]
pub struct RuntimePm {
    usage: AtomicUsize,
    last_busy: Mutex<Instant>,
    delay: Duration,
}

impl RuntimePm {
    /// Counter with no references held
    pub fn new(delay: Duration) -> Self {
        Self {
            usage: AtomicUsize::new(0),
            last_busy: Mutex::new(Instant::now()),
            delay,
        }
    }

    /// Take a usage reference
    pub fn get(&self) {
        self.usage.fetch_add(1, Ordering::AcqRel);
        self.mark_last_busy();
    }

    /// Drop a usage reference and restart the autosuspend delay
    pub fn put_autosuspend(&self) {
        let dropped = self
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if !dropped {
            warn!("runtime pm: put without a matching get");
        }
        self.mark_last_busy();
    }

    /// Record activity now
    pub fn mark_last_busy(&self) {
        *self.last_busy.lock() = Instant::now();
    }

    /// References held
    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    /// Autosuspend delay
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// No reference held and quiet for at least the autosuspend delay
    pub fn runtime_idle(&self) -> bool {
        self.usage() == 0 && self.last_busy.lock().elapsed() >= self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_after_delay_without_refs() {
        let pm = RuntimePm::new(Duration::from_millis(10));
        pm.get();
        assert!(!pm.runtime_idle());
        pm.put_autosuspend();
        assert!(!pm.runtime_idle());
        std::thread::sleep(Duration::from_millis(20));
        assert!(pm.runtime_idle());
    }

    #[test]
    fn unbalanced_put_saturates() {
        let pm = RuntimePm::new(Duration::ZERO);
        pm.put_autosuspend();
        assert_eq!(pm.usage(), 0);
    }
}
