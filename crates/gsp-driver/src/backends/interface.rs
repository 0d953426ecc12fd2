//! Software power/clock interface
//!
//! Counts every call so tests can check that prepare/unprepare stay
//! balanced across success, failure and recovery paths.

use crate::backend::InterfaceOps;
use crate::error::{GspError, Result};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

/// Interface call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    /// `init` calls
    pub inits: u64,
    /// `deinit` calls
    pub deinits: u64,
    /// Successful `prepare` calls
    pub prepares: u64,
    /// `unprepare` calls
    pub unprepares: u64,
    /// `reset` calls
    pub resets: u64,
    /// `dump` calls
    pub dumps: u64,
}

/// Software interface named after the SoC
#[derive(Debug)]
pub struct SoftwareInterface {
    name: String,
    inits: AtomicU64,
    deinits: AtomicU64,
    prepares: AtomicU64,
    unprepares: AtomicU64,
    resets: AtomicU64,
    dumps: AtomicU64,
    balance: AtomicI64,
    prepare_failures: AtomicUsize,
}

impl SoftwareInterface {
    /// Interface called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inits: AtomicU64::new(0),
            deinits: AtomicU64::new(0),
            prepares: AtomicU64::new(0),
            unprepares: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            dumps: AtomicU64::new(0),
            balance: AtomicI64::new(0),
            prepare_failures: AtomicUsize::new(0),
        }
    }

    /// Make the next `prepare` fail
    pub fn fail_next_prepare(&self) {
        self.prepare_failures.fetch_add(1, Ordering::AcqRel);
    }

    /// Prepares not yet undone
    pub fn prepare_balance(&self) -> i64 {
        self.balance.load(Ordering::Acquire)
    }

    /// Call counts
    pub fn counters(&self) -> InterfaceCounters {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        InterfaceCounters {
            inits: get(&self.inits),
            deinits: get(&self.deinits),
            prepares: get(&self.prepares),
            unprepares: get(&self.unprepares),
            resets: get(&self.resets),
            dumps: get(&self.dumps),
        }
    }
}

impl InterfaceOps for SoftwareInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self) -> Result<()> {
        self.inits.fetch_add(1, Ordering::Relaxed);
        info!("interface {} up", self.name);
        Ok(())
    }

    fn deinit(&self) {
        self.deinits.fetch_add(1, Ordering::Relaxed);
        info!("interface {} down", self.name);
    }

    fn prepare(&self) -> Result<()> {
        let failed = self
            .prepare_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(GspError::backend(format!("{}: clock prepare failed", self.name)));
        }
        self.prepares.fetch_add(1, Ordering::Relaxed);
        self.balance.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn unprepare(&self) {
        self.unprepares.fetch_add(1, Ordering::Relaxed);
        self.balance.fetch_sub(1, Ordering::AcqRel);
    }

    fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::Relaxed);
        debug!("interface {} reset", self.name);
        Ok(())
    }

    fn dump(&self) {
        self.dumps.fetch_add(1, Ordering::Relaxed);
        info!(
            "interface {}: prepare balance {}",
            self.name,
            self.prepare_balance()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_prepare_does_not_count() {
        let iface = SoftwareInterface::new("sharkl3");
        iface.fail_next_prepare();
        assert!(iface.prepare().is_err());
        iface.prepare().unwrap();
        iface.unprepare();
        assert_eq!(iface.prepare_balance(), 0);
        assert_eq!(iface.counters().prepares, 1);
    }
}
