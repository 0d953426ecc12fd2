//! Device and core configuration
//!
//! Stands in for the device-tree node of a GSP instance: which revision it
//! is, how many cores it has, how many job slots each core owns and how
//! long every bounded wait may take. Timeouts can be overridden from the
//! environment (`GSP_*_TIMEOUT_MS`).

use crate::error::{GspError, Result};
use gsp_chip::compat::ChipRevision;
use gsp_chip::timing;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Job slots per core when the node does not say otherwise
pub const DEFAULT_KCFG_NUM: usize = 16;

/// Largest job count the trigger command can carry
pub const MAX_IO_CNT: usize = gsp_chip::uapi::cmd::CNT_MASK as usize;

/// Bounded waits used throughout the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Waiting for a busy core before suspend
    pub suspend_wait: Duration,
    /// Waiting for resume before using a suspended device
    pub resume_wait: Duration,
    /// Waiting for a free slot on an exhausted core
    pub release_wait: Duration,
    /// Hang watchdog
    pub hang: Duration,
    /// Waiting on each acquire fence
    pub fence_wait: Duration,
    /// Waiting for a synchronous job
    pub completion_wait: Duration,
    /// Runtime-PM autosuspend delay
    pub autosuspend: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            suspend_wait: timing::ms(timing::SUSPEND_WAIT_MS),
            resume_wait: timing::ms(timing::RESUME_WAIT_MS),
            release_wait: timing::ms(timing::RELEASE_WAIT_MS),
            hang: timing::ms(timing::CORE_TIMER_OUT_MS),
            fence_wait: timing::ms(timing::FENCE_WAIT_TIMEOUT_MS),
            completion_wait: timing::ms(timing::COMPLETION_WAIT_MS),
            autosuspend: timing::ms(timing::PM_RUNTIME_DELAY_MS),
        }
    }
}

impl Timeouts {
    /// Defaults, overridden by any `GSP_*_TIMEOUT_MS` variables set
    pub fn from_env() -> Self {
        let mut t = Self::default();
        override_ms("GSP_SUSPEND_TIMEOUT_MS", &mut t.suspend_wait);
        override_ms("GSP_RESUME_TIMEOUT_MS", &mut t.resume_wait);
        override_ms("GSP_RELEASE_TIMEOUT_MS", &mut t.release_wait);
        override_ms("GSP_HANG_TIMEOUT_MS", &mut t.hang);
        override_ms("GSP_FENCE_TIMEOUT_MS", &mut t.fence_wait);
        override_ms("GSP_COMPLETION_TIMEOUT_MS", &mut t.completion_wait);
        t
    }

    /// Short timeouts for the software backend, where an engine "runs" in
    /// a few milliseconds
    pub fn simulated() -> Self {
        Self {
            suspend_wait: Duration::from_millis(1000),
            resume_wait: Duration::from_millis(1000),
            release_wait: Duration::from_millis(500),
            hang: Duration::from_millis(150),
            fence_wait: Duration::from_millis(200),
            completion_wait: Duration::from_millis(2000),
            autosuspend: Duration::from_millis(50),
        }
    }
}

fn override_ms(var: &str, slot: &mut Duration) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) => {
            debug!("{var} = {ms}ms");
            *slot = Duration::from_millis(ms);
        }
        Err(_) => warn!("ignoring {var}={raw:?}: not a millisecond count"),
    }
}

/// One core node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Core index (`core-id`)
    pub id: usize,
    /// Job slots owned by this core (`kcfg-num`)
    pub kcfg_num: usize,
    /// Run the worker with a real-time priority (`real-time`)
    pub real_time: bool,
    /// Buffers go through the IOMMU (`iommu`)
    pub need_iommu: bool,
}

impl CoreConfig {
    /// A core with default slot count, IOMMU on, normal priority
    pub const fn new(id: usize) -> Self {
        Self {
            id,
            kcfg_num: DEFAULT_KCFG_NUM,
            real_time: false,
            need_iommu: true,
        }
    }

    /// Same core with `kcfg_num` slots
    #[must_use]
    pub const fn with_kcfg_num(mut self, kcfg_num: usize) -> Self {
        self.kcfg_num = kcfg_num;
        self
    }
}

/// Whole device node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Device name used in logs
    pub name: String,
    /// Compatible string, `sprd,gsp-<rev>-<soc>`
    pub compatible: String,
    /// Jobs accepted per submission
    pub io_cnt: usize,
    /// Core nodes, in selection order
    pub cores: Vec<CoreConfig>,
    /// Bounded waits
    pub timeouts: Timeouts,
}

impl DeviceConfig {
    /// Configuration for a known compatible string, sized from its revision
    ///
    /// # Errors
    ///
    /// Returns [`GspError::Config`] if the compatible string is unknown.
    pub fn for_compatible(compatible: &str) -> Result<Self> {
        let rev = ChipRevision::from_compatible(compatible)
            .ok_or_else(|| GspError::config(format!("unknown compatible {compatible:?}")))?;
        Ok(Self {
            name: "gsp".to_string(),
            compatible: compatible.to_string(),
            io_cnt: rev.io_cnt(),
            cores: (0..rev.core_count()).map(CoreConfig::new).collect(),
            timeouts: Timeouts::from_env(),
        })
    }

    /// Device for `compatible` with `core_count` cores of the default size
    ///
    /// # Errors
    ///
    /// Returns [`GspError::Config`] for unknown compatible strings.
    pub fn new(compatible: &str, core_count: usize) -> Result<Self> {
        Ok(Self::for_compatible(compatible)?.with_cores(core_count, DEFAULT_KCFG_NUM))
    }

    /// Replace the core list with `count` cores of `kcfg_num` slots each
    #[must_use]
    pub fn with_cores(mut self, count: usize, kcfg_num: usize) -> Self {
        self.cores = (0..count)
            .map(|id| CoreConfig::new(id).with_kcfg_num(kcfg_num))
            .collect();
        self
    }

    /// Replace the timeouts
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Revision named by the compatible string
    pub fn revision(&self) -> Option<ChipRevision> {
        ChipRevision::from_compatible(&self.compatible)
    }

    /// Check the description before any core is built
    ///
    /// # Errors
    ///
    /// Returns [`GspError::Config`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.revision().is_none() {
            return Err(GspError::config(format!(
                "unknown compatible {:?}",
                self.compatible
            )));
        }
        if self.cores.is_empty() {
            return Err(GspError::config("no cores configured"));
        }
        if self.io_cnt == 0 || self.io_cnt > MAX_IO_CNT {
            return Err(GspError::config(format!(
                "io_cnt {} outside 1..={MAX_IO_CNT}",
                self.io_cnt
            )));
        }
        let mut seen = HashSet::new();
        for core in &self.cores {
            if core.kcfg_num == 0 {
                return Err(GspError::config(format!("core {} has no job slots", core.id)));
            }
            if !seen.insert(core.id) {
                return Err(GspError::config(format!("duplicate core id {}", core.id)));
            }
        }
        Ok(())
    }
}
