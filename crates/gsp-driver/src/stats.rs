//! Status snapshots, printed the way the driver's status nodes read

use crate::engine::{CoreState, SuspendState};
use std::fmt;

/// Snapshot of one core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStats {
    /// Core index
    pub id: usize,
    /// Backend name
    pub name: String,
    /// Execution state
    pub state: CoreState,
    /// Suspend progress
    pub suspend_state: SuspendState,
    /// Selection weight
    pub weight: usize,
    /// Job slots owned
    pub total_kcfg: usize,
    /// Free slots
    pub empty_kcfg: usize,
    /// Queued jobs
    pub filled_kcfg: usize,
    /// Tag of the job on the engine
    pub in_flight: Option<usize>,
    /// Jobs started on the engine
    pub triggered: u64,
    /// Jobs released after an interrupt
    pub completed: u64,
    /// Recoveries run
    pub recovered: u64,
    /// Engine resets
    pub resets: u64,
    /// Watchdog expiries
    pub hangs: u64,
    /// Signal fences created on the core's timeline
    pub fences_created: u64,
    /// Signal fences signaled on the core's timeline
    pub fences_signaled: u64,
}

impl CoreStats {
    /// No job queued or running and every slot free
    pub fn is_drained(&self) -> bool {
        self.in_flight.is_none() && self.filled_kcfg == 0 && self.empty_kcfg == self.total_kcfg
    }
}

impl fmt::Display for CoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "core[{}] {}", self.id, self.name)?;
        writeln!(f, "  state: {} (suspend {})", self.state, self.suspend_state)?;
        writeln!(f, "  weight: {}", self.weight)?;
        writeln!(
            f,
            "  kcfg total/empty/fill: {}/{}/{}",
            self.total_kcfg, self.empty_kcfg, self.filled_kcfg
        )?;
        match self.in_flight {
            Some(tag) => writeln!(f, "  in flight: kcfg[{tag}]")?,
            None => writeln!(f, "  in flight: none")?,
        }
        writeln!(
            f,
            "  triggered {} completed {} recovered {} resets {} hangs {}",
            self.triggered, self.completed, self.recovered, self.resets, self.hangs
        )?;
        write!(
            f,
            "  fences created {} signaled {}",
            self.fences_created, self.fences_signaled
        )
    }
}

/// Snapshot of the whole device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStats {
    /// Configured cores
    pub core_cnt: usize,
    /// Every core idle
    pub idle: bool,
    /// Every core suspended
    pub suspended: bool,
    /// Runtime-PM references held
    pub pm_usage: usize,
    /// Per-core snapshots
    pub cores: Vec<CoreStats>,
}

impl DeviceStats {
    /// Every core drained
    pub fn is_drained(&self) -> bool {
        self.cores.iter().all(CoreStats::is_drained)
    }
}

impl fmt::Display for DeviceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "core_cnt: {}", self.core_cnt)?;
        writeln!(
            f,
            "status: {}{}",
            if self.idle { "idle" } else { "busy" },
            if self.suspended { ", suspended" } else { "" }
        )?;
        writeln!(f, "pm usage: {}", self.pm_usage)?;
        for core in &self.cores {
            writeln!(f, "{core}")?;
        }
        Ok(())
    }
}
