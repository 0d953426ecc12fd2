//! GSP device handle
//!
//! A [`Device`] owns the cores of one GSP instance and everything they
//! share: the power interface, the buffer provider, the fence table and
//! the runtime-PM counter. It routes submissions to the least-loaded core
//! and drives system suspend and resume.

use crate::backend::{select_backend, BackendParts, InterfaceOps};
use crate::buffer::BufferProvider;
use crate::config::{DeviceConfig, Timeouts};
use crate::engine::{Core, CoreEnv, IrqStatus, SuspendState};
use crate::error::{GspError, Result};
use crate::job_list::JobList;
use crate::pm::RuntimePm;
use crate::stats::DeviceStats;
use crate::sync::FenceTable;
use gsp_chip::capability::Capability;
use gsp_chip::uapi::TriggerCmd;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One client submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitRequest {
    /// Return immediately with a signal-fence fd
    pub is_async: bool,
    /// Split submission
    pub split: bool,
    /// Jobs in the batch
    pub count: usize,
    /// Size of one config record in the argument buffer
    pub size: usize,
}

impl SubmitRequest {
    /// Synchronous batch of `count` records of `size` bytes
    pub const fn new(count: usize, size: usize) -> Self {
        Self {
            is_async: false,
            split: false,
            count,
            size,
        }
    }

    /// Same batch, submitted asynchronously
    #[must_use]
    pub const fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// From a decoded trigger command
    pub const fn from_cmd(cmd: TriggerCmd, size: usize) -> Self {
        Self {
            is_async: cmd.is_async,
            split: cmd.split,
            count: cmd.cnt as usize,
            size,
        }
    }
}

/// Handle to one GSP instance
#[derive(Debug)]
pub struct Device {
    config: DeviceConfig,
    cores: Vec<Core>,
    interface: Arc<dyn InterfaceOps>,
    buffers: Arc<dyn BufferProvider>,
    fences: Arc<FenceTable>,
    pm: Arc<RuntimePm>,
    select_lock: Mutex<()>,
    iface_up: AtomicBool,
}

impl Device {
    /// Build the device with the backend [`select_backend`] picks
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any core fails
    /// to come up.
    pub fn probe(config: DeviceConfig) -> Result<Self> {
        let parts = select_backend(&config)?;
        Self::new(config, parts)
    }

    /// Build the device on explicit backend parts
    ///
    /// # Errors
    ///
    /// Returns [`GspError::Config`] if `config` is invalid or does not match
    /// `parts`, or the backend's error if a core fails to initialize.
    pub fn new(config: DeviceConfig, parts: BackendParts) -> Result<Self> {
        config.validate()?;
        if parts.cores.len() != config.cores.len() {
            return Err(GspError::config(format!(
                "{} core nodes but {} backend cores",
                config.cores.len(),
                parts.cores.len()
            )));
        }

        parts.interface.init()?;
        let fences = Arc::new(FenceTable::new());
        let pm = Arc::new(RuntimePm::new(config.timeouts.autosuspend));
        let env = CoreEnv {
            buffers: Arc::clone(&parts.buffers),
            interface: Arc::clone(&parts.interface),
            fences: Arc::clone(&fences),
            pm: Arc::clone(&pm),
            timeouts: config.timeouts,
        };

        let started: Result<Vec<Core>> = config
            .cores
            .iter()
            .zip(parts.cores)
            .map(|(node, ops)| Core::start(node, ops, env.clone()))
            .collect();
        let cores = match started {
            Ok(cores) => cores,
            Err(e) => {
                error!("{}: core init failed: {e}", config.name);
                parts.interface.deinit();
                return Err(e);
            }
        };

        info!(
            "{}: {} probed with {} cores, io_cnt {}",
            config.name,
            config.compatible,
            cores.len(),
            config.io_cnt
        );
        Ok(Self {
            config,
            cores,
            interface: parts.interface,
            buffers: parts.buffers,
            fences,
            pm,
            select_lock: Mutex::new(()),
            iface_up: AtomicBool::new(true),
        })
    }

    /// Device description
    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Bounded waits in force
    #[must_use]
    pub const fn timeouts(&self) -> &Timeouts {
        &self.config.timeouts
    }

    /// Cores in selection order
    #[must_use]
    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    /// Core at `index`
    pub fn core(&self, index: usize) -> Option<&Core> {
        self.cores.get(index)
    }

    /// Buffer provider shared by the cores
    pub fn buffers(&self) -> &Arc<dyn BufferProvider> {
        &self.buffers
    }

    /// Fence descriptor table
    pub fn fences(&self) -> &Arc<FenceTable> {
        &self.fences
    }

    /// Close a fence fd handed out by an async submission
    pub fn close_fence(&self, fd: i32) -> bool {
        self.fences.close(fd)
    }

    /// Capability record of the device
    pub fn capability(&self) -> Capability {
        let mut cap = self.cores[0].capability();
        cap.io_cnt = u32::try_from(self.config.io_cnt).unwrap_or(u32::MAX);
        cap.core_cnt = u32::try_from(self.cores.len()).unwrap_or(u32::MAX);
        cap
    }

    /// Pick the core with the lowest weight; ties go to the earlier core.
    /// If its pool is exhausted, wait (bounded) for a slot to free up.
    ///
    /// # Errors
    ///
    /// [`GspError::QueueFull`] if no slot frees within the release wait. The
    /// core is not charged for the job in that case.
    pub(crate) fn select_core(&self) -> Result<usize> {
        let index = {
            let _guard = self.select_lock.lock();
            let (index, core) = self
                .cores
                .iter()
                .enumerate()
                .min_by_key(|(_, core)| core.weight())
                .ok_or_else(|| GspError::config("no cores"))?;
            core.add_weight();
            index
        };
        let core = &self.cores[index];
        if core.is_exhausted() {
            debug!("core {}: pool exhausted, waiting for a release", core.id());
            if !core.release_wait(self.config.timeouts.release_wait) {
                core.drop_weight();
                return Err(GspError::QueueFull { core: core.id() });
            }
        }
        Ok(index)
    }

    /// Kick every core's worker
    pub fn start_work(&self) {
        for core in &self.cores {
            core.work();
        }
    }

    /// Interrupt top half for `core`
    ///
    /// # Errors
    ///
    /// Returns [`GspError::Config`] for an unknown core index.
    pub fn irq(&self, core: usize, status: IrqStatus) -> Result<()> {
        self.cores
            .get(core)
            .ok_or_else(|| GspError::config(format!("no core {core}")))?
            .irq(status);
        Ok(())
    }

    /// Every core idle
    pub fn is_idle(&self) -> bool {
        self.cores.iter().all(Core::is_idle)
    }

    /// Every core suspended
    pub fn is_suspend(&self) -> bool {
        self.cores.iter().all(Core::is_suspend)
    }

    /// Some core has a suspend in progress or in effect
    pub fn is_suspending(&self) -> bool {
        self.cores.iter().any(Core::is_suspending)
    }

    /// Runtime PM may power the device down
    pub fn runtime_idle(&self) -> bool {
        self.is_idle() && self.pm.runtime_idle()
    }

    /// Quiesce every core for system suspend
    ///
    /// New triggers stop at once. Busy cores get a bounded wait for their
    /// in-flight job; a core that does not drain in time stays up and the
    /// timeout is reported. Queued jobs are dropped as cancelled.
    ///
    /// # Errors
    ///
    /// Returns the first [`GspError::SuspendTimeout`] hit.
    pub fn suspend(&self) -> Result<()> {
        if self.is_suspend() {
            warn!("{}: already suspended", self.config.name);
            return Ok(());
        }
        info!("{}: suspend", self.config.name);
        let wait = self.config.timeouts.suspend_wait;

        for core in &self.cores {
            core.set_suspend_state(SuspendState::Begin);
        }

        let mut first_err = None;
        for core in &self.cores {
            // publish Wait before looking at the state; the worker does the
            // reverse when it goes idle
            core.set_suspend_state(SuspendState::Wait);
            if !core.is_idle() && !core.suspend_wait(wait) {
                let err = GspError::SuspendTimeout {
                    core: core.id(),
                    duration_ms: crate::completion::duration_ms(wait),
                };
                error!("{err}");
                first_err.get_or_insert(err);
                continue;
            }
            if let Err(e) = core.suspend(wait) {
                error!("core {}: {e}", core.id());
                first_err.get_or_insert(e);
            }
        }

        if self.is_suspend() && self.iface_up.swap(false, Ordering::AcqRel) {
            self.interface.deinit();
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Bring every core back after [`Device::suspend`]
    ///
    /// # Errors
    ///
    /// Returns the interface error if it cannot be brought up, or the first
    /// core that did not acknowledge the resume in time.
    pub fn resume(&self) -> Result<()> {
        let t = self.config.timeouts;
        for core in &self.cores {
            if core.is_suspending() && !core.is_suspend() && !core.suspend_wait(t.suspend_wait) {
                info!("core {}: still busy, forcing resume", core.id());
            }
        }

        if !self.iface_up.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.interface.init() {
                self.iface_up.store(false, Ordering::Release);
                error!("{}: interface init on resume failed: {e}", self.config.name);
                return Err(e);
            }
        }

        let mut first_err = None;
        for core in &self.cores {
            if let Err(e) = core.resume(t.resume_wait) {
                error!("core {}: {e}", core.id());
                first_err.get_or_insert(e);
            }
        }
        info!("{}: resumed", self.config.name);
        first_err.map_or(Ok(()), Err)
    }

    /// Wait for a pending resume on every core
    ///
    /// # Errors
    ///
    /// Returns [`GspError::SuspendTimeout`] for the first core still
    /// suspended after the resume wait.
    pub fn resume_wait(&self) -> Result<()> {
        for core in &self.cores {
            core.resume_wait(self.config.timeouts.resume_wait)?;
        }
        Ok(())
    }

    /// Submit a batch: acquire, fill, push, kick, and wait if synchronous
    ///
    /// `user_arg` holds `request.count` records of `request.size` bytes; for
    /// an asynchronous batch the published signal-fence fd is written back
    /// into the last record and returned.
    ///
    /// # Errors
    ///
    /// Returns [`GspError::DeviceStopped`] after [`Device::shutdown`],
    /// [`GspError::Config`] for a bad count or size, and otherwise
    /// the first failure of the pipeline. Every job acquired for the batch
    /// is released and returned on failure.
    pub fn submit(&self, request: SubmitRequest, user_arg: &mut [u8]) -> Result<Option<i32>> {
        if self.cores.iter().any(Core::is_stopped) {
            return Err(GspError::DeviceStopped);
        }
        let cfg_size = self.cores[0].cfg_size();
        if request.count == 0 || request.count > self.config.io_cnt {
            return Err(GspError::config(format!(
                "job count {} outside 1..={}",
                request.count, self.config.io_cnt
            )));
        }
        if request.size < cfg_size {
            return Err(GspError::config(format!(
                "record size {} below {cfg_size}",
                request.size
            )));
        }
        let need = request.count * request.size;
        if user_arg.len() < need {
            return Err(GspError::config(format!(
                "argument holds {} bytes, batch needs {need}",
                user_arg.len()
            )));
        }

        let mut list = JobList::new(self);
        list.acquire(request.count)?;
        if let Err(e) = list.fill(user_arg, request.is_async, request.split, request.size) {
            list.put();
            return Err(e);
        }
        if let Err(e) = list.push() {
            list.cancel();
            return Err(e);
        }

        if self.is_suspending() || self.is_suspend() {
            if let Err(e) = self.resume_wait() {
                error!("{}: submit while suspended: {e}", self.config.name);
                list.cancel();
                return Err(e);
            }
        }

        self.pm.mark_last_busy();
        self.start_work();

        if !request.is_async {
            if let Err(e) = list.wait(self.config.timeouts.completion_wait) {
                list.cancel();
                return Err(e);
            }
        }
        Ok(list.published_fd())
    }

    /// Status snapshot
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            core_cnt: self.cores.len(),
            idle: self.is_idle(),
            suspended: self.is_suspend(),
            pm_usage: self.pm.usage(),
            cores: self.cores.iter().map(Core::stats).collect(),
        }
    }

    /// Stop every worker. Jobs in flight or queued complete as interrupted
    /// and their fences are signaled. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        for core in &self.cores {
            core.stop();
        }
        if self.iface_up.swap(false, Ordering::AcqRel) {
            self.interface.deinit();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CoreOps;
    use crate::backends::{SoftwareBufferPool, SoftwareCore, SoftwareInterface};
    use gsp_chip::compat::ChipRevision;

    const R8P0: &str = "sprd,gsp-r8p0-sharkl5pro";

    fn device(cores: usize, slots: usize) -> Device {
        let config = DeviceConfig::for_compatible(R8P0)
            .unwrap()
            .with_cores(cores, slots)
            .with_timeouts(Timeouts::simulated());
        let parts = BackendParts {
            cores: (0..cores)
                .map(|_| Arc::new(SoftwareCore::new(ChipRevision::R8p0).0) as Arc<dyn CoreOps>)
                .collect(),
            interface: Arc::new(SoftwareInterface::new("sharkl5pro")),
            buffers: Arc::new(SoftwareBufferPool::new()),
        };
        Device::new(config, parts).unwrap()
    }

    #[test]
    fn selection_balances_by_weight() {
        let dev = device(2, 4);
        let picks: Vec<_> = (0..3).map(|_| dev.select_core().unwrap()).collect();
        assert_eq!(picks, [0, 1, 0]);
        assert_eq!(dev.cores()[0].weight(), 2);
    }

    #[test]
    fn exhausted_core_is_not_charged() {
        let dev = device(1, 1);
        let core = &dev.cores()[0];
        let held = core.acquire().unwrap();

        assert_eq!(dev.select_core(), Err(GspError::QueueFull { core: 0 }));
        assert_eq!(core.weight(), 0);

        core.put(held);
        assert_eq!(dev.select_core(), Ok(0));
        assert_eq!(core.weight(), 1);
    }

    #[test]
    fn capability_reflects_configuration() {
        let dev = device(1, 2);
        let cap = dev.capability();
        assert!(cap.is_valid());
        assert_eq!(cap.core_cnt, 1);
        assert_eq!(cap.io_cnt, 4);
    }

    #[test]
    fn mismatched_parts_rejected() {
        let config = DeviceConfig::for_compatible(R8P0).unwrap();
        let parts = BackendParts {
            cores: Vec::new(),
            interface: Arc::new(SoftwareInterface::new("sharkl5pro")),
            buffers: Arc::new(SoftwareBufferPool::new()),
        };
        assert!(matches!(
            Device::new(config, parts),
            Err(GspError::Config { .. })
        ));
    }

    #[test]
    fn submit_validates_count_and_size() {
        let dev = device(1, 2);
        let mut arg = vec![0u8; 1024];
        assert!(dev.submit(SubmitRequest::new(0, 128), &mut arg).is_err());
        assert!(dev.submit(SubmitRequest::new(5, 128), &mut arg).is_err());
        assert!(dev.submit(SubmitRequest::new(1, 64), &mut arg).is_err());
        assert!(dev.submit(SubmitRequest::new(2, 128), &mut arg[..100]).is_err());
        assert!(dev.stats().is_drained());
    }

    #[test]
    fn request_from_trigger_command() {
        let cmd = TriggerCmd {
            is_async: true,
            split: false,
            cnt: 3,
        };
        let req = SubmitRequest::from_cmd(cmd, 128);
        assert_eq!(req, SubmitRequest::new(3, 128).asynchronous());
    }
}
