// SPDX-License-Identifier: AGPL-3.0-only

//! Software GSP core
//!
//! Implements [`CoreOps`] without touching hardware. A trigger "runs" the
//! job by raising the interrupt on the core's [`IrqLine`], either after a
//! fixed latency on a helper thread or when the test harness calls
//! [`SoftwareControl::fire_irq`]. This enables:
//!
//! 1. **CI without a board**: every scheduler path (trigger, release,
//!    recovery, suspend) runs on any host.
//! 2. **Fault injection**: busy, clock-check, control-code, hang, IRQ error,
//!    enable and release failures can be queued per trigger, and the fd
//!    slot of the next record can be withheld.
//! 3. **Ordering checks**: the `job_id` of every triggered record is logged.
//!
//! ## Control handle
//!
//! [`SoftwareCore::new`] returns the core together with a cloneable
//! [`SoftwareControl`] that stays with the caller after the core is boxed
//! into a device.

use crate::backend::CoreOps;
use crate::config::CoreConfig;
use crate::engine::{IrqLine, IrqStatus};
use crate::error::{GspError, Result};
use crate::kcfg::Kcfg;
use crate::layer::Layer;
use bytes::Bytes;
use gsp_chip::capability::Capability;
use gsp_chip::codes::ErrorCode;
use gsp_chip::compat::ChipRevision;
use gsp_chip::uapi::{CfgUser, CFG_USER_SIZE, DES_SIG_FD_OFFSET};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interrupt latency used by [`crate::select_backend`]
pub const DEFAULT_IRQ_LATENCY: Duration = Duration::from_millis(1);

/// How the simulated engine reports completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    /// Raise the interrupt this long after trigger
    Auto(Duration),
    /// Hold interrupts until [`SoftwareControl::fire_irq`]
    Manual,
}

/// Fault applied to the next trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerFault {
    /// Return `HW_BUSY_ERR`
    HwBusy,
    /// Return `CLK_CHK_ERR`
    ClkChk,
    /// Return `CTL_CODE_ERR`
    CtlCode,
    /// Accept the job but never interrupt
    Hang,
    /// Interrupt with an error status
    IrqError,
}

/// Operation counts of a software core
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Triggers accepted or refused
    pub triggers: u64,
    /// Successful enables
    pub enables: u64,
    /// Disables
    pub disables: u64,
    /// Release calls
    pub releases: u64,
    /// Dumps
    pub dumps: u64,
    /// Resets
    pub resets: u64,
    /// Interrupts raised
    pub irqs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    triggers: AtomicU64,
    enables: AtomicU64,
    disables: AtomicU64,
    releases: AtomicU64,
    dumps: AtomicU64,
    resets: AtomicU64,
    irqs: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            triggers: get(&self.triggers),
            enables: get(&self.enables),
            disables: get(&self.disables),
            releases: get(&self.releases),
            dumps: get(&self.dumps),
            resets: get(&self.resets),
            irqs: get(&self.irqs),
        }
    }
}

#[derive(Debug)]
struct SimState {
    core_id: AtomicUsize,
    slots: AtomicUsize,
    irq: Mutex<Option<IrqLine>>,
    mode: Mutex<IrqMode>,
    faults: Mutex<VecDeque<TriggerFault>>,
    pending: Mutex<VecDeque<IrqStatus>>,
    enable_failures: AtomicUsize,
    release_failures: AtomicUsize,
    intercept_failures: AtomicUsize,
    force_calc: AtomicBool,
    trigger_log: Mutex<Vec<u32>>,
    counters: Counters,
}

impl SimState {
    fn raise(&self, status: IrqStatus) {
        let line = self.irq.lock().clone();
        match line {
            Some(line) => {
                self.counters.irqs.fetch_add(1, Ordering::Relaxed);
                line.raise(status);
            }
            None => warn!("software core: interrupt with no line attached"),
        }
    }

    fn schedule_irq(self: &Arc<Self>, status: IrqStatus) {
        let mode = *self.mode.lock();
        match mode {
            IrqMode::Manual => self.pending.lock().push_back(status),
            IrqMode::Auto(latency) => {
                let state = Arc::clone(self);
                let spawned = thread::Builder::new()
                    .name("gsp-sim-irq".into())
                    .spawn(move || {
                        thread::sleep(latency);
                        state.raise(status);
                    });
                if let Err(e) = spawned {
                    warn!("software core: irq thread failed ({e}); raising inline");
                    self.raise(status);
                }
            }
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Software (simulated) GSP core
#[derive(Debug)]
pub struct SoftwareCore {
    revision: ChipRevision,
    name: String,
    state: Arc<SimState>,
}

/// Harness-side handle to a [`SoftwareCore`]
#[derive(Debug, Clone)]
pub struct SoftwareControl {
    state: Arc<SimState>,
}

impl SoftwareCore {
    /// New core of `revision`, interrupting after [`DEFAULT_IRQ_LATENCY`]
    pub fn new(revision: ChipRevision) -> (Self, SoftwareControl) {
        let state = Arc::new(SimState {
            core_id: AtomicUsize::new(0),
            slots: AtomicUsize::new(0),
            irq: Mutex::new(None),
            mode: Mutex::new(IrqMode::Auto(DEFAULT_IRQ_LATENCY)),
            faults: Mutex::new(VecDeque::new()),
            pending: Mutex::new(VecDeque::new()),
            enable_failures: AtomicUsize::new(0),
            release_failures: AtomicUsize::new(0),
            intercept_failures: AtomicUsize::new(0),
            force_calc: AtomicBool::new(true),
            trigger_log: Mutex::new(Vec::new()),
            counters: Counters::default(),
        });
        let core = Self {
            revision,
            name: format!("gsp-{revision}-sim"),
            state: Arc::clone(&state),
        };
        (core, SoftwareControl { state })
    }

    /// Revision modelled
    pub const fn revision(&self) -> ChipRevision {
        self.revision
    }

    fn id(&self) -> usize {
        self.state.core_id.load(Ordering::Relaxed)
    }
}

impl SoftwareControl {
    /// Switch interrupt delivery
    pub fn set_irq_mode(&self, mode: IrqMode) {
        *self.state.mode.lock() = mode;
    }

    /// Queue a fault for a future trigger (one fault per trigger, FIFO)
    pub fn inject(&self, fault: TriggerFault) {
        self.state.faults.lock().push_back(fault);
    }

    /// Make the next `enable` fail
    pub fn fail_next_enable(&self) {
        self.state.enable_failures.fetch_add(1, Ordering::AcqRel);
    }

    /// Make the next `release` fail
    pub fn fail_next_release(&self) {
        self.state.release_failures.fetch_add(1, Ordering::AcqRel);
    }

    /// Make the next `intercept` report no fd slot
    pub fn fail_next_intercept(&self) {
        self.state.intercept_failures.fetch_add(1, Ordering::AcqRel);
    }

    /// Deliver the oldest held interrupt; `false` if none is held
    pub fn fire_irq(&self) -> bool {
        let next = self.state.pending.lock().pop_front();
        match next {
            Some(status) => {
                self.state.raise(status);
                true
            }
            None => false,
        }
    }

    /// Interrupts held in manual mode
    pub fn pending_irqs(&self) -> usize {
        self.state.pending.lock().len()
    }

    /// Operation counts
    pub fn counters(&self) -> CounterSnapshot {
        self.state.counters.snapshot()
    }

    /// `job_id`s in trigger order
    pub fn trigger_log(&self) -> Vec<u32> {
        self.state.trigger_log.lock().clone()
    }

    /// Job slots reserved by `alloc`
    pub fn slots(&self) -> usize {
        self.state.slots.load(Ordering::Relaxed)
    }

    /// Calibration must be recomputed on the next trigger
    pub fn force_calc(&self) -> bool {
        self.state.force_calc.load(Ordering::Relaxed)
    }
}

impl CoreOps for SoftwareCore {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse_config(&self, config: &CoreConfig) -> Result<()> {
        if config.kcfg_num == 0 {
            return Err(GspError::config(format!(
                "core {}: kcfg-num must be non-zero",
                config.id
            )));
        }
        self.state.core_id.store(config.id, Ordering::Relaxed);
        debug!(
            "{}: core {} with {} slots{}",
            self.name,
            config.id,
            config.kcfg_num,
            if config.real_time { ", real-time" } else { "" }
        );
        Ok(())
    }

    fn alloc(&self, kcfg_num: usize) -> Result<()> {
        self.state.slots.store(kcfg_num, Ordering::Relaxed);
        Ok(())
    }

    fn init(&self, irq: IrqLine) -> Result<()> {
        *self.state.irq.lock() = Some(irq);
        info!("{}: core {} initialized", self.name, self.id());
        Ok(())
    }

    fn cfg_size(&self) -> usize {
        CFG_USER_SIZE
    }

    fn copy_payload(&self, job: &mut Kcfg, record: Bytes, index: usize) -> Result<()> {
        let cfg = CfgUser::decode(&record)
            .map_err(|e| GspError::config(format!("record {index}: {e}")))?;
        if !cfg.des.enable {
            return Err(GspError::config(format!(
                "record {index}: destination layer disabled"
            )));
        }
        job.set_payload(record.slice(..CFG_USER_SIZE));
        for user in cfg.layers() {
            job.push_layer(Layer::from_user(&user));
        }
        Ok(())
    }

    fn intercept(&self, index: usize, size: usize) -> Option<usize> {
        if take_one(&self.state.intercept_failures) {
            return None;
        }
        (size >= CFG_USER_SIZE).then(|| index * size + DES_SIG_FD_OFFSET)
    }

    fn enable(&self) -> Result<()> {
        if take_one(&self.state.enable_failures) {
            return Err(GspError::backend(format!("{}: clock enable failed", self.name)));
        }
        self.state.counters.enables.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn disable(&self) {
        self.state.counters.disables.fetch_add(1, Ordering::Relaxed);
    }

    fn trigger(&self, job: &Kcfg) -> ErrorCode {
        let job_id = job
            .payload()
            .get(..4)
            .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        self.state.counters.triggers.fetch_add(1, Ordering::Relaxed);
        self.state.trigger_log.lock().push(job_id);
        self.state.force_calc.store(false, Ordering::Relaxed);

        let fault = self.state.faults.lock().pop_front();
        debug!("{}: trigger job {job_id} (fault {fault:?})", self.name);
        match fault {
            Some(TriggerFault::HwBusy) => ErrorCode::HwBusy,
            Some(TriggerFault::ClkChk) => ErrorCode::ClkChk,
            Some(TriggerFault::CtlCode) => ErrorCode::CtlCode,
            Some(TriggerFault::Hang) => ErrorCode::NoErr,
            Some(TriggerFault::IrqError) => {
                self.state.schedule_irq(IrqStatus::Error);
                ErrorCode::NoErr
            }
            None => {
                self.state.schedule_irq(IrqStatus::Done);
                ErrorCode::NoErr
            }
        }
    }

    fn release(&self) -> Result<()> {
        self.state.counters.releases.fetch_add(1, Ordering::Relaxed);
        if take_one(&self.state.release_failures) {
            return Err(GspError::backend(format!("{}: engine not idle after irq", self.name)));
        }
        Ok(())
    }

    fn dump(&self) {
        let c = self.state.counters.snapshot();
        self.state.counters.dumps.fetch_add(1, Ordering::Relaxed);
        info!(
            "{}: dump core {}: triggers {} irqs {} resets {}",
            self.name,
            self.id(),
            c.triggers,
            c.irqs,
            c.resets
        );
    }

    fn reset(&self) -> Result<()> {
        self.state.counters.resets.fetch_add(1, Ordering::Relaxed);
        self.state.pending.lock().clear();
        Ok(())
    }

    fn recalibrate(&self) {
        self.state.force_calc.store(true, Ordering::Relaxed);
    }

    fn capability(&self) -> Capability {
        Capability::for_revision(self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsp_chip::layer::LayerType;
    use gsp_chip::uapi::LayerUser;

    fn record(job_id: u32) -> Bytes {
        let mut cfg = CfgUser::new(job_id);
        cfg.des = LayerUser::with_buffer(LayerType::Des, 4);
        Bytes::copy_from_slice(&cfg.to_bytes())
    }

    #[test]
    fn copy_payload_decodes_three_layers() {
        let (core, _) = SoftwareCore::new(ChipRevision::R6p0);
        let mut job = Kcfg::new(0, 0);
        core.copy_payload(&mut job, record(5), 0).unwrap();
        assert_eq!(job.layers().len(), 3);
        assert_eq!(job.des_layer().map(Layer::share_fd), Some(4));
    }

    #[test]
    fn copy_payload_rejects_disabled_destination() {
        let (core, _) = SoftwareCore::new(ChipRevision::R6p0);
        let mut job = Kcfg::new(0, 0);
        let bytes = Bytes::copy_from_slice(&CfgUser::new(1).to_bytes());
        assert!(matches!(
            core.copy_payload(&mut job, bytes, 0),
            Err(GspError::Config { .. })
        ));
    }

    #[test]
    fn faults_map_to_codes_in_order() {
        let (core, control) = SoftwareCore::new(ChipRevision::R8p0);
        control.set_irq_mode(IrqMode::Manual);
        control.inject(TriggerFault::HwBusy);
        control.inject(TriggerFault::ClkChk);
        let mut job = Kcfg::new(0, 0);
        core.copy_payload(&mut job, record(9), 0).unwrap();
        assert_eq!(core.trigger(&job), ErrorCode::HwBusy);
        assert_eq!(core.trigger(&job), ErrorCode::ClkChk);
        assert_eq!(core.trigger(&job), ErrorCode::NoErr);
        assert_eq!(control.pending_irqs(), 1);
        assert_eq!(control.trigger_log(), vec![9, 9, 9]);
        assert_eq!(control.counters().triggers, 3);
    }

    #[test]
    fn one_shot_enable_failure() {
        let (core, control) = SoftwareCore::new(ChipRevision::R6p0);
        control.fail_next_enable();
        assert!(core.enable().is_err());
        assert!(core.enable().is_ok());
        assert_eq!(control.counters().enables, 1);
    }

    #[test]
    fn alloc_records_slot_count() {
        let (core, control) = SoftwareCore::new(ChipRevision::R7p0);
        core.parse_config(&CoreConfig::new(1).with_kcfg_num(4)).unwrap();
        core.alloc(4).unwrap();
        assert_eq!(control.slots(), 4);
        assert!(core.parse_config(&CoreConfig::new(0).with_kcfg_num(0)).is_err());
    }

    #[test]
    fn intercept_points_at_des_sig_fd() {
        let (core, _) = SoftwareCore::new(ChipRevision::R6p0);
        assert_eq!(core.intercept(2, 160), Some(2 * 160 + DES_SIG_FD_OFFSET));
        assert_eq!(core.intercept(0, 16), None);
    }

    #[test]
    fn intercept_failure_is_one_shot() {
        let (core, control) = SoftwareCore::new(ChipRevision::R6p0);
        control.fail_next_intercept();
        assert_eq!(core.intercept(0, 160), None);
        assert_eq!(core.intercept(0, 160), Some(DES_SIG_FD_OFFSET));
    }

    #[test]
    fn trigger_clears_and_recalibrate_sets_force_calc() {
        let (core, control) = SoftwareCore::new(ChipRevision::R6p0);
        control.set_irq_mode(IrqMode::Manual);
        assert!(control.force_calc());
        core.trigger(&Kcfg::new(0, 0));
        assert!(!control.force_calc());
        core.recalibrate();
        assert!(control.force_calc());
    }
}
