//! Execution cores
//!
//! A [`Core`] couples one engine's [`CoreOps`] table with a job pool, a
//! fence timeline and a dedicated worker thread. Submitters only touch the
//! pool; everything that changes the core's state (trigger, release,
//! recovery, suspend and resume) is a [`CoreMsg`] handled by the worker one
//! at a time. Interrupts and the hang watchdog never run scheduler code
//! themselves: the interrupt line enqueues a message, and the watchdog is a
//! timer the worker selects on next to its mailbox.
//!
//! ```text
//!            submit ──push──► filled ──pull──► worker ──trigger──► engine
//!                                                 ▲                   │
//!                                    Irq / timer  └───── IrqLine ◄────┘
//! ```

mod state;
mod worker;

pub use state::{CoreState, RecoveryPlan, SuspendState};

use crate::backend::{CoreOps, InterfaceOps};
use crate::buffer::BufferProvider;
use crate::completion::{duration_ms, Completion, JobCompletion};
use crate::config::{CoreConfig, Timeouts};
use crate::error::{GspError, Result};
use crate::kcfg::Kcfg;
use crate::layer::Layer;
use crate::pm::RuntimePm;
use crate::stats::CoreStats;
use crate::sync::{FenceTable, Timeline};
use crate::workqueue::{PushError, Workqueue};
use bytes::Bytes;
use crossbeam_channel::{unbounded, Sender};
use gsp_chip::capability::Capability;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use worker::Worker;

/// Status reported with an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqStatus {
    /// The engine finished the job
    Done,
    /// The engine reported an error
    Error,
}

/// Work items handled by a core's worker
#[derive(Debug)]
pub(crate) enum CoreMsg {
    /// New jobs may be queued
    Kick,
    /// Start the next queued job
    Trigger,
    /// Engine interrupt
    Irq(IrqStatus),
    /// Clean up after a failure
    Recover,
    /// Enter the suspend state; completes the handle when done
    Suspend(Arc<Completion>),
    /// Leave the suspend state; completes the handle when done
    Resume(Arc<Completion>),
    /// Exit the worker
    Stop,
}

/// Interrupt line of one core, handed to its backend at init
///
/// Raising never blocks; the worker picks the interrupt up in order with
/// everything else scheduled on the core.
#[derive(Debug, Clone)]
pub struct IrqLine {
    core: usize,
    tx: Sender<CoreMsg>,
}

impl IrqLine {
    /// Core this line belongs to
    pub const fn core(&self) -> usize {
        self.core
    }

    /// Report an interrupt
    pub fn raise(&self, status: IrqStatus) {
        if self.tx.send(CoreMsg::Irq(status)).is_err() {
            debug!("core {}: interrupt after worker exit", self.core);
        }
    }
}

/// Device-wide services a core uses
#[derive(Debug, Clone)]
pub(crate) struct CoreEnv {
    pub buffers: Arc<dyn BufferProvider>,
    pub interface: Arc<dyn InterfaceOps>,
    pub fences: Arc<FenceTable>,
    pub pm: Arc<RuntimePm>,
    pub timeouts: Timeouts,
}

#[derive(Debug, Default)]
pub(crate) struct CoreCounters {
    pub triggered: AtomicU64,
    pub completed: AtomicU64,
    pub recovered: AtomicU64,
    pub resets: AtomicU64,
    pub hangs: AtomicU64,
}

impl CoreCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

const NO_JOB: usize = usize::MAX;

/// State shared between a [`Core`] handle and its worker
#[derive(Debug)]
pub(crate) struct CoreShared {
    pub id: usize,
    pub config: CoreConfig,
    pub ops: Arc<dyn CoreOps>,
    pub queue: Workqueue,
    pub timeline: Timeline,
    pub env: CoreEnv,
    pub stopping: AtomicBool,
    pub suspend_done: Completion,
    pub resume_done: Completion,
    pub counters: CoreCounters,
    state: AtomicU8,
    suspend_state: AtomicU8,
    weight: AtomicUsize,
    current_tag: AtomicUsize,
}

impl CoreShared {
    pub fn state(&self) -> CoreState {
        CoreState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: CoreState) {
        let old = CoreState::from_raw(self.state.swap(state.raw(), Ordering::SeqCst));
        if old != state {
            debug!("core {}: {old} -> {state}", self.id);
        }
    }

    pub fn suspend_state(&self) -> SuspendState {
        SuspendState::from_raw(self.suspend_state.load(Ordering::SeqCst))
    }

    pub fn set_suspend_state(&self, state: SuspendState) {
        self.suspend_state.store(state.raw(), Ordering::SeqCst);
    }

    pub fn suspend_pending(&self) -> bool {
        self.suspend_state() != SuspendState::Exit
    }

    pub fn set_current(&self, tag: Option<usize>) {
        self.current_tag.store(tag.unwrap_or(NO_JOB), Ordering::Release);
    }

    pub fn current(&self) -> Option<usize> {
        let tag = self.current_tag.load(Ordering::Acquire);
        (tag != NO_JOB).then_some(tag)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// One execution core with its worker
#[derive(Debug)]
pub struct Core {
    shared: Arc<CoreShared>,
    tx: Sender<CoreMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    /// Parse the node, initialize the backend and spawn the worker
    pub(crate) fn start(config: &CoreConfig, ops: Arc<dyn CoreOps>, env: CoreEnv) -> Result<Self> {
        ops.parse_config(config)?;
        ops.alloc(config.kcfg_num)?;
        let (tx, rx) = unbounded();
        ops.init(IrqLine {
            core: config.id,
            tx: tx.clone(),
        })?;

        let shared = Arc::new(CoreShared {
            id: config.id,
            config: config.clone(),
            queue: Workqueue::new(config.id, config.kcfg_num),
            timeline: Timeline::new(format!("gsp-core{}", config.id)),
            ops,
            env,
            stopping: AtomicBool::new(false),
            suspend_done: Completion::new(),
            resume_done: Completion::new(),
            counters: CoreCounters::default(),
            state: AtomicU8::new(CoreState::Idle.raw()),
            suspend_state: AtomicU8::new(SuspendState::Exit.raw()),
            weight: AtomicUsize::new(0),
            current_tag: AtomicUsize::new(NO_JOB),
        });

        let worker = Worker::new(Arc::clone(&shared), rx, tx.clone());
        let id = config.id;
        let real_time = config.real_time;
        let handle = thread::Builder::new()
            .name(format!("gsp-core{id}"))
            .spawn(move || {
                if real_time {
                    set_realtime(id);
                }
                worker.run();
            })
            .map_err(|e| GspError::backend(format!("core {id}: worker spawn failed: {e}")))?;

        info!(
            "core {id}: {} with {} kcfg slots",
            shared.ops.name(),
            config.kcfg_num
        );
        Ok(Self {
            shared,
            tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Core index
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Backend name
    pub fn name(&self) -> &str {
        self.shared.ops.name()
    }

    /// Execution state
    pub fn state(&self) -> CoreState {
        self.shared.state()
    }

    /// Suspend progress
    pub fn suspend_state(&self) -> SuspendState {
        self.shared.suspend_state()
    }

    /// Worker stopped or stopping
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopping()
    }

    /// Nothing in flight or scheduled
    pub fn is_idle(&self) -> bool {
        self.state() == CoreState::Idle
    }

    /// Quiesced for suspend
    pub fn is_suspend(&self) -> bool {
        self.state() == CoreState::Suspend
    }

    /// A suspend has started and not yet been undone by a resume
    pub fn is_suspending(&self) -> bool {
        self.shared.suspend_pending()
    }

    /// Jobs routed here so far
    pub fn weight(&self) -> usize {
        self.shared.weight.load(Ordering::Acquire)
    }

    /// What the engine can do
    pub fn capability(&self) -> Capability {
        self.shared.ops.capability()
    }

    /// Size of one client config record
    pub fn cfg_size(&self) -> usize {
        self.shared.ops.cfg_size()
    }

    /// Signal-fence slot of record `index`, see [`CoreOps::intercept`]
    pub fn intercept(&self, index: usize, size: usize) -> Option<usize> {
        self.shared.ops.intercept(index, size)
    }

    pub(crate) fn add_weight(&self) {
        self.shared.weight.fetch_add(1, Ordering::AcqRel);
    }

    /// Undo an [`Core::add_weight`] for a job the core never received
    pub(crate) fn drop_weight(&self) {
        let _ = self
            .shared
            .weight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| w.checked_sub(1));
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.shared.queue.is_exhausted()
    }

    /// Block until a job slot frees up; `true` if one did within `timeout`
    pub(crate) fn release_wait(&self, timeout: Duration) -> bool {
        let freed = self.shared.queue.wait_for_slot(timeout);
        if !freed {
            warn!(
                "core {}: no slot freed within {}ms",
                self.id(),
                duration_ms(timeout)
            );
        }
        freed
    }

    pub(crate) fn acquire(&self) -> Option<Kcfg> {
        self.shared.queue.acquire()
    }

    /// Decode record `index` into `job` and bind its buffers and fences.
    /// Returns the published signal-fence fd, if one was created.
    ///
    /// On failure everything taken so far is released again.
    pub(crate) fn fill(
        &self,
        job: &mut Kcfg,
        record: Bytes,
        index: usize,
        is_async: bool,
        last: bool,
        split: bool,
    ) -> Result<Option<i32>> {
        job.set_flags(is_async, last, split);
        match self.try_fill(job, record, index) {
            Ok(fd) => {
                job.mark_filled();
                debug!(
                    "core {}: kcfg[{}] filled (async {is_async}, last {last})",
                    self.id(),
                    job.tag()
                );
                Ok(fd)
            }
            Err(e) => {
                if let Some(fd) = job.fences().published_fd() {
                    self.shared.env.fences.close(fd);
                }
                self.release(job);
                Err(e)
            }
        }
    }

    fn try_fill(&self, job: &mut Kcfg, record: Bytes, index: usize) -> Result<Option<i32>> {
        let env = &self.shared.env;
        self.shared.ops.copy_payload(job, record, index)?;
        job.get_dmabuf(env.buffers.as_ref())?;
        job.set_need_iommu(self.shared.config.need_iommu);
        if !job.is_async() {
            return Ok(None);
        }

        let wait_fds: Vec<i32> = job
            .layers()
            .iter()
            .filter(|l| l.is_enabled())
            .map(Layer::wait_fd)
            .collect();
        for fd in wait_fds {
            job.fences_mut().collect(&env.fences, fd)?;
        }

        if job.is_last() && job.des_layer().is_some_and(Layer::is_enabled) {
            let fd = job
                .fences_mut()
                .create_signal(&self.shared.timeline, &env.fences);
            return Ok(Some(fd));
        }
        Ok(None)
    }

    pub(crate) fn push(&self, job: Kcfg) -> std::result::Result<(), PushError> {
        self.shared.queue.push(job)
    }

    pub(crate) fn put(&self, job: Kcfg) {
        self.shared.queue.put(job);
    }

    /// Take back a queued job the worker has not pulled yet
    pub(crate) fn cancel(&self, completion: &Arc<JobCompletion>) -> Option<Kcfg> {
        self.shared.queue.cancel(completion)
    }

    /// Drop buffer references and fence state of `job`
    pub(crate) fn release(&self, job: &mut Kcfg) {
        job.release(self.shared.env.buffers.as_ref());
    }

    /// Drop a job that will not run: release it and complete it as cancelled
    pub(crate) fn discard(&self, job: &mut Kcfg) {
        job.cancel(self.shared.env.buffers.as_ref());
    }

    /// Tell the worker jobs may be queued
    pub fn work(&self) {
        self.send(CoreMsg::Kick);
    }

    /// Interrupt top half
    pub fn irq(&self, status: IrqStatus) {
        self.send(CoreMsg::Irq(status));
    }

    fn send(&self, msg: CoreMsg) -> bool {
        let sent = self.tx.send(msg).is_ok();
        if !sent {
            debug!("core {}: worker gone", self.id());
        }
        sent
    }

    pub(crate) fn set_suspend_state(&self, state: SuspendState) {
        self.shared.set_suspend_state(state);
    }

    /// Wait for the in-flight job to drain after a suspend was requested
    pub(crate) fn suspend_wait(&self, timeout: Duration) -> bool {
        self.shared.suspend_done.wait_timeout(timeout)
    }

    /// Put the core into the suspend state; blocks until the worker did
    pub(crate) fn suspend(&self, timeout: Duration) -> Result<()> {
        self.request(CoreMsg::Suspend, timeout)
    }

    /// Leave the suspend state; blocks until the worker did
    pub(crate) fn resume(&self, timeout: Duration) -> Result<()> {
        self.request(CoreMsg::Resume, timeout)
    }

    /// Wait for a pending resume to finish
    pub(crate) fn resume_wait(&self, timeout: Duration) -> Result<()> {
        if !self.is_suspending() {
            return Ok(());
        }
        if self.shared.resume_done.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(GspError::SuspendTimeout {
                core: self.id(),
                duration_ms: duration_ms(timeout),
            })
        }
    }

    fn request(&self, msg: fn(Arc<Completion>) -> CoreMsg, timeout: Duration) -> Result<()> {
        let ack = Arc::new(Completion::new());
        if !self.send(msg(Arc::clone(&ack))) {
            return Err(GspError::DeviceStopped);
        }
        if ack.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(GspError::SuspendTimeout {
                core: self.id(),
                duration_ms: duration_ms(timeout),
            })
        }
    }

    /// Snapshot for diagnostics
    pub fn stats(&self) -> CoreStats {
        let s = &self.shared;
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CoreStats {
            id: s.id,
            name: s.ops.name().to_string(),
            state: s.state(),
            suspend_state: s.suspend_state(),
            weight: self.weight(),
            total_kcfg: s.queue.capacity(),
            empty_kcfg: s.queue.empty_count(),
            filled_kcfg: s.queue.filled_count(),
            in_flight: s.current(),
            triggered: get(&s.counters.triggered),
            completed: get(&s.counters.completed),
            recovered: get(&s.counters.recovered),
            resets: get(&s.counters.resets),
            hangs: get(&s.counters.hangs),
            fences_created: s.timeline.created(),
            fences_signaled: s.timeline.signaled(),
        }
    }

    /// Stop the worker. In-flight and queued jobs are released and
    /// completed as interrupted. Idempotent.
    pub(crate) fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.send(CoreMsg::Stop);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("core {}: worker panicked", self.id());
            }
        }
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(target_os = "linux")]
fn set_realtime(core: usize) {
    // SAFETY: `param` is a plain C struct valid when zeroed, and
    // `pthread_self` always names the calling thread.
    let rc = unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO) - 1;
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
    };
    if rc == 0 {
        debug!("core {core}: worker running SCHED_FIFO");
    } else {
        warn!("core {core}: SCHED_FIFO refused (errno {rc}), keeping normal priority");
    }
}

#[cfg(not(target_os = "linux"))]
fn set_realtime(core: usize) {
    warn!("core {core}: real-time workers need Linux, keeping normal priority");
}
