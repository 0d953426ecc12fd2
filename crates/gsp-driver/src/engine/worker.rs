//! Per-core worker: the only code that changes a core's state
//!
//! The worker owns the job on the engine outright (`current`), together
//! with the hang watchdog deadline and the power flags. Nothing else ever
//! holds a reference to a pulled job.

use super::{CoreCounters, CoreMsg, CoreShared, CoreState, IrqStatus, SuspendState};
use crate::error::GspError;
use crate::kcfg::Kcfg;
use crossbeam_channel::{at, never, select, Receiver, Sender};
use gsp_chip::codes::ErrorCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

enum Event {
    Msg(CoreMsg),
    Expired,
    Closed,
}

pub(super) struct Worker {
    core: Arc<CoreShared>,
    rx: Receiver<CoreMsg>,
    tx: Sender<CoreMsg>,
    current: Option<Kcfg>,
    failure: Option<GspError>,
    watchdog: Option<Instant>,
    prepared: bool,
    enabled: bool,
    pm_held: bool,
}

impl Worker {
    pub(super) fn new(core: Arc<CoreShared>, rx: Receiver<CoreMsg>, tx: Sender<CoreMsg>) -> Self {
        Self {
            core,
            rx,
            tx,
            current: None,
            failure: None,
            watchdog: None,
            prepared: false,
            enabled: false,
            pm_held: false,
        }
    }

    pub(super) fn run(mut self) {
        loop {
            let timer = self.watchdog.map_or_else(never, at);
            let event = select! {
                recv(self.rx) -> msg => msg.map_or(Event::Closed, Event::Msg),
                recv(timer) -> _ => Event::Expired,
            };
            let keep_going = match event {
                Event::Msg(msg) => self.handle(msg),
                Event::Expired => self.on_watchdog(),
                Event::Closed => false,
            };
            if !keep_going {
                break;
            }
        }
        self.teardown();
    }

    fn id(&self) -> usize {
        self.core.id
    }

    fn schedule(&self, msg: CoreMsg) {
        // the worker holds a sender itself, so this only fails mid-teardown
        if self.tx.send(msg).is_err() {
            debug!("core {}: mailbox closed", self.id());
        }
    }

    fn handle(&mut self, msg: CoreMsg) -> bool {
        match msg {
            CoreMsg::Kick => self.kick(),
            CoreMsg::Trigger => self.trigger(),
            CoreMsg::Irq(status) => self.irq(status),
            CoreMsg::Recover => self.recover(),
            CoreMsg::Suspend(ack) => {
                self.suspend();
                ack.complete();
            }
            CoreMsg::Resume(ack) => {
                self.resume();
                ack.complete();
            }
            CoreMsg::Stop => return false,
        }
        true
    }

    /// The deadline passed. Anything already in the mailbox (typically the
    /// interrupt the watchdog raced with) is handled first; the timer is
    /// re-armed from `self.watchdog` on the next turn.
    fn on_watchdog(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(msg) => self.handle(msg),
            Err(_) => {
                self.hang();
                true
            }
        }
    }

    fn kick(&mut self) {
        let core = &self.core;
        if core.state() != CoreState::Idle
            || core.suspend_pending()
            || core.is_stopping()
            || !core.queue.is_filled()
        {
            return;
        }
        if !self.pm_held {
            core.env.pm.get();
            self.pm_held = true;
        }
        core.set_state(CoreState::Trigger);
        self.schedule(CoreMsg::Trigger);
    }

    fn trigger(&mut self) {
        match self.core.state() {
            CoreState::Trigger => {}
            CoreState::Suspend => {
                warn!("core {}: trigger while suspended", self.id());
                return;
            }
            other => {
                warn!("core {}: trigger in state {other}", self.id());
                return;
            }
        }
        if self.core.suspend_pending() || self.core.is_stopping() {
            self.go_idle();
            return;
        }
        let Some(job) = self.core.queue.pull() else {
            self.go_idle();
            return;
        };

        debug!("core {}: kcfg[{}] pulled", self.id(), job.tag());
        self.core.set_current(Some(job.tag()));
        self.core.set_state(CoreState::Busy);
        self.current = Some(job);

        if let Err((state, err)) = self.start_current() {
            self.fail(state, err);
        }
    }

    fn start_current(&mut self) -> Result<(), (CoreState, GspError)> {
        let id = self.id();
        self.power_up().map_err(|e| (CoreState::EnableErr, e))?;

        let core = Arc::clone(&self.core);
        let Some(job) = self.current.as_mut() else {
            return Ok(());
        };
        job.iommu_map(core.env.buffers.as_ref())
            .map_err(|e| (CoreState::MapErr, e))?;
        if job.is_async() {
            job.fences()
                .wait(core.env.timeouts.fence_wait, &core.stopping)
                .map_err(|e| (CoreState::WaitErr, e))?;
        }

        match core.ops.trigger(job) {
            ErrorCode::NoErr => {
                self.watchdog = Some(Instant::now() + core.env.timeouts.hang);
                CoreCounters::bump(&core.counters.triggered);
                debug!("core {id}: triggered");
                Ok(())
            }
            ErrorCode::HwBusy => Err((CoreState::HwHangErr, GspError::HardwareBusy { core: id })),
            ErrorCode::HwHang => Err((CoreState::HwHangErr, GspError::HardwareHang { core: id })),
            code => Err((
                CoreState::TriggerErr,
                GspError::HardwareTrigger { core: id, code },
            )),
        }
    }

    fn fail(&mut self, state: CoreState, err: GspError) {
        error!("core {}: {err}; entering {state}", self.id());
        self.core.set_state(state);
        self.failure = Some(err);
        self.schedule(CoreMsg::Recover);
    }

    fn irq(&mut self, status: IrqStatus) {
        match self.core.state() {
            CoreState::Busy => {
                self.core.set_state(match status {
                    IrqStatus::Done => CoreState::IrqHandled,
                    IrqStatus::Error => CoreState::IrqError,
                });
                self.release(status);
            }
            CoreState::Suspend if self.current.is_some() => self.release(status),
            other => warn!("core {}: spurious {status:?} interrupt in {other}", self.id()),
        }
    }

    fn release(&mut self, status: IrqStatus) {
        let core = Arc::clone(&self.core);
        let id = self.id();
        let suspended = core.state() == CoreState::Suspend;
        if status == IrqStatus::Error {
            core.ops.dump();
            core.env.interface.dump();
        }
        let Some(mut job) = self.current.take() else {
            warn!("core {id}: release with no job on the engine");
            return;
        };

        self.watchdog = None;
        let buffers = core.env.buffers.as_ref();
        job.iommu_unmap(buffers);
        job.put_dmabuf(buffers);
        job.finish(match status {
            IrqStatus::Done => Ok(()),
            IrqStatus::Error => Err(GspError::HardwareIrq { core: id }),
        });
        self.power_down();

        if let Err(e) = core.ops.release() {
            self.current = Some(job);
            self.fail(
                CoreState::ReleaseErr,
                GspError::HardwareRelease {
                    core: id,
                    reason: e.to_string(),
                },
            );
            return;
        }

        CoreCounters::bump(&core.counters.completed);
        debug!("core {id}: kcfg[{}] released", job.tag());
        core.queue.put(job);
        core.set_current(None);

        if suspended {
            core.suspend_done.complete();
            return;
        }
        self.next_or_idle();
    }

    fn next_or_idle(&mut self) {
        let core = &self.core;
        if core.suspend_pending() || core.is_stopping() || !core.queue.is_filled() {
            self.go_idle();
        } else {
            core.set_state(CoreState::Trigger);
            self.schedule(CoreMsg::Trigger);
        }
    }

    fn go_idle(&mut self) {
        let core = &self.core;
        core.set_current(None);
        core.set_state(CoreState::Idle);
        if self.pm_held {
            core.env.pm.put_autosuspend();
            self.pm_held = false;
        }
        // pairs with the suspend path, which publishes Wait before it
        // checks for idle
        if core.suspend_state() == SuspendState::Wait {
            core.suspend_done.complete();
        }
    }

    fn recover(&mut self) {
        let core = Arc::clone(&self.core);
        let id = self.id();
        let state = core.state();
        let Some(plan) = state.recovery_plan() else {
            warn!("core {id}: recovery requested in {state}");
            return;
        };
        let err = self
            .failure
            .take()
            .unwrap_or_else(|| GspError::invalid_state(state.name()));
        let buffers = core.env.buffers.as_ref();

        self.watchdog = None;
        match self.current.take() {
            Some(mut job) => {
                if plan.unmap {
                    job.iommu_unmap(buffers);
                }
                job.put_dmabuf(buffers);
                job.finish(Err(err));
                core.queue.put(job);
            }
            None => info!("core {id}: nothing in flight to recover"),
        }

        if plan.dump {
            core.ops.dump();
            core.env.interface.dump();
        }
        if plan.reset {
            if let Err(e) = core.ops.reset() {
                error!("core {id}: engine reset failed: {e}");
            }
            if let Err(e) = core.env.interface.reset() {
                error!("core {id}: interface reset failed: {e}");
            }
            CoreCounters::bump(&core.counters.resets);
        }
        self.power_down();
        CoreCounters::bump(&core.counters.recovered);

        let dropped = core.queue.invalidate_filled(|job| job.cancel(buffers));
        if dropped > 0 {
            warn!("core {id}: dropped {dropped} queued jobs after {state}");
        }
        info!("core {id}: recovered from {state}");
        self.go_idle();
    }

    fn hang(&mut self) {
        self.watchdog = None;
        let state = self.core.state();
        let busy = matches!(state, CoreState::Busy | CoreState::Suspend);
        if busy && self.current.is_some() {
            CoreCounters::bump(&self.core.counters.hangs);
            self.fail(
                CoreState::HwHangErr,
                GspError::HardwareHang { core: self.id() },
            );
        } else {
            warn!("core {}: stale watchdog in {state}", self.id());
        }
    }

    fn suspend(&mut self) {
        let core = Arc::clone(&self.core);
        core.set_state(CoreState::Suspend);
        core.suspend_done.reinit();
        core.resume_done.reinit();
        let buffers = core.env.buffers.as_ref();
        let dropped = core.queue.invalidate_filled(|job| job.cancel(buffers));
        if self.pm_held {
            core.env.pm.put_autosuspend();
            self.pm_held = false;
        }
        info!("core {}: suspended ({dropped} queued jobs dropped)", self.id());
    }

    fn resume(&mut self) {
        let core = Arc::clone(&self.core);
        core.ops.recalibrate();
        if core.state() == CoreState::Suspend {
            core.set_state(if self.current.is_some() {
                CoreState::Busy
            } else {
                CoreState::Idle
            });
        }
        core.set_suspend_state(SuspendState::Exit);
        core.resume_done.complete_all();
        info!("core {}: resumed", self.id());
        self.kick();
    }

    fn teardown(&mut self) {
        let core = Arc::clone(&self.core);
        let buffers = core.env.buffers.as_ref();
        self.watchdog = None;
        if let Some(mut job) = self.current.take() {
            job.iommu_unmap(buffers);
            job.put_dmabuf(buffers);
            job.finish(Err(GspError::interrupted("core teardown")));
            core.queue.put(job);
        }
        core.queue.invalidate_filled(|job| {
            job.release(buffers);
            job.finish(Err(GspError::interrupted("core teardown")));
        });
        self.power_down();
        if self.pm_held {
            core.env.pm.put_autosuspend();
            self.pm_held = false;
        }
        core.set_current(None);
        core.set_state(CoreState::Idle);
        info!("core {}: worker exit", self.id());
    }

    fn power_up(&mut self) -> crate::Result<()> {
        if !self.prepared {
            self.core.env.interface.prepare()?;
            self.prepared = true;
        }
        if !self.enabled {
            self.core.ops.enable()?;
            self.enabled = true;
        }
        Ok(())
    }

    fn power_down(&mut self) {
        if self.enabled {
            self.core.ops.disable();
            self.enabled = false;
        }
        if self.prepared {
            self.core.env.interface.unprepare();
            self.prepared = false;
        }
    }
}
