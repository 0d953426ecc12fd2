//! Fences, per-core timelines and the fence descriptor table
//!
//! Asynchronous submissions never block the caller. Instead:
//!
//! - each layer may name an *acquire* fence (by fd) that must signal before
//!   the engine touches its buffer;
//! - the batch's last job gets one *signal* fence on its core's timeline,
//!   installed in the [`FenceTable`] and published to the caller by fd.
//!
//! A signal fence is signaled exactly once: by the release path on success,
//! or by [`FenceSet::free`] on every failure and cancellation path.

use crate::error::{GspError, Result};
use crate::completion::duration_ms;
use gsp_chip::timing::WAIT_FENCE_MAX;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Slice used when waiting so that teardown can interrupt a fence wait
const WAIT_SLICE: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct TimelineCounters {
    signaled: AtomicU64,
    redundant: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    #[default]
    Pending,
    Signaled {
        error: bool,
    },
}

#[derive(Debug, Default)]
struct FenceInner {
    context: u64,
    seqno: u64,
    state: Mutex<FenceState>,
    cond: Condvar,
    counters: Option<Arc<TimelineCounters>>,
}

/// One-shot synchronization point
#[derive(Debug, Clone, Default)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    /// Free-standing fence, as produced by another driver or client
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline context (0 for free-standing fences)
    pub fn context(&self) -> u64 {
        self.inner.context
    }

    /// Position on its timeline
    pub fn seqno(&self) -> u64 {
        self.inner.seqno
    }

    /// Signal successfully. Returns `false` if already signaled.
    pub fn signal(&self) -> bool {
        self.transition(false)
    }

    /// Signal with an error status. Returns `false` if already signaled.
    pub fn signal_with_error(&self) -> bool {
        self.transition(true)
    }

    fn transition(&self, error: bool) -> bool {
        let mut state = self.inner.state.lock();
        if *state != FenceState::Pending {
            if let Some(c) = &self.inner.counters {
                c.redundant.fetch_add(1, Ordering::Relaxed);
            }
            warn!(
                "fence {}:{} signaled twice",
                self.inner.context, self.inner.seqno
            );
            return false;
        }
        *state = FenceState::Signaled { error };
        if let Some(c) = &self.inner.counters {
            c.signaled.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.cond.notify_all();
        true
    }

    /// Whether the fence has signaled
    pub fn is_signaled(&self) -> bool {
        *self.inner.state.lock() != FenceState::Pending
    }

    /// Whether the fence signaled with an error status
    pub fn has_error(&self) -> bool {
        *self.inner.state.lock() == FenceState::Signaled { error: true }
    }

    /// Block up to `timeout`; `true` once signaled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while *state == FenceState::Pending {
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state != FenceState::Pending
    }
}

/// Monotonic fence sequence owned by one core
#[derive(Debug)]
pub struct Timeline {
    name: String,
    context: u64,
    seqno: AtomicU64,
    counters: Arc<TimelineCounters>,
}

impl Timeline {
    /// New timeline with a fresh context
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed),
            seqno: AtomicU64::new(0),
            counters: Arc::default(),
        }
    }

    /// Timeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context shared by all fences of this timeline
    pub const fn context(&self) -> u64 {
        self.context
    }

    /// Next fence on the timeline
    pub fn create_fence(&self) -> Fence {
        let seqno = self.seqno.fetch_add(1, Ordering::Relaxed) + 1;
        Fence {
            inner: Arc::new(FenceInner {
                context: self.context,
                seqno,
                counters: Some(Arc::clone(&self.counters)),
                ..FenceInner::default()
            }),
        }
    }

    /// Fences created so far
    pub fn created(&self) -> u64 {
        self.seqno.load(Ordering::Relaxed)
    }

    /// Fences signaled so far
    pub fn signaled(&self) -> u64 {
        self.counters.signaled.load(Ordering::Relaxed)
    }

    /// Signal attempts on already-signaled fences
    pub fn redundant_signals(&self) -> u64 {
        self.counters.redundant.load(Ordering::Relaxed)
    }
}

/// Descriptor table mapping fds to fences
#[derive(Debug)]
pub struct FenceTable {
    next_fd: AtomicI32,
    fds: Mutex<HashMap<i32, Fence>>,
}

/// First fd handed out by a [`FenceTable`]
pub const FIRST_FENCE_FD: i32 = 512;

impl Default for FenceTable {
    fn default() -> Self {
        Self {
            next_fd: AtomicI32::new(FIRST_FENCE_FD),
            fds: Mutex::default(),
        }
    }
}

impl FenceTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `fence` and return its fd
    pub fn install(&self, fence: Fence) -> i32 {
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.fds.lock().insert(fd, fence);
        fd
    }

    /// Fence behind `fd`
    ///
    /// # Errors
    ///
    /// Returns [`GspError::FenceNotFound`] for unknown fds.
    pub fn get(&self, fd: i32) -> Result<Fence> {
        self.fds
            .lock()
            .get(&fd)
            .cloned()
            .ok_or(GspError::FenceNotFound { fd })
    }

    /// Close `fd`; `false` if it was not open
    pub fn close(&self, fd: i32) -> bool {
        self.fds.lock().remove(&fd).is_some()
    }

    /// Open fds
    pub fn len(&self) -> usize {
        self.fds.lock().len()
    }

    /// No fds open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fence state of one job
#[derive(Debug, Default)]
pub struct FenceSet {
    wait: Vec<Fence>,
    sig: Option<Fence>,
    published_fd: Option<i32>,
}

impl FenceSet {
    /// Collect the acquire fence behind `wait_fd`. Negative fds mean none.
    ///
    /// # Errors
    ///
    /// [`GspError::FenceOverflow`] past [`WAIT_FENCE_MAX`], or
    /// [`GspError::FenceNotFound`] for unknown fds.
    pub fn collect(&mut self, table: &FenceTable, wait_fd: i32) -> Result<()> {
        if wait_fd < 0 {
            return Ok(());
        }
        if self.wait.len() >= WAIT_FENCE_MAX {
            return Err(GspError::FenceOverflow {
                max: WAIT_FENCE_MAX,
            });
        }
        let fence = table.get(wait_fd)?;
        debug!(
            "collected wait fence {}:{} from fd {wait_fd}",
            fence.context(),
            fence.seqno()
        );
        self.wait.push(fence);
        Ok(())
    }

    /// Create the signal fence on `timeline` and publish it in `table`.
    /// Returns the published fd; repeated calls return the same fd.
    pub fn create_signal(&mut self, timeline: &Timeline, table: &FenceTable) -> i32 {
        if let Some(fd) = self.published_fd {
            return fd;
        }
        let fence = timeline.create_fence();
        let fd = table.install(fence.clone());
        debug!(
            "{}: signal fence {} published as fd {fd}",
            timeline.name(),
            fence.seqno()
        );
        self.sig = Some(fence);
        self.published_fd = Some(fd);
        fd
    }

    /// Acquire fences held
    pub fn wait_count(&self) -> usize {
        self.wait.len()
    }

    /// Signal fence, if created
    pub fn signal_fence(&self) -> Option<&Fence> {
        self.sig.as_ref()
    }

    /// Fd published for the signal fence
    pub const fn published_fd(&self) -> Option<i32> {
        self.published_fd
    }

    /// Wait for every acquire fence, each bounded by `per_fence`.
    /// `abort` is polled so that teardown can interrupt the wait.
    ///
    /// # Errors
    ///
    /// [`GspError::FenceTimeout`] or [`GspError::FenceInterrupted`].
    pub fn wait(&self, per_fence: Duration, abort: &AtomicBool) -> Result<()> {
        for fence in &self.wait {
            let deadline = Instant::now() + per_fence;
            loop {
                if abort.load(Ordering::Acquire) {
                    return Err(GspError::FenceInterrupted);
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(GspError::FenceTimeout {
                        duration_ms: duration_ms(per_fence),
                    });
                }
                if fence.wait_timeout(WAIT_SLICE.min(deadline - now)) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Signal the signal fence after a successful run. Returns `true` if a
    /// fence was signaled by this call.
    pub fn signal(&mut self) -> bool {
        self.sig.take().is_some_and(|f| f.signal())
    }

    /// Drop the acquire fences and signal the signal fence (with an error
    /// status) if one is still pending. Safe to call repeatedly.
    pub fn free(&mut self) {
        self.wait.clear();
        if let Some(fence) = self.sig.take() {
            fence.signal_with_error();
        }
    }

    /// Nothing held
    pub fn is_empty(&self) -> bool {
        self.wait.is_empty() && self.sig.is_none()
    }
}
