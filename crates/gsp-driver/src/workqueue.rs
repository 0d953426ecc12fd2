//! Per-core job pool: an "empty" free list and a "filled" FIFO
//!
//! Each list has its own lock. A job moves between them by value, so it can
//! never sit on both; no critical section takes both locks.

use crate::completion::JobCompletion;
use crate::kcfg::Kcfg;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Returned by [`Workqueue::push`] when the filled queue is at capacity.
/// Carries the job back to the caller untouched.
#[derive(Debug)]
pub struct PushError(pub Kcfg);

impl PushError {
    /// The rejected job
    pub fn into_inner(self) -> Kcfg {
        self.0
    }
}

/// Bounded job pool of one core
#[derive(Debug)]
pub struct Workqueue {
    capacity: usize,
    empty: Mutex<VecDeque<Kcfg>>,
    filled: Mutex<VecDeque<Kcfg>>,
    slot_freed: Condvar,
}

impl Workqueue {
    /// Pool of `capacity` slots for `core`, all free
    pub fn new(core: usize, capacity: usize) -> Self {
        Self {
            capacity,
            empty: Mutex::new((0..capacity).map(|tag| Kcfg::new(tag, core)).collect()),
            filled: Mutex::new(VecDeque::with_capacity(capacity)),
            slot_freed: Condvar::new(),
        }
    }

    /// Total slots
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a free slot, reinitialized
    pub fn acquire(&self) -> Option<Kcfg> {
        let mut job = self.empty.lock().pop_front()?;
        job.reinit();
        Some(job)
    }

    /// Return a slot to the free list
    pub fn put(&self, mut job: Kcfg) {
        job.clear_queue_flags();
        self.empty.lock().push_back(job);
        self.slot_freed.notify_all();
    }

    /// Queue a filled job. Fails without side effects at capacity.
    ///
    /// # Errors
    ///
    /// Returns the job inside [`PushError`] when the queue is full.
    pub fn push(&self, job: Kcfg) -> Result<(), PushError> {
        let mut filled = self.filled.lock();
        if filled.len() >= self.capacity {
            return Err(PushError(job));
        }
        filled.push_back(job);
        Ok(())
    }

    /// Oldest queued job, marked pulled
    pub fn pull(&self) -> Option<Kcfg> {
        let mut job = self.filled.lock().pop_front()?;
        job.mark_pulled();
        Some(job)
    }

    /// Remove a queued job that the worker has not pulled yet. The job is
    /// found by its completion handle, which is unique per acquisition; a
    /// tag alone may already belong to a later submitter.
    pub fn cancel(&self, completion: &Arc<JobCompletion>) -> Option<Kcfg> {
        let mut filled = self.filled.lock();
        let pos = filled.iter().position(|j| j.owns(completion))?;
        filled.remove(pos)
    }

    /// Jobs are queued
    pub fn is_filled(&self) -> bool {
        !self.filled.lock().is_empty()
    }

    /// No free slot
    pub fn is_exhausted(&self) -> bool {
        self.empty.lock().is_empty()
    }

    /// Free slots
    pub fn empty_count(&self) -> usize {
        self.empty.lock().len()
    }

    /// Queued jobs
    pub fn filled_count(&self) -> usize {
        self.filled.lock().len()
    }

    /// Block until a slot is free or `timeout` passes; `true` if one is
    pub fn wait_for_slot(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut empty = self.empty.lock();
        while empty.is_empty() {
            if self.slot_freed.wait_until(&mut empty, deadline).timed_out() {
                break;
            }
        }
        !empty.is_empty()
    }

    /// Drain every queued job, hand each to `release`, then free its slot.
    /// Returns the number drained.
    pub fn invalidate_filled(&self, mut release: impl FnMut(&mut Kcfg)) -> usize {
        let drained: Vec<Kcfg> = self.filled.lock().drain(..).collect();
        let n = drained.len();
        for mut job in drained {
            release(&mut job);
            self.put(job);
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(wq: &Workqueue) -> Kcfg {
        let mut job = wq.acquire().unwrap();
        job.mark_filled();
        job
    }

    #[test]
    fn push_past_capacity_fails_then_succeeds_after_release() {
        let wq = Workqueue::new(0, 2);
        let a = filled(&wq);
        let b = filled(&wq);
        let (ta, tb) = (a.tag(), b.tag());
        assert!(wq.is_exhausted());
        wq.push(a).unwrap();
        wq.push(b).unwrap();

        // a third job cannot exist in a pool of two; borrow one from another pool
        let other = Workqueue::new(1, 1);
        let mut stray = other.acquire().unwrap();
        stray.mark_filled();
        let stray_done = stray.completion();
        let back = wq.push(stray).unwrap_err().into_inner();
        assert!(back.owns(&stray_done));
        assert_eq!(wq.filled_count(), 2);
        assert_eq!(wq.empty_count(), 0);

        let run = wq.pull().unwrap();
        assert_eq!(run.tag(), ta);
        wq.put(run);
        assert_eq!(wq.empty_count(), 1);

        wq.push(back).unwrap();
        assert_eq!(wq.filled_count(), 2);
        assert_eq!(wq.pull().map(|j| j.tag()), Some(tb));
        let retried = wq.pull().unwrap();
        assert!(retried.owns(&stray_done));
        other.put(retried);
    }

    #[test]
    fn pull_is_fifo_and_marks_pulled() {
        let wq = Workqueue::new(0, 3);
        let tags: Vec<_> = (0..3)
            .map(|_| {
                let j = filled(&wq);
                let t = j.tag();
                wq.push(j).unwrap();
                t
            })
            .collect();
        for t in tags {
            let j = wq.pull().unwrap();
            assert_eq!(j.tag(), t);
            assert!(j.is_pulled());
            wq.put(j);
        }
        assert!(wq.pull().is_none());
        assert_eq!(wq.empty_count(), 3);
    }

    #[test]
    fn acquire_put_round_trip_is_pristine() {
        let wq = Workqueue::new(0, 1);
        let j = wq.acquire().unwrap();
        assert!(j.is_pristine());
        wq.put(j);
        let again = wq.acquire().unwrap();
        assert!(again.is_pristine());
        assert_eq!(again.tag(), 0);
    }

    #[test]
    fn cancel_only_finds_queued_jobs() {
        let wq = Workqueue::new(0, 2);
        let a = filled(&wq);
        let b = filled(&wq);
        let (da, db) = (a.completion(), b.completion());
        wq.push(a).unwrap();
        wq.push(b).unwrap();
        let pulled = wq.pull().unwrap();
        assert!(pulled.owns(&da));
        assert!(wq.cancel(&da).is_none());
        assert!(wq.cancel(&db).is_some_and(|j| j.owns(&db)));
        assert!(!wq.is_filled());
    }

    #[test]
    fn cancel_ignores_later_acquisition_of_same_slot() {
        let wq = Workqueue::new(0, 1);
        let first = filled(&wq);
        let stale = first.completion();
        wq.push(first).unwrap();
        let done = wq.pull().unwrap();
        wq.put(done);

        let second = filled(&wq);
        assert_eq!(second.tag(), 0);
        wq.push(second).unwrap();

        assert!(wq.cancel(&stale).is_none());
        assert_eq!(wq.filled_count(), 1);
    }

    #[test]
    fn invalidate_drains_into_free_list() {
        let wq = Workqueue::new(0, 2);
        let a = filled(&wq);
        wq.push(a).unwrap();
        let mut seen = 0;
        assert_eq!(wq.invalidate_filled(|_| seen += 1), 1);
        assert_eq!(seen, 1);
        assert_eq!(wq.empty_count(), 2);
    }

    #[test]
    fn slot_wait_wakes_on_put() {
        let wq = std::sync::Arc::new(Workqueue::new(0, 1));
        let j = wq.acquire().unwrap();
        assert!(!wq.wait_for_slot(Duration::from_millis(5)));
        let wq2 = std::sync::Arc::clone(&wq);
        let h = std::thread::spawn(move || wq2.wait_for_slot(Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(10));
        wq.put(j);
        assert!(h.join().unwrap());
    }
}
