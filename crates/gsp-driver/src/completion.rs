//! Blocking completion handles with bounded waits

use crate::error::{GspError, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

const DONE_ALL: usize = usize::MAX / 2;

/// Counting completion: each `complete` releases one waiter, `complete_all`
/// releases every waiter until `reinit`.
#[derive(Debug, Default)]
pub struct Completion {
    done: Mutex<usize>,
    cond: Condvar,
}

impl Completion {
    /// Not yet completed
    pub fn new() -> Self {
        Self::default()
    }

    /// Release one waiter (now or in the future)
    pub fn complete(&self) {
        let mut done = self.done.lock();
        if *done < DONE_ALL {
            *done += 1;
        }
        self.cond.notify_one();
    }

    /// Release every waiter until the next `reinit`
    pub fn complete_all(&self) {
        *self.done.lock() = DONE_ALL;
        self.cond.notify_all();
    }

    /// Forget pending completions
    pub fn reinit(&self) {
        *self.done.lock() = 0;
    }

    /// Whether a wait would return immediately
    pub fn is_done(&self) -> bool {
        *self.done.lock() > 0
    }

    /// Wait up to `timeout`; `true` if completed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while *done == 0 {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        if *done == 0 {
            return false;
        }
        if *done < DONE_ALL {
            *done -= 1;
        }
        true
    }
}

/// One-shot outcome of a job, observed by a synchronous submitter
#[derive(Debug, Default)]
pub struct JobCompletion {
    outcome: Mutex<Option<Result<()>>>,
    cond: Condvar,
}

impl JobCompletion {
    /// No outcome yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome. The first outcome wins; returns `false` if one
    /// was already recorded.
    pub fn complete(&self, outcome: Result<()>) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.cond.notify_all();
        true
    }

    /// Whether an outcome is recorded
    pub fn is_complete(&self) -> bool {
        self.outcome.lock().is_some()
    }

    /// Outcome if already recorded
    pub fn outcome(&self) -> Option<Result<()>> {
        self.outcome.lock().clone()
    }

    /// Wait up to `timeout` for the outcome
    ///
    /// # Errors
    ///
    /// Returns the job's own error, or [`GspError::WaitTimeout`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                return match slot.as_ref() {
                    Some(outcome) => outcome.clone(),
                    None => Err(GspError::WaitTimeout {
                        duration_ms: duration_ms(timeout),
                    }),
                };
            }
        }
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counting_completion() {
        let c = Completion::new();
        assert!(!c.wait_timeout(Duration::from_millis(5)));
        c.complete();
        c.complete();
        assert!(c.wait_timeout(Duration::ZERO));
        assert!(c.wait_timeout(Duration::ZERO));
        assert!(!c.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn complete_all_sticks_until_reinit() {
        let c = Completion::new();
        c.complete_all();
        for _ in 0..3 {
            assert!(c.wait_timeout(Duration::ZERO));
        }
        c.reinit();
        assert!(!c.is_done());
    }

    #[test]
    fn waiter_wakes_from_other_thread() {
        let c = Arc::new(Completion::new());
        let c2 = Arc::clone(&c);
        let h = thread::spawn(move || c2.wait_timeout(Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(10));
        c.complete();
        assert!(h.join().unwrap());
    }

    #[test]
    fn job_outcome_first_wins() {
        let j = JobCompletion::new();
        assert!(j.complete(Ok(())));
        assert!(!j.complete(Err(GspError::FenceInterrupted)));
        assert_eq!(j.wait_timeout(Duration::ZERO), Ok(()));
    }

    #[test]
    fn job_wait_times_out() {
        let j = JobCompletion::new();
        assert_eq!(
            j.wait_timeout(Duration::from_millis(5)),
            Err(GspError::WaitTimeout { duration_ms: 5 })
        );
    }
}
