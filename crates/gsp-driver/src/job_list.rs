//! The jobs of one client submission
//!
//! A [`JobList`] walks a batch through acquire, fill, push and (for
//! synchronous batches) wait. Until a job is pushed the list owns it; after
//! that the core's queue does, and the list keeps only the completion
//! handle needed to wait for or cancel it.

use crate::completion::JobCompletion;
use crate::device::Device;
use crate::error::{GspError, Result};
use crate::kcfg::Kcfg;
use crate::workqueue::PushError;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug)]
struct PushedJob {
    core: usize,
    completion: Arc<JobCompletion>,
}

/// Batch of jobs for one submission
#[derive(Debug)]
pub struct JobList<'d> {
    device: &'d Device,
    acquired: Vec<(usize, Kcfg)>,
    pushed: Vec<PushedJob>,
    published_fd: Option<i32>,
}

impl<'d> JobList<'d> {
    /// Empty batch on `device`
    pub fn new(device: &'d Device) -> Self {
        Self {
            device,
            acquired: Vec::new(),
            pushed: Vec::new(),
            published_fd: None,
        }
    }

    /// Jobs held and not yet pushed
    pub fn acquired(&self) -> usize {
        self.acquired.len()
    }

    /// Jobs handed to core queues
    pub fn pushed(&self) -> usize {
        self.pushed.len()
    }

    /// Signal-fence fd published for the batch
    pub const fn published_fd(&self) -> Option<i32> {
        self.published_fd
    }

    /// Take `num` jobs, each from the core [`Device`] selects for it
    ///
    /// # Errors
    ///
    /// [`GspError::Config`] if `num` is outside `1..=io_cnt`, or
    /// [`GspError::QueueFull`] if a selected core has no free slot even
    /// after the release wait. Jobs acquired before the failure stay in the
    /// list.
    pub fn acquire(&mut self, num: usize) -> Result<()> {
        let io_cnt = self.device.config().io_cnt;
        if num == 0 || num > io_cnt {
            return Err(GspError::config(format!("job count {num} outside 1..={io_cnt}")));
        }
        for _ in 0..num {
            let index = self.device.select_core()?;
            let core = &self.device.cores()[index];
            let job = core.acquire().ok_or(GspError::QueueFull { core: core.id() })?;
            debug!("core {}: kcfg[{}] acquired", core.id(), job.tag());
            self.acquired.push((index, job));
        }
        Ok(())
    }

    /// Fill every acquired job from `user_arg`, which holds one `size`-byte
    /// record per job. The records are snapshotted first; for an async
    /// batch the last job's signal-fence fd is written back into its record.
    ///
    /// # Errors
    ///
    /// Returns the first fill failure, after releasing every acquired job.
    /// [`GspError::FencePublish`] if the backend has no slot in the record
    /// for the published fd.
    pub fn fill(&mut self, user_arg: &mut [u8], is_async: bool, split: bool, size: usize) -> Result<()> {
        let num = self.acquired.len();
        let need = num * size;
        if user_arg.len() < need {
            return Err(GspError::config(format!(
                "argument holds {} bytes, {num} records need {need}",
                user_arg.len()
            )));
        }
        let snapshot = Bytes::copy_from_slice(&user_arg[..need]);
        let device = self.device;

        for index in 0..num {
            let (core_index, job) = &mut self.acquired[index];
            let core = &device.cores()[*core_index];
            let record = snapshot.slice(index * size..(index + 1) * size);
            let last = index + 1 == num;
            let published = core
                .fill(job, record, index, is_async, last, split)
                .and_then(|fd| match fd {
                    Some(fd) => match core.intercept(index, size) {
                        Some(at) if at + 4 <= user_arg.len() => {
                            user_arg[at..at + 4].copy_from_slice(&fd.to_le_bytes());
                            Ok(Some(fd))
                        }
                        _ => {
                            warn!("core {}: no slot to publish fence fd {fd}", core.id());
                            Err(GspError::FencePublish { fd })
                        }
                    },
                    None => Ok(None),
                });
            match published {
                Ok(Some(fd)) => self.published_fd = Some(fd),
                Ok(None) => {}
                Err(e) => {
                    self.release();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Queue every acquired job on its core, in batch order
    ///
    /// # Errors
    ///
    /// [`GspError::QueueFull`] if a core's queue is at capacity. The job that
    /// failed and everything after it stay acquired.
    pub fn push(&mut self) -> Result<()> {
        let mut pending = std::mem::take(&mut self.acquired).into_iter();
        while let Some((index, job)) = pending.next() {
            let core = &self.device.cores()[index];
            let completion = job.completion();
            match core.push(job) {
                Ok(()) => self.pushed.push(PushedJob {
                    core: index,
                    completion,
                }),
                Err(PushError(job)) => {
                    self.acquired.push((index, job));
                    self.acquired.extend(pending);
                    return Err(GspError::QueueFull { core: core.id() });
                }
            }
        }
        Ok(())
    }

    /// Wait for every pushed job, each bounded by `timeout`
    ///
    /// # Errors
    ///
    /// The first job's own error, or [`GspError::WaitTimeout`].
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        for job in &self.pushed {
            job.completion.wait_timeout(timeout)?;
        }
        Ok(())
    }

    /// Drop buffer references and fence state of the acquired jobs
    pub fn release(&mut self) {
        for (index, job) in &mut self.acquired {
            self.device.cores()[*index].release(job);
        }
    }

    /// Return acquired jobs to their pools, and take back pushed jobs the
    /// workers have not pulled yet. Pulled jobs are left to their worker.
    pub fn put(&mut self) {
        for (index, job) in self.acquired.drain(..) {
            self.device.cores()[index].put(job);
        }
        for pushed in self.pushed.drain(..) {
            let core = &self.device.cores()[pushed.core];
            if let Some(mut job) = core.cancel(&pushed.completion) {
                core.discard(&mut job);
                core.put(job);
            }
        }
    }

    /// Undo the whole batch: [`JobList::release`] then [`JobList::put`]
    pub fn cancel(&mut self) {
        self.release();
        self.put();
    }
}

impl Drop for JobList<'_> {
    fn drop(&mut self) {
        if !self.acquired.is_empty() {
            self.release();
            for (index, job) in self.acquired.drain(..) {
                self.device.cores()[index].put(job);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendParts, CoreOps};
    use crate::backends::{SoftwareBufferPool, SoftwareCore, SoftwareInterface};
    use crate::config::{DeviceConfig, Timeouts};
    use gsp_chip::compat::ChipRevision;
    use gsp_chip::layer::LayerType;
    use gsp_chip::uapi::{encode_batch, published_sig_fd, CfgUser, LayerUser, CFG_USER_SIZE};

    fn device(slots: usize) -> (Device, Arc<SoftwareBufferPool>) {
        let buffers = Arc::new(SoftwareBufferPool::new());
        let config = DeviceConfig::for_compatible("sprd,gsp-r6p0-sharkl3")
            .unwrap()
            .with_cores(1, slots)
            .with_timeouts(Timeouts::simulated());
        let parts = BackendParts {
            cores: vec![Arc::new(SoftwareCore::new(ChipRevision::R6p0).0) as Arc<dyn CoreOps>],
            interface: Arc::new(SoftwareInterface::new("sharkl3")),
            buffers: buffers.clone(),
        };
        (Device::new(config, parts).unwrap(), buffers)
    }

    fn batch(buffers: &SoftwareBufferPool, n: u32) -> Vec<u8> {
        let cfgs: Vec<_> = (0..n)
            .map(|id| {
                let mut cfg = CfgUser::new(id);
                cfg.des = LayerUser::with_buffer(LayerType::Des, buffers.register(4096));
                cfg
            })
            .collect();
        encode_batch(&cfgs)
    }

    #[test]
    fn acquire_beyond_pool_is_queue_full() {
        let (dev, _) = device(2);
        let mut list = JobList::new(&dev);
        list.acquire(2).unwrap();
        let mut more = JobList::new(&dev);
        assert_eq!(more.acquire(1), Err(GspError::QueueFull { core: 0 }));
        drop(list);
        assert!(more.acquire(1).is_ok());
    }

    #[test]
    fn only_last_async_job_publishes() {
        let (dev, buffers) = device(4);
        let mut arg = batch(&buffers, 3);
        let mut list = JobList::new(&dev);
        list.acquire(3).unwrap();
        list.fill(&mut arg, true, false, CFG_USER_SIZE).unwrap();
        let fd = list.published_fd().unwrap();
        assert_eq!(published_sig_fd(&arg, 2), Some(fd));
        assert_ne!(published_sig_fd(&arg, 0), Some(fd));
        assert_ne!(published_sig_fd(&arg, 1), Some(fd));

        list.cancel();
        let fence = dev.fences().get(fd).unwrap();
        assert!(fence.is_signaled() && fence.has_error());
        assert_eq!(buffers.outstanding_refs(), 0);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (dev, buffers) = device(2);
        let mut arg = batch(&buffers, 2);
        let mut list = JobList::new(&dev);
        list.acquire(2).unwrap();
        list.fill(&mut arg, false, false, CFG_USER_SIZE).unwrap();
        list.cancel();
        list.cancel();
        assert_eq!(buffers.underflows(), 0);
        assert_eq!(buffers.outstanding_refs(), 0);
        assert!(dev.stats().is_drained());
    }

    #[test]
    fn bad_record_rolls_back_whole_batch() {
        let (dev, buffers) = device(2);
        let mut arg = batch(&buffers, 2);
        arg[CFG_USER_SIZE..].fill(0);
        let mut list = JobList::new(&dev);
        list.acquire(2).unwrap();
        assert!(list.fill(&mut arg, false, false, CFG_USER_SIZE).is_err());
        list.put();
        assert_eq!(buffers.outstanding_refs(), 0);
        assert!(dev.stats().is_drained());
    }
}
