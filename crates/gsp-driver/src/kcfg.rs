//! Job descriptors ("kcfg")
//!
//! A [`Kcfg`] is one hardware-job slot. Slots are created once per core and
//! then move by value between that core's free list, its filled queue, a
//! submitter's [`crate::JobList`] and the core worker. Whoever holds the
//! value owns the job; there is never a second reference to it.

use crate::buffer::BufferProvider;
use crate::completion::JobCompletion;
use crate::error::{GspError, Result};
use crate::layer::Layer;
use crate::sync::FenceSet;
use bytes::Bytes;
use gsp_chip::layer::LayerType;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// One hardware-job slot
#[derive(Debug)]
pub struct Kcfg {
    tag: usize,
    core: usize,
    payload: Bytes,
    layers: Vec<Layer>,
    need_iommu: bool,
    is_async: bool,
    last: bool,
    split: bool,
    pulled: bool,
    filled: bool,
    created: Instant,
    fences: FenceSet,
    completion: Arc<JobCompletion>,
}

impl Kcfg {
    pub(crate) fn new(tag: usize, core: usize) -> Self {
        Self {
            tag,
            core,
            payload: Bytes::new(),
            layers: Vec::new(),
            need_iommu: false,
            is_async: false,
            last: false,
            split: false,
            pulled: false,
            filled: false,
            created: Instant::now(),
            fences: FenceSet::default(),
            completion: Arc::new(JobCompletion::new()),
        }
    }

    /// Back to the pristine state, as when the pool was created
    pub(crate) fn reinit(&mut self) {
        *self = Self::new(self.tag, self.core);
    }

    /// Index within the owning core's pool
    pub const fn tag(&self) -> usize {
        self.tag
    }

    /// Owning core
    pub const fn core(&self) -> usize {
        self.core
    }

    /// Backend payload copied from the client
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Store the backend payload
    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }

    /// Layers decoded from the payload
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Attach a decoded layer
    pub fn push_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    /// Some layer is mapped through the IOMMU
    pub const fn need_iommu(&self) -> bool {
        self.need_iommu
    }

    /// Completes through fences
    pub const fn is_async(&self) -> bool {
        self.is_async
    }

    /// Last job of its batch
    pub const fn is_last(&self) -> bool {
        self.last
    }

    /// Part of a split submission
    pub const fn is_split(&self) -> bool {
        self.split
    }

    /// Claimed by the worker
    pub const fn is_pulled(&self) -> bool {
        self.pulled
    }

    /// Filled and ready to push
    pub const fn is_filled(&self) -> bool {
        self.filled
    }

    /// Time since the slot was last acquired
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Fence state
    pub const fn fences(&self) -> &FenceSet {
        &self.fences
    }

    /// Handle a synchronous submitter waits on
    pub fn completion(&self) -> Arc<JobCompletion> {
        Arc::clone(&self.completion)
    }

    /// `completion` was handed out by this acquisition of the slot
    pub fn owns(&self, completion: &Arc<JobCompletion>) -> bool {
        Arc::ptr_eq(&self.completion, completion)
    }

    /// Destination layer, if the payload has one
    pub fn des_layer(&self) -> Option<&Layer> {
        self.layers.iter().find(|l| l.kind() == LayerType::Des)
    }

    /// Nothing bound, mapped, filled or fenced
    pub fn is_pristine(&self) -> bool {
        self.payload.is_empty()
            && self.layers.is_empty()
            && self.fences.is_empty()
            && !self.pulled
            && !self.filled
            && !self.is_async
            && !self.last
            && !self.completion.is_complete()
    }

    pub(crate) fn set_flags(&mut self, is_async: bool, last: bool, split: bool) {
        self.is_async = is_async;
        self.last = last;
        self.split = split;
    }

    pub(crate) fn set_need_iommu(&mut self, core_needs_iommu: bool) {
        self.need_iommu = core_needs_iommu && self.layers.iter().any(Layer::need_iommu);
    }

    pub(crate) fn mark_filled(&mut self) {
        self.filled = true;
    }

    pub(crate) fn mark_pulled(&mut self) {
        self.pulled = true;
    }

    pub(crate) fn clear_queue_flags(&mut self) {
        self.pulled = false;
        self.filled = false;
    }

    pub(crate) fn fences_mut(&mut self) -> &mut FenceSet {
        &mut self.fences
    }

    /// Reference every layer buffer, rolling back on the first failure
    pub(crate) fn get_dmabuf(&mut self, provider: &dyn BufferProvider) -> Result<()> {
        for i in 0..self.layers.len() {
            if let Err(e) = self.layers[i].get_dmabuf(provider) {
                self.put_dmabuf(provider);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drop every layer buffer reference. Idempotent.
    pub(crate) fn put_dmabuf(&mut self, provider: &dyn BufferProvider) {
        for layer in &mut self.layers {
            layer.put_dmabuf(provider);
        }
    }

    /// Map every layer for `core`, unmapping again on the first failure
    pub(crate) fn iommu_map(&mut self, provider: &dyn BufferProvider) -> Result<()> {
        if !self.need_iommu {
            return Ok(());
        }
        for i in 0..self.layers.len() {
            if let Err(e) = self.layers[i].iommu_map(provider, self.core) {
                self.iommu_unmap(provider);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unmap every layer. Idempotent.
    pub(crate) fn iommu_unmap(&mut self, provider: &dyn BufferProvider) {
        for layer in &mut self.layers {
            layer.iommu_unmap(provider, self.core);
        }
    }

    /// Layers currently mapped
    pub fn mapped_layers(&self) -> usize {
        self.layers.iter().filter(|l| l.iova().is_some()).count()
    }

    /// Drop buffer references and fence state (release). Idempotent.
    pub(crate) fn release(&mut self, provider: &dyn BufferProvider) {
        self.iommu_unmap(provider);
        self.put_dmabuf(provider);
        if self.is_async {
            self.fences.free();
        }
    }

    /// Report the outcome of a run: signal or free the fence (async), and
    /// record the outcome for a synchronous waiter.
    pub(crate) fn finish(&mut self, outcome: Result<()>) {
        if self.is_async {
            if outcome.is_ok() {
                self.fences.signal();
            }
            self.fences.free();
        }
        debug!("kcfg[{}] on core {} finished: {:?}", self.tag, self.core, outcome);
        self.completion.complete(outcome);
    }

    /// Release and mark cancelled; used when a queued job is dropped
    pub(crate) fn cancel(&mut self, provider: &dyn BufferProvider) {
        self.release(provider);
        self.finish(Err(GspError::JobCancelled {
            core: self.core,
            tag: self.tag,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinit_keeps_identity_only() {
        let mut job = Kcfg::new(3, 1);
        job.set_payload(Bytes::from_static(b"cfg"));
        job.set_flags(true, true, false);
        job.mark_filled();
        job.mark_pulled();
        job.completion().complete(Ok(()));
        job.reinit();
        assert!(job.is_pristine());
        assert_eq!((job.tag(), job.core()), (3, 1));
    }

    #[test]
    fn finish_signals_fence_once() {
        let tl = crate::sync::Timeline::new("t");
        let table = crate::sync::FenceTable::new();
        let mut job = Kcfg::new(0, 0);
        job.set_flags(true, true, false);
        let fd = job.fences_mut().create_signal(&tl, &table);
        job.finish(Ok(()));
        job.finish(Ok(()));
        let fence = table.get(fd).unwrap();
        assert!(fence.is_signaled());
        assert!(!fence.has_error());
        assert_eq!(tl.redundant_signals(), 0);
        assert_eq!(job.completion().outcome(), Some(Ok(())));
    }
}
