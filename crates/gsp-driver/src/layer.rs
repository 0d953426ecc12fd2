//! Per-layer buffer bindings of a job

use crate::buffer::{BufferProvider, DmaBuf};
use crate::error::Result;
use gsp_chip::layer::{AddrData, LayerType, Offset};
use gsp_chip::uapi::LayerUser;
use tracing::{debug, warn};

/// One layer of a job, with the buffer it is bound to while the job lives
#[derive(Debug, Clone)]
pub struct Layer {
    kind: LayerType,
    enable: bool,
    share_fd: i32,
    wait_fd: i32,
    offset: Offset,
    addr: AddrData,
    buf: Option<DmaBuf>,
    iova: Option<u32>,
}

impl Layer {
    /// Layer as described by the client
    pub fn from_user(user: &LayerUser) -> Self {
        Self {
            kind: user.kind,
            enable: user.enable,
            share_fd: user.share_fd,
            wait_fd: user.wait_fd,
            offset: user.offset,
            addr: user.addr,
            buf: None,
            iova: None,
        }
    }

    /// Layer kind
    pub const fn kind(&self) -> LayerType {
        self.kind
    }

    /// Takes part in the job
    pub const fn is_enabled(&self) -> bool {
        self.enable
    }

    /// Share fd given by the client
    pub const fn share_fd(&self) -> i32 {
        self.share_fd
    }

    /// Acquire fence fd given by the client (`< 0` for none)
    pub const fn wait_fd(&self) -> i32 {
        self.wait_fd
    }

    /// Addresses the engine will be programmed with
    pub const fn addr(&self) -> AddrData {
        self.addr
    }

    /// Bound buffer, if any
    pub const fn buffer(&self) -> Option<&DmaBuf> {
        self.buf.as_ref()
    }

    /// IO virtual address while mapped
    pub const fn iova(&self) -> Option<u32> {
        self.iova
    }

    /// A client buffer backs this layer
    pub const fn has_share_fd(&self) -> bool {
        self.share_fd > 0
    }

    /// Enabled, bound, and the buffer lives behind the IOMMU
    pub fn need_iommu(&self) -> bool {
        self.enable && self.buf.as_ref().is_some_and(|b| b.is_iova)
    }

    /// Resolve and reference the share fd. No-op for disabled or unbacked
    /// layers and for layers already bound.
    ///
    /// # Errors
    ///
    /// Propagates the provider's resolution error.
    pub fn get_dmabuf(&mut self, provider: &dyn BufferProvider) -> Result<()> {
        if !self.enable || !self.has_share_fd() || self.buf.is_some() {
            return Ok(());
        }
        let buf = provider.get(self.share_fd)?;
        if !buf.is_iova {
            self.addr = AddrData::from_base(buf.phys_addr, self.offset);
        }
        debug!(
            "{} layer bound fd {} ({} bytes)",
            self.kind.name(),
            buf.fd,
            buf.size
        );
        self.buf = Some(buf);
        Ok(())
    }

    /// Drop the buffer reference. Safe to call repeatedly.
    pub fn put_dmabuf(&mut self, provider: &dyn BufferProvider) {
        if let Some(buf) = self.buf.take() {
            provider.put(&buf);
        }
    }

    /// Map the bound buffer for `core` and point the plane addresses at it
    ///
    /// # Errors
    ///
    /// Propagates the provider's mapping error.
    pub fn iommu_map(&mut self, provider: &dyn BufferProvider, core: usize) -> Result<()> {
        if self.iova.is_some() || !self.need_iommu() {
            return Ok(());
        }
        let Some(buf) = self.buf.as_ref() else {
            return Ok(());
        };
        let iova = provider.iommu_map(buf, core)?;
        self.addr = AddrData::from_base(iova, self.offset);
        self.iova = Some(iova);
        Ok(())
    }

    /// Undo [`Layer::iommu_map`]. Safe to call repeatedly.
    pub fn iommu_unmap(&mut self, provider: &dyn BufferProvider, core: usize) {
        let Some(iova) = self.iova.take() else {
            return;
        };
        if let Some(buf) = self.buf.as_ref() {
            if let Err(e) = provider.iommu_unmap(buf, core, iova) {
                warn!("{} layer unmap of {iova:#x} failed: {e}", self.kind.name());
            }
        }
    }
}
