//! Shared buffers and IOMMU mapping
//!
//! Clients name buffers by share fd. A [`BufferProvider`] turns an fd into a
//! referenced [`DmaBuf`] and maps it into a core's IO address space. The
//! scheduler guarantees every `get` is matched by exactly one `put` and
//! every successful `iommu_map` by exactly one `iommu_unmap`.

use crate::error::Result;
use std::fmt::Debug;

/// A referenced shared buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaBuf {
    /// Share fd it was resolved from
    pub fd: i32,
    /// Size in bytes
    pub size: usize,
    /// Needs an IOMMU mapping (false for reserved physical memory)
    pub is_iova: bool,
    /// Physical base, meaningful when `is_iova` is false
    pub phys_addr: u32,
}

/// Resolves share fds and manages IOMMU mappings
pub trait BufferProvider: Debug + Send + Sync {
    /// Take a reference on the buffer behind `share_fd`
    ///
    /// # Errors
    ///
    /// Returns [`crate::GspError::BufferResolution`] if the fd names no buffer.
    fn get(&self, share_fd: i32) -> Result<DmaBuf>;

    /// Drop a reference taken by [`BufferProvider::get`]
    fn put(&self, buf: &DmaBuf);

    /// Map `buf` for `core`, returning its IO virtual address
    ///
    /// # Errors
    ///
    /// Returns [`crate::GspError::IommuMap`] if the mapping fails.
    fn iommu_map(&self, buf: &DmaBuf, core: usize) -> Result<u32>;

    /// Undo a mapping made by [`BufferProvider::iommu_map`]
    ///
    /// # Errors
    ///
    /// Returns [`crate::GspError::IommuMap`] if no such mapping exists.
    fn iommu_unmap(&self, buf: &DmaBuf, core: usize, iova: u32) -> Result<()>;
}
