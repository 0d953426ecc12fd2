//! Software buffer pool
//!
//! Hands out share fds for in-memory buffers and keeps reference and mapping
//! counts so that leaks and double releases show up in tests.

use crate::buffer::{BufferProvider, DmaBuf};
use crate::error::{GspError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// First share fd handed out
pub const FIRST_SHARE_FD: i32 = 3;

/// IO virtual base of the simulated IOMMU window
pub const IOVA_BASE: u32 = 0x1000_0000;

#[derive(Debug)]
struct Entry {
    size: usize,
    reserved: Option<u32>,
    refs: usize,
}

/// In-memory [`BufferProvider`]
#[derive(Debug)]
pub struct SoftwareBufferPool {
    next_fd: AtomicI32,
    next_iova: AtomicU32,
    bufs: Mutex<HashMap<i32, Entry>>,
    maps: Mutex<HashMap<(i32, usize, u32), usize>>,
    map_failures: AtomicUsize,
    underflows: AtomicUsize,
}

impl Default for SoftwareBufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBufferPool {
    /// Empty pool
    pub fn new() -> Self {
        Self {
            next_fd: AtomicI32::new(FIRST_SHARE_FD),
            next_iova: AtomicU32::new(IOVA_BASE),
            bufs: Mutex::new(HashMap::new()),
            maps: Mutex::new(HashMap::new()),
            map_failures: AtomicUsize::new(0),
            underflows: AtomicUsize::new(0),
        }
    }

    /// Register an IOMMU-mapped buffer of `size` bytes; returns its share fd
    pub fn register(&self, size: usize) -> i32 {
        self.insert(size, None)
    }

    /// Register a reserved (physically contiguous) buffer at `phys_addr`
    pub fn register_reserved(&self, size: usize, phys_addr: u32) -> i32 {
        self.insert(size, Some(phys_addr))
    }

    fn insert(&self, size: usize, reserved: Option<u32>) -> i32 {
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.bufs.lock().insert(
            fd,
            Entry {
                size,
                reserved,
                refs: 0,
            },
        );
        fd
    }

    /// Make the next `iommu_map` fail
    pub fn fail_next_map(&self) {
        self.map_failures.fetch_add(1, Ordering::AcqRel);
    }

    /// References taken and not yet dropped, across all buffers
    pub fn outstanding_refs(&self) -> usize {
        self.bufs.lock().values().map(|e| e.refs).sum()
    }

    /// Live IOMMU mappings
    pub fn live_mappings(&self) -> usize {
        self.maps.lock().values().sum()
    }

    /// `put` or `unmap` calls that had nothing to undo
    pub fn underflows(&self) -> usize {
        self.underflows.load(Ordering::Relaxed)
    }
}

impl BufferProvider for SoftwareBufferPool {
    fn get(&self, share_fd: i32) -> Result<DmaBuf> {
        let mut bufs = self.bufs.lock();
        let entry = bufs
            .get_mut(&share_fd)
            .ok_or_else(|| GspError::buffer(share_fd, "no such buffer"))?;
        entry.refs += 1;
        Ok(DmaBuf {
            fd: share_fd,
            size: entry.size,
            is_iova: entry.reserved.is_none(),
            phys_addr: entry.reserved.unwrap_or(0),
        })
    }

    fn put(&self, buf: &DmaBuf) {
        let mut bufs = self.bufs.lock();
        match bufs.get_mut(&buf.fd) {
            Some(entry) if entry.refs > 0 => entry.refs -= 1,
            _ => {
                self.underflows.fetch_add(1, Ordering::Relaxed);
                warn!("put of unreferenced buffer fd {}", buf.fd);
            }
        }
    }

    fn iommu_map(&self, buf: &DmaBuf, core: usize) -> Result<u32> {
        let failed = self
            .map_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(GspError::iommu(format!("fd {} on core {core}: no iova space", buf.fd)));
        }
        let len = u32::try_from(buf.size.max(1)).unwrap_or(u32::MAX);
        let iova = self.next_iova.fetch_add(len.next_multiple_of(4096), Ordering::Relaxed);
        *self.maps.lock().entry((buf.fd, core, iova)).or_insert(0) += 1;
        debug!("mapped fd {} for core {core} at {iova:#x}", buf.fd);
        Ok(iova)
    }

    fn iommu_unmap(&self, buf: &DmaBuf, core: usize, iova: u32) -> Result<()> {
        let mut maps = self.maps.lock();
        let key = (buf.fd, core, iova);
        match maps.get_mut(&key) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                maps.remove(&key);
            }
            None => {
                self.underflows.fetch_add(1, Ordering::Relaxed);
                return Err(GspError::iommu(format!("fd {} not mapped at {iova:#x}", buf.fd)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_and_maps_balance() {
        let pool = SoftwareBufferPool::new();
        let fd = pool.register(8192);
        let buf = pool.get(fd).unwrap();
        let iova = pool.iommu_map(&buf, 0).unwrap();
        assert_eq!(pool.outstanding_refs(), 1);
        assert_eq!(pool.live_mappings(), 1);
        pool.iommu_unmap(&buf, 0, iova).unwrap();
        pool.put(&buf);
        assert_eq!(pool.outstanding_refs(), 0);
        assert_eq!(pool.live_mappings(), 0);
        assert_eq!(pool.underflows(), 0);
    }

    #[test]
    fn unknown_fd_is_a_resolution_error() {
        let pool = SoftwareBufferPool::new();
        assert!(matches!(
            pool.get(99),
            Err(GspError::BufferResolution { fd: 99, .. })
        ));
    }

    #[test]
    fn reserved_buffers_are_physical() {
        let pool = SoftwareBufferPool::new();
        let fd = pool.register_reserved(4096, 0x8000_0000);
        let buf = pool.get(fd).unwrap();
        assert!(!buf.is_iova);
        assert_eq!(buf.phys_addr, 0x8000_0000);
    }

    #[test]
    fn double_put_is_counted() {
        let pool = SoftwareBufferPool::new();
        let buf = pool.get(pool.register(16)).unwrap();
        pool.put(&buf);
        pool.put(&buf);
        assert_eq!(pool.underflows(), 1);
    }
}
