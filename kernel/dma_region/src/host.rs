//! Allocators backed by ordinary host memory.

use super::{DeviceAddress, DmaAllocator, DmaBlock, DmaError, SyncDirection};
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;
use core::slice;
use core::sync::atomic::{fence, AtomicUsize, Ordering};


/// A DMA allocator for identity-mapped platforms:
/// the device address of a block is its host address.
///
/// Host memory is assumed to be cache-coherent with the device,
/// so syncing is a full memory fence.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDmaAllocator;

impl HostDmaAllocator {
    /// Returns the host view of `len` bytes of device memory starting at `address`.
    ///
    /// This is the device's side of an identity mapping, used by loopback and simulated devices.
    ///
    /// # Safety
    /// `address..address + len` must lie within a live block handed out by a `HostDmaAllocator`,
    /// and the caller must not hold any other reference to those bytes while the slice is alive.
    pub unsafe fn device_memory<'a>(address: DeviceAddress, len: usize) -> &'a mut [u8] {
        slice::from_raw_parts_mut(address.value() as usize as *mut u8, len)
    }
}

impl DmaAllocator for HostDmaAllocator {
    fn allocate(&self, size: usize, align: usize) -> Result<DmaBlock, DmaError> {
        if size == 0 {
            return Err(DmaError::InvalidLayout);
        }
        let layout = Layout::from_size_align(size, align).map_err(|_| DmaError::InvalidLayout)?;
        // SAFE: the layout has a nonzero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let host = NonNull::new(ptr).ok_or(DmaError::OutOfMemory)?;
        Ok(DmaBlock {
            host,
            device: DeviceAddress::new(ptr as usize as u64),
            size,
            align,
        })
    }

    fn sync(&self, _block: &DmaBlock, _offset: usize, _len: usize, _direction: SyncDirection) {
        fence(Ordering::SeqCst);
    }

    unsafe fn free(&self, block: &DmaBlock) {
        dealloc(block.host.as_ptr(), Layout::from_size_align_unchecked(block.size, block.align));
    }
}


/// Wraps another allocator and refuses requests once `limit` bytes are outstanding.
///
/// Drivers use this to cap how much memory a single device may pin.
/// The limit can be changed at runtime, which also makes it handy for exercising
/// allocation-failure paths.
#[derive(Debug)]
pub struct BoundedDmaAllocator<A> {
    inner: A,
    limit: AtomicUsize,
    in_use: AtomicUsize,
}

impl<A: DmaAllocator> BoundedDmaAllocator<A> {
    pub fn new(inner: A, limit: usize) -> BoundedDmaAllocator<A> {
        BoundedDmaAllocator {
            inner,
            limit: AtomicUsize::new(limit),
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Release);
    }

    /// The number of bytes currently allocated through this allocator.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

impl<A: DmaAllocator> DmaAllocator for BoundedDmaAllocator<A> {
    fn allocate(&self, size: usize, align: usize) -> Result<DmaBlock, DmaError> {
        let limit = self.limit.load(Ordering::Acquire);
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&total| total <= limit)
            })
            .map_err(|used| {
                trace!("BoundedDmaAllocator: refusing {} bytes, {} of {} in use", size, used, limit);
                DmaError::OutOfMemory
            })?;

        self.inner.allocate(size, align).map_err(|e| {
            self.in_use.fetch_sub(size, Ordering::AcqRel);
            e
        })
    }

    fn sync(&self, block: &DmaBlock, offset: usize, len: usize, direction: SyncDirection) {
        self.inner.sync(block, offset, len, direction)
    }

    unsafe fn free(&self, block: &DmaBlock) {
        self.inner.free(block);
        self.in_use.fetch_sub(block.size, Ordering::AcqRel);
    }
}
