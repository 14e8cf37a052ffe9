//! Contiguous memory regions that are visible to both the host CPU and a bus-mastering device.
//!
//! A [`DmaRegion`] owns one block handed out by a [`DmaAllocator`]. It knows the block's
//! host-visible pointer and its device-visible address, and it can be reinterpreted as typed
//! views (descriptors, mailboxes, doorbell records) at checked offsets, the same way
//! `MappedPages` hands out `as_type()` and `as_slice()` views over mapped memory.
//!
//! Ownership of the bytes in a region alternates between the host and the device.
//! Before the device reads memory the host has written, call [`DmaRegion::sync_for_device()`];
//! after the device has written memory the host wants to read, call [`DmaRegion::sync_for_cpu()`].
//! The region frees its block back to the allocator when dropped.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate kernel_config;
extern crate zerocopy;

mod host;
#[cfg(test)]
mod test;

pub use host::{BoundedDmaAllocator, HostDmaAllocator};

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::ptr::NonNull;
use core::slice;
use kernel_config::memory::PAGE_SIZE;
use zerocopy::{AsBytes, FromBytes};


/// An address as seen by the device on the bus.
/// On identity-mapped platforms this equals the host physical address.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DeviceAddress(u64);

impl DeviceAddress {
    pub const fn new(addr: u64) -> DeviceAddress {
        DeviceAddress(addr)
    }

    pub const fn zero() -> DeviceAddress {
        DeviceAddress(0)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The upper 32 bits of the address.
    pub const fn high(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The lower 32 bits of the address.
    pub const fn low(&self) -> u32 {
        self.0 as u32
    }

    /// Returns this address plus `offset` bytes.
    pub const fn offset(&self, offset: usize) -> DeviceAddress {
        DeviceAddress(self.0.wrapping_add(offset as u64))
    }

    pub const fn is_aligned(&self, align: usize) -> bool {
        self.0 % (align as u64) == 0
    }
}

impl fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DeviceAddress({:#X})", self.0)
    }
}

impl fmt::LowerHex for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}


/// The direction of a cache/visibility synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// The host has finished writing and the device is about to read.
    ForDevice,
    /// The device has finished writing and the host is about to read.
    ForCpu,
}


/// Errors from allocating or accessing DMA memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// The allocator could not satisfy the request.
    OutOfMemory,
    /// Zero-sized request, or an alignment that is not a power of two.
    InvalidLayout,
    /// A typed view would extend past the end of the region.
    OutOfBounds,
    /// A typed view would start at an address that is not aligned for its type.
    Misaligned,
}

impl From<DmaError> for &'static str {
    fn from(error: DmaError) -> Self {
        match error {
            DmaError::OutOfMemory => "DMA allocator is out of memory",
            DmaError::InvalidLayout => "invalid DMA allocation size or alignment",
            DmaError::OutOfBounds => "requested type and offset would not fit within the DMA region bounds",
            DmaError::Misaligned => "requested type is not aligned at the given DMA region offset",
        }
    }
}


/// A raw block returned by a [`DmaAllocator`].
/// It is not freed on drop; wrap it in a [`DmaRegion`] for that.
#[derive(Debug)]
pub struct DmaBlock {
    /// Host-visible pointer to the first byte of the block.
    pub host: NonNull<u8>,
    /// Device-visible address of the first byte of the block.
    pub device: DeviceAddress,
    pub size: usize,
    pub align: usize,
}

// The block is plain memory; access to it is governed by the owning `DmaRegion`.
unsafe impl Send for DmaBlock {}
unsafe impl Sync for DmaBlock {}


/// The bus/DMA services a NIC driver needs from the platform.
pub trait DmaAllocator: Send + Sync {
    /// Allocates a zero-filled block of `size` bytes whose device address is aligned to `align`.
    fn allocate(&self, size: usize, align: usize) -> Result<DmaBlock, DmaError>;

    /// Makes `len` bytes at `offset` within `block` coherent in the given direction.
    fn sync(&self, block: &DmaBlock, offset: usize, len: usize, direction: SyncDirection);

    /// Returns `block` to the allocator.
    ///
    /// # Safety
    /// `block` must have come from this allocator, must not be freed twice,
    /// and no references into it may outlive this call.
    unsafe fn free(&self, block: &DmaBlock);
}


/// Allocates a zeroed, contiguous region of `size_in_bytes` bytes aligned to `align`.
pub fn create_contiguous_mapping(
    allocator: &Arc<dyn DmaAllocator>,
    size_in_bytes: usize,
    align: usize,
) -> Result<DmaRegion, DmaError> {
    if size_in_bytes == 0 || !align.is_power_of_two() {
        return Err(DmaError::InvalidLayout);
    }
    let block = allocator.allocate(size_in_bytes, align)?;
    trace!("create_contiguous_mapping(): {} bytes at {:?}", size_in_bytes, block.device);
    Ok(DmaRegion {
        block,
        allocator: Arc::clone(allocator),
    })
}

/// Allocates a zeroed region covering `num_pages` whole pages, page aligned.
pub fn create_page_mapping(allocator: &Arc<dyn DmaAllocator>, num_pages: usize) -> Result<DmaRegion, DmaError> {
    create_contiguous_mapping(allocator, num_pages * PAGE_SIZE, PAGE_SIZE)
}


/// An owned, contiguous block of DMA memory.
pub struct DmaRegion {
    block: DmaBlock,
    allocator: Arc<dyn DmaAllocator>,
}

impl DmaRegion {
    pub fn size_in_bytes(&self) -> usize {
        self.block.size
    }

    /// The device-visible address of the first byte of this region.
    pub fn device_address(&self) -> DeviceAddress {
        self.block.device
    }

    /// The device-visible address of the byte at `offset`, if it lies within this region.
    pub fn device_address_at(&self, offset: usize) -> Option<DeviceAddress> {
        if offset < self.size_in_bytes() {
            Some(self.block.device.offset(offset))
        } else {
            None
        }
    }

    /// The allocator this region will be returned to.
    pub fn allocator(&self) -> &Arc<dyn DmaAllocator> {
        &self.allocator
    }

    /// Device addresses of each page-sized chunk of this region, in order.
    /// This is the physical address list the firmware expects when it is given a queue's memory.
    pub fn page_addresses(&self) -> Vec<DeviceAddress> {
        let num_pages = (self.size_in_bytes() + PAGE_SIZE - 1) / PAGE_SIZE;
        (0..num_pages)
            .map(|i| self.block.device.offset(i * PAGE_SIZE))
            .collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFE: the block is `size` bytes long and lives as long as `self`.
        unsafe { slice::from_raw_parts(self.block.host.as_ptr(), self.block.size) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFE: same as above, and `&mut self` guarantees exclusive host access.
        unsafe { slice::from_raw_parts_mut(self.block.host.as_ptr(), self.block.size) }
    }

    /// Reinterprets the bytes at `offset` as a `&T`.
    pub fn as_type<T: FromBytes>(&self, offset: usize) -> Result<&T, DmaError> {
        let range = self.check_bounds::<T>(offset, 1)?;
        T::ref_from(&self.as_bytes()[range]).ok_or(DmaError::Misaligned)
    }

    /// Same as [`as_type()`](#method.as_type), but returns a mutable reference.
    pub fn as_type_mut<T: FromBytes + AsBytes>(&mut self, offset: usize) -> Result<&mut T, DmaError> {
        let range = self.check_bounds::<T>(offset, 1)?;
        T::mut_from(&mut self.as_bytes_mut()[range]).ok_or(DmaError::Misaligned)
    }

    /// Reinterprets `length` consecutive `T`s starting at `byte_offset` as a slice.
    pub fn as_slice<T: FromBytes>(&self, byte_offset: usize, length: usize) -> Result<&[T], DmaError> {
        let range = self.check_bounds::<T>(byte_offset, length)?;
        T::slice_from(&self.as_bytes()[range]).ok_or(DmaError::Misaligned)
    }

    /// Same as [`as_slice()`](#method.as_slice), but returns a mutable slice.
    pub fn as_slice_mut<T: FromBytes + AsBytes>(&mut self, byte_offset: usize, length: usize) -> Result<&mut [T], DmaError> {
        let range = self.check_bounds::<T>(byte_offset, length)?;
        T::mut_slice_from(&mut self.as_bytes_mut()[range]).ok_or(DmaError::Misaligned)
    }

    /// Reads one byte with a volatile load, bypassing any value the compiler may have cached.
    /// Used for polling ownership bytes the device flips behind our back.
    pub fn read_volatile_u8(&self, offset: usize) -> Result<u8, DmaError> {
        if offset >= self.size_in_bytes() {
            return Err(DmaError::OutOfBounds);
        }
        // SAFE: bounds checked above; u8 has no alignment requirement.
        Ok(unsafe { core::ptr::read_volatile(self.block.host.as_ptr().add(offset)) })
    }

    /// Writes one byte with a volatile store.
    pub fn write_volatile_u8(&mut self, offset: usize, value: u8) -> Result<(), DmaError> {
        if offset >= self.size_in_bytes() {
            return Err(DmaError::OutOfBounds);
        }
        // SAFE: bounds checked above; u8 has no alignment requirement.
        unsafe { core::ptr::write_volatile(self.block.host.as_ptr().add(offset), value) };
        Ok(())
    }

    /// Fills the whole region with zeroes.
    pub fn zero(&mut self) {
        self.as_bytes_mut().fill(0);
    }

    /// Publishes host writes to the whole region to the device.
    pub fn sync_for_device(&self) {
        self.allocator.sync(&self.block, 0, self.block.size, SyncDirection::ForDevice);
    }

    /// Makes device writes to the whole region visible to the host.
    pub fn sync_for_cpu(&self) {
        self.allocator.sync(&self.block, 0, self.block.size, SyncDirection::ForCpu);
    }

    /// Synchronizes only `len` bytes at `offset`, clamped to the region.
    pub fn sync_range(&self, offset: usize, len: usize, direction: SyncDirection) {
        let offset = offset.min(self.block.size);
        let len = len.min(self.block.size - offset);
        self.allocator.sync(&self.block, offset, len, direction);
    }

    fn check_bounds<T>(&self, offset: usize, count: usize) -> Result<core::ops::Range<usize>, DmaError> {
        let end = mem::size_of::<T>()
            .checked_mul(count)
            .and_then(|len| offset.checked_add(len));
        match end {
            Some(end) if end <= self.size_in_bytes() => Ok(offset..end),
            _ => {
                error!("DmaRegion: requested {} x {} at offset {}, which is too large for a region of size {}!",
                    count, core::any::type_name::<T>(), offset, self.size_in_bytes()
                );
                Err(DmaError::OutOfBounds)
            }
        }
    }
}

impl fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DmaRegion")
            .field("device", &self.block.device)
            .field("size", &self.block.size)
            .finish()
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        // SAFE: the block came from this allocator, and `self` is the only owner.
        unsafe { self.allocator.free(&self.block) };
    }
}
