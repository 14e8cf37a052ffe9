//! A generic ring of fixed-size descriptors shared with the device.
//!
//! The same ring type backs the event and completion queues (which the device produces into)
//! and the send and receive queues (which the driver produces into).
//! A ring has `2^log_size` entries. The low `log_size` bits of a free-running counter select an entry,
//! and for device-produced rings the next bit is the owner value that marks an entry as ready on the current pass.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::mem::size_of;
use dma_region::{create_page_mapping, DeviceAddress, DmaAllocator, DmaError, DmaRegion, SyncDirection};
use kernel_config::memory::PAGE_SIZE;
use zerocopy::{AsBytes, FromBytes};

/// An entry type whose last pass through the ring is recorded in an ownership bit.
pub trait OwnedEntry: FromBytes + AsBytes {
    /// Byte offset of the ownership byte within the entry. The owner is bit 0 of that byte.
    const OWNER_OFFSET: usize;
    /// The value the whole ownership byte is initialized to, so that no entry looks ready at counter 0.
    const INITIAL_OWNER_BYTE: u8;
}

/// Returns the counter value that follows `counter`.
#[inline]
pub const fn advance(counter: u32) -> u32 {
    counter.wrapping_add(1)
}


/// A power-of-two sized ring of `T`s in one page-aligned DMA region.
pub struct DescriptorRing<T> {
    region: DmaRegion,
    log_size: u32,
    _entry: PhantomData<T>,
}

impl<T: FromBytes + AsBytes> DescriptorRing<T> {
    /// Allocates a zeroed ring of `2^log_size` entries, rounded up to whole pages.
    pub fn new(allocator: &Arc<dyn DmaAllocator>, log_size: u32) -> Result<DescriptorRing<T>, DmaError> {
        if log_size >= 24 || size_of::<T>() == 0 {
            return Err(DmaError::InvalidLayout);
        }
        let bytes = (1usize << log_size) * size_of::<T>();
        let num_pages = (bytes + PAGE_SIZE - 1) / PAGE_SIZE;
        let region = create_page_mapping(allocator, num_pages)?;
        // make sure the typed view is valid once, so later accesses can't fail
        region.as_slice::<T>(0, 1 << log_size)?;
        Ok(DescriptorRing { region, log_size, _entry: PhantomData })
    }

    pub fn log_size(&self) -> u32 {
        self.log_size
    }

    /// The number of entries in the ring.
    pub fn size(&self) -> usize {
        1 << self.log_size
    }

    /// The entry index a counter value refers to.
    #[inline]
    pub fn index(&self, counter: u32) -> usize {
        counter as usize & (self.size() - 1)
    }

    pub fn entries(&self) -> &[T] {
        self.region.as_slice::<T>(0, self.size()).unwrap_or_default()
    }

    pub fn entries_mut(&mut self) -> &mut [T] {
        let size = self.size();
        self.region.as_slice_mut::<T>(0, size).unwrap_or_default()
    }

    pub fn entry(&self, counter: u32) -> &T {
        let index = self.index(counter);
        &self.entries()[index]
    }

    pub fn entry_mut(&mut self, counter: u32) -> &mut T {
        let index = self.index(counter);
        &mut self.entries_mut()[index]
    }

    /// Views the entry at `counter` as a different type of the same size.
    /// Send queues use this to fill continuation slots with data segments.
    pub fn slot_as_mut<U: FromBytes + AsBytes>(&mut self, counter: u32) -> Result<&mut U, DmaError> {
        if size_of::<U>() != size_of::<T>() {
            return Err(DmaError::InvalidLayout);
        }
        let offset = self.index(counter) * size_of::<T>();
        self.region.as_type_mut::<U>(offset)
    }

    /// Device address of the first entry.
    pub fn device_address(&self) -> DeviceAddress {
        self.region.device_address()
    }

    /// The list of page addresses handed to firmware when the queue is created.
    pub fn page_addresses(&self) -> Vec<DeviceAddress> {
        self.region.page_addresses()
    }

    pub fn sync_for_device(&self) {
        self.region.sync_for_device();
    }

    pub fn sync_for_cpu(&self) {
        self.region.sync_for_cpu();
    }

    fn sync_entry(&self, counter: u32, direction: SyncDirection) {
        self.region.sync_range(self.index(counter) * size_of::<T>(), size_of::<T>(), direction);
    }
}

impl<T: OwnedEntry> DescriptorRing<T> {
    /// Writes the initial ownership byte into every entry.
    pub fn init_ownership(&mut self) {
        let entry_size = size_of::<T>();
        let bytes = self.region.as_bytes_mut();
        for i in 0..(1usize << self.log_size) {
            bytes[i * entry_size + T::OWNER_OFFSET] = T::INITIAL_OWNER_BYTE;
        }
        self.region.sync_for_device();
    }

    /// The owner value an entry carries once the device has written it on the pass `counter` belongs to.
    #[inline]
    pub fn expected_owner(&self, counter: u32) -> u8 {
        ((counter >> self.log_size) & 1) as u8
    }

    /// Returns true if the device has written the entry at `counter` on the current pass.
    pub fn is_ready(&self, counter: u32) -> bool {
        let offset = self.index(counter) * size_of::<T>() + T::OWNER_OFFSET;
        match self.region.read_volatile_u8(offset) {
            Ok(owner) => owner & 1 == self.expected_owner(counter),
            Err(_) => false,
        }
    }

    /// Returns the entry at `counter` if the device has written it, without consuming it.
    pub fn peek(&self, counter: u32) -> Option<&T> {
        self.sync_entry(counter, SyncDirection::ForCpu);
        if self.is_ready(counter) {
            Some(self.entry(counter))
        } else {
            None
        }
    }
}

impl<T> fmt::Debug for DescriptorRing<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DescriptorRing")
            .field("region", &self.region)
            .field("entries", &(1usize << self.log_size))
            .finish()
    }
}
