//! Memory geometry assumed by the DMA layer and the device.

/// The lower 12 bits of an address are the offset within a page.
pub const PAGE_SHIFT: usize = 12;
/// Page size is 4096 bytes, 4KiB pages.
/// This is also the page size the NIC firmware is told about.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Value: 64. The alignment we give to every small DMA object (descriptors, doorbell records)
/// so that no two of them share a cache line.
pub const CACHE_LINE_SIZE: usize = 64;
