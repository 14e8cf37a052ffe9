//! Defines buffers that are used to send and receive packets.
//!
//! Both kinds of buffer live in [`DmaRegion`]s, so the NIC can read and write them directly.
//! A [`TransmitBuffer`] may be made of several regions (a scatter/gather list),
//! while a [`ReceiveBuffer`] is always one region that the NIC filled.

#![no_std]

#[macro_use] extern crate alloc;
#[macro_use] extern crate log;
extern crate dma_region;

#[cfg(test)]
mod test;

use core::ops::{Deref, DerefMut};
use alloc::sync::Arc;
use alloc::vec::Vec;
use dma_region::{create_contiguous_mapping, DeviceAddress, DmaAllocator, DmaError, DmaRegion};

/// Alignment of freshly allocated packet buffers.
pub const BUFFER_ALIGN: usize = 64;


/// One piece of an outgoing packet: the first `length` bytes of a DMA region.
struct BufferSegment {
    region: DmaRegion,
    length: usize,
}

/// A buffer that stores a packet to be transmitted through the NIC.
///
/// The packet is a list of segments, each contiguous in device memory.
/// Auto-dereferences into the bytes of its first segment,
/// which for a buffer created with [`new()`](#method.new) is the whole packet.
pub struct TransmitBuffer {
    segments: Vec<BufferSegment>,
}

impl TransmitBuffer {
    /// Creates a new single-segment TransmitBuffer with the specified size in bytes.
    pub fn new(allocator: &Arc<dyn DmaAllocator>, size_in_bytes: usize) -> Result<TransmitBuffer, &'static str> {
        let region = create_contiguous_mapping(allocator, size_in_bytes, BUFFER_ALIGN)?;
        Ok(TransmitBuffer {
            segments: vec![BufferSegment { region, length: size_in_bytes }],
        })
    }

    /// Creates a TransmitBuffer from a list of `(region, length)` pieces, in packet order.
    ///
    /// Returns an error if the list is empty or a length is larger than its region.
    pub fn from_segments(segments: Vec<(DmaRegion, usize)>) -> Result<TransmitBuffer, &'static str> {
        if segments.is_empty() {
            return Err("TransmitBuffer::from_segments(): no segments");
        }
        let mut buffer = TransmitBuffer { segments: Vec::with_capacity(segments.len()) };
        for (region, length) in segments {
            buffer.push_segment(region, length)?;
        }
        Ok(buffer)
    }

    /// Appends a segment to the end of the packet.
    pub fn push_segment(&mut self, region: DmaRegion, length: usize) -> Result<(), &'static str> {
        if length > region.size_in_bytes() {
            return Err("TransmitBuffer::push_segment(): length is larger than the region");
        }
        self.segments.push(BufferSegment { region, length });
        Ok(())
    }

    /// The total length of the packet in bytes.
    pub fn length(&self) -> usize {
        self.segments.iter().map(|s| s.length).sum()
    }

    /// The number of segments the packet is made of.
    pub fn nsegs(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, index: usize) -> Option<&[u8]> {
        self.segments.get(index).map(|s| &s.region.as_bytes()[..s.length])
    }

    pub fn segment_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        self.segments.get_mut(index).map(|s| {
            let length = s.length;
            &mut s.region.as_bytes_mut()[..length]
        })
    }

    /// Copies the first `dst.len()` bytes of the packet into `dst`, crossing segment boundaries as needed.
    /// Returns the number of bytes copied, which is less than `dst.len()` only if the packet is shorter.
    pub fn copy_prefix(&self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        for segment in &self.segments {
            if copied == dst.len() {
                break;
            }
            let take = segment.length.min(dst.len() - copied);
            dst[copied..copied + take].copy_from_slice(&segment.region.as_bytes()[..take]);
            copied += take;
        }
        copied
    }

    /// Returns the `(device address, length)` pieces of the packet that remain after skipping its first `skip` bytes.
    /// Empty pieces are left out.
    pub fn dma_segments_after(&self, skip: usize) -> Vec<(DeviceAddress, u32)> {
        let mut remaining_skip = skip;
        let mut pieces = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            if remaining_skip >= segment.length {
                remaining_skip -= segment.length;
                continue;
            }
            let start = segment.region.device_address().offset(remaining_skip);
            pieces.push((start, (segment.length - remaining_skip) as u32));
            remaining_skip = 0;
        }
        pieces
    }

    /// Makes the host's writes to every segment visible to the NIC.
    pub fn sync_for_device(&self) {
        for segment in &self.segments {
            segment.region.sync_for_device();
        }
    }

    /// Copies the whole packet into one freshly allocated region and returns it as a single-segment buffer.
    pub fn coalesce(&self, allocator: &Arc<dyn DmaAllocator>) -> Result<TransmitBuffer, DmaError> {
        let length = self.length();
        let mut region = create_contiguous_mapping(allocator, length.max(1), BUFFER_ALIGN)?;
        let copied = self.copy_prefix(&mut region.as_bytes_mut()[..length]);
        trace!("TransmitBuffer::coalesce(): {} segments into one of {} bytes", self.nsegs(), copied);
        Ok(TransmitBuffer {
            segments: vec![BufferSegment { region, length }],
        })
    }
}

impl Deref for TransmitBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.segment(0).unwrap_or(&[])
    }
}

impl DerefMut for TransmitBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.segment_mut(0).unwrap_or(&mut [])
    }
}

impl core::fmt::Debug for TransmitBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("TransmitBuffer")
            .field("length", &self.length())
            .field("nsegs", &self.nsegs())
            .finish()
    }
}


/// What the NIC reported about a received packet besides its bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxMetadata {
    /// The receive-side hash, if the NIC computed one.
    pub flow_id: Option<u32>,
    /// The receive time translated into host uptime nanoseconds, if the clock has been calibrated.
    pub timestamp_ns: Option<u64>,
    /// The VLAN tag the NIC stripped, if any.
    pub vlan: Option<u16>,
    pub l3_checksum_ok: bool,
    pub l4_checksum_ok: bool,
}

/// A buffer that stores a packet (a piece of an Ethernet frame) that has been received from the NIC
/// and is guaranteed to be contiguous in device memory.
/// Auto-dereferences into a byte slice of the received bytes.
pub struct ReceiveBuffer {
    region: DmaRegion,
    length: usize,
    metadata: RxMetadata,
}

impl ReceiveBuffer {
    /// Allocates a new, empty ReceiveBuffer that can hold `capacity` bytes.
    pub fn new(allocator: &Arc<dyn DmaAllocator>, capacity: usize) -> Result<ReceiveBuffer, DmaError> {
        let region = create_contiguous_mapping(allocator, capacity, BUFFER_ALIGN)?;
        Ok(ReceiveBuffer { region, length: 0, metadata: RxMetadata::default() })
    }

    /// Wraps an existing region, treating its first `length` bytes as received data.
    pub fn from_region(region: DmaRegion, length: usize) -> Result<ReceiveBuffer, &'static str> {
        if length > region.size_in_bytes() {
            Err("ReceiveBuffer::from_region(): region too small")
        } else {
            Ok(ReceiveBuffer { region, length, metadata: RxMetadata::default() })
        }
    }

    pub fn device_address(&self) -> DeviceAddress {
        self.region.device_address()
    }

    /// The number of bytes this buffer can hold.
    pub fn capacity(&self) -> usize {
        self.region.size_in_bytes()
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Sets the buffer's length.
    ///
    /// Returns an error if the length is greater than the buffer's capacity.
    pub fn set_length(&mut self, length: usize) -> Result<(), &'static str> {
        if length > self.capacity() {
            Err("ReceiveBuffer::set_length(): length too long")
        } else {
            self.length = length;
            Ok(())
        }
    }

    /// Sets the buffer's length, cutting it down to the buffer's capacity.
    pub fn set_length_clamped(&mut self, length: usize) {
        self.length = length.min(self.capacity());
    }

    pub fn metadata(&self) -> &RxMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut RxMetadata {
        &mut self.metadata
    }

    /// Makes the NIC's writes into this buffer visible to the host.
    pub fn sync_for_cpu(&self) {
        self.region.sync_for_cpu();
    }

    /// Gives back the underlying region.
    pub fn into_region(self) -> DmaRegion {
        self.region
    }
}

impl Deref for ReceiveBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.region.as_bytes()[..self.length]
    }
}

impl DerefMut for ReceiveBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let length = self.length;
        &mut self.region.as_bytes_mut()[..length]
    }
}

impl core::fmt::Debug for ReceiveBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ReceiveBuffer")
            .field("device_address", &self.device_address())
            .field("length", &self.length)
            .field("metadata", &self.metadata)
            .finish()
    }
}


/// A network (e.g., Ethernet) frame that has been received by the NIC.
pub struct ReceivedFrame(pub Vec<ReceiveBuffer>);

impl ReceivedFrame {
    /// The total length of the frame in bytes.
    pub fn length(&self) -> usize {
        self.0.iter().map(|b| b.length()).sum()
    }
}
