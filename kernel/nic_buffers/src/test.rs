extern crate std;

use super::*;
use dma_region::{BoundedDmaAllocator, HostDmaAllocator};

fn host() -> Arc<dyn DmaAllocator> {
    Arc::new(HostDmaAllocator)
}

fn filled_region(allocator: &Arc<dyn DmaAllocator>, bytes: &[u8]) -> DmaRegion {
    let mut region = create_contiguous_mapping(allocator, bytes.len().max(1), BUFFER_ALIGN).unwrap();
    region.as_bytes_mut()[..bytes.len()].copy_from_slice(bytes);
    region
}

/// A three-segment packet holding the bytes 0..30 split 10/4/16.
fn three_segment_packet(allocator: &Arc<dyn DmaAllocator>) -> TransmitBuffer {
    let bytes: std::vec::Vec<u8> = (0..30).collect();
    TransmitBuffer::from_segments(vec![
        (filled_region(allocator, &bytes[..10]), 10),
        (filled_region(allocator, &bytes[10..14]), 4),
        (filled_region(allocator, &bytes[14..]), 16),
    ]).unwrap()
}

#[test]
fn single_segment_buffer_derefs_to_packet() {
    let mut buffer = TransmitBuffer::new(&host(), 60).unwrap();
    buffer[..4].copy_from_slice(&[1, 2, 3, 4]);
    assert_eq!(buffer.length(), 60);
    assert_eq!(buffer.nsegs(), 1);
    assert_eq!(&buffer[..4], &[1, 2, 3, 4]);
}

#[test]
fn segment_longer_than_region_is_rejected() {
    let allocator = host();
    let region = create_contiguous_mapping(&allocator, 64, BUFFER_ALIGN).unwrap();
    assert!(TransmitBuffer::from_segments(vec![(region, 65)]).is_err());
    assert!(TransmitBuffer::from_segments(vec![]).is_err());
}

#[test]
fn copy_prefix_crosses_segments() {
    let packet = three_segment_packet(&host());
    let mut header = [0u8; 18];
    assert_eq!(packet.copy_prefix(&mut header), 18);
    let expected: std::vec::Vec<u8> = (0..18).collect();
    assert_eq!(&header[..], &expected[..]);

    let mut too_big = [0u8; 40];
    assert_eq!(packet.copy_prefix(&mut too_big), 30);
}

#[test]
fn dma_segments_skip_the_inlined_header() {
    let packet = three_segment_packet(&host());
    let pieces = packet.dma_segments_after(18);
    // 10 + 4 bytes are consumed whole, 4 more come out of the third segment
    assert_eq!(pieces.len(), 1);
    assert_eq!(pieces[0].1, 12);

    let pieces = packet.dma_segments_after(12);
    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0].1, 2);
    assert_eq!(pieces[1].1, 16);

    assert!(packet.dma_segments_after(30).is_empty());
}

#[test]
fn coalesce_preserves_bytes() {
    let allocator = host();
    let packet = three_segment_packet(&allocator);
    let single = packet.coalesce(&allocator).unwrap();
    assert_eq!(single.nsegs(), 1);
    assert_eq!(single.length(), 30);
    let expected: std::vec::Vec<u8> = (0..30).collect();
    assert_eq!(&single[..], &expected[..]);
}

#[test]
fn coalesce_reports_allocation_failure() {
    let bounded: Arc<dyn DmaAllocator> = Arc::new(BoundedDmaAllocator::new(HostDmaAllocator, 64));
    let packet = three_segment_packet(&host());
    assert_eq!(packet.coalesce(&bounded).err(), Some(DmaError::OutOfMemory));
}

#[test]
fn receive_buffer_length_is_bounded_by_capacity() {
    let mut buffer = ReceiveBuffer::new(&host(), 128).unwrap();
    assert_eq!(buffer.length(), 0);
    assert!(buffer.is_empty());
    buffer.set_length(100).unwrap();
    assert_eq!(buffer.len(), 100);
    assert!(buffer.set_length(129).is_err());
    assert_eq!(buffer.length(), 100);
    buffer.set_length_clamped(5000);
    assert_eq!(buffer.length(), 128);
    buffer.set_length_clamped(64);
    assert_eq!(buffer.length(), 64);

    buffer.metadata_mut().vlan = Some(42);
    assert_eq!(buffer.metadata().vlan, Some(42));
    assert_eq!(buffer.metadata().timestamp_ns, None);
}

#[test]
fn frame_length_sums_its_buffers() {
    let allocator = host();
    let mut a = ReceiveBuffer::new(&allocator, 64).unwrap();
    let mut b = ReceiveBuffer::new(&allocator, 64).unwrap();
    a.set_length(10).unwrap();
    b.set_length(20).unwrap();
    assert_eq!(ReceivedFrame(vec![a, b]).length(), 30);
}
