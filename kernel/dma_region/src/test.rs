//! Tests for DMA regions and the host allocators.

extern crate std;

use super::*;
use alloc::sync::Arc;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

#[derive(FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
struct Record {
    a: U32<BigEndian>,
    b: U32<BigEndian>,
}

fn host() -> Arc<dyn DmaAllocator> {
    Arc::new(HostDmaAllocator)
}

#[test]
fn new_region_is_zeroed_and_aligned() {
    let region = create_contiguous_mapping(&host(), 3000, 1024).unwrap();
    assert_eq!(region.size_in_bytes(), 3000);
    assert!(region.device_address().is_aligned(1024));
    assert!(region.as_bytes().iter().all(|&b| b == 0));
}

#[test]
fn typed_views_are_big_endian_and_bounds_checked() {
    let mut region = create_contiguous_mapping(&host(), 64, 64).unwrap();
    {
        let rec = region.as_type_mut::<Record>(8).unwrap();
        rec.a.set(0x0102_0304);
        rec.b.set(7);
    }
    assert_eq!(&region.as_bytes()[8..12], &[1, 2, 3, 4]);
    assert_eq!(region.as_type::<Record>(8).unwrap().b.get(), 7);

    assert_eq!(region.as_type::<Record>(57).err(), Some(DmaError::OutOfBounds));
    assert_eq!(region.as_slice::<Record>(0, 8).unwrap().len(), 8);
    assert_eq!(region.as_slice::<Record>(8, 8).err(), Some(DmaError::OutOfBounds));
    assert_eq!(region.read_volatile_u8(64), Err(DmaError::OutOfBounds));
}

#[test]
fn page_addresses_cover_every_page() {
    let region = create_page_mapping(&host(), 3).unwrap();
    let pages = region.page_addresses();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0], region.device_address());
    assert_eq!(pages[2].value() - pages[0].value(), 2 * PAGE_SIZE as u64);
}

#[test]
fn device_memory_aliases_host_view() {
    let mut region = create_contiguous_mapping(&host(), 16, 16).unwrap();
    unsafe { HostDmaAllocator::device_memory(region.device_address().offset(4), 2) }.copy_from_slice(&[0xAB, 0xCD]);
    region.sync_for_cpu();
    assert_eq!(region.read_volatile_u8(5), Ok(0xCD));
    region.write_volatile_u8(0, 9).unwrap();
    assert_eq!(region.as_bytes()[0], 9);
}

#[test]
fn bounded_allocator_enforces_and_releases_its_budget() {
    let bounded = Arc::new(BoundedDmaAllocator::new(HostDmaAllocator, 4096));
    let allocator: Arc<dyn DmaAllocator> = bounded.clone();

    let first = create_contiguous_mapping(&allocator, 4000, 64).unwrap();
    assert_eq!(bounded.in_use(), 4000);
    assert_eq!(create_contiguous_mapping(&allocator, 200, 64).err(), Some(DmaError::OutOfMemory));

    drop(first);
    assert_eq!(bounded.in_use(), 0);
    assert!(create_contiguous_mapping(&allocator, 200, 64).is_ok());

    bounded.set_limit(0);
    assert_eq!(create_contiguous_mapping(&allocator, 1, 1).err(), Some(DmaError::OutOfMemory));
}

#[test]
fn invalid_layouts_are_rejected() {
    assert_eq!(create_contiguous_mapping(&host(), 0, 64).err(), Some(DmaError::InvalidLayout));
    assert_eq!(create_contiguous_mapping(&host(), 64, 3).err(), Some(DmaError::InvalidLayout));
}
