//! Receive queues (RQs) hold the buffers the device scatters incoming packets into.
//! (PRM Section 8.16: Receive Queue)
//!
//! Every receive WQE is a single 16-byte scatter entry pointing at one whole receive buffer.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use dma_region::{create_contiguous_mapping, DeviceAddress, DmaAllocator, DmaError, DmaRegion};
use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use crate::ring::DescriptorRing;
use crate::send_queue::QueueState;
use crate::work_queue::{DoorbellRecord, WorkQueue};
use crate::QUEUE_NUMBER_MASK;

/// Use the reserved lkey for receive buffers.
const RQ_CTX_RLKEY:             u32 = 1 << 31;
/// Don't strip VLAN tags; the CQE reports them instead.
const RQ_CTX_VLAN_STRIP_DIS:    u32 = 1 << 28;
const RQ_STATE_SHIFT:           u32 = 20;
const RQ_STATE_MASK:            u32 = 0xF << RQ_STATE_SHIFT;


#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct ReceiveQueueContext {
    flags:                  U32<BigEndian>,
    user_index:             U32<BigEndian>,
    cqn:                    U32<BigEndian>,
    counter_set_id:         U32<BigEndian>,
    rmpn:                   U32<BigEndian>,
    _padding1:              [u8; 28],
}

const_assert_eq!(core::mem::size_of::<ReceiveQueueContext>(), 48);

impl ReceiveQueueContext {
    pub fn init(&mut self, cqn: u32) {
        *self = ReceiveQueueContext::default();
        self.flags.set(RQ_CTX_RLKEY | RQ_CTX_VLAN_STRIP_DIS);
        self.cqn.set(cqn & QUEUE_NUMBER_MASK);
    }

    pub fn set_state(&mut self, next_state: QueueState) {
        let flags = self.flags.get() & !RQ_STATE_MASK;
        self.flags.set(flags | ((next_state as u32) << RQ_STATE_SHIFT));
    }

    pub fn get_state(&self) -> u8 {
        ((self.flags.get() & RQ_STATE_MASK) >> RQ_STATE_SHIFT) as u8
    }

    pub fn flags(&self) -> u32 {
        self.flags.get()
    }

    pub fn cqn(&self) -> u32 {
        self.cqn.get()
    }
}

/// The full receive queue context passed in CREATE_RQ and MODIFY_RQ: the RQ fields followed by the work queue.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct ReceiveQueueContextWithWorkQueue {
    pub rq: ReceiveQueueContext,
    pub wq: WorkQueue,
}

const_assert_eq!(core::mem::size_of::<ReceiveQueueContextWithWorkQueue>(), 240);


/// A receive WQE: one scatter entry.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Default)]
#[repr(C)]
pub struct ReceiveQueueEntry {
    byte_count:     U32<BigEndian>,
    lkey:           U32<BigEndian>,
    address:        U64<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<ReceiveQueueEntry>(), 16);

impl ReceiveQueueEntry {
    pub fn init(&mut self, address: DeviceAddress, byte_count: u32, lkey: u32) {
        self.byte_count.set(byte_count);
        self.lkey.set(lkey);
        self.address.set(address.value());
    }

    pub fn byte_count(&self) -> u32 {
        self.byte_count.get()
    }

    pub fn lkey(&self) -> u32 {
        self.lkey.get()
    }

    pub fn address(&self) -> DeviceAddress {
        DeviceAddress::new(self.address.get())
    }
}

impl fmt::Debug for ReceiveQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReceiveQueueEntry")
            .field("byte_count", &self.byte_count())
            .field("lkey", &self.lkey())
            .field("address", &self.address())
            .finish()
    }
}


/// A receive queue: the WQE ring and its doorbell record.
pub struct ReceiveQueue {
    entries: DescriptorRing<ReceiveQueueEntry>,
    doorbell: DmaRegion,
    rqn: u32,
}

impl ReceiveQueue {
    pub fn new(allocator: &Arc<dyn DmaAllocator>, log_size: u32) -> Result<ReceiveQueue, DmaError> {
        let entries = DescriptorRing::new(allocator, log_size)?;
        let doorbell = create_contiguous_mapping(allocator, 64, 64)?;
        doorbell.as_type::<DoorbellRecord>(0)?;
        Ok(ReceiveQueue { entries, doorbell, rqn: 0 })
    }

    pub fn set_rqn(&mut self, rqn: u32) {
        self.rqn = rqn & QUEUE_NUMBER_MASK;
    }

    pub fn rqn(&self) -> u32 {
        self.rqn
    }

    pub fn size(&self) -> usize {
        self.entries.size()
    }

    pub fn log_size(&self) -> u32 {
        self.entries.log_size()
    }

    pub fn ring(&self) -> &DescriptorRing<ReceiveQueueEntry> {
        &self.entries
    }

    pub fn page_addresses(&self) -> Vec<DeviceAddress> {
        self.entries.page_addresses()
    }

    pub fn doorbell_address(&self) -> DeviceAddress {
        self.doorbell.device_address()
    }

    pub fn doorbell_record(&self) -> Result<&DoorbellRecord, DmaError> {
        self.doorbell.as_type::<DoorbellRecord>(0)
    }

    /// Points the WQE at `producer_counter` at a receive buffer.
    pub fn post(&mut self, producer_counter: u32, address: DeviceAddress, byte_count: u32, lkey: u32) {
        self.entries.entry_mut(producer_counter).init(address, byte_count, lkey);
    }

    /// Publishes the producer counter to the device.
    pub fn ring_doorbell(&mut self, producer_counter: u32) -> Result<(), DmaError> {
        self.entries.sync_for_device();
        self.doorbell.as_type_mut::<DoorbellRecord>(0)?.set_receive_counter(producer_counter);
        self.doorbell.sync_for_device();
        Ok(())
    }
}

impl fmt::Debug for ReceiveQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReceiveQueue")
            .field("rqn", &self.rqn)
            .field("entries", &self.entries)
            .finish()
    }
}
