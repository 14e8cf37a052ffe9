//! The work queue context shared by send and receive queues, and their doorbell record.
//! (PRM Section 8.17: Work Queue)

use bit_field::BitField;
use dma_region::DeviceAddress;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use crate::{LOG_QUEUE_SIZE_MASK, QUEUE_NUMBER_MASK, UAR_MASK};

/// The work queue type in the top nibble of the first word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkQueueType {
    Linked = 0x0,
    Cyclic = 0x1,
}

/// Log2 of the size of a send queue WQE basic block (64 bytes).
pub const LOG_SEND_WQE_STRIDE: u32 = 6;
/// Log2 of the size of a receive queue entry (16 bytes: one scatter entry).
pub const LOG_RECEIVE_WQE_STRIDE: u32 = 4;


/// The work queue data structure, which is embedded in send and receive queue contexts.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct WorkQueue {
    wq_type_signature:                  U32<BigEndian>,
    page_offset_lwm:                    U32<BigEndian>,
    pd:                                 U32<BigEndian>,
    uar_page:                           U32<BigEndian>,
    dbr_addr_h:                         U32<BigEndian>,
    dbr_addr_l:                         U32<BigEndian>,
    hw_counter:                         U32<BigEndian>,
    sw_counter:                         U32<BigEndian>,
    log_wq_stride_pg_sz_sz:             U32<BigEndian>,
    single_stride_log_num_of_bytes:     U32<BigEndian>,
    _padding1:                          [u8; 32],
    _padding2:                          [u8; 32],
    _padding3:                          [u8; 32],
    _padding4:                          [u8; 32],
    _padding5:                          [u8; 24],
}

const_assert_eq!(core::mem::size_of::<WorkQueue>(), 192);

impl WorkQueue {
    /// Initializes a cyclic work queue.
    ///
    /// # Arguments
    /// * `pd`: protection domain
    /// * `uar_page`: the UAR page whose doorbells serve this queue
    /// * `db_addr`: device address of the queue's doorbell record
    /// * `log_wq_stride`: log2 of the size of one entry in bytes
    /// * `log_wq_size`: log2 of the number of entries
    pub fn init(&mut self, pd: u32, uar_page: u32, db_addr: DeviceAddress, log_wq_stride: u32, log_wq_size: u32) {
        *self = WorkQueue::default();
        self.wq_type_signature.set((WorkQueueType::Cyclic as u32) << 28);
        self.pd.set(pd & QUEUE_NUMBER_MASK);
        self.uar_page.set(uar_page & UAR_MASK);
        self.dbr_addr_h.set(db_addr.high());
        self.dbr_addr_l.set(db_addr.low());
        self.log_wq_stride_pg_sz_sz.set((log_wq_stride << 16) | (log_wq_size & LOG_QUEUE_SIZE_MASK));
    }

    /// Returns (log stride, log size).
    pub fn geometry(&self) -> (u32, u32) {
        let val = self.log_wq_stride_pg_sz_sz.get();
        (val.get_bits(16..20), val & LOG_QUEUE_SIZE_MASK)
    }

    pub fn doorbell_address(&self) -> DeviceAddress {
        DeviceAddress::new(((self.dbr_addr_h.get() as u64) << 32) | self.dbr_addr_l.get() as u64)
    }
}


/// The doorbell record of a work queue.
/// The driver writes its producer counter here before ringing the doorbell.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct DoorbellRecord {
    /// wqe_counter of the receive queue
    rcv_counter:    U32<BigEndian>,
    /// sq_wqebb_counter of the send queue
    send_counter:   U32<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<DoorbellRecord>(), 8);

/// Work queue doorbell counters are 16 bits wide.
pub const WQ_COUNTER_MASK: u32 = 0xFFFF;

impl DoorbellRecord {
    pub fn set_receive_counter(&mut self, producer_counter: u32) {
        self.rcv_counter.set(producer_counter & WQ_COUNTER_MASK);
    }

    pub fn set_send_counter(&mut self, producer_counter: u32) {
        self.send_counter.set(producer_counter & WQ_COUNTER_MASK);
    }

    pub fn receive_counter(&self) -> u32 {
        self.rcv_counter.get()
    }

    pub fn send_counter(&self) -> u32 {
        self.send_counter.get()
    }
}
