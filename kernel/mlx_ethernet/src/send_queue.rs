//! Send queues (SQs) hold the work queue entries (WQEs) that describe packets to transmit,
//! along with the transport interface send (TIS) context they transmit through.
//! (PRM Section 8.15: Send Queue, Section 7.2: Ethernet Send WQE)
//!
//! A send WQE starts with one 64-byte basic block holding the control segment, the Ethernet segment
//! with the inlined packet header, and the first data segment.
//! Further data segments spill into following basic blocks, four per block.

use alloc::sync::Arc;
use core::fmt;
use dma_region::{create_contiguous_mapping, DeviceAddress, DmaAllocator, DmaError, DmaRegion};
use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use crate::ring::DescriptorRing;
use crate::uar::{Uar, DEFAULT_BF_SIZE};
use crate::work_queue::{DoorbellRecord, WorkQueue, WQ_COUNTER_MASK};
use crate::QUEUE_NUMBER_MASK;

/// Number of packet bytes copied into the Ethernet segment of every send WQE.
pub const INLINE_HEADER_SIZE:       usize = 18;
/// Number of data segments in one continuation basic block.
pub const SEGMENTS_PER_SLOT:        usize = 4;
/// The most basic blocks a single send may use.
pub const MAX_SLOTS_PER_SEND:       usize = 4;
/// The most data segments a single send may use: one in the first block, four in each continuation block.
pub const MAX_SEGMENTS:             usize = 1 + (MAX_SLOTS_PER_SEND - 1) * SEGMENTS_PER_SLOT;

const SEND_OPCODE:                  u32 = 0x0A;
/// Request a CQE for every WQE.
const CE_CQE_ALWAYS:                u32 = 0x08;
/// The control and Ethernet segments together take three 16-byte data segment units.
const CTRL_ETH_DS_COUNT:            u32 = 3;


#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct TransportInterfaceSendContext {
    prio_or_sl:         U32<BigEndian>,
    _padding1:          [u8; 32],
    transport_domain:   U32<BigEndian>,
    _padding2:          [u8; 4],
    pd:                 U32<BigEndian>,
    _padding3:          [u8; 32],
    _padding4:          [u8; 32],
    _padding5:          [u8; 32],
    _padding6:          [u8; 16],
}

const_assert_eq!(core::mem::size_of::<TransportInterfaceSendContext>(), 160);

impl TransportInterfaceSendContext {
    pub fn init(&mut self, td: u32) {
        *self = TransportInterfaceSendContext::default();
        self.transport_domain.set(td & QUEUE_NUMBER_MASK);
    }

    pub fn transport_domain(&self) -> u32 {
        self.transport_domain.get()
    }
}


#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct SendQueueContext {
    rlky_state:                         U32<BigEndian>,
    user_index:                         U32<BigEndian>,
    cqn:                                U32<BigEndian>,
    hairpin_peer_rq:                    U32<BigEndian>,
    hairpin_peer_vhca:                  U32<BigEndian>,
    _padding1:                          [u8; 8],
    packet_pacing_rate_limit_index:     U32<BigEndian>,
    tis_lst_sz:                         U32<BigEndian>,
    _padding2:                          [u8; 8],
    tis_num_0:                          U32<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<SendQueueContext>(), 48);

impl fmt::Debug for SendQueueContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SendQueueContext")
            .field("rlky_state", &self.rlky_state.get())
            .field("cqn", &self.cqn.get())
            .field("tis_list_sz", &self.tis_lst_sz.get())
            .field("tis_num_0", &self.tis_num_0.get())
            .finish()
    }
}

/// The states a send or receive queue moves through with MODIFY_SQ / MODIFY_RQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Reset = 0x0,
    Ready = 0x1,
    Error = 0x3
}

const QUEUE_STATE_SHIFT: u32 = 20;
const QUEUE_STATE_MASK: u32 = 0xF << QUEUE_STATE_SHIFT;

impl SendQueueContext {
    pub fn init(&mut self, cqn: u32, tisn: u32) {
        *self = SendQueueContext::default();
        self.rlky_state.set((1 << 31) | (1 << 29) | (1 << 28) | (1 << 24)); // enable reserved lkey | fast register enable | flush in error WQEs | min_wqe_inline_mode
        self.cqn.set(cqn & QUEUE_NUMBER_MASK);
        self.tis_lst_sz.set(1 << 16);
        self.tis_num_0.set(tisn & QUEUE_NUMBER_MASK);
    }

    pub fn set_state(&mut self, next_state: QueueState) {
        let state = self.rlky_state.get() & !QUEUE_STATE_MASK;
        self.rlky_state.set(state | ((next_state as u32) << QUEUE_STATE_SHIFT));
    }

    pub fn get_state(&self) -> u8 {
        ((self.rlky_state.get() & QUEUE_STATE_MASK) >> QUEUE_STATE_SHIFT) as u8
    }

    pub fn cqn(&self) -> u32 {
        self.cqn.get()
    }

    pub fn tisn(&self) -> u32 {
        self.tis_num_0.get()
    }
}

/// The full send queue context passed in CREATE_SQ and MODIFY_SQ: the SQ fields followed by the work queue.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct SendQueueContextWithWorkQueue {
    pub sq: SendQueueContext,
    pub wq: WorkQueue,
}

const_assert_eq!(core::mem::size_of::<SendQueueContextWithWorkQueue>(), 240);


/// A data segment pointing at one contiguous piece of the packet.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone, Default)]
#[repr(C)]
pub struct SendQueueDataSegment {
    byte_count:     U32<BigEndian>,
    lkey:           U32<BigEndian>,
    address:        U64<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<SendQueueDataSegment>(), 16);

impl SendQueueDataSegment {
    pub fn set(&mut self, address: DeviceAddress, byte_count: u32, lkey: u32) {
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


/// The first basic block of a send WQE.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone)]
#[repr(C)]
pub struct SendQueueEntry {
    // control segment
    opcode_index:           U32<BigEndian>,
    ds_sq_num:              U32<BigEndian>,
    signature:              U32<BigEndian>,
    mkey:                   U32<BigEndian>,
    // ethernet segment
    _padding1:              [u8; 4],
    mss_csum:               U32<BigEndian>,
    _padding2:              [u8; 4],
    inline_header_size:     U16<BigEndian>,
    inline_headers:         [u8; INLINE_HEADER_SIZE],
    // first data segment
    data:                   SendQueueDataSegment,
}

const_assert_eq!(core::mem::size_of::<SendQueueEntry>(), 64);

impl SendQueueEntry {
    /// Fills in the control and Ethernet segments of a send.
    ///
    /// # Arguments
    /// * `producer_counter`: the SQ counter of this WQE's first basic block
    /// * `sqn`: send queue number
    /// * `headers`: the first [`INLINE_HEADER_SIZE`] bytes of the packet
    /// * `num_segments`: number of data segments that follow the Ethernet segment
    pub fn init_send(&mut self, producer_counter: u32, sqn: u32, headers: &[u8; INLINE_HEADER_SIZE], num_segments: usize) {
        *self = SendQueueEntry::new_zeroed();
        self.opcode_index.set(SEND_OPCODE | ((producer_counter & WQ_COUNTER_MASK) << 8));
        self.ds_sq_num.set(((sqn & QUEUE_NUMBER_MASK) << 8) | (num_segments as u32 + CTRL_ETH_DS_COUNT));
        self.signature.set(CE_CQE_ALWAYS);
        self.inline_header_size.set(INLINE_HEADER_SIZE as u16);
        self.inline_headers.copy_from_slice(headers);
    }

    pub fn data_segment_mut(&mut self) -> &mut SendQueueDataSegment {
        &mut self.data
    }

    pub fn data_segment(&self) -> &SendQueueDataSegment {
        &self.data
    }

    pub fn opcode_index(&self) -> u32 {
        self.opcode_index.get()
    }

    pub fn ds_sq_num(&self) -> u32 {
        self.ds_sq_num.get()
    }

    pub fn inline_headers(&self) -> &[u8; INLINE_HEADER_SIZE] {
        &self.inline_headers
    }

    /// The first 8 bytes of the WQE, which are copied to the blue-flame buffer.
    pub fn head(&self) -> [u8; 8] {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.as_bytes()[..8]);
        head
    }
}

impl fmt::Debug for SendQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SendQueueEntry")
            .field("opcode_index", &self.opcode_index.get())
            .field("ds_sq_num", &self.ds_sq_num.get())
            .field("signature", &self.signature.get())
            .field("inline_header_size", &self.inline_header_size.get())
            .field("data byte count", &self.data.byte_count())
            .finish()
    }
}

/// A continuation basic block of a send WQE, holding only data segments.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct SendQueueSpillSlot {
    pub segments: [SendQueueDataSegment; SEGMENTS_PER_SLOT],
}

const_assert_eq!(core::mem::size_of::<SendQueueSpillSlot>(), 64);


/// Returns the number of basic blocks a send with `num_segments` data segments occupies.
pub const fn slots_for_segments(num_segments: usize) -> usize {
    if num_segments > 1 {
        1 + (num_segments + 2) / SEGMENTS_PER_SLOT
    } else {
        1
    }
}


/// A send queue: the WQE ring, its doorbell record, and the blue-flame buffer it rings.
pub struct SendQueue {
    entries: DescriptorRing<SendQueueEntry>,
    doorbell: DmaRegion,
    sqn: u32,
    /// Offset of the blue-flame buffer half to write next
    bf_offset: usize,
    bf_size: usize,
}

impl SendQueue {
    /// Allocates a send queue of `2^log_size` basic blocks.
    pub fn new(allocator: &Arc<dyn DmaAllocator>, log_size: u32, bf_size: usize) -> Result<SendQueue, DmaError> {
        let entries = DescriptorRing::new(allocator, log_size)?;
        let doorbell = create_contiguous_mapping(allocator, 64, 64)?;
        doorbell.as_type::<DoorbellRecord>(0)?;
        let bf_size = if bf_size == 0 { DEFAULT_BF_SIZE } else { bf_size };
        Ok(SendQueue { entries, doorbell, sqn: 0, bf_offset: 0, bf_size })
    }

    pub fn set_sqn(&mut self, sqn: u32) {
        self.sqn = sqn & QUEUE_NUMBER_MASK;
    }

    pub fn sqn(&self) -> u32 {
        self.sqn
    }

    pub fn size(&self) -> usize {
        self.entries.size()
    }

    pub fn log_size(&self) -> u32 {
        self.entries.log_size()
    }

    pub fn ring(&self) -> &DescriptorRing<SendQueueEntry> {
        &self.entries
    }

    pub fn page_addresses(&self) -> alloc::vec::Vec<DeviceAddress> {
        self.entries.page_addresses()
    }

    pub fn doorbell_address(&self) -> DeviceAddress {
        self.doorbell.device_address()
    }

    pub fn doorbell_record(&self) -> Result<&DoorbellRecord, DmaError> {
        self.doorbell.as_type::<DoorbellRecord>(0)
    }

    /// The blue-flame buffer offset the next doorbell will use.
    pub fn blueflame_offset(&self) -> usize {
        self.bf_offset
    }

    /// Writes one send WQE starting at `producer_counter` and returns the number of basic blocks it used.
    /// The caller must have checked that that many blocks are free.
    ///
    /// `segments` are the (address, length) pairs of the packet data that follows the inlined header.
    pub fn post_send(
        &mut self,
        producer_counter: u32,
        headers: &[u8; INLINE_HEADER_SIZE],
        segments: &[(DeviceAddress, u32)],
        lkey: u32,
    ) -> Result<usize, DmaError> {
        if segments.len() > MAX_SEGMENTS {
            return Err(DmaError::InvalidLayout);
        }
        let sqn = self.sqn;
        {
            let entry = self.entries.entry_mut(producer_counter);
            entry.init_send(producer_counter, sqn, headers, segments.len());
            if let Some(&(addr, len)) = segments.first() {
                entry.data_segment_mut().set(addr, len, lkey);
            }
        }

        for (i, &(addr, len)) in segments.iter().enumerate().skip(1) {
            let slot = producer_counter.wrapping_add(1 + ((i - 1) / SEGMENTS_PER_SLOT) as u32);
            let index = (i - 1) % SEGMENTS_PER_SLOT;
            let spill = self.entries.slot_as_mut::<SendQueueSpillSlot>(slot)?;
            if index == 0 {
                *spill = SendQueueSpillSlot::new_zeroed();
            }
            spill.segments[index].set(addr, len, lkey);
        }

        Ok(slots_for_segments(segments.len()))
    }

    /// Tells the device about everything posted up to `producer_counter`.
    ///
    /// The doorbell record is updated first, then the head of the last WQE (the one at `last_wqe`)
    /// is written through the blue-flame buffer, whose two halves alternate between calls.
    pub fn ring_doorbell(&mut self, uar: &Uar, producer_counter: u32, last_wqe: u32) -> Result<(), DmaError> {
        self.entries.sync_for_device();
        self.doorbell.as_type_mut::<DoorbellRecord>(0)?.set_send_counter(producer_counter);
        self.doorbell.sync_for_device();

        let head = self.entries.entry(last_wqe).head();
        uar.write_blueflame(self.bf_offset, head);
        self.bf_offset ^= self.bf_size;
        Ok(())
    }
}

impl fmt::Debug for SendQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SendQueue")
            .field("sqn", &self.sqn)
            .field("entries", &self.entries)
            .field("bf_offset", &self.bf_offset)
            .finish()
    }
}
