//! Completion queues (CQs) are rings the device writes a completion queue entry (CQE) into
//! whenever it finishes a send or receive work request.
//! (PRM Section 8.19: Completion Queues)

use alloc::sync::Arc;
use bit_field::BitField;
use core::convert::TryFrom;
use core::fmt;
use dma_region::{create_contiguous_mapping, DeviceAddress, DmaAllocator, DmaError, DmaRegion};
use num_enum::TryFromPrimitive;
use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use crate::ring::{advance, DescriptorRing, OwnedEntry};
use crate::uar::Uar;
use crate::{LOG_QUEUE_SIZE_MASK, LOG_QUEUE_SIZE_SHIFT, QUEUE_NUMBER_MASK, UAR_MASK};

/// CQ consumer counters are 24 bits wide in doorbells.
pub const CQ_CONSUMER_MASK: u32 = 0xFF_FFFF;


/// The context firmware needs to create a completion queue.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct CompletionQueueContext {
    status:                 U32<BigEndian>,
    _padding1:              [u8; 4],
    page_offset:            U32<BigEndian>,
    uar_log_cq_size:        U32<BigEndian>,
    cq_period_max_count:    U32<BigEndian>,
    c_eqn:                  U32<BigEndian>,
    log_page_size:          U32<BigEndian>,
    _padding2:              [u8; 4],
    last_notified_index:    U32<BigEndian>,
    last_solicit_index:     U32<BigEndian>,
    consumer_counter:       U32<BigEndian>,
    producer_counter:       U32<BigEndian>,
    _padding3:              [u8; 8],
    dbr_addr_h:             U32<BigEndian>,
    dbr_addr_l:             U32<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<CompletionQueueContext>(), 64);

impl CompletionQueueContext {
    /// # Arguments
    /// * `uar_page`: UAR page whose doorbell serves this CQ
    /// * `log_cq_size`: log2 of the number of entries
    /// * `c_eqn`: the event queue completion events are reported on
    /// * `db_addr`: device address of the CQ doorbell record
    /// * `period`: moderation period in microseconds, 0 disables it
    /// * `max_count`: number of completions that trigger an event regardless of the period, 0 disables it
    pub fn init(&mut self, uar_page: u32, log_cq_size: u32, c_eqn: u32, db_addr: DeviceAddress, period: u16, max_count: u16) {
        *self = CompletionQueueContext::default();
        let uar = uar_page & UAR_MASK;
        let size = (log_cq_size & LOG_QUEUE_SIZE_MASK) << LOG_QUEUE_SIZE_SHIFT;
        self.uar_log_cq_size.set(uar | size);
        self.cq_period_max_count.set(((period as u32) << 16) | max_count as u32);
        self.c_eqn.set(c_eqn);
        self.dbr_addr_h.set(db_addr.high());
        self.dbr_addr_l.set(db_addr.low());
    }

    pub fn log_cq_size(&self) -> u32 {
        (self.uar_log_cq_size.get() >> LOG_QUEUE_SIZE_SHIFT) & LOG_QUEUE_SIZE_MASK
    }

    pub fn c_eqn(&self) -> u32 {
        self.c_eqn.get()
    }
}


/// Opcodes in the top nibble of the last byte of a CQE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CompletionQueueOpcode {
    Requester                           = 0x0,
    ResponderRDMAWriteWithImmediate     = 0x1,
    ResponderSend                       = 0x2,
    ResponderSendWithImmediate          = 0x3,
    ResponderSendWithInvalidate         = 0x4,
    ResizeCq                            = 0x5,
    SignatureError                      = 0xC,
    RequesterError                      = 0xD,
    ResponderError                      = 0xE,
    InvalidCQE                          = 0xF,
}

/// The receive was checked and the L4 checksum is valid.
pub const CQE_L4_OK:        u32 = 1 << 26;
/// The receive was checked and the L3 checksum is valid.
pub const CQE_L3_OK:        u32 = 1 << 25;
pub const CQE_L2_OK:        u32 = 1 << 24;
/// A VLAN tag was stripped; its value is in the low 16 bits of the flags.
pub const CQE_CV:           u32 = 1 << 16;
pub const CQE_VLAN_MASK:    u32 = 0xFFFF;

const CQE_OWNER_OFFSET:             usize = 0x3F;
const CQE_VENDOR_SYNDROME_OFFSET:   usize = 0x36;
const CQE_SYNDROME_OFFSET:          usize = 0x37;


/// A 64-byte completion queue entry.
/// Only the fields that Ethernet send and receive completions use are broken out.
/// Error completions reuse bytes 0x36 and 0x37 for their syndromes.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone)]
#[repr(C)]
pub struct CompletionQueueEntry {
    _padding1:              [u8; 12],
    rx_hash:                U32<BigEndian>,
    rx_hash_type:           u8,
    _padding2:              [u8; 11],
    flags:                  U32<BigEndian>,
    _padding3:              [u8; 12],
    byte_count:             U32<BigEndian>,
    timestamp:              U64<BigEndian>,
    rx_drops:               u8,
    flow_tag:               [u8; 3],
    wqe_counter:            U16<BigEndian>,
    _signature:             u8,
    opcode_owner:           u8,
}

const_assert_eq!(core::mem::size_of::<CompletionQueueEntry>(), 64);

impl OwnedEntry for CompletionQueueEntry {
    const OWNER_OFFSET: usize = CQE_OWNER_OFFSET;
    const INITIAL_OWNER_BYTE: u8 = ((CompletionQueueOpcode::InvalidCQE as u8) << 4) | crate::HW_OWNERSHIP;
}

impl CompletionQueueEntry {
    /// Returns the raw opcode of the CQE.
    pub fn opcode(&self) -> u8 {
        self.opcode_owner.get_bits(4..8)
    }

    pub fn owner(&self) -> u8 {
        self.opcode_owner & 1
    }

    /// The counter of the work queue entry this completion is for.
    pub fn wqe_counter(&self) -> u16 {
        self.wqe_counter.get()
    }

    pub fn byte_count(&self) -> u32 {
        self.byte_count.get()
    }

    pub fn rx_hash(&self) -> u32 {
        self.rx_hash.get()
    }

    /// Zero when the receive was not hashed.
    pub fn rx_hash_type(&self) -> u8 {
        self.rx_hash_type
    }

    pub fn flags(&self) -> u32 {
        self.flags.get()
    }

    pub fn l3_ok(&self) -> bool {
        self.flags.get() & CQE_L3_OK != 0
    }

    pub fn l4_ok(&self) -> bool {
        self.flags.get() & CQE_L4_OK != 0
    }

    /// The stripped VLAN tag, if there was one.
    pub fn vlan(&self) -> Option<u16> {
        let flags = self.flags.get();
        if flags & CQE_CV != 0 {
            Some((flags & CQE_VLAN_MASK) as u16)
        } else {
            None
        }
    }

    /// Raw device timestamp, in device timer ticks.
    pub fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }

    pub fn rx_drops(&self) -> u8 {
        self.rx_drops
    }

    pub fn flow_tag(&self) -> u32 {
        u32::from_be_bytes([0, self.flow_tag[0], self.flow_tag[1], self.flow_tag[2]])
    }

    pub fn error_syndrome(&self) -> u8 {
        self.as_bytes()[CQE_SYNDROME_OFFSET]
    }

    pub fn vendor_error_syndrome(&self) -> u8 {
        self.as_bytes()[CQE_VENDOR_SYNDROME_OFFSET]
    }

    #[cfg(any(test, feature = "sim"))]
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn fill(
        &mut self,
        opcode: u8,
        owner: u8,
        wqe_counter: u16,
        byte_count: u32,
        rx_hash: u32,
        rx_hash_type: u8,
        flags: u32,
        timestamp: u64,
        syndrome: u8,
    ) {
        *self = CompletionQueueEntry::new_zeroed();
        self.rx_hash.set(rx_hash);
        self.rx_hash_type = rx_hash_type;
        self.flags.set(flags);
        self.byte_count.set(byte_count);
        self.timestamp.set(timestamp);
        if syndrome != 0 {
            self.as_bytes_mut()[CQE_SYNDROME_OFFSET] = syndrome;
        }
        self.wqe_counter.set(wqe_counter);
        self.opcode_owner = (opcode << 4) | (owner & 1);
    }
}

impl fmt::Debug for CompletionQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompletionQueueEntry")
            .field("opcode", &CompletionQueueOpcode::try_from(self.opcode()).ok())
            .field("owner", &self.owner())
            .field("wqe_counter", &self.wqe_counter())
            .field("byte_count", &self.byte_count())
            .field("flags", &self.flags())
            .finish()
    }
}


/// The doorbell record of a CQ.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct CompletionQueueDoorbellRecord {
    update_ci:          U32<BigEndian>,
    arm_ci:             U32<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<CompletionQueueDoorbellRecord>(), 8);

impl CompletionQueueDoorbellRecord {
    pub fn update_ci(&self) -> u32 {
        self.update_ci.get()
    }

    pub fn arm_ci(&self) -> u32 {
        self.arm_ci.get()
    }
}

/// Doorbell records are placed on their own cache line.
const DOORBELL_RECORD_ALIGN: usize = 64;

/// The arm command in bits 25:24 of the arm value: request an event for the next completion.
const CQ_ARM_CMD_NEXT: u32 = 0;


/// A completion queue: the CQE ring plus its doorbell record and consumer state.
pub struct CompletionQueue {
    entries: DescriptorRing<CompletionQueueEntry>,
    doorbell: DmaRegion,
    /// CQ number assigned by firmware at creation
    cqn: u32,
    consumer_counter: u32,
    /// Arm sequence number; 2 bits of it go into every arm request.
    arm_count: u32,
}

impl CompletionQueue {
    /// Allocates and initializes a CQ of `2^log_size` entries.
    /// The queue number is filled in with [`set_cqn()`](#method.set_cqn) once firmware has created it.
    pub fn new(allocator: &Arc<dyn DmaAllocator>, log_size: u32) -> Result<CompletionQueue, DmaError> {
        let mut entries = DescriptorRing::new(allocator, log_size)?;
        entries.init_ownership();
        let doorbell = create_contiguous_mapping(allocator, DOORBELL_RECORD_ALIGN, DOORBELL_RECORD_ALIGN)?;
        doorbell.as_type::<CompletionQueueDoorbellRecord>(0)?;
        Ok(CompletionQueue { entries, doorbell, cqn: 0, consumer_counter: 0, arm_count: 0 })
    }

    pub fn set_cqn(&mut self, cqn: u32) {
        self.cqn = cqn & QUEUE_NUMBER_MASK;
    }

    pub fn cqn(&self) -> u32 {
        self.cqn
    }

    pub fn log_size(&self) -> u32 {
        self.entries.log_size()
    }

    pub fn consumer_counter(&self) -> u32 {
        self.consumer_counter
    }

    pub fn arm_count(&self) -> u32 {
        self.arm_count
    }

    pub fn ring(&self) -> &DescriptorRing<CompletionQueueEntry> {
        &self.entries
    }

    pub fn ring_mut(&mut self) -> &mut DescriptorRing<CompletionQueueEntry> {
        &mut self.entries
    }

    pub fn doorbell_address(&self) -> DeviceAddress {
        self.doorbell.device_address()
    }

    pub fn doorbell_record(&self) -> Result<&CompletionQueueDoorbellRecord, DmaError> {
        self.doorbell.as_type::<CompletionQueueDoorbellRecord>(0)
    }

    /// Returns a copy of the next CQE if the device has written it.
    pub fn peek(&self) -> Option<CompletionQueueEntry> {
        self.entries.peek(self.consumer_counter).cloned()
    }

    /// Consumes the current CQE.
    pub fn advance(&mut self) {
        self.consumer_counter = advance(self.consumer_counter);
    }

    /// Computes the value written to the `arm_ci` field and the UAR doorbell.
    pub fn arm_value(&self) -> u32 {
        ((self.arm_count & 0x3) << 28) | (CQ_ARM_CMD_NEXT << 24) | (self.consumer_counter & CQ_CONSUMER_MASK)
    }

    /// Publishes the consumer counter and requests an event for the next completion.
    pub fn arm(&mut self, uar: &Uar) -> Result<(), DmaError> {
        let val = self.arm_value();
        let consumer = self.consumer_counter & CQ_CONSUMER_MASK;
        {
            let record = self.doorbell.as_type_mut::<CompletionQueueDoorbellRecord>(0)?;
            record.update_ci.set(consumer);
            record.arm_ci.set(val);
        }
        self.doorbell.sync_for_device();
        uar.ring_cq_doorbell(self.cqn, val);
        Ok(())
    }

    /// Bumps the arm sequence number, then arms.
    /// Used after every drain; the first arm after creation uses sequence number 0.
    pub fn rearm(&mut self, uar: &Uar) -> Result<(), DmaError> {
        self.arm_count = self.arm_count.wrapping_add(1);
        self.arm(uar)
    }
}

impl fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("cqn", &self.cqn)
            .field("entries", &self.entries)
            .field("consumer_counter", &self.consumer_counter)
            .field("arm_count", &self.arm_count)
            .finish()
    }
}
