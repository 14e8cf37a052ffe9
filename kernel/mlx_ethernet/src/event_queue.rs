//! Event queues (EQs) carry asynchronous events from the device:
//! completion notifications for CQs, port state changes, page requests and errors.
//! (PRM Section 8.20: Event Queues)

use alloc::sync::Arc;
use core::convert::TryFrom;
use core::fmt;
use dma_region::{DmaAllocator, DmaError};
use num_enum::TryFromPrimitive;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use crate::ring::{advance, DescriptorRing, OwnedEntry};
use crate::uar::Uar;
use crate::{LOG_QUEUE_SIZE_MASK, LOG_QUEUE_SIZE_SHIFT, QUEUE_NUMBER_MASK, UAR_MASK};


/// The context firmware needs to create an event queue.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Default)]
#[repr(C)]
pub struct EventQueueContext {
    status:             U32<BigEndian>,
    _padding1:          [u8; 4],
    page_offset:        U32<BigEndian>,
    uar_log_eq_size:    U32<BigEndian>,
    _padding2:          [u8; 4],
    intr:               U32<BigEndian>,
    log_pg_size:        U32<BigEndian>,
    _padding3:          [u8; 12],
    consumer_counter:   U32<BigEndian>,
    producer_counter:   U32<BigEndian>,
    _padding4:          [u8; 16],
}

const_assert_eq!(core::mem::size_of::<EventQueueContext>(), 64);

impl EventQueueContext {
    /// # Arguments
    /// * `uar_page`: UAR page whose doorbells serve this EQ
    /// * `log_eq_size`: log2 of the number of entries
    /// * `intr`: the MSI-X vector events are signalled on
    pub fn init(&mut self, uar_page: u32, log_eq_size: u32, intr: u32) {
        *self = EventQueueContext::default();
        let uar = uar_page & UAR_MASK;
        let size = (log_eq_size & LOG_QUEUE_SIZE_MASK) << LOG_QUEUE_SIZE_SHIFT;
        self.uar_log_eq_size.set(uar | size);
        self.intr.set(intr);
        self.log_pg_size.set(0);
    }

    pub fn log_eq_size(&self) -> u32 {
        (self.uar_log_eq_size.get() >> LOG_QUEUE_SIZE_SHIFT) & LOG_QUEUE_SIZE_MASK
    }
}


/// Event types reported in an EQE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum EventType {
    Completion          = 0x00,
    CqError             = 0x04,
    InternalError       = 0x08,
    PortChange          = 0x09,
    CmdCompletion       = 0x0A,
    PageRequest         = 0x0B,
    LastWqeReached      = 0x13,
}

impl EventType {
    /// The bit of the event bitmask given to CREATE_EQ that subscribes to this event.
    pub fn mask(self) -> u64 {
        1 << (self as u8)
    }
}


/// A 64-byte event queue entry.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone)]
#[repr(C)]
pub struct EventQueueEntry {
    _padding1:          u8,
    event_type:         u8,
    _padding2:          u8,
    event_sub_type:     u8,
    _padding3:          [u8; 28],
    event_data:         [U32<BigEndian>; 7],
    _padding4:          [u8; 2],
    signature:          u8,
    owner:              u8,
}

const_assert_eq!(core::mem::size_of::<EventQueueEntry>(), 64);

impl OwnedEntry for EventQueueEntry {
    const OWNER_OFFSET: usize = 63;
    const INITIAL_OWNER_BYTE: u8 = crate::HW_OWNERSHIP;
}

impl EventQueueEntry {
    /// The raw event type.
    pub fn event_type(&self) -> u8 {
        self.event_type
    }

    pub fn event_sub_type(&self) -> u8 {
        self.event_sub_type
    }

    /// One of the seven big-endian data words of the event.
    pub fn event_data(&self, word: usize) -> Option<u32> {
        self.event_data.get(word).map(|w| w.get())
    }

    /// The CQ number of a completion event.
    pub fn cqn(&self) -> u32 {
        self.event_data[6].get() & QUEUE_NUMBER_MASK
    }

    pub fn owner(&self) -> u8 {
        self.owner & 1
    }

    pub fn signature(&self) -> u8 {
        self.signature
    }

    #[cfg(any(test, feature = "sim"))]
    pub(crate) fn fill(&mut self, event_type: u8, sub_type: u8, data: [u32; 7], owner: u8) {
        *self = EventQueueEntry::new_zeroed();
        self.event_type = event_type;
        self.event_sub_type = sub_type;
        for (dst, src) in self.event_data.iter_mut().zip(data.iter()) {
            dst.set(*src);
        }
        self.owner = owner & 1;
    }
}

impl fmt::Debug for EventQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventQueueEntry")
            .field("event_type", &EventType::try_from(self.event_type).ok())
            .field("event_sub_type", &self.event_sub_type)
            .field("data", &[
                self.event_data[0].get(), self.event_data[1].get(), self.event_data[2].get(),
                self.event_data[3].get(), self.event_data[4].get(), self.event_data[5].get(),
                self.event_data[6].get(),
            ])
            .field("owner", &self.owner)
            .finish()
    }
}


/// An event queue: the EQE ring and its consumer counter.
pub struct EventQueue {
    entries: DescriptorRing<EventQueueEntry>,
    eqn: u32,
    consumer_counter: u32,
}

impl EventQueue {
    pub fn new(allocator: &Arc<dyn DmaAllocator>, log_size: u32) -> Result<EventQueue, DmaError> {
        let mut entries = DescriptorRing::new(allocator, log_size)?;
        entries.init_ownership();
        Ok(EventQueue { entries, eqn: 0, consumer_counter: 0 })
    }

    pub fn set_eqn(&mut self, eqn: u32) {
        self.eqn = eqn;
    }

    pub fn eqn(&self) -> u32 {
        self.eqn
    }

    pub fn log_size(&self) -> u32 {
        self.entries.log_size()
    }

    pub fn consumer_counter(&self) -> u32 {
        self.consumer_counter
    }

    pub fn ring(&self) -> &DescriptorRing<EventQueueEntry> {
        &self.entries
    }

    pub fn ring_mut(&mut self) -> &mut DescriptorRing<EventQueueEntry> {
        &mut self.entries
    }

    /// Returns and consumes the next event, if the device has written one.
    pub fn next_entry(&mut self) -> Option<EventQueueEntry> {
        let entry = self.entries.peek(self.consumer_counter).cloned()?;
        self.consumer_counter = advance(self.consumer_counter);
        Some(entry)
    }

    /// Publishes the consumer counter and re-arms the EQ.
    pub fn arm(&self, uar: &Uar) {
        uar.arm_eq(self.eqn, self.consumer_counter);
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("eqn", &self.eqn)
            .field("entries", &self.entries)
            .field("consumer_counter", &self.consumer_counter)
            .finish()
    }
}
