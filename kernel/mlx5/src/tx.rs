//! The send path: posting packets to the send queue and reclaiming the slots of finished sends.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use dma_region::{DmaAllocator, DmaError};
use mlx_ethernet::completion_queue::CompletionQueueEntry;
use mlx_ethernet::send_queue::{slots_for_segments, SendQueue, INLINE_HEADER_SIZE, MAX_SEGMENTS, MAX_SLOTS_PER_SEND};
use mlx_ethernet::Uar;
use nic_buffers::TransmitBuffer;
use crate::slot_table::SlotTable;
use crate::stats::Statistics;


/// The reasons a single packet can't be posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The packet is shorter than the header that is inlined into every send.
    TooShort,
    /// The slot the send would start at still holds an earlier send.
    SlotBusy,
    Dma(DmaError),
}

impl From<DmaError> for SendError {
    fn from(e: DmaError) -> Self {
        SendError::Dma(e)
    }
}

impl From<SendError> for &'static str {
    fn from(error: SendError) -> Self {
        match error {
            SendError::TooShort => "packet is shorter than the inline header",
            SendError::SlotBusy => "send queue slot is still in use",
            SendError::Dma(e) => e.into(),
        }
    }
}


/// A packet that has been posted and not yet completed.
struct PostedSend {
    /// Held until the NIC has read the packet
    _buffer: TransmitBuffer,
    num_segments: usize,
}

/// A send queue together with the packets posted to it.
pub struct TxRing {
    queue: SendQueue,
    slots: SlotTable<PostedSend>,
    producer_counter: u32,
    consumer_counter: u32,
    /// Set when posting stopped because the ring was full
    blocked: bool,
    allocator: Arc<dyn DmaAllocator>,
    lkey: u32,
}

impl TxRing {
    pub fn new(queue: SendQueue, allocator: Arc<dyn DmaAllocator>, lkey: u32) -> TxRing {
        let size = queue.size();
        TxRing {
            queue,
            slots: SlotTable::new(size),
            producer_counter: 0,
            consumer_counter: 0,
            blocked: false,
            allocator,
            lkey,
        }
    }

    pub fn queue(&self) -> &SendQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut SendQueue {
        &mut self.queue
    }

    pub fn producer_counter(&self) -> u32 {
        self.producer_counter
    }

    pub fn consumer_counter(&self) -> u32 {
        self.consumer_counter
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Number of packets posted and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn set_lkey(&mut self, lkey: u32) {
        self.lkey = lkey;
    }

    /// Number of slots the producer may still use.
    pub fn free_slots(&self) -> u32 {
        self.consumer_counter
            .wrapping_add(self.queue.size() as u32)
            .wrapping_sub(self.producer_counter)
    }

    /// Posts queued packets until the queue runs dry or the ring is too full to take a maximum-size send,
    /// then rings the doorbell once for everything posted.
    ///
    /// Packets that can't be posted are dropped and counted.
    /// Returns the number of packets posted.
    pub fn start(&mut self, pending: &mut VecDeque<TransmitBuffer>, uar: &Uar, stats: &mut Statistics) -> Result<usize, DmaError> {
        let free = self.free_slots() as usize;
        let mut used = 0;
        let mut posted = 0;
        let mut last_wqe = None;

        loop {
            if pending.is_empty() {
                break;
            }
            if used + MAX_SLOTS_PER_SEND >= free {
                self.blocked = true;
                stats.tx_blocked += 1;
                break;
            }
            let buffer = match pending.pop_front() {
                Some(buffer) => buffer,
                None => break,
            };
            let length = buffer.length();
            let first = self.producer_counter;
            match self.post(buffer, stats) {
                Ok(slots) => {
                    used += slots;
                    posted += 1;
                    last_wqe = Some(first);
                    stats.tx_packets += 1;
                    stats.tx_bytes += length as u64;
                }
                Err(e) => {
                    debug!("TxRing::start(): dropping a {} byte packet: {:?}", length, e);
                    if e == SendError::TooShort {
                        stats.tx_too_short += 1;
                    }
                    stats.tx_dropped += 1;
                }
            }
        }

        if let Some(last_wqe) = last_wqe {
            self.queue.ring_doorbell(uar, self.producer_counter, last_wqe)?;
        }
        Ok(posted)
    }

    /// Writes one packet into the send queue at the producer counter and advances it.
    /// Returns the number of slots the send used.
    fn post(&mut self, buffer: TransmitBuffer, stats: &mut Statistics) -> Result<usize, SendError> {
        if buffer.length() < INLINE_HEADER_SIZE {
            return Err(SendError::TooShort);
        }
        let index = self.slots.index_of(self.producer_counter);
        if self.slots.is_occupied(index) {
            return Err(SendError::SlotBusy);
        }

        let buffer = if buffer.dma_segments_after(INLINE_HEADER_SIZE).len() > MAX_SEGMENTS {
            stats.tx_coalesced += 1;
            buffer.coalesce(&self.allocator)?
        } else {
            buffer
        };

        let mut headers = [0u8; INLINE_HEADER_SIZE];
        buffer.copy_prefix(&mut headers);
        buffer.sync_for_device();
        let segments = buffer.dma_segments_after(INLINE_HEADER_SIZE);

        let slots = self.queue.post_send(self.producer_counter, &headers, &segments, self.lkey)?;
        let send = PostedSend { _buffer: buffer, num_segments: segments.len() };
        if self.slots.insert(index, send).is_err() {
            return Err(SendError::SlotBusy);
        }
        self.producer_counter = self.producer_counter.wrapping_add(slots as u32);
        Ok(slots)
    }

    /// Releases the packet a send completion refers to.
    /// Returns the number of slots its send occupied, or zero if nothing was posted in that slot.
    pub fn complete(&mut self, cqe: &CompletionQueueEntry) -> usize {
        let index = self.slots.index_of(cqe.wqe_counter() as u32);
        match self.slots.take(index) {
            Some(send) => slots_for_segments(send.num_segments),
            None => {
                warn!("TxRing::complete(): no send posted in slot {}", index);
                0
            }
        }
    }

    /// Moves the consumer counter past `freed` slots.
    ///
    /// Returns true if posting had been blocked and should be restarted.
    pub fn reclaim(&mut self, freed: usize) -> bool {
        if freed == 0 {
            return false;
        }
        self.consumer_counter = self.consumer_counter.wrapping_add(freed as u32);
        if self.blocked {
            self.blocked = false;
            true
        } else {
            false
        }
    }

    /// Drops every posted packet. Only call this once the NIC can no longer read them.
    pub fn release_all(&mut self) {
        let released = self.slots.drain();
        if !released.is_empty() {
            debug!("TxRing::release_all(): dropping {} sends", released.len());
        }
    }
}

impl core::fmt::Debug for TxRing {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("TxRing")
            .field("queue", &self.queue)
            .field("slots", &self.slots)
            .field("producer_counter", &self.producer_counter)
            .field("consumer_counter", &self.consumer_counter)
            .field("blocked", &self.blocked)
            .finish()
    }
}
