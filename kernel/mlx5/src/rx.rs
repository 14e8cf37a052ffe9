//! The receive path: keeping the receive queue stocked with buffers and detaching filled ones.

use alloc::sync::Arc;
use dma_region::{DmaAllocator, DmaError};
use mlx_ethernet::completion_queue::CompletionQueueEntry;
use mlx_ethernet::receive_queue::ReceiveQueue;
use nic_buffers::ReceiveBuffer;
use crate::calibration::Calibrator;
use crate::rx_accounting::RxSlotAccounting;
use crate::slot_table::SlotTable;

/// Low watermark of posted receive buffers.
const RX_LOW_WATERMARK: u32 = 1;


/// A receive queue together with the buffers posted to it.
pub struct RxRing {
    queue: ReceiveQueue,
    slots: SlotTable<ReceiveBuffer>,
    producer_counter: u32,
    accounting: RxSlotAccounting,
    allocator: Arc<dyn DmaAllocator>,
    buffer_size: usize,
    lkey: u32,
    /// The tick at which a refill should be retried, if one is pending
    refill_retry: Option<u64>,
}

impl RxRing {
    pub fn new(queue: ReceiveQueue, allocator: Arc<dyn DmaAllocator>, buffer_size: usize, lkey: u32) -> RxRing {
        let size = queue.size();
        RxRing {
            queue,
            slots: SlotTable::new(size),
            producer_counter: 0,
            accounting: RxSlotAccounting::new(RX_LOW_WATERMARK, size as u32),
            allocator,
            buffer_size,
            lkey,
            refill_retry: None,
        }
    }

    pub fn queue(&self) -> &ReceiveQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ReceiveQueue {
        &mut self.queue
    }

    pub fn producer_counter(&self) -> u32 {
        self.producer_counter
    }

    /// Number of buffers currently posted to the NIC.
    pub fn posted(&self) -> usize {
        self.slots.len()
    }

    pub fn accounting(&self) -> &RxSlotAccounting {
        &self.accounting
    }

    pub fn set_lkey(&mut self, lkey: u32) {
        self.lkey = lkey;
    }

    /// Posts up to `max` new receive buffers and rings the receive doorbell once if any were posted.
    ///
    /// Stops early if a buffer can't be allocated.
    /// Returns the number of buffers posted.
    pub fn fill_slots(&mut self, max: u32) -> Result<u32, DmaError> {
        let mut posted = 0;
        while posted < max {
            let index = self.slots.index_of(self.producer_counter);
            if self.slots.is_occupied(index) {
                warn!("RxRing::fill_slots(): slot {} is still posted", index);
                break;
            }
            let buffer = match ReceiveBuffer::new(&self.allocator, self.buffer_size) {
                Ok(buffer) => buffer,
                Err(e) => {
                    debug!("RxRing::fill_slots(): could only post {} of {} buffers: {:?}", posted, max, e);
                    break;
                }
            };
            let (address, capacity) = (buffer.device_address(), buffer.capacity() as u32);
            if self.slots.insert(index, buffer).is_err() {
                break;
            }
            self.queue.post(self.producer_counter, address, capacity, self.lkey);
            self.producer_counter = self.producer_counter.wrapping_add(1);
            posted += 1;
        }

        if posted > 0 {
            self.queue.ring_doorbell(self.producer_counter)?;
        }
        Ok(posted)
    }

    /// Tops the ring up to its current watermark.
    /// If afterwards nothing at all is posted, a retry is scheduled for the next tick.
    ///
    /// Returns the number of buffers posted.
    pub fn fill(&mut self, now_tick: u64) -> Result<u32, DmaError> {
        let wanted = self.accounting.get(now_tick, self.queue.size() as u32);
        let posted = match self.fill_slots(wanted) {
            Ok(posted) => posted,
            Err(e) => {
                self.accounting.put(wanted);
                return Err(e);
            }
        };
        self.accounting.put(wanted - posted);

        if self.accounting.in_use() == 0 {
            self.refill_retry = Some(now_tick.wrapping_add(1));
        } else {
            self.refill_retry = None;
        }
        Ok(posted)
    }

    /// True if a refill retry was scheduled and its tick has come.
    pub fn refill_due(&self, now_tick: u64) -> bool {
        matches!(self.refill_retry, Some(due) if now_tick >= due)
    }

    pub fn refill_pending(&self) -> bool {
        self.refill_retry.is_some()
    }

    /// Detaches the buffer a receive completion refers to and fills in what the NIC reported about it.
    ///
    /// The slot is chosen by the completion's WQE counter modulo the receive queue size.
    pub fn complete(&mut self, cqe: &CompletionQueueEntry, calibration: &Calibrator) -> Option<ReceiveBuffer> {
        let index = self.slots.index_of(cqe.wqe_counter() as u32);
        let mut buffer = self.slots.take(index)?;
        buffer.sync_for_cpu();

        buffer.set_length_clamped(cqe.byte_count() as usize);
        let metadata = buffer.metadata_mut();
        if cqe.rx_hash_type() != 0 {
            metadata.flow_id = Some(cqe.rx_hash());
        }
        metadata.l3_checksum_ok = cqe.l3_ok();
        metadata.l4_checksum_ok = cqe.l4_ok();
        metadata.vlan = cqe.vlan();
        metadata.timestamp_ns = calibration.translate(cqe.timestamp());
        Some(buffer)
    }

    /// Drops the buffer of a receive that completed with an error.
    /// Returns false if nothing was posted in the slot the completion names.
    ///
    /// The slot still has to be given back with [`delivered()`](#method.delivered).
    pub fn discard(&mut self, cqe: &CompletionQueueEntry) -> bool {
        let index = self.slots.index_of(cqe.wqe_counter() as u32);
        self.slots.take(index).is_some()
    }

    /// Returns the slots of `delivered` completed or discarded buffers to the accounting.
    pub fn delivered(&mut self, delivered: u32) {
        self.accounting.put(delivered);
    }

    /// Tells the accounting that the network stack is falling behind.
    pub fn livelocked(&mut self, now_tick: u64) {
        self.accounting.livelocked(now_tick);
    }

    /// Drops every posted buffer. Only call this once the NIC can no longer write into them.
    pub fn release_all(&mut self) {
        let released = self.slots.drain();
        self.accounting.put(released.len() as u32);
    }
}

impl core::fmt::Debug for RxRing {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("RxRing")
            .field("queue", &self.queue)
            .field("slots", &self.slots)
            .field("producer_counter", &self.producer_counter)
            .field("accounting", &self.accounting)
            .finish()
    }
}
