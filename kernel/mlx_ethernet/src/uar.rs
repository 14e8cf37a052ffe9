//! User Access Region (UAR) pages hold the doorbells for the event, completion and send queues.
//! (PRM Section 8.2: User Access Region)
//!
//! UAR page `n` sits at `n * PAGE_SIZE` within BAR0, after the initialization segment.

use alloc::sync::Arc;
use core::fmt;
use kernel_config::memory::PAGE_SIZE;
use crate::initialization_segment::{BarrierKind, RegisterSpace};

/// Completion queue doorbell: `(arm value << 32) | cqn`, written as one big-endian 64-bit store.
pub const UAR_CQ_DOORBELL:      usize = 0x20;
/// Event queue doorbell that also re-arms the EQ for interrupts.
pub const UAR_EQ_ARM_DOORBELL:  usize = 0x40;
/// Event queue doorbell that only updates the consumer counter.
pub const UAR_EQ_DOORBELL:      usize = 0x48;
/// Start of the blue-flame buffers used to ring send queue doorbells.
pub const UAR_BLUEFLAME:        usize = 0x800;
/// Default size of each of the two alternating blue-flame buffers.
pub const DEFAULT_BF_SIZE:      usize = 256;

const EQ_CONSUMER_MASK:         u32 = 0xFF_FFFF;


/// One UAR page, accessed through the device's register space.
#[derive(Clone)]
pub struct Uar {
    regs: Arc<dyn RegisterSpace>,
    page: u32,
}

impl Uar {
    pub fn new(regs: Arc<dyn RegisterSpace>, page: u32) -> Uar {
        Uar { regs, page }
    }

    /// The UAR page number returned by firmware.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Offset of this page within BAR0.
    pub fn base(&self) -> usize {
        self.page as usize * PAGE_SIZE
    }

    /// Rings the completion queue doorbell for `cqn` with the arm value already written to its doorbell record.
    pub fn ring_cq_doorbell(&self, cqn: u32, arm_value: u32) {
        let value = ((arm_value as u64) << 32) | cqn as u64;
        let offset = self.base() + UAR_CQ_DOORBELL;
        self.regs.write64_raw(offset, value.to_be_bytes());
        self.regs.barrier(offset, 8, BarrierKind::Write);
    }

    /// Updates the consumer counter of event queue `eqn` and re-arms it.
    pub fn arm_eq(&self, eqn: u32, consumer_counter: u32) {
        let offset = self.base() + UAR_EQ_ARM_DOORBELL;
        self.regs.write32(offset, (eqn << 24) | (consumer_counter & EQ_CONSUMER_MASK));
        self.regs.barrier(offset, 4, BarrierKind::Write);
    }

    /// Updates the consumer counter of event queue `eqn` without re-arming it.
    pub fn update_eq(&self, eqn: u32, consumer_counter: u32) {
        let offset = self.base() + UAR_EQ_DOORBELL;
        self.regs.write32(offset, (eqn << 24) | (consumer_counter & EQ_CONSUMER_MASK));
        self.regs.barrier(offset, 4, BarrierKind::Write);
    }

    /// Copies the first 8 bytes of a send WQE into the blue-flame buffer at `bf_offset`.
    pub fn write_blueflame(&self, bf_offset: usize, wqe_head: [u8; 8]) {
        let offset = self.base() + UAR_BLUEFLAME + bf_offset;
        self.regs.write64_raw(offset, wqe_head);
        self.regs.barrier(offset, 8, BarrierKind::Write);
    }
}

impl fmt::Debug for Uar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Uar")
            .field("page", &self.page)
            .field("base", &self.base())
            .finish()
    }
}
