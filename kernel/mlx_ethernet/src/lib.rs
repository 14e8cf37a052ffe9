//! This crate defines the layout of memory objects that make up the software interface between the Mellanox hardware and the driver,
//! as well as the protocol used to pass firmware commands through them.
//!
//! The Mellanox ethernet card is referred to as both the NIC (Network Interface Card) and the HCA (Host Channel Adapter).
//!
//! Layouts follow the Mellanox Adapters Programmer's Reference Manual (PRM).
//! An older version of the manual can be found at <http://www.mellanox.com/related-docs/user_manuals/Ethernet_Adapters_Programming_Manual.pdf>.
//!
//! Every multi-byte field the device reads or writes is big-endian.
//! Objects shared with the device live in [`DmaRegion`](dma_region::DmaRegion)s and are accessed through typed views,
//! while device registers are accessed through a [`RegisterSpace`](initialization_segment::RegisterSpace).

#![no_std]

#[macro_use] extern crate log;
#[macro_use] extern crate alloc;
#[macro_use] extern crate static_assertions;
extern crate bit_field;
extern crate dma_region;
extern crate kernel_config;
extern crate num_enum;
extern crate spin;
extern crate volatile;
extern crate zerocopy;

pub mod initialization_segment;
pub mod signature;
pub mod mailbox;
pub mod command_queue;
pub mod commands;
pub mod ring;
pub mod event_queue;
pub mod completion_queue;
pub mod work_queue;
pub mod send_queue;
pub mod receive_queue;
pub mod uar;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
#[cfg(test)]
mod test;

pub use command_queue::{CommandOpcode, CommandOutput, CommandQueue, CommandQueueEntry, CommandQueueError};
pub use initialization_segment::{InitializationSegment, MmioRegisters, RegisterSpace};
pub use uar::Uar;

use kernel_config::memory::PAGE_SIZE;

/// Log2 of the default number of entries in an event queue.
pub const LOG_EQ_SIZE:          u32 = 7;
/// Log2 of the default number of entries in a completion queue.
pub const LOG_CQ_SIZE:          u32 = 12;
/// Log2 of the default number of entries in a receive queue.
pub const LOG_RQ_SIZE:          u32 = 10;
/// Log2 of the default number of 64-byte slots in a send queue.
pub const LOG_SQ_SIZE:          u32 = 11;

const UAR_MASK:                 u32 = 0xFF_FFFF;
const LOG_QUEUE_SIZE_MASK:      u32 = 0x1F;
const LOG_QUEUE_SIZE_SHIFT:     u32 = 24;
/// Queue numbers (CQN, SQN, RQN, TISN) are 24 bits wide.
pub const QUEUE_NUMBER_MASK:    u32 = 0xFF_FFFF;

/// Value of an ownership bit when the hardware owns the object.
pub const HW_OWNERSHIP:         u8 = 1;


/// Time services the driver needs from the platform.
pub trait Clock: Send + Sync {
    /// Busy-waits (or sleeps) for at least `microseconds`.
    fn delay_us(&self, microseconds: u64);

    /// Monotonic time since boot, in nanoseconds.
    fn uptime_ns(&self) -> u64;
}


/// Find the page size of the given `num_bytes` in units of 4KiB pages, as a log2 value.
/// Sizes that aren't a power-of-two number of pages are rounded up.
pub fn log_page_size(num_bytes: usize) -> u32 {
    let pages = (num_bytes + PAGE_SIZE - 1) / PAGE_SIZE;
    pages.max(1).next_power_of_two().trailing_zeros()
}
