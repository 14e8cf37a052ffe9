//! This module defines access to the initialization segment, the register block at offset 0 of PCI BAR0.
//! (PRM Section 5.4: Initialization Segment)
//!
//! All registers are 32 bits wide and big-endian.
//! Access goes through a [`RegisterSpace`], so the same code drives a real mapped BAR ([`MmioRegisters`])
//! or a simulated device.

use alloc::sync::Arc;
use bit_field::BitField;
use core::convert::TryFrom;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{fence, Ordering};
use dma_region::DeviceAddress;
use num_enum::TryFromPrimitive;
use volatile::{ReadOnly, Volatile};
use zerocopy::byteorder::{BigEndian, U32};
use crate::Clock;

/// Firmware revision: minor in bits 31:16, major in bits 15:0.
pub const FW_VERSION:               usize = 0x0000;
/// Command interface revision in bits 31:16, firmware sub-minor in bits 15:0.
pub const CMDIF_FW_SUBMINOR:        usize = 0x0004;
/// MSBs of the physical address of the command queue.
pub const CMDQ_ADDR_HIGH:           usize = 0x0010;
/// LSBs of the physical address of the command queue.
/// When read, bits 7:4 hold log2 of the number of entries and bits 3:0 hold log2 of the entry stride.
pub const CMDQ_ADDR_LOW:            usize = 0x0014;
/// Bit per command in the cmdq.
/// When the bit is set, that command entry in the queue is moved to HW ownership.
pub const CMDQ_DOORBELL:            usize = 0x0018;
/// If bit 31 is set, the device is still initializing and driver should not post commands.
/// Bits 25:24 hold the interface mode.
pub const DEVICE_STATE:             usize = 0x01FC;
/// MSBs of the current internal timer value.
pub const INTERNAL_TIMER_HIGH:      usize = 0x1000;
/// LSBs of the current internal timer value.
pub const INTERNAL_TIMER_LOW:       usize = 0x1004;
pub const CLEAR_INTERRUPT:          usize = 0x100C;

const CMDQ_ADDR_LOW_MASK:           u32 = 0xFFF;
const INITIALIZING_BIT:             usize = 31;
/// The only command interface revision this driver speaks.
pub const CMD_INTERFACE_SUPPORTED:  u16 = 5;


/// The kinds of ordering a register barrier enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierKind {
    Read,
    Write,
    ReadWrite,
}

/// A window of 32-bit big-endian device registers, addressed by byte offset.
pub trait RegisterSpace: Send + Sync {
    /// Reads the register at `offset` and returns it in host byte order.
    fn read32(&self, offset: usize) -> u32;

    /// Writes `value` (host byte order) to the register at `offset`.
    fn write32(&self, offset: usize, value: u32);

    /// Writes 8 bytes as-is with a single 64-bit store.
    /// Used for doorbells and the blue-flame buffer, whose contents are already in wire order.
    fn write64_raw(&self, offset: usize, bytes: [u8; 8]);

    /// Orders register accesses around `offset..offset + len`.
    fn barrier(&self, offset: usize, len: usize, kind: BarrierKind);
}


/// A memory-mapped BAR accessed with volatile loads and stores.
pub struct MmioRegisters {
    base: NonNull<u8>,
    size: usize,
}

// MMIO registers may be touched from any core.
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// # Safety
    /// `base..base + size` must be a live, uncached mapping of the device's BAR
    /// that outlives the returned object.
    pub unsafe fn new(base: NonNull<u8>, size: usize) -> MmioRegisters {
        MmioRegisters { base, size }
    }

    fn in_bounds(&self, offset: usize, len: usize) -> bool {
        let ok = offset.checked_add(len).map_or(false, |end| end <= self.size);
        if !ok {
            error!("MmioRegisters: access of {} bytes at {:#X} is outside the {:#X}-byte BAR", len, offset, self.size);
        }
        ok
    }
}

impl RegisterSpace for MmioRegisters {
    fn read32(&self, offset: usize) -> u32 {
        if !self.in_bounds(offset, 4) {
            // what a PCIe master abort would return
            return u32::MAX;
        }
        // SAFE: bounds checked against the mapping size, registers are 4-byte aligned
        unsafe {
            let reg = &*(self.base.as_ptr().add(offset) as *const ReadOnly<U32<BigEndian>>);
            reg.read().get()
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        if !self.in_bounds(offset, 4) {
            return;
        }
        // SAFE: bounds checked against the mapping size, registers are 4-byte aligned
        unsafe {
            let reg = &mut *(self.base.as_ptr().add(offset) as *mut Volatile<U32<BigEndian>>);
            reg.write(U32::new(value));
        }
    }

    fn write64_raw(&self, offset: usize, bytes: [u8; 8]) {
        if !self.in_bounds(offset, 8) {
            return;
        }
        // SAFE: bounds checked against the mapping size, doorbells are 8-byte aligned
        unsafe {
            let reg = &mut *(self.base.as_ptr().add(offset) as *mut Volatile<u64>);
            reg.write(u64::from_ne_bytes(bytes));
        }
    }

    fn barrier(&self, _offset: usize, _len: usize, _kind: BarrierKind) {
        fence(Ordering::SeqCst);
    }
}


/// The possible interface modes of the device, from bits 25:24 of the device state register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum InterfaceMode {
    FullDriver  = 0,
    Disabled    = 1,
    NoDramNic   = 2,
}

/// Firmware revision as reported by the initialization segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub subminor: u16,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.subminor)
    }
}


/// The initialization segment is located at offset 0 of PCI BAR0.
/// It is used in the initialization procedure of the device,
/// and it contains the 32-bit command doorbell vector used to inform the HW when a command is ready to be processed.
#[derive(Clone)]
pub struct InitializationSegment {
    regs: Arc<dyn RegisterSpace>,
}

impl InitializationSegment {
    pub fn new(regs: Arc<dyn RegisterSpace>) -> InitializationSegment {
        InitializationSegment { regs }
    }

    /// The register window this segment lives in, shared with the UAR pages.
    pub fn registers(&self) -> &Arc<dyn RegisterSpace> {
        &self.regs
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        let ver = self.regs.read32(FW_VERSION);
        let sub = self.regs.read32(CMDIF_FW_SUBMINOR);
        FirmwareVersion {
            major: ver as u16,
            minor: (ver >> 16) as u16,
            subminor: sub as u16,
        }
    }

    /// Command Interface Interpreter Revision ID
    pub fn cmd_interface_revision(&self) -> u16 {
        (self.regs.read32(CMDIF_FW_SUBMINOR) >> 16) as u16
    }

    /// Returns the maximum number of entries that can be in the command queue
    pub fn num_cmdq_entries(&self) -> usize {
        let log = (self.regs.read32(CMDQ_ADDR_LOW) >> 4) & 0x0F;
        1 << log
    }

    /// Returns the required stride of command queue entries (bytes between the start of consecutive entries)
    pub fn cmdq_entry_stride(&self) -> usize {
        let log = self.regs.read32(CMDQ_ADDR_LOW) & 0x0F;
        1 << log
    }

    /// Sets the physical address of the command queue within the initialization segment.
    ///
    /// # Arguments
    /// * `cmdq_addr`: the starting device address of the command queue, the lower 12 bits of which must be zero.
    pub fn set_physical_address_of_cmdq(&self, cmdq_addr: DeviceAddress) -> Result<(), &'static str> {
        if cmdq_addr.value() & CMDQ_ADDR_LOW_MASK as u64 != 0 {
            return Err("cmdq physical address lower 12 bits must be zero.");
        }

        self.regs.write32(CMDQ_ADDR_HIGH, cmdq_addr.high());
        let val = self.regs.read32(CMDQ_ADDR_LOW) & CMDQ_ADDR_LOW_MASK;
        self.regs.write32(CMDQ_ADDR_LOW, cmdq_addr.low() | val);
        self.regs.barrier(CMDQ_ADDR_HIGH, 8, BarrierKind::Write);
        Ok(())
    }

    /// Returns true if the device is still initializing, and driver should not pass any commands to the device.
    pub fn device_is_initializing(&self) -> bool {
        self.regs.read32(DEVICE_STATE).get_bit(INITIALIZING_BIT)
    }

    /// Returns the interface mode, or the raw bits if they don't name a known mode.
    pub fn interface_mode(&self) -> Result<InterfaceMode, u8> {
        let mode = self.regs.read32(DEVICE_STATE).get_bits(24..26) as u8;
        InterfaceMode::try_from(mode).map_err(|_| mode)
    }

    /// Polls the device state every millisecond until the device is no longer initializing.
    pub fn wait_until_ready(&self, clock: &dyn Clock, timeout_ms: u32) -> Result<(), &'static str> {
        for _ in 0..timeout_ms {
            if !self.device_is_initializing() {
                return Ok(());
            }
            clock.delay_us(1000);
        }
        if self.device_is_initializing() {
            error!("device did not finish initializing within {} ms", timeout_ms);
            return Err("device did not finish initializing");
        }
        Ok(())
    }

    /// Sets a bit in the command doorbell vector to inform HW that the command in `slot` needs to be executed.
    pub fn post_command(&self, slot: usize) {
        self.regs.write32(CMDQ_DOORBELL, 1 << slot);
        self.regs.barrier(CMDQ_DOORBELL, 4, BarrierKind::Write);
    }

    /// Reads the free-running 64-bit internal timer.
    ///
    /// The two halves can't be read atomically, so the high half is re-read
    /// until it hasn't changed across the read of the low half.
    pub fn internal_timer(&self) -> u64 {
        let mut high = self.regs.read32(INTERNAL_TIMER_HIGH);
        loop {
            let low = self.regs.read32(INTERNAL_TIMER_LOW);
            let again = self.regs.read32(INTERNAL_TIMER_HIGH);
            if again == high {
                return ((high as u64) << 32) | low as u64;
            }
            high = again;
        }
    }

    pub fn clear_interrupt(&self) {
        self.regs.write32(CLEAR_INTERRUPT, 1);
    }
}

impl fmt::Debug for InitializationSegment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InitializationSegment")
            .field("Firmware version", &self.firmware_version())
            .field("Command Interface Rev", &self.cmd_interface_revision())
            .field("Command queue address high", &self.regs.read32(CMDQ_ADDR_HIGH))
            .field("Command queue address low", &self.regs.read32(CMDQ_ADDR_LOW))
            .field("Device state", &self.regs.read32(DEVICE_STATE))
            .finish()
    }
}
