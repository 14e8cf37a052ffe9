//! Mailboxes carry the part of a command's input or output that doesn't fit in the 16 inline bytes of the command entry.
//! (PRM Section 8.24.1: HCA Command Queue)
//!
//! A chain of mailboxes lives in one DMA region, one mailbox per 1 KiB.
//! Each mailbox points at the next one and carries its position in the chain and the command's token.

use alloc::sync::Arc;
use core::fmt;
use dma_region::{create_contiguous_mapping, DeviceAddress, DmaAllocator, DmaError, DmaRegion};
use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use crate::signature::{mix_done, mix_u32, mix_u64, mix_u8, xor_fold, SIGNATURE_SEED};

/// Size of mailboxes, including both control fields and data.
pub const MAILBOX_SIZE_IN_BYTES:        usize = 576;
/// Number of bytes in the mailbox that are actually used to pass data.
pub const MAILBOX_DATA_SIZE_IN_BYTES:   usize = 512;
/// Mailboxes must be 1 KiB aligned, so consecutive mailboxes in a chain are placed 1 KiB apart.
pub const MAILBOX_ALIGN:                usize = 1 << 10;


/// Layout of mailbox used to pass extra input and output command data that doesn't fit into the command entry.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone)]
#[repr(C)]
pub struct CommandInterfaceMailbox {
    /// Data in the mailbox
    mailbox_data:           [u8; MAILBOX_DATA_SIZE_IN_BYTES],
    _padding:               [u8; 48],
    /// Pointer to the next mailbox in the chain (if needed).
    /// If no additional block is needed, the pointer should be 0.
    next_pointer:           U64<BigEndian>,
    /// Sequence number of the block.
    /// Starting by 0 and increment for each block on the linked list of blocks.
    block_number:           U32<BigEndian>,
    /// * Token: should have the same value in the command and the mailbox blocks.
    /// * Ctrl signature: covers the next pointer, block number and token.
    /// * Signature: the ctrl signature mixed with the data.
    token_ctrl_signature:   U32<BigEndian>,
}
const_assert_eq!(core::mem::size_of::<CommandInterfaceMailbox>(), MAILBOX_SIZE_IN_BYTES);

impl CommandInterfaceMailbox {
    /// Sets all fields of the mailbox to 0.
    pub fn clear_all_fields(&mut self) {
        *self = CommandInterfaceMailbox::new_zeroed();
    }

    pub fn data(&self) -> &[u8; MAILBOX_DATA_SIZE_IN_BYTES] {
        &self.mailbox_data
    }

    pub fn data_mut(&mut self) -> &mut [u8; MAILBOX_DATA_SIZE_IN_BYTES] {
        &mut self.mailbox_data
    }

    pub fn next_pointer(&self) -> DeviceAddress {
        DeviceAddress::new(self.next_pointer.get())
    }

    pub fn block_number(&self) -> u32 {
        self.block_number.get()
    }

    pub fn token(&self) -> u8 {
        (self.token_ctrl_signature.get() >> 16) as u8
    }

    pub fn ctrl_signature(&self) -> u8 {
        (self.token_ctrl_signature.get() >> 8) as u8
    }

    pub fn signature(&self) -> u8 {
        self.token_ctrl_signature.get() as u8
    }

    /// Writes the control fields; the signatures are cleared until [`sign()`](#method.sign) is called.
    pub fn set_control_fields(&mut self, next: DeviceAddress, block_number: u32, token: u8) {
        self.next_pointer.set(next.value());
        self.block_number.set(block_number);
        self.token_ctrl_signature.set((token as u32) << 16);
    }

    /// Only the three control fields ever hold a value when the mailbox is signed,
    /// so they are mixed directly rather than folding the whole header.
    fn compute_ctrl_signature(&self) -> u8 {
        let xor = mix_u64(SIGNATURE_SEED, self.next_pointer.get());
        let xor = mix_u32(xor, self.block_number.get());
        mix_done(mix_u8(xor, self.token()))
    }

    fn compute_signature(&self, ctrl_signature: u8) -> u8 {
        ctrl_signature ^ xor_fold(&self.mailbox_data)
    }

    /// Computes and stores both signature bytes.
    pub fn sign(&mut self) {
        let ctrl = self.compute_ctrl_signature();
        let sig = self.compute_signature(ctrl);
        let token = self.token();
        self.token_ctrl_signature.set(((token as u32) << 16) | ((ctrl as u32) << 8) | sig as u32);
    }

    /// Returns true if both stored signatures match the mailbox contents.
    pub fn verify(&self) -> bool {
        let ctrl = self.compute_ctrl_signature();
        ctrl == self.ctrl_signature() && self.compute_signature(ctrl) == self.signature()
    }
}

impl fmt::Debug for CommandInterfaceMailbox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandInterfaceMailbox")
            .field("next pointer", &self.next_pointer())
            .field("block number", &self.block_number())
            .field("token ctrl signature", &self.token_ctrl_signature.get())
            .finish()
    }
}


/// Returns the number of mailboxes needed to hold `payload_len` bytes.
pub const fn mailboxes_for(payload_len: usize) -> usize {
    (payload_len + MAILBOX_DATA_SIZE_IN_BYTES - 1) / MAILBOX_DATA_SIZE_IN_BYTES
}


/// A chain of mailboxes allocated for a single command.
/// Dropping the chain frees its memory.
pub struct MailboxChain {
    region: DmaRegion,
    count: usize,
}

impl MailboxChain {
    /// Allocates `count` zeroed mailboxes and links them together,
    /// stamping each with its block number and the command's `token`.
    pub fn new(allocator: &Arc<dyn DmaAllocator>, count: usize, token: u8) -> Result<MailboxChain, DmaError> {
        if count == 0 {
            return Err(DmaError::InvalidLayout);
        }
        let region = create_contiguous_mapping(allocator, count * MAILBOX_ALIGN, MAILBOX_ALIGN)?;
        let mut chain = MailboxChain { region, count };

        let base = chain.region.device_address();
        for i in 0..count {
            let next = if i + 1 < count {
                base.offset((i + 1) * MAILBOX_ALIGN)
            } else {
                DeviceAddress::zero()
            };
            chain.mailbox_mut(i)?.set_control_fields(next, i as u32, token);
        }
        Ok(chain)
    }

    /// Allocates a chain just long enough for `payload_len` bytes,
    /// or returns `None` if no mailboxes are needed.
    pub fn for_payload(allocator: &Arc<dyn DmaAllocator>, payload_len: usize, token: u8) -> Result<Option<MailboxChain>, DmaError> {
        match mailboxes_for(payload_len) {
            0 => Ok(None),
            count => MailboxChain::new(allocator, count, token).map(Some),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// The number of data bytes the chain can hold.
    pub fn capacity(&self) -> usize {
        self.count * MAILBOX_DATA_SIZE_IN_BYTES
    }

    /// Device address of the first mailbox, which goes into the command entry.
    pub fn head_address(&self) -> DeviceAddress {
        self.region.device_address()
    }

    pub fn mailbox(&self, index: usize) -> Result<&CommandInterfaceMailbox, DmaError> {
        if index >= self.count {
            return Err(DmaError::OutOfBounds);
        }
        self.region.as_type::<CommandInterfaceMailbox>(index * MAILBOX_ALIGN)
    }

    pub fn mailbox_mut(&mut self, index: usize) -> Result<&mut CommandInterfaceMailbox, DmaError> {
        if index >= self.count {
            return Err(DmaError::OutOfBounds);
        }
        self.region.as_type_mut::<CommandInterfaceMailbox>(index * MAILBOX_ALIGN)
    }

    /// Copies `bytes` into the data areas of the chain, spilling across mailbox boundaries.
    pub fn copy_in(&mut self, bytes: &[u8]) -> Result<(), DmaError> {
        if bytes.len() > self.capacity() {
            return Err(DmaError::OutOfBounds);
        }
        for (i, chunk) in bytes.chunks(MAILBOX_DATA_SIZE_IN_BYTES).enumerate() {
            self.mailbox_mut(i)?.data_mut()[..chunk.len()].copy_from_slice(chunk);
        }
        Ok(())
    }

    /// Copies the first `out.len()` data bytes of the chain into `out`.
    pub fn copy_out(&self, out: &mut [u8]) -> Result<(), DmaError> {
        if out.len() > self.capacity() {
            return Err(DmaError::OutOfBounds);
        }
        for (i, chunk) in out.chunks_mut(MAILBOX_DATA_SIZE_IN_BYTES).enumerate() {
            let len = chunk.len();
            chunk.copy_from_slice(&self.mailbox(i)?.data()[..len]);
        }
        Ok(())
    }

    /// Computes the signatures of every mailbox in the chain.
    pub fn sign(&mut self) -> Result<(), DmaError> {
        for i in 0..self.count {
            self.mailbox_mut(i)?.sign();
        }
        Ok(())
    }

    /// Returns true if every mailbox's signatures are intact
    /// and every mailbox still carries `token`.
    pub fn verify(&self, token: u8) -> bool {
        (0..self.count).all(|i| {
            self.mailbox(i).map_or(false, |mb| mb.verify() && mb.token() == token)
        })
    }

    pub fn sync_for_device(&self) {
        self.region.sync_for_device();
    }

    pub fn sync_for_cpu(&self) {
        self.region.sync_for_cpu();
    }
}

impl fmt::Debug for MailboxChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MailboxChain")
            .field("head", &self.head_address())
            .field("count", &self.count)
            .finish()
    }
}
