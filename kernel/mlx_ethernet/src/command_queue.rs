//! Defines the Command Queue that is used to pass commands from the driver to the NIC.
//! (PRM Section 8.24.1: HCA Command Queue)
//!
//! A command is posted by filling in a [`CommandQueueEntry`], handing its ownership to HW,
//! and ringing the command doorbell in the initialization segment.
//! The first 16 bytes of a command's input and output travel inline in the entry;
//! anything beyond that travels in a chain of mailboxes.
//!
//! This driver only ever uses entry 0, and keeps at most one command in flight.
//! Callers serialize access by holding `&mut CommandQueue`.

use alloc::sync::Arc;
use alloc::vec::Vec;
use bit_field::BitField;
use core::convert::TryFrom;
use core::fmt;
use dma_region::{create_page_mapping, DeviceAddress, DmaAllocator, DmaError, DmaRegion};
use kernel_config::memory::PAGE_SIZE;
use num_enum::TryFromPrimitive;
use zerocopy::byteorder::{BigEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};
use crate::initialization_segment::InitializationSegment;
use crate::mailbox::{mailboxes_for, MailboxChain};
use crate::signature::{xor_fold, SIGNED_ENTRY_FOLD};
use crate::{Clock, HW_OWNERSHIP};

/// Number of bytes of command input and output that fit inside the command entry.
pub const INLINE_DATA_SIZE:             usize = 16;
/// The opcode and opcode modifier take up the first 8 bytes of the inline input.
pub const COMMAND_HEADER_SIZE:          usize = 8;
/// The inline bytes left for command-specific input after the header.
pub const MAX_INLINE_INPUT:             usize = INLINE_DATA_SIZE - COMMAND_HEADER_SIZE;
/// Every command output starts with an 8-byte status/syndrome header.
pub const COMMAND_OUTPUT_HEADER_SIZE:   usize = 8;
/// Default number of 1 ms polls before a command is declared lost.
pub const DEFAULT_COMMAND_POLL_LIMIT:   u32 = 1000;
/// The only command entry this driver uses.
const COMMAND_SLOT:                     usize = 0;
/// Offset of the token/signature/status/ownership word within an entry.
const STATUS_BYTE_OFFSET:               usize = 63;
/// A starting token borrowed from another driver for this hardware (Snabb).
const INITIAL_TOKEN:                    u8 = 0xAA;


/// Type of transport that carries the command.
pub enum CommandTransportType {
    PCIe = 0x7 << 24
}

/// Possible reasons for failure when executing a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandQueueError {
    /// HW did not hand the command entry back within the poll limit.
    Timeout,
    /// HW could not deliver the command; carries the delivery status.
    /// See [`CommandDeliveryStatus`].
    DeliveryFailed(u8),
    /// Firmware executed and rejected the command.
    /// `status` is a [`CommandReturnStatus`] value and `syndrome` is firmware's diagnostic code.
    CommandFailed { status: u8, syndrome: u32 },
    /// DMA memory for the queue or a mailbox chain could not be allocated.
    AllocationFailed,
    /// A completed entry or mailbox failed signature verification.
    CorruptSignature,
    /// More than 8 bytes of command-specific inline input were given.
    InlineInputTooLarge,
    /// The command output is shorter than a field that was asked for.
    OutputTooShort,
    /// The entry is still owned by HW from an earlier command that timed out.
    SlotOwnedByHardware,
    /// The device reports a command queue that doesn't fit in one page.
    InvalidQueueGeometry,
}

impl From<CommandQueueError> for &'static str {
    fn from(error: CommandQueueError) -> Self {
        match error {
            CommandQueueError::Timeout => "Command timed out waiting for HW to release the command entry",
            CommandQueueError::DeliveryFailed(_) => "HW failed to deliver the command",
            CommandQueueError::CommandFailed { .. } => "Firmware rejected the command",
            CommandQueueError::AllocationFailed => "Failed to allocate DMA memory for the command",
            CommandQueueError::CorruptSignature => "Command entry or mailbox signature mismatch",
            CommandQueueError::InlineInputTooLarge => "Inline command input is larger than 8 bytes",
            CommandQueueError::OutputTooShort => "Command output is too short for the requested field",
            CommandQueueError::SlotOwnedByHardware => "Command entry is still owned by HW",
            CommandQueueError::InvalidQueueGeometry => "Unsupported command queue size or stride",
        }
    }
}

impl From<DmaError> for CommandQueueError {
    fn from(_e: DmaError) -> Self {
        CommandQueueError::AllocationFailed
    }
}


/// Return codes written by HW in the delivery status field of the command entry.
/// See [`CommandQueueEntry::delivery_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandDeliveryStatus {
    Success             = 0x0,
    SignatureErr        = 0x1,
    TokenErr            = 0x2,
    BadBlockNumber      = 0x3,
    BadOutputPointer    = 0x4,
    BadInputPointer     = 0x5,
    InternalErr         = 0x6,
    InputLenErr         = 0x7,
    OutputLenErr        = 0x8,
    ReservedNotZero     = 0x9,
    BadCommandType      = 0x10,
}


/// Command opcode written by SW in opcode field of the input data in the command entry.
#[derive(PartialEq, Eq, Debug, TryFromPrimitive, Copy, Clone)]
#[repr(u16)]
pub enum CommandOpcode {
    QueryHcaCap             = 0x100,
    QueryAdapter            = 0x101,
    InitHca                 = 0x102,
    TeardownHca             = 0x103,
    EnableHca               = 0x104,
    DisableHca              = 0x105,
    QueryPages              = 0x107,
    ManagePages             = 0x108,
    QueryIssi               = 0x10A,
    SetIssi                 = 0x10B,
    QuerySpecialContexts    = 0x203,
    CreateEq                = 0x301,
    CreateCq                = 0x400,
    QueryVportState         = 0x751,
    QueryNicVportContext    = 0x754,
    AllocPd                 = 0x800,
    AllocUar                = 0x802,
    AllocTransportDomain    = 0x816,
    CreateSq                = 0x904,
    ModifySq                = 0x905,
    CreateRq                = 0x908,
    ModifyRq                = 0x909,
    CreateTis               = 0x912,
}


/// Command status written by HW in status field of the output data in the command entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandReturnStatus {
    OK                  = 0x00,
    InternalError       = 0x01,
    BadOp               = 0x02,
    BadParam            = 0x03,
    BadSysState         = 0x04,
    BadResource         = 0x05,
    ResourceBusy        = 0x06,
    ExceedLim           = 0x08,
    BadResState         = 0x09,
    BadIndex            = 0x0A,
    NoResources         = 0x0F,
    BadInputLen         = 0x50,
    BadOutputLen        = 0x51,
    BadResourceState    = 0x10,
    BadPkt              = 0x30,
    BadSize             = 0x40,
}

impl CommandQueueError {
    /// The firmware return status, if this error is a firmware rejection with a known status.
    pub fn return_status(&self) -> Option<CommandReturnStatus> {
        match self {
            CommandQueueError::CommandFailed { status, .. } => CommandReturnStatus::try_from(*status).ok(),
            _ => None,
        }
    }
}


/// Layout of a command passed to the NIC.
/// The fields include control information for the command as well as actual command input and output.
/// The first 16 bytes of the actual command input are part of the entry. The remaining data is written in mailboxes.
/// Similarly, the first 16 bytes of the command output are part of the entry and remaining data is written in mailboxes.
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned, Clone)]
#[repr(C)]
pub struct CommandQueueEntry {
    /// Type of transport that carries the command
    type_of_transport:              U32<BigEndian>,
    /// Input command length in bytes.
    input_length:                   U32<BigEndian>,
    /// Pointer to the first input mailbox
    input_mailbox_pointer:          U64<BigEndian>,
    /// Opcode (bytes 0-1), opcode modifier (bytes 6-7), then 8 bytes of command input.
    command_input_inline_data:      [u8; INLINE_DATA_SIZE],
    /// Status (byte 0), syndrome (bytes 4-7), then 8 bytes of command output.
    command_output_inline_data:     [u8; INLINE_DATA_SIZE],
    /// Pointer to the first output mailbox
    output_mailbox_pointer:         U64<BigEndian>,
    /// Output command length in bytes
    output_length:                  U32<BigEndian>,
    /// * Token: Token of the command, should have the same value in the command and the mailbox blocks.
    /// * Signature: 8 bit signature of the command queue entry.
    /// * Status: command delivery status.
    /// * Ownership: bit 0 of field. When set, indicates that HW owns the command entry.
    token_signature_status_own:     U32<BigEndian>,
}

const_assert_eq!(core::mem::size_of::<CommandQueueEntry>(), 64);

impl fmt::Debug for CommandQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandQueueEntry")
            .field("type of transport", &self.type_of_transport.get())
            .field("input length", &self.input_length.get())
            .field("input_mailbox_ptr", &self.input_mailbox_pointer.get())
            .field("command_input_opcode", &self.opcode())
            .field("command_output_status", &self.command_output_inline_data[0])
            .field("output_mailbox_ptr", &self.output_mailbox_pointer.get())
            .field("output_length", &self.output_length.get())
            .field("token_signature_status_own", &self.token_signature_status_own.get())
            .finish()
    }
}

impl CommandQueueEntry {
    /// Clears the entry and fills in the control fields for a new command.
    /// The entry is left owned by HW, but unsigned.
    pub fn init(&mut self, token: u8, input_length: u32, output_length: u32) {
        *self = CommandQueueEntry::new_zeroed();
        self.type_of_transport.set(CommandTransportType::PCIe as u32);
        self.input_length.set(input_length);
        self.output_length.set(output_length);
        self.token_signature_status_own.set((token as u32) << 24);
        self.change_ownership_to_hw();
    }

    /// Sets the first 16 bytes of input data that are written inline in the command.
    ///
    /// # Arguments
    /// * `opcode`: value identifying which command has to be carried out
    /// * `opmod`: opcode modifier
    /// * `input`: up to 8 bytes of actual command data; the rest of the inline area is zeroed.
    pub fn set_input_inline_data(&mut self, opcode: u16, opmod: u16, input: &[u8]) -> Result<(), CommandQueueError> {
        if input.len() > MAX_INLINE_INPUT {
            return Err(CommandQueueError::InlineInputTooLarge);
        }
        let inline = &mut self.command_input_inline_data;
        inline.fill(0);
        inline[0..2].copy_from_slice(&opcode.to_be_bytes());
        inline[6..8].copy_from_slice(&opmod.to_be_bytes());
        inline[COMMAND_HEADER_SIZE..COMMAND_HEADER_SIZE + input.len()].copy_from_slice(input);
        Ok(())
    }

    pub fn set_input_mailbox_pointer(&mut self, addr: DeviceAddress) {
        self.input_mailbox_pointer.set(addr.value());
    }

    pub fn set_output_mailbox_pointer(&mut self, addr: DeviceAddress) {
        self.output_mailbox_pointer.set(addr.value());
    }

    pub fn input_inline_data(&self) -> &[u8; INLINE_DATA_SIZE] {
        &self.command_input_inline_data
    }

    /// Returns the first 16 bytes of output data that are written inline in the command.
    pub fn output_inline_data(&self) -> &[u8; INLINE_DATA_SIZE] {
        &self.command_output_inline_data
    }

    pub fn output_inline_data_mut(&mut self) -> &mut [u8; INLINE_DATA_SIZE] {
        &mut self.command_output_inline_data
    }

    pub fn input_length(&self) -> u32 {
        self.input_length.get()
    }

    pub fn output_length(&self) -> u32 {
        self.output_length.get()
    }

    pub fn input_mailbox_pointer(&self) -> DeviceAddress {
        DeviceAddress::new(self.input_mailbox_pointer.get())
    }

    pub fn output_mailbox_pointer(&self) -> DeviceAddress {
        DeviceAddress::new(self.output_mailbox_pointer.get())
    }

    /// Returns the raw value written to the input opcode field of the command
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes([self.command_input_inline_data[0], self.command_input_inline_data[1]])
    }

    pub fn opmod(&self) -> u16 {
        u16::from_be_bytes([self.command_input_inline_data[6], self.command_input_inline_data[7]])
    }

    pub fn token(&self) -> u8 {
        (self.token_signature_status_own.get() >> 24) as u8
    }

    pub fn signature(&self) -> u8 {
        (self.token_signature_status_own.get() >> 16) as u8
    }

    fn set_signature(&mut self, signature: u8) {
        let mut val = self.token_signature_status_own.get();
        val.set_bits(16..24, signature as u32);
        self.token_signature_status_own.set(val);
    }

    /// Computes the entry signature: the complement of the XOR-fold of the entry taken with the signature byte zeroed.
    pub fn sign(&mut self) {
        self.set_signature(0);
        let fold = xor_fold(self.as_bytes());
        self.set_signature(!fold);
    }

    /// Returns true if the entry's signature matches its contents.
    pub fn verify(&self) -> bool {
        xor_fold(self.as_bytes()) == SIGNED_ENTRY_FOLD
    }

    /// Returns the raw delivery status.
    /// This only informs us if the command was delivered to the NIC successfully, not if it was completed successfully.
    pub fn delivery_status(&self) -> u8 {
        (self.token_signature_status_own.get().get_bits(1..8)) as u8
    }

    /// Sets the delivery status and hands the entry back to SW, as HW does when it finishes a command.
    pub fn complete(&mut self, delivery_status: u8) {
        let mut val = self.token_signature_status_own.get();
        val.set_bits(1..8, delivery_status as u32);
        val.set_bit(0, false);
        self.token_signature_status_own.set(val);
    }

    /// Sets the ownership bit so that HW can take control of the command entry
    pub fn change_ownership_to_hw(&mut self) {
        let ownership = self.token_signature_status_own.get() | HW_OWNERSHIP as u32;
        self.token_signature_status_own.set(ownership);
    }

    /// Returns true if the command is currently under the ownership of HW (SW should not touch the fields).
    pub fn owned_by_hw(&self) -> bool {
        self.token_signature_status_own.get().get_bit(0)
    }

    /// Returns the status of command execution.
    /// A `None` returned value indicates that there was no valid value in the field.
    pub fn return_status(&self) -> Option<CommandReturnStatus> {
        CommandReturnStatus::try_from(self.command_output_inline_data[0]).ok()
    }
}


/// The decoded output of a command: the 16 inline output bytes followed by any mailbox output.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandOutput {
    bytes: Vec<u8>,
}

impl CommandOutput {
    pub fn new(bytes: Vec<u8>) -> CommandOutput {
        CommandOutput { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn status(&self) -> u8 {
        self.bytes.first().copied().unwrap_or(0)
    }

    pub fn syndrome(&self) -> u32 {
        self.read_u32(4).unwrap_or(0)
    }

    /// The output bytes that came back in mailboxes.
    pub fn mailbox_data(&self) -> &[u8] {
        self.bytes.get(INLINE_DATA_SIZE..).unwrap_or(&[])
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, CommandQueueError> {
        self.bytes.get(offset).copied().ok_or(CommandQueueError::OutputTooShort)
    }

    /// Reads a big-endian u16 at `offset` of the output.
    pub fn read_u16(&self, offset: usize) -> Result<u16, CommandQueueError> {
        let b = self.bytes.get(offset..offset + 2).ok_or(CommandQueueError::OutputTooShort)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Reads a big-endian u32 at `offset` of the output.
    pub fn read_u32(&self, offset: usize) -> Result<u32, CommandQueueError> {
        let b = self.bytes.get(offset..offset + 4).ok_or(CommandQueueError::OutputTooShort)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl fmt::Debug for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandOutput")
            .field("status", &self.status())
            .field("syndrome", &self.syndrome())
            .field("len", &self.len())
            .finish()
    }
}


/// A buffer of fixed-size entries that is used to pass commands to the HCA.
/// It resides in a physically contiguous 4 KiB memory chunk.
pub struct CommandQueue {
    /// Physically-contiguous command queue entries
    entries: DmaRegion,
    num_entries: usize,
    /// Bytes between the start of consecutive entries
    stride: usize,
    init_segment: InitializationSegment,
    allocator: Arc<dyn DmaAllocator>,
    clock: Arc<dyn Clock>,
    /// A number that needs to be different for every command, and the same for all mailboxes that are part of a command.
    token: u8,
    /// Number of 1 ms polls before giving up on a command.
    poll_limit: u32,
    /// When false, completed entries and mailboxes are accepted without checking their signatures.
    check_signatures: bool,
}

impl CommandQueue {
    /// Allocates the command queue page and tells the device where it is.
    pub fn create(
        init_segment: InitializationSegment,
        allocator: Arc<dyn DmaAllocator>,
        clock: Arc<dyn Clock>,
    ) -> Result<CommandQueue, CommandQueueError> {
        let num_entries = init_segment.num_cmdq_entries();
        let stride = init_segment.cmdq_entry_stride();
        if stride < core::mem::size_of::<CommandQueueEntry>() || num_entries * stride > PAGE_SIZE {
            error!("CommandQueue::create(): unsupported geometry, {} entries with stride {}", num_entries, stride);
            return Err(CommandQueueError::InvalidQueueGeometry);
        }

        let entries = create_page_mapping(&allocator, 1)?;
        init_segment
            .set_physical_address_of_cmdq(entries.device_address())
            .map_err(|_e| CommandQueueError::InvalidQueueGeometry)?;
        debug!("CommandQueue::create(): {} entries of stride {} at {:?}", num_entries, stride, entries.device_address());

        Ok(CommandQueue {
            entries,
            num_entries,
            stride,
            init_segment,
            allocator,
            clock,
            token: INITIAL_TOKEN,
            poll_limit: DEFAULT_COMMAND_POLL_LIMIT,
            check_signatures: false,
        })
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Device address of the command queue page.
    pub fn device_address(&self) -> DeviceAddress {
        self.entries.device_address()
    }

    /// Sets how many 1 ms polls a command gets before it times out.
    pub fn set_poll_limit(&mut self, polls: u32) {
        self.poll_limit = polls;
    }

    /// Enables or disables signature checking of completed commands.
    /// Disabled by default.
    pub fn set_signature_checking(&mut self, enabled: bool) {
        self.check_signatures = enabled;
    }

    pub(crate) fn allocator(&self) -> &Arc<dyn DmaAllocator> {
        &self.allocator
    }

    fn next_token(&mut self) -> u8 {
        loop {
            self.token = self.token.wrapping_add(1);
            if self.token != 0 {
                return self.token;
            }
        }
    }

    /// Executes one command synchronously.
    ///
    /// # Arguments
    /// * `opcode`: the command to execute
    /// * `opmod`: opcode modifier, zero for commands that don't use one
    /// * `inline_input`: up to 8 bytes of command input following the opcode header
    /// * `extension_input`: command input beyond the 16 inline bytes, sent in mailboxes
    /// * `output_len`: the total length of the expected command output, including its 8-byte header
    ///
    /// Returns the full command output when firmware reports success.
    pub fn execute(
        &mut self,
        opcode: CommandOpcode,
        opmod: u16,
        inline_input: &[u8],
        extension_input: &[u8],
        output_len: usize,
    ) -> Result<CommandOutput, CommandQueueError> {
        if inline_input.len() > MAX_INLINE_INPUT {
            return Err(CommandQueueError::InlineInputTooLarge);
        }
        if self.entries.read_volatile_u8(self.entry_offset() + STATUS_BYTE_OFFSET)? & HW_OWNERSHIP != 0 {
            error!("CommandQueue::execute({:?}): command entry is still owned by HW", opcode);
            return Err(CommandQueueError::SlotOwnedByHardware);
        }

        let token = self.next_token();
        let input_len = if extension_input.is_empty() {
            COMMAND_HEADER_SIZE + inline_input.len()
        } else {
            INLINE_DATA_SIZE + extension_input.len()
        };
        let output_len = output_len.max(COMMAND_OUTPUT_HEADER_SIZE);

        let input_chain = match MailboxChain::for_payload(&self.allocator, extension_input.len(), token)? {
            Some(mut chain) => {
                chain.copy_in(extension_input)?;
                chain.sign()?;
                chain.sync_for_device();
                Some(chain)
            }
            None => None,
        };
        let output_chain = match MailboxChain::for_payload(&self.allocator, output_len.saturating_sub(INLINE_DATA_SIZE), token)? {
            Some(mut chain) => {
                chain.sign()?;
                chain.sync_for_device();
                Some(chain)
            }
            None => None,
        };

        let offset = self.entry_offset();
        {
            let entry = self.entries.as_type_mut::<CommandQueueEntry>(offset)?;
            entry.init(token, input_len as u32, output_len as u32);
            entry.set_input_inline_data(opcode as u16, opmod, inline_input)?;
            if let Some(ref chain) = input_chain {
                entry.set_input_mailbox_pointer(chain.head_address());
            }
            if let Some(ref chain) = output_chain {
                entry.set_output_mailbox_pointer(chain.head_address());
            }
            entry.sign();
        }
        self.entries.sync_for_device();

        trace!("CommandQueue: posting {:?} opmod {} token {:#X}, input {} bytes ({} mailboxes), output {} bytes",
            opcode, opmod, token, input_len, mailboxes_for(extension_input.len()), output_len);
        self.init_segment.post_command(COMMAND_SLOT);

        self.wait_for_completion(opcode)?;

        let entry = self.entries.as_type::<CommandQueueEntry>(offset)?;
        if self.check_signatures && !entry.verify() {
            error!("CommandQueue::execute({:?}): corrupt command entry signature", opcode);
            return Err(CommandQueueError::CorruptSignature);
        }

        let delivery = entry.delivery_status();
        if delivery != CommandDeliveryStatus::Success as u8 {
            error!("CommandQueue::execute({:?}): delivery failed with {:?} ({:#X})",
                opcode, CommandDeliveryStatus::try_from(delivery).ok(), delivery);
            return Err(CommandQueueError::DeliveryFailed(delivery));
        }

        let mut output = vec![0u8; output_len];
        let inline_len = output_len.min(INLINE_DATA_SIZE);
        output[..inline_len].copy_from_slice(&entry.output_inline_data()[..inline_len]);
        if let Some(chain) = output_chain {
            chain.sync_for_cpu();
            if self.check_signatures && !chain.verify(token) {
                error!("CommandQueue::execute({:?}): corrupt output mailbox", opcode);
                return Err(CommandQueueError::CorruptSignature);
            }
            chain.copy_out(&mut output[INLINE_DATA_SIZE..])?;
        }
        // the input chain is no longer needed
        drop(input_chain);

        let output = CommandOutput::new(output);
        if output.status() != CommandReturnStatus::OK as u8 {
            warn!("CommandQueue::execute({:?}): firmware returned status {:?} ({:#X}), syndrome {:#X}",
                opcode, CommandReturnStatus::try_from(output.status()).ok(), output.status(), output.syndrome());
            return Err(CommandQueueError::CommandFailed { status: output.status(), syndrome: output.syndrome() });
        }
        Ok(output)
    }

    fn entry_offset(&self) -> usize {
        COMMAND_SLOT * self.stride
    }

    /// Polls the ownership bit of the command entry every millisecond until HW hands it back.
    fn wait_for_completion(&self, opcode: CommandOpcode) -> Result<(), CommandQueueError> {
        let status_offset = self.entry_offset() + STATUS_BYTE_OFFSET;
        for _ in 0..self.poll_limit {
            self.entries.sync_for_cpu();
            if self.entries.read_volatile_u8(status_offset)? & HW_OWNERSHIP == 0 {
                return Ok(());
            }
            self.clock.delay_us(1000);
        }
        error!("CommandQueue: {:?} timed out after {} ms", opcode, self.poll_limit);
        Err(CommandQueueError::Timeout)
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("address", &self.entries.device_address())
            .field("entries", &self.num_entries)
            .field("stride", &self.stride)
            .field("token", &self.token)
            .finish()
    }
}
