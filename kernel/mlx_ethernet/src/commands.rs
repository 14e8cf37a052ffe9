//! Typed wrappers for the firmware commands a driver needs to bring the device up
//! and create its queues. Each is a thin layer over [`CommandQueue::execute()`].
//! (PRM Chapter 23: Command Reference)
//!
//! Inputs that don't fit in the 8 inline bytes are laid out as they appear after the first
//! 16 bytes of the command, and travel in mailboxes.

use alloc::vec::Vec;
use dma_region::DeviceAddress;
use num_enum::TryFromPrimitive;
use zerocopy::{AsBytes, FromZeroes};
use crate::command_queue::{CommandOpcode, CommandQueue, CommandQueueError, CommandReturnStatus};
use crate::completion_queue::CompletionQueueContext;
use crate::event_queue::EventQueueContext;
use crate::receive_queue::ReceiveQueueContextWithWorkQueue;
use crate::send_queue::{QueueState, SendQueueContextWithWorkQueue, TransportInterfaceSendContext};
use crate::work_queue::{LOG_RECEIVE_WQE_STRIDE, LOG_SEND_WQE_STRIDE};
use crate::QUEUE_NUMBER_MASK;

/// Output length of commands that return nothing beyond the status header.
const OUTPUT_HEADER_ONLY:       usize = 8;
/// Output length of commands whose result fits in the inline output.
const OUTPUT_INLINE:            usize = 16;
/// QUERY_ISSI returns 16 inline bytes, then 16 reserved bytes and an 80-byte bitmap of supported ISSIs.
const QUERY_ISSI_OUTPUT:        usize = 112;
const SUPPORTED_ISSI_OFFSET:    usize = 32;
const SUPPORTED_ISSI_LEN:       usize = 80;

const CREATE_EQ_RESERVED:       usize = 176;
const CREATE_CQ_RESERVED:       usize = 192;
const CREATE_QUEUE_RESERVED:    usize = 16;


/// The opcode modifier of QUERY_PAGES: which stage of initialization the pages are for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum QueryPagesOpMod {
    BootPages       = 0x01,
    InitPages       = 0x02,
    RegularPages    = 0x03,
}

/// The opcode modifier of MANAGE_PAGES.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum ManagePagesOpMod {
    AllocationFail      = 0x00,
    AllocationSuccess   = 0x01,
    HcaReturnPages      = 0x02,
}

/// The profile TEARDOWN_HCA runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum TeardownProfile {
    Graceful    = 0x0,
    Panic       = 0x1,
}

/// Interface Step Sequence ID support reported by QUERY_ISSI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssiSupport {
    pub current: u16,
    supported: [u8; SUPPORTED_ISSI_LEN],
}

impl IssiSupport {
    /// What a device that doesn't implement QUERY_ISSI supports: only ISSI 0.
    pub fn legacy() -> IssiSupport {
        let mut supported = [0u8; SUPPORTED_ISSI_LEN];
        supported[SUPPORTED_ISSI_LEN - 1] = 1;
        IssiSupport { current: 0, supported }
    }

    /// Returns true if firmware supports ISSI `issi`.
    /// The bitmap is big-endian: ISSI 0 is the lowest bit of the last byte.
    pub fn supports(&self, issi: u16) -> bool {
        let byte = (issi / 8) as usize;
        if byte >= SUPPORTED_ISSI_LEN {
            return false;
        }
        self.supported[SUPPORTED_ISSI_LEN - 1 - byte] & (1 << (issi % 8)) != 0
    }
}


/// Appends the big-endian physical address list of a queue or page grant.
fn push_page_addresses(buf: &mut Vec<u8>, pages: &[DeviceAddress]) {
    for page in pages {
        buf.extend_from_slice(&page.value().to_be_bytes());
    }
}

fn queue_number(output: &crate::command_queue::CommandOutput) -> Result<u32, CommandQueueError> {
    Ok(output.read_u32(8)? & QUEUE_NUMBER_MASK)
}

impl CommandQueue {
    /// Enables the HCA. The first command after the command queue is set up.
    pub fn enable_hca(&mut self) -> Result<(), CommandQueueError> {
        self.execute(CommandOpcode::EnableHca, 0, &[0; 4], &[], OUTPUT_HEADER_ONLY)?;
        Ok(())
    }

    pub fn teardown_hca(&mut self, profile: TeardownProfile) -> Result<(), CommandQueueError> {
        let profile = (profile as u16).to_be_bytes();
        self.execute(CommandOpcode::TeardownHca, 0, &[0, 0, profile[0], profile[1]], &[], OUTPUT_INLINE)?;
        Ok(())
    }

    /// Queries the current and supported Interface Step Sequence IDs.
    pub fn query_issi(&mut self) -> Result<IssiSupport, CommandQueueError> {
        let output = self.execute(CommandOpcode::QueryIssi, 0, &[], &[], QUERY_ISSI_OUTPUT)?;
        let bitmap = output.as_bytes()
            .get(SUPPORTED_ISSI_OFFSET..SUPPORTED_ISSI_OFFSET + SUPPORTED_ISSI_LEN)
            .ok_or(CommandQueueError::OutputTooShort)?;
        let mut supported = [0u8; SUPPORTED_ISSI_LEN];
        supported.copy_from_slice(bitmap);
        Ok(IssiSupport { current: output.read_u16(10)?, supported })
    }

    /// Negotiates the ISSI: devices that don't know QUERY_ISSI only speak ISSI 0.
    /// Returns the ISSI in effect afterwards.
    pub fn negotiate_issi(&mut self, wanted: u16) -> Result<u16, CommandQueueError> {
        let support = match self.query_issi() {
            Ok(support) => support,
            Err(e) if e.return_status() == Some(CommandReturnStatus::BadOp) => {
                debug!("QUERY_ISSI is not supported, assuming ISSI 0");
                IssiSupport::legacy()
            }
            Err(e) => return Err(e),
        };
        if support.supports(wanted) {
            self.set_issi(wanted)?;
            Ok(wanted)
        } else {
            warn!("firmware does not support ISSI {}, staying at {}", wanted, support.current);
            Ok(support.current)
        }
    }

    pub fn set_issi(&mut self, issi: u16) -> Result<(), CommandQueueError> {
        let issi = issi.to_be_bytes();
        self.execute(CommandOpcode::SetIssi, 0, &[0, 0, issi[0], issi[1]], &[], OUTPUT_HEADER_ONLY)?;
        Ok(())
    }

    /// Returns the number of pages firmware wants for the given stage.
    /// A negative number means firmware has pages to give back.
    pub fn query_pages(&mut self, op_mod: QueryPagesOpMod) -> Result<i32, CommandQueueError> {
        let output = self.execute(CommandOpcode::QueryPages, op_mod as u16, &[0; 4], &[], OUTPUT_INLINE)?;
        Ok(output.read_u32(12)? as i32)
    }

    /// Gives pages to firmware.
    pub fn manage_pages(&mut self, op_mod: ManagePagesOpMod, pages: &[DeviceAddress]) -> Result<(), CommandQueueError> {
        let count = (pages.len() as u32).to_be_bytes();
        let mut extension = Vec::with_capacity(pages.len() * 8);
        push_page_addresses(&mut extension, pages);
        self.execute(CommandOpcode::ManagePages, op_mod as u16, &[0, 0, 0, 0, count[0], count[1], count[2], count[3]], &extension, OUTPUT_INLINE)?;
        Ok(())
    }

    pub fn init_hca(&mut self) -> Result<(), CommandQueueError> {
        self.execute(CommandOpcode::InitHca, 0, &[0; 4], &[], OUTPUT_HEADER_ONLY)?;
        Ok(())
    }

    /// Allocates a UAR page and returns its number.
    pub fn alloc_uar(&mut self) -> Result<u32, CommandQueueError> {
        let output = self.execute(CommandOpcode::AllocUar, 0, &[], &[], OUTPUT_INLINE)?;
        queue_number(&output)
    }

    /// Allocates a protection domain.
    pub fn alloc_pd(&mut self) -> Result<u32, CommandQueueError> {
        let output = self.execute(CommandOpcode::AllocPd, 0, &[], &[], OUTPUT_INLINE)?;
        queue_number(&output)
    }

    pub fn alloc_transport_domain(&mut self) -> Result<u32, CommandQueueError> {
        let output = self.execute(CommandOpcode::AllocTransportDomain, 0, &[], &[], OUTPUT_INLINE)?;
        queue_number(&output)
    }

    /// Returns the reserved lkey, which lets queues use physical addresses without a memory key.
    pub fn query_special_contexts(&mut self) -> Result<u32, CommandQueueError> {
        let output = self.execute(CommandOpcode::QuerySpecialContexts, 0, &[], &[], OUTPUT_INLINE)?;
        output.read_u32(12)
    }

    /// Creates an event queue over `pages` subscribed to the events in `event_bitmask`, and returns its number.
    pub fn create_eq(&mut self, uar_page: u32, log_eq_size: u32, event_bitmask: u64, pages: &[DeviceAddress]) -> Result<u32, CommandQueueError> {
        let mut ctx = EventQueueContext::new_zeroed();
        ctx.init(uar_page, log_eq_size, 0);

        let mut extension = Vec::new();
        extension.extend_from_slice(ctx.as_bytes());
        extension.extend_from_slice(&[0; 8]);
        extension.extend_from_slice(&event_bitmask.to_be_bytes());
        extension.extend_from_slice(&[0; CREATE_EQ_RESERVED]);
        push_page_addresses(&mut extension, pages);

        let output = self.execute(CommandOpcode::CreateEq, 0, &[0; 8], &extension, OUTPUT_INLINE)?;
        Ok(output.read_u32(8)? & 0xFF)
    }

    /// Creates a completion queue and returns its number.
    pub fn create_cq(&mut self, ctx: &CompletionQueueContext, pages: &[DeviceAddress]) -> Result<u32, CommandQueueError> {
        let mut extension = Vec::new();
        extension.extend_from_slice(ctx.as_bytes());
        extension.extend_from_slice(&[0; CREATE_CQ_RESERVED]);
        push_page_addresses(&mut extension, pages);

        let output = self.execute(CommandOpcode::CreateCq, 0, &[], &extension, OUTPUT_INLINE)?;
        queue_number(&output)
    }

    /// Creates a transport interface send object in transport domain `td` and returns its number.
    pub fn create_tis(&mut self, td: u32) -> Result<u32, CommandQueueError> {
        let mut ctx = TransportInterfaceSendContext::new_zeroed();
        ctx.init(td);

        let mut extension = Vec::new();
        extension.extend_from_slice(&[0; CREATE_QUEUE_RESERVED]);
        extension.extend_from_slice(ctx.as_bytes());

        let output = self.execute(CommandOpcode::CreateTis, 0, &[], &extension, OUTPUT_INLINE)?;
        queue_number(&output)
    }

    /// Creates a send queue in the reset state and returns its number.
    pub fn create_sq(&mut self, params: &WorkQueueParams, tisn: u32, pages: &[DeviceAddress]) -> Result<u32, CommandQueueError> {
        let mut ctx = SendQueueContextWithWorkQueue::new_zeroed();
        ctx.sq.init(params.cqn, tisn);
        ctx.wq.init(params.pd, params.uar_page, params.doorbell, LOG_SEND_WQE_STRIDE, params.log_size);

        let mut extension = Vec::new();
        extension.extend_from_slice(&[0; CREATE_QUEUE_RESERVED]);
        extension.extend_from_slice(ctx.as_bytes());
        push_page_addresses(&mut extension, pages);

        let output = self.execute(CommandOpcode::CreateSq, 0, &[], &extension, OUTPUT_INLINE)?;
        queue_number(&output)
    }

    /// Moves send queue `sqn` from reset to ready.
    pub fn modify_sq(&mut self, sqn: u32) -> Result<(), CommandQueueError> {
        let mut ctx = SendQueueContextWithWorkQueue::new_zeroed();
        ctx.sq.set_state(QueueState::Ready);
        self.modify_queue(CommandOpcode::ModifySq, sqn, ctx.as_bytes())
    }

    /// Creates a receive queue in the reset state and returns its number.
    pub fn create_rq(&mut self, params: &WorkQueueParams, pages: &[DeviceAddress]) -> Result<u32, CommandQueueError> {
        let mut ctx = ReceiveQueueContextWithWorkQueue::new_zeroed();
        ctx.rq.init(params.cqn);
        ctx.wq.init(params.pd, params.uar_page, params.doorbell, LOG_RECEIVE_WQE_STRIDE, params.log_size);

        let mut extension = Vec::new();
        extension.extend_from_slice(&[0; CREATE_QUEUE_RESERVED]);
        extension.extend_from_slice(ctx.as_bytes());
        push_page_addresses(&mut extension, pages);

        let output = self.execute(CommandOpcode::CreateRq, 0, &[], &extension, OUTPUT_INLINE)?;
        queue_number(&output)
    }

    /// Moves receive queue `rqn` from reset to ready.
    pub fn modify_rq(&mut self, rqn: u32) -> Result<(), CommandQueueError> {
        let mut ctx = ReceiveQueueContextWithWorkQueue::new_zeroed();
        ctx.rq.set_state(QueueState::Ready);
        self.modify_queue(CommandOpcode::ModifyRq, rqn, ctx.as_bytes())
    }

    /// Shared by MODIFY_SQ and MODIFY_RQ: the current state and queue number travel inline,
    /// the modify bitmask and new context in the mailbox.
    fn modify_queue(&mut self, opcode: CommandOpcode, queue_number: u32, ctx: &[u8]) -> Result<(), CommandQueueError> {
        let state = (((QueueState::Reset as u32) << 28) | (queue_number & QUEUE_NUMBER_MASK)).to_be_bytes();
        let mut extension = Vec::new();
        // modify bitmask (hi, lo) and reserved
        extension.extend_from_slice(&[0; 16]);
        extension.extend_from_slice(ctx);
        self.execute(opcode, 0, &[state[0], state[1], state[2], state[3], 0, 0, 0, 0], &extension, OUTPUT_INLINE)?;
        Ok(())
    }
}

/// The parameters shared by CREATE_SQ and CREATE_RQ.
#[derive(Debug, Clone, Copy)]
pub struct WorkQueueParams {
    /// The CQ that completions for this queue go to
    pub cqn: u32,
    pub pd: u32,
    pub uar_page: u32,
    /// Device address of the queue's doorbell record
    pub doorbell: DeviceAddress,
    /// log2 of the number of entries
    pub log_size: u32,
}
