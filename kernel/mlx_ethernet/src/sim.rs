//! A simulated ConnectX device for exercising the driver without hardware.
//!
//! [`SimulatedDevice`] implements [`RegisterSpace`]. It keeps a map of register values,
//! logs every write, and executes firmware commands synchronously when the command doorbell is rung,
//! reading and writing the command entry and mailboxes through the identity mapping of [`HostDmaAllocator`].
//! It remembers the event and completion queues it created so tests can post events and completions into them.
//!
//! Only use it with memory from a [`HostDmaAllocator`] (or a wrapper around one).

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::convert::TryFrom;
use core::sync::atomic::{fence, AtomicU64, Ordering};
use dma_region::{DeviceAddress, HostDmaAllocator};
use spin::Mutex;
use zerocopy::FromBytes;
use crate::command_queue::{CommandOpcode, CommandQueueEntry, CommandReturnStatus, INLINE_DATA_SIZE};
use crate::completion_queue::{CompletionQueueContext, CompletionQueueEntry, CompletionQueueOpcode};
use crate::event_queue::{EventQueueContext, EventQueueEntry};
use crate::initialization_segment::*;
use crate::mailbox::{CommandInterfaceMailbox, MAILBOX_DATA_SIZE_IN_BYTES, MAILBOX_SIZE_IN_BYTES};
use crate::ring::DescriptorRing;
use crate::Clock;

/// The UAR page the simulated firmware hands out.
pub const SIM_UAR_PAGE:         u32 = 8;
/// The reserved lkey the simulated firmware reports.
pub const SIM_RESERVED_LKEY:    u32 = 0x100;
/// The highest ISSI the simulated firmware supports.
pub const SIM_SUPPORTED_ISSI:   u16 = 1;
pub const SIM_FW_MAJOR:         u16 = 16;
pub const SIM_FW_MINOR:         u16 = 26;
pub const SIM_FW_SUBMINOR:      u16 = 1040;

/// Offset of the page-address list in CREATE_EQ and CREATE_CQ mailbox input.
const CREATE_QUEUE_PAS_OFFSET:  usize = 256;


/// How the simulated firmware treats posted commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Execute every command and hand the entry back.
    Respond,
    /// Never hand command entries back, as if the firmware had hung.
    Ignore,
}

/// A command as the simulated firmware saw it.
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub opcode: u16,
    pub op_mod: u16,
    pub token: u8,
    /// The 16 inline input bytes followed by all mailbox input.
    pub input: Vec<u8>,
    pub input_length: u32,
    pub output_length: u32,
    pub input_mailboxes: usize,
    pub output_mailboxes: usize,
    pub entry_signature_ok: bool,
    /// True if every input mailbox had a valid signature, the command's token and the right block number.
    pub mailbox_signatures_ok: bool,
}

impl RecordedCommand {
    /// The 8 bytes of command-specific inline input.
    pub fn inline_input(&self) -> &[u8] {
        &self.input[8..INLINE_DATA_SIZE]
    }

    /// The input that travelled in mailboxes.
    pub fn extension(&self) -> &[u8] {
        &self.input[INLINE_DATA_SIZE..]
    }

    pub fn opcode(&self) -> Option<CommandOpcode> {
        CommandOpcode::try_from(self.opcode).ok()
    }
}

/// An event or completion queue created on the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimQueue {
    pub number: u32,
    pub base: DeviceAddress,
    pub log_size: u32,
    /// How many entries the device has written so far.
    pub producer_counter: u32,
}


/// The contents of a completion the simulated device writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCompletion {
    pub opcode: u8,
    pub wqe_counter: u16,
    pub byte_count: u32,
    pub rx_hash: u32,
    pub rx_hash_type: u8,
    pub flags: u32,
    pub timestamp: u64,
    pub syndrome: u8,
}

impl SimCompletion {
    /// A successful send completion for the WQE at `wqe_counter`.
    pub fn transmit(wqe_counter: u16) -> SimCompletion {
        SimCompletion { opcode: CompletionQueueOpcode::Requester as u8, wqe_counter, ..Default::default() }
    }

    /// A successful receive of `byte_count` bytes into the WQE at `wqe_counter`.
    pub fn receive(wqe_counter: u16, byte_count: u32) -> SimCompletion {
        SimCompletion { opcode: CompletionQueueOpcode::ResponderSend as u8, wqe_counter, byte_count, ..Default::default() }
    }

    /// An error completion with the given error opcode.
    pub fn error(opcode: CompletionQueueOpcode, wqe_counter: u16, syndrome: u8) -> SimCompletion {
        SimCompletion { opcode: opcode as u8, wqe_counter, syndrome, ..Default::default() }
    }

    /// Writes this completion into `entry` with the given owner bit.
    pub fn write_to(&self, entry: &mut CompletionQueueEntry, owner: u8) {
        entry.fill(
            self.opcode, owner, self.wqe_counter, self.byte_count,
            self.rx_hash, self.rx_hash_type, self.flags, self.timestamp, self.syndrome,
        );
    }
}

/// Writes `completion` into the CQ ring entry at `counter`, marking it ready for that pass of the ring.
pub fn write_completion(ring: &mut DescriptorRing<CompletionQueueEntry>, counter: u32, completion: &SimCompletion) {
    let owner = ring.expected_owner(counter);
    completion.write_to(ring.entry_mut(counter), owner);
    ring.sync_for_device();
}

/// Writes an event into the EQ ring entry at `counter`, marking it ready for that pass of the ring.
pub fn write_event(ring: &mut DescriptorRing<EventQueueEntry>, counter: u32, event_type: u8, data: [u32; 7]) {
    let owner = ring.expected_owner(counter);
    ring.entry_mut(counter).fill(event_type, 0, data, owner);
    ring.sync_for_device();
}


struct SimState {
    registers: BTreeMap<usize, u32>,
    writes32: Vec<(usize, u32)>,
    writes64: Vec<(usize, [u8; 8])>,
    barriers: usize,
    mode: ResponseMode,
    delivery_status: u8,
    corrupt_signatures: bool,
    initializing_reads: u32,
    timer: u64,
    rejections: BTreeMap<u16, (u8, u32)>,
    commands: Vec<RecordedCommand>,
    next_object: u32,
    boot_pages: i32,
    init_pages: i32,
    pages_given: usize,
    issi: u16,
    event_queues: Vec<SimQueue>,
    completion_queues: Vec<SimQueue>,
}

impl SimState {
    fn register(&self, offset: usize) -> u32 {
        self.registers.get(&offset).copied().unwrap_or(0)
    }

    fn next_object(&mut self) -> u32 {
        self.next_object += 1;
        self.next_object
    }
}


/// A simulated device register space with firmware behind it.
pub struct SimulatedDevice {
    state: Mutex<SimState>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        SimulatedDevice::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> SimulatedDevice {
        let mut registers = BTreeMap::new();
        registers.insert(FW_VERSION, ((SIM_FW_MINOR as u32) << 16) | SIM_FW_MAJOR as u32);
        registers.insert(CMDIF_FW_SUBMINOR, ((CMD_INTERFACE_SUPPORTED as u32) << 16) | SIM_FW_SUBMINOR as u32);
        // 32 entries with a 64-byte stride
        registers.insert(CMDQ_ADDR_LOW, (5 << 4) | 6);
        SimulatedDevice {
            state: Mutex::new(SimState {
                registers,
                writes32: Vec::new(),
                writes64: Vec::new(),
                barriers: 0,
                mode: ResponseMode::Respond,
                delivery_status: 0,
                corrupt_signatures: false,
                initializing_reads: 0,
                timer: 0,
                rejections: BTreeMap::new(),
                commands: Vec::new(),
                next_object: 0,
                boot_pages: 4,
                init_pages: 8,
                pages_given: 0,
                issi: 0,
                event_queues: Vec::new(),
                completion_queues: Vec::new(),
            }),
        }
    }

    pub fn set_response_mode(&self, mode: ResponseMode) {
        self.state.lock().mode = mode;
    }

    /// Makes every following command report this delivery status.
    pub fn set_delivery_status(&self, status: u8) {
        self.state.lock().delivery_status = status;
    }

    /// Makes the firmware write wrong signatures into completed entries and output mailboxes.
    pub fn set_corrupt_signatures(&self, corrupt: bool) {
        self.state.lock().corrupt_signatures = corrupt;
    }

    /// Makes the firmware fail every `opcode` command with `status` and `syndrome`.
    pub fn reject(&self, opcode: CommandOpcode, status: CommandReturnStatus, syndrome: u32) {
        self.state.lock().rejections.insert(opcode as u16, (status as u8, syndrome));
    }

    /// The device reports it is still initializing for the next `reads` reads of the state register.
    pub fn set_initializing_reads(&self, reads: u32) {
        self.state.lock().initializing_reads = reads;
    }

    /// Sets the command interface revision the device reports.
    pub fn set_cmd_interface_revision(&self, revision: u16) {
        let mut state = self.state.lock();
        let sub = state.register(CMDIF_FW_SUBMINOR) & 0xFFFF;
        state.registers.insert(CMDIF_FW_SUBMINOR, ((revision as u32) << 16) | sub);
    }

    /// Sets the command queue geometry the device reports.
    pub fn set_cmdq_geometry(&self, log_entries: u32, log_stride: u32) {
        self.state.lock().registers.insert(CMDQ_ADDR_LOW, ((log_entries & 0xF) << 4) | (log_stride & 0xF));
    }

    pub fn set_timer(&self, ticks: u64) {
        self.state.lock().timer = ticks;
    }

    /// Sets how many pages QUERY_PAGES asks for at the boot and init stages.
    pub fn set_page_requests(&self, boot: i32, init: i32) {
        let mut state = self.state.lock();
        state.boot_pages = boot;
        state.init_pages = init;
    }

    pub fn register(&self, offset: usize) -> u32 {
        self.state.lock().register(offset)
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state.lock().commands.clone()
    }

    pub fn last_command(&self) -> Option<RecordedCommand> {
        self.state.lock().commands.last().cloned()
    }

    /// The opcodes of every command seen so far, in order.
    pub fn opcodes(&self) -> Vec<u16> {
        self.state.lock().commands.iter().map(|c| c.opcode).collect()
    }

    /// Every 32-bit register write, in order.
    pub fn writes32(&self) -> Vec<(usize, u32)> {
        self.state.lock().writes32.clone()
    }

    /// Every raw 64-bit register write, in order.
    pub fn writes64(&self) -> Vec<(usize, [u8; 8])> {
        self.state.lock().writes64.clone()
    }

    pub fn clear_writes(&self) {
        let mut state = self.state.lock();
        state.writes32.clear();
        state.writes64.clear();
    }

    pub fn barriers(&self) -> usize {
        self.state.lock().barriers
    }

    /// The total number of pages given to firmware with MANAGE_PAGES.
    pub fn pages_given(&self) -> usize {
        self.state.lock().pages_given
    }

    pub fn current_issi(&self) -> u16 {
        self.state.lock().issi
    }

    pub fn event_queues(&self) -> Vec<SimQueue> {
        self.state.lock().event_queues.clone()
    }

    pub fn completion_queues(&self) -> Vec<SimQueue> {
        self.state.lock().completion_queues.clone()
    }

    /// Writes the next completion into CQ `cqn`.
    pub fn post_completion(&self, cqn: u32, completion: &SimCompletion) -> Result<(), &'static str> {
        let mut state = self.state.lock();
        let queue = state.completion_queues.iter_mut()
            .find(|q| q.number == cqn)
            .ok_or("no such completion queue")?;
        let counter = queue.producer_counter;
        let index = counter as usize & ((1 << queue.log_size) - 1);
        let owner = ((counter >> queue.log_size) & 1) as u8;
        // SAFE: the CQ ring was allocated by a HostDmaAllocator and handed to us in CREATE_CQ
        let bytes = unsafe { HostDmaAllocator::device_memory(queue.base.offset(index * 64), 64) };
        let entry = CompletionQueueEntry::mut_from(bytes).ok_or("misaligned completion queue entry")?;
        completion.write_to(entry, owner);
        queue.producer_counter = counter.wrapping_add(1);
        fence(Ordering::SeqCst);
        Ok(())
    }

    /// Writes the next event into EQ `eqn`.
    pub fn post_event(&self, eqn: u32, event_type: u8, data: [u32; 7]) -> Result<(), &'static str> {
        let mut state = self.state.lock();
        let queue = state.event_queues.iter_mut()
            .find(|q| q.number == eqn)
            .ok_or("no such event queue")?;
        let counter = queue.producer_counter;
        let index = counter as usize & ((1 << queue.log_size) - 1);
        let owner = ((counter >> queue.log_size) & 1) as u8;
        // SAFE: the EQ ring was allocated by a HostDmaAllocator and handed to us in CREATE_EQ
        let bytes = unsafe { HostDmaAllocator::device_memory(queue.base.offset(index * 64), 64) };
        let entry = EventQueueEntry::mut_from(bytes).ok_or("misaligned event queue entry")?;
        entry.fill(event_type, 0, data, owner);
        queue.producer_counter = counter.wrapping_add(1);
        fence(Ordering::SeqCst);
        Ok(())
    }
}

impl RegisterSpace for SimulatedDevice {
    fn read32(&self, offset: usize) -> u32 {
        let mut state = self.state.lock();
        match offset {
            DEVICE_STATE if state.initializing_reads > 0 => {
                state.initializing_reads -= 1;
                state.register(DEVICE_STATE) | (1 << 31)
            }
            INTERNAL_TIMER_HIGH => (state.timer >> 32) as u32,
            INTERNAL_TIMER_LOW => state.timer as u32,
            _ => state.register(offset),
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        state.writes32.push((offset, value));
        if offset == CMDQ_DOORBELL {
            for slot in 0..32 {
                if value & (1 << slot) != 0 {
                    process_command(&mut state, slot);
                }
            }
        } else {
            state.registers.insert(offset, value);
        }
    }

    fn write64_raw(&self, offset: usize, bytes: [u8; 8]) {
        self.state.lock().writes64.push((offset, bytes));
    }

    fn barrier(&self, _offset: usize, _len: usize, _kind: BarrierKind) {
        self.state.lock().barriers += 1;
        fence(Ordering::SeqCst);
    }
}


/// Reads `len` bytes of mailbox data starting at the mailbox at `head`.
/// Returns the data, whether every mailbox checked out, and the number of mailboxes read.
fn read_mailbox_chain(head: DeviceAddress, len: usize, token: u8) -> (Vec<u8>, bool, usize) {
    let mut data = Vec::with_capacity(len);
    let mut ok = true;
    let mut count = 0;
    let mut next = head;
    while data.len() < len {
        if next.value() == 0 {
            ok = false;
            break;
        }
        // SAFE: the driver allocated the chain from a HostDmaAllocator and posted it in the command
        let bytes = unsafe { HostDmaAllocator::device_memory(next, MAILBOX_SIZE_IN_BYTES) };
        let mailbox = match CommandInterfaceMailbox::ref_from(bytes) {
            Some(mb) => mb,
            None => { ok = false; break; }
        };
        ok &= mailbox.verify() && mailbox.token() == token && mailbox.block_number() == count as u32;
        let take = (len - data.len()).min(MAILBOX_DATA_SIZE_IN_BYTES);
        data.extend_from_slice(&mailbox.data()[..take]);
        next = mailbox.next_pointer();
        count += 1;
    }
    (data, ok, count)
}

/// Writes `data` into the output mailbox chain starting at `head`, re-signing every mailbox.
fn write_mailbox_chain(head: DeviceAddress, data: &[u8], corrupt: bool) -> usize {
    let mut count = 0;
    let mut next = head;
    for chunk in data.chunks(MAILBOX_DATA_SIZE_IN_BYTES) {
        if next.value() == 0 {
            break;
        }
        // SAFE: the driver allocated the chain from a HostDmaAllocator and posted it in the command
        let bytes = unsafe { HostDmaAllocator::device_memory(next, MAILBOX_SIZE_IN_BYTES) };
        let mailbox = match CommandInterfaceMailbox::mut_from(bytes) {
            Some(mb) => mb,
            None => break,
        };
        mailbox.data_mut()[..chunk.len()].copy_from_slice(chunk);
        mailbox.sign();
        if corrupt {
            mailbox.data_mut()[0] ^= 0xFF;
        }
        next = mailbox.next_pointer();
        count += 1;
    }
    count
}

fn put_u16(out: &mut [u8], offset: usize, value: u16) {
    if let Some(dst) = out.get_mut(offset..offset + 2) {
        dst.copy_from_slice(&value.to_be_bytes());
    }
}

fn put_u32(out: &mut [u8], offset: usize, value: u32) {
    if let Some(dst) = out.get_mut(offset..offset + 4) {
        dst.copy_from_slice(&value.to_be_bytes());
    }
}

fn get_u32(input: &[u8], offset: usize) -> u32 {
    input.get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .unwrap_or(0)
}

fn get_u64(input: &[u8], offset: usize) -> u64 {
    match input.get(offset..offset + 8) {
        Some(b) => {
            let mut word = [0u8; 8];
            word.copy_from_slice(b);
            u64::from_be_bytes(word)
        }
        None => 0,
    }
}

fn process_command(state: &mut SimState, slot: usize) {
    let low = state.register(CMDQ_ADDR_LOW);
    let base = ((state.register(CMDQ_ADDR_HIGH) as u64) << 32) | (low & !0xFFF) as u64;
    if base == 0 {
        return;
    }
    let stride = 1usize << (low & 0xF);
    let address = DeviceAddress::new(base).offset(slot * stride);

    // SAFE: the driver allocated the command queue from a HostDmaAllocator and published its address
    let bytes = unsafe { HostDmaAllocator::device_memory(address, core::mem::size_of::<CommandQueueEntry>()) };
    let entry = match CommandQueueEntry::mut_from(bytes) {
        Some(e) => e,
        None => return,
    };
    if !entry.owned_by_hw() {
        return;
    }

    let token = entry.token();
    let input_length = entry.input_length() as usize;
    let output_length = entry.output_length() as usize;
    let mut input = entry.input_inline_data().to_vec();
    let (mut mailbox_signatures_ok, mut input_mailboxes) = (true, 0);
    if input_length > INLINE_DATA_SIZE {
        let (data, ok, count) = read_mailbox_chain(entry.input_mailbox_pointer(), input_length - INLINE_DATA_SIZE, token);
        input.extend_from_slice(&data);
        mailbox_signatures_ok = ok;
        input_mailboxes = count;
    }

    let record = RecordedCommand {
        opcode: entry.opcode(),
        op_mod: entry.opmod(),
        token,
        input,
        input_length: input_length as u32,
        output_length: output_length as u32,
        input_mailboxes,
        output_mailboxes: 0,
        entry_signature_ok: entry.verify(),
        mailbox_signatures_ok,
    };

    if state.mode == ResponseMode::Ignore {
        state.commands.push(record);
        return;
    }

    let output = respond(state, &record, output_length.max(8));
    let inline_len = output.len().min(INLINE_DATA_SIZE);
    entry.output_inline_data_mut()[..inline_len].copy_from_slice(&output[..inline_len]);
    let output_mailboxes = if output.len() > INLINE_DATA_SIZE {
        write_mailbox_chain(entry.output_mailbox_pointer(), &output[INLINE_DATA_SIZE..], state.corrupt_signatures)
    } else {
        0
    };

    entry.complete(state.delivery_status);
    entry.sign();
    if state.corrupt_signatures {
        // signature byte of the entry
        bytes[61] ^= 0x5A;
    }
    fence(Ordering::SeqCst);

    state.commands.push(RecordedCommand { output_mailboxes, ..record });
}

/// Executes one command and returns its full output.
fn respond(state: &mut SimState, command: &RecordedCommand, output_length: usize) -> Vec<u8> {
    let mut out = vec![0u8; output_length];
    if let Some(&(status, syndrome)) = state.rejections.get(&command.opcode) {
        out[0] = status;
        put_u32(&mut out, 4, syndrome);
        return out;
    }

    let opcode = match command.opcode() {
        Some(op) => op,
        None => {
            out[0] = CommandReturnStatus::BadOp as u8;
            return out;
        }
    };

    match opcode {
        CommandOpcode::QueryIssi => {
            put_u16(&mut out, 10, state.issi);
            // the bitmap is big-endian, ISSI n is bit n % 8 of byte 79 - n / 8
            for issi in 0..=SIM_SUPPORTED_ISSI {
                let index = 32 + 79 - (issi / 8) as usize;
                if let Some(byte) = out.get_mut(index) {
                    *byte |= 1 << (issi % 8);
                }
            }
        }
        CommandOpcode::SetIssi => {
            state.issi = get_u32(&command.input, 8) as u16;
        }
        CommandOpcode::QueryPages => {
            let pages = match command.op_mod {
                1 => state.boot_pages,
                2 => state.init_pages,
                _ => 0,
            };
            put_u32(&mut out, 12, pages as u32);
        }
        CommandOpcode::ManagePages => {
            state.pages_given += get_u32(&command.input, 12) as usize;
        }
        CommandOpcode::AllocUar => put_u32(&mut out, 8, SIM_UAR_PAGE),
        CommandOpcode::QuerySpecialContexts => put_u32(&mut out, 12, SIM_RESERVED_LKEY),
        CommandOpcode::AllocPd
        | CommandOpcode::AllocTransportDomain
        | CommandOpcode::CreateTis
        | CommandOpcode::CreateSq
        | CommandOpcode::CreateRq => {
            let id = state.next_object();
            put_u32(&mut out, 8, id);
        }
        CommandOpcode::CreateEq => {
            let eqn = state.next_object() & 0xFF;
            let ext = command.extension();
            let log_size = ext.get(..64)
                .and_then(EventQueueContext::read_from)
                .map_or(0, |ctx| ctx.log_eq_size());
            let base = DeviceAddress::new(get_u64(ext, CREATE_QUEUE_PAS_OFFSET));
            state.event_queues.push(SimQueue { number: eqn, base, log_size, producer_counter: 0 });
            put_u32(&mut out, 8, eqn);
        }
        CommandOpcode::CreateCq => {
            let cqn = state.next_object();
            let ext = command.extension();
            let log_size = ext.get(..64)
                .and_then(CompletionQueueContext::read_from)
                .map_or(0, |ctx| ctx.log_cq_size());
            let base = DeviceAddress::new(get_u64(ext, CREATE_QUEUE_PAS_OFFSET));
            state.completion_queues.push(SimQueue { number: cqn, base, log_size, producer_counter: 0 });
            put_u32(&mut out, 8, cqn);
        }
        _ => {}
    }
    out
}


/// A clock whose time only moves when the driver delays or a test advances it.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    now_ns: AtomicU64,
    delays: AtomicU64,
}

impl SimulatedClock {
    pub fn new() -> SimulatedClock {
        SimulatedClock::default()
    }

    /// The number of times `delay_us` was called.
    pub fn delays(&self) -> u64 {
        self.delays.load(Ordering::Acquire)
    }

    pub fn advance(&self, nanoseconds: u64) {
        self.now_ns.fetch_add(nanoseconds, Ordering::AcqRel);
    }

    pub fn set_uptime(&self, nanoseconds: u64) {
        self.now_ns.store(nanoseconds, Ordering::Release);
    }
}

impl Clock for SimulatedClock {
    fn delay_us(&self, microseconds: u64) {
        self.delays.fetch_add(1, Ordering::AcqRel);
        self.now_ns.fetch_add(microseconds * 1000, Ordering::AcqRel);
    }

    fn uptime_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }
}
