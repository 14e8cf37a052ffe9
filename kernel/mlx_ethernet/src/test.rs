extern crate std;

use super::*;
use alloc::sync::Arc;
use alloc::vec::Vec;
use dma_region::{DeviceAddress, DmaAllocator, HostDmaAllocator};
use zerocopy::{AsBytes, FromBytes, FromZeroes};
use crate::command_queue::{CommandQueueError, CommandReturnStatus, DEFAULT_COMMAND_POLL_LIMIT};
use crate::commands::{ManagePagesOpMod, QueryPagesOpMod};
use crate::completion_queue::{CompletionQueue, CompletionQueueOpcode};
use crate::event_queue::{EventQueue, EventType};
use crate::initialization_segment::*;
use crate::mailbox::{CommandInterfaceMailbox, MailboxChain, MAILBOX_ALIGN};
use crate::send_queue::{slots_for_segments, SendQueue, INLINE_HEADER_SIZE};
use crate::signature::xor_fold;
use crate::sim::*;

fn host_allocator() -> Arc<dyn DmaAllocator> {
    Arc::new(HostDmaAllocator)
}

fn setup() -> (Arc<SimulatedDevice>, Arc<SimulatedClock>, CommandQueue) {
    let sim = Arc::new(SimulatedDevice::new());
    let clock = Arc::new(SimulatedClock::new());
    let init = InitializationSegment::new(sim.clone());
    let cmdq = CommandQueue::create(init, host_allocator(), clock.clone()).expect("failed to create command queue");
    (sim, clock, cmdq)
}


#[test]
fn signed_entry_folds_to_ff() {
    let mut entry = CommandQueueEntry::new_zeroed();
    entry.init(0x42, 12, 8);
    entry.set_input_inline_data(CommandOpcode::EnableHca as u16, 0, &[0; 4]).unwrap();
    entry.set_input_mailbox_pointer(DeviceAddress::new(0x1234_5678_9000));
    entry.sign();
    assert!(entry.verify());
    assert_eq!(xor_fold(entry.as_bytes()), 0xFF);

    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(entry.as_bytes());
    bytes[20] ^= 0x01;
    let tampered = CommandQueueEntry::read_from(&bytes[..]).unwrap();
    assert!(!tampered.verify());
}

#[test]
fn entry_fields_land_at_wire_offsets() {
    let mut entry = CommandQueueEntry::new_zeroed();
    entry.init(0xAB, 0x10, 0x20);
    entry.set_input_inline_data(0x0107, 0x0002, &[1, 2, 3, 4]).unwrap();
    let bytes = entry.as_bytes();
    assert_eq!(bytes[0], 0x07);
    assert_eq!(&bytes[4..8], &[0, 0, 0, 0x10]);
    assert_eq!(&bytes[0x10..0x12], &[0x01, 0x07]);
    assert_eq!(&bytes[0x16..0x18], &[0x00, 0x02]);
    assert_eq!(&bytes[0x18..0x1C], &[1, 2, 3, 4]);
    assert_eq!(&bytes[0x38..0x3C], &[0, 0, 0, 0x20]);
    assert_eq!(bytes[0x3C], 0xAB);
    assert_eq!(bytes[0x3F] & 1, 1);
    assert!(entry.owned_by_hw());

    entry.complete(0x7);
    assert!(!entry.owned_by_hw());
    assert_eq!(entry.delivery_status(), 0x7);
    assert_eq!(entry.as_bytes()[0x3F], 0x7 << 1);
}

#[test]
fn inline_input_is_limited_to_eight_bytes() {
    let mut entry = CommandQueueEntry::new_zeroed();
    assert_eq!(entry.set_input_inline_data(1, 0, &[0; 9]), Err(CommandQueueError::InlineInputTooLarge));

    let (_sim, _clock, mut cmdq) = setup();
    assert_eq!(
        cmdq.execute(CommandOpcode::InitHca, 0, &[0; 9], &[], 8).unwrap_err(),
        CommandQueueError::InlineInputTooLarge
    );
}

#[test]
fn mailbox_signatures() {
    let mut mailbox = CommandInterfaceMailbox::new_zeroed();
    mailbox.set_control_fields(DeviceAddress::new(0xDEAD_B000), 3, 0x5C);
    mailbox.data_mut()[..4].copy_from_slice(&[9, 8, 7, 6]);
    mailbox.sign();
    assert!(mailbox.verify());
    assert_eq!(mailbox.token(), 0x5C);
    assert_eq!(mailbox.block_number(), 3);
    assert_eq!(mailbox.as_bytes()[0x23D], 0x5C);

    mailbox.data_mut()[100] = 1;
    assert!(!mailbox.verify());
}

#[test]
fn mailbox_chain_round_trip() {
    let allocator = host_allocator();
    for &len in &[0usize, 1, 511, 512, 513, 4097] {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        let chain = MailboxChain::for_payload(&allocator, len, 0x11).unwrap();
        let mut chain = match chain {
            None => {
                assert_eq!(len, 0);
                continue;
            }
            Some(chain) => chain,
        };
        assert_eq!(chain.len(), (len + 511) / 512);

        chain.copy_in(&payload).unwrap();
        chain.sign().unwrap();
        assert!(chain.verify(0x11));
        assert!(!chain.verify(0x12));

        for i in 0..chain.len() {
            let mailbox = chain.mailbox(i).unwrap();
            assert_eq!(mailbox.block_number(), i as u32);
            if i + 1 < chain.len() {
                assert_eq!(mailbox.next_pointer(), chain.head_address().offset((i + 1) * MAILBOX_ALIGN));
            } else {
                assert_eq!(mailbox.next_pointer(), DeviceAddress::zero());
            }
        }

        let mut out = vec![0u8; len];
        chain.copy_out(&mut out).unwrap();
        assert_eq!(out, payload);
    }
}

#[test]
fn command_succeeds_against_simulated_firmware() {
    let (sim, clock, mut cmdq) = setup();
    assert_eq!(cmdq.num_entries(), 32);
    assert_eq!(cmdq.stride(), 64);
    assert_eq!(sim.register(CMDQ_ADDR_LOW) & !0xFFF, cmdq.device_address().low());

    cmdq.enable_hca().unwrap();
    let command = sim.last_command().unwrap();
    assert_eq!(command.opcode(), Some(CommandOpcode::EnableHca));
    assert_eq!(command.token, 0xAB);
    assert_eq!(command.input_length, 12);
    assert_eq!(command.output_length, 8);
    assert!(command.entry_signature_ok);
    assert_eq!(clock.delays(), 0);

    assert_eq!(cmdq.alloc_uar().unwrap(), SIM_UAR_PAGE);
    assert_eq!(cmdq.query_special_contexts().unwrap(), SIM_RESERVED_LKEY);
    assert_eq!(cmdq.query_pages(QueryPagesOpMod::BootPages).unwrap(), 4);
    assert_eq!(cmdq.query_pages(QueryPagesOpMod::InitPages).unwrap(), 8);
    assert_eq!(sim.last_command().unwrap().op_mod, 2);
}

#[test]
fn tokens_are_never_zero() {
    let (sim, _clock, mut cmdq) = setup();
    for _ in 0..300 {
        cmdq.init_hca().unwrap();
    }
    let tokens: Vec<u8> = sim.commands().iter().map(|c| c.token).collect();
    assert!(tokens.iter().all(|&t| t != 0));
    for pair in tokens.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }
}

#[test]
fn command_times_out_after_poll_limit() {
    let (sim, clock, mut cmdq) = setup();
    sim.set_response_mode(ResponseMode::Ignore);
    assert_eq!(cmdq.enable_hca(), Err(CommandQueueError::Timeout));
    assert_eq!(clock.delays(), DEFAULT_COMMAND_POLL_LIMIT as u64);
    assert_eq!(clock.uptime_ns(), DEFAULT_COMMAND_POLL_LIMIT as u64 * 1_000_000);

    // the entry still belongs to the device
    sim.set_response_mode(ResponseMode::Respond);
    assert_eq!(cmdq.init_hca(), Err(CommandQueueError::SlotOwnedByHardware));
}

#[test]
fn firmware_rejection_carries_status_and_syndrome() {
    let (sim, _clock, mut cmdq) = setup();
    sim.reject(CommandOpcode::InitHca, CommandReturnStatus::BadParam, 0x1234_5678);
    let err = cmdq.init_hca().unwrap_err();
    assert_eq!(err, CommandQueueError::CommandFailed { status: 0x03, syndrome: 0x1234_5678 });
    assert_eq!(err.return_status(), Some(CommandReturnStatus::BadParam));
    let msg: &'static str = err.into();
    assert!(!msg.is_empty());
}

#[test]
fn delivery_failure_is_reported() {
    let (sim, _clock, mut cmdq) = setup();
    sim.set_delivery_status(0x5);
    assert_eq!(cmdq.enable_hca(), Err(CommandQueueError::DeliveryFailed(0x5)));
}

#[test]
fn signature_checking_is_opt_in() {
    let (sim, _clock, mut cmdq) = setup();
    sim.set_corrupt_signatures(true);
    assert!(cmdq.query_issi().is_ok());

    cmdq.set_signature_checking(true);
    assert_eq!(cmdq.query_issi(), Err(CommandQueueError::CorruptSignature));

    sim.set_corrupt_signatures(false);
    assert!(cmdq.query_issi().is_ok());
}

#[test]
fn mailbox_input_and_output() {
    let (sim, _clock, mut cmdq) = setup();
    let pages: Vec<DeviceAddress> = (0..200u64).map(|i| DeviceAddress::new(0x10_0000 + i * 4096)).collect();
    cmdq.manage_pages(ManagePagesOpMod::AllocationSuccess, &pages).unwrap();

    let command = sim.last_command().unwrap();
    assert_eq!(command.input_length as usize, 16 + 200 * 8);
    assert_eq!(command.input_mailboxes, 4);
    assert!(command.mailbox_signatures_ok);
    assert_eq!(&command.inline_input()[4..8], &200u32.to_be_bytes());
    assert_eq!(&command.extension()[..8], &0x10_0000u64.to_be_bytes());
    assert_eq!(&command.extension()[199 * 8..], &(0x10_0000u64 + 199 * 4096).to_be_bytes());
    assert_eq!(sim.pages_given(), 200);

    let issi = cmdq.query_issi().unwrap();
    assert_eq!(sim.last_command().unwrap().output_mailboxes, 1);
    assert!(issi.supports(0));
    assert!(issi.supports(1));
    assert!(!issi.supports(2));
}

#[test]
fn issi_negotiation() {
    let (sim, _clock, mut cmdq) = setup();
    assert_eq!(cmdq.negotiate_issi(1).unwrap(), 1);
    assert_eq!(sim.current_issi(), 1);

    let (sim, _clock, mut cmdq) = setup();
    sim.reject(CommandOpcode::QueryIssi, CommandReturnStatus::BadOp, 0);
    assert_eq!(cmdq.negotiate_issi(1).unwrap(), 0);
    assert!(!sim.opcodes().contains(&(CommandOpcode::SetIssi as u16)));

    let (sim, _clock, mut cmdq) = setup();
    sim.reject(CommandOpcode::QueryIssi, CommandReturnStatus::InternalError, 0x99);
    assert!(cmdq.negotiate_issi(1).is_err());
}

#[test]
fn create_queue_commands_describe_the_queues() {
    let (sim, _clock, mut cmdq) = setup();
    let allocator = host_allocator();

    let eq = EventQueue::new(&allocator, 3).unwrap();
    let eqn = cmdq.create_eq(SIM_UAR_PAGE, 3, EventType::Completion.mask(), &eq.ring().page_addresses()).unwrap();
    let sim_eq = sim.event_queues()[0];
    assert_eq!(sim_eq.number, eqn);
    assert_eq!(sim_eq.log_size, 3);
    assert_eq!(sim_eq.base, eq.ring().device_address());

    let cq = CompletionQueue::new(&allocator, 4).unwrap();
    let mut ctx = completion_queue::CompletionQueueContext::new_zeroed();
    ctx.init(SIM_UAR_PAGE, 4, eqn, cq.doorbell_address(), 0, 0);
    let cqn = cmdq.create_cq(&ctx, &cq.ring().page_addresses()).unwrap();
    let sim_cq = sim.completion_queues()[0];
    assert_eq!(sim_cq.number, cqn);
    assert_eq!(sim_cq.log_size, 4);
    assert_eq!(sim_cq.base, cq.ring().device_address());

    let sqn = 0x33;
    cmdq.modify_sq(sqn).unwrap();
    let command = sim.last_command().unwrap();
    assert_eq!(&command.inline_input()[..4], &[0, 0, 0, 0x33]);
    // the new state sits in the SQ context after the 16 bytes of bitmask and reserved space
    assert_eq!(&command.extension()[16..20], &(1u32 << 20).to_be_bytes());
}

#[test]
fn completion_ring_ownership_alternates_per_pass() {
    let allocator = host_allocator();
    let mut cq = CompletionQueue::new(&allocator, 3).unwrap();
    assert!(cq.peek().is_none());

    for counter in 0..8u32 {
        write_completion(cq.ring_mut(), counter, &SimCompletion::transmit(counter as u16));
        let cqe = cq.peek().expect("written entry should be ready");
        assert_eq!(cqe.wqe_counter(), counter as u16);
        assert_eq!(cqe.opcode(), CompletionQueueOpcode::Requester as u8);
        cq.advance();
    }
    // entries from the first pass carry owner 0, which is stale on the second pass
    assert_eq!(cq.consumer_counter(), 8);
    assert!(cq.peek().is_none());

    write_completion(cq.ring_mut(), 8, &SimCompletion::receive(0, 60));
    let cqe = cq.peek().unwrap();
    assert_eq!(cqe.owner(), 1);
    assert_eq!(cqe.byte_count(), 60);
}

#[test]
fn completion_entry_fields() {
    let allocator = host_allocator();
    let mut cq = CompletionQueue::new(&allocator, 2).unwrap();
    let completion = SimCompletion {
        opcode: CompletionQueueOpcode::ResponderSend as u8,
        wqe_counter: 0x1234,
        byte_count: 1514,
        rx_hash: 0xCAFE_F00D,
        rx_hash_type: 1,
        flags: completion_queue::CQE_L3_OK | completion_queue::CQE_L4_OK | completion_queue::CQE_CV | 42,
        timestamp: 0x0102_0304_0506_0708,
        syndrome: 0,
    };
    write_completion(cq.ring_mut(), 0, &completion);
    let cqe = cq.peek().unwrap();
    assert_eq!(cqe.as_bytes()[0x3C..0x3E], [0x12, 0x34]);
    assert_eq!(cqe.as_bytes()[0x2C..0x30], 1514u32.to_be_bytes());
    assert_eq!(cqe.rx_hash(), 0xCAFE_F00D);
    assert!(cqe.l3_ok() && cqe.l4_ok());
    assert_eq!(cqe.vlan(), Some(42));
    assert_eq!(cqe.timestamp(), 0x0102_0304_0506_0708);

    write_completion(cq.ring_mut(), 1, &SimCompletion::error(CompletionQueueOpcode::ResponderError, 7, 0x22));
    cq.advance();
    let cqe = cq.peek().unwrap();
    assert_eq!(cqe.opcode(), 0xE);
    assert_eq!(cqe.error_syndrome(), 0x22);
}

#[test]
fn completion_queue_arming() {
    let sim = Arc::new(SimulatedDevice::new());
    let uar = Uar::new(sim.clone(), SIM_UAR_PAGE);
    let allocator = host_allocator();
    let mut cq = CompletionQueue::new(&allocator, 3).unwrap();
    cq.set_cqn(5);

    cq.arm(&uar).unwrap();
    let (offset, bytes) = *sim.writes64().last().unwrap();
    assert_eq!(offset, SIM_UAR_PAGE as usize * 4096 + uar::UAR_CQ_DOORBELL);
    assert_eq!(bytes, 5u64.to_be_bytes());

    for counter in 0..3 {
        write_completion(cq.ring_mut(), counter, &SimCompletion::transmit(counter as u16));
        cq.advance();
    }
    cq.rearm(&uar).unwrap();
    let expected = (1u32 << 28) | 3;
    assert_eq!(cq.arm_value(), expected);
    let record = cq.doorbell_record().unwrap();
    assert_eq!(record.update_ci(), 3);
    assert_eq!(record.arm_ci(), expected);
    let (_, bytes) = *sim.writes64().last().unwrap();
    assert_eq!(bytes, (((expected as u64) << 32) | 5).to_be_bytes());
}

#[test]
fn event_queue_delivers_completion_events() {
    let allocator = host_allocator();
    let mut eq = EventQueue::new(&allocator, 2).unwrap();
    assert!(eq.next_entry().is_none());

    write_event(eq.ring_mut(), 0, EventType::Completion as u8, [0, 0, 0, 0, 0, 0, 0x0100_0007]);
    let event = eq.next_entry().unwrap();
    assert_eq!(event.event_type(), EventType::Completion as u8);
    assert_eq!(event.cqn(), 7);
    assert!(eq.next_entry().is_none());
    assert_eq!(eq.consumer_counter(), 1);

    let sim = Arc::new(SimulatedDevice::new());
    let uar = Uar::new(sim.clone(), 2);
    eq.set_eqn(3);
    eq.arm(&uar);
    assert_eq!(sim.writes32().last(), Some(&(2 * 4096 + uar::UAR_EQ_ARM_DOORBELL, (3 << 24) | 1)));
}

#[test]
fn initialization_segment_registers() {
    let sim = Arc::new(SimulatedDevice::new());
    let clock = SimulatedClock::new();
    let init = InitializationSegment::new(sim.clone());

    let version = init.firmware_version();
    assert_eq!((version.major, version.minor, version.subminor), (SIM_FW_MAJOR, SIM_FW_MINOR, SIM_FW_SUBMINOR));
    assert_eq!(init.cmd_interface_revision(), CMD_INTERFACE_SUPPORTED);
    assert_eq!(init.num_cmdq_entries(), 32);
    assert_eq!(init.cmdq_entry_stride(), 64);
    assert_eq!(init.interface_mode(), Ok(InterfaceMode::FullDriver));

    assert!(init.set_physical_address_of_cmdq(DeviceAddress::new(0x1_0000_0800)).is_err());
    init.set_physical_address_of_cmdq(DeviceAddress::new(0x1_2345_6000)).unwrap();
    assert_eq!(sim.register(CMDQ_ADDR_HIGH), 0x1);
    assert_eq!(sim.register(CMDQ_ADDR_LOW), 0x2345_6000 | (5 << 4) | 6);

    sim.set_initializing_reads(3);
    init.wait_until_ready(&clock, 100).unwrap();
    assert_eq!(clock.delays(), 3);

    sim.set_initializing_reads(50);
    assert!(init.wait_until_ready(&clock, 10).is_err());

    sim.set_timer(0x0000_0012_3456_789A);
    assert_eq!(init.internal_timer(), 0x0000_0012_3456_789A);

    // no command queue behind the doorbell, so the device has nothing to execute
    init.set_physical_address_of_cmdq(DeviceAddress::zero()).unwrap();
    init.post_command(0);
    assert_eq!(sim.writes32().last(), Some(&(CMDQ_DOORBELL, 1)));
    assert!(sim.commands().is_empty());
}

#[test]
fn send_slots_per_segment_count() {
    let expected = [(0, 1), (1, 1), (2, 2), (5, 2), (6, 3), (9, 3), (10, 4), (13, 4)];
    for &(segments, slots) in &expected {
        assert_eq!(slots_for_segments(segments), slots, "{} segments", segments);
    }
}

#[test]
fn send_queue_writes_wqes_and_alternates_blueflame() {
    let sim = Arc::new(SimulatedDevice::new());
    let uar = Uar::new(sim.clone(), SIM_UAR_PAGE);
    let allocator = host_allocator();
    let mut sq = SendQueue::new(&allocator, 4, 0).unwrap();
    sq.set_sqn(0x21);

    let headers = [0xEEu8; INLINE_HEADER_SIZE];
    let segments: Vec<(DeviceAddress, u32)> = (0..6u64).map(|i| (DeviceAddress::new(0x8000 + i * 0x1000), 100 + i as u32)).collect();
    let slots = sq.post_send(3, &headers, &segments, 0x77).unwrap();
    assert_eq!(slots, 3);

    let wqe = sq.ring().entry(3);
    assert_eq!(wqe.opcode_index(), 0x0A | (3 << 8));
    assert_eq!(wqe.ds_sq_num(), (0x21 << 8) | 9);
    assert_eq!(wqe.as_bytes()[11], 0x08);
    assert_eq!(wqe.as_bytes()[28..30], [0, 18]);
    assert_eq!(wqe.inline_headers(), &headers);
    assert_eq!(wqe.data_segment().byte_count(), 100);
    assert_eq!(wqe.data_segment().lkey(), 0x77);
    // segments 1..=4 fill the next block, segment 5 starts the one after
    let spill = sq.ring().entry(4).as_bytes();
    assert_eq!(spill[0..4], 101u32.to_be_bytes());
    assert_eq!(spill[48..52], 104u32.to_be_bytes());
    let spill = sq.ring().entry(5).as_bytes();
    assert_eq!(spill[8..16], (0x8000u64 + 5 * 0x1000).to_be_bytes());

    let base = SIM_UAR_PAGE as usize * 4096 + uar::UAR_BLUEFLAME;
    sq.ring_doorbell(&uar, 6, 3).unwrap();
    assert_eq!(sq.doorbell_record().unwrap().send_counter(), 6);
    let (offset, bytes) = *sim.writes64().last().unwrap();
    assert_eq!(offset, base);
    assert_eq!(bytes[..], sq.ring().entry(3).as_bytes()[..8]);

    sq.post_send(6, &headers, &segments[..1], 0x77).unwrap();
    sq.ring_doorbell(&uar, 7, 6).unwrap();
    assert_eq!(sim.writes64().last().unwrap().0, base + uar::DEFAULT_BF_SIZE);
    sq.ring_doorbell(&uar, 7, 6).unwrap();
    assert_eq!(sim.writes64().last().unwrap().0, base);

    assert!(sq.post_send(8, &headers, &[(DeviceAddress::zero(), 1); 14], 0).is_err());
}

#[test]
fn log_page_sizes() {
    assert_eq!(log_page_size(1), 0);
    assert_eq!(log_page_size(4096), 0);
    assert_eq!(log_page_size(4097), 1);
    assert_eq!(log_page_size(64 * 4096), 6);
    assert_eq!(log_page_size(65 * 4096), 7);
}
