extern crate std;

use super::*;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};
use dma_region::{create_contiguous_mapping, BoundedDmaAllocator, HostDmaAllocator};
use mlx_ethernet::command_queue::CommandOpcode;
use mlx_ethernet::sim::*;
use mlx_ethernet::uar::{DEFAULT_BF_SIZE, UAR_BLUEFLAME};
use calibration::CalibrationSample;
use rx_accounting::RxSlotAccounting;
use slot_table::SlotTable;

fn host() -> Arc<dyn DmaAllocator> {
    Arc::new(HostDmaAllocator)
}

/// Reads a single completion back out of a two-entry completion queue.
fn cqe(completion: SimCompletion) -> CompletionQueueEntry {
    let mut cq = CompletionQueue::new(&host(), 1).unwrap();
    write_completion(cq.ring_mut(), 0, &completion);
    cq.peek().unwrap()
}

/// A packet of `nsegs` segments, `seg_len` bytes each.
fn segmented_packet(nsegs: usize, seg_len: usize) -> TransmitBuffer {
    let allocator = host();
    let segments = (0..nsegs)
        .map(|i| {
            let mut region = create_contiguous_mapping(&allocator, seg_len, 64).unwrap();
            region.as_bytes_mut()[..seg_len].fill(i as u8);
            (region, seg_len)
        })
        .collect();
    TransmitBuffer::from_segments(segments).unwrap()
}

fn blueflame_base() -> usize {
    SIM_UAR_PAGE as usize * 4096 + UAR_BLUEFLAME
}

fn tx_ring(log_size: u32) -> (Arc<SimulatedDevice>, Uar, TxRing) {
    let sim = Arc::new(SimulatedDevice::new());
    let uar = Uar::new(sim.clone(), SIM_UAR_PAGE);
    let mut sq = SendQueue::new(&host(), log_size, 0).unwrap();
    sq.set_sqn(7);
    (sim, uar, TxRing::new(sq, host(), SIM_RESERVED_LKEY))
}

/// Small queues so a whole device fits comfortably in a test.
fn small_config() -> Mlx5Config {
    Mlx5Config {
        log_eq_size: 3,
        log_cq_size: 4,
        log_rq_size: 3,
        log_sq_size: 4,
        cq_moderation_count: 3,
        ..Default::default()
    }
}

fn bring_up() -> (Arc<SimulatedDevice>, Arc<SimulatedClock>, ConnectX5Nic) {
    let sim = Arc::new(SimulatedDevice::new());
    let clock = Arc::new(SimulatedClock::new());
    let nic = ConnectX5Nic::init(sim.clone(), host(), clock.clone(), small_config()).unwrap();
    (sim, clock, nic)
}

fn completion_event(cqn: u32) -> [u32; 7] {
    [0, 0, 0, 0, 0, 0, cqn]
}


#[test]
fn slot_table_refuses_double_insert() {
    let mut table = SlotTable::new(8);
    assert_eq!(table.index_of(13), 5);
    assert!(table.insert(5, 'a').is_ok());
    assert_eq!(table.insert(5, 'b'), Err('b'));
    assert_eq!(table.insert(8, 'c'), Err('c'));
    assert_eq!(table.len(), 1);
    assert_eq!(table.take(5), Some('a'));
    assert_eq!(table.take(5), None);
    assert!(table.is_empty());

    table.insert(0, 'x').unwrap();
    table.insert(7, 'y').unwrap();
    assert_eq!(table.drain().len(), 2);
    assert!(table.is_empty());
}

#[test]
fn rx_watermark_grows_per_tick_and_shrinks_when_livelocked() {
    let mut rxr = RxSlotAccounting::new(1, 4);
    assert_eq!(rxr.get(0, 8), 1);
    assert_eq!(rxr.get(0, 8), 0);
    rxr.put(1);

    // a new tick: the watermark grows by one
    assert_eq!(rxr.get(1, 8), 2);
    assert_eq!(rxr.current_watermark(), 2);
    assert_eq!(rxr.in_use(), 2);

    // it keeps growing while slots are in use
    assert_eq!(rxr.get(2, 8), 1);
    assert_eq!(rxr.current_watermark(), 3);
    assert_eq!(rxr.get(2, 8), 0);

    // at most one adjustment per tick
    rxr.livelocked(2);
    assert_eq!(rxr.current_watermark(), 3);
    rxr.livelocked(3);
    assert_eq!(rxr.current_watermark(), 2);
    rxr.livelocked(4);
    assert_eq!(rxr.current_watermark(), 1);
    rxr.livelocked(5);
    assert_eq!(rxr.current_watermark(), 1);

    rxr.put(10);
    assert_eq!(rxr.in_use(), 0);
    for tick in 6..20 {
        rxr.get(tick, 0);
    }
    assert_eq!(rxr.current_watermark(), rxr.high_watermark());
}

#[test]
fn rx_ring_fills_up_under_steady_traffic() {
    let queue = ReceiveQueue::new(&host(), 3).unwrap();
    let mut rx = RxRing::new(queue, host(), 2048, SIM_RESERVED_LKEY);
    let calibration = Calibrator::new(10, 10);
    assert_eq!(rx.fill(0).unwrap(), 1);

    // one packet per tick never empties the ring, yet it still grows to full size
    let mut consumer = 0u16;
    let mut most_posted = 0;
    for tick in 1..40 {
        assert!(rx.complete(&cqe(SimCompletion::receive(consumer, 64)), &calibration).is_some());
        consumer = consumer.wrapping_add(1);
        rx.delivered(1);
        rx.fill(tick).unwrap();
        most_posted = most_posted.max(rx.posted());
    }
    assert_eq!(most_posted, 8);
    assert_eq!(rx.accounting().current_watermark(), 8);
    assert_eq!(rx.posted() as u32, rx.accounting().in_use());
}

#[test]
fn timestamp_translation() {
    let sample = CalibrationSample {
        uptime_ns: 5_000_000_000,
        timer: 1_000_000,
        uptime_delta: 2000,
        timer_delta: 1000,
    };
    assert_eq!(sample.translate(1_000_500), Some(5_000_001_000));

    let uncalibrated = CalibrationSample { timer_delta: 0, ..sample };
    assert_eq!(uncalibrated.translate(1_000_500), None);

    // a huge timestamp doesn't overflow the intermediate product
    let fast = CalibrationSample { uptime_delta: u32::MAX as u64, ..sample };
    assert!(fast.translate(u64::MAX / 2).is_some());
}

#[test]
fn calibrator_alternates_samples() {
    let mut calibrator = Calibrator::new(10, 100);
    assert!(!calibrator.is_due(u64::MAX));
    calibrator.start(0, 0);
    assert_eq!(calibrator.translate(12345), None);
    assert!(!calibrator.is_due(9));
    assert!(calibrator.is_due(10));

    calibrator.sample(1 << 20, 2 << 20);
    assert_eq!(calibrator.generation(), 1);
    assert_eq!(calibrator.current().uptime_delta, 1 << 10);
    assert_eq!(calibrator.current().timer_delta, 2 << 10);
    assert_eq!(calibrator.translate((2 << 20) + 2048), Some((1 << 20) + 1024));
    assert!(!calibrator.is_due((1 << 20) + 99));
    assert!(calibrator.is_due((1 << 20) + 100));

    calibrator.sample(2 << 20, 4 << 20);
    assert_eq!(calibrator.generation(), 2);
    assert_eq!(calibrator.current().uptime_ns, 2 << 20);
}


#[derive(Default)]
struct CountingHandler {
    transmits: usize,
    receives: usize,
    errors: std::vec::Vec<CompletionQueueOpcode>,
}

impl CompletionHandler for CountingHandler {
    fn transmit_completed(&mut self, _cqe: &CompletionQueueEntry) -> usize {
        self.transmits += 1;
        1
    }

    fn receive_completed(&mut self, _cqe: &CompletionQueueEntry) {
        self.receives += 1;
    }

    fn error_completed(&mut self, opcode: CompletionQueueOpcode, _cqe: &CompletionQueueEntry) -> usize {
        self.errors.push(opcode);
        0
    }
}

#[test]
fn completions_are_routed_by_opcode() {
    let mut cq = CompletionQueue::new(&host(), 3).unwrap();
    write_completion(cq.ring_mut(), 0, &SimCompletion::transmit(0));
    write_completion(cq.ring_mut(), 1, &SimCompletion::receive(0, 64));
    write_completion(cq.ring_mut(), 2, &SimCompletion::error(CompletionQueueOpcode::ResponderError, 1, 0x2));
    write_completion(cq.ring_mut(), 3, &SimCompletion { opcode: CompletionQueueOpcode::ResizeCq as u8, ..Default::default() });

    let mut handler = CountingHandler::default();
    let summary = process_completions(&mut cq, &mut handler);
    assert_eq!(summary, DrainSummary {
        processed: 4,
        transmitted: 1,
        received: 1,
        errors: 1,
        ignored: 1,
        slots_freed: 1,
    });
    assert_eq!(handler.transmits, 1);
    assert_eq!(handler.receives, 1);
    assert_eq!(handler.errors, [CompletionQueueOpcode::ResponderError]);
    assert_eq!(cq.consumer_counter(), 4);

    // nothing new, nothing processed
    assert_eq!(process_completions(&mut cq, &mut handler).processed, 0);

    // a full ring's worth that wraps around the end
    for counter in 4..12 {
        write_completion(cq.ring_mut(), counter, &SimCompletion::transmit(counter as u16));
    }
    let summary = process_completions(&mut cq, &mut handler);
    assert_eq!(summary.transmitted, 8);
    assert_eq!(cq.consumer_counter(), 12);
}


#[test]
fn tx_slots_freed_match_slots_posted() {
    let (_sim, uar, mut tx) = tx_ring(4);
    let mut stats = Statistics::default();
    let mut pending = VecDeque::new();
    // six 20-byte segments leave six data segments after the inlined header: three slots
    pending.push_back(segmented_packet(6, 20));
    pending.push_back(segmented_packet(1, 60));

    assert_eq!(tx.start(&mut pending, &uar, &mut stats).unwrap(), 2);
    assert_eq!(tx.producer_counter(), 4);
    assert_eq!(tx.in_flight(), 2);
    assert_eq!(tx.free_slots(), 12);
    assert_eq!(stats.tx_packets, 2);
    assert_eq!(stats.tx_bytes, 180);

    let freed = tx.complete(&cqe(SimCompletion::transmit(0))) + tx.complete(&cqe(SimCompletion::transmit(3)));
    assert_eq!(freed, 4);
    assert!(!tx.reclaim(freed));
    assert_eq!(tx.free_slots(), 16);
    assert_eq!(tx.in_flight(), 0);

    // completing an empty slot frees nothing
    assert_eq!(tx.complete(&cqe(SimCompletion::transmit(0))), 0);
}

#[test]
fn tx_blocks_when_full_and_restarts_after_completion() {
    let (sim, uar, mut tx) = tx_ring(4);
    let mut stats = Statistics::default();
    let mut pending: VecDeque<TransmitBuffer> = (0..6).map(|_| segmented_packet(6, 20)).collect();

    // 16 slots: posting stops once a maximum-size send might not fit
    assert_eq!(tx.start(&mut pending, &uar, &mut stats).unwrap(), 4);
    assert!(tx.is_blocked());
    assert_eq!(pending.len(), 2);
    assert_eq!(stats.tx_blocked, 1);
    assert_eq!(sim.writes64().len(), 1);
    assert_eq!(sim.writes64()[0].0, blueflame_base());

    let freed = tx.complete(&cqe(SimCompletion::transmit(0)));
    assert_eq!(freed, 3);
    assert!(tx.reclaim(freed));
    assert!(!tx.is_blocked());
    assert_eq!(tx.start(&mut pending, &uar, &mut stats).unwrap(), 1);
    assert!(tx.is_blocked());
    assert_eq!(pending.len(), 1);
    assert_eq!(tx.producer_counter(), 15);

    // the second doorbell used the other half of the blue-flame buffer
    assert_eq!(sim.writes64().len(), 2);
    assert_eq!(sim.writes64()[1].0, blueflame_base() + DEFAULT_BF_SIZE);
}

#[test]
fn tx_drops_short_packets_and_coalesces_long_chains() {
    let (sim, uar, mut tx) = tx_ring(4);
    let mut stats = Statistics::default();
    let mut pending = VecDeque::new();
    pending.push_back(TransmitBuffer::new(&host(), 10).unwrap());
    assert_eq!(tx.start(&mut pending, &uar, &mut stats).unwrap(), 0);
    assert_eq!(stats.tx_too_short, 1);
    assert_eq!(stats.tx_dropped, 1);
    assert!(sim.writes64().is_empty());

    // 16 segments of 8 bytes leave 14 data segments, one more than a send can carry
    pending.push_back(segmented_packet(16, 8));
    assert_eq!(tx.start(&mut pending, &uar, &mut stats).unwrap(), 1);
    assert_eq!(stats.tx_coalesced, 1);
    assert_eq!(tx.producer_counter(), 1);
    assert_eq!(tx.queue().ring().entry(0).data_segment().byte_count(), 128 - 18);
}

#[test]
fn rx_refill_retries_after_allocation_failure() {
    let bounded = Arc::new(BoundedDmaAllocator::new(HostDmaAllocator, 0));
    let queue = ReceiveQueue::new(&host(), 3).unwrap();
    let mut rx = RxRing::new(queue, bounded.clone(), 2048, SIM_RESERVED_LKEY);

    assert_eq!(rx.fill(0).unwrap(), 0);
    assert_eq!(rx.accounting().in_use(), 0);
    assert!(rx.refill_pending());
    assert!(!rx.refill_due(0));
    assert!(rx.refill_due(1));

    bounded.set_limit(usize::MAX);
    assert_eq!(rx.fill(1).unwrap(), 2);
    assert!(!rx.refill_pending());
    assert_eq!(rx.posted(), 2);
    assert_eq!(rx.producer_counter(), 2);
    assert_eq!(rx.queue().doorbell_record().unwrap().receive_counter(), 2);
    assert_eq!(rx.queue().ring().entry(1).lkey(), SIM_RESERVED_LKEY);
}

#[test]
fn rx_completion_detaches_buffer() {
    let queue = ReceiveQueue::new(&host(), 3).unwrap();
    let mut rx = RxRing::new(queue, host(), 2048, SIM_RESERVED_LKEY);
    assert_eq!(rx.fill_slots(2).unwrap(), 2);
    let calibration = Calibrator::new(10, 10);

    let buffer = rx.complete(&cqe(SimCompletion::receive(0, 100)), &calibration).unwrap();
    assert_eq!(buffer.length(), 100);
    assert_eq!(buffer.metadata().flow_id, None);
    assert_eq!(buffer.metadata().timestamp_ns, None);
    assert!(rx.complete(&cqe(SimCompletion::receive(0, 100)), &calibration).is_none());

    // the WQE counter wraps onto slot 1, and the length is clamped to the buffer
    let hashed = SimCompletion { rx_hash: 0xABCD, rx_hash_type: 1, ..SimCompletion::receive(9, 5000) };
    let buffer = rx.complete(&cqe(hashed), &calibration).unwrap();
    assert_eq!(buffer.length(), 2048);
    assert_eq!(buffer.metadata().flow_id, Some(0xABCD));
    assert_eq!(rx.posted(), 0);
}


#[test]
fn bring_up_against_simulated_firmware() {
    let (sim, _clock, mut nic) = bring_up();
    let expected = [
        CommandOpcode::EnableHca,
        CommandOpcode::QueryIssi,
        CommandOpcode::SetIssi,
        CommandOpcode::QueryPages,
        CommandOpcode::ManagePages,
        CommandOpcode::QueryPages,
        CommandOpcode::ManagePages,
        CommandOpcode::InitHca,
        CommandOpcode::AllocUar,
        CommandOpcode::CreateEq,
        CommandOpcode::AllocPd,
        CommandOpcode::AllocTransportDomain,
        CommandOpcode::QuerySpecialContexts,
        CommandOpcode::CreateTis,
        CommandOpcode::CreateCq,
        CommandOpcode::CreateRq,
        CommandOpcode::ModifyRq,
        CommandOpcode::CreateSq,
        CommandOpcode::ModifySq,
    ];
    let expected: std::vec::Vec<u16> = expected.iter().map(|&op| op as u16).collect();
    assert_eq!(sim.opcodes(), expected);

    assert_eq!(sim.pages_given(), 12);
    assert_eq!(nic.firmware_page_count(), 12);
    assert_eq!(sim.current_issi(), 1);
    assert_eq!(nic.issi(), 1);
    assert_eq!(nic.firmware_version().major, SIM_FW_MAJOR);
    assert_eq!(nic.reserved_lkey(), SIM_RESERVED_LKEY);
    assert_eq!(nic.uar().page(), SIM_UAR_PAGE);
    assert_eq!(sim.event_queues().len(), 1);
    assert_eq!(sim.completion_queues()[0].number, nic.completion_queue().cqn());
    assert_eq!(sim.completion_queues()[0].log_size, 4);
    assert!(nic.rx().posted() >= 1);
    assert_eq!(nic.rx().posted() as u32, nic.rx().accounting().in_use());

    nic.shutdown().unwrap();
    assert_eq!(sim.opcodes().last(), Some(&(CommandOpcode::TeardownHca as u16)));
    assert_eq!(nic.rx().posted(), 0);
    assert_eq!(nic.firmware_page_count(), 0);
}

#[test]
fn bring_up_rejects_unknown_command_interface() {
    let sim = Arc::new(SimulatedDevice::new());
    sim.set_cmd_interface_revision(4);
    let result = ConnectX5Nic::init(sim.clone(), host(), Arc::new(SimulatedClock::new()), small_config());
    assert!(result.is_err());
    assert!(sim.opcodes().is_empty());
}

#[test]
fn sent_packet_is_released_on_completion() {
    let (sim, _clock, mut nic) = bring_up();
    let cqn = nic.completion_queue().cqn();
    nic.send_packet(TransmitBuffer::new(&host(), 60).unwrap()).unwrap();
    assert_eq!(nic.tx().in_flight(), 1);
    assert_eq!(nic.stats().tx_packets, 1);
    assert_eq!(nic.pending_transmits(), 0);

    sim.post_completion(cqn, &SimCompletion::transmit(0)).unwrap();
    nic.poll_receive().unwrap();
    assert_eq!(nic.tx().in_flight(), 0);
    assert_eq!(nic.tx().consumer_counter(), 1);
    assert_eq!(nic.completion_queue().consumer_counter(), 1);
    assert_eq!(nic.completion_queue().arm_count(), 1);
}

#[test]
fn received_frame_is_delivered_on_interrupt() {
    let (sim, _clock, mut nic) = bring_up();
    let cqn = nic.completion_queue().cqn();
    let eqn = nic.event_queue().eqn();

    sim.post_completion(cqn, &SimCompletion::receive(0, 64)).unwrap();
    sim.post_event(eqn, EventType::Completion as u8, completion_event(cqn)).unwrap();
    nic.handle_interrupt().unwrap();

    let frame = nic.get_received_frame().unwrap();
    assert_eq!(frame.length(), 64);
    assert!(nic.get_received_frame().is_none());
    assert_eq!(nic.stats().rx_packets, 1);
    assert_eq!(nic.stats().rx_bytes, 64);
    assert_eq!(nic.event_queue().consumer_counter(), 1);
    // the slot was posted again
    assert!(nic.rx().posted() >= 1);
    assert_eq!(nic.rx().producer_counter() as usize, 1 + nic.rx().posted());
}

#[test]
fn error_and_unknown_completions_are_counted() {
    let (sim, _clock, mut nic) = bring_up();
    let cqn = nic.completion_queue().cqn();
    sim.post_completion(cqn, &SimCompletion::error(CompletionQueueOpcode::RequesterError, 0, 0x5)).unwrap();
    sim.post_completion(cqn, &SimCompletion { opcode: CompletionQueueOpcode::ResizeCq as u8, ..Default::default() }).unwrap();
    nic.poll_receive().unwrap();
    assert_eq!(nic.stats().requester_errors, 1);
    // nothing was sent, so there was no slot to free
    assert_eq!(nic.stats().tx_missing_buffer, 1);
    assert_eq!(nic.stats().unknown_completions, 1);
    assert_eq!(nic.completion_queue().consumer_counter(), 2);
}

#[test]
fn receive_error_releases_its_buffer_and_traffic_continues() {
    let (sim, clock, mut nic) = bring_up();
    let cqn = nic.completion_queue().cqn();
    assert!(nic.rx().posted() >= 1);

    sim.post_completion(cqn, &SimCompletion::error(CompletionQueueOpcode::ResponderError, 0, 0x2)).unwrap();
    nic.poll_receive().unwrap();
    assert_eq!(nic.stats().responder_errors, 1);
    assert_eq!(nic.stats().rx_dropped, 1);
    assert!(nic.get_received_frame().is_none());
    assert!(nic.rx().posted() >= 1);
    assert_eq!(nic.rx().posted() as u32, nic.rx().accounting().in_use());

    let mut consumer = 1u16;
    for _ in 0..20 {
        clock.advance(CONFIG_TICK_PERIOD_NS);
        nic.tick(clock.uptime_ns()).unwrap();
        sim.post_completion(cqn, &SimCompletion::receive(consumer, 64)).unwrap();
        consumer += 1;
        nic.poll_receive().unwrap();
        assert_eq!(nic.get_received_frame().map(|frame| frame.length()), Some(64));
    }
    assert_eq!(nic.stats().rx_packets, 20);
    assert_eq!(nic.stats().rx_missing_buffer, 0);
    assert_eq!(nic.rx().posted(), 8);
}

#[test]
fn send_error_frees_its_slots_and_traffic_continues() {
    let (sim, _clock, mut nic) = bring_up();
    let cqn = nic.completion_queue().cqn();
    nic.send_packet(TransmitBuffer::new(&host(), 60).unwrap()).unwrap();
    sim.post_completion(cqn, &SimCompletion::error(CompletionQueueOpcode::RequesterError, 0, 0x5)).unwrap();
    nic.poll_receive().unwrap();
    assert_eq!(nic.stats().requester_errors, 1);
    assert_eq!(nic.tx().in_flight(), 0);
    assert_eq!(nic.tx().consumer_counter(), 1);

    // enough single-slot sends to wrap the 16-slot send queue twice
    for wqe in 1..41u16 {
        nic.send_packet(TransmitBuffer::new(&host(), 60).unwrap()).unwrap();
        sim.post_completion(cqn, &SimCompletion::transmit(wqe)).unwrap();
        nic.poll_receive().unwrap();
    }
    assert_eq!(nic.stats().tx_packets, 41);
    assert_eq!(nic.stats().tx_dropped, 0);
    assert_eq!(nic.stats().tx_missing_buffer, 0);
    assert_eq!(nic.tx().in_flight(), 0);
    assert_eq!(nic.tx().free_slots(), 16);
}

struct CountingSink {
    frames: Arc<AtomicUsize>,
}

impl FrameSink for CountingSink {
    fn input(&mut self, frames: Vec<ReceivedFrame>) -> bool {
        self.frames.fetch_add(frames.len(), Ordering::SeqCst);
        true
    }
}

#[test]
fn frame_sink_takes_received_frames() {
    let (sim, _clock, mut nic) = bring_up();
    let frames = Arc::new(AtomicUsize::new(0));
    nic.set_frame_sink(Box::new(CountingSink { frames: frames.clone() }));
    let cqn = nic.completion_queue().cqn();
    let eqn = nic.event_queue().eqn();

    sim.post_completion(cqn, &SimCompletion::receive(0, 128)).unwrap();
    sim.post_event(eqn, EventType::Completion as u8, completion_event(cqn)).unwrap();
    nic.handle_interrupt().unwrap();
    assert_eq!(frames.load(Ordering::SeqCst), 1);
    assert!(nic.get_received_frame().is_none());
}

#[test]
fn port_change_events_are_counted() {
    let (sim, _clock, mut nic) = bring_up();
    let eqn = nic.event_queue().eqn();
    sim.post_event(eqn, EventType::PortChange as u8, [0; 7]).unwrap();
    sim.post_event(eqn, EventType::CqError as u8, [0; 7]).unwrap();
    nic.handle_interrupt().unwrap();
    assert_eq!(nic.stats().port_changes, 1);
    assert_eq!(nic.stats().other_events, 1);
    assert_eq!(nic.completion_queue().arm_count(), 0);
}

#[test]
fn tick_takes_calibration_samples() {
    let (sim, clock, mut nic) = bring_up();
    let due = clock.uptime_ns() + nic.config().calibrate_first_ns;
    nic.tick(due - 1).unwrap();
    assert_eq!(nic.calibration().generation(), 0);

    sim.set_timer(4_000_000);
    nic.tick(due).unwrap();
    assert_eq!(nic.calibration().generation(), 1);
    assert_eq!(nic.calibration().current().timer, 4_000_000);
    assert!(nic.calibration().translate(4_000_000).is_some());
}
