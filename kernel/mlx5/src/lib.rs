//! Driver for the Mellanox ConnectX-5 ethernet NIC.
//!
//! [`ConnectX5Nic::init()`] brings the device up through its firmware command interface:
//! it hands the firmware the pages it asks for, then creates one event queue, one completion queue,
//! one receive queue, and one send queue, all reporting to that single completion queue.
//!
//! After that the data path runs without firmware commands.
//! Completions are drained on every interrupt (or poll), and each one either frees the send queue slots of a
//! finished transmit or delivers a filled receive buffer. The receive queue is refilled after every drain.

#![no_std]

#[macro_use] extern crate log;
#[macro_use] extern crate alloc;
extern crate spin;
extern crate kernel_config;
extern crate dma_region;
extern crate mlx_ethernet;
extern crate nic_buffers;
extern crate network_interface_card;

pub mod config;
pub mod calibration;
pub mod rx_accounting;
pub mod slot_table;
pub mod stats;
pub mod completion;
pub mod rx;
pub mod tx;
#[cfg(test)]
mod test;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use kernel_config::time::CONFIG_TICK_PERIOD_NS;
use dma_region::{create_page_mapping, DmaAllocator, DmaRegion};
use mlx_ethernet::commands::{ManagePagesOpMod, QueryPagesOpMod, TeardownProfile, WorkQueueParams};
use mlx_ethernet::completion_queue::{CompletionQueue, CompletionQueueContext, CompletionQueueEntry, CompletionQueueOpcode};
use mlx_ethernet::event_queue::{EventQueue, EventType};
use mlx_ethernet::initialization_segment::{FirmwareVersion, CMD_INTERFACE_SUPPORTED};
use mlx_ethernet::receive_queue::ReceiveQueue;
use mlx_ethernet::send_queue::SendQueue;
use mlx_ethernet::{Clock, CommandQueue, InitializationSegment, RegisterSpace, Uar};
use network_interface_card::NetworkInterfaceCard;
use nic_buffers::{ReceiveBuffer, ReceivedFrame, TransmitBuffer};
use calibration::Calibrator;
use completion::{process_completions, CompletionHandler, DrainSummary};
use config::Mlx5Config;
use rx::RxRing;
use stats::Statistics;
use tx::TxRing;

pub const MLX_VEND:           u16 = 0x15B3;  // Vendor ID for Mellanox
pub const CONNECTX5_DEV:      u16 = 0x1017;  // Device ID for the ConnectX-5 NIC


/// Takes batches of received frames from the driver.
pub trait FrameSink: Send {
    /// Accepts one drain's worth of frames.
    /// Returns true if the receiver is falling behind, which makes the driver post fewer receive buffers.
    fn input(&mut self, frames: Vec<ReceivedFrame>) -> bool;
}


/// Struct representing a connectx-5 network interface card.
pub struct ConnectX5Nic {
    init_segment: InitializationSegment,
    /// Only one firmware command may be in flight at a time
    command_queue: Mutex<CommandQueue>,
    clock: Arc<dyn Clock>,
    config: Mlx5Config,
    firmware_version: FirmwareVersion,
    issi: u16,
    uar: Uar,
    /// Pages given to firmware; they must stay allocated until teardown
    firmware_pages: Vec<DmaRegion>,
    protection_domain: u32,
    transport_domain: u32,
    tisn: u32,
    reserved_lkey: u32,
    event_queue: EventQueue,
    completion_queue: CompletionQueue,
    rx: RxRing,
    tx: TxRing,
    calibration: Calibrator,
    stats: Statistics,
    /// Packets waiting for room in the send queue
    pending_transmits: VecDeque<TransmitBuffer>,
    /// Frames received but not yet taken with `get_received_frame()`, used when there is no frame sink
    received_frames: VecDeque<ReceivedFrame>,
    frame_sink: Option<Box<dyn FrameSink>>,
}


/// Functions that set up the NIC struct and handle the sending and receiving of packets.
impl ConnectX5Nic {
    /// Brings up the NIC whose BAR0 registers are `regs`.
    ///
    /// # Arguments
    /// * `regs`: the register space of BAR0, which starts with the initialization segment and holds the UAR pages
    /// * `allocator`: where all memory shared with the NIC comes from
    /// * `clock`: used for command polling and timestamp calibration
    /// * `config`: queue sizes and other tunables
    pub fn init(
        regs: Arc<dyn RegisterSpace>,
        allocator: Arc<dyn DmaAllocator>,
        clock: Arc<dyn Clock>,
        config: Mlx5Config,
    ) -> Result<ConnectX5Nic, &'static str> {
        let init_segment = InitializationSegment::new(Arc::clone(&regs));

        let revision = init_segment.cmd_interface_revision();
        if revision != CMD_INTERFACE_SUPPORTED {
            error!("mlx5::init(): unsupported command interface revision {}", revision);
            return Err("mlx5::init(): unsupported command interface revision");
        }
        let firmware_version = init_segment.firmware_version();
        debug!("mlx5::init(): firmware version {}", firmware_version);

        // create the command queue and write its address to the initialization segment
        let mut cmdq = CommandQueue::create(init_segment.clone(), Arc::clone(&allocator), Arc::clone(&clock))?;
        cmdq.set_poll_limit(config.command_poll_limit);
        cmdq.set_signature_checking(config.check_signatures);

        // wait for the device to finish initializing before issuing commands
        init_segment.wait_until_ready(&*clock, config.ready_timeout_ms)?;

        cmdq.enable_hca()?;
        let issi = cmdq.negotiate_issi(config.issi)?;
        debug!("mlx5::init(): using ISSI {}", issi);

        let mut firmware_pages = Vec::new();
        give_pages(&mut cmdq, &allocator, QueryPagesOpMod::BootPages, &mut firmware_pages)?;
        give_pages(&mut cmdq, &allocator, QueryPagesOpMod::InitPages, &mut firmware_pages)?;
        cmdq.init_hca()?;

        let uar_page = cmdq.alloc_uar()?;
        let uar = Uar::new(Arc::clone(&regs), uar_page);

        // the event queue
        let mut event_queue = EventQueue::new(&allocator, config.log_eq_size)?;
        let event_bitmask = EventType::Completion.mask()
            | EventType::CqError.mask()
            | EventType::InternalError.mask()
            | EventType::PortChange.mask()
            | EventType::PageRequest.mask();
        let eqn = cmdq.create_eq(uar_page, config.log_eq_size, event_bitmask, &event_queue.ring().page_addresses())?;
        event_queue.set_eqn(eqn);
        event_queue.arm(&uar);

        let protection_domain = cmdq.alloc_pd()?;
        let transport_domain = cmdq.alloc_transport_domain()?;
        let reserved_lkey = cmdq.query_special_contexts()?;
        let tisn = cmdq.create_tis(transport_domain)?;
        debug!("mlx5::init(): uar {}, eqn {}, pd {}, td {}, tisn {}, lkey {:#X}",
            uar_page, eqn, protection_domain, transport_domain, tisn, reserved_lkey
        );

        // the completion queue that both the send and receive queue report to
        let mut completion_queue = CompletionQueue::new(&allocator, config.log_cq_size)?;
        let mut cq_ctx = CompletionQueueContext::default();
        cq_ctx.init(
            uar_page, config.log_cq_size, eqn, completion_queue.doorbell_address(),
            config.cq_moderation_period, config.cq_moderation_count,
        );
        let cqn = cmdq.create_cq(&cq_ctx, &completion_queue.ring().page_addresses())?;
        completion_queue.set_cqn(cqn);
        completion_queue.arm(&uar)?;

        // the receive queue
        let mut receive_queue = ReceiveQueue::new(&allocator, config.log_rq_size)?;
        let rq_params = WorkQueueParams {
            cqn,
            pd: protection_domain,
            uar_page,
            doorbell: receive_queue.doorbell_address(),
            log_size: config.log_rq_size,
        };
        let rqn = cmdq.create_rq(&rq_params, &receive_queue.page_addresses())?;
        cmdq.modify_rq(rqn)?;
        receive_queue.set_rqn(rqn);

        // the send queue
        let mut send_queue = SendQueue::new(&allocator, config.log_sq_size, config.bf_size)?;
        let sq_params = WorkQueueParams {
            cqn,
            pd: protection_domain,
            uar_page,
            doorbell: send_queue.doorbell_address(),
            log_size: config.log_sq_size,
        };
        let sqn = cmdq.create_sq(&sq_params, tisn, &send_queue.page_addresses())?;
        cmdq.modify_sq(sqn)?;
        send_queue.set_sqn(sqn);
        debug!("mlx5::init(): cqn {}, rqn {}, sqn {}", cqn, rqn, sqn);

        let mut rx = RxRing::new(receive_queue, Arc::clone(&allocator), config.rx_buffer_size, reserved_lkey);
        let tx = TxRing::new(send_queue, Arc::clone(&allocator), reserved_lkey);

        let now = clock.uptime_ns();
        let posted = rx.fill(now / CONFIG_TICK_PERIOD_NS)?;
        debug!("mlx5::init(): posted {} receive buffers", posted);

        let mut calibration = Calibrator::new(config.calibrate_first_ns, config.calibrate_period_ns);
        calibration.start(now, init_segment.internal_timer());

        Ok(ConnectX5Nic {
            init_segment,
            command_queue: Mutex::new(cmdq),
            clock,
            config,
            firmware_version,
            issi,
            uar,
            firmware_pages,
            protection_domain,
            transport_domain,
            tisn,
            reserved_lkey,
            event_queue,
            completion_queue,
            rx,
            tx,
            calibration,
            stats: Statistics::default(),
            pending_transmits: VecDeque::new(),
            received_frames: VecDeque::new(),
            frame_sink: None,
        })
    }

    /// Tears the HCA down and releases every buffer still posted to it.
    pub fn shutdown(&mut self) -> Result<(), &'static str> {
        self.command_queue.lock().teardown_hca(TeardownProfile::Graceful)?;
        self.rx.release_all();
        self.tx.release_all();
        self.pending_transmits.clear();
        debug!("mlx5::shutdown(): returned {} firmware page regions", self.firmware_pages.len());
        self.firmware_pages.clear();
        Ok(())
    }

    /// Sends received frames to `sink` instead of queueing them for `get_received_frame()`.
    pub fn set_frame_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.frame_sink = Some(sink);
    }

    /// Handles an interrupt from the event queue: consumes every pending event,
    /// drains the completion queue if it reported completions, and re-arms the event queue.
    pub fn handle_interrupt(&mut self) -> Result<(), &'static str> {
        self.init_segment.clear_interrupt();
        if self.service_events() {
            self.process_cq(self.now_tick())?;
        }
        self.event_queue.arm(&self.uar);
        Ok(())
    }

    /// Runs deferred work: receive refill retries and clock calibration.
    /// Should be called once per tick with the current uptime.
    pub fn tick(&mut self, now_ns: u64) -> Result<(), &'static str> {
        let now_tick = now_ns / CONFIG_TICK_PERIOD_NS;
        if self.rx.refill_due(now_tick) {
            self.refill(now_tick);
        }
        if self.calibration.is_due(now_ns) {
            let timer = self.init_segment.internal_timer();
            self.calibration.sample(now_ns, timer);
        }
        Ok(())
    }

    /// Consumes every event in the event queue.
    /// Returns true if one of them reported completions on our completion queue.
    fn service_events(&mut self) -> bool {
        let mut completions = false;
        self.event_queue.ring().sync_for_cpu();
        while let Some(eqe) = self.event_queue.next_entry() {
            match EventType::try_from(eqe.event_type()) {
                Ok(EventType::Completion) => {
                    if eqe.cqn() == self.completion_queue.cqn() {
                        completions = true;
                    } else {
                        warn!("mlx5: completion event for unknown CQ {}", eqe.cqn());
                    }
                }
                Ok(EventType::PortChange) => {
                    self.stats.port_changes += 1;
                    debug!("mlx5: port change event, subtype {}", eqe.event_sub_type());
                }
                Ok(event) => {
                    self.stats.other_events += 1;
                    warn!("mlx5: unhandled event {:?}: {:?}", event, eqe);
                }
                Err(_) => {
                    self.stats.other_events += 1;
                    trace!("mlx5: unknown event type {:#X}", eqe.event_type());
                }
            }
        }
        completions
    }

    /// Drains the completion queue, re-arms it, and then finishes what the completions started:
    /// received frames are handed off and the receive queue is refilled,
    /// and a blocked send queue is restarted once slots have been freed.
    fn process_cq(&mut self, now_tick: u64) -> Result<DrainSummary, &'static str> {
        let mut batch = Vec::new();
        let mut discarded = 0;
        let summary = {
            let mut handler = DataPathHandler {
                rx: &mut self.rx,
                tx: &mut self.tx,
                calibration: &self.calibration,
                stats: &mut self.stats,
                batch: &mut batch,
                discarded: &mut discarded,
            };
            process_completions(&mut self.completion_queue, &mut handler)
        };
        self.completion_queue.rearm(&self.uar)?;
        self.stats.unknown_completions += summary.ignored as u64;
        trace!("mlx5: {:?}", summary);

        let released = batch.len() as u32 + discarded;
        if released > 0 {
            self.rx.delivered(released);
            if !batch.is_empty() && self.hand_off(batch) {
                self.rx.livelocked(now_tick);
            }
            self.refill(now_tick);
        }

        if self.tx.reclaim(summary.slots_freed) {
            self.tx.start(&mut self.pending_transmits, &self.uar, &mut self.stats)?;
        }
        Ok(summary)
    }

    /// Passes received buffers up, one frame each. Returns true if the receiver is falling behind.
    fn hand_off(&mut self, batch: Vec<ReceiveBuffer>) -> bool {
        let frames: Vec<ReceivedFrame> = batch.into_iter().map(|buffer| ReceivedFrame(vec![buffer])).collect();
        match self.frame_sink.as_mut() {
            Some(sink) => sink.input(frames),
            None => {
                self.received_frames.extend(frames);
                self.received_frames.len() > self.rx.queue().size()
            }
        }
    }

    fn refill(&mut self, now_tick: u64) {
        if let Err(e) = self.rx.fill(now_tick) {
            error!("mlx5: failed to refill the receive queue: {:?}", e);
        }
        if self.rx.refill_pending() {
            self.stats.rx_refill_shortfall += 1;
        }
    }

    fn now_tick(&self) -> u64 {
        self.clock.uptime_ns() / CONFIG_TICK_PERIOD_NS
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        self.firmware_version
    }

    pub fn issi(&self) -> u16 {
        self.issi
    }

    pub fn config(&self) -> &Mlx5Config {
        &self.config
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn uar(&self) -> &Uar {
        &self.uar
    }

    pub fn command_queue(&self) -> &Mutex<CommandQueue> {
        &self.command_queue
    }

    pub fn protection_domain(&self) -> u32 {
        self.protection_domain
    }

    pub fn transport_domain(&self) -> u32 {
        self.transport_domain
    }

    pub fn tisn(&self) -> u32 {
        self.tisn
    }

    pub fn reserved_lkey(&self) -> u32 {
        self.reserved_lkey
    }

    /// The number of pages given to firmware.
    pub fn firmware_page_count(&self) -> usize {
        self.firmware_pages.iter().map(|region| region.page_addresses().len()).sum()
    }

    pub fn event_queue(&self) -> &EventQueue {
        &self.event_queue
    }

    pub fn completion_queue(&self) -> &CompletionQueue {
        &self.completion_queue
    }

    pub fn rx(&self) -> &RxRing {
        &self.rx
    }

    pub fn tx(&self) -> &TxRing {
        &self.tx
    }

    pub fn calibration(&self) -> &Calibrator {
        &self.calibration
    }

    /// The number of packets waiting for room in the send queue.
    pub fn pending_transmits(&self) -> usize {
        self.pending_transmits.len()
    }
}

impl NetworkInterfaceCard for ConnectX5Nic {
    /// Queues the packet and posts as much of the queue as the send queue has room for.
    fn send_packet(&mut self, transmit_buffer: TransmitBuffer) -> Result<(), &'static str> {
        self.pending_transmits.push_back(transmit_buffer);
        if !self.tx.is_blocked() {
            self.tx.start(&mut self.pending_transmits, &self.uar, &mut self.stats)?;
        }
        Ok(())
    }

    fn get_received_frame(&mut self) -> Option<ReceivedFrame> {
        self.received_frames.pop_front()
    }

    /// Drains the completion queue without waiting for an interrupt.
    fn poll_receive(&mut self) -> Result<(), &'static str> {
        self.service_events();
        self.process_cq(self.now_tick())?;
        self.event_queue.arm(&self.uar);
        Ok(())
    }
}

impl core::fmt::Debug for ConnectX5Nic {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ConnectX5Nic")
            .field("firmware_version", &self.firmware_version)
            .field("issi", &self.issi)
            .field("uar", &self.uar)
            .field("event_queue", &self.event_queue)
            .field("completion_queue", &self.completion_queue)
            .field("rx", &self.rx)
            .field("tx", &self.tx)
            .finish()
    }
}


/// Asks firmware how many pages it needs for `stage` and gives it that many.
fn give_pages(
    cmdq: &mut CommandQueue,
    allocator: &Arc<dyn DmaAllocator>,
    stage: QueryPagesOpMod,
    firmware_pages: &mut Vec<DmaRegion>,
) -> Result<(), &'static str> {
    let npages = cmdq.query_pages(stage)?;
    if npages <= 0 {
        trace!("mlx5: firmware needs no {:?}", stage);
        return Ok(());
    }
    let region = create_page_mapping(allocator, npages as usize)?;
    cmdq.manage_pages(ManagePagesOpMod::AllocationSuccess, &region.page_addresses())?;
    debug!("mlx5: gave firmware {} {:?}", npages, stage);
    firmware_pages.push(region);
    Ok(())
}


/// Routes completions to the send and receive rings during one drain.
struct DataPathHandler<'a> {
    rx: &'a mut RxRing,
    tx: &'a mut TxRing,
    calibration: &'a Calibrator,
    stats: &'a mut Statistics,
    /// Received buffers, handed off together once the drain is done
    batch: &'a mut Vec<ReceiveBuffer>,
    /// Receive buffers dropped because of error completions
    discarded: &'a mut u32,
}

impl<'a> CompletionHandler for DataPathHandler<'a> {
    fn transmit_completed(&mut self, cqe: &CompletionQueueEntry) -> usize {
        let freed = self.tx.complete(cqe);
        if freed == 0 {
            self.stats.tx_missing_buffer += 1;
        }
        freed
    }

    fn receive_completed(&mut self, cqe: &CompletionQueueEntry) {
        match self.rx.complete(cqe, self.calibration) {
            Some(buffer) => {
                self.stats.rx_packets += 1;
                self.stats.rx_bytes += buffer.length() as u64;
                self.batch.push(buffer);
            }
            None => {
                warn!("mlx5: receive completion for empty slot, WQE {}", cqe.wqe_counter());
                self.stats.rx_missing_buffer += 1;
            }
        }
    }

    fn error_completed(&mut self, opcode: CompletionQueueOpcode, cqe: &CompletionQueueEntry) -> usize {
        match opcode {
            CompletionQueueOpcode::RequesterError => {
                self.stats.requester_errors += 1;
                let freed = self.tx.complete(cqe);
                if freed == 0 {
                    self.stats.tx_missing_buffer += 1;
                }
                freed
            }
            _ => {
                self.stats.responder_errors += 1;
                if self.rx.discard(cqe) {
                    self.stats.rx_dropped += 1;
                    *self.discarded += 1;
                } else {
                    self.stats.rx_missing_buffer += 1;
                }
                0
            }
        }
    }
}
