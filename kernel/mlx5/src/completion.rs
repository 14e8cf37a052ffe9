//! Draining a completion queue and dispatching each completion to the send or receive path.
//!
//! Requester completions (`REQ`) finish sends and responder completions (`SEND`) deliver received packets.
//! Error completions are logged and still release whatever their WQE was holding,
//! and any other opcode is skipped.
//! The consumer counter advances past every entry, whatever happened to it,
//! so one bad completion can't wedge the queue.

use mlx_ethernet::completion_queue::{CompletionQueue, CompletionQueueEntry, CompletionQueueOpcode};

/// Receives the completions found by [`process_completions()`].
pub trait CompletionHandler {
    /// A send finished. Returns the number of send queue slots it occupied.
    fn transmit_completed(&mut self, cqe: &CompletionQueueEntry) -> usize;

    /// A packet was received.
    fn receive_completed(&mut self, cqe: &CompletionQueueEntry);

    /// The device reported a failed send or receive.
    /// Returns the number of send queue slots released, which is zero for a failed receive.
    fn error_completed(&mut self, _opcode: CompletionQueueOpcode, _cqe: &CompletionQueueEntry) -> usize { 0 }
}

/// What one pass over a completion queue found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Completions consumed, of any kind
    pub processed: usize,
    pub transmitted: usize,
    pub received: usize,
    pub errors: usize,
    /// Completions with an opcode that isn't handled
    pub ignored: usize,
    /// Send queue slots freed by the transmit completions, failed sends included
    pub slots_freed: usize,
}

/// Consumes every completion the device has written so far.
pub fn process_completions<H: CompletionHandler>(cq: &mut CompletionQueue, handler: &mut H) -> DrainSummary {
    let mut summary = DrainSummary::default();
    cq.ring().sync_for_cpu();

    while let Some(cqe) = cq.peek() {
        match CompletionQueueOpcode::try_from(cqe.opcode()) {
            Ok(CompletionQueueOpcode::Requester) => {
                summary.slots_freed += handler.transmit_completed(&cqe);
                summary.transmitted += 1;
            }
            Ok(CompletionQueueOpcode::ResponderSend) => {
                handler.receive_completed(&cqe);
                summary.received += 1;
            }
            Ok(opcode @ CompletionQueueOpcode::RequesterError)
            | Ok(opcode @ CompletionQueueOpcode::ResponderError) => {
                warn!("mlx5: {:?} completion for WQE {}, syndrome {:#X}, vendor syndrome {:#X}",
                    opcode, cqe.wqe_counter(), cqe.error_syndrome(), cqe.vendor_error_syndrome()
                );
                summary.slots_freed += handler.error_completed(opcode, &cqe);
                summary.errors += 1;
            }
            _ => {
                trace!("mlx5: ignoring completion with opcode {:#X}", cqe.opcode());
                summary.ignored += 1;
            }
        }
        cq.advance();
        summary.processed += 1;
    }

    summary
}
