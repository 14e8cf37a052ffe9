//! Counters for data-path events that are not reported to callers.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Receive completions whose slot held no buffer
    pub rx_missing_buffer: u64,
    /// Receive buffers dropped because their receive completed with an error
    pub rx_dropped: u64,
    /// Times the receive ring was left empty and a refill retry was scheduled
    pub rx_refill_shortfall: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    /// Send completions whose slot held no buffer
    pub tx_missing_buffer: u64,
    /// Packets dropped because they were shorter than the inlined header
    pub tx_too_short: u64,
    /// Packets copied into one buffer because they had too many segments
    pub tx_coalesced: u64,
    /// Packets dropped because they couldn't be posted
    pub tx_dropped: u64,
    /// Times the send ring filled up and the driver stopped posting
    pub tx_blocked: u64,
    pub requester_errors: u64,
    pub responder_errors: u64,
    /// Completions with an opcode the driver doesn't handle
    pub unknown_completions: u64,
    pub port_changes: u64,
    /// Events other than completions and port changes
    pub other_events: u64,
}
