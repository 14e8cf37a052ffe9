//! Per-device tunables.

use kernel_config::time::NANOS_PER_SEC;
use mlx_ethernet::command_queue::DEFAULT_COMMAND_POLL_LIMIT;
use mlx_ethernet::uar::DEFAULT_BF_SIZE;
use mlx_ethernet::{LOG_CQ_SIZE, LOG_EQ_SIZE, LOG_RQ_SIZE, LOG_SQ_SIZE};

/// Size of every receive buffer; large enough for a standard 1500-byte MTU frame.
pub const RX_BUFFER_SIZE:               usize = 2048;
/// How long bring-up waits for the device to leave the initializing state.
pub const DEFAULT_READY_TIMEOUT_MS:     u32 = 2000;
/// Delay before the first clock calibration sample after bring-up.
pub const CALIBRATE_FIRST_NS:           u64 = 2 * NANOS_PER_SEC;
/// Period of the steady-state clock calibration.
pub const CALIBRATE_PERIOD_NS:          u64 = 32 * NANOS_PER_SEC;
/// Completion event moderation period, in microseconds.
pub const CQ_MODERATION_PERIOD:         u16 = 50;
/// The ISSI the driver asks firmware to use.
pub const WANTED_ISSI:                  u16 = 1;


#[derive(Debug, Clone)]
pub struct Mlx5Config {
    pub log_eq_size: u32,
    pub log_cq_size: u32,
    pub log_rq_size: u32,
    pub log_sq_size: u32,
    pub rx_buffer_size: usize,
    /// Completion event moderation: at most one event per `cq_moderation_period` microseconds
    pub cq_moderation_period: u16,
    /// Completion event moderation: or one event per `cq_moderation_count` completions
    pub cq_moderation_count: u16,
    /// Number of 1 ms polls a firmware command gets
    pub command_poll_limit: u32,
    pub ready_timeout_ms: u32,
    pub calibrate_first_ns: u64,
    pub calibrate_period_ns: u64,
    /// Size of one half of the blue-flame buffer
    pub bf_size: usize,
    /// Verify the signatures of completed commands
    pub check_signatures: bool,
    pub issi: u16,
}

impl Default for Mlx5Config {
    fn default() -> Self {
        Mlx5Config {
            log_eq_size: LOG_EQ_SIZE,
            log_cq_size: LOG_CQ_SIZE,
            log_rq_size: LOG_RQ_SIZE,
            log_sq_size: LOG_SQ_SIZE,
            rx_buffer_size: RX_BUFFER_SIZE,
            cq_moderation_period: CQ_MODERATION_PERIOD,
            // 90% of half the receive ring
            cq_moderation_count: (((1u32 << (LOG_RQ_SIZE - 1)) * 9) / 10) as u16,
            command_poll_limit: DEFAULT_COMMAND_POLL_LIMIT,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            calibrate_first_ns: CALIBRATE_FIRST_NS,
            calibrate_period_ns: CALIBRATE_PERIOD_NS,
            bf_size: DEFAULT_BF_SIZE,
            check_signatures: false,
            issi: WANTED_ISSI,
        }
    }
}
