/// The frequency (in Hertz) at which the platform drives the driver's periodic `tick()`.
/// One tick is the delay used for deferred work such as receive-ring refill retries.
pub const CONFIG_TICK_HZ: u64 = 100;

/// Value: 10_000_000. The length of one tick in nanoseconds.
pub const CONFIG_TICK_PERIOD_NS: u64 = 1_000_000_000 / CONFIG_TICK_HZ;

/// Nanoseconds per second, used when converting calibration periods.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
