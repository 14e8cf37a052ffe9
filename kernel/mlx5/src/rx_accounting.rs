//! Accounting of how many receive descriptors are posted to the NIC.
//!
//! The number of descriptors the driver keeps posted floats between a low and a high watermark.
//! The current watermark starts at the low watermark and grows by one per tick up to the high watermark,
//! and when the network stack reports that it is falling behind (livelock) it shrinks by one per tick,
//! so a busy host isn't handed more packets than it can process.

/// Receive slot accounting for one receive ring.
#[derive(Debug, Clone)]
pub struct RxSlotAccounting {
    low_watermark: u32,
    high_watermark: u32,
    current_watermark: u32,
    /// Number of slots currently handed out
    alive: u32,
    /// Tick of the last watermark adjustment
    adjusted: u64,
}

impl RxSlotAccounting {
    pub fn new(low_watermark: u32, high_watermark: u32) -> RxSlotAccounting {
        RxSlotAccounting {
            low_watermark,
            high_watermark,
            current_watermark: low_watermark,
            alive: 0,
            adjusted: 0,
        }
    }

    /// Hands out up to `max` slots for posting and returns how many were granted.
    /// Slots that end up not being posted must be given back with [`put()`](#method.put).
    pub fn get(&mut self, now_tick: u64, max: u32) -> u32 {
        if now_tick.wrapping_sub(self.adjusted) >= 1 {
            if self.current_watermark < self.high_watermark {
                self.current_watermark += 1;
            }
            self.adjusted = now_tick;
        }

        if self.alive >= self.current_watermark {
            return 0;
        }
        let granted = max.min(self.current_watermark - self.alive);
        self.alive += granted;
        granted
    }

    /// Gives back `n` slots: either unposted ones, or ones whose buffers the NIC has filled.
    pub fn put(&mut self, n: u32) {
        self.alive = self.alive.saturating_sub(n);
    }

    /// Shrinks the current watermark, at most once per tick.
    pub fn livelocked(&mut self, now_tick: u64) {
        if now_tick.wrapping_sub(self.adjusted) >= 1 {
            if self.current_watermark > self.low_watermark {
                self.current_watermark -= 1;
            }
            self.adjusted = now_tick;
        }
    }

    /// The number of slots currently handed out.
    pub fn in_use(&self) -> u32 {
        self.alive
    }

    pub fn current_watermark(&self) -> u32 {
        self.current_watermark
    }

    pub fn low_watermark(&self) -> u32 {
        self.low_watermark
    }

    pub fn high_watermark(&self) -> u32 {
        self.high_watermark
    }
}
