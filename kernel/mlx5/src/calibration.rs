//! Translation of device completion timestamps into host uptime.
//!
//! The device stamps completions with its free-running internal timer.
//! Periodically the driver samples that timer together with the host clock,
//! and keeps the two most recent samples as a linear map from one to the other:
//! `host = base_uptime + (timestamp - base_timer) * uptime_delta / timer_delta`.
//!
//! Both deltas are scaled down by [`TIMESTAMP_SHIFT`] bits so that the product stays in range.
//! Until two samples exist the timer delta is zero and no translation is done.

/// Number of low bits dropped from both deltas before they are used.
pub const TIMESTAMP_SHIFT: u32 = 10;


/// One calibration point, plus the deltas from the point before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationSample {
    /// Host uptime when the sample was taken, in nanoseconds
    pub uptime_ns: u64,
    /// Device timer value when the sample was taken
    pub timer: u64,
    /// Host uptime elapsed since the previous sample, shifted by [`TIMESTAMP_SHIFT`]
    pub uptime_delta: u64,
    /// Device timer ticks elapsed since the previous sample, shifted by [`TIMESTAMP_SHIFT`]
    pub timer_delta: u64,
}

impl CalibrationSample {
    /// Translates a device timestamp into host uptime nanoseconds.
    ///
    /// Returns `None` if this sample has no timer delta to scale by.
    pub fn translate(&self, timestamp: u64) -> Option<u64> {
        if self.timer_delta == 0 {
            return None;
        }
        let elapsed = timestamp.wrapping_sub(self.timer) as u128;
        let scaled = elapsed * self.uptime_delta as u128 / self.timer_delta as u128;
        Some(self.uptime_ns.wrapping_add(scaled as u64))
    }
}


/// Two alternating calibration samples and the schedule for taking new ones.
#[derive(Debug, Clone)]
pub struct Calibrator {
    samples: [CalibrationSample; 2],
    /// Incremented on every new sample; `generation % 2` selects the current sample.
    generation: u32,
    first_period_ns: u64,
    period_ns: u64,
    next_due_ns: Option<u64>,
}

impl Calibrator {
    pub fn new(first_period_ns: u64, period_ns: u64) -> Calibrator {
        Calibrator {
            samples: [CalibrationSample::default(); 2],
            generation: 0,
            first_period_ns,
            period_ns,
            next_due_ns: None,
        }
    }

    /// Records the first sample, which has no deltas, and schedules the next one after the first period.
    pub fn start(&mut self, uptime_ns: u64, timer: u64) {
        let current = &mut self.samples[(self.generation % 2) as usize];
        *current = CalibrationSample { uptime_ns, timer, uptime_delta: 0, timer_delta: 0 };
        self.next_due_ns = Some(uptime_ns.saturating_add(self.first_period_ns));
    }

    /// Records a new sample relative to the current one and makes it current.
    pub fn sample(&mut self, uptime_ns: u64, timer: u64) {
        let previous = *self.current();
        let next = &mut self.samples[(self.generation.wrapping_add(1) % 2) as usize];
        *next = CalibrationSample {
            uptime_ns,
            timer,
            uptime_delta: uptime_ns.wrapping_sub(previous.uptime_ns) >> TIMESTAMP_SHIFT,
            timer_delta: timer.wrapping_sub(previous.timer) >> TIMESTAMP_SHIFT,
        };
        self.generation = self.generation.wrapping_add(1);
        self.next_due_ns = Some(uptime_ns.saturating_add(self.period_ns));
        trace!("Calibrator::sample(): generation {}, {:?}", self.generation, next);
    }

    /// True once the scheduled time of the next sample has passed.
    pub fn is_due(&self, now_ns: u64) -> bool {
        matches!(self.next_due_ns, Some(due) if now_ns >= due)
    }

    pub fn current(&self) -> &CalibrationSample {
        &self.samples[(self.generation % 2) as usize]
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Translates a device timestamp with the current sample.
    pub fn translate(&self, timestamp: u64) -> Option<u64> {
        self.current().translate(timestamp)
    }
}
