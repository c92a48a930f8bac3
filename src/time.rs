//! Monotonic time reference.
//!
//! Grounded in `satcat5/timeref.h`/`timer.h`: a single tick source exposes
//! a raw counter and a fixed (or runtime-queried) tick rate; all elapsed-time
//! math is performed with wrapping unsigned subtraction so that a free-running
//! hardware counter can wrap without special-casing.

/// A monotonic tick source.
///
/// Implementors back this with whatever hardware or OS primitive is
/// available (a free-running timer register, `std::time::Instant`, a
/// simulated clock in tests). `raw()` must be monotonic modulo wraparound.
pub trait TimeSource {
    /// Current raw tick count.
    fn raw(&self) -> u32;
    /// Ticks per second. May vary at runtime on some platforms (e.g. a
    /// frequency-scaled oscillator), so this is a method rather than a
    /// constant.
    fn ticks_per_second(&self) -> u32;
}

/// A fixed-rate [`TimeSource`] useful for tests and simulation.
#[derive(Debug, Clone)]
pub struct SimClock {
    ticks: u32,
    rate: u32,
}

impl SimClock {
    /// Create a simulated clock starting at tick zero with the given rate.
    pub fn new(rate: u32) -> Self {
        SimClock { ticks: 0, rate }
    }

    /// Advance the simulated clock by the given number of ticks.
    pub fn advance(&mut self, ticks: u32) {
        self.ticks = self.ticks.wrapping_add(ticks);
    }
}

impl TimeSource for SimClock {
    fn raw(&self) -> u32 {
        self.ticks
    }
    fn ticks_per_second(&self) -> u32 {
        self.rate
    }
}

/// A timestamp snapshot: a tick count paired with the rate it was taken at.
///
/// Elapsed-time queries compare a `TimeVal` against a fresh tick reading
/// using wrapping subtraction, so a snapshot remains valid across any single
/// wraparound of the underlying counter provided the elapsed interval is
/// less than half the counter's period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeVal {
    ticks: u32,
    rate: u32,
}

impl TimeVal {
    /// Take a snapshot of the given time source.
    pub fn now(src: &dyn TimeSource) -> Self {
        TimeVal {
            ticks: src.raw(),
            rate: src.ticks_per_second(),
        }
    }

    /// Raw tick value at the moment this snapshot was taken.
    pub fn raw(&self) -> u32 {
        self.ticks
    }

    /// Microseconds elapsed between this snapshot and a fresh reading of
    /// `src`, using wrapping subtraction.
    pub fn elapsed_usec(&self, src: &dyn TimeSource) -> u32 {
        let now = src.raw();
        let delta = now.wrapping_sub(self.ticks);
        scale_to_usec(delta, self.rate)
    }

    /// Elapsed time measured against `period` (ticks), returning the
    /// elapsed tick count and `k`, the largest integer such that
    /// `k * period <= elapsed`. Advances `self` forward by `k * period` so
    /// that repeated calls do not accumulate drift.
    pub fn interval_usec(&mut self, src: &dyn TimeSource, period: u32) -> (u32, u32) {
        if period == 0 {
            return (0, 0);
        }
        let now = src.raw();
        let elapsed = now.wrapping_sub(self.ticks);
        let k = elapsed / period;
        self.ticks = self.ticks.wrapping_add(k.wrapping_mul(period));
        (elapsed, k)
    }

    /// Whole milliseconds elapsed since this snapshot, carrying the
    /// fractional remainder forward in `self` rather than truncating it.
    pub fn increment_msec(&mut self, src: &dyn TimeSource) -> u32 {
        let now = src.raw();
        let delta = now.wrapping_sub(self.ticks);
        let msec_ticks = self.rate / 1000;
        if msec_ticks == 0 {
            self.ticks = now;
            return 0;
        }
        let whole = delta / msec_ticks;
        self.ticks = self.ticks.wrapping_add(whole.wrapping_mul(msec_ticks));
        whole
    }
}

fn scale_to_usec(ticks: u32, rate: u32) -> u32 {
    if rate == 0 {
        return 0;
    }
    ((ticks as u64) * 1_000_000 / rate as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_usec_scales_by_rate() {
        let mut clk = SimClock::new(1_000_000);
        let snap = TimeVal::now(&clk);
        clk.advance(500_000);
        assert_eq!(snap.elapsed_usec(&clk), 500_000);
    }

    #[test]
    fn interval_usec_does_not_accumulate_drift() {
        let mut clk = SimClock::new(1000);
        let mut snap = TimeVal::now(&clk);
        clk.advance(250);
        let (elapsed, k) = snap.interval_usec(&clk, 100);
        assert_eq!(elapsed, 250);
        assert_eq!(k, 2);
        // Remaining 50 ticks of fractional remainder carry forward.
        clk.advance(60);
        let (_, k2) = snap.interval_usec(&clk, 100);
        assert_eq!(k2, 1);
    }

    #[test]
    fn wraparound_is_handled_by_unsigned_subtraction() {
        let mut clk = SimClock::new(1000);
        clk.advance(u32::MAX - 10);
        let snap = TimeVal::now(&clk);
        clk.advance(20); // wraps past u32::MAX
        assert_eq!(snap.elapsed_usec(&clk) > 0, true);
    }
}
