//! The 64-bit system clock and time-unit conversions.
//!
//! The hardware gives us one free-running 32-bit cycle counter that
//! wraps silently (every ~10s at 400 MHz). The kernel reconstructs a
//! monotonic 64-bit cycle count by tracking a software high word: each
//! sample that reads numerically below the previous one means the
//! counter wrapped, so the high word advances. Sampling happens under
//! critical section; the tick interrupt is armed at most
//! `MAX_TICK_DELTA` ahead (see `config`), which guarantees a sample
//! lands in every wrap period even when no timers are pending.

use thal::Port;

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::sync::critical::CriticalGuard;

/// Wrap-tracking state for the 64-bit cycle count.
pub(crate) struct SystemClock {
    hi: u32,
    last_lo: u32,
}

impl SystemClock {
    pub const fn new() -> Self {
        Self { hi: 0, last_lo: 0 }
    }

    /// Sample the hardware counter and fold in wrap detection.
    /// Caller holds a critical section.
    pub fn now(&mut self, port: &dyn Port) -> u64 {
        let lo = port.cycle_count();
        if lo < self.last_lo {
            self.hi = self.hi.wrapping_add(1);
        }
        self.last_lo = lo;
        ((self.hi as u64) << 32) | lo as u64
    }
}

impl Kernel<'_> {
    /// The current 64-bit system cycle count. Monotonic non-decreasing
    /// across calls, including across 32-bit counter wrap.
    pub fn get_system_cycles(&mut self) -> u64 {
        let port = self.port();
        let _cs = CriticalGuard::enter(port);
        self.clock.now(port)
    }

    /// Current clock frequency in cycles per second.
    #[inline]
    pub fn get_clock_freq(&self) -> u32 {
        self.clock_freq
    }

    /// Set the clock frequency used by the unit conversions. Expiries
    /// of already-armed timers are cycle counts and are not rescaled.
    pub fn set_clock_freq(&mut self, freq: u32) -> Result<()> {
        if freq == 0 {
            return Err(Error::InvalidArg);
        }
        self.clock_freq = freq;
        Ok(())
    }

    // ── Unit conversions ────────────────────────────────────────
    //
    // Integer arithmetic, truncating toward zero: a cycle count below
    // one unit converts to 0. Products are widened to u128 so the
    // full u64 cycle range survives the microsecond scale factor.

    #[inline]
    pub fn cycles_to_secs(&self, cycles: u64) -> u64 {
        cycles / self.clock_freq as u64
    }

    #[inline]
    pub fn cycles_to_msecs(&self, cycles: u64) -> u64 {
        (cycles as u128 * 1_000 / self.clock_freq as u128) as u64
    }

    #[inline]
    pub fn cycles_to_usecs(&self, cycles: u64) -> u64 {
        (cycles as u128 * 1_000_000 / self.clock_freq as u128) as u64
    }

    #[inline]
    pub fn secs_to_cycles(&self, secs: u64) -> u64 {
        secs * self.clock_freq as u64
    }

    #[inline]
    pub fn msecs_to_cycles(&self, msecs: u64) -> u64 {
        (msecs as u128 * self.clock_freq as u128 / 1_000) as u64
    }

    #[inline]
    pub fn usecs_to_cycles(&self, usecs: u64) -> u64 {
        (usecs as u128 * self.clock_freq as u128 / 1_000_000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockScheduler;
    use thal::SimPort;

    #[test]
    fn monotonic_across_wrap() {
        let port = SimPort::new();
        let sched = MockScheduler::new();
        let mut kernel = Kernel::new(&port, &sched);

        port.set_cycle_count(u32::MAX - 100);
        let before = kernel.get_system_cycles();
        assert_eq!(before, (u32::MAX - 100) as u64);

        // Cross the wrap: the low word restarts near zero but the
        // 64-bit value keeps climbing.
        port.advance(300);
        let after = kernel.get_system_cycles();
        assert!(after > before);
        assert_eq!(after, (1u64 << 32) + 199);

        port.advance(50);
        assert!(kernel.get_system_cycles() > after);
    }

    #[test]
    fn repeated_samples_without_wrap_hold_high_word() {
        let port = SimPort::new();
        let sched = MockScheduler::new();
        let mut kernel = Kernel::new(&port, &sched);
        port.set_cycle_count(1_000);
        assert_eq!(kernel.get_system_cycles(), 1_000);
        assert_eq!(kernel.get_system_cycles(), 1_000);
        port.advance(24);
        assert_eq!(kernel.get_system_cycles(), 1_024);
    }

    #[test]
    fn conversions_truncate_toward_zero() {
        let port = SimPort::new();
        let sched = MockScheduler::new();
        let mut kernel = Kernel::new(&port, &sched);
        kernel.set_clock_freq(400_000_000).unwrap();

        assert_eq!(kernel.cycles_to_secs(399_999_999), 0);
        assert_eq!(kernel.cycles_to_secs(400_000_000), 1);
        assert_eq!(kernel.cycles_to_msecs(399_999), 0);
        assert_eq!(kernel.cycles_to_msecs(400_000), 1);
        assert_eq!(kernel.cycles_to_usecs(399), 0);
        assert_eq!(kernel.cycles_to_usecs(400), 1);
    }

    #[test]
    fn msec_round_trip_within_one_truncation() {
        let port = SimPort::new();
        let sched = MockScheduler::new();
        let mut kernel = Kernel::new(&port, &sched);
        // A rate that does not divide 1000 evenly, so truncation is
        // actually exercised.
        kernel.set_clock_freq(33_333_333).unwrap();
        for msecs in [0u64, 1, 7, 999, 1_000, 123_456, 86_400_000] {
            let cycles = kernel.msecs_to_cycles(msecs);
            let back = kernel.cycles_to_msecs(cycles);
            assert!(
                msecs.saturating_sub(back) <= 1,
                "round trip {} -> {} -> {}",
                msecs,
                cycles,
                back
            );
        }
    }

    #[test]
    fn usec_conversions_survive_large_counts() {
        let port = SimPort::new();
        let sched = MockScheduler::new();
        let mut kernel = Kernel::new(&port, &sched);
        kernel.set_clock_freq(400_000_000).unwrap();
        // ~1.5 years of cycles at 400 MHz; the *1e6 intermediate
        // overflows u64 and must not wrap.
        let cycles = u64::MAX / 1_000;
        let usecs = kernel.cycles_to_usecs(cycles);
        assert_eq!(usecs, (cycles as u128 * 1_000_000 / 400_000_000) as u64);
    }

    #[test]
    fn zero_frequency_rejected() {
        let port = SimPort::new();
        let sched = MockScheduler::new();
        let mut kernel = Kernel::new(&port, &sched);
        assert_eq!(kernel.set_clock_freq(0), Err(Error::InvalidArg));
    }
}
