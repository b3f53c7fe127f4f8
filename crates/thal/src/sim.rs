//! Software port — a simulated processor for host-side testing.
//!
//! `SimPort` keeps the interrupt level, enable mask, cycle counter and
//! compare register in a `spin::Mutex`, so it is `Sync` and can live in
//! a `static` the way a real port would. Tests drive time explicitly
//! with [`SimPort::advance`] and then invoke the kernel tick entry, the
//! same sequence the hardware timer interrupt produces on a target.

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::{IntState, Port};

struct SimState {
    int_level: u32,
    int_enable: u32,
    ccount: u32,
    compare: u32,
}

/// A fully software-defined [`Port`].
pub struct SimPort {
    state: Mutex<SimState>,
    halted: AtomicBool,
}

impl SimPort {
    /// New simulated processor: level 0, all interrupts enabled,
    /// cycle counter at zero.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                int_level: 0,
                int_enable: u32::MAX,
                ccount: 0,
                compare: 0,
            }),
            halted: AtomicBool::new(false),
        }
    }

    /// Advance the cycle counter by `cycles`, wrapping at 32 bits like
    /// the hardware counter does.
    pub fn advance(&self, cycles: u32) {
        let mut st = self.state.lock();
        st.ccount = st.ccount.wrapping_add(cycles);
    }

    /// Force the cycle counter to an exact value (for wrap tests).
    pub fn set_cycle_count(&self, ccount: u32) {
        self.state.lock().ccount = ccount;
    }

    /// Whether the compare register has been reached since it was last
    /// armed, i.e. whether the timer interrupt would be pending.
    ///
    /// Uses a signed distance so it stays correct across counter wrap.
    pub fn compare_reached(&self) -> bool {
        let st = self.state.lock();
        (st.ccount.wrapping_sub(st.compare) as i32) >= 0
    }

    /// Whether `halt` was invoked (the simulation cannot actually stop
    /// the host, so it latches a flag instead).
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for SimPort {
    fn set_int_level(&self, level: u32) -> IntState {
        let mut st = self.state.lock();
        let saved = st.int_level;
        // Raising only: entering a critical section from an interrupt
        // handler already running at the ceiling must not lower the level.
        if level > st.int_level {
            st.int_level = level;
        }
        saved
    }

    fn restore_int_level(&self, saved: IntState) {
        self.state.lock().int_level = saved;
    }

    fn int_level(&self) -> u32 {
        self.state.lock().int_level
    }

    fn int_enable(&self) -> u32 {
        self.state.lock().int_enable
    }

    fn set_int_enable(&self, mask: u32) -> u32 {
        let mut st = self.state.lock();
        core::mem::replace(&mut st.int_enable, mask)
    }

    fn cycle_count(&self) -> u32 {
        self.state.lock().ccount
    }

    fn set_compare(&self, when: u32) {
        self.state.lock().compare = when;
    }

    fn compare(&self) -> u32 {
        self.state.lock().compare
    }

    fn halt(&self) -> ! {
        self.halted.store(true, Ordering::SeqCst);
        panic!("SimPort: system halted");
    }
}
