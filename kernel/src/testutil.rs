//! Test doubles for the injected capabilities.
//!
//! `MockScheduler` is a single-threaded stand-in for the firmware
//! scheduler: the test script decides which thread is "running" via
//! [`MockScheduler::run_thread`] and inspects block/ready/priority
//! effects directly. `switch_out` records the call and returns, so
//! tests drive blocked paths through the `*_begin` state-machine
//! halves and the wake-status slots rather than real context switches.

use std::cell::{Cell, RefCell};

use thal::SimPort;

use crate::config::MAX_THREADS;
use crate::thread::{Priority, Scheduler, ThreadId};

pub struct MockScheduler {
    current: Cell<Option<ThreadId>>,
    in_irq: Cell<bool>,
    base: RefCell<[Priority; MAX_THREADS]>,
    eff: RefCell<[Priority; MAX_THREADS]>,
    blocked: RefCell<[bool; MAX_THREADS]>,
    switches: Cell<u32>,
}

impl MockScheduler {
    pub fn new() -> Self {
        Self {
            current: Cell::new(None),
            in_irq: Cell::new(false),
            base: RefCell::new([0; MAX_THREADS]),
            eff: RefCell::new([0; MAX_THREADS]),
            blocked: RefCell::new([false; MAX_THREADS]),
            switches: Cell::new(0),
        }
    }

    /// Make `t` the running thread with the given base priority.
    /// Resets any effective-priority boost `t` carried.
    pub fn run_thread(&self, t: ThreadId, base: Priority) {
        self.set_base_priority(t, base);
        self.blocked.borrow_mut()[t as usize] = false;
        self.current.set(Some(t));
    }

    /// Set base (and effective) priority without switching to `t`.
    pub fn set_base_priority(&self, t: ThreadId, p: Priority) {
        self.base.borrow_mut()[t as usize] = p;
        self.eff.borrow_mut()[t as usize] = p;
    }

    pub fn is_blocked(&self, t: ThreadId) -> bool {
        self.blocked.borrow()[t as usize]
    }

    pub fn effective_priority(&self, t: ThreadId) -> Priority {
        self.eff.borrow()[t as usize]
    }

    pub fn enter_interrupt(&self) {
        self.in_irq.set(true);
    }

    pub fn leave_interrupt(&self) {
        self.in_irq.set(false);
    }

    /// How many times a blocking wait reached `switch_out`.
    pub fn switch_count(&self) -> u32 {
        self.switches.get()
    }
}

impl Default for MockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for MockScheduler {
    fn current(&self) -> Option<ThreadId> {
        self.current.get()
    }

    fn in_interrupt(&self) -> bool {
        self.in_irq.get()
    }

    fn base_priority(&self, t: ThreadId) -> Priority {
        self.base.borrow()[t as usize]
    }

    fn effective_priority(&self, t: ThreadId) -> Priority {
        MockScheduler::effective_priority(self, t)
    }

    fn set_effective_priority(&self, t: ThreadId, p: Priority) {
        self.eff.borrow_mut()[t as usize] = p;
    }

    fn block(&self, t: ThreadId) {
        self.blocked.borrow_mut()[t as usize] = true;
    }

    fn ready(&self, t: ThreadId) {
        self.blocked.borrow_mut()[t as usize] = false;
    }

    fn switch_out(&self, _t: ThreadId) {
        self.switches.set(self.switches.get() + 1);
    }
}

/// Fresh port + scheduler pair for a unit test.
pub fn fixture() -> (SimPort, MockScheduler) {
    (SimPort::new(), MockScheduler::new())
}
