//! The kernel singleton.
//!
//! All mutable kernel state — object tables, the armed-timer list, the
//! system clock — lives in one `Kernel` value with an explicit
//! constructor. The two capabilities the core cannot provide itself
//! are injected as references: a [`Port`] for the hardware registers
//! and a [`Scheduler`] for thread operations. Firmware typically pins
//! the instance in a static cell; tests build one on the stack around
//! fakes.
//!
//! Component operations (`mutex_*`, `cond_*`, `event_*`, `timer_*`)
//! are implemented in their own modules as further `impl Kernel`
//! blocks; this file owns construction plus the blocking/waking
//! handshake every primitive shares.

use thal::Port;

use crate::config::{MAX_CONDVARS, MAX_EVENTS, MAX_MUTEXES, MAX_THREADS, MAX_TIMERS};
use crate::error::{Error, Result};
use crate::sync::cond::CondState;
use crate::sync::critical::CriticalGuard;
use crate::sync::event::EventState;
use crate::sync::mutex::MutexState;
use crate::table::Table;
use crate::thread::{Scheduler, ThreadId, ThreadRec, WaitData, WakeStatus};
use crate::time::clock::SystemClock;
use crate::time::timer::{ActiveList, TickMode, TimerState};

/// The synchronization and timing core.
pub struct Kernel<'a> {
    pub(crate) port: &'a dyn Port,
    pub(crate) sched: &'a dyn Scheduler,
    pub(crate) threads: [ThreadRec; MAX_THREADS],
    pub(crate) mutexes: Table<MutexState, MAX_MUTEXES>,
    pub(crate) conds: Table<CondState, MAX_CONDVARS>,
    pub(crate) events: Table<EventState, MAX_EVENTS>,
    pub(crate) timers: Table<TimerState, MAX_TIMERS>,
    pub(crate) timer_list: ActiveList,
    pub(crate) clock: SystemClock,
    pub(crate) clock_freq: u32,
    pub(crate) tick_mode: TickMode,
}

impl<'a> Kernel<'a> {
    /// Build a kernel over the injected hardware port and scheduler.
    ///
    /// The instance starts with every table empty and the system timer
    /// off; call [`Kernel::start_system_timer`] before using timers.
    pub fn new(port: &'a dyn Port, sched: &'a dyn Scheduler) -> Self {
        Self {
            port,
            sched,
            threads: core::array::from_fn(|_| ThreadRec::new()),
            mutexes: Table::new(),
            conds: Table::new(),
            events: Table::new(),
            timers: Table::new(),
            timer_list: ActiveList::new(),
            clock: SystemClock::new(),
            clock_freq: crate::config::DEFAULT_CLOCK_HZ,
            tick_mode: TickMode::Off,
        }
    }

    #[inline]
    pub(crate) fn port(&self) -> &'a dyn Port {
        self.port
    }

    #[inline]
    pub(crate) fn sched(&self) -> &'a dyn Scheduler {
        self.sched
    }

    // ── Interrupt-enable mask ───────────────────────────────────

    /// Enable the interrupts named in `mask`; returns the prior mask.
    pub fn interrupt_enable(&self, mask: u32) -> u32 {
        let _cs = CriticalGuard::enter(self.port);
        let old = self.port.int_enable();
        self.port.set_int_enable(old | mask);
        old
    }

    /// Disable the interrupts named in `mask`; returns the prior mask.
    pub fn interrupt_disable(&self, mask: u32) -> u32 {
        let _cs = CriticalGuard::enter(self.port);
        let old = self.port.int_enable();
        self.port.set_int_enable(old & !mask);
        old
    }

    // ── Blocking / waking handshake ─────────────────────────────

    /// The calling thread, or `InterruptContext` when there is none —
    /// blocking primitives call this first so an interrupt handler
    /// fails cleanly instead of blocking.
    pub(crate) fn current_thread(&self) -> Result<ThreadId> {
        if self.sched.in_interrupt() {
            return Err(Error::InterruptContext);
        }
        self.sched.current().ok_or(Error::InterruptContext)
    }

    /// Release a blocked thread: record why it woke and hand it back
    /// to the scheduler. Must run inside a critical section; `t` must
    /// have a pending wait.
    pub(crate) fn wake_thread(&mut self, t: ThreadId, status: WakeStatus) {
        self.invariant(
            self.threads[t as usize].wake == WakeStatus::Pending,
            "wake of a thread with no pending wait",
        );
        let rec = &mut self.threads[t as usize];
        rec.wake = status;
        rec.wait = WaitData::None;
        self.sched.ready(t);
    }

    /// Consume the wake reason after `switch_out` returns.
    pub(crate) fn wait_finish(&mut self, t: ThreadId) -> WakeStatus {
        let _cs = CriticalGuard::enter(self.port);
        core::mem::replace(&mut self.threads[t as usize].wake, WakeStatus::Idle)
    }
}
