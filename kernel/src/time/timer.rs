//! The timer subsystem.
//!
//! Timers live in the kernel's slot table and, while armed, in one
//! global list sorted by absolute expiry (64-bit cycle count). The
//! hardware side is a single compare register: in periodic mode it
//! advances by a fixed tick every interrupt; in dynamic (tickless)
//! mode it is re-armed to the earliest pending expiry after every
//! change to the head of the list, clamped to `MAX_TICK_DELTA` so the
//! clock's wrap tracking keeps running across an idle list.
//!
//! [`Kernel::timer_tick`] is the interrupt-side entry: it pops every
//! timer whose expiry has passed — several, when ticks were delayed —
//! invokes callbacks in interrupt context, wakes waiters and sleepers,
//! and re-inserts recurring timers. A `FROM_LAST` recurring timer
//! re-arms at `old expiry + period`, so a late tick fires it once per
//! elapsed period and the schedule never drifts; the default from-now
//! re-arm fires once and realigns to the actual processing time.
//!
//! Timer callbacks run inside the kernel critical section at
//! interrupt level: they get their context word and nothing else, and
//! must not block.

use bitflags::bitflags;
use log::{debug, trace};
use thal::Port;

use crate::config::{MAX_THREADS, MAX_TICK_DELTA, MAX_TIMERS};
use crate::error::{Error, Result};
use crate::fatal;
use crate::kernel::Kernel;
use crate::sync::critical::CriticalGuard;
#[cfg(feature = "timer-wait")]
use crate::sync::waitq::{QueueOrder, WaitQueue};
use crate::table::RawHandle;
use crate::thread::{ThreadId, WakeStatus};

bitflags! {
    /// Options for [`Kernel::timer_start`]. Empty flags mean a
    /// one-shot timer at `when` cycles from now.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerFlags: u32 {
        /// Re-arm automatically every `when` cycles.
        const RECURRING = 0x0001;
        /// Interpret `when` as an absolute cycle count.
        const ABSOLUTE = 0x0002;
        /// Measure `when` (and re-triggers) from the timer's last
        /// scheduled expiry instead of from now. Zero if the timer
        /// was never started.
        const FROM_LAST = 0x0010;
    }
}

/// Expiry callback; runs in interrupt context with its context word.
pub type TimerCallback = fn(arg: usize);

/// Handle to an initialized timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(pub(crate) RawHandle);

pub(crate) struct TimerState {
    /// Absolute cycle count of the next (or last) expiry. Survives
    /// deactivation: it is the `FROM_LAST` base for a restart.
    pub expiry: u64,
    /// Re-trigger interval; 0 = one-shot.
    pub period: u64,
    /// Re-trigger from the previous expiry rather than from now.
    pub from_last: bool,
    pub active: bool,
    pub callback: Option<TimerCallback>,
    pub arg: usize,
    /// Single thread parked by `thread_sleep` on this slot.
    pub sleeper: Option<ThreadId>,
    #[cfg(feature = "timer-wait")]
    pub waitq: WaitQueue,
}

impl TimerState {
    fn new() -> Self {
        Self {
            expiry: 0,
            period: 0,
            from_last: false,
            active: false,
            callback: None,
            arg: 0,
            sleeper: None,
            #[cfg(feature = "timer-wait")]
            waitq: WaitQueue::new(QueueOrder::Priority),
        }
    }
}

/// Whether the hardware tick is running, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickMode {
    Off,
    /// Fixed tick every `n` cycles.
    Periodic(u32),
    /// Tickless: compare register follows the earliest expiry.
    Dynamic,
}

// ── Armed-timer list ────────────────────────────────────────────

/// The global list of armed timers, sorted by expiry; ties keep
/// insertion order. A timer is listed iff its `active` flag is set.
pub(crate) struct ActiveList {
    entries: [(u64, RawHandle); MAX_TIMERS],
    len: usize,
}

impl ActiveList {
    pub fn new() -> Self {
        Self {
            entries: [(0, RawHandle::pack(0, 0)); MAX_TIMERS],
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn insert(&mut self, expiry: u64, h: RawHandle) {
        debug_assert!(self.len < MAX_TIMERS, "armed-timer list overflow");
        let at = self.entries[..self.len]
            .iter()
            .position(|&(e, _)| e > expiry)
            .unwrap_or(self.len);
        self.entries.copy_within(at..self.len, at + 1);
        self.entries[at] = (expiry, h);
        self.len += 1;
    }

    pub fn remove(&mut self, h: RawHandle) -> bool {
        match self.entries[..self.len].iter().position(|&(_, e)| e == h) {
            Some(at) => {
                self.entries.copy_within(at + 1..self.len, at);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    pub fn front(&self) -> Option<(u64, RawHandle)> {
        (self.len > 0).then(|| self.entries[0])
    }

    pub fn pop_front(&mut self) -> Option<(u64, RawHandle)> {
        let head = self.front()?;
        self.entries.copy_within(1..self.len, 0);
        self.len -= 1;
        Some(head)
    }

    pub fn earliest(&self) -> Option<u64> {
        self.front().map(|(e, _)| e)
    }
}

// ── Timer API ───────────────────────────────────────────────────

impl Kernel<'_> {
    /// Start the system tick. `tick_period` in cycles; 0 selects
    /// dynamic (tickless) mode. Must be called once, before any other
    /// timer operation.
    pub fn start_system_timer(&mut self, tick_period: u32) -> Result<()> {
        if self.tick_mode != TickMode::Off {
            return Err(Error::InvalidArg);
        }
        let port = self.port();
        let _cs = CriticalGuard::enter(port);
        let now = self.clock.now(port);
        if tick_period == 0 {
            self.tick_mode = TickMode::Dynamic;
            self.timer_rearm(now);
        } else {
            self.tick_mode = TickMode::Periodic(tick_period);
            port.set_compare((now as u32).wrapping_add(tick_period));
        }
        debug!("system timer started, mode {:?}", self.tick_mode);
        Ok(())
    }

    /// Allocate a timer slot. The timer starts inactive; arm it with
    /// [`Kernel::timer_start`], release the slot with
    /// [`Kernel::timer_delete`].
    pub fn timer_init(&mut self) -> Result<TimerId> {
        let _cs = CriticalGuard::enter(self.port());
        let h = self.timers.insert(TimerState::new())?;
        Ok(TimerId(h))
    }

    /// Free a timer slot; fails with `TimerDelete` while the timer is
    /// armed.
    pub fn timer_delete(&mut self, t: TimerId) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        if self.timers.get(t.0)?.active {
            return Err(Error::TimerDelete);
        }
        self.timers.remove(t.0)?;
        Ok(())
    }

    /// Arm the timer. `when` is interpreted per `flags`: a delta from
    /// now (default), a delta from the last scheduled expiry
    /// (`FROM_LAST`), or an absolute cycle count (`ABSOLUTE`).
    /// `RECURRING` makes `when` the period as well. Starting an
    /// already-armed timer restarts it.
    pub fn timer_start(
        &mut self,
        t: TimerId,
        when: u64,
        flags: TimerFlags,
        callback: Option<TimerCallback>,
        arg: usize,
    ) -> Result<()> {
        self.require_system_timer()?;
        if flags.contains(TimerFlags::RECURRING | TimerFlags::ABSOLUTE)
            || flags.contains(TimerFlags::ABSOLUTE | TimerFlags::FROM_LAST)
            || (flags.contains(TimerFlags::RECURRING) && when == 0)
        {
            return Err(Error::InvalidArg);
        }
        let port = self.port();
        let _cs = CriticalGuard::enter(port);
        let now = self.clock.now(port);
        let tm = self.timers.get_mut(t.0)?;
        let expiry = if flags.contains(TimerFlags::ABSOLUTE) {
            when
        } else if flags.contains(TimerFlags::FROM_LAST) {
            tm.expiry.wrapping_add(when)
        } else {
            now.wrapping_add(when)
        };
        if tm.active {
            self.timer_list.remove(t.0);
        }
        tm.expiry = expiry;
        tm.period = if flags.contains(TimerFlags::RECURRING) {
            when
        } else {
            0
        };
        tm.from_last = flags.contains(TimerFlags::FROM_LAST);
        tm.callback = callback;
        tm.arg = arg;
        tm.active = true;
        self.timer_list.insert(expiry, t.0);
        self.timer_rearm(now);
        trace!("timer {} armed for {}", t.0.index(), expiry);
        Ok(())
    }

    /// Disarm the timer; no-op if it is not armed. Threads blocked in
    /// `timer_wait` (or sleeping on the slot) wake with
    /// `TimerCancelled`.
    pub fn timer_stop(&mut self, t: TimerId) -> Result<()> {
        let port = self.port();
        let _cs = CriticalGuard::enter(port);
        let now = self.clock.now(port);
        let mut waiters = [0 as ThreadId; MAX_THREADS];
        let mut n = 0;
        {
            let tm = self.timers.get_mut(t.0)?;
            if !tm.active {
                return Ok(());
            }
            tm.active = false;
            if let Some(s) = tm.sleeper.take() {
                waiters[n] = s;
                n += 1;
            }
            #[cfg(feature = "timer-wait")]
            while let Some(w) = tm.waitq.pop_front() {
                waiters[n] = w;
                n += 1;
            }
        }
        self.timer_list.remove(t.0);
        for &w in &waiters[..n] {
            self.wake_thread(w, WakeStatus::Cancelled);
        }
        self.timer_rearm(now);
        trace!("timer {} stopped", t.0.index());
        Ok(())
    }

    /// Restart the timer to expire `when` cycles from now, arming it
    /// if it was idle. A recurring timer's period becomes `when`.
    /// Waiters stay queued for the new expiry.
    pub fn timer_reset(&mut self, t: TimerId, when: u64) -> Result<()> {
        self.require_system_timer()?;
        let port = self.port();
        let _cs = CriticalGuard::enter(port);
        let now = self.clock.now(port);
        let tm = self.timers.get_mut(t.0)?;
        if tm.active {
            self.timer_list.remove(t.0);
        }
        if tm.period != 0 {
            tm.period = when;
        }
        tm.expiry = now.wrapping_add(when);
        tm.active = true;
        self.timer_list.insert(tm.expiry, t.0);
        self.timer_rearm(now);
        Ok(())
    }

    /// Change the re-trigger period. Takes effect from the next
    /// expiry; the currently pending one is untouched. Zero demotes a
    /// recurring timer to one-shot, nonzero promotes a one-shot.
    pub fn timer_set_period(&mut self, t: TimerId, period: u64) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        self.timers.get_mut(t.0)?.period = period;
        Ok(())
    }

    /// Whether the timer is armed.
    pub fn timer_is_active(&self, t: TimerId) -> Result<bool> {
        let _cs = CriticalGuard::enter(self.port());
        Ok(self.timers.get(t.0)?.active)
    }

    /// The re-trigger period; 0 for one-shot timers.
    pub fn timer_get_period(&self, t: TimerId) -> Result<u64> {
        let _cs = CriticalGuard::enter(self.port());
        Ok(self.timers.get(t.0)?.period)
    }

    /// Block until the timer's next expiry or its `timer_stop`. The
    /// timer must be armed.
    #[cfg(feature = "timer-wait")]
    pub fn timer_wait(&mut self, t: TimerId) -> Result<()> {
        let tid = self.current_thread()?;
        self.timer_wait_begin(t, tid)?;
        self.sched().switch_out(tid);
        match self.wait_finish(tid) {
            WakeStatus::TimerExpired => Ok(()),
            WakeStatus::Cancelled => Err(Error::TimerCancelled),
            _ => self.fatal_error(fatal::code::WAKE_PROTOCOL, "timer wake lost"),
        }
    }

    // ── Sleep ───────────────────────────────────────────────────

    /// Park the calling thread for at least `cycles`. Granularity is
    /// the tick: the actual sleep may run to the next tick boundary.
    pub fn thread_sleep(&mut self, cycles: u64) -> Result<()> {
        self.require_system_timer()?;
        let tid = self.current_thread()?;
        if cycles == 0 {
            return Ok(());
        }
        let h = self.sleep_begin(tid, cycles)?;
        self.sched().switch_out(tid);
        let status = self.wait_finish(tid);
        {
            let _cs = CriticalGuard::enter(self.port());
            let _ = self.timers.remove(h);
        }
        match status {
            WakeStatus::TimerExpired => Ok(()),
            WakeStatus::Cancelled => Err(Error::TimerCancelled),
            _ => self.fatal_error(fatal::code::WAKE_PROTOCOL, "sleep wake lost"),
        }
    }

    /// [`Kernel::thread_sleep`] in milliseconds.
    pub fn thread_sleep_msecs(&mut self, msecs: u64) -> Result<()> {
        let cycles = self.msecs_to_cycles(msecs);
        self.thread_sleep(cycles)
    }

    /// [`Kernel::thread_sleep`] in microseconds.
    pub fn thread_sleep_usecs(&mut self, usecs: u64) -> Result<()> {
        let cycles = self.usecs_to_cycles(usecs);
        self.thread_sleep(cycles)
    }

    // ── Interrupt side ──────────────────────────────────────────

    /// Tick entry, called from the timer interrupt handler (hardware
    /// tick or compare match). Processes every due timer and re-arms
    /// the compare register.
    pub fn timer_tick(&mut self) {
        let port = self.port();
        let _cs = CriticalGuard::enter(port);
        let now = self.clock.now(port);
        loop {
            let Some((expiry, h)) = self.timer_list.front() else {
                break;
            };
            if expiry > now {
                break;
            }
            self.timer_list.pop_front();
            let mut waiters = [0 as ThreadId; MAX_THREADS];
            let mut n = 0;
            let fire = {
                let Ok(tm) = self.timers.get_mut(h) else {
                    continue;
                };
                if tm.period > 0 {
                    // Re-arm before waking: a waiter that re-waits
                    // sees the timer still active.
                    tm.expiry = if tm.from_last {
                        expiry.wrapping_add(tm.period)
                    } else {
                        now.wrapping_add(tm.period)
                    };
                    let next = tm.expiry;
                    self.timer_list.insert(next, h);
                } else {
                    tm.active = false;
                }
                if let Some(s) = tm.sleeper.take() {
                    waiters[n] = s;
                    n += 1;
                }
                #[cfg(feature = "timer-wait")]
                while let Some(w) = tm.waitq.pop_front() {
                    waiters[n] = w;
                    n += 1;
                }
                tm.callback.map(|f| (f, tm.arg))
            };
            for &w in &waiters[..n] {
                self.wake_thread(w, WakeStatus::TimerExpired);
            }
            if let Some((f, arg)) = fire {
                f(arg);
            }
        }
        match self.tick_mode {
            TickMode::Periodic(p) => {
                let compare = port.compare();
                port.set_compare(compare.wrapping_add(p));
            }
            TickMode::Dynamic => self.timer_rearm(now),
            TickMode::Off => {}
        }
    }

    // ── Internals ───────────────────────────────────────────────

    fn require_system_timer(&self) -> Result<()> {
        if self.tick_mode == TickMode::Off {
            return Err(Error::NoSystemTimer);
        }
        Ok(())
    }

    /// In dynamic mode, point the compare register at the earliest
    /// pending expiry, clamped to `MAX_TICK_DELTA`. Periodic mode
    /// keeps its fixed cadence and ignores list changes.
    fn timer_rearm(&self, now: u64) {
        if self.tick_mode != TickMode::Dynamic {
            return;
        }
        let delta = match self.timer_list.earliest() {
            Some(e) if e > now => (e - now).min(MAX_TICK_DELTA as u64) as u32,
            // Overdue work pending: fire as soon as possible.
            Some(_) => 1,
            None => MAX_TICK_DELTA,
        };
        self.port().set_compare((now as u32).wrapping_add(delta));
    }

    #[cfg(feature = "timer-wait")]
    pub(crate) fn timer_wait_begin(&mut self, t: TimerId, tid: ThreadId) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        let sched = self.sched();
        let tm = self.timers.get_mut(t.0)?;
        if !tm.active {
            return Err(Error::TimerInactive);
        }
        tm.waitq.insert(tid, sched);
        self.threads[tid as usize].wake = WakeStatus::Pending;
        sched.block(tid);
        Ok(())
    }

    /// Allocate and arm the one-shot slot backing a sleep, and block
    /// the sleeper on it.
    pub(crate) fn sleep_begin(&mut self, tid: ThreadId, cycles: u64) -> Result<RawHandle> {
        let port = self.port();
        let _cs = CriticalGuard::enter(port);
        let now = self.clock.now(port);
        let mut tm = TimerState::new();
        tm.expiry = now.wrapping_add(cycles);
        tm.active = true;
        tm.sleeper = Some(tid);
        let expiry = tm.expiry;
        let h = self.timers.insert(tm)?;
        self.timer_list.insert(expiry, h);
        self.threads[tid as usize].wake = WakeStatus::Pending;
        self.sched().block(tid);
        self.timer_rearm(now);
        Ok(h)
    }
}
