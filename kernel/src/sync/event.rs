//! Event groups — masked 32-bit bit vectors with blocking tests.
//!
//! An event group owns a bit vector of which only the creation-time
//! `mask` bits are meaningful; set/clear operations silently drop bits
//! outside it, so bits beyond the mask are zero forever. Waiters
//! record a test mask and a mode — ALL (every requested bit set) or
//! ANY (at least one) — and every update runs a single wake scan over
//! the queue. Compound updates (`clear_and_set`, `set_and_wait`) apply
//! their whole change before that one scan, so no waiter can observe a
//! transient intermediate state.

use log::debug;

use crate::config::MAX_THREADS;
use crate::error::{Error, Result};
use crate::fatal;
use crate::kernel::Kernel;
use crate::sync::critical::CriticalGuard;
use crate::sync::waitq::{QueueOrder, WaitQueue};
use crate::table::RawHandle;
use crate::thread::{ThreadId, WaitData, WakeStatus};

/// How a waiter's test mask is evaluated against the group's bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitMode {
    /// Satisfied when every bit in the test mask is set.
    All,
    /// Satisfied when any bit in the test mask is set.
    Any,
}

/// Handle to a created event group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId(pub(crate) RawHandle);

pub(crate) struct EventState {
    pub bits: u32,
    pub mask: u32,
    pub waitq: WaitQueue,
}

#[inline]
fn test(bits: u32, mask: u32, mode: WaitMode) -> bool {
    match mode {
        WaitMode::All => bits & mask == mask,
        WaitMode::Any => bits & mask != 0,
    }
}

impl Kernel<'_> {
    /// Create an event group over the given bit mask, all bits clear.
    /// `flags` is reserved and must be zero.
    pub fn event_create(&mut self, mask: u32, flags: u32) -> Result<EventId> {
        if mask == 0 || flags != 0 {
            return Err(Error::InvalidArg);
        }
        let _cs = CriticalGuard::enter(self.port());
        let h = self.events.insert(EventState {
            bits: 0,
            mask,
            waitq: WaitQueue::new(QueueOrder::Priority),
        })?;
        debug!("event {}/{} created, mask {:#010x}", h.index(), h.generation(), mask);
        Ok(EventId(h))
    }

    /// Delete an event group; fails with `EventDelete` while threads
    /// are waiting on it.
    pub fn event_delete(&mut self, e: EventId) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        if !self.events.get(e.0)?.waitq.is_empty() {
            return Err(Error::EventDelete);
        }
        self.events.remove(e.0)?;
        Ok(())
    }

    /// Snapshot of the current bits. Never blocks.
    pub fn event_get(&self, e: EventId) -> Result<u32> {
        let _cs = CriticalGuard::enter(self.port());
        Ok(self.events.get(e.0)?.bits)
    }

    /// OR the masked subset of `bits` into the group and wake every
    /// waiter whose test now passes.
    pub fn event_set(&mut self, e: EventId, bits: u32) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        self.event_update(e.0, |b, m| b | (bits & m))?;
        Ok(())
    }

    /// Clear the masked subset of `bits`, then rescan waiters: a
    /// clear can newly satisfy nobody, but the scan keeps update
    /// handling uniform.
    pub fn event_clear(&mut self, e: EventId, bits: u32) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        self.event_update(e.0, |b, m| b & !(bits & m))?;
        Ok(())
    }

    /// Apply clear then set as one update with a single wake scan, so
    /// the post-clear pre-set state is never visible to a waiter.
    pub fn event_clear_and_set(&mut self, e: EventId, clr: u32, set: u32) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        self.event_update(e.0, |b, m| (b & !(clr & m)) | (set & m))?;
        Ok(())
    }

    /// Block until every bit in `bits` is set. Returns immediately if
    /// they already are.
    pub fn event_wait_all(&mut self, e: EventId, bits: u32) -> Result<()> {
        self.event_wait(e, bits, WaitMode::All)
    }

    /// Block until at least one bit in `bits` is set.
    pub fn event_wait_any(&mut self, e: EventId, bits: u32) -> Result<()> {
        self.event_wait(e, bits, WaitMode::Any)
    }

    /// Atomically set `set_bits`, then wait for all of `wait_bits`.
    /// The same update may satisfy the wait — including by this
    /// thread's own set — in which case no block happens.
    pub fn event_set_and_wait(&mut self, e: EventId, set_bits: u32, wait_bits: u32) -> Result<()> {
        let tid = self.current_thread()?;
        self.check_wait_bits(e, wait_bits)?;
        let blocked = {
            let _cs = CriticalGuard::enter(self.port());
            let after = self.event_update(e.0, |b, m| b | (set_bits & m))?;
            if test(after, wait_bits, WaitMode::All) {
                false
            } else {
                self.event_enqueue(e.0, tid, wait_bits, WaitMode::All)?;
                true
            }
        };
        if blocked {
            self.event_wait_tail(tid)
        } else {
            Ok(())
        }
    }

    // ── Internals ───────────────────────────────────────────────

    /// Waiting on bits outside the mask can never be satisfied; reject
    /// it up front instead of blocking forever.
    fn check_wait_bits(&self, e: EventId, bits: u32) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        let ev = self.events.get(e.0)?;
        if bits == 0 || bits & !ev.mask != 0 {
            return Err(Error::InvalidArg);
        }
        Ok(())
    }

    fn event_wait(&mut self, e: EventId, bits: u32, mode: WaitMode) -> Result<()> {
        let tid = self.current_thread()?;
        self.check_wait_bits(e, bits)?;
        let blocked = {
            let _cs = CriticalGuard::enter(self.port());
            let ev = self.events.get(e.0)?;
            if test(ev.bits, bits, mode) {
                false
            } else {
                self.event_enqueue(e.0, tid, bits, mode)?;
                true
            }
        };
        if blocked {
            self.event_wait_tail(tid)
        } else {
            Ok(())
        }
    }

    /// State-machine half of a blocking event wait: record the test,
    /// queue the thread, block it. Caller holds a critical section.
    pub(crate) fn event_enqueue(
        &mut self,
        e: RawHandle,
        tid: ThreadId,
        bits: u32,
        mode: WaitMode,
    ) -> Result<()> {
        let sched = self.sched();
        let ev = self.events.get_mut(e)?;
        ev.waitq.insert(tid, sched);
        let rec = &mut self.threads[tid as usize];
        rec.wait = WaitData::Event { mask: bits, mode };
        rec.wake = WakeStatus::Pending;
        sched.block(tid);
        Ok(())
    }

    fn event_wait_tail(&mut self, tid: ThreadId) -> Result<()> {
        self.sched().switch_out(tid);
        match self.wait_finish(tid) {
            WakeStatus::EventSatisfied => Ok(()),
            WakeStatus::Cancelled => Err(Error::EventDelete),
            _ => self.fatal_error(fatal::code::WAKE_PROTOCOL, "event wake lost"),
        }
    }

    /// Apply `f(bits, mask)` as the group's new bit vector and run the
    /// single wake scan. Returns the updated bits. Caller holds a
    /// critical section.
    fn event_update(&mut self, e: RawHandle, f: impl FnOnce(u32, u32) -> u32) -> Result<u32> {
        let mut pass = [0 as ThreadId; MAX_THREADS];
        let mut n = 0;
        let after = {
            let ev = self.events.get_mut(e)?;
            ev.bits = f(ev.bits, ev.mask) & ev.mask;
            let after = ev.bits;
            for t in ev.waitq.iter() {
                if let WaitData::Event { mask, mode } = self.threads[t as usize].wait {
                    if test(after, mask, mode) {
                        pass[n] = t;
                        n += 1;
                    }
                }
            }
            after
        };
        for &t in &pass[..n] {
            self.events.get_mut(e)?.waitq.remove(t);
            self.wake_thread(t, WakeStatus::EventSatisfied);
        }
        Ok(after)
    }
}
