//! Mutexes — exclusive-ownership locks with optional priority
//! protocols.
//!
//! A mutex pairs an owner slot with a wait queue. Contended lockers
//! queue per the creation-time policy (priority order by default,
//! strict FIFO on request) and `unlock` transfers ownership directly
//! to the dequeued head, so the lock never bounces through an unowned
//! state while waiters exist.
//!
//! Two mutually exclusive protocols bound priority inversion:
//!
//! - **Ceiling** (`PRIORITY_CEILING`): while owned, the owner's
//!   effective priority never drops below the configured ceiling.
//! - **Inheritance** (`PRIORITY_INHERIT`): the owner's effective
//!   priority tracks its highest-priority waiter, propagated
//!   transitively when the owner is itself blocked on another boosted
//!   mutex. The walk follows `blocked_on` edges and is bounded by the
//!   mutex table size; ownership cannot cycle, because a thread
//!   blocked on a mutex holds no path back to itself.
//!
//! A thread's effective priority returns to its base exactly when it
//! releases its last boosting mutex.

use bitflags::bitflags;
use log::{debug, trace};

use crate::config::{DEFAULT_MUTEX_ORDER, MAX_MUTEXES, NUM_PRIORITIES};
use crate::error::{Error, Result};
use crate::fatal;
use crate::kernel::Kernel;
use crate::sync::critical::CriticalGuard;
use crate::sync::waitq::{QueueOrder, WaitQueue};
use crate::table::RawHandle;
use crate::thread::{Priority, ThreadId, WakeStatus};

bitflags! {
    /// Mutex creation options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MutexFlags: u32 {
        /// Wake waiters in priority order, FIFO among equals.
        const WAIT_PRIORITY = 1 << 0;
        /// Wake waiters in strict arrival order.
        const WAIT_FIFO = 1 << 1;
        /// Priority-ceiling protocol; the ceiling comes from the
        /// `ceiling` argument of `mutex_create`.
        const PRIORITY_CEILING = 1 << 2;
        /// Priority-inheritance protocol.
        const PRIORITY_INHERIT = 1 << 3;
    }
}

/// Handle to a created mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexId(pub(crate) RawHandle);

pub(crate) struct MutexState {
    pub owner: Option<ThreadId>,
    pub waitq: WaitQueue,
    pub flags: MutexFlags,
    pub ceiling: Priority,
}

impl MutexState {
    /// Whether ownership affects the owner's effective priority.
    #[inline]
    fn boosting(&self) -> bool {
        self.flags
            .intersects(MutexFlags::PRIORITY_CEILING | MutexFlags::PRIORITY_INHERIT)
    }
}

/// Outcome of the state-machine half of `lock`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LockAttempt {
    Acquired,
    Blocked,
}

impl Kernel<'_> {
    /// Create a mutex. `ceiling` is only meaningful with
    /// `PRIORITY_CEILING`; the two protocol flags and the two wait
    /// order flags are each mutually exclusive.
    pub fn mutex_create(&mut self, flags: MutexFlags, ceiling: Priority) -> Result<MutexId> {
        if flags.contains(MutexFlags::PRIORITY_CEILING | MutexFlags::PRIORITY_INHERIT)
            || flags.contains(MutexFlags::WAIT_PRIORITY | MutexFlags::WAIT_FIFO)
        {
            return Err(Error::InvalidArg);
        }
        if flags.contains(MutexFlags::PRIORITY_CEILING) && ceiling as usize >= NUM_PRIORITIES {
            return Err(Error::InvalidArg);
        }
        let order = if flags.contains(MutexFlags::WAIT_FIFO) {
            QueueOrder::Fifo
        } else if flags.contains(MutexFlags::WAIT_PRIORITY) {
            QueueOrder::Priority
        } else {
            DEFAULT_MUTEX_ORDER
        };
        let _cs = CriticalGuard::enter(self.port());
        let h = self.mutexes.insert(MutexState {
            owner: None,
            waitq: WaitQueue::new(order),
            flags,
            ceiling,
        })?;
        debug!("mutex {}/{} created, flags {:?}", h.index(), h.generation(), flags);
        Ok(MutexId(h))
    }

    /// Delete a mutex. Fails with `MutexDelete` while waiters are
    /// queued, and with `MutexNotOwned` if another thread holds it.
    pub fn mutex_delete(&mut self, m: MutexId) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        let mx = self.mutexes.get(m.0)?;
        if !mx.waitq.is_empty() {
            return Err(Error::MutexDelete);
        }
        let owner = mx.owner;
        if let Some(owner) = owner {
            if self.current_thread().ok() != Some(owner) {
                return Err(Error::MutexNotOwned);
            }
        }
        let st = self.mutexes.remove(m.0)?;
        if let Some(owner) = owner {
            if st.boosting() {
                self.threads[owner as usize].release(m.0);
                self.recompute_priority(owner);
            }
        }
        debug!("mutex {}/{} deleted", m.0.index(), m.0.generation());
        Ok(())
    }

    /// Acquire the mutex, blocking while another thread owns it.
    pub fn mutex_lock(&mut self, m: MutexId) -> Result<()> {
        let tid = self.current_thread()?;
        match self.mutex_lock_begin(m, tid)? {
            LockAttempt::Acquired => Ok(()),
            LockAttempt::Blocked => {
                self.sched().switch_out(tid);
                match self.wait_finish(tid) {
                    WakeStatus::MutexAcquired => Ok(()),
                    WakeStatus::Cancelled => Err(Error::MutexDelete),
                    _ => self.fatal_error(fatal::code::WAKE_PROTOCOL, "mutex wake lost"),
                }
            }
        }
    }

    /// Acquire the mutex or fail immediately with `MutexLocked`.
    pub fn mutex_trylock(&mut self, m: MutexId) -> Result<()> {
        let tid = self.current_thread()?;
        let _cs = CriticalGuard::enter(self.port());
        let mx = self.mutexes.get_mut(m.0)?;
        if mx.owner.is_some() {
            return Err(Error::MutexLocked);
        }
        mx.owner = Some(tid);
        if mx.boosting() {
            self.threads[tid as usize].hold(m.0);
            self.recompute_priority(tid);
        }
        Ok(())
    }

    /// Release the mutex, handing it to the head waiter if any.
    pub fn mutex_unlock(&mut self, m: MutexId) -> Result<()> {
        let tid = self.current_thread()?;
        let _cs = CriticalGuard::enter(self.port());
        let mx = self.mutexes.get_mut(m.0)?;
        if mx.owner != Some(tid) {
            return Err(Error::MutexNotOwned);
        }
        let next = mx.waitq.pop_front();
        mx.owner = next;
        let boosting = mx.boosting();
        if boosting {
            self.threads[tid as usize].release(m.0);
            self.recompute_priority(tid);
        }
        if let Some(w) = next {
            trace!("mutex {} handed off to thread {}", m.0.index(), w);
            self.threads[w as usize].blocked_on = None;
            if boosting {
                self.threads[w as usize].hold(m.0);
                // Ceiling boost for the new owner, or inheritance from
                // the waiters still queued behind it.
                self.recompute_priority(w);
            }
            self.wake_thread(w, WakeStatus::MutexAcquired);
        }
        Ok(())
    }

    /// Non-blocking snapshot: is the mutex currently locked?
    /// Independent of who owns it.
    pub fn mutex_test(&self, m: MutexId) -> Result<bool> {
        let _cs = CriticalGuard::enter(self.port());
        Ok(self.mutexes.get(m.0)?.owner.is_some())
    }

    // ── Internals ───────────────────────────────────────────────

    /// Everything `lock` does up to (and including) blocking, without
    /// the context switch.
    pub(crate) fn mutex_lock_begin(&mut self, m: MutexId, tid: ThreadId) -> Result<LockAttempt> {
        let _cs = CriticalGuard::enter(self.port());
        let sched = self.sched();
        let mx = self.mutexes.get_mut(m.0)?;
        match mx.owner {
            None => {
                mx.owner = Some(tid);
                if mx.boosting() {
                    self.threads[tid as usize].hold(m.0);
                    self.recompute_priority(tid);
                }
                Ok(LockAttempt::Acquired)
            }
            Some(owner) if owner == tid => Err(Error::MutexAlreadyOwned),
            Some(owner) => {
                mx.waitq.insert(tid, sched);
                let boosting = mx.boosting();
                let rec = &mut self.threads[tid as usize];
                rec.blocked_on = Some(m.0);
                rec.wake = WakeStatus::Pending;
                if boosting {
                    self.boost_chain(owner);
                }
                sched.block(tid);
                Ok(LockAttempt::Blocked)
            }
        }
    }

    /// Recompute `t`'s effective priority from its base plus every
    /// boosting mutex it holds. A ceiling mutex contributes its
    /// ceiling; either protocol contributes the highest effective
    /// priority among its current waiters, keeping the owner at or
    /// above everyone it is blocking even when a ceiling was
    /// configured too low.
    pub(crate) fn recompute_priority(&self, t: ThreadId) {
        let sched = self.sched();
        let mut p = sched.base_priority(t);
        for h in self.threads[t as usize].held.iter().flatten() {
            if let Ok(mx) = self.mutexes.get(*h) {
                if mx.flags.contains(MutexFlags::PRIORITY_CEILING) {
                    p = p.max(mx.ceiling);
                }
                if let Some(top) = mx.waitq.max_waiter_priority(sched) {
                    p = p.max(top);
                }
            }
        }
        if sched.effective_priority(t) != p {
            trace!("thread {} effective priority -> {}", t, p);
            sched.set_effective_priority(t, p);
        }
    }

    /// Transitive inheritance: re-boost `t`, then follow its
    /// `blocked_on` edge to the next owner, at most once per mutex in
    /// the system. Explicit iteration, not recursion — worst-case
    /// cost and stack use stay fixed.
    fn boost_chain(&self, mut t: ThreadId) {
        for _ in 0..MAX_MUTEXES {
            self.recompute_priority(t);
            let Some(h) = self.threads[t as usize].blocked_on else {
                return;
            };
            let Some(owner) = self.mutexes.get(h).ok().and_then(|mx| mx.owner) else {
                return;
            };
            t = owner;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fixture;

    const A: ThreadId = 1;
    const B: ThreadId = 2;
    const C: ThreadId = 3;

    #[test]
    fn contradictory_flags_rejected() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        assert_eq!(
            k.mutex_create(
                MutexFlags::PRIORITY_CEILING | MutexFlags::PRIORITY_INHERIT,
                5
            ),
            Err(Error::InvalidArg)
        );
        assert_eq!(
            k.mutex_create(MutexFlags::WAIT_PRIORITY | MutexFlags::WAIT_FIFO, 0),
            Err(Error::InvalidArg)
        );
        assert_eq!(
            k.mutex_create(MutexFlags::PRIORITY_CEILING, NUM_PRIORITIES as Priority),
            Err(Error::InvalidArg)
        );
    }

    #[test]
    fn lock_unlock_uncontended() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::empty(), 0).unwrap();
        assert_eq!(k.mutex_test(m), Ok(false));
        k.mutex_lock(m).unwrap();
        assert_eq!(k.mutex_test(m), Ok(true));
        k.mutex_unlock(m).unwrap();
        assert_eq!(k.mutex_test(m), Ok(false));
        // The uncontended path never reaches the context switch.
        assert_eq!(sched.switch_count(), 0);
    }

    #[test]
    fn relock_and_foreign_unlock_rejected() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::empty(), 0).unwrap();
        k.mutex_lock(m).unwrap();
        assert_eq!(k.mutex_lock(m), Err(Error::MutexAlreadyOwned));
        sched.run_thread(B, 5);
        assert_eq!(k.mutex_unlock(m), Err(Error::MutexNotOwned));
    }

    #[test]
    fn trylock_does_not_block() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::empty(), 0).unwrap();
        k.mutex_trylock(m).unwrap();
        assert_eq!(k.mutex_trylock(m), Err(Error::MutexLocked));
        sched.run_thread(B, 5);
        assert_eq!(k.mutex_trylock(m), Err(Error::MutexLocked));
        assert!(!sched.is_blocked(B));
    }

    #[test]
    fn lock_from_interrupt_context_fails() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::empty(), 0).unwrap();
        sched.enter_interrupt();
        assert_eq!(k.mutex_lock(m), Err(Error::InterruptContext));
        assert_eq!(k.mutex_trylock(m), Err(Error::InterruptContext));
        sched.leave_interrupt();
    }

    #[test]
    fn unlock_hands_off_to_highest_priority_waiter() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::WAIT_PRIORITY, 0).unwrap();
        k.mutex_lock(m).unwrap();

        sched.set_base_priority(B, 10);
        sched.set_base_priority(C, 20);
        assert_eq!(k.mutex_lock_begin(m, B), Ok(LockAttempt::Blocked));
        assert_eq!(k.mutex_lock_begin(m, C), Ok(LockAttempt::Blocked));
        assert!(sched.is_blocked(B) && sched.is_blocked(C));

        k.mutex_unlock(m).unwrap();
        // C outranks B despite arriving later.
        assert_eq!(k.mutexes.get(m.0).unwrap().owner, Some(C));
        assert!(!sched.is_blocked(C));
        assert_eq!(k.wait_finish(C), WakeStatus::MutexAcquired);
        assert!(sched.is_blocked(B));

        sched.run_thread(C, 20);
        k.mutex_unlock(m).unwrap();
        assert_eq!(k.mutexes.get(m.0).unwrap().owner, Some(B));
        assert_eq!(k.wait_finish(B), WakeStatus::MutexAcquired);
    }

    #[test]
    fn fifo_policy_ignores_priority() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::WAIT_FIFO, 0).unwrap();
        k.mutex_lock(m).unwrap();
        sched.set_base_priority(B, 10);
        sched.set_base_priority(C, 20);
        k.mutex_lock_begin(m, B).unwrap();
        k.mutex_lock_begin(m, C).unwrap();
        k.mutex_unlock(m).unwrap();
        // Arrival order wins under FIFO.
        assert_eq!(k.mutexes.get(m.0).unwrap().owner, Some(B));
    }

    #[test]
    fn inheritance_boosts_and_restores() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        // A at priority 5 owns M with inheritance; B at 10 blocks on M
        // and lends A its priority until the unlock.
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::PRIORITY_INHERIT, 0).unwrap();
        k.mutex_lock(m).unwrap();
        assert_eq!(sched.effective_priority(A), 5);

        sched.set_base_priority(B, 10);
        k.mutex_lock_begin(m, B).unwrap();
        assert_eq!(sched.effective_priority(A), 10);

        k.mutex_unlock(m).unwrap();
        assert_eq!(sched.effective_priority(A), 5);
        assert_eq!(k.mutexes.get(m.0).unwrap().owner, Some(B));
        assert_eq!(k.wait_finish(B), WakeStatus::MutexAcquired);
    }

    #[test]
    fn inheritance_propagates_transitively() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        let m1 = k.mutex_create(MutexFlags::PRIORITY_INHERIT, 0).unwrap();
        let m2 = k.mutex_create(MutexFlags::PRIORITY_INHERIT, 0).unwrap();

        // A(5) owns m1. B(10) owns m2 and blocks on m1.
        sched.run_thread(A, 5);
        k.mutex_lock(m1).unwrap();
        sched.run_thread(B, 10);
        k.mutex_lock(m2).unwrap();
        k.mutex_lock_begin(m1, B).unwrap();
        assert_eq!(sched.effective_priority(A), 10);

        // C(20) blocks on m2: the boost must reach A through B.
        sched.set_base_priority(C, 20);
        k.mutex_lock_begin(m2, C).unwrap();
        assert_eq!(sched.effective_priority(B), 20);
        assert_eq!(sched.effective_priority(A), 20);

        // A releases m1 -> B owns it; A returns to base, B keeps C's
        // boost through m2.
        sched.run_thread(A, 5);
        k.mutex_unlock(m1).unwrap();
        assert_eq!(sched.effective_priority(A), 5);
        assert_eq!(sched.effective_priority(B), 20);
    }

    #[test]
    fn ceiling_floor_held_while_owned() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::PRIORITY_CEILING, 15).unwrap();
        k.mutex_lock(m).unwrap();
        assert_eq!(sched.effective_priority(A), 15);
        k.mutex_unlock(m).unwrap();
        assert_eq!(sched.effective_priority(A), 5);
    }

    #[test]
    fn ceiling_owner_tracks_waiter_above_ceiling() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::PRIORITY_CEILING, 15).unwrap();
        k.mutex_lock(m).unwrap();
        assert_eq!(sched.effective_priority(A), 15);
        // A waiter above the configured ceiling still lifts the owner:
        // the owner never runs below anyone it is blocking.
        sched.set_base_priority(B, 20);
        k.mutex_lock_begin(m, B).unwrap();
        assert_eq!(sched.effective_priority(A), 20);
        k.mutex_unlock(m).unwrap();
        assert_eq!(sched.effective_priority(A), 5);
    }

    #[test]
    fn ceiling_does_not_lower_a_higher_thread() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 20);
        let m = k.mutex_create(MutexFlags::PRIORITY_CEILING, 15).unwrap();
        k.mutex_lock(m).unwrap();
        assert_eq!(sched.effective_priority(A), 20);
        k.mutex_unlock(m).unwrap();
        assert_eq!(sched.effective_priority(A), 20);
    }

    #[test]
    fn boost_restored_only_after_last_boosting_mutex() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let hi = k.mutex_create(MutexFlags::PRIORITY_CEILING, 20).unwrap();
        let lo = k.mutex_create(MutexFlags::PRIORITY_CEILING, 10).unwrap();
        k.mutex_lock(hi).unwrap();
        k.mutex_lock(lo).unwrap();
        assert_eq!(sched.effective_priority(A), 20);
        k.mutex_unlock(hi).unwrap();
        // Still holding the ceiling-10 mutex.
        assert_eq!(sched.effective_priority(A), 10);
        k.mutex_unlock(lo).unwrap();
        assert_eq!(sched.effective_priority(A), 5);
    }

    #[test]
    fn delete_busy_and_stale_handles() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        sched.run_thread(A, 5);
        let m = k.mutex_create(MutexFlags::empty(), 0).unwrap();
        k.mutex_lock(m).unwrap();
        k.mutex_lock_begin(m, B).unwrap();
        assert_eq!(k.mutex_delete(m), Err(Error::MutexDelete));

        // Locked by A, delete attempted by B.
        k.mutex_unlock(m).unwrap();
        // B now owns it via hand-off; A may not delete.
        assert_eq!(k.mutex_delete(m), Err(Error::MutexNotOwned));
        sched.run_thread(B, 5);
        let _ = k.wait_finish(B);
        k.mutex_delete(m).unwrap();
        assert_eq!(k.mutex_lock(m), Err(Error::InvalidHandle));
        assert_eq!(k.mutex_test(m), Err(Error::InvalidHandle));
    }

    #[test]
    fn mutual_exclusion_over_lock_sequences() {
        let (port, sched) = fixture();
        let mut k = Kernel::new(&port, &sched);
        let m = k.mutex_create(MutexFlags::empty(), 0).unwrap();
        // Three threads take turns; at every step at most one owner.
        for _ in 0..3 {
            for &t in &[A, B, C] {
                sched.run_thread(t, 5);
                k.mutex_lock(m).unwrap();
                assert_eq!(k.mutexes.get(m.0).unwrap().owner, Some(t));
                // Everyone else fails to take it.
                for &other in &[A, B, C] {
                    if other != t {
                        sched.run_thread(other, 5);
                        assert_eq!(k.mutex_trylock(m), Err(Error::MutexLocked));
                    }
                }
                sched.run_thread(t, 5);
                k.mutex_unlock(m).unwrap();
            }
        }
    }
}
