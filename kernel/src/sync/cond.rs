//! Condition variables.
//!
//! A condvar is nothing but a wait queue: no stored signal state, no
//! persisted predicate. Each waiter brings its own `(predicate, arg)`
//! for the duration of the wait; `cond_signal` walks the current
//! waiters and releases those whose predicate accepts the signal value
//! (waiters without a predicate accept any signal). A signal with no
//! waiters — or none satisfied — is forgotten, not remembered for
//! future waits.

use log::debug;

use crate::config::MAX_THREADS;
use crate::error::{Error, Result};
use crate::fatal;
use crate::kernel::Kernel;
use crate::sync::critical::CriticalGuard;
use crate::sync::waitq::{QueueOrder, WaitQueue};
use crate::table::RawHandle;
use crate::thread::{ThreadId, WaitData, WakeStatus};

/// Wait predicate: `(arg, sig_value) -> satisfied`. Runs in the
/// signaling context, inside the kernel critical section — keep it
/// short and non-blocking.
pub type CondPredicate = fn(arg: usize, sig_value: i32) -> bool;

/// Handle to a created condition variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondId(pub(crate) RawHandle);

pub(crate) struct CondState {
    pub waitq: WaitQueue,
}

impl Kernel<'_> {
    /// Create a condition variable. Waiters wake in priority order,
    /// FIFO among equals.
    pub fn cond_create(&mut self) -> Result<CondId> {
        let _cs = CriticalGuard::enter(self.port());
        let h = self.conds.insert(CondState {
            waitq: WaitQueue::new(QueueOrder::Priority),
        })?;
        debug!("cond {}/{} created", h.index(), h.generation());
        Ok(CondId(h))
    }

    /// Delete a condition variable; fails with `CondDelete` while
    /// threads are waiting on it.
    pub fn cond_delete(&mut self, c: CondId) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        if !self.conds.get(c.0)?.waitq.is_empty() {
            return Err(Error::CondDelete);
        }
        self.conds.remove(c.0)?;
        Ok(())
    }

    /// Block until a signal satisfies `pred` (or until any signal, if
    /// `pred` is `None`). Returns the `sig_value` of the releasing
    /// signal.
    pub fn cond_wait(
        &mut self,
        c: CondId,
        pred: Option<CondPredicate>,
        arg: usize,
    ) -> Result<i32> {
        let tid = self.current_thread()?;
        self.cond_wait_begin(c, tid, pred, arg)?;
        self.sched().switch_out(tid);
        match self.wait_finish(tid) {
            WakeStatus::CondSignaled(sig) => Ok(sig),
            WakeStatus::Cancelled => Err(Error::CondDelete),
            _ => self.fatal_error(fatal::code::WAKE_PROTOCOL, "cond wake lost"),
        }
    }

    /// Release every waiter whose predicate accepts `sig_value`;
    /// returns the number released.
    pub fn cond_signal(&mut self, c: CondId, sig_value: i32) -> Result<u32> {
        self.cond_signal_inner(c, sig_value, usize::MAX)
    }

    /// Release at most the first satisfying waiter (0 or 1 woken).
    pub fn cond_signal_one(&mut self, c: CondId, sig_value: i32) -> Result<u32> {
        self.cond_signal_inner(c, sig_value, 1)
    }

    // ── Internals ───────────────────────────────────────────────

    pub(crate) fn cond_wait_begin(
        &mut self,
        c: CondId,
        tid: ThreadId,
        pred: Option<CondPredicate>,
        arg: usize,
    ) -> Result<()> {
        let _cs = CriticalGuard::enter(self.port());
        let sched = self.sched();
        let cv = self.conds.get_mut(c.0)?;
        cv.waitq.insert(tid, sched);
        let rec = &mut self.threads[tid as usize];
        rec.wait = WaitData::Cond { pred, arg };
        rec.wake = WakeStatus::Pending;
        sched.block(tid);
        Ok(())
    }

    fn cond_signal_inner(&mut self, c: CondId, sig_value: i32, limit: usize) -> Result<u32> {
        let _cs = CriticalGuard::enter(self.port());
        // Pick the satisfied waiters first, then release them; waking
        // mutates the queue being walked.
        let mut pass = [0 as ThreadId; MAX_THREADS];
        let mut n = 0;
        {
            let cv = self.conds.get(c.0)?;
            for t in cv.waitq.iter() {
                let satisfied = match self.threads[t as usize].wait {
                    WaitData::Cond { pred: Some(p), arg } => p(arg, sig_value),
                    WaitData::Cond { pred: None, .. } => true,
                    _ => false,
                };
                if satisfied {
                    pass[n] = t;
                    n += 1;
                    if n == limit {
                        break;
                    }
                }
            }
        }
        for &t in &pass[..n] {
            self.conds.get_mut(c.0)?.waitq.remove(t);
            self.wake_thread(t, WakeStatus::CondSignaled(sig_value));
        }
        Ok(n as u32)
    }
}
