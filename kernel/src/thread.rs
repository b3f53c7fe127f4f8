//! Thread references and the external scheduler boundary.
//!
//! The kernel owns no threads. It sees them as indices (`ThreadId`)
//! into a thread table owned by the surrounding firmware, and reaches
//! scheduling decisions only through the injected [`Scheduler`]
//! capability. What the kernel *does* keep is a shadow record per
//! thread: which boosting mutexes it holds, which mutex it is blocked
//! on (the edge the transitive inheritance walk follows), the per-wait
//! scratch data, and the wake-status slot its waker fills in.
//!
//! **Invariants:**
//! - A thread is in at most one wait queue, and is in the scheduler's
//!   blocked state iff it is queued somewhere.
//! - `wake` is `Pending` exactly while the thread is queued; the wake
//!   path replaces it with the wake reason before calling `ready`.
//! - `held` and `blocked_on` only ever name live mutex slots.

use crate::config::MAX_MUTEXES;
use crate::sync::cond::CondPredicate;
use crate::sync::event::WaitMode;
use crate::table::RawHandle;

/// Index into the firmware's thread table.
pub type ThreadId = u16;

/// Thread priority; `0..NUM_PRIORITIES`, higher value = higher priority.
pub type Priority = u8;

// ── Scheduler capability ────────────────────────────────────────

/// The scheduler operations the kernel needs, injected at construction.
///
/// Methods take `&self`; implementations use interior mutability (the
/// real scheduler already guards its tables, and test doubles use
/// cells). All calls happen inside a kernel critical section except
/// `switch_out`, which is entered with interrupts restored.
pub trait Scheduler {
    /// The running thread, or `None` before threading starts.
    fn current(&self) -> Option<ThreadId>;

    /// Whether execution is currently in an interrupt handler.
    fn in_interrupt(&self) -> bool;

    /// The thread's own (unboosted) priority.
    fn base_priority(&self, t: ThreadId) -> Priority;

    /// The thread's current effective priority, including any boost.
    fn effective_priority(&self, t: ThreadId) -> Priority;

    /// Set the effective priority. Called by the mutex protocols; the
    /// scheduler must requeue `t` in its ready structures if needed.
    fn set_effective_priority(&self, t: ThreadId, p: Priority);

    /// Move `t` from ready/running to blocked.
    fn block(&self, t: ThreadId);

    /// Move `t` from blocked to ready.
    fn ready(&self, t: ThreadId);

    /// Give up the processor; returns when `t` has been made ready and
    /// scheduled again. Called exactly once per blocking wait, after
    /// `block(t)` and outside the critical section.
    fn switch_out(&self, t: ThreadId);
}

// ── Wake protocol ───────────────────────────────────────────────

/// Why a blocked thread was released. Filled into the sleeper's wake
/// slot by the waker, consumed by the sleeper when it resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeStatus {
    /// Not waiting.
    Idle,
    /// Queued and blocked; no waker has released it yet.
    Pending,
    /// Mutex ownership was transferred by `unlock`.
    MutexAcquired,
    /// A condvar signal satisfied the predicate; carries the signal
    /// value handed back from `cond_wait`.
    CondSignaled(i32),
    /// The event-group test passed after an update.
    EventSatisfied,
    /// The awaited timer expired.
    TimerExpired,
    /// The wait object was torn down under the waiter (`timer_stop`).
    Cancelled,
}

/// Per-wait scratch recorded while a thread sits in a wait queue.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WaitData {
    None,
    /// Condvar wait: predicate + context, evaluated at signal time.
    Cond {
        pred: Option<CondPredicate>,
        arg: usize,
    },
    /// Event-group wait: requested bits and test mode.
    Event { mask: u32, mode: WaitMode },
}

// ── Shadow record ───────────────────────────────────────────────

/// Kernel-side bookkeeping for one thread slot.
pub(crate) struct ThreadRec {
    /// Boosting (ceiling/inheritance) mutexes this thread holds.
    pub held: [Option<RawHandle>; MAX_MUTEXES],
    /// The mutex this thread is queued on, if any.
    pub blocked_on: Option<RawHandle>,
    /// Wake handshake slot.
    pub wake: WakeStatus,
    /// Scratch for the wait in progress.
    pub wait: WaitData,
}

impl ThreadRec {
    pub fn new() -> Self {
        Self {
            held: [None; MAX_MUTEXES],
            blocked_on: None,
            wake: WakeStatus::Idle,
            wait: WaitData::None,
        }
    }

    /// Record a held boosting mutex. `held` has one slot per mutex in
    /// the system, so insertion cannot fail.
    pub fn hold(&mut self, h: RawHandle) {
        for slot in self.held.iter_mut() {
            if slot.is_none() {
                *slot = Some(h);
                return;
            }
        }
    }

    /// Forget a held mutex; returns whether it was recorded.
    pub fn release(&mut self, h: RawHandle) -> bool {
        for slot in self.held.iter_mut() {
            if *slot == Some(h) {
                *slot = None;
                return true;
            }
        }
        false
    }
}
