// =============================================================================
// Tempo RTOS — Kernel Core
// =============================================================================
//
// The synchronization and timing core of a single-core DSP firmware
// kernel. It provides exactly five things:
//   1. Critical sections      (interrupt-level masking, no lock beneath)
//   2. Mutexes                (priority inheritance / ceiling protocols)
//   3. Condition variables    (per-wait predicates, no stored signal)
//   4. Event groups           (masked 32-bit bit tests, ALL/ANY waits)
//   5. Timers + system clock  (64-bit cycles over a wrapping counter,
//                              periodic or tickless tick)
//
// Threads, the scheduler, message queues, and interrupt dispatch live
// in the surrounding firmware. The kernel reaches them through two
// injected capabilities: `thal::Port` for the hardware registers and
// `Scheduler` for thread operations. That boundary is what lets the
// whole core run and be tested on a host against software fakes.
//
// Concurrency model: one execution core. Every state mutation happens
// inside a critical section raised to `config::MAX_OS_INT_LEVEL`;
// interrupts above that level stay live but must not call in. The
// only suspension points are mutex_lock, cond_wait, the event waits,
// timer_wait and thread_sleep — each fails with `InterruptContext`
// rather than blocking when called from a handler.
// =============================================================================

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod fatal;
mod kernel;
pub mod sync;
mod table;
pub mod thread;
pub mod time;

#[cfg(test)]
mod testutil;

pub use error::{Error, Result};
pub use fatal::{register_fatal_error_handler, FatalHandler};
pub use kernel::Kernel;
pub use sync::cond::{CondId, CondPredicate};
pub use sync::critical::CriticalGuard;
pub use sync::event::EventId;
pub use sync::mutex::{MutexFlags, MutexId};
pub use sync::waitq::QueueOrder;
pub use thread::{Priority, Scheduler, ThreadId};
pub use time::timer::{TimerCallback, TimerFlags, TimerId};
