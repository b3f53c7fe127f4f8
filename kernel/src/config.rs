//! Compile-time kernel configuration.
//!
//! Every tunable the core exposes lives here as a named constant, so a
//! port to a new DSP is a one-file diff. Table capacities are hard
//! limits: kernel objects come from fixed-size slot tables and are never
//! heap-allocated.

use crate::sync::waitq::QueueOrder;

/// Number of thread priority levels. Valid priorities are
/// `0..NUM_PRIORITIES`, higher value = higher priority.
pub const NUM_PRIORITIES: usize = 32;

/// Capacity of the external thread table the scheduler manages. The
/// kernel keeps a shadow record per thread (held mutexes, wake status),
/// indexed by `ThreadId`.
pub const MAX_THREADS: usize = 32;

/// Mutex slot-table capacity. Also bounds the transitive
/// priority-inheritance walk.
pub const MAX_MUTEXES: usize = 32;

/// Condition-variable slot-table capacity.
pub const MAX_CONDVARS: usize = 16;

/// Event-group slot-table capacity.
pub const MAX_EVENTS: usize = 16;

/// Timer slot-table capacity. Sleeping threads borrow a slot each, so
/// size this for armed timers plus concurrent sleepers.
pub const MAX_TIMERS: usize = 32;

/// Wait-order policy a mutex gets when its creation flags name neither
/// `WAIT_PRIORITY` nor `WAIT_FIFO`.
pub const DEFAULT_MUTEX_ORDER: QueueOrder = QueueOrder::Priority;

/// The interrupt level kernel critical sections raise to. Interrupts
/// above this level stay live but are forbidden from calling into the
/// kernel; interrupts at or below it may, and are masked while kernel
/// state is inconsistent.
pub const MAX_OS_INT_LEVEL: u32 = 3;

/// Nominal clock frequency in cycles per second, used until the
/// embedder calls `set_clock_freq` with the measured rate.
pub const DEFAULT_CLOCK_HZ: u32 = 400_000_000;

/// Upper bound on how far ahead the compare register is armed, in
/// cycles. Keeps the tick interrupt firing at least four times per
/// 32-bit counter wrap so the clock's high word stays current even with
/// an empty timer list in dynamic-tick mode.
pub const MAX_TICK_DELTA: u32 = 1 << 30;
