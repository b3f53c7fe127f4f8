//! Kernel error taxonomy.
//!
//! Every fallible operation returns [`Result`]; all errors here are
//! locally recoverable — the caller decides how to proceed, nothing
//! unwinds or halts. Each variant carries a stable negative `i32` code
//! for reporting across the C boundary of the surrounding firmware
//! (zero is reserved for success). The unrecoverable path is separate:
//! see [`crate::fatal`].

/// Result alias used throughout the kernel.
pub type Result<T> = core::result::Result<T, Error>;

/// Recoverable kernel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Error {
    /// A parameter was out of range or a flag combination contradicts
    /// itself (e.g. ceiling and inheritance protocols together).
    InvalidArg = -1,
    /// The handle's slot was deleted (and possibly reused) since the
    /// handle was issued.
    InvalidHandle = -2,
    /// The object's slot table is full.
    NoSlots = -3,
    /// A blocking call was made from interrupt context.
    InterruptContext = -4,
    /// `trylock` on a mutex that is already owned.
    MutexLocked = -5,
    /// `unlock`/`delete` by a thread that does not own the mutex.
    MutexNotOwned = -6,
    /// `lock` by the thread that already owns the mutex.
    MutexAlreadyOwned = -7,
    /// `delete` on a mutex with queued waiters.
    MutexDelete = -8,
    /// `delete` on a condition variable with queued waiters.
    CondDelete = -9,
    /// `delete` on an event group with queued waiters.
    EventDelete = -10,
    /// `wait` on a timer that is not armed.
    TimerInactive = -11,
    /// A timer wait was released by `timer_stop` rather than expiry.
    TimerCancelled = -12,
    /// `delete` on a timer that is active or has waiters.
    TimerDelete = -13,
    /// A timer operation before `start_system_timer`.
    NoSystemTimer = -14,
}

impl Error {
    /// The stable signed code for this error.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Short identifier, for logs and fatal-handler output.
    pub const fn name(self) -> &'static str {
        match self {
            Error::InvalidArg => "invalid-arg",
            Error::InvalidHandle => "invalid-handle",
            Error::NoSlots => "no-slots",
            Error::InterruptContext => "interrupt-context",
            Error::MutexLocked => "mutex-locked",
            Error::MutexNotOwned => "mutex-not-owned",
            Error::MutexAlreadyOwned => "mutex-already-owned",
            Error::MutexDelete => "mutex-delete",
            Error::CondDelete => "cond-delete",
            Error::EventDelete => "event-delete",
            Error::TimerInactive => "timer-inactive",
            Error::TimerCancelled => "timer-cancelled",
            Error::TimerDelete => "timer-delete",
            Error::NoSystemTimer => "no-system-timer",
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_negative() {
        assert_eq!(Error::InvalidArg.code(), -1);
        assert_eq!(Error::MutexNotOwned.code(), -6);
        assert_eq!(Error::NoSystemTimer.code(), -14);
        for e in [
            Error::InvalidArg,
            Error::InvalidHandle,
            Error::NoSlots,
            Error::InterruptContext,
            Error::MutexLocked,
            Error::MutexNotOwned,
            Error::MutexAlreadyOwned,
            Error::MutexDelete,
            Error::CondDelete,
            Error::EventDelete,
            Error::TimerInactive,
            Error::TimerCancelled,
            Error::TimerDelete,
            Error::NoSystemTimer,
        ] {
            assert!(e.code() < 0, "{} must be negative", e);
        }
    }
}
