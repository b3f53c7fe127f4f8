//! Interrupt-level critical sections.
//!
//! The kernel has no lock beneath it: mutual exclusion for kernel state
//! comes from raising the processor's interrupt level to the configured
//! OS ceiling ([`MAX_OS_INT_LEVEL`]). Interrupts above the ceiling stay
//! live — they are forbidden from calling into the kernel, so they can
//! preempt a critical section without ever observing torn state.
//!
//! Entry/exit is a strict save/restore pair, not a counter: each enter
//! captures the prior state and each exit restores exactly that state,
//! so sections nest and an enter from an interrupt handler already at
//! the ceiling is a no-op. Both operations are O(1) register writes.

use thal::{IntState, Port};

use crate::config::MAX_OS_INT_LEVEL;
use crate::kernel::Kernel;

/// RAII critical section: raises the interrupt level on construction,
/// restores the saved state on every exit path.
pub struct CriticalGuard<'p> {
    port: &'p dyn Port,
    saved: IntState,
}

impl<'p> CriticalGuard<'p> {
    /// Enter a critical section at the kernel ceiling.
    #[inline]
    pub fn enter(port: &'p dyn Port) -> Self {
        let saved = port.set_int_level(MAX_OS_INT_LEVEL);
        Self { port, saved }
    }
}

impl Drop for CriticalGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.port.restore_int_level(self.saved);
    }
}

impl Kernel<'_> {
    /// Raise the interrupt level to the kernel ceiling; returns the
    /// opaque prior state for [`Kernel::critical_exit`].
    ///
    /// Prefer [`CriticalGuard`] in Rust code; this pair exists for
    /// callers that cannot scope a guard (assembly shims, C glue).
    #[inline]
    pub fn critical_enter(&self) -> IntState {
        self.port().set_int_level(MAX_OS_INT_LEVEL)
    }

    /// Restore interrupt state saved by [`Kernel::critical_enter`].
    #[inline]
    pub fn critical_exit(&self, saved: IntState) {
        self.port().restore_int_level(saved)
    }
}
