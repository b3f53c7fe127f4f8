//! The unrecoverable-error path.
//!
//! Everything in [`crate::error`] is a result code the caller handles.
//! This module is for the other kind: conditions under which kernel
//! invariants can no longer be trusted (a corrupted wake handshake, an
//! impossible table state). [`Kernel::fatal_error`] invokes the
//! user-registered last-gasp handler — typically it records the reason
//! in nonvolatile memory — and then halts the processor through the
//! port. It never returns and is never used for ordinary API misuse.
//!
//! Fatal codes at or above zero are reserved for the kernel itself;
//! embedder-defined codes must be negative.

use spin::Mutex;
use thal::Port;

use crate::kernel::Kernel;

/// System-reserved fatal codes.
pub mod code {
    /// A debug invariant check failed.
    pub const ASSERT: i32 = 1;
    /// A blocked thread resumed without any waker recording a reason.
    pub const WAKE_PROTOCOL: i32 = 2;
}

/// Last-gasp handler: `(code, message)`. Must make no assumptions
/// about kernel state and must not call back into the kernel.
pub type FatalHandler = fn(code: i32, msg: &str);

/// Handler registration is process-wide, like the panic hook it
/// resembles — it exists before any kernel instance and survives all
/// of them, so it lives behind a spin lock rather than in `Kernel`.
static FATAL_HANDLER: Mutex<Option<FatalHandler>> = Mutex::new(None);

/// Install a fatal-error handler, returning the previous one.
pub fn register_fatal_error_handler(handler: FatalHandler) -> Option<FatalHandler> {
    FATAL_HANDLER.lock().replace(handler)
}

impl Kernel<'_> {
    /// Report an unrecoverable error and halt the system.
    ///
    /// The handler runs at the caller's interrupt level and must make
    /// minimal assumptions: kernel calls may no longer work.
    pub fn fatal_error(&self, code: i32, msg: &str) -> ! {
        // try_lock: a fatal error inside the handler (or while another
        // context holds the registration lock) must still halt.
        let handler = FATAL_HANDLER.try_lock().and_then(|guard| *guard);
        log::error!("fatal error {}: {}", code, msg);
        if let Some(handler) = handler {
            handler(code, msg);
        }
        self.port().halt()
    }

    /// Debug-only invariant check; compiles to nothing in release
    /// builds. Failures are kernel bugs, so they take the fatal path
    /// rather than returning an error the caller could mishandle.
    #[inline]
    pub(crate) fn invariant(&self, cond: bool, msg: &'static str) {
        if cfg!(debug_assertions) && !cond {
            self.fatal_error(code::ASSERT, msg);
        }
    }
}
