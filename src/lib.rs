//! Stack dumps for processes that are about to die.
//!
//! `dumpstack` installs a handler for the fatal signals (`SIGSEGV`, `SIGILL`,
//! `SIGFPE`, `SIGABRT`, `SIGBUS` and `SIGTERM`). When one of them arrives it
//! writes the stack of the faulting thread to stderr, one line per frame:
//!
//! ```text
//! *** SIGSEGV (@0x0000000000000000) received by PID 4242; stack trace: ***
//!     @ 0x00007f3a1c03c520
//!     @ 0x000055d0c2a1b3f4
//! ```
//!
//! and then aborts, so the OS still sees a process killed by `SIGABRT` (core
//! dump and all).
//!
//! Everything reachable from the handler is async-signal-safe: no allocation,
//! no locks, no buffered I/O. The same dumper can be used voluntarily, see
//! [`dump_stack_trace`] and [`dump_stack_trace_to_string`].
//!
//! ```no_run
//! dumpstack::install_failure_signal_handler().expect("sigaction failed");
//! ```
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate tracing;

mod stdext;

pub mod uw;

pub mod dump;
pub mod error;
pub mod identify;
pub mod signal;
pub mod walk;
pub mod writer;

pub use dump::{dump_stack_trace, dump_stack_trace_to_string, dump_stack_trace_with};
pub use error::{InstallError, InstallResult};
pub use identify::{Dladdr, Symbolizer};
pub use signal::{
    install_failure_signal_handler, install_failure_signal_handler_with, FatalSignal, FaultOutput,
    HandlerOptions,
};
pub use walk::{SystemUnwinder, Unwinder, MAX_FRAMES};
pub use writer::{
    failure_writer, install_failure_writer, write_to_stderr, DebugWriter, FailureWriter,
    InstalledWriter, Stderr,
};

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static GLOBAL_STATE: Mutex<()> = Mutex::new(());

    /// Serializes tests that touch process-wide state (the writer slot).
    pub(crate) fn lock_global_state() -> MutexGuard<'static, ()> {
        GLOBAL_STATE.lock().unwrap_or_else(|e| e.into_inner())
    }
}
