//! Where dumps go.
//!
//! There is exactly one process-wide [`FailureWriter`] slot. It starts out
//! empty, which means [`write_to_stderr`], and is replaced wholesale by
//! [`install_failure_writer`]. The slot is an [`AtomicPtr`] so reading it from
//! a signal handler can never block.

use alloc::string::String;
use core::{
    mem, ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use crate::stdext::RawFd;

/// Receives one complete dump line. The bytes are not NUL terminated.
///
/// A writer may be called from inside a signal handler, so it must be
/// async-signal-safe: no allocation, no locks, no buffered I/O. Nothing checks
/// this for you.
pub type FailureWriter = fn(&[u8]);

static FAILURE_WRITER: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// Replaces the process-wide failure writer.
///
/// This is a single store; a dump running concurrently sees either the old or
/// the new writer. Install it during startup, before anything can fault.
pub fn install_failure_writer(writer: FailureWriter) {
    FAILURE_WRITER.store(writer as *mut (), Ordering::Release);
}

/// The currently installed failure writer, [`write_to_stderr`] if none was
/// installed.
pub fn failure_writer() -> FailureWriter {
    let writer = FAILURE_WRITER.load(Ordering::Acquire);
    if writer.is_null() {
        return write_to_stderr;
    }
    // SAFETY: the slot only ever holds null or a `FailureWriter` stored by
    // `install_failure_writer`.
    unsafe { mem::transmute::<*mut (), FailureWriter>(writer) }
}

#[cfg(test)]
pub(crate) fn reset_failure_writer() {
    FAILURE_WRITER.store(ptr::null_mut(), Ordering::Release);
}

/// The default writer: one raw `write(2)` to `STDERR_FILENO`, errors ignored.
pub fn write_to_stderr(data: &[u8]) {
    RawFd::STDERR.write_bytes(data);
}

/// A destination for a stack dump. `&mut self` is the writer's context.
pub trait DebugWriter {
    /// Called once per line; `line` always ends with `\n`.
    fn write_line(&mut self, line: &[u8]);
}

/// Raw, unbuffered stderr. What the signal handler uses unless told otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stderr;

impl DebugWriter for Stderr {
    fn write_line(&mut self, line: &[u8]) {
        write_to_stderr(line);
    }
}

/// Forwards to whatever [`failure_writer`] returns at the time of each line.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstalledWriter;

impl DebugWriter for InstalledWriter {
    fn write_line(&mut self, line: &[u8]) {
        failure_writer()(line);
    }
}

/// Collects the dump. Allocates, so never use this from a signal handler.
impl DebugWriter for String {
    fn write_line(&mut self, line: &[u8]) {
        self.push_str(&String::from_utf8_lossy(line));
    }
}

impl<W: DebugWriter + ?Sized> DebugWriter for &mut W {
    fn write_line(&mut self, line: &[u8]) {
        (**self).write_line(line);
    }
}
