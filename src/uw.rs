//! Bindings to the platform unwinder's backtrace entry points (the Itanium
//! C++ ABI `_Unwind_*` family, provided by libgcc_s or libunwind).
#![allow(nonstandard_style)] // Closely follow the ABI names here

use core::ffi;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum _Unwind_Reason_Code {
    _URC_NO_REASON = 0,
    /// This indicates that a different runtime caught this exception.
    /// Nested foreign exceptions, or re-throwing a foreign exception, result in
    /// undefined behavior.
    _URC_FOREIGN_EXCEPTION_CAUGHT = 1,
    /// The personality routine encountered an error during phase 1, other than the specific error codes defined.
    _URC_FATAL_PHASE1_ERROR = 3,
    /// The personality routine encountered an error during phase 2, for instance a stack corruption.
    _URC_FATAL_PHASE2_ERROR = 2,
    _URC_NORMAL_STOP = 4,
    /// The unwinder reached the end of the stack. Returned from a trace
    /// callback, it stops the walk.
    _URC_END_OF_STACK = 5,
    _URC_HANDLER_FOUND = 6,
    _URC_INSTALL_CONTEXT = 7,
    _URC_CONTINUE_UNWIND = 8,
}

/// The _Unwind_Context type is an opaque type used to refer to a system-specific data structure used by the system unwinder.
/// This context is created and destroyed by the system, and passed to the trace callback for every frame.
#[repr(C)]
pub struct _Unwind_Context {
    _private: [u8; 0],
}

/// Called once per frame by [`_Unwind_Backtrace`], innermost frame first.
/// Anything other than `_URC_NO_REASON` stops the walk.
pub type _Unwind_Trace_Fn =
    extern "C" fn(context: *mut _Unwind_Context, arg: *mut ffi::c_void) -> _Unwind_Reason_Code;

#[cfg_attr(all(target_os = "linux", target_env = "gnu"), link(name = "gcc_s"))]
extern "C" {
    pub fn _Unwind_Backtrace(trace: _Unwind_Trace_Fn, arg: *mut ffi::c_void) -> _Unwind_Reason_Code;

    /// The instruction pointer of the frame, i.e. its return address.
    pub fn _Unwind_GetIP(context: *mut _Unwind_Context) -> libc::uintptr_t;
}
