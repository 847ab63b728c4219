use core::ffi;

use super::Unwinder;
use crate::uw;

/// Walks the stack with `_Unwind_Backtrace`, using the `.eh_frame` unwind
/// tables of every loaded object.
///
/// The first walk in a process may make the unwinder allocate while it caches
/// the loaded objects, so warm it up outside of signal context
/// (the signal installers do).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUnwinder;

struct Cursor<'a> {
    frames: &'a mut [usize],
    skip: usize,
    len: usize,
}

extern "C" fn trace_frame(
    context: *mut uw::_Unwind_Context,
    arg: *mut ffi::c_void,
) -> uw::_Unwind_Reason_Code {
    // SAFETY: `arg` is the `Cursor` passed to `_Unwind_Backtrace` below, which
    // outlives the walk.
    let cursor = unsafe { &mut *arg.cast::<Cursor<'_>>() };

    if cursor.skip > 0 {
        cursor.skip -= 1;
        return uw::_Unwind_Reason_Code::_URC_NO_REASON;
    }
    if cursor.len == cursor.frames.len() {
        return uw::_Unwind_Reason_Code::_URC_END_OF_STACK;
    }

    // SAFETY: the context is valid for the duration of the callback.
    let ip = unsafe { uw::_Unwind_GetIP(context) };
    if ip == 0 {
        return uw::_Unwind_Reason_Code::_URC_END_OF_STACK;
    }

    cursor.frames[cursor.len] = ip;
    cursor.len += 1;
    uw::_Unwind_Reason_Code::_URC_NO_REASON
}

impl Unwinder for SystemUnwinder {
    #[inline(never)]
    fn capture(&self, frames: &mut [usize], skip: usize) -> usize {
        let mut cursor = Cursor {
            frames,
            // the first frame reported is `capture` itself
            skip: skip + 1,
            len: 0,
        };

        // SAFETY: `trace_frame` only touches the cursor, which lives across the call.
        unsafe {
            uw::_Unwind_Backtrace(trace_frame, (&mut cursor as *mut Cursor<'_>).cast());
        }

        cursor.len
    }
}
