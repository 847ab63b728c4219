//! Formatting a captured stack, one line per frame.
//!
//! ```text
//!     @ 0x000055d0c2a1b3f4
//!     @ 0x00007f3a1c03c520  __libc_start_call_main
//! ```
//!
//! The address is `0x` plus zero-padded lowercase hex, `2 + 2 *
//! size_of::<usize>()` characters in total. When a [`Symbolizer`] is in use,
//! two spaces and the symbol (or `(unknown)`) follow. This layout is what
//! crash dump parsers match on, keep it stable.

use alloc::string::String;
use core::{fmt::Write, mem};

use crate::{
    identify::Symbolizer,
    stdext::LineBuf,
    walk::{SystemUnwinder, Unwinder, MAX_FRAMES},
    writer::DebugWriter,
};

const PREFIX: &str = "    ";

/// `%p` width: two characters per byte, plus the leading `0x`.
pub const POINTER_FIELD_WIDTH: usize = 2 + 2 * mem::size_of::<usize>();

const LINE_CAPACITY: usize = 1024;

/// Dumps the current stack to `writer`, one call per frame.
///
/// The dumper's own frame is never shown; `skip` drops that many more, so
/// with `skip == 0` the first line is the caller of this function. At most
/// [`MAX_FRAMES`] lines are written.
///
/// Async-signal-safe as long as `writer` is.
#[inline(never)]
pub fn dump_stack_trace<W: DebugWriter + ?Sized>(skip: usize, writer: &mut W) {
    let mut frames = [0usize; MAX_FRAMES];
    let depth = SystemUnwinder.capture(&mut frames, skip + 1);
    write_frames(&frames[..depth], None, writer);
}

/// Like [`dump_stack_trace`], with an explicit unwinder and, optionally, a
/// symbolizer. Symbol lookup failures print `(unknown)` and never stop the
/// dump.
#[inline(never)]
pub fn dump_stack_trace_with<U, W>(
    skip: usize,
    unwinder: &U,
    symbolizer: Option<&dyn Symbolizer>,
    writer: &mut W,
) where
    U: Unwinder + ?Sized,
    W: DebugWriter + ?Sized,
{
    let mut frames = [0usize; MAX_FRAMES];
    let depth = unwinder.capture(&mut frames, skip + 1);
    write_frames(&frames[..depth], symbolizer, writer);
}

/// Appends the current stack to `out`, starting at the caller.
///
/// This allocates. It is meant for voluntary diagnostics (a trace in an error
/// report), never for a signal handler.
#[inline(never)]
pub fn dump_stack_trace_to_string(out: &mut String) {
    let mut frames = [0usize; MAX_FRAMES];
    let depth = SystemUnwinder.capture(&mut frames, 1);
    write_frames(&frames[..depth], None, out);
}

#[inline(always)]
fn write_frames<W: DebugWriter + ?Sized>(
    frames: &[usize],
    symbolizer: Option<&dyn Symbolizer>,
    writer: &mut W,
) {
    for &pc in frames {
        let mut line = LineBuf::<LINE_CAPACITY>::new();
        format_frame(&mut line, pc, symbolizer);
        writer.write_line(line.finish());
    }
}

fn format_frame<const N: usize>(
    line: &mut LineBuf<N>,
    pc: usize,
    symbolizer: Option<&dyn Symbolizer>,
) {
    // LineBuf never fails, it truncates.
    let _ = write!(line, "{PREFIX}@ {pc:#0POINTER_FIELD_WIDTH$x}");
    if let Some(symbolizer) = symbolizer {
        let _ = line.write_str("  ");
        match symbolizer.symbolize(pc) {
            Some(name) => line.write_bytes(name.to_bytes()),
            None => {
                let _ = line.write_str("(unknown)");
            }
        }
    }
    let _ = line.write_char('\n');
}

#[cfg(test)]
mod tests;
