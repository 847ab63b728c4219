use core::ffi::CStr;
use std::sync::Mutex;

use super::*;
use crate::{
    test_util::lock_global_state,
    writer::{install_failure_writer, reset_failure_writer, InstalledWriter},
};

/// A pretend stack: `frames[0]` is the dumper itself, then its caller, and so on.
struct FakeStack(Vec<usize>);

impl FakeStack {
    fn deep(depth: usize) -> Self {
        Self((1..=depth).map(|i| 0x1000 * i).collect())
    }
}

impl Unwinder for FakeStack {
    fn capture(&self, frames: &mut [usize], skip: usize) -> usize {
        let available = self.0.get(skip..).unwrap_or_default();
        let n = available.len().min(frames.len());
        frames[..n].copy_from_slice(&available[..n]);
        n
    }
}

struct Names;

impl Symbolizer for Names {
    fn symbolize(&self, pc: usize) -> Option<&CStr> {
        (pc == 0x2000).then_some(c"meow::purr")
    }
}

#[derive(Default)]
struct Lines(Vec<String>);

impl DebugWriter for Lines {
    fn write_line(&mut self, line: &[u8]) {
        self.0.push(String::from_utf8(line.to_vec()).unwrap());
    }
}

/// `"    @ 0x<hex>\n"`, returning the address.
fn parse_line(line: &str) -> usize {
    let rest = line.strip_prefix("    @ ").expect(line);
    let (addr, rest) = rest.split_at(POINTER_FIELD_WIDTH);
    assert!(rest == "\n" || rest.starts_with("  "), "{line:?}");
    assert!(rest.ends_with('\n'), "{line:?}");
    let hex = addr.strip_prefix("0x").expect(line);
    assert!(hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)), "{line:?}");
    usize::from_str_radix(hex, 16).unwrap()
}

#[test]
fn line_format_is_fixed_width() {
    let mut out = Lines::default();
    dump_stack_trace_with(0, &FakeStack(vec![0, 0x2a, usize::MAX]), None, &mut out);

    assert_eq!(out.0.len(), 2);
    if cfg!(target_pointer_width = "64") {
        assert_eq!(out.0[0], "    @ 0x000000000000002a\n");
        assert_eq!(out.0[1], "    @ 0xffffffffffffffff\n");
    }
    assert_eq!(parse_line(&out.0[0]), 0x2a);
    assert_eq!(parse_line(&out.0[1]), usize::MAX);
}

#[test]
fn skip_counts_are_honored_for_every_depth() {
    let stack = FakeStack::deep(MAX_FRAMES + 1);
    for skip in 0..MAX_FRAMES {
        let mut out = Lines::default();
        dump_stack_trace_with(skip, &stack, None, &mut out);

        assert_eq!(out.0.len(), MAX_FRAMES - skip, "skip={skip}");
        assert_eq!(parse_line(&out.0[0]), 0x1000 * (skip + 2), "skip={skip}");
    }
}

#[test]
fn deep_stacks_are_truncated_silently() {
    let mut out = Lines::default();
    dump_stack_trace_with(0, &FakeStack::deep(200), None, &mut out);

    assert_eq!(out.0.len(), MAX_FRAMES);
    assert_eq!(parse_line(out.0.last().unwrap()), 0x1000 * (MAX_FRAMES + 1));
}

#[test]
fn no_frames_means_no_lines() {
    let mut out = Lines::default();
    dump_stack_trace_with(0, &FakeStack(vec![]), None, &mut out);
    dump_stack_trace_with(5, &FakeStack::deep(3), None, &mut out);

    assert!(out.0.is_empty());
}

#[test]
fn symbols_are_appended_when_resolvable() {
    let mut out = Lines::default();
    dump_stack_trace_with(0, &FakeStack::deep(3), Some(&Names), &mut out);

    assert_eq!(out.0.len(), 2);
    assert!(out.0[0].ends_with("  meow::purr\n"), "{:?}", out.0[0]);
    assert!(out.0[1].ends_with("  (unknown)\n"), "{:?}", out.0[1]);
    parse_line(&out.0[0]);
    parse_line(&out.0[1]);
}

#[test]
fn overlong_symbols_still_end_the_line() {
    struct Rambling(std::ffi::CString);
    impl Symbolizer for Rambling {
        fn symbolize(&self, _pc: usize) -> Option<&CStr> {
            Some(&self.0)
        }
    }

    let name = std::ffi::CString::new("x".repeat(4 * LINE_CAPACITY)).unwrap();
    let mut out = Lines::default();
    dump_stack_trace_with(0, &FakeStack::deep(2), Some(&Rambling(name)), &mut out);

    assert_eq!(out.0.len(), 1);
    assert_eq!(out.0[0].len(), LINE_CAPACITY);
    assert!(out.0[0].ends_with("x\n"));
}

#[inline(never)]
fn depth_one(out: &mut Lines) {
    depth_two(out);
}

#[inline(never)]
fn depth_two(out: &mut Lines) {
    depth_three(out);
}

#[inline(never)]
fn depth_three(out: &mut Lines) {
    dump_stack_trace(0, out);
}

#[test]
fn real_stack_from_a_known_depth() {
    let mut out = Lines::default();
    depth_one(&mut out);

    // depth_three, depth_two, depth_one and this test, plus the harness above
    assert!(out.0.len() >= 4, "{:?}", out.0);
    assert!(out.0.len() <= MAX_FRAMES);
    assert_ne!(parse_line(&out.0[0]), 0);
    for line in &out.0 {
        parse_line(line);
    }
}

#[test]
fn skipping_real_frames_shortens_the_trace() {
    #[inline(never)]
    fn dump(skip: usize) -> Vec<String> {
        let mut out = Lines::default();
        dump_stack_trace(skip, &mut out);
        out.0
    }

    let full = dump(0);
    let skipped = dump(1);
    assert!(full.len() >= 2);
    // the innermost frame (inside `dump`) is gone
    if full.len() < MAX_FRAMES {
        assert_eq!(skipped.len() + 1, full.len());
    } else {
        assert!(skipped.len() >= MAX_FRAMES - 1);
    }
}

static CAPTURED: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());
static IGNORED: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

fn capture(line: &[u8]) {
    CAPTURED.lock().unwrap().push(line.to_vec());
}

fn ignore(line: &[u8]) {
    IGNORED.lock().unwrap().push(line.to_vec());
}

#[test]
fn installed_writer_receives_the_dump() {
    let _guard = lock_global_state();
    CAPTURED.lock().unwrap().clear();
    IGNORED.lock().unwrap().clear();

    install_failure_writer(ignore);
    install_failure_writer(capture);
    dump_stack_trace(0, &mut InstalledWriter);
    reset_failure_writer();

    let captured = CAPTURED.lock().unwrap();
    assert!(!captured.is_empty());
    assert!(IGNORED.lock().unwrap().is_empty());
    for line in captured.iter() {
        parse_line(core::str::from_utf8(line).unwrap());
    }
}

#[test]
fn string_dump_starts_at_the_caller() {
    let mut trace = String::new();
    dump_stack_trace_to_string(&mut trace);

    assert!(!trace.is_empty());
    assert!(trace.lines().count() <= MAX_FRAMES);
    for line in trace.split_inclusive('\n') {
        parse_line(line);
    }
}
