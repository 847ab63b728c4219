//! The little bits of libc we can still call once things have gone wrong.

use core::{ffi, fmt};

/// Unbuffered writer to a raw file descriptor. Used where a signal may be
/// pending, so it never allocates and never retries.
pub(crate) struct RawFd(pub(crate) ffi::c_int);

impl RawFd {
    pub(crate) const STDERR: RawFd = RawFd(libc::STDERR_FILENO);

    /// One `write(2)` of the whole buffer. Failures are dropped on the floor,
    /// there is nobody left to report them to.
    pub(crate) fn write_bytes(&self, bytes: &[u8]) {
        // SAFETY: the pointer and length come from a live slice.
        let _ = unsafe { libc::write(self.0, bytes.as_ptr().cast(), bytes.len()) };
    }
}

/// A fixed-capacity line assembled on the stack.
///
/// Output past the capacity is dropped, but [`LineBuf::finish`] always hands
/// out a buffer ending in `\n`.
pub(crate) struct LineBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> LineBuf<N> {
    pub(crate) const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(N - self.len);
        self.buf[self.len..][..n].copy_from_slice(&bytes[..n]);
        self.len += n;
    }

    pub(crate) fn finish(&mut self) -> &[u8] {
        if self.len == N {
            self.buf[N - 1] = b'\n';
        } else if self.len == 0 || self.buf[self.len - 1] != b'\n' {
            self.buf[self.len] = b'\n';
            self.len += 1;
        }
        &self.buf[..self.len]
    }
}

impl<const N: usize> fmt::Write for LineBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

pub(crate) fn abort() -> ! {
    // SAFETY: We abort.
    unsafe { libc::abort() };
}

pub(crate) fn errno() -> i32 {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let location = unsafe { libc::__errno_location() };
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    let location = unsafe { libc::__error() };

    // SAFETY: the errno location is thread local and always valid.
    unsafe { *location }
}

pub(crate) fn with_errno_str<R>(errno: i32, f: impl FnOnce(&str) -> R) -> R {
    let mut buf: [u8; 512] = [0; 512];

    // SAFETY: Our buffer length is passed correctly
    let error = unsafe { libc::strerror_r(errno, buf.as_mut_ptr().cast(), buf.len()) };
    if error != 0 {
        return f("<strerror_r returned an error>");
    }
    // SAFETY: strerror_r wrote a NUL terminated string, and we zero initialized the rest.
    let cstr = unsafe { ffi::CStr::from_ptr(buf.as_ptr().cast()) };
    f(cstr
        .to_str()
        .unwrap_or("<error message contained invalid utf8>"))
}

#[cfg(test)]
mod tests {
    use core::fmt::Write;

    use super::LineBuf;

    #[test]
    fn line_buf_appends_newline() {
        let mut line = LineBuf::<16>::new();
        write!(line, "meow").unwrap();
        assert_eq!(line.finish(), b"meow\n");
    }

    #[test]
    fn line_buf_keeps_existing_newline() {
        let mut line = LineBuf::<16>::new();
        write!(line, "meow\n").unwrap();
        assert_eq!(line.finish(), b"meow\n");
    }

    #[test]
    fn line_buf_truncates_but_still_ends_the_line() {
        let mut line = LineBuf::<8>::new();
        write!(line, "{}", "x".repeat(100)).unwrap();
        assert_eq!(line.finish(), b"xxxxxxx\n");
    }

    #[test]
    fn empty_line_is_just_a_newline() {
        let mut line = LineBuf::<8>::new();
        assert_eq!(line.finish(), b"\n");
    }
}
