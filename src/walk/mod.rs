//! Capturing return addresses.
//!
//! The dumper does not care how frames are found, only that it gets a
//! bounded, allocation-free walk. [`SystemUnwinder`] asks the platform
//! unwinder; tests plug in fakes.

mod system;

pub use system::SystemUnwinder;

/// How many frames a dump captures at most. The frame array lives on the
/// stack of whoever is dumping.
pub const MAX_FRAMES: usize = 32;

pub trait Unwinder {
    /// Fills `frames` with return addresses, innermost first, and returns how
    /// many were written.
    ///
    /// With `skip == 0` the first frame is the caller of `capture`; `skip`
    /// drops that many frames from the innermost end. The unwinder's own
    /// frames are never reported. The walk stops silently once `frames` is
    /// full. A walk that fails yields 0.
    ///
    /// Must be callable from a signal handler.
    fn capture(&self, frames: &mut [usize], skip: usize) -> usize;
}

