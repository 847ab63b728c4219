//! Turning addresses into names, when we can.

use core::ffi::CStr;

pub trait Symbolizer {
    /// Best-effort name of the function containing the return address `pc`.
    /// Must not block; `None` when nothing is known.
    fn symbolize(&self, pc: usize) -> Option<&CStr>;
}

/// Asks the dynamic linker via `dladdr(3)`.
///
/// Only symbols in the dynamic symbol table are visible, so binaries linked
/// without `-rdynamic` mostly resolve their shared library frames. `dladdr`
/// takes no locks in glibc's common path but is not on the async-signal-safe
/// list, hence opt-in for the signal handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dladdr;

impl Symbolizer for Dladdr {
    fn symbolize(&self, pc: usize) -> Option<&CStr> {
        if pc == 0 {
            return None;
        }
        // Look up the previous byte: when a function ends in a call to
        // something that never returns, the return address already belongs
        // to the next function.
        let addr = pc - 1;

        unsafe {
            let mut info: libc::Dl_info = core::mem::zeroed();

            if libc::dladdr(addr as *const libc::c_void, &mut info) == 0 {
                return None;
            }

            if !info.dli_sname.is_null() {
                let sym_name = CStr::from_ptr(info.dli_sname);
                return Some(sym_name);
            }

            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_libc_exports() {
        let pc = libc::getpid as usize + 1;
        let name = Dladdr.symbolize(pc).expect("getpid is exported by libc");
        assert!(name.to_bytes().ends_with(b"getpid"), "{name:?}");
    }

    #[test]
    fn null_is_unknown() {
        assert_eq!(Dladdr.symbolize(0), None);
    }
}
