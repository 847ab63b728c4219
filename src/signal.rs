//! The fatal signal handler.
//!
//! One handler serves every [`FatalSignal`]. Per fault it moves through
//! [`HandlerState`]: `Armed` until a signal arrives, `Dumping` while the
//! header and stack go out, then `Terminating`, which resets `SIGABRT` to its
//! default disposition and aborts. The reset must happen before the abort,
//! otherwise `abort()` would land right back in this handler.
//!
//! Only the thread that received the signal is reported. Install before
//! spawning threads if the alternate signal stack should be set up for the
//! main thread (it is per thread).

use core::{
    ffi, fmt,
    fmt::Write,
    mem, ptr,
    sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
};

use crate::{
    dump::{dump_stack_trace_with, POINTER_FIELD_WIDTH},
    error::{InstallError, InstallResult},
    identify::{Dladdr, Symbolizer},
    stdext::{self, with_errno_str, LineBuf},
    walk::{SystemUnwinder, Unwinder},
    writer::{DebugWriter, InstalledWriter, Stderr},
};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FatalSignal {
    Segv = libc::SIGSEGV,
    Ill = libc::SIGILL,
    Fpe = libc::SIGFPE,
    Abort = libc::SIGABRT,
    Bus = libc::SIGBUS,
    Term = libc::SIGTERM,
}

impl FatalSignal {
    pub const ALL: &'static [FatalSignal] = &[
        FatalSignal::Segv,
        FatalSignal::Ill,
        FatalSignal::Fpe,
        FatalSignal::Abort,
        FatalSignal::Bus,
        FatalSignal::Term,
    ];

    pub fn as_raw(self) -> ffi::c_int {
        self as ffi::c_int
    }

    pub fn from_raw(signum: ffi::c_int) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_raw() == signum)
    }

    pub fn name(self) -> &'static str {
        match self {
            FatalSignal::Segv => "SIGSEGV",
            FatalSignal::Ill => "SIGILL",
            FatalSignal::Fpe => "SIGFPE",
            FatalSignal::Abort => "SIGABRT",
            FatalSignal::Bus => "SIGBUS",
            FatalSignal::Term => "SIGTERM",
        }
    }

    /// Whether the kernel reports a faulting address for this signal.
    fn has_fault_address(self) -> bool {
        matches!(
            self,
            FatalSignal::Segv | FatalSignal::Bus | FatalSignal::Ill | FatalSignal::Fpe
        )
    }
}

impl fmt::Display for FatalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the handler sends its dump.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutput {
    /// Raw writes to stderr. Nothing else is trusted at fault time.
    #[default]
    Stderr,
    /// The writer from [`install_failure_writer`](crate::install_failure_writer).
    /// Only pick this if that writer is async-signal-safe.
    InstalledWriter,
}

#[derive(Debug, Clone, Copy)]
pub struct HandlerOptions {
    pub signals: &'static [FatalSignal],
    pub output: FaultOutput,
    /// Resolve frame names with [`Dladdr`]. Best effort, and `dladdr` is not
    /// formally async-signal-safe.
    pub symbolize: bool,
    /// Give the installing thread an alternate signal stack, so a stack
    /// overflow can still be reported.
    pub alternate_stack: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            signals: FatalSignal::ALL,
            output: FaultOutput::Stderr,
            symbolize: false,
            alternate_stack: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum HandlerState {
    Armed = 0,
    Dumping = 1,
    Terminating = 2,
}

static STATE: AtomicU8 = AtomicU8::new(HandlerState::Armed as u8);
/// `pthread_self` of the thread that owns the fault, 0 while armed.
static DUMPING_THREAD: AtomicUsize = AtomicUsize::new(0);

// Read by the handler, published before any sigaction call.
static ROUTE_TO_INSTALLED_WRITER: AtomicBool = AtomicBool::new(false);
static SYMBOLIZE: AtomicBool = AtomicBool::new(false);

/// Dumps the stack to stderr and aborts on `SIGSEGV`, `SIGILL`, `SIGFPE`,
/// `SIGABRT`, `SIGBUS` and `SIGTERM`.
///
/// Call once at startup. Calling it again re-registers the same handler.
pub fn install_failure_signal_handler() -> InstallResult<()> {
    install_failure_signal_handler_with(HandlerOptions::default())
}

#[instrument(level = "debug")]
pub fn install_failure_signal_handler_with(options: HandlerOptions) -> InstallResult<()> {
    ROUTE_TO_INSTALLED_WRITER.store(
        options.output == FaultOutput::InstalledWriter,
        Ordering::Release,
    );
    SYMBOLIZE.store(options.symbolize, Ordering::Release);

    warm_up(options.symbolize);

    let mut flags = libc::SA_SIGINFO;
    if options.alternate_stack {
        altstack::install()?;
        flags |= libc::SA_ONSTACK;
    }

    for &signal in options.signals {
        register(signal, flags)?;
        debug!(%signal, "failure signal handler installed");
    }

    Ok(())
}

/// The unwinder (and `dladdr`) may allocate on first use; get that over with
/// now rather than in signal context.
fn warm_up(symbolize: bool) {
    let mut frames = [0usize; 2];
    let n = SystemUnwinder.capture(&mut frames, 0);
    trace!("unwinder warmed up with {n} frames");
    if symbolize {
        let _ = Dladdr.symbolize(frames[0]);
    }
}

fn register(signal: FatalSignal, flags: ffi::c_int) -> InstallResult<()> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handle_fatal_signal as libc::sighandler_t;
        action.sa_flags = flags;
        libc::sigemptyset(&mut action.sa_mask);

        if libc::sigaction(signal.as_raw(), &action, ptr::null_mut()) != 0 {
            let errno = stdext::errno();
            with_errno_str(errno, |err| warn!(%signal, "sigaction failed: {err}"));
            return Err(InstallError::Sigaction { signal, errno });
        }
    }
    Ok(())
}

extern "C" fn handle_fatal_signal(
    signum: ffi::c_int,
    info: *mut libc::siginfo_t,
    _ucontext: *mut ffi::c_void,
) {
    let me = current_thread();

    match DUMPING_THREAD.compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => STATE.store(HandlerState::Dumping as u8, Ordering::Release),
        // faulted while dumping (or while terminating), don't try again
        Err(owner) if owner == me => terminate(),
        // someone else is dumping and will take the whole process down
        Err(_) => park(),
    }

    let address = fault_address(signum, info);
    if ROUTE_TO_INSTALLED_WRITER.load(Ordering::Acquire) {
        dump_fault(signum, address, &mut InstalledWriter);
    } else {
        dump_fault(signum, address, &mut Stderr);
    }

    terminate()
}

#[inline(never)]
fn dump_fault<W: DebugWriter>(signum: ffi::c_int, fault_address: Option<usize>, writer: &mut W) {
    let mut header = LineBuf::<160>::new();
    // SAFETY: getpid is async-signal-safe.
    let pid = unsafe { libc::getpid() };
    format_header(&mut header, signum, fault_address, pid);
    writer.write_line(header.finish());

    let symbolizer: Option<&dyn Symbolizer> = if SYMBOLIZE.load(Ordering::Acquire) {
        Some(&Dladdr)
    } else {
        None
    };
    // drop dump_fault and handle_fatal_signal, start at the signal trampoline
    dump_stack_trace_with(2, &SystemUnwinder, symbolizer, writer);
}

fn format_header<const N: usize>(
    line: &mut LineBuf<N>,
    signum: ffi::c_int,
    fault_address: Option<usize>,
    pid: libc::pid_t,
) {
    let _ = match FatalSignal::from_raw(signum) {
        Some(signal) => write!(line, "*** {signal}"),
        None => write!(line, "*** signal {signum}"),
    };
    if let Some(addr) = fault_address {
        let _ = write!(line, " (@{addr:#0POINTER_FIELD_WIDTH$x})");
    }
    let _ = writeln!(line, " received by PID {pid}; stack trace: ***");
}

/// The faulting address, if the kernel generated the signal and reports one.
fn fault_address(signum: ffi::c_int, info: *const libc::siginfo_t) -> Option<usize> {
    if info.is_null() || !FatalSignal::from_raw(signum).is_some_and(FatalSignal::has_fault_address) {
        return None;
    }
    // SAFETY: the kernel hands us a valid siginfo with SA_SIGINFO.
    let info = unsafe { &*info };
    // si_code <= 0 means it came from kill/raise/sigqueue and si_addr is not set.
    if info.si_code <= 0 {
        return None;
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    // SAFETY: si_addr is the active member for kernel-generated fault signals.
    let addr = unsafe { info.si_addr() };
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let addr = info.si_addr;

    Some(addr as usize)
}

fn current_thread() -> usize {
    // SAFETY: pthread_self only reads thread local state.
    unsafe { libc::pthread_self() as usize }
}

fn park() -> ! {
    loop {
        // SAFETY: sleep is async-signal-safe.
        unsafe { libc::sleep(1) };
    }
}

fn terminate() -> ! {
    let previous = STATE.swap(HandlerState::Terminating as u8, Ordering::AcqRel);
    if previous == HandlerState::Terminating as u8 {
        // abort() came back to us, the reset did not stick
        // SAFETY: _exit is async-signal-safe.
        unsafe { libc::_exit(128 + libc::SIGABRT) };
    }
    reset_to_default(libc::SIGABRT);
    stdext::abort()
}

fn reset_to_default(signum: ffi::c_int) {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signum, &action, ptr::null_mut());
    }
}

mod altstack {
    use core::{mem, ptr};

    use crate::{
        error::{InstallError, InstallResult},
        stdext::{self, with_errno_str},
    };

    /// Room for the dumper and the unwinder on top of what the kernel needs.
    const HEADROOM: usize = 64 * 1024;

    /// Maps an alternate signal stack with a guard page below it and makes it
    /// current for this thread, unless one at least as large is already set.
    pub(super) fn install() -> InstallResult<()> {
        let size = stack_size();

        unsafe {
            let mut current: libc::stack_t = mem::zeroed();
            if libc::sigaltstack(ptr::null(), &mut current) == 0
                && current.ss_flags & libc::SS_DISABLE == 0
                && current.ss_size >= size
            {
                trace!(size = current.ss_size, "keeping existing alternate signal stack");
                return Ok(());
            }

            let page = page_size();
            let base = libc::mmap(
                ptr::null_mut(),
                size + page,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if base == libc::MAP_FAILED {
                let errno = stdext::errno();
                with_errno_str(errno, |err| warn!("mmap for alternate signal stack failed: {err}"));
                return Err(InstallError::Mmap { errno });
            }
            if libc::mprotect(base, page, libc::PROT_NONE) != 0 {
                with_errno_str(stdext::errno(), |err| {
                    warn!("could not protect the alternate signal stack guard page: {err}")
                });
            }

            let mut stack: libc::stack_t = mem::zeroed();
            stack.ss_sp = base.cast::<u8>().add(page).cast();
            stack.ss_size = size;
            stack.ss_flags = 0;

            if libc::sigaltstack(&stack, ptr::null_mut()) != 0 {
                let errno = stdext::errno();
                with_errno_str(errno, |err| warn!("sigaltstack failed: {err}"));
                libc::munmap(base, size + page);
                return Err(InstallError::AltStack { errno });
            }

            debug!(size, "alternate signal stack installed");
        }
        Ok(())
    }

    fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as usize,
            _ => 4096,
        }
    }

    /// Modern kernels on modern hardware can have dynamic signal stack sizes.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn stack_size() -> usize {
        const AT_MINSIGSTKSZ: libc::c_ulong = 51;
        // 0 if the kernel does not report it
        let dynamic = unsafe { libc::getauxval(AT_MINSIGSTKSZ) } as usize;
        libc::MINSIGSTKSZ.max(dynamic) + HEADROOM
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn stack_size() -> usize {
        libc::MINSIGSTKSZ + HEADROOM
    }
}
