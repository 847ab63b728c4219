//! Crashes on purpose, to look at what `dumpstack` prints.
//!
//! `RUST_LOG=debug crashme segv --symbolize`

use std::{hint::black_box, ptr};

use clap::{Parser, ValueEnum};
use dumpstack::{FaultOutput, HandlerOptions};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Fault {
    /// Read from a page mapped PROT_NONE.
    Segv,
    /// Recurse until the stack runs out.
    Overflow,
    Bus,
    Fpe,
    Ill,
    Abort,
    Term,
    /// Print a voluntary trace and exit cleanly.
    Trace,
}

#[derive(Debug, Parser)]
#[command(about = "Crash in interesting ways")]
struct Args {
    fault: Fault,

    /// Resolve symbol names with dladdr.
    #[arg(long)]
    symbolize: bool,

    /// Send the dump to stdout, tagged, through an installed failure writer.
    #[arg(long)]
    custom_writer: bool,
}

fn main() {
    let registry = tracing_subscriber::Registry::default().with(
        EnvFilter::builder()
            .with_default_directive(tracing::Level::INFO.into())
            .from_env_lossy(),
    );

    let tree_layer = tracing_tree::HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true)
        .with_writer(std::io::stderr);

    registry.with(tree_layer).init();

    let args = Args::parse();

    let mut options = HandlerOptions {
        symbolize: args.symbolize,
        ..HandlerOptions::default()
    };
    if args.custom_writer {
        dumpstack::install_failure_writer(tagged_stdout);
        options.output = FaultOutput::InstalledWriter;
    }

    if let Err(err) = dumpstack::install_failure_signal_handler_with(options) {
        eprintln!("crashme: {err}");
        std::process::exit(2);
    }

    info!(fault = ?args.fault, pid = std::process::id(), "about to crash");
    crash(args.fault);
}

#[inline(never)]
fn crash(fault: Fault) {
    match fault {
        Fault::Segv => unsafe {
            let page = libc::mmap(
                ptr::null_mut(),
                4096,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            assert_ne!(page, libc::MAP_FAILED, "mmap failed");
            black_box(ptr::read_volatile(page.cast::<u8>()));
        },
        Fault::Overflow => {
            black_box(recurse(0));
        }
        Fault::Bus => raise(libc::SIGBUS),
        Fault::Fpe => raise(libc::SIGFPE),
        Fault::Ill => raise(libc::SIGILL),
        Fault::Abort => std::process::abort(),
        Fault::Term => raise(libc::SIGTERM),
        Fault::Trace => {
            let mut trace = String::new();
            dumpstack::dump_stack_trace_to_string(&mut trace);
            print!("{trace}");
            return;
        }
    }
    unreachable!("{fault:?} did not kill the process");
}

#[inline(never)]
#[allow(unconditional_recursion)]
fn recurse(depth: u64) -> u64 {
    let frame = black_box([depth; 64]);
    recurse(depth + 1) + frame[0]
}

fn raise(signum: libc::c_int) {
    unsafe {
        libc::raise(signum);
    }
}

/// Async-signal-safe: two raw writes, no allocation.
fn tagged_stdout(line: &[u8]) {
    const TAG: &[u8] = b"[crashme] ";
    unsafe {
        libc::write(libc::STDOUT_FILENO, TAG.as_ptr().cast(), TAG.len());
        libc::write(libc::STDOUT_FILENO, line.as_ptr().cast(), line.len());
    }
}
