//! Errors reported while installing the handler. The fault path itself never
//! fails, it only degrades.

use thiserror::Error;

use crate::signal::FatalSignal;

pub type InstallResult<T> = Result<T, InstallError>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    #[error("sigaction({signal}) failed with errno {errno}")]
    Sigaction { signal: FatalSignal, errno: i32 },

    #[error("failed to map the alternate signal stack (errno {errno})")]
    Mmap { errno: i32 },

    #[error("sigaltstack failed with errno {errno}")]
    AltStack { errno: i32 },
}
