//! Error handling module
//!
//! Uses `thiserror` for the library error type. Every failure ends the run;
//! the variant only decides how the process leaves.

use nix::errno::Errno;
use thiserror::Error;
use tracing::error;

/// Failures raised while probing signal semantics
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Required environment is missing or a tuning value is out of range
    #[error("{0}")]
    Config(String),

    /// A system call returned its error sentinel
    #[error("{op} failed: {errno}")]
    Syscall { op: &'static str, errno: Errno },

    /// The runtime broke a signal invariant
    #[error("{0}")]
    Violation(String),
}

impl ProbeError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a semantic violation
    pub fn violation<S: Into<String>>(msg: S) -> Self {
        Self::Violation(msg.into())
    }

    /// Exit code for this failure.
    ///
    /// `None` means the process must abort instead of exiting: a failed
    /// syscall leaves nothing the probe can reason about.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Config(_) | Self::Violation(_) => Some(1),
            Self::Syscall { .. } => None,
        }
    }
}

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, ProbeError>;

/// Report `err` and leave the current process image.
pub fn exit_with(err: &ProbeError) -> ! {
    error!(error = %err, "probe failed");
    match err.exit_code() {
        Some(code) => {
            println!("{}", err);
            std::process::exit(code)
        }
        None => {
            eprintln!("{}", err);
            std::process::abort()
        }
    }
}
