//! Syscall result assertions
//!
//! Every mask, process and signal call goes through here so a failure is
//! reported the same way regardless of whether it came from `libc` or `nix`.

use crate::errors::{ProbeError, Result};
use libc::c_int;
use nix::errno::Errno;

/// Treat the `-1` sentinel as failure, otherwise pass the value through.
pub fn check(op: &'static str, ret: c_int) -> Result<c_int> {
    Errno::result(ret).map_err(|errno| ProbeError::Syscall { op, errno })
}

/// Attach the operation name to a `nix` result
pub trait SyscallContext<T> {
    fn syscall(self, op: &'static str) -> Result<T>;
}

impl<T> SyscallContext<T> for nix::Result<T> {
    fn syscall(self, op: &'static str) -> Result<T> {
        self.map_err(|errno| ProbeError::Syscall { op, errno })
    }
}
