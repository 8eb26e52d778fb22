//! Process boundary probes
//!
//! Pending signals are per process image: a `fork` child starts with an
//! empty pending set, while `execve` keeps both the pending and the blocked
//! set and only resets handlers.

use crate::check::SyscallContext;
use crate::config::{continuation_env, CONTINUATION_ARG};
use crate::counter::{install, Disposition};
use crate::errors::{exit_with, ProbeError, Result};
use crate::scenario::{Phase, Probe, Scenario};
use crate::signo::SignalId;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execve, fork, ForkResult, Pid};
use std::convert::Infallible;
use std::ffi::CString;
use std::path::Path;
use tracing::info;

/// Everything `execve` needs to restart this program as the continuation
#[derive(Debug, Clone)]
pub struct ExecPlan {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl ExecPlan {
    /// Plan a re-exec of the running binary.
    ///
    /// The binary is found through `/proc/self/exe` when available, falling
    /// back to `argv0`. Fails if the library search path is missing.
    pub fn for_current_image<F>(argv0: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let envp = continuation_env(lookup)?;
        let program = std::env::current_exe()
            .ok()
            .filter(|path| path.exists())
            .unwrap_or_else(|| Path::new(argv0).to_path_buf());
        Self::new(&program.to_string_lossy(), argv0, envp)
    }

    pub fn new(program: &str, argv0: &str, envp: Vec<CString>) -> Result<Self> {
        let to_c = |s: &str| {
            CString::new(s).map_err(|_| ProbeError::config(format!("{:?} contains a NUL byte", s)))
        };
        Ok(Self {
            program: to_c(program)?,
            argv: vec![to_c(argv0)?, to_c(CONTINUATION_ARG)?],
            envp,
        })
    }

    pub fn program(&self) -> &CString {
        &self.program
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn envp(&self) -> &[CString] {
        &self.envp
    }
}

/// A signal pending at `fork` time must not show up in the child.
pub fn fork_isolation(probe: &Probe) -> Result<()> {
    let sig = SignalId::ALRM;
    let mut sc = probe.scenario("fork isolation");

    sc.block(&[sig])?;
    install(sig, Disposition::Count)?;
    sc.raise(sig, 1)?;
    sc.expect_pending(sig, true, "Raised signal is not pending before fork!")?;

    // The probe is single-threaded, so the child may keep running Rust code.
    match unsafe { fork() }.syscall("fork")? {
        ForkResult::Child => match fork_child(&mut sc, sig) {
            Ok(()) => {
                println!("Child OK");
                std::process::exit(0)
            }
            Err(e) => exit_with(&e),
        },
        ForkResult::Parent { child } => {
            // the parent's ALRM stays pending; make sure it cannot be counted
            install(sig, Disposition::Default)?;
            reap(&mut sc, child)
        }
    }
}

fn fork_child(sc: &mut Scenario<'_>, sig: SignalId) -> Result<()> {
    sc.expect_blocked(sig, "Signal mask was not inherited after fork!")?;
    sc.expect_pending(sig, false, "Pending signal was inherited after fork!")?;
    sc.release()?;
    sc.observe(0, "Pending signal was inherited after fork!")
}

fn reap(sc: &mut Scenario<'_>, child: Pid) -> Result<()> {
    let status = waitpid(child, None).syscall("waitpid")?;
    sc.advance(Phase::Observed)?;

    if status.pid() != Some(child) {
        return Err(ProbeError::violation(format!(
            "waitpid returned {:?}, expected child {}",
            status.pid(),
            child
        )));
    }
    match status {
        WaitStatus::Exited(_, 0) => Ok(()),
        WaitStatus::Exited(_, code) => Err(ProbeError::violation(format!(
            "fork child {} reported failure (exit status {})",
            child, code
        ))),
        other => Err(ProbeError::violation(format!(
            "fork child {} did not exit cleanly: {:?}",
            child, other
        ))),
    }
}

/// Leave ALRM pending under its default action and replace the image.
///
/// Only returns if `execve` fails.
pub fn exec_persistence_start(probe: &Probe, plan: &ExecPlan) -> Result<Infallible> {
    let sig = SignalId::ALRM;
    let mut sc = probe.scenario("exec persistence");

    sc.block(&[sig])?;
    install(sig, Disposition::Default)?;
    sc.raise(sig, 1)?;
    sc.expect_pending(sig, true, "Raised signal is not pending before execve!")?;

    info!(program = ?plan.program, "re-executing for the continuation");
    execve(&plan.program, &plan.argv, &plan.envp).syscall("execve")
}

/// Runs in the new image: ALRM must still be blocked and pending, and is
/// delivered exactly once when released.
pub fn exec_persistence_continue(probe: &Probe) -> Result<()> {
    let sig = SignalId::ALRM;
    let mut sc = Scenario::resume(probe, "exec persistence", Phase::SignalsRaised);

    install(sig, Disposition::Count)?;
    sc.expect_deliveries(0, "Seen an unexpected signal!")?;
    sc.expect_blocked(sig, "Signal mask was NOT preserved across execve!")?;
    sc.expect_pending(sig, true, "Pending signal was NOT preserved across execve!")?;

    sc.release()?;
    sc.observe(1, "Pending signal was NOT preserved across execve!")
}
