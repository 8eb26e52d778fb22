//! Blocked and pending signal sets
//!
//! `MaskController` is the only code that touches the process signal mask.
//! The probe runs single-threaded, so `sigprocmask` and the thread mask are
//! the same thing.

use crate::check::check;
use crate::errors::{ProbeError, Result};
use crate::signo::SignalId;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;
use tracing::debug;

/// A set of signals backed by a raw `sigset_t`
#[derive(Clone, Copy)]
pub struct SignalSet {
    raw: libc::sigset_t,
}

impl SignalSet {
    pub fn empty() -> Self {
        let mut raw = MaybeUninit::<libc::sigset_t>::uninit();
        // sigemptyset cannot fail for a valid pointer
        unsafe {
            libc::sigemptyset(raw.as_mut_ptr());
            Self {
                raw: raw.assume_init(),
            }
        }
    }

    pub fn from_signals<I>(signals: I) -> Result<Self>
    where
        I: IntoIterator<Item = SignalId>,
    {
        let mut set = Self::empty();
        for sig in signals {
            set.add(sig)?;
        }
        Ok(set)
    }

    pub fn add(&mut self, sig: SignalId) -> Result<()> {
        check("sigaddset", unsafe { libc::sigaddset(&mut self.raw, sig.raw()) })?;
        Ok(())
    }

    pub fn remove(&mut self, sig: SignalId) -> Result<()> {
        check("sigdelset", unsafe { libc::sigdelset(&mut self.raw, sig.raw()) })?;
        Ok(())
    }

    pub fn contains(&self, sig: SignalId) -> bool {
        unsafe { libc::sigismember(&self.raw, sig.raw()) == 1 }
    }

    pub fn iter(&self) -> impl Iterator<Item = SignalId> + '_ {
        SignalId::all().filter(move |sig| self.contains(*sig))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl PartialEq for SignalSet {
    fn eq(&self, other: &Self) -> bool {
        SignalId::all().all(|sig| self.contains(sig) == other.contains(sig))
    }
}

impl Eq for SignalSet {}

impl fmt::Debug for SignalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.iter().map(|sig| sig.to_string()))
            .finish()
    }
}

/// Reads and replaces the blocked-signal set
#[derive(Debug, Default, Clone, Copy)]
pub struct MaskController;

impl MaskController {
    pub fn new() -> Self {
        Self
    }

    /// Replace the blocked set with exactly `set`.
    ///
    /// Requests to block SIGKILL or SIGSTOP must not fail; the kernel drops
    /// them silently.
    pub fn set_mask(&self, set: &SignalSet) -> Result<()> {
        debug!(mask = ?set, "sigprocmask(SIG_SETMASK)");
        check("sigprocmask", unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &set.raw, ptr::null_mut())
        })?;
        Ok(())
    }

    /// Current blocked set, without changing it
    pub fn get_mask(&self) -> Result<SignalSet> {
        let mut current = SignalSet::empty();
        check("sigprocmask", unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, ptr::null(), &mut current.raw)
        })?;
        Ok(current)
    }

    /// Empty the blocked set. Anything pending is delivered on the way out.
    pub fn unblock_all(&self) -> Result<()> {
        self.set_mask(&SignalSet::empty())
    }

    /// Signals raised but not yet delivered
    pub fn pending(&self) -> Result<SignalSet> {
        let mut pending = SignalSet::empty();
        check("sigpending", unsafe { libc::sigpending(&mut pending.raw) })?;
        Ok(pending)
    }

    /// Block exactly `signals`, then read the mask back.
    ///
    /// Every maskable member must be reported blocked and no non-maskable
    /// one may be. Returns the readback.
    pub fn set_mask_verified(&self, signals: &[SignalId]) -> Result<SignalSet> {
        self.set_mask(&SignalSet::from_signals(signals.iter().copied())?)?;
        let readback = self.get_mask()?;

        for &sig in signals {
            let blocked = readback.contains(sig);
            if sig.is_maskable() && !blocked {
                return Err(ProbeError::violation(format!(
                    "{} was requested blocked but the mask does not contain it",
                    sig
                )));
            }
            if !sig.is_maskable() && blocked {
                return Err(ProbeError::violation(format!(
                    "{} should be ignored by the mask, but is reported blocked",
                    sig
                )));
            }
        }

        Ok(readback)
    }
}
