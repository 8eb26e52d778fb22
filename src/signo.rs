//! Signal identifiers
//!
//! `nix::sys::signal::Signal` only covers the standard signals, so the probe
//! carries its own newtype that can also name `SIGRTMIN+n`.

use crate::check::check;
use crate::errors::Result;
use libc::c_int;
use nix::sys::signal::Signal;
use nix::unistd::getpid;
use std::fmt;

/// A deliverable signal number, standard or real-time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(c_int);

impl SignalId {
    pub const ALRM: SignalId = SignalId(libc::SIGALRM);
    pub const KILL: SignalId = SignalId(libc::SIGKILL);
    pub const STOP: SignalId = SignalId(libc::SIGSTOP);

    /// Signals no mask can block
    pub const NON_MASKABLE: [SignalId; 2] = [Self::KILL, Self::STOP];

    /// Validate a raw signal number.
    ///
    /// Numbers between the last standard signal and `SIGRTMIN` are reserved
    /// by the C library and rejected here.
    pub fn from_raw(signo: c_int) -> Option<Self> {
        if Signal::try_from(signo).is_ok()
            || (libc::SIGRTMIN()..=libc::SIGRTMAX()).contains(&signo)
        {
            Some(Self(signo))
        } else {
            None
        }
    }

    /// `SIGRTMIN + offset`, if still within the real-time range
    pub fn realtime(offset: c_int) -> Option<Self> {
        let signo = libc::SIGRTMIN().checked_add(offset)?;
        if offset >= 0 && signo <= libc::SIGRTMAX() {
            Some(Self(signo))
        } else {
            None
        }
    }

    /// First real-time signal
    pub fn rt_min() -> Self {
        Self(libc::SIGRTMIN())
    }

    pub fn raw(self) -> c_int {
        self.0
    }

    pub fn is_realtime(self) -> bool {
        self.0 >= libc::SIGRTMIN()
    }

    pub fn is_maskable(self) -> bool {
        !Self::NON_MASKABLE.contains(&self)
    }

    /// Every signal a set can hold, in ascending order
    pub fn all() -> impl Iterator<Item = SignalId> {
        (1..libc::SIGRTMIN())
            .chain(libc::SIGRTMIN()..=libc::SIGRTMAX())
            .filter_map(Self::from_raw)
    }

    /// Send this signal to the calling process `times` times.
    ///
    /// Process-directed on purpose: `kill(getpid())` is what the pending-set
    /// rules are written against.
    pub fn raise_to_self(self, times: u32) -> Result<()> {
        let pid = getpid().as_raw();
        for _ in 0..times {
            check("kill", unsafe { libc::kill(pid, self.0) })?;
        }
        Ok(())
    }
}

impl From<Signal> for SignalId {
    fn from(sig: Signal) -> Self {
        Self(sig as c_int)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_realtime() {
            match self.0 - libc::SIGRTMIN() {
                0 => write!(f, "SIGRTMIN"),
                n => write!(f, "SIGRTMIN+{}", n),
            }
        } else {
            match Signal::try_from(self.0) {
                Ok(sig) => f.write_str(sig.as_str()),
                Err(_) => write!(f, "signal {}", self.0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(!SignalId::ALRM.is_realtime());
        assert!(SignalId::ALRM.is_maskable());
        assert!(SignalId::rt_min().is_realtime());
        assert!(SignalId::rt_min().is_maskable());

        for sig in SignalId::NON_MASKABLE {
            assert!(!sig.is_maskable());
            assert!(!sig.is_realtime());
        }
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(SignalId::from_raw(libc::SIGALRM), Some(SignalId::ALRM));
        assert_eq!(SignalId::from_raw(0), None);
        assert_eq!(SignalId::from_raw(libc::SIGRTMAX() + 1), None);
        assert_eq!(
            SignalId::from_raw(libc::SIGRTMIN()),
            Some(SignalId::rt_min())
        );
        // reserved by the C library
        if libc::SIGRTMIN() > 32 {
            assert_eq!(SignalId::from_raw(32), None);
        }
    }

    #[test]
    fn test_realtime_bounds() {
        assert_eq!(SignalId::realtime(0), Some(SignalId::rt_min()));
        let span = libc::SIGRTMAX() - libc::SIGRTMIN();
        assert!(SignalId::realtime(span).is_some());
        assert_eq!(SignalId::realtime(span + 1), None);
        assert_eq!(SignalId::realtime(-1), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(SignalId::ALRM.to_string(), "SIGALRM");
        assert_eq!(SignalId::KILL.to_string(), "SIGKILL");
        assert_eq!(SignalId::rt_min().to_string(), "SIGRTMIN");
        assert_eq!(SignalId::realtime(3).unwrap().to_string(), "SIGRTMIN+3");
    }

    #[test]
    fn test_all_is_ordered_and_complete() {
        let all: Vec<_> = SignalId::all().collect();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
        assert!(all.contains(&SignalId::ALRM));
        assert!(all.contains(&SignalId::KILL));
        assert_eq!(all.last().map(|s| s.raw()), Some(libc::SIGRTMAX()));
        assert_eq!(SignalId::from(Signal::SIGSTOP), SignalId::STOP);
    }
}
