//! Probe configuration and command-line mode
//!
//! Everything comes from the process environment. The probe takes no real
//! options: a single positional argument marks the post-exec continuation.

use crate::check::SyscallContext;
use crate::errors::{ProbeError, Result};
use nix::sys::resource::{getrlimit, Resource};
use std::ffi::CString;
use std::time::Duration;

/// Library search path the re-executed image cannot start without
pub const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";
/// Log filter, forwarded across `execve` when present
pub const LOG_FILTER_VAR: &str = "RUST_LOG";
/// Bounded wait for late deliveries after an unmask, in milliseconds
pub const SETTLE_VAR: &str = "SIGPROBE_SETTLE_MS";
/// How many times the coalescing and queuing scenarios raise their signal
pub const RAISES_VAR: &str = "SIGPROBE_RAISES";
/// Argument handed to the re-executed image
pub const CONTINUATION_ARG: &str = "cont";

/// What this invocation should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run every scenario, ending in a re-exec
    Full,
    /// Finish the exec persistence scenario in the new image
    Continuation,
    /// Print usage
    Help,
}

impl Mode {
    /// Decide the mode from `argv`, including the program name
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        match args.get(1).map(AsRef::as_ref) {
            Some("-h") | Some("--help") => Self::Help,
            Some(arg) if !arg.is_empty() => Self::Continuation,
            _ => Self::Full,
        }
    }
}

/// Tunables for a probe run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Zero means deliveries must be visible as soon as the unmask returns
    pub settle: Duration,
    /// Raises per signal in the coalescing and queuing scenarios
    pub raises: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            settle: Duration::ZERO,
            raises: 2,
        }
    }
}

impl ProbeConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read variables
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(SETTLE_VAR) {
            let millis: u64 = value.trim().parse().map_err(|_| {
                ProbeError::config(format!("{} must be a number of milliseconds, got {:?}", SETTLE_VAR, value))
            })?;
            config.settle = Duration::from_millis(millis);
        }

        if let Some(value) = lookup(RAISES_VAR) {
            config.raises = value.trim().parse().map_err(|_| {
                ProbeError::config(format!("{} must be a positive integer, got {:?}", RAISES_VAR, value))
            })?;
        }

        if config.raises == 0 {
            return Err(ProbeError::config(format!("{} must be at least 1", RAISES_VAR)));
        }

        Ok(config)
    }

    /// Real-time raises must stay below the pending-signal limit, or the
    /// queue overflows and the count check means nothing.
    pub fn check_queue_limit(&self) -> Result<()> {
        let (soft, _hard) = getrlimit(Resource::RLIMIT_SIGPENDING).syscall("getrlimit")?;
        if u64::from(self.raises) >= soft as u64 {
            return Err(ProbeError::config(format!(
                "{}={} does not fit under RLIMIT_SIGPENDING ({})",
                RAISES_VAR, self.raises, soft
            )));
        }
        Ok(())
    }
}

/// Environment for the re-executed image.
///
/// Only the library search path (required), the log filter and the settle
/// timeout (both optional) are passed on.
pub fn continuation_env<F>(lookup: F) -> Result<Vec<CString>>
where
    F: Fn(&str) -> Option<String>,
{
    let library_path = lookup(LIBRARY_PATH_VAR)
        .ok_or_else(|| ProbeError::config(format!("No {} envvar found", LIBRARY_PATH_VAR)))?;

    let mut env = vec![env_entry(LIBRARY_PATH_VAR, &library_path)?];
    for key in [LOG_FILTER_VAR, SETTLE_VAR] {
        if let Some(value) = lookup(key) {
            env.push(env_entry(key, &value)?);
        }
    }
    Ok(env)
}

fn env_entry(key: &str, value: &str) -> Result<CString> {
    CString::new(format!("{}={}", key, value))
        .map_err(|_| ProbeError::config(format!("{} contains a NUL byte", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_mode_from_args() {
        assert_eq!(Mode::from_args(&["probe"]), Mode::Full);
        assert_eq!(Mode::from_args(&["probe", "cont"]), Mode::Continuation);
        assert_eq!(Mode::from_args(&["probe", "anything"]), Mode::Continuation);
        assert_eq!(Mode::from_args(&["probe", ""]), Mode::Full);
        assert_eq!(Mode::from_args(&["probe", "--help"]), Mode::Help);
        assert_eq!(Mode::from_args::<&str>(&[]), Mode::Full);
    }

    #[test]
    fn test_defaults() {
        let config = ProbeConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, ProbeConfig::default());
        assert_eq!(config.settle, Duration::ZERO);
        assert_eq!(config.raises, 2);
    }

    #[test]
    fn test_overrides() {
        let config =
            ProbeConfig::from_lookup(lookup_from(&[(SETTLE_VAR, "25"), (RAISES_VAR, " 5 ")]))
                .unwrap();
        assert_eq!(config.settle, Duration::from_millis(25));
        assert_eq!(config.raises, 5);
    }

    #[test]
    fn test_invalid_values() {
        for pairs in [
            [(RAISES_VAR, "0")],
            [(RAISES_VAR, "-3")],
            [(SETTLE_VAR, "soon")],
        ] {
            let err = ProbeConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(matches!(err, ProbeError::Config(_)), "{:?}", pairs);
        }
    }

    #[test]
    fn test_queue_limit() {
        assert!(ProbeConfig::default().check_queue_limit().is_ok());

        let huge = ProbeConfig {
            raises: u32::MAX,
            ..ProbeConfig::default()
        };
        // only an unlimited RLIMIT_SIGPENDING would accept this
        let (soft, _) = getrlimit(Resource::RLIMIT_SIGPENDING).unwrap();
        if (soft as u64) <= u64::from(u32::MAX) {
            assert!(matches!(huge.check_queue_limit(), Err(ProbeError::Config(_))));
        }
    }

    #[test]
    fn test_continuation_env_requires_library_path() {
        let err = continuation_env(lookup_from(&[])).unwrap_err();
        assert_eq!(err.to_string(), "No LD_LIBRARY_PATH envvar found");
    }

    #[test]
    fn test_continuation_env_forwards_only_known_vars() {
        let env = continuation_env(lookup_from(&[
            (LIBRARY_PATH_VAR, "/opt/lib"),
            (LOG_FILTER_VAR, "debug"),
            (SETTLE_VAR, "10"),
            (RAISES_VAR, "4"),
            ("HOME", "/root"),
        ]))
        .unwrap();
        let env: Vec<_> = env.iter().map(|e| e.to_str().unwrap().to_string()).collect();
        assert_eq!(env, vec![
                "LD_LIBRARY_PATH=/opt/lib",
                "RUST_LOG=debug",
                "SIGPROBE_SETTLE_MS=10"
            ]);
    }
}
