//! Delivery counter and handler installation
//!
//! The counting handler is the only observable proof that a signal instance
//! was delivered. It bumps a relaxed atomic and does nothing else, so it is
//! async-signal-safe.

use crate::check::check;
use crate::errors::Result;
use crate::signo::SignalId;
use libc::c_int;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Process-wide count of delivered signal instances
#[derive(Debug)]
pub struct DeliveryCounter {
    count: AtomicU32,
}

impl DeliveryCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }

    /// Called once per delivered instance
    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    /// Observe the counter after an unmask.
    ///
    /// With a zero `settle` this is a single load: delivery is assumed to
    /// have happened before the unmasking call returned. Otherwise watch the
    /// whole `settle` window so late extra deliveries are seen too; stop
    /// early only once the count overshoots `expected`.
    pub fn await_count(&self, expected: u32, settle: Duration) -> u32 {
        let deadline = Instant::now() + settle;
        loop {
            let seen = self.get();
            if seen > expected || Instant::now() >= deadline {
                return seen;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Default for DeliveryCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter fed by the counting handler
pub static DELIVERIES: DeliveryCounter = DeliveryCounter::new();

extern "C" fn count_delivery(_signo: c_int) {
    DELIVERIES.record();
}

/// What happens when a signal is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Increment `DELIVERIES`
    Count,
    /// `SIG_DFL`; for terminating signals this kills the process
    Default,
    /// `SIG_IGN`
    Ignore,
}

impl Disposition {
    fn handler(self) -> libc::sighandler_t {
        match self {
            Self::Count => count_delivery as extern "C" fn(c_int) as libc::sighandler_t,
            Self::Default => libc::SIG_DFL,
            Self::Ignore => libc::SIG_IGN,
        }
    }
}

/// Replace the disposition of `sig`. No flags, empty handler mask.
pub fn install(sig: SignalId, disposition: Disposition) -> Result<()> {
    debug!(signal = %sig, ?disposition, "sigaction");
    let mut act: libc::sigaction = unsafe { mem::zeroed() };
    act.sa_sigaction = disposition.handler();
    check("sigemptyset", unsafe { libc::sigemptyset(&mut act.sa_mask) })?;
    check("sigaction", unsafe {
        libc::sigaction(sig.raw(), &act, ptr::null_mut())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_and_reset() {
        let counter = DeliveryCounter::new();
        assert_eq!(counter.get(), 0);

        counter.record();
        counter.record();
        assert_eq!(counter.get(), 2);

        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let counter = Arc::new(DeliveryCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.record();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), 8000);
    }

    #[test]
    fn test_await_count_without_settle_is_a_single_read() {
        let counter = DeliveryCounter::new();
        let start = Instant::now();
        assert_eq!(counter.await_count(1, Duration::ZERO), 0);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_await_count_waits_for_late_delivery() {
        let counter = Arc::new(DeliveryCounter::new());
        let late = counter.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            late.record();
        });

        assert_eq!(counter.await_count(1, Duration::from_millis(200)), 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_await_count_sees_late_extra_delivery() {
        for expected in [0, 1] {
            let counter = Arc::new(DeliveryCounter::new());
            for _ in 0..expected {
                counter.record();
            }
            let late = counter.clone();
            let handle = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                late.record();
            });

            let start = Instant::now();
            assert_eq!(counter.await_count(expected, Duration::from_secs(5)), expected + 1);
            // returns on overshoot, not at the deadline
            assert!(start.elapsed() < Duration::from_secs(5));
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_await_count_gives_up_at_deadline() {
        let counter = DeliveryCounter::new();
        assert_eq!(counter.await_count(2, Duration::from_millis(10)), 0);
    }

    #[test]
    fn test_counting_handler_sees_delivery() {
        let sig = SignalId::realtime(2).unwrap();
        install(sig, Disposition::Count).unwrap();

        let before = DELIVERIES.get();
        // raise() targets the calling thread and delivers before returning
        unsafe { libc::raise(sig.raw()) };
        assert_eq!(DELIVERIES.get() - before, 1);

        install(sig, Disposition::Ignore).unwrap();
        unsafe { libc::raise(sig.raw()) };
        assert_eq!(DELIVERIES.get() - before, 1);
    }
}
